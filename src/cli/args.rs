//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Stowage - add and copy content into working containers
///
/// Copies local files, URLs or the contents of another image into a
/// working container and records the content digest in its history.
#[derive(Parser, Debug)]
#[command(name = "stowage")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "STOWAGE_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Add content to a container, extracting local archives
    Add(AddCopyArgs),

    /// Copy content into a container
    Copy(CopyArgs),

    /// Show the recorded history of a container
    History(HistoryArgs),
}

/// Arguments shared by add and copy
#[derive(Parser, Debug)]
pub struct AddCopyArgs {
    /// CONTAINER SRC [[...] DEST]
    #[arg(value_name = "ARGS")]
    pub args: Vec<String>,

    /// Add an entry for this operation to the image's history
    #[arg(long)]
    pub add_history: bool,

    /// Set the user and group ownership of the destination content
    #[arg(long, value_name = "USER[:GROUP]")]
    pub chown: Option<String>,

    /// Set the access permissions of the destination content
    #[arg(long, value_name = "MODE")]
    pub chmod: Option<String>,

    /// Expected digest of remote content (sha256:<hex>)
    #[arg(long)]
    pub checksum: Option<String>,

    /// Don't output a digest of the newly-added/copied content
    #[arg(short, long)]
    pub quiet: bool,

    /// Path to an alternate .containerignore file
    #[arg(long = "ignorefile", value_name = "FILE")]
    pub ignore_file: Option<PathBuf>,

    /// Context directory path
    #[arg(long = "contextdir", value_name = "DIR")]
    pub context_dir: Option<PathBuf>,

    /// Use the root directory of the specified working container or image
    #[arg(long)]
    pub from: Option<String>,

    /// Exclude copying files matching the specified pattern
    #[arg(long = "exclude", value_name = "PATTERN")]
    pub excludes: Vec<String>,

    /// Number of times to retry pulling the --from image (default: from config)
    #[arg(long)]
    pub retry: Option<u32>,

    /// Delay between pull retries, e.g. "2s" (default: from config)
    #[arg(long)]
    pub retry_delay: Option<String>,

    /// Set timestamps on new content to seconds since the epoch
    #[arg(long, value_name = "SECONDS")]
    pub timestamp: Option<String>,

    /// Add content to its own layer
    #[arg(long)]
    pub link: bool,

    /// Require HTTPS and verify certificates when accessing registries
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub tls_verify: Option<bool>,

    /// Directory of certificates used to access registries
    #[arg(long, value_name = "DIR")]
    pub cert_dir: Option<PathBuf>,

    /// Registry credentials, username[:password]
    #[arg(long)]
    pub creds: Option<String>,

    /// Path of the registry authentication file
    #[arg(long)]
    pub authfile: Option<PathBuf>,

    /// Key needed to decrypt the --from image
    #[arg(long = "decryption-key", value_name = "KEY")]
    pub decryption_keys: Vec<String>,

    /// Signature policy file used when pulling the --from image
    #[arg(long, hide = true)]
    pub signature_policy: Option<PathBuf>,
}

/// Arguments for the copy command
#[derive(Parser, Debug)]
pub struct CopyArgs {
    #[command(flatten)]
    pub common: AddCopyArgs,

    /// Keep leading directories of sources under the destination
    #[arg(long)]
    pub parents: bool,
}

/// Arguments for the history command
#[derive(Parser, Debug)]
pub struct HistoryArgs {
    /// Working container name or ID
    pub container: String,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Output format for the history command
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_add() {
        let cli = Cli::parse_from(["stowage", "add", "--chown", "1:2", "web", "a.txt", "/srv/"]);
        match cli.command {
            Commands::Add(args) => {
                assert_eq!(args.args, vec!["web", "a.txt", "/srv/"]);
                assert_eq!(args.chown.as_deref(), Some("1:2"));
                assert!(args.tls_verify.is_none());
            }
            _ => panic!("expected Add command"),
        }
    }

    #[test]
    fn cli_parses_copy_with_parents() {
        let cli = Cli::parse_from([
            "stowage", "copy", "--parents", "--exclude", "*.tmp", "--exclude", "!keep.tmp", "web", "src",
        ]);
        match cli.command {
            Commands::Copy(args) => {
                assert!(args.parents);
                assert_eq!(args.common.excludes, vec!["*.tmp", "!keep.tmp"]);
                assert_eq!(args.common.args, vec!["web", "src"]);
            }
            _ => panic!("expected Copy command"),
        }
    }

    #[test]
    fn add_has_no_parents_flag() {
        assert!(Cli::try_parse_from(["stowage", "add", "--parents", "web", "a"]).is_err());
    }

    #[test]
    fn tls_verify_forms() {
        let cli = Cli::parse_from(["stowage", "copy", "--tls-verify=false", "web", "a"]);
        match cli.command {
            Commands::Copy(args) => assert_eq!(args.common.tls_verify, Some(false)),
            _ => panic!("expected Copy command"),
        }

        let cli = Cli::parse_from(["stowage", "copy", "--tls-verify", "web", "a"]);
        match cli.command {
            Commands::Copy(args) => {
                assert_eq!(args.common.tls_verify, Some(true));
                assert_eq!(args.common.args, vec!["web", "a"]);
            }
            _ => panic!("expected Copy command"),
        }
    }

    #[test]
    fn cli_parses_history() {
        let cli = Cli::parse_from(["stowage", "history", "--format", "json", "web"]);
        match cli.command {
            Commands::History(args) => {
                assert_eq!(args.container, "web");
                assert!(matches!(args.format, OutputFormat::Json));
            }
            _ => panic!("expected History command"),
        }
    }

    #[test]
    fn global_verbose_counts() {
        let cli = Cli::parse_from(["stowage", "-vv", "history", "web"]);
        assert_eq!(cli.verbose, 2);
    }
}
