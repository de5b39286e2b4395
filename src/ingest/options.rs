//! Per-invocation ADD/COPY options and their validation
//!
//! Everything that can be rejected without touching the store is rejected
//! here, before any pull or mount happens.

use crate::config::parse_duration;
use crate::error::{StowageError, StowageResult};
use crate::ingest::ownership::ChownSpec;
use crate::store::PullOptions;
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Which command is ingesting content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    /// Like COPY, but local archives are extracted in place
    Add,
    Copy,
}

impl Verb {
    /// Whether a single local archive source is unpacked instead of copied
    pub fn extracts_local_archives(self) -> bool {
        match self {
            Verb::Add => true,
            Verb::Copy => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Add => "ADD",
            Verb::Copy => "COPY",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw options for one ADD/COPY invocation, as the user supplied them
#[derive(Debug, Clone)]
pub struct AddCopyOptions {
    pub verb: Verb,
    /// Target working container
    pub container: String,
    /// Source paths or URLs
    pub sources: Vec<String>,
    /// Destination inside the container; the working directory when absent
    pub dest: Option<String>,
    /// Container or image whose root filesystem sources are read from
    pub from: Option<String>,
    pub chown: Option<String>,
    pub chmod: Option<String>,
    /// Expected digest of remote content, `sha256:<hex>`
    pub checksum: Option<String>,
    /// Suppress the digest line on stdout
    pub quiet: bool,
    pub add_history: bool,
    pub context_dir: Option<PathBuf>,
    pub ignore_file: Option<PathBuf>,
    pub excludes: Vec<String>,
    pub retry: u32,
    pub retry_delay: String,
    /// Seconds since the epoch applied to every ingested entry
    pub timestamp: Option<String>,
    /// Keep leading directories of sources under the destination
    pub parents: bool,
    /// Request an independent layer for this content
    pub link: bool,
    pub pull: PullOptions,
}

impl AddCopyOptions {
    /// Options with defaults for everything but the positional arguments
    pub fn new(verb: Verb, args: Vec<String>) -> StowageResult<Self> {
        let (container, sources, dest) = split_args(args)?;
        Ok(Self {
            verb,
            container,
            sources,
            dest,
            from: None,
            chown: None,
            chmod: None,
            checksum: None,
            quiet: false,
            add_history: false,
            context_dir: None,
            ignore_file: None,
            excludes: vec![],
            retry: 3,
            retry_delay: "2s".to_string(),
            timestamp: None,
            parents: false,
            link: false,
            pull: PullOptions::default(),
        })
    }

    /// Check every option that does not need the store
    pub fn validate(self) -> StowageResult<CopyOperation> {
        if self.ignore_file.is_some() && self.context_dir.is_none() {
            return Err(StowageError::IgnoreFileWithoutContext);
        }

        let timestamp = self.timestamp.as_deref().map(parse_timestamp).transpose()?;
        let chmod = self.chmod.as_deref().map(parse_chmod).transpose()?;
        let chown = self.chown.as_deref().map(ChownSpec::parse).transpose()?;
        let retry_delay = parse_duration(&self.retry_delay)?;

        let checksum = match self.checksum.as_deref() {
            Some(checksum) => {
                if let Some(local) = self.sources.iter().find(|s| !is_url(s)) {
                    return Err(StowageError::ChecksumRequiresUrl {
                        source_ref: local.clone(),
                    });
                }
                Some(parse_checksum(checksum)?)
            }
            None => None,
        };

        Ok(CopyOperation {
            verb: self.verb,
            container: self.container,
            sources: self.sources,
            dest: self.dest.filter(|d| !d.is_empty()),
            from: self.from.filter(|f| !f.is_empty()),
            excludes: self.excludes,
            context_dir: self.context_dir,
            ignore_file: self.ignore_file,
            chown,
            chmod,
            timestamp,
            checksum,
            parents: self.parents,
            link: self.link,
            quiet: self.quiet,
            add_history: self.add_history,
            retry: RetryPolicy {
                attempts: self.retry,
                delay: retry_delay,
            },
            pull: self.pull,
        })
    }
}

/// How often and how patiently to retry a pull or download
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts; zero behaves like one
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.attempts.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

/// A validated ingestion request
#[derive(Debug, Clone)]
pub struct CopyOperation {
    pub verb: Verb,
    pub container: String,
    pub sources: Vec<String>,
    pub dest: Option<String>,
    pub from: Option<String>,
    /// Explicit excludes; ignore-file patterns are prepended at run time
    pub excludes: Vec<String>,
    pub context_dir: Option<PathBuf>,
    pub ignore_file: Option<PathBuf>,
    pub chown: Option<ChownSpec>,
    pub chmod: Option<u32>,
    pub timestamp: Option<SystemTime>,
    /// Lowercase hex SHA-256 expected for remote content
    pub checksum: Option<String>,
    pub parents: bool,
    pub link: bool,
    pub quiet: bool,
    pub add_history: bool,
    pub retry: RetryPolicy,
    pub pull: PullOptions,
}

/// Split `container src... [dest]`; with several sources the last is the destination
pub fn split_args(mut args: Vec<String>) -> StowageResult<(String, Vec<String>, Option<String>)> {
    if args.is_empty() {
        return Err(StowageError::MissingContainer);
    }
    let container = args.remove(0);
    if container.is_empty() {
        return Err(StowageError::MissingContainer);
    }
    if args.is_empty() {
        return Err(StowageError::MissingSource);
    }
    let dest = if args.len() > 1 { args.pop() } else { None };
    Ok((container, args, dest))
}

pub fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Parse `--timestamp` seconds since the epoch
pub fn parse_timestamp(value: &str) -> StowageResult<SystemTime> {
    let secs: i64 = value
        .trim()
        .parse()
        .map_err(|e: std::num::ParseIntError| StowageError::InvalidTimestamp {
            value: value.to_string(),
            reason: e.to_string(),
        })?;

    let offset = Duration::from_secs(secs.unsigned_abs());
    let time = if secs >= 0 {
        UNIX_EPOCH.checked_add(offset)
    } else {
        UNIX_EPOCH.checked_sub(offset)
    };
    time.ok_or_else(|| StowageError::InvalidTimestamp {
        value: value.to_string(),
        reason: "out of range".to_string(),
    })
}

/// Parse `--chmod` octal mode bits
pub fn parse_chmod(value: &str) -> StowageResult<u32> {
    let invalid = || StowageError::InvalidChmod {
        value: value.to_string(),
    };
    let digits = value.trim();
    if digits.is_empty() || digits.len() > 4 {
        return Err(invalid());
    }
    u32::from_str_radix(digits, 8).map_err(|_| invalid())
}

/// Parse `--checksum sha256:<hex>` into lowercase hex
pub fn parse_checksum(value: &str) -> StowageResult<String> {
    let hex = value
        .strip_prefix("sha256:")
        .ok_or_else(|| StowageError::InvalidChecksum(value.to_string()))?;
    if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(StowageError::InvalidChecksum(value.to_string()));
    }
    Ok(hex.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn options(list: &[&str]) -> AddCopyOptions {
        AddCopyOptions::new(Verb::Copy, args(list)).unwrap()
    }

    #[test]
    fn verb_controls_extraction() {
        assert!(Verb::Add.extracts_local_archives());
        assert!(!Verb::Copy.extracts_local_archives());
        assert_eq!(Verb::Add.to_string(), "ADD");
    }

    #[test]
    fn split_requires_container_and_source() {
        assert!(matches!(split_args(vec![]), Err(StowageError::MissingContainer)));
        assert!(matches!(split_args(args(&["web"])), Err(StowageError::MissingSource)));
    }

    #[test]
    fn single_source_has_no_dest() {
        let (container, sources, dest) = split_args(args(&["web", "app.conf"])).unwrap();
        assert_eq!(container, "web");
        assert_eq!(sources, vec!["app.conf"]);
        assert_eq!(dest, None);
    }

    #[test]
    fn trailing_argument_is_destination() {
        let (_, sources, dest) = split_args(args(&["web", "a.conf", "b.conf", "/etc/app/"])).unwrap();
        assert_eq!(sources, vec!["a.conf", "b.conf"]);
        assert_eq!(dest.as_deref(), Some("/etc/app/"));
    }

    #[test]
    fn ignorefile_needs_contextdir() {
        let mut opts = options(&["web", "."]);
        opts.ignore_file = Some(PathBuf::from(".containerignore"));
        assert!(matches!(opts.validate(), Err(StowageError::IgnoreFileWithoutContext)));
    }

    #[test]
    fn malformed_timestamp_rejected() {
        let mut opts = options(&["web", "."]);
        opts.timestamp = Some("yesterday".to_string());
        assert!(matches!(opts.validate(), Err(StowageError::InvalidTimestamp { .. })));
    }

    #[test]
    fn timestamps() {
        assert_eq!(parse_timestamp("0").unwrap(), UNIX_EPOCH);
        assert_eq!(
            parse_timestamp("1700000000").unwrap(),
            UNIX_EPOCH + Duration::from_secs(1_700_000_000)
        );
        assert!(parse_timestamp("12.5").is_err());
    }

    #[test]
    fn chmod_values() {
        assert_eq!(parse_chmod("755").unwrap(), 0o755);
        assert_eq!(parse_chmod("0640").unwrap(), 0o640);
        assert!(parse_chmod("rwx").is_err());
        assert!(parse_chmod("8").is_err());
        assert!(parse_chmod("77777").is_err());
    }

    #[test]
    fn checksum_requires_urls() {
        let sum = format!("sha256:{}", "a".repeat(64));

        let mut opts = options(&["web", "https://example.com/x.tgz", "local.txt", "/dst/"]);
        opts.checksum = Some(sum.clone());
        assert!(matches!(opts.validate(), Err(StowageError::ChecksumRequiresUrl { .. })));

        let mut opts = options(&["web", "https://example.com/x.tgz"]);
        opts.checksum = Some(sum);
        assert_eq!(opts.validate().unwrap().checksum.unwrap(), "a".repeat(64));

        assert!(parse_checksum("md5:abc").is_err());
    }

    #[test]
    fn validate_carries_settings() {
        let mut opts = options(&["web", "src", "/dst"]);
        opts.retry = 5;
        opts.retry_delay = "250ms".to_string();
        opts.chmod = Some("600".to_string());
        opts.chown = Some("1000:1000".to_string());
        let op = opts.validate().unwrap();
        assert_eq!(op.retry.attempts, 5);
        assert_eq!(op.retry.delay, Duration::from_millis(250));
        assert_eq!(op.chmod, Some(0o600));
        assert!(op.chown.is_some());
        assert_eq!(op.dest.as_deref(), Some("/dst"));
    }

    #[test]
    fn bad_retry_delay_rejected() {
        let mut opts = options(&["web", "src"]);
        opts.retry_delay = "later".to_string();
        assert!(matches!(opts.validate(), Err(StowageError::InvalidRetryDelay { .. })));
    }
}
