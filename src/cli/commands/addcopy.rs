//! Add and copy commands - ingest content into a working container

use crate::cli::args::AddCopyArgs;
use crate::config::{history_default, Config};
use crate::error::StowageResult;
use crate::ingest::{AddCopyOptions, Ingest, Verb};
use crate::store::PullOptions;
use crate::ui::UiContext;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Execute add or copy
pub async fn execute(
    verb: Verb,
    args: AddCopyArgs,
    parents: bool,
    config: &Config,
    cancel: CancellationToken,
) -> StowageResult<()> {
    let options = build_options(verb, args, parents, config)?;
    let quiet = options.quiet;

    // Argument errors surface here, before the store is touched
    let op = options.validate()?;

    let store = super::open_store(config);
    let mut ingest = Ingest::new(&store, cancel).with_ui(UiContext::detect(quiet));
    let outcome = ingest.run(op).await?;

    if let Some(ref line) = outcome.history {
        debug!("Recorded history: {}", line);
    }
    if !quiet {
        println!("{}", outcome.digest.hex);
    }

    Ok(())
}

/// Merge command-line arguments over config defaults
fn build_options(verb: Verb, args: AddCopyArgs, parents: bool, config: &Config) -> StowageResult<AddCopyOptions> {
    let mut options = AddCopyOptions::new(verb, args.args)?;

    options.from = args.from;
    options.chown = args.chown;
    options.chmod = args.chmod;
    options.checksum = args.checksum;
    options.quiet = args.quiet;
    options.add_history = args.add_history || history_default(config);
    options.context_dir = args.context_dir;
    options.ignore_file = args.ignore_file;
    options.excludes = args.excludes;
    options.retry = args.retry.unwrap_or(config.pull.retry);
    options.retry_delay = args.retry_delay.unwrap_or_else(|| config.pull.retry_delay.clone());
    options.timestamp = args.timestamp;
    options.parents = parents;
    options.link = args.link;
    options.pull = PullOptions {
        tls_verify: args.tls_verify.unwrap_or(config.pull.tls_verify),
        cert_dir: args.cert_dir,
        creds: args.creds,
        authfile: args.authfile,
        signature_policy: args.signature_policy,
        decryption_keys: args.decryption_keys,
        report_progress: !args.quiet,
    };

    Ok(options)
}
