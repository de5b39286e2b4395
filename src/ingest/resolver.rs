//! Resolving `--from` references to a readable source container
//!
//! A reference naming an existing working container is used as is.
//! Anything else is treated as an image: it is pulled and a temporary
//! working container is created, which the caller must delete when done.

use crate::builder::Builder;
use crate::error::{StowageError, StowageResult};
use crate::ingest::options::RetryPolicy;
use crate::store::{ImageStore, PullOptions};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A source container and whether it was created for this operation
#[derive(Debug)]
pub struct SourceContainer {
    pub builder: Builder,
    /// Created from a pulled image; delete after use
    pub temporary: bool,
}

/// Open `reference` as a container, falling back to pulling it as an image
pub async fn open_source(
    store: &dyn ImageStore,
    reference: &str,
    options: &PullOptions,
    retry: RetryPolicy,
    cancel: &CancellationToken,
) -> StowageResult<SourceContainer> {
    match store.open_existing(reference).await {
        Ok(builder) => {
            debug!("Using existing container {} as source", builder.container);
            Ok(SourceContainer {
                builder,
                temporary: false,
            })
        }
        Err(e) if e.is_container_unknown() => {
            debug!("No container named {:?}, pulling it as an image", reference);
            let builder = pull_with_retry(store, reference, options, retry, cancel).await?;
            Ok(SourceContainer {
                builder,
                temporary: true,
            })
        }
        Err(e) => Err(e),
    }
}

/// Pull `image`, retrying transport failures
///
/// The delay between attempts is cut short by cancellation, and no new
/// attempt starts once cancelled. Failures that cannot succeed on retry,
/// such as an unknown image, are returned immediately.
pub async fn pull_with_retry(
    store: &dyn ImageStore,
    image: &str,
    options: &PullOptions,
    retry: RetryPolicy,
    cancel: &CancellationToken,
) -> StowageResult<Builder> {
    let attempts = retry.max_attempts();
    let mut attempt = 1;

    loop {
        if cancel.is_cancelled() {
            return Err(StowageError::Cancelled);
        }

        match store.pull(image, options).await {
            Ok(builder) => {
                if attempt > 1 {
                    info!("Pulled {} on attempt {}/{}", image, attempt, attempts);
                }
                return Ok(builder);
            }
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt >= attempts => {
                return Err(StowageError::PullRetriesExhausted {
                    image: image.to_string(),
                    attempts,
                    source: Box::new(e),
                })
            }
            Err(e) => {
                warn!(
                    "Pull of {} failed (attempt {}/{}): {}; retrying in {:?}",
                    image, attempt, attempts, e, retry.delay
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(StowageError::Cancelled),
                    _ = tokio::time::sleep(retry.delay) => {}
                }
                attempt += 1;
            }
        }
    }
}
