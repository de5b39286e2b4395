//! Image and container store abstraction
//!
//! The store owns image pulls, container creation, filesystem mounts and
//! metadata persistence. Ingestion only talks to it through [`ImageStore`].

mod podman;
pub mod record;
#[cfg(test)]
pub(crate) mod testing;

pub use podman::PodmanStore;
pub use record::BuilderRecords;

use crate::builder::Builder;
use crate::error::StowageResult;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Registry and transport settings for one pull attempt
#[derive(Debug, Clone)]
pub struct PullOptions {
    /// Require HTTPS and verify certificates
    pub tls_verify: bool,
    /// Directory of certificates for registry access
    pub cert_dir: Option<PathBuf>,
    /// `username[:password]` for registry access
    pub creds: Option<String>,
    /// Registry authentication file
    pub authfile: Option<PathBuf>,
    /// Signature policy file
    pub signature_policy: Option<PathBuf>,
    /// Keys needed to decrypt an encrypted image
    pub decryption_keys: Vec<String>,
    /// Forward pull progress to stderr
    pub report_progress: bool,
}

impl Default for PullOptions {
    fn default() -> Self {
        Self {
            tls_verify: true,
            cert_dir: None,
            creds: None,
            authfile: None,
            signature_policy: None,
            decryption_keys: vec![],
            report_progress: false,
        }
    }
}

/// Abstract image/container store
///
/// Implementations are expected to serialize access per container name.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Open an existing working container by name or ID
    ///
    /// Fails with [`crate::StowageError::ContainerUnknown`] when no such
    /// container exists; callers rely on that classification.
    async fn open_existing(&self, name: &str) -> StowageResult<Builder>;

    /// Make one attempt to pull `image` and create a working container from it
    async fn pull(&self, image: &str, options: &PullOptions) -> StowageResult<Builder>;

    /// Mount the container's root filesystem and return its host path
    async fn mount(&self, builder: &Builder) -> StowageResult<PathBuf>;

    /// Unmount the container's root filesystem
    async fn unmount(&self, builder: &Builder) -> StowageResult<()>;

    /// Remove the container and its metadata
    async fn delete(&self, builder: &Builder) -> StowageResult<()>;

    /// Persist the builder's metadata
    async fn save(&self, builder: &Builder) -> StowageResult<()>;
}

/// Stream stdout+stderr from a child process, calling `on_output` for each line.
///
/// Returns all collected output lines for error reporting.
pub(crate) async fn stream_child_output(
    child: &mut tokio::process::Child,
    on_output: &(dyn Fn(String) + Send + Sync),
) -> Vec<String> {
    let mut all_output = Vec::new();
    let (Some(stderr), Some(stdout)) = (child.stderr.take(), child.stdout.take()) else {
        return all_output;
    };

    let mut stderr_reader = BufReader::new(stderr).lines();
    let mut stdout_reader = BufReader::new(stdout).lines();

    let mut stderr_done = false;
    let mut stdout_done = false;

    while !stderr_done || !stdout_done {
        tokio::select! {
            line = stderr_reader.next_line(), if !stderr_done => {
                match line {
                    Ok(Some(line)) => {
                        on_output(line.clone());
                        all_output.push(line);
                    }
                    _ => stderr_done = true,
                }
            }
            line = stdout_reader.next_line(), if !stdout_done => {
                match line {
                    Ok(Some(line)) => {
                        on_output(line.clone());
                        all_output.push(line);
                    }
                    _ => stdout_done = true,
                }
            }
        }
    }

    all_output
}
