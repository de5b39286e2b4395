//! Error types for Stowage
//!
//! All modules use `StowageResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Stowage operations
pub type StowageResult<T> = Result<T, StowageError>;

/// All errors that can occur in Stowage
#[derive(Error, Debug)]
pub enum StowageError {
    // Argument errors
    #[error("container ID must be specified")]
    MissingContainer,

    #[error("src must be specified")]
    MissingSource,

    #[error("--ignorefile option requires that you specify a context dir using --contextdir")]
    IgnoreFileWithoutContext,

    #[error("parsing timestamp value {value:?}: {reason}")]
    InvalidTimestamp { value: String, reason: String },

    #[error("parsing permissions {value:?}: expected octal mode bits")]
    InvalidChmod { value: String },

    #[error("parsing ownership {value:?}: {reason}")]
    InvalidChown { value: String, reason: String },

    #[error("unable to parse value provided {value:?} as --retry-delay: {reason}")]
    InvalidRetryDelay { value: String, reason: String },

    #[error("--checksum can only be used with HTTP(S) sources, not {source_ref:?}")]
    ChecksumRequiresUrl { source_ref: String },

    #[error("invalid checksum {0:?}: expected sha256:<hex>")]
    InvalidChecksum(String),

    // Resolution errors
    #[error("container {0:?} does not exist")]
    ContainerUnknown(String),

    #[error("image {image:?} not found: {reason}")]
    ImageNotFound { image: String, reason: String },

    #[error("pulling image {image:?}: {reason}")]
    ImagePull { image: String, reason: String },

    #[error("pulling image {image:?} failed after {attempts} attempts: {source}")]
    PullRetriesExhausted {
        image: String,
        attempts: u32,
        #[source]
        source: Box<StowageError>,
    },

    #[error("operation cancelled")]
    Cancelled,

    // Mount errors
    #[error("mounting container {container:?}: {reason}")]
    Mount { container: String, reason: String },

    #[error("unmounting container {container:?}: {reason}")]
    Unmount { container: String, reason: String },

    #[error("container {0:?} is not mounted")]
    NotMounted(String),

    // Copy errors
    #[error("no such file or directory: {0}")]
    SourceNotFound(PathBuf),

    #[error("invalid exclude pattern {pattern:?}: {reason}")]
    ExcludePattern { pattern: String, reason: String },

    #[error("{kind} {id} is not mapped in the container's ID mappings")]
    IdNotMapped { kind: &'static str, id: u32 },

    #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    #[error("downloading {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("downloading {url}: server responded with status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("extracting archive {path}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Commit errors
    #[error("saving container {container:?}: {reason}")]
    Save { container: String, reason: String },

    // Runtime snapshot errors
    #[error("badly formatted {path}: {reason}")]
    Snapshot { path: PathBuf, reason: String },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    // IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command execution error: {command}, stderr: {stderr}")]
    CommandExecution { command: String, stderr: String },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Wrapped with operating context
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<StowageError>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StowageError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a command execution error
    pub fn command_exec(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::CommandExecution {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    /// Wrap this error with the context it occurred in
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Strip context wrappers and return the underlying error
    pub fn root(&self) -> &StowageError {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Check if a failed pull attempt may be retried
    ///
    /// Only transport failures are retried. A reference the registry does
    /// not know will not appear on the next attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self.root(), Self::ImagePull { .. } | Self::Download { .. })
    }

    /// Check if this error reports a missing container
    pub fn is_container_unknown(&self) -> bool {
        matches!(self.root(), Self::ContainerUnknown(_))
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self.root() {
            Self::IgnoreFileWithoutContext => Some("Pass --contextdir <dir> together with --ignorefile"),
            Self::InvalidTimestamp { .. } => Some("Use seconds since the Unix epoch, e.g. --timestamp 0"),
            Self::Mount { .. } => Some("Rootless mounts need a user namespace. Run: podman unshare stowage ..."),
            Self::ContainerUnknown(_) => Some("List working containers with: podman ps -a"),
            _ => None,
        }
    }
}
