//! Stowage - daemonless ADD/COPY content ingestion
//!
//! Adds local files, URLs and the contents of other images to working
//! containers, tracking a content digest for each operation so it can be
//! recorded in the image history.

pub mod builder;
pub mod cli;
pub mod config;
pub mod error;
pub mod ingest;
#[cfg(target_os = "linux")]
pub mod report;
pub mod store;
pub mod ui;

pub use error::{StowageError, StowageResult};
