//! ADD/COPY content ingestion
//!
//! [`AddCopyOptions`] is validated into a [`CopyOperation`], which
//! [`Ingest`] runs against an [`crate::store::ImageStore`]: open the
//! target, resolve and mount any `--from` source, copy with the exclusion
//! and ownership policy applied, release resources, and commit the digest
//! to the builder's history.

pub mod archive;
pub mod copier;
pub mod ignore;
pub mod lifecycle;
pub mod options;
pub mod ownership;
pub mod paths;
pub mod policy;
pub mod remote;
pub mod resolver;

pub use copier::CopyStats;
pub use lifecycle::{Ingest, IngestOutcome, Stage};
pub use options::{AddCopyOptions, CopyOperation, RetryPolicy, Verb};
