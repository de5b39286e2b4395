//! Working containers under construction

pub mod digest;
pub mod idmap;

pub use digest::{ContentDigest, ContentDigester, DigestWriter};
pub use idmap::{IdMap, IdMappings, Owner};

use crate::error::{StowageError, StowageResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Shell form recorded for build steps that run no command
pub const NOP_PREFIX: &str = "/bin/sh -c #(nop)";

/// One step of an image's history; never modified once appended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub created: DateTime<Utc>,
    pub created_by: String,
}

/// A working container plus the metadata persisted alongside it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Builder {
    /// Container name as known to the store
    pub container: String,

    /// Stable container ID
    pub container_id: String,

    /// Image the container was created from, if any
    #[serde(default)]
    pub from_image: Option<String>,

    /// Working directory relative destinations resolve against
    #[serde(default = "default_workdir")]
    pub workdir: String,

    #[serde(default)]
    pub id_mappings: IdMappings,

    #[serde(default)]
    pub history: Vec<HistoryEntry>,

    /// Set while the container's filesystem is mounted
    #[serde(skip)]
    pub mount_point: Option<PathBuf>,

    #[serde(skip)]
    pub content_digester: ContentDigester,
}

fn default_workdir() -> String {
    "/".to_string()
}

impl Builder {
    /// Create builder state for a container
    pub fn new(container: impl Into<String>, container_id: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            container_id: container_id.into(),
            from_image: None,
            workdir: default_workdir(),
            id_mappings: IdMappings::default(),
            history: Vec::new(),
            mount_point: None,
            content_digester: ContentDigester::new(),
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.mount_point.is_some()
    }

    /// Root of the mounted filesystem
    pub fn mount_point(&self) -> StowageResult<&Path> {
        self.mount_point
            .as_deref()
            .ok_or_else(|| StowageError::NotMounted(self.container.clone()))
    }

    /// Append a history entry created now
    pub fn add_history(&mut self, created_by: impl Into<String>) {
        self.history.push(HistoryEntry {
            created: Utc::now(),
            created_by: created_by.into(),
        });
    }

    /// Short container ID for display
    pub fn short_id(&self) -> &str {
        &self.container_id[..12.min(self.container_id.len())]
    }
}
