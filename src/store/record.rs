//! Builder metadata persistence

use crate::builder::Builder;
use crate::config::ConfigManager;
use crate::error::{StowageError, StowageResult};
use std::path::PathBuf;
use tokio::fs;

/// Directory of `<container-id>.json` builder records
#[derive(Debug, Clone)]
pub struct BuilderRecords {
    dir: PathBuf,
}

impl BuilderRecords {
    /// Records under the default state directory
    pub fn new() -> Self {
        Self::with_dir(ConfigManager::builders_dir())
    }

    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn file_path(&self, container_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", container_id))
    }

    /// Load the record for a container, if one was saved
    pub async fn load(&self, container_id: &str) -> StowageResult<Option<Builder>> {
        let path = self.file_path(container_id);

        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| StowageError::io(format!("reading builder record {}", path.display()), e))?;

        let builder: Builder = serde_json::from_str(&content)?;
        Ok(Some(builder))
    }

    /// Write the record for a builder, replacing any previous one
    pub async fn save(&self, builder: &Builder) -> StowageResult<()> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StowageError::io("creating builders directory", e))?;

        let path = self.file_path(&builder.container_id);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(builder)?;
        fs::write(&tmp, content)
            .await
            .map_err(|e| StowageError::io(format!("writing builder record {}", tmp.display()), e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| StowageError::io(format!("replacing builder record {}", path.display()), e))?;

        Ok(())
    }

    /// Remove the record for a container
    pub async fn delete(&self, container_id: &str) -> StowageResult<()> {
        let path = self.file_path(container_id);
        if path.exists() {
            fs::remove_file(&path)
                .await
                .map_err(|e| StowageError::io(format!("deleting builder record {}", path.display()), e))?;
        }
        Ok(())
    }
}

impl Default for BuilderRecords {
    fn default() -> Self {
        Self::new()
    }
}
