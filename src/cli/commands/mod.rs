//! CLI command implementations

pub mod addcopy;
pub mod history;

pub use addcopy::execute as add_copy;
pub use history::execute as history;

use crate::config::{Config, ConfigManager};
use crate::store::{BuilderRecords, PodmanStore};

/// Store described by the `[store]` config section
pub(crate) fn open_store(config: &Config) -> PodmanStore {
    let dir = config
        .store
        .state_dir
        .as_ref()
        .map(|dir| dir.join("builders"))
        .unwrap_or_else(ConfigManager::builders_dir);
    PodmanStore::with_binary(config.store.podman.clone(), BuilderRecords::with_dir(dir))
}
