//! In-memory store that records every call, for lifecycle tests

use crate::builder::{Builder, IdMappings};
use crate::error::{StowageError, StowageResult};
use crate::store::{ImageStore, PullOptions};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Open(String),
    Pull(String),
    Mount(String),
    Unmount(String),
    Delete(String),
    Save(String),
}

#[derive(Default)]
struct State {
    containers: HashMap<String, (Builder, PathBuf)>,
    images: HashMap<String, PathBuf>,
    transient_pull_failures: u32,
    pull_times: Vec<Instant>,
    fail_mount: HashSet<String>,
    fail_unmount: HashSet<String>,
    fail_save: HashSet<String>,
    events: Vec<Event>,
    saved: HashMap<String, Builder>,
    next_id: u32,
}

/// Store double whose containers live in plain directories
#[derive(Default)]
pub struct RecordingStore {
    state: Mutex<State>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an existing working container rooted at `root`
    pub fn add_container(&self, name: &str, root: &Path, id_mappings: IdMappings) {
        let mut builder = Builder::new(name, format!("{}-id", name));
        builder.id_mappings = id_mappings;
        self.state
            .lock()
            .unwrap()
            .containers
            .insert(name.to_string(), (builder, root.to_path_buf()));
    }

    /// Register a pullable image whose filesystem is `root`
    pub fn add_image(&self, image: &str, root: &Path) {
        self.state
            .lock()
            .unwrap()
            .images
            .insert(image.to_string(), root.to_path_buf());
    }

    /// Make the next `n` pull attempts fail with a transport error
    pub fn fail_pulls(&self, n: u32) {
        self.state.lock().unwrap().transient_pull_failures = n;
    }

    pub fn fail_mount(&self, name: &str) {
        self.state.lock().unwrap().fail_mount.insert(name.to_string());
    }

    pub fn fail_unmount(&self, name: &str) {
        self.state.lock().unwrap().fail_unmount.insert(name.to_string());
    }

    pub fn fail_save(&self, name: &str) {
        self.state.lock().unwrap().fail_save.insert(name.to_string());
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn pull_times(&self) -> Vec<Instant> {
        self.state.lock().unwrap().pull_times.clone()
    }

    /// Last saved copy of a container's builder
    pub fn saved(&self, name: &str) -> Option<Builder> {
        self.state.lock().unwrap().saved.get(name).cloned()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state.lock().unwrap().containers.contains_key(name)
    }
}

#[async_trait]
impl ImageStore for RecordingStore {
    async fn open_existing(&self, name: &str) -> StowageResult<Builder> {
        let mut state = self.state.lock().unwrap();
        state.events.push(Event::Open(name.to_string()));
        match state.containers.get(name) {
            Some((builder, _)) => Ok(state.saved.get(name).cloned().unwrap_or_else(|| builder.clone())),
            None => Err(StowageError::ContainerUnknown(name.to_string())),
        }
    }

    async fn pull(&self, image: &str, _options: &PullOptions) -> StowageResult<Builder> {
        let mut state = self.state.lock().unwrap();
        state.events.push(Event::Pull(image.to_string()));
        state.pull_times.push(Instant::now());

        if state.transient_pull_failures > 0 {
            state.transient_pull_failures -= 1;
            return Err(StowageError::ImagePull {
                image: image.to_string(),
                reason: "connection reset by peer".to_string(),
            });
        }

        let root = state
            .images
            .get(image)
            .cloned()
            .ok_or_else(|| StowageError::ImageNotFound {
                image: image.to_string(),
                reason: "manifest unknown".to_string(),
            })?;

        state.next_id += 1;
        let name = format!("{}-working-container-{}", image, state.next_id);
        let mut builder = Builder::new(name.clone(), format!("{}-id", name));
        builder.from_image = Some(image.to_string());
        state.containers.insert(name, (builder.clone(), root));
        Ok(builder)
    }

    async fn mount(&self, builder: &Builder) -> StowageResult<PathBuf> {
        let mut state = self.state.lock().unwrap();
        if state.fail_mount.contains(&builder.container) {
            return Err(StowageError::Mount {
                container: builder.container.clone(),
                reason: "injected".to_string(),
            });
        }
        state.events.push(Event::Mount(builder.container.clone()));
        state
            .containers
            .get(&builder.container)
            .map(|(_, root)| root.clone())
            .ok_or_else(|| StowageError::ContainerUnknown(builder.container.clone()))
    }

    async fn unmount(&self, builder: &Builder) -> StowageResult<()> {
        let mut state = self.state.lock().unwrap();
        state.events.push(Event::Unmount(builder.container.clone()));
        if state.fail_unmount.contains(&builder.container) {
            return Err(StowageError::Unmount {
                container: builder.container.clone(),
                reason: "injected".to_string(),
            });
        }
        Ok(())
    }

    async fn delete(&self, builder: &Builder) -> StowageResult<()> {
        let mut state = self.state.lock().unwrap();
        state.events.push(Event::Delete(builder.container.clone()));
        state.containers.remove(&builder.container);
        state.saved.remove(&builder.container);
        Ok(())
    }

    async fn save(&self, builder: &Builder) -> StowageResult<()> {
        let mut state = self.state.lock().unwrap();
        state.events.push(Event::Save(builder.container.clone()));
        if state.fail_save.contains(&builder.container) {
            return Err(StowageError::Save {
                container: builder.container.clone(),
                reason: "injected".to_string(),
            });
        }
        state.saved.insert(builder.container.clone(), builder.clone());
        Ok(())
    }
}
