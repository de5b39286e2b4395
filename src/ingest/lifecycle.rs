//! One ADD/COPY run from target open to commit
//!
//! Every resource acquired along the way (a mounted filesystem, a temporary
//! source container) pushes a cleanup obligation. Obligations are released
//! in reverse order, so a source is unmounted before it is deleted and the
//! target is unmounted before anything about the source is touched. When
//! the run fails, cleanup failures are only logged and the first error is
//! returned; when the run otherwise succeeded, a cleanup failure is the
//! result.

use crate::builder::{Builder, ContentDigest, NOP_PREFIX};
use crate::error::{StowageError, StowageResult};
use crate::ingest::copier::{CopyJob, CopyStats};
use crate::ingest::options::CopyOperation;
use crate::ingest::ownership::OwnerPolicy;
use crate::ingest::paths::resolve_in_root;
use crate::ingest::policy::{effective_excludes, ExcludeMatcher};
use crate::ingest::remote::RemoteSettings;
use crate::ingest::resolver::{open_source, SourceContainer};
use crate::store::ImageStore;
use crate::ui::{TaskSpinner, UiContext};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Progress of a run through its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Unbound,
    TargetOpen,
    SourceReady,
    Ingested,
    SourceCleaned,
    Committed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Unbound => "unbound",
            Stage::TargetOpen => "target open",
            Stage::SourceReady => "source ready",
            Stage::Ingested => "ingested",
            Stage::SourceCleaned => "source cleaned",
            Stage::Committed => "committed",
        };
        f.write_str(name)
    }
}

/// Result of a committed run
#[derive(Debug)]
pub struct IngestOutcome {
    /// Digest of everything ingested by this run
    pub digest: ContentDigest,
    /// History line appended, when history was requested
    pub history: Option<String>,
    pub stats: CopyStats,
    /// Target builder as committed
    pub builder: Builder,
}

#[derive(Debug)]
enum Obligation {
    /// Unmount, then persist the builder's metadata if `save` is set
    Unmount { builder: Builder, save: bool },
    /// Remove a temporary container
    Delete(Builder),
}

impl Obligation {
    async fn release(self, store: &dyn ImageStore) -> StowageResult<()> {
        match self {
            Obligation::Unmount { builder, save } => {
                let unmounted = store
                    .unmount(&builder)
                    .await
                    .map_err(|e| e.context(format!("unmounting {:?}", builder.container)));
                if !save {
                    return unmounted;
                }
                let saved = store
                    .save(&builder)
                    .await
                    .map_err(|e| e.context(format!("saving {:?}", builder.container)));
                match (unmounted, saved) {
                    (Err(e), Err(also)) => {
                        warn!("Cleanup error: {}", also);
                        Err(e)
                    }
                    (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
                    (Ok(()), Ok(())) => Ok(()),
                }
            }
            Obligation::Delete(builder) => {
                debug!("Removing temporary container {}", builder.container);
                store
                    .delete(&builder)
                    .await
                    .map_err(|e| e.context(format!("removing temporary container {:?}", builder.container)))
            }
        }
    }
}

/// Obligations still owed, released last-in first-out
#[derive(Debug, Default)]
struct CleanupStack {
    obligations: Vec<Obligation>,
}

impl CleanupStack {
    fn push(&mut self, obligation: Obligation) {
        self.obligations.push(obligation);
    }

    /// Release everything, attempting each obligation even after a failure
    async fn release_all(&mut self, store: &dyn ImageStore) -> Vec<StowageError> {
        let mut errors = Vec::new();
        while let Some(obligation) = self.obligations.pop() {
            if let Err(e) = obligation.release(store).await {
                errors.push(e);
            }
        }
        errors
    }
}

/// Drives one ingestion against a store
pub struct Ingest<'a> {
    store: &'a dyn ImageStore,
    cancel: CancellationToken,
    ui: UiContext,
    cwd: Option<PathBuf>,
    stage: Stage,
    cleanup: CleanupStack,
}

impl<'a> Ingest<'a> {
    pub fn new(store: &'a dyn ImageStore, cancel: CancellationToken) -> Self {
        Self {
            store,
            cancel,
            ui: UiContext::non_interactive(),
            cwd: None,
            stage: Stage::Unbound,
            cleanup: CleanupStack::default(),
        }
    }

    /// Show spinners while waiting on the store
    pub fn with_ui(mut self, ui: UiContext) -> Self {
        self.ui = ui;
        self
    }

    /// Resolve relative local sources against `cwd` instead of the process directory
    pub fn with_cwd(mut self, cwd: PathBuf) -> Self {
        self.cwd = Some(cwd);
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn advance(&mut self, stage: Stage) {
        debug!("Ingest stage: {} -> {}", self.stage, stage);
        self.stage = stage;
    }

    /// Run the operation, releasing every acquired resource on any outcome
    pub async fn run(&mut self, op: CopyOperation) -> StowageResult<IngestOutcome> {
        match self.execute(op).await {
            Ok(outcome) => Ok(outcome),
            Err(primary) => {
                for e in self.cleanup.release_all(self.store).await {
                    warn!("Cleanup after failure at stage {}: {}", self.stage, e);
                }
                Err(primary)
            }
        }
    }

    async fn execute(&mut self, op: CopyOperation) -> StowageResult<IngestOutcome> {
        let cwd = match self.cwd.clone() {
            Some(cwd) => cwd,
            None => std::env::current_dir().map_err(|e| StowageError::io("getting current directory", e))?,
        };

        // Without a source container the exclusion list is known up front,
        // so a bad pattern or ignore file fails before anything is mounted
        let local_excludes = match op.from {
            None => Some(build_excludes(op.context_dir.as_deref(), &op)?),
            Some(_) => None,
        };

        let mut target = self
            .store
            .open_existing(&op.container)
            .await
            .map_err(|e| e.context(format!("reading build container {:?}", op.container)))?;
        self.advance(Stage::TargetOpen);

        let source = match op.from {
            Some(ref reference) => Some(self.acquire_source(reference, &op).await?),
            None => None,
        };
        let source_root = match source {
            Some(ref source) => Some(source.builder.mount_point()?.to_path_buf()),
            None => None,
        };
        self.advance(Stage::SourceReady);

        target.content_digester.restart();
        let root = self
            .store
            .mount(&target)
            .await
            .map_err(|e| e.context(format!("mounting build container {:?}", target.container)))?;
        target.mount_point = Some(root.clone());
        self.cleanup.push(Obligation::Unmount {
            builder: target.clone(),
            save: false,
        });

        let excludes = match local_excludes {
            Some(excludes) => excludes,
            None => {
                let context = match (&source_root, &op.context_dir) {
                    (Some(mount), Some(ctx)) => Some(resolve_in_root(mount, &Path::new("/").join(ctx))?),
                    _ => None,
                };
                build_excludes(context.as_deref(), &op)?
            }
        };

        let chown = match op.chown {
            Some(ref spec) => Some(spec.resolve(&root)?),
            None => None,
        };
        let owner = OwnerPolicy::select(chown, source.as_ref().map(|s| &s.builder.id_mappings));
        if op.link {
            debug!("Independent layer requested; content is written to the container's own layer");
        }

        let job = CopyJob {
            verb: op.verb,
            sources: op.sources.clone(),
            dest: op.dest.clone(),
            root,
            workdir: target.workdir.clone(),
            target_maps: target.id_mappings.clone(),
            from_root: source_root,
            context_dir: op.context_dir.clone(),
            cwd,
            excludes,
            owner,
            chmod: op.chmod,
            timestamp: op.timestamp,
            parents: op.parents,
            checksum: op.checksum.clone(),
            remote: RemoteSettings {
                tls_verify: op.pull.tls_verify,
                cert_dir: op.pull.cert_dir.clone(),
            },
            retry: op.retry,
            cancel: self.cancel.clone(),
        };

        let mut digester = std::mem::take(&mut target.content_digester);
        let (digester, copied) = tokio::task::spawn_blocking(move || {
            let result = job.run(&mut digester);
            (digester, result)
        })
        .await
        .map_err(|e| StowageError::Internal(format!("copy task failed: {}", e)))?;
        target.content_digester = digester;

        let context = match op.from {
            Some(ref from) => format!("{} from {:?} into {:?}", op.verb, from, op.container),
            None => format!("{} into {:?}", op.verb, op.container),
        };
        let stats = copied.map_err(|e| e.context(context))?;
        self.advance(Stage::Ingested);
        info!(
            "Ingested {} files, {} directories, {} symlinks ({} bytes, {} skipped)",
            stats.files, stats.dirs, stats.symlinks, stats.bytes, stats.skipped
        );

        // Target unmount, then source unmount/save, then temporary delete
        let mut errors = self.cleanup.release_all(self.store).await.into_iter();
        if let Some(first) = errors.next() {
            for e in errors {
                warn!("Cleanup: {}", e);
            }
            return Err(first);
        }
        target.mount_point = None;
        self.advance(Stage::SourceCleaned);

        let digest = target.content_digester.digest();
        let history = op.add_history.then(|| {
            let line = format!("{} {} {}{}", NOP_PREFIX, op.verb, digest.type_prefix(), digest.hex);
            target.add_history(line.clone());
            line
        });

        self.store
            .save(&target)
            .await
            .map_err(|e| e.context(format!("saving build container {:?}", target.container)))?;
        self.advance(Stage::Committed);

        Ok(IngestOutcome {
            digest,
            history,
            stats,
            builder: target,
        })
    }

    /// Open or pull the `--from` source and mount it
    async fn acquire_source(&mut self, reference: &str, op: &CopyOperation) -> StowageResult<SourceContainer> {
        let spinner = TaskSpinner::new(&self.ui);
        spinner.start(format!("Resolving source {}", reference));
        let opened = open_source(self.store, reference, &op.pull, op.retry, &self.cancel).await;
        spinner.clear();

        let mut source = opened.map_err(|e| e.context(format!("reading source {:?}", reference)))?;
        if source.temporary {
            self.cleanup.push(Obligation::Delete(source.builder.clone()));
        }

        let mount = self
            .store
            .mount(&source.builder)
            .await
            .map_err(|e| e.context(format!("mounting source {:?}", source.builder.container)))?;
        source.builder.mount_point = Some(mount);
        self.cleanup.push(Obligation::Unmount {
            builder: source.builder.clone(),
            save: !source.temporary,
        });
        Ok(source)
    }
}

fn build_excludes(context: Option<&Path>, op: &CopyOperation) -> StowageResult<ExcludeMatcher> {
    let (patterns, used) = effective_excludes(context, op.ignore_file.as_deref(), &op.excludes)?;
    if let Some(path) = used {
        debug!("Read {} exclude patterns from {}", patterns.len(), path.display());
    }
    ExcludeMatcher::new(&patterns)
}
