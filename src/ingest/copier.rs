//! Copying sources into a mounted target filesystem
//!
//! Every entry written to the target is also described to the builder's
//! content digester as a normalized tar stream: one section per source,
//! headers carrying the final container owner, mode and mtime, followed by
//! the file bytes. The same bytes that land on disk are hashed, so copying
//! and digesting happen in one pass.

use crate::builder::{ContentDigester, DigestWriter, IdMappings, Owner};
use crate::error::{StowageError, StowageResult};
use crate::ingest::archive;
use crate::ingest::options::{is_url, RetryPolicy, Verb};
use crate::ingest::ownership::OwnerPolicy;
use crate::ingest::paths::{clean, entry_in_root, resolve_in_root};
use crate::ingest::policy::ExcludeMatcher;
use crate::ingest::remote::{self, RemoteSettings};
use std::fs::{self, File, FileTimes, Metadata, Permissions};
use std::io::{self, Read, Write};
use std::os::unix::fs::{lchown, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tar::EntryType;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Mode for directories created to hold the destination
const DEFAULT_DIR_MODE: u32 = 0o755;

/// Mode for downloaded files without `--chmod`
const DOWNLOAD_MODE: u32 = 0o600;

/// Counts of what one copy wrote
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub files: u64,
    pub dirs: u64,
    pub symlinks: u64,
    pub bytes: u64,
    /// Excluded or unsupported entries
    pub skipped: u64,
}

impl CopyStats {
    fn add(&mut self, other: CopyStats) {
        self.files += other.files;
        self.dirs += other.dirs;
        self.symlinks += other.symlinks;
        self.bytes += other.bytes;
        self.skipped += other.skipped;
    }
}

/// Everything a copy needs, owned so it can run on a blocking thread
#[derive(Debug)]
pub struct CopyJob {
    pub verb: Verb,
    pub sources: Vec<String>,
    pub dest: Option<String>,
    /// Mount point of the target container
    pub root: PathBuf,
    /// Target working directory, for empty and relative destinations
    pub workdir: String,
    pub target_maps: IdMappings,
    /// Mount point of the `--from` container, when sources come from one
    pub from_root: Option<PathBuf>,
    /// Context directory; a container path when `from_root` is set
    pub context_dir: Option<PathBuf>,
    /// Where relative sources resolve without a context directory
    pub cwd: PathBuf,
    pub excludes: ExcludeMatcher,
    pub owner: OwnerPolicy,
    pub chmod: Option<u32>,
    pub timestamp: Option<SystemTime>,
    pub parents: bool,
    pub checksum: Option<String>,
    pub remote: RemoteSettings,
    pub retry: RetryPolicy,
    pub cancel: CancellationToken,
}

/// A source after URL detection and glob expansion
#[derive(Debug, Clone, PartialEq, Eq)]
enum SourceItem {
    Remote(String),
    Local {
        path: PathBuf,
        /// Path relative to the source base, for `--parents`
        relative: PathBuf,
    },
}

/// Owner, permission bits and mtime of an entry before overrides
#[derive(Debug, Clone, Copy)]
pub(crate) struct EntryMeta {
    /// Container-namespace owner
    pub owner: Owner,
    pub mode: u32,
    pub mtime: SystemTime,
}

impl CopyJob {
    /// Copy every source into the target, feeding `digester`
    pub fn run(self, digester: &mut ContentDigester) -> StowageResult<CopyStats> {
        let items = self.expand_sources()?;
        let dest = self.destination();
        let dest_is_dir = self.dest_is_dir(&items, &dest)?;
        debug!(
            "Copying {} source(s) to {}{}",
            items.len(),
            dest.display(),
            if dest_is_dir { " (directory)" } else { "" }
        );

        let dir_owner = self.target_maps.to_host(self.owner.directory_owner())?;
        if dest_is_dir {
            make_dirs(&self.root, &dest, dir_owner)?;
        } else if let Some(parent) = dest.parent() {
            make_dirs(&self.root, parent, dir_owner)?;
        }

        let mut stats = CopyStats::default();
        for item in &items {
            if self.cancel.is_cancelled() {
                return Err(StowageError::Cancelled);
            }
            let copied = match item {
                SourceItem::Remote(url) => self.copy_remote(url, &dest, dest_is_dir, digester)?,
                SourceItem::Local { path, relative } => {
                    self.copy_local(path, relative, &dest, dest_is_dir, dir_owner, digester)?
                }
            };
            stats.add(copied);
        }
        Ok(stats)
    }

    /// Destination as an absolute container path
    fn destination(&self) -> PathBuf {
        let workdir = Path::new("/").join(&self.workdir);
        match self.dest.as_deref() {
            None | Some("") => clean(&workdir),
            Some(dest) => clean(&workdir.join(dest)),
        }
    }

    fn dest_is_dir(&self, items: &[SourceItem], dest: &Path) -> StowageResult<bool> {
        let raw = self.dest.as_deref().unwrap_or("");
        if raw.is_empty() || raw.ends_with('/') || items.len() > 1 || self.parents {
            return Ok(true);
        }
        if resolve_in_root(&self.root, dest)?.is_dir() {
            return Ok(true);
        }
        match items.first() {
            Some(SourceItem::Local { path, .. }) => {
                if path.is_dir() {
                    return Ok(true);
                }
                Ok(self.verb.extracts_local_archives() && archive::detect(path)?.is_some())
            }
            _ => Ok(false),
        }
    }

    /// Host directory that relative sources and `--parents` paths hang off
    fn source_base(&self) -> StowageResult<PathBuf> {
        match (&self.from_root, &self.context_dir) {
            (Some(mount), Some(ctx)) => resolve_in_root(mount, &Path::new("/").join(ctx)),
            (Some(mount), None) => Ok(mount.clone()),
            (None, Some(ctx)) => Ok(ctx.clone()),
            (None, None) => Ok(self.cwd.clone()),
        }
    }

    /// Directory exclusion patterns are relative to, if not per-source
    fn exclusion_base(&self) -> StowageResult<Option<PathBuf>> {
        if self.from_root.is_some() || self.context_dir.is_some() {
            self.source_base().map(Some)
        } else {
            Ok(None)
        }
    }

    fn expand_sources(&self) -> StowageResult<Vec<SourceItem>> {
        let base = self.source_base()?;
        let mut items = Vec::new();

        for raw in &self.sources {
            if is_url(raw) {
                items.push(SourceItem::Remote(raw.clone()));
                continue;
            }

            let located = match self.from_root {
                Some(ref mount) => resolve_in_root(mount, &base_container_path(&self.context_dir, raw))?,
                None if Path::new(raw).is_absolute() => PathBuf::from(raw),
                None => base.join(raw),
            };

            let matches = if has_glob_meta(raw) {
                expand_glob(&located)?
            } else if fs::symlink_metadata(&located).is_ok() {
                vec![located]
            } else {
                vec![]
            };
            if matches.is_empty() {
                return Err(StowageError::SourceNotFound(PathBuf::from(raw)));
            }

            for path in matches {
                let relative = match path.strip_prefix(&base) {
                    Ok(rel) => rel.to_path_buf(),
                    Err(_) => path.strip_prefix("/").unwrap_or(&path).to_path_buf(),
                };
                items.push(SourceItem::Local { path, relative });
            }
        }
        Ok(items)
    }

    fn copy_remote(
        &self,
        url: &str,
        dest: &Path,
        dest_is_dir: bool,
        digester: &mut ContentDigester,
    ) -> StowageResult<CopyStats> {
        let download = remote::fetch(url, &self.remote, self.checksum.as_deref(), self.retry, &self.cancel)?;
        let target = if dest_is_dir {
            dest.join(&download.name)
        } else {
            dest.to_path_buf()
        };

        let mut data = File::open(download.file.path())
            .map_err(|e| StowageError::io(format!("reading download of {}", url), e))?;
        let size = data
            .metadata()
            .map_err(|e| StowageError::io(format!("reading download of {}", url), e))?
            .len();
        let meta = EntryMeta {
            owner: self.owner.directory_owner(),
            mode: DOWNLOAD_MODE,
            mtime: download.modified.unwrap_or_else(SystemTime::now),
        };

        digester.start("file");
        let mut sink = EntrySink::new(&self.root, &self.target_maps, self.chmod, self.timestamp, digester);
        sink.write_file(Path::new(&download.name), &target, &mut data, size, meta)?;
        sink.finish()
    }

    fn copy_local(
        &self,
        path: &Path,
        relative: &Path,
        dest: &Path,
        dest_is_dir: bool,
        dir_owner: Owner,
        digester: &mut ContentDigester,
    ) -> StowageResult<CopyStats> {
        let meta = fs::metadata(path).map_err(|e| StowageError::io(format!("reading {}", path.display()), e))?;
        // Sources outside the base are matched as if they were passed on their own
        let exclusion_base = self.exclusion_base()?.filter(|base| path.starts_with(base));
        let name = file_name(path);

        // A source picked up by a glob can itself be excluded
        let own_match = match exclusion_base {
            Some(ref base) => path.strip_prefix(base).map(Path::to_path_buf).unwrap_or_else(|_| name.clone()),
            None if meta.is_dir() => PathBuf::new(),
            None => name.clone(),
        };
        if self.excludes.is_excluded(&own_match) {
            debug!("Skipping excluded source {}", path.display());
            return Ok(CopyStats {
                skipped: 1,
                ..Default::default()
            });
        }

        let target_base = if self.parents {
            dest.join(relative)
        } else if dest_is_dir && !meta.is_dir() {
            dest.join(&name)
        } else {
            dest.to_path_buf()
        };

        if meta.is_dir() {
            digester.start("dir");
            make_dirs(&self.root, &target_base, dir_owner)?;
            let base = exclusion_base.unwrap_or_else(|| path.to_path_buf());
            return self.copy_tree(path, &base, &target_base, dir_owner, digester);
        }

        if self.parents {
            if let Some(parent) = target_base.parent() {
                make_dirs(&self.root, parent, dir_owner)?;
            }
        }

        if self.verb.extracts_local_archives() {
            if let Some(compression) = archive::detect(path)? {
                debug!("Extracting {} ({:?}) into {}", path.display(), compression, dest.display());
                digester.start("file");
                let extract_to = if self.parents { target_base.parent().unwrap_or(dest) } else { dest };
                let mut sink = EntrySink::new(&self.root, &self.target_maps, self.chmod, self.timestamp, digester);
                archive::extract(path, compression, extract_to, &self.owner, &mut sink, &self.cancel)?;
                return sink.finish();
            }
        }

        digester.start("file");
        let mut sink = EntrySink::new(&self.root, &self.target_maps, self.chmod, self.timestamp, digester);
        let mut data = File::open(path).map_err(|e| StowageError::io(format!("reading {}", path.display()), e))?;
        let entry = self.entry_meta(&meta)?;
        sink.write_file(&name, &target_base, &mut data, meta.len(), entry)?;
        sink.finish()
    }

    /// Copy the contents of directory `source` to `target`
    fn copy_tree(
        &self,
        source: &Path,
        exclusion_base: &Path,
        target: &Path,
        dir_owner: Owner,
        digester: &mut ContentDigester,
    ) -> StowageResult<CopyStats> {
        let mut sink = EntrySink::new(&self.root, &self.target_maps, self.chmod, self.timestamp, digester);
        let mut walker = WalkDir::new(source)
            .follow_links(false)
            .sort_by_file_name()
            .min_depth(1)
            .into_iter();

        while let Some(entry) = walker.next() {
            if self.cancel.is_cancelled() {
                return Err(StowageError::Cancelled);
            }
            let entry = entry.map_err(|e| StowageError::io(format!("walking {}", source.display()), e.into()))?;
            let file_type = entry.file_type();

            let match_path = entry.path().strip_prefix(exclusion_base).unwrap_or(entry.path());
            if self.excludes.is_excluded(match_path) {
                if file_type.is_dir() && !self.excludes.has_negations() {
                    walker.skip_current_dir();
                }
                sink.stats.skipped += 1;
                continue;
            }

            let name = entry.path().strip_prefix(source).unwrap_or(entry.path());
            let dest = target.join(name);
            if let Some(parent) = dest.parent() {
                // A re-included entry may sit below an excluded directory
                if self.excludes.has_negations() {
                    make_dirs(&self.root, parent, dir_owner)?;
                }
            }

            let meta = entry
                .metadata()
                .map_err(|e| StowageError::io(format!("reading {}", entry.path().display()), e.into()))?;
            let entry_meta = self.entry_meta(&meta)?;

            if file_type.is_dir() {
                sink.create_dir(name, &dest, entry_meta)?;
            } else if file_type.is_file() {
                let mut data = File::open(entry.path())
                    .map_err(|e| StowageError::io(format!("reading {}", entry.path().display()), e))?;
                sink.write_file(name, &dest, &mut data, meta.len(), entry_meta)?;
            } else if file_type.is_symlink() {
                let link = fs::read_link(entry.path())
                    .map_err(|e| StowageError::io(format!("reading link {}", entry.path().display()), e))?;
                sink.symlink(name, &dest, &link, entry_meta)?;
            } else {
                warn!("Skipping special file {}", entry.path().display());
                sink.stats.skipped += 1;
            }
        }

        sink.finish()
    }

    fn entry_meta(&self, meta: &Metadata) -> StowageResult<EntryMeta> {
        let source_owner = Owner {
            uid: meta.uid(),
            gid: meta.gid(),
        };
        Ok(EntryMeta {
            owner: self.owner.container_owner(source_owner)?,
            mode: meta.mode() & 0o7777,
            mtime: meta.modified().unwrap_or(UNIX_EPOCH),
        })
    }
}

/// Container path of a `--from` source under the context directory
fn base_container_path(context_dir: &Option<PathBuf>, raw: &str) -> PathBuf {
    let base = match context_dir {
        Some(ctx) => Path::new("/").join(ctx),
        None => PathBuf::from("/"),
    };
    base.join(raw)
}

fn has_glob_meta(raw: &str) -> bool {
    raw.contains(['*', '?', '['])
}

fn expand_glob(pattern: &Path) -> StowageResult<Vec<PathBuf>> {
    let text = pattern.to_string_lossy();
    let paths = glob::glob(&text).map_err(|_| StowageError::SourceNotFound(pattern.to_path_buf()))?;
    let mut matches: Vec<PathBuf> = paths.filter_map(Result::ok).collect();
    matches.sort();
    Ok(matches)
}

fn file_name(path: &Path) -> PathBuf {
    path.file_name().map(PathBuf::from).unwrap_or_default()
}

/// Create missing directories along `path` inside `root`
fn make_dirs(root: &Path, path: &Path, host_owner: Owner) -> StowageResult<()> {
    let mut current = PathBuf::from("/");
    for part in clean(path).components().skip(1) {
        current.push(part);
        let host = resolve_in_root(root, &current)?;
        match fs::metadata(&host) {
            Ok(meta) if meta.is_dir() => continue,
            Ok(_) => {
                return Err(StowageError::io(
                    format!("creating {}", current.display()),
                    io::Error::other("exists and is not a directory"),
                ))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                fs::create_dir(&host).map_err(|e| StowageError::io(format!("creating {}", current.display()), e))?;
                set_owner(&host, host_owner)?;
                fs::set_permissions(&host, Permissions::from_mode(DEFAULT_DIR_MODE))
                    .map_err(|e| StowageError::io(format!("setting mode of {}", current.display()), e))?;
            }
            Err(e) => return Err(StowageError::io(format!("reading {}", current.display()), e)),
        }
    }
    Ok(())
}

/// lchown `path` unless it already has the wanted owner
fn set_owner(path: &Path, owner: Owner) -> StowageResult<()> {
    let current = fs::symlink_metadata(path).map_err(|e| StowageError::io(format!("reading {}", path.display()), e))?;
    if current.uid() == owner.uid && current.gid() == owner.gid {
        return Ok(());
    }
    lchown(path, Some(owner.uid), Some(owner.gid))
        .map_err(|e| StowageError::io(format!("changing owner of {}", path.display()), e))
}

fn unix_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Reader that copies everything it reads into a second writer
struct TeeReader<'a, R: ?Sized, W> {
    inner: &'a mut R,
    copy: W,
    written: u64,
}

impl<R: Read + ?Sized, W: Write> Read for TeeReader<'_, R, W> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.copy.write_all(&buf[..n])?;
        self.written += n as u64;
        Ok(n)
    }
}

/// Writes entries into the target and describes them to the digester
pub(crate) struct EntrySink<'a> {
    root: &'a Path,
    target_maps: &'a IdMappings,
    chmod: Option<u32>,
    timestamp: Option<SystemTime>,
    digest: tar::Builder<DigestWriter<'a>>,
    /// Directory mode and mtime, applied once their contents are written
    dir_fixups: Vec<(PathBuf, u32, SystemTime)>,
    pub(crate) stats: CopyStats,
}

impl<'a> EntrySink<'a> {
    pub(crate) fn new(
        root: &'a Path,
        target_maps: &'a IdMappings,
        chmod: Option<u32>,
        timestamp: Option<SystemTime>,
        digester: &'a mut ContentDigester,
    ) -> Self {
        Self {
            root,
            target_maps,
            chmod,
            timestamp,
            digest: tar::Builder::new(digester.writer()),
            dir_fixups: Vec::new(),
            stats: CopyStats::default(),
        }
    }

    fn header(&self, kind: EntryType, size: u64, owner: Owner, mode: u32, mtime: SystemTime) -> tar::Header {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(kind);
        header.set_size(size);
        header.set_mode(mode);
        header.set_uid(owner.uid.into());
        header.set_gid(owner.gid.into());
        header.set_mtime(unix_secs(mtime));
        header
    }

    fn mode(&self, meta: &EntryMeta) -> u32 {
        self.chmod.unwrap_or(meta.mode)
    }

    fn mtime(&self, meta: &EntryMeta) -> SystemTime {
        self.timestamp.unwrap_or(meta.mtime)
    }

    fn host_owner(&self, owner: Owner) -> StowageResult<Owner> {
        self.target_maps.to_host(owner)
    }

    /// Create missing parents of `dest`, owned by container owner `owner`
    pub(crate) fn ensure_parent(&self, dest: &Path, owner: Owner) -> StowageResult<()> {
        match dest.parent() {
            Some(parent) => make_dirs(self.root, parent, self.host_owner(owner)?),
            None => Ok(()),
        }
    }

    /// Remove a non-directory at `host` so it can be replaced
    fn clear(&self, host: &Path, dest: &Path) -> StowageResult<()> {
        match fs::symlink_metadata(host) {
            Ok(meta) if meta.is_dir() => Err(StowageError::io(
                format!("writing {}", dest.display()),
                io::Error::other("a directory is in the way"),
            )),
            Ok(_) => fs::remove_file(host).map_err(|e| StowageError::io(format!("replacing {}", dest.display()), e)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StowageError::io(format!("reading {}", dest.display()), e)),
        }
    }

    pub(crate) fn create_dir(&mut self, name: &Path, dest: &Path, meta: EntryMeta) -> StowageResult<()> {
        let host = entry_in_root(self.root, dest)?;
        match fs::symlink_metadata(&host) {
            Ok(existing) if existing.is_dir() => {}
            Ok(_) => {
                self.clear(&host, dest)?;
                fs::create_dir(&host).map_err(|e| StowageError::io(format!("creating {}", dest.display()), e))?;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                fs::create_dir(&host).map_err(|e| StowageError::io(format!("creating {}", dest.display()), e))?;
            }
            Err(e) => return Err(StowageError::io(format!("reading {}", dest.display()), e)),
        }

        let mode = self.mode(&meta);
        let mtime = self.mtime(&meta);
        set_owner(&host, self.host_owner(meta.owner)?)?;
        self.dir_fixups.push((host, mode, mtime));

        let mut header = self.header(EntryType::Directory, 0, meta.owner, mode, mtime);
        self.digest
            .append_data(&mut header, name, io::empty())
            .map_err(|e| StowageError::io(format!("digesting {}", dest.display()), e))?;
        self.stats.dirs += 1;
        Ok(())
    }

    pub(crate) fn write_file(
        &mut self,
        name: &Path,
        dest: &Path,
        data: &mut dyn Read,
        size: u64,
        meta: EntryMeta,
    ) -> StowageResult<()> {
        let host = entry_in_root(self.root, dest)?;
        self.clear(&host, dest)?;

        let mode = self.mode(&meta);
        let mtime = self.mtime(&meta);
        let mut file = File::create(&host).map_err(|e| StowageError::io(format!("creating {}", dest.display()), e))?;

        let mut header = self.header(EntryType::Regular, size, meta.owner, mode, mtime);
        let mut tee = TeeReader {
            inner: data,
            copy: &mut file,
            written: 0,
        };
        self.digest
            .append_data(&mut header, name, &mut tee)
            .map_err(|e| StowageError::io(format!("writing {}", dest.display()), e))?;
        let written = tee.written;

        set_owner(&host, self.host_owner(meta.owner)?)?;
        file.set_permissions(Permissions::from_mode(mode))
            .map_err(|e| StowageError::io(format!("setting mode of {}", dest.display()), e))?;
        file.set_times(FileTimes::new().set_accessed(mtime).set_modified(mtime))
            .map_err(|e| StowageError::io(format!("setting times of {}", dest.display()), e))?;

        self.stats.files += 1;
        self.stats.bytes += written;
        Ok(())
    }

    pub(crate) fn symlink(&mut self, name: &Path, dest: &Path, target: &Path, meta: EntryMeta) -> StowageResult<()> {
        let host = entry_in_root(self.root, dest)?;
        self.clear(&host, dest)?;
        std::os::unix::fs::symlink(target, &host)
            .map_err(|e| StowageError::io(format!("creating link {}", dest.display()), e))?;
        set_owner(&host, self.host_owner(meta.owner)?)?;

        let mut header = self.header(EntryType::Symlink, 0, meta.owner, 0o777, self.mtime(&meta));
        self.digest
            .append_link(&mut header, name, target)
            .map_err(|e| StowageError::io(format!("digesting {}", dest.display()), e))?;
        self.stats.symlinks += 1;
        Ok(())
    }

    /// Hard link `dest` to the already written container path `existing`
    pub(crate) fn hard_link(
        &mut self,
        name: &Path,
        dest: &Path,
        existing: &Path,
        link_name: &Path,
        meta: EntryMeta,
    ) -> StowageResult<()> {
        let original = entry_in_root(self.root, existing)?;
        let host = entry_in_root(self.root, dest)?;
        self.clear(&host, dest)?;
        fs::hard_link(&original, &host).map_err(|e| StowageError::io(format!("linking {}", dest.display()), e))?;

        let mut header = self.header(EntryType::Link, 0, meta.owner, self.mode(&meta), self.mtime(&meta));
        self.digest
            .append_link(&mut header, name, link_name)
            .map_err(|e| StowageError::io(format!("digesting {}", dest.display()), e))?;
        self.stats.files += 1;
        Ok(())
    }

    /// Apply deferred directory metadata and close the digest section
    pub(crate) fn finish(mut self) -> StowageResult<CopyStats> {
        for (path, mode, mtime) in self.dir_fixups.drain(..).rev() {
            let dir = File::open(&path).map_err(|e| StowageError::io(format!("opening {}", path.display()), e))?;
            dir.set_times(FileTimes::new().set_accessed(mtime).set_modified(mtime))
                .map_err(|e| StowageError::io(format!("setting times of {}", path.display()), e))?;
            fs::set_permissions(&path, Permissions::from_mode(mode))
                .map_err(|e| StowageError::io(format!("setting mode of {}", path.display()), e))?;
        }
        self.digest
            .into_inner()
            .map_err(|e| StowageError::io("finishing content digest", e))?;
        Ok(self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::IdMap;
    use crate::ingest::options::parse_timestamp;
    use tempfile::TempDir;

    /// Mappings under which container root is the user running the tests
    fn self_mapping(dir: &Path) -> IdMappings {
        let meta = fs::metadata(dir).unwrap();
        IdMappings::new(
            vec![IdMap { container_id: 0, host_id: meta.uid(), size: 1 }],
            vec![IdMap { container_id: 0, host_id: meta.gid(), size: 1 }],
        )
    }

    fn job(context: &Path, root: &Path, sources: &[&str], dest: Option<&str>) -> CopyJob {
        CopyJob {
            verb: Verb::Copy,
            sources: sources.iter().map(|s| s.to_string()).collect(),
            dest: dest.map(str::to_string),
            root: root.to_path_buf(),
            workdir: "/".to_string(),
            target_maps: self_mapping(root),
            from_root: None,
            context_dir: Some(context.to_path_buf()),
            cwd: context.to_path_buf(),
            excludes: ExcludeMatcher::default(),
            owner: OwnerPolicy::Root,
            chmod: None,
            timestamp: None,
            parents: false,
            checksum: None,
            remote: RemoteSettings::default(),
            retry: RetryPolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    fn context() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("app/sub")).unwrap();
        fs::write(dir.path().join("app/main.conf"), "listen 80\n").unwrap();
        fs::write(dir.path().join("app/cache.tmp"), "scratch").unwrap();
        fs::write(dir.path().join("app/sub/extra.conf"), "x").unwrap();
        fs::write(dir.path().join("single.txt"), "hello").unwrap();
        dir
    }

    #[test]
    fn single_file_to_named_path() {
        let ctx = context();
        let root = TempDir::new().unwrap();
        let mut digester = ContentDigester::new();

        let stats = job(ctx.path(), root.path(), &["single.txt"], Some("/etc/greeting"))
            .run(&mut digester)
            .unwrap();

        assert_eq!(fs::read_to_string(root.path().join("etc/greeting")).unwrap(), "hello");
        assert_eq!(stats.files, 1);
        assert_eq!(stats.bytes, 5);
        assert_eq!(digester.digest().content_type, "file");
    }

    #[test]
    fn trailing_slash_means_directory() {
        let ctx = context();
        let root = TempDir::new().unwrap();
        let mut digester = ContentDigester::new();

        job(ctx.path(), root.path(), &["single.txt"], Some("/opt/"))
            .run(&mut digester)
            .unwrap();
        assert!(root.path().join("opt/single.txt").is_file());
    }

    #[test]
    fn empty_dest_uses_workdir() {
        let ctx = context();
        let root = TempDir::new().unwrap();
        let mut digester = ContentDigester::new();

        let mut copy = job(ctx.path(), root.path(), &["single.txt"], None);
        copy.workdir = "/srv/www".to_string();
        copy.run(&mut digester).unwrap();
        assert!(root.path().join("srv/www/single.txt").is_file());
    }

    #[test]
    fn relative_dest_joins_workdir() {
        let ctx = context();
        let root = TempDir::new().unwrap();
        let mut digester = ContentDigester::new();

        let mut copy = job(ctx.path(), root.path(), &["single.txt"], Some("conf/"));
        copy.workdir = "/srv".to_string();
        copy.run(&mut digester).unwrap();
        assert!(root.path().join("srv/conf/single.txt").is_file());
    }

    #[test]
    fn directory_contents_copied() {
        let ctx = context();
        let root = TempDir::new().unwrap();
        let mut digester = ContentDigester::new();

        let stats = job(ctx.path(), root.path(), &["app"], Some("/etc/app"))
            .run(&mut digester)
            .unwrap();

        assert!(root.path().join("etc/app/main.conf").is_file());
        assert!(root.path().join("etc/app/sub/extra.conf").is_file());
        assert_eq!(stats.files, 3);
        assert_eq!(stats.dirs, 1);
        assert_eq!(digester.digest().content_type, "dir");
    }

    #[test]
    fn excluded_entries_skipped() {
        let ctx = context();
        let root = TempDir::new().unwrap();
        let mut digester = ContentDigester::new();

        let mut copy = job(ctx.path(), root.path(), &["app"], Some("/etc/app"));
        copy.excludes = ExcludeMatcher::new(&["**/*.tmp".to_string()]).unwrap();
        let stats = copy.run(&mut digester).unwrap();

        assert!(root.path().join("etc/app/main.conf").is_file());
        assert!(!root.path().join("etc/app/cache.tmp").exists());
        assert_eq!(stats.skipped, 1);
    }

    #[test]
    fn source_outside_context_matched_by_name() {
        let ctx = context();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("b.tmp"), "scratch").unwrap();
        fs::write(outside.path().join("keep.txt"), "kept").unwrap();
        let root = TempDir::new().unwrap();
        let mut digester = ContentDigester::new();

        let file = outside.path().join("b.tmp").display().to_string();
        let mut copy = job(ctx.path(), root.path(), &[file.as_str()], Some("/dst/"));
        copy.excludes = ExcludeMatcher::new(&["*.tmp".to_string()]).unwrap();
        let stats = copy.run(&mut digester).unwrap();
        assert_eq!(stats.skipped, 1);
        assert!(!root.path().join("dst/b.tmp").exists());

        let dir = outside.path().display().to_string();
        let mut copy = job(ctx.path(), root.path(), &[dir.as_str()], Some("/tree"));
        copy.excludes = ExcludeMatcher::new(&["*.tmp".to_string()]).unwrap();
        copy.run(&mut ContentDigester::new()).unwrap();
        assert!(root.path().join("tree/keep.txt").is_file());
        assert!(!root.path().join("tree/b.tmp").exists());
    }

    #[test]
    fn excluded_directory_with_reinclude() {
        let ctx = context();
        let root = TempDir::new().unwrap();
        let mut digester = ContentDigester::new();

        let mut copy = job(ctx.path(), root.path(), &["app"], Some("/dst"));
        copy.excludes =
            ExcludeMatcher::new(&["app/sub".to_string(), "!app/sub/extra.conf".to_string()]).unwrap();
        copy.run(&mut digester).unwrap();

        assert!(root.path().join("dst/sub/extra.conf").is_file());
    }

    #[test]
    fn glob_sources_into_directory() {
        let ctx = context();
        let root = TempDir::new().unwrap();
        let mut digester = ContentDigester::new();

        let stats = job(ctx.path(), root.path(), &["app/*.conf", "single.txt"], Some("/dst"))
            .run(&mut digester)
            .unwrap();

        assert!(root.path().join("dst/main.conf").is_file());
        assert!(root.path().join("dst/single.txt").is_file());
        assert_eq!(stats.files, 2);
        assert_eq!(digester.digest().content_type, "multi");
    }

    #[test]
    fn missing_source_fails() {
        let ctx = context();
        let root = TempDir::new().unwrap();
        let mut digester = ContentDigester::new();

        let err = job(ctx.path(), root.path(), &["nope.txt"], None)
            .run(&mut digester)
            .unwrap_err();
        assert!(matches!(err, StowageError::SourceNotFound(_)));

        let err = job(ctx.path(), root.path(), &["*.none"], None)
            .run(&mut digester)
            .unwrap_err();
        assert!(matches!(err, StowageError::SourceNotFound(_)));
    }

    #[test]
    fn parents_keep_leading_directories() {
        let ctx = context();
        let root = TempDir::new().unwrap();
        let mut digester = ContentDigester::new();

        let mut copy = job(ctx.path(), root.path(), &["app/sub/extra.conf"], Some("/dst"));
        copy.parents = true;
        copy.run(&mut digester).unwrap();
        assert!(root.path().join("dst/app/sub/extra.conf").is_file());
    }

    #[test]
    fn chmod_and_timestamp_applied() {
        let ctx = context();
        let root = TempDir::new().unwrap();
        let mut digester = ContentDigester::new();

        let mut copy = job(ctx.path(), root.path(), &["app"], Some("/dst"));
        copy.chmod = Some(0o750);
        copy.timestamp = Some(parse_timestamp("1000000000").unwrap());
        copy.run(&mut digester).unwrap();

        let meta = fs::metadata(root.path().join("dst/main.conf")).unwrap();
        assert_eq!(meta.mode() & 0o7777, 0o750);
        assert_eq!(meta.mtime(), 1_000_000_000);

        let dir = fs::metadata(root.path().join("dst/sub")).unwrap();
        assert_eq!(dir.mtime(), 1_000_000_000);
    }

    #[test]
    fn same_content_same_digest() {
        let ctx = context();
        let mut first = ContentDigester::new();
        let mut second = ContentDigester::new();
        let timestamp = Some(parse_timestamp("0").unwrap());

        let root = TempDir::new().unwrap();
        let mut copy = job(ctx.path(), root.path(), &["app"], Some("/a"));
        copy.timestamp = timestamp;
        copy.run(&mut first).unwrap();

        let root = TempDir::new().unwrap();
        let mut copy = job(ctx.path(), root.path(), &["app"], Some("/b"));
        copy.timestamp = timestamp;
        copy.run(&mut second).unwrap();

        assert_eq!(first.digest(), second.digest());
    }

    #[test]
    fn symlinks_recreated_and_contained() {
        let ctx = context();
        std::os::unix::fs::symlink("/etc/passwd", ctx.path().join("app/pw")).unwrap();
        let root = TempDir::new().unwrap();
        let mut digester = ContentDigester::new();

        let stats = job(ctx.path(), root.path(), &["app"], Some("/dst"))
            .run(&mut digester)
            .unwrap();
        assert_eq!(stats.symlinks, 1);
        assert_eq!(
            fs::read_link(root.path().join("dst/pw")).unwrap(),
            PathBuf::from("/etc/passwd")
        );
    }

    #[test]
    fn dest_through_symlink_stays_in_root() {
        let ctx = context();
        let root = TempDir::new().unwrap();
        std::os::unix::fs::symlink("/../../../..", root.path().join("escape")).unwrap();
        let mut digester = ContentDigester::new();

        job(ctx.path(), root.path(), &["single.txt"], Some("/escape/landed.txt"))
            .run(&mut digester)
            .unwrap();
        assert!(root.path().join("landed.txt").is_file());
    }

    #[test]
    fn cancelled_copy_stops() {
        let ctx = context();
        let root = TempDir::new().unwrap();
        let mut digester = ContentDigester::new();

        let copy = job(ctx.path(), root.path(), &["app"], Some("/dst"));
        copy.cancel.cancel();
        assert!(matches!(copy.run(&mut digester), Err(StowageError::Cancelled)));
    }
}
