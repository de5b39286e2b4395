//! Local archive detection and extraction for ADD
//!
//! Plain, gzip and xz compressed tarballs are recognized by content, not
//! by file name. Entries are written through the same sink as copied
//! files, so owner, mode and timestamp overrides apply to them too.

use crate::builder::Owner;
use crate::error::{StowageError, StowageResult};
use crate::ingest::copier::{EntryMeta, EntrySink};
use crate::ingest::ownership::OwnerPolicy;
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};
use tar::EntryType;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use xz2::read::XzDecoder;

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const XZ_MAGIC: &[u8] = &[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00];
const USTAR_OFFSET: usize = 257;
const BLOCK_SIZE: usize = 512;

/// Compression wrapped around a tarball
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Xz,
}

/// Identify `path` as a tarball, returning its compression
pub fn detect(path: &Path) -> StowageResult<Option<Compression>> {
    let file = File::open(path).map_err(|e| StowageError::io(format!("reading {}", path.display()), e))?;
    let mut reader = BufReader::new(file);
    let head = read_block(&mut reader).map_err(|e| archive_error(path, e))?;

    if head.starts_with(GZIP_MAGIC) {
        let inner = open(path, Compression::Gzip)?;
        return Ok(is_tar(inner).then_some(Compression::Gzip));
    }
    if head.starts_with(XZ_MAGIC) {
        let inner = open(path, Compression::Xz)?;
        return Ok(is_tar(inner).then_some(Compression::Xz));
    }
    Ok(is_tar_block(&head).then_some(Compression::None))
}

fn open(path: &Path, compression: Compression) -> StowageResult<Box<dyn Read>> {
    let file = File::open(path).map_err(|e| StowageError::io(format!("reading {}", path.display()), e))?;
    let reader = BufReader::new(file);
    Ok(match compression {
        Compression::None => Box::new(reader),
        Compression::Gzip => Box::new(GzDecoder::new(reader)),
        Compression::Xz => Box::new(XzDecoder::new(reader)),
    })
}

/// Read up to one tar block
fn read_block(reader: &mut dyn Read) -> io::Result<Vec<u8>> {
    let mut block = Vec::with_capacity(BLOCK_SIZE);
    reader.take(BLOCK_SIZE as u64).read_to_end(&mut block)?;
    Ok(block)
}

fn is_tar(mut reader: Box<dyn Read>) -> bool {
    read_block(&mut reader).is_ok_and(|block| is_tar_block(&block))
}

fn is_tar_block(block: &[u8]) -> bool {
    block.len() >= USTAR_OFFSET + 5 && &block[USTAR_OFFSET..USTAR_OFFSET + 5] == b"ustar"
}

fn archive_error(path: &Path, source: io::Error) -> StowageError {
    StowageError::Archive {
        path: path.to_path_buf(),
        source,
    }
}

/// Relative entry name with `.` dropped; None if it would leave the destination
fn sanitize(name: &Path) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in name.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir | Component::Prefix(_) => return None,
        }
    }
    Some(clean)
}

fn id_from_header(value: io::Result<u64>) -> io::Result<u32> {
    let value = value?;
    u32::try_from(value).map_err(|_| io::Error::other(format!("ID {} out of range", value)))
}

/// Extract the tarball at `path` into container directory `dest`
///
/// Archive owners are kept unless a fixed owner was requested.
pub(crate) fn extract(
    path: &Path,
    compression: Compression,
    dest: &Path,
    owner: &OwnerPolicy,
    sink: &mut EntrySink<'_>,
    cancel: &CancellationToken,
) -> StowageResult<()> {
    let mut archive = tar::Archive::new(open(path, compression)?);
    let entries = archive.entries().map_err(|e| archive_error(path, e))?;
    let dir_owner = owner.directory_owner();

    for entry in entries {
        if cancel.is_cancelled() {
            return Err(StowageError::Cancelled);
        }
        let mut entry = entry.map_err(|e| archive_error(path, e))?;

        let raw = entry.path().map_err(|e| archive_error(path, e))?.into_owned();
        let Some(name) = sanitize(&raw) else {
            warn!("Skipping archive entry {} outside the destination", raw.display());
            sink.stats.skipped += 1;
            continue;
        };
        if name.as_os_str().is_empty() {
            continue;
        }

        let (kind, meta) = {
            let header = entry.header();
            let archived = Owner {
                uid: id_from_header(header.uid()).map_err(|e| archive_error(path, e))?,
                gid: id_from_header(header.gid()).map_err(|e| archive_error(path, e))?,
            };
            let meta = EntryMeta {
                owner: match owner {
                    OwnerPolicy::Fixed(fixed) => *fixed,
                    _ => archived,
                },
                mode: header.mode().map_err(|e| archive_error(path, e))? & 0o7777,
                mtime: UNIX_EPOCH + Duration::from_secs(header.mtime().map_err(|e| archive_error(path, e))?),
            };
            (header.entry_type(), meta)
        };

        let target = dest.join(&name);
        sink.ensure_parent(&target, dir_owner)?;

        match kind {
            EntryType::Directory => sink.create_dir(&name, &target, meta)?,
            EntryType::Regular | EntryType::Continuous => {
                let size = entry.size();
                sink.write_file(&name, &target, &mut entry, size, meta)?;
            }
            EntryType::Symlink => {
                let link = link_name(&entry, path)?;
                sink.symlink(&name, &target, &link, meta)?;
            }
            EntryType::Link => {
                let link = link_name(&entry, path)?;
                let Some(existing) = sanitize(&link) else {
                    warn!("Skipping hard link {} to {} outside the destination", name.display(), link.display());
                    sink.stats.skipped += 1;
                    continue;
                };
                sink.hard_link(&name, &target, &dest.join(&existing), &existing, meta)?;
            }
            other => {
                debug!("Skipping archive entry {} of type {:?}", name.display(), other);
                sink.stats.skipped += 1;
            }
        }
    }
    Ok(())
}

fn link_name<R: Read>(entry: &tar::Entry<'_, R>, path: &Path) -> StowageResult<PathBuf> {
    entry
        .link_name()
        .map_err(|e| archive_error(path, e))?
        .map(|link| link.into_owned())
        .ok_or_else(|| archive_error(path, io::Error::other("link entry without a target")))
}
