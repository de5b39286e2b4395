//! Resolving container paths inside a mounted root filesystem
//!
//! Symlinks are followed as the container would see them: absolute
//! targets restart at the rootfs, and `..` never climbs above it.

use crate::error::{StowageError, StowageResult};
use std::collections::VecDeque;
use std::ffi::OsString;
use std::fs;
use std::path::{Component, Path, PathBuf};

const MAX_SYMLINK_HOPS: usize = 40;

/// Resolve `path` (interpreted inside the container) to a host path under `root`
pub fn resolve_in_root(root: &Path, path: &Path) -> StowageResult<PathBuf> {
    let mut resolved = PathBuf::new();
    let mut pending: VecDeque<OsString> = parts(path).collect();
    let mut hops = 0;

    while let Some(part) = pending.pop_front() {
        if part == ".." {
            resolved.pop();
            continue;
        }

        let candidate = resolved.join(&part);
        let host = root.join(&candidate);
        match fs::symlink_metadata(&host) {
            Ok(meta) if meta.file_type().is_symlink() => {
                hops += 1;
                if hops > MAX_SYMLINK_HOPS {
                    return Err(StowageError::io(
                        format!("resolving {} in container", path.display()),
                        std::io::Error::other("too many levels of symbolic links"),
                    ));
                }
                let target = fs::read_link(&host)
                    .map_err(|e| StowageError::io(format!("reading link {}", host.display()), e))?;
                if target.is_absolute() {
                    resolved = PathBuf::new();
                }
                let mut expanded: VecDeque<OsString> = parts(&target).collect();
                expanded.extend(pending);
                pending = expanded;
            }
            _ => resolved = candidate,
        }
    }

    Ok(root.join(resolved))
}

/// Host path for creating `path` itself: parents are resolved, the final
/// component is not followed
pub fn entry_in_root(root: &Path, path: &Path) -> StowageResult<PathBuf> {
    let clean = clean(path);
    match (clean.parent(), clean.file_name()) {
        (Some(parent), Some(name)) => Ok(resolve_in_root(root, parent)?.join(name)),
        _ => Ok(root.to_path_buf()),
    }
}

/// Lexically clean an absolute container path
pub fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::from("/");
    for part in parts(path) {
        if part == ".." {
            out.pop();
        } else {
            out.push(part);
        }
    }
    out
}

fn parts(path: &Path) -> impl Iterator<Item = OsString> + '_ {
    path.components().filter_map(|c| match c {
        Component::Normal(part) => Some(part.to_os_string()),
        Component::ParentDir => Some(OsString::from("..")),
        _ => None,
    })
}
