//! Reading `.containerignore` / `.dockerignore` files

use crate::error::{StowageError, StowageResult};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Ignore files looked up in the context directory, first match wins
pub const DEFAULT_IGNORE_FILES: &[&str] = &[".containerignore", ".dockerignore"];

/// Read the ignore file for `context_dir`
///
/// An explicit `ignore_file` must exist; relative paths are taken from the
/// context directory. Without one, the default names are tried and a
/// missing file yields no patterns.
pub fn read_ignore_patterns(
    context_dir: &Path,
    ignore_file: Option<&Path>,
) -> StowageResult<(Vec<String>, Option<PathBuf>)> {
    if let Some(file) = ignore_file {
        let path = if file.is_absolute() {
            file.to_path_buf()
        } else {
            context_dir.join(file)
        };
        let content = fs::read_to_string(&path)
            .map_err(|e| StowageError::io(format!("reading ignore file {}", path.display()), e))?;
        debug!("Using ignore file {}", path.display());
        return Ok((parse_ignore(&content), Some(path)));
    }

    for name in DEFAULT_IGNORE_FILES {
        let path = context_dir.join(name);
        match fs::read_to_string(&path) {
            Ok(content) => {
                debug!("Using ignore file {}", path.display());
                return Ok((parse_ignore(&content), Some(path)));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                return Err(StowageError::io(
                    format!("reading ignore file {}", path.display()),
                    e,
                ))
            }
        }
    }

    Ok((vec![], None))
}

/// One pattern per line; blank lines and `#` comments are dropped
pub fn parse_ignore(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}
