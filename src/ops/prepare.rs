use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};

/// where one source operand lands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub source: PathBuf,
    pub target: PathBuf,
}

/// decide the effective destination of every source operand, once, before traversal
///
/// a single source lands at `destination` itself unless `destination` is an
/// existing directory, in which case it lands at `destination/basename`.
/// several sources always land at `destination/basename`, the directory being
/// created when missing. a lone source that cannot be stat'ed leaves nothing
/// to plan and is fatal; among several it becomes an entry failure later.
pub fn plan_destination(sources: &[PathBuf], destination: &Path) -> Result<Vec<Placement>> {
    if sources.is_empty() {
        return Err(Error::Config("missing file operand".into()));
    }
    if let [only] = sources {
        fs::symlink_metadata(only).map_err(|e| Error::Destination {
            path: only.to_path_buf(),
            message: format!("cannot stat source: {}", e),
        })?;
    }

    let dest_is_dir = match fs::metadata(destination) {
        Ok(meta) => Some(meta.is_dir()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => {
            return Err(Error::Destination {
                path: destination.to_path_buf(),
                message: e.to_string(),
            })
        }
    };

    let nest = if sources.len() > 1 {
        match dest_is_dir {
            Some(true) => {}
            Some(false) => {
                return Err(Error::Destination {
                    path: destination.to_path_buf(),
                    message: "not a directory".into(),
                })
            }
            None => {
                debug!("creating destination directory {}", destination.display());
                fs::create_dir_all(destination).map_err(|e| Error::Destination {
                    path: destination.to_path_buf(),
                    message: e.to_string(),
                })?;
            }
        }
        true
    } else {
        dest_is_dir == Some(true)
    };

    let mut placements = Vec::with_capacity(sources.len());
    for source in sources {
        let target = if nest {
            destination.join(basename(source)?)
        } else {
            destination.to_path_buf()
        };
        refuse_self_nesting(source, &target)?;
        placements.push(Placement {
            source: source.clone(),
            target,
        });
    }
    Ok(placements)
}

/// last component of `source`, resolving `.` and `..` through the filesystem
fn basename(source: &Path) -> Result<OsString> {
    if let Some(name) = source.file_name() {
        return Ok(name.to_os_string());
    }
    fs::canonicalize(source)
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_os_string()))
        .ok_or_else(|| Error::Destination {
            path: source.to_path_buf(),
            message: "cannot derive a name for this source".into(),
        })
}

/// a directory copied into its own subtree would keep finding its own output
fn refuse_self_nesting(source: &Path, target: &Path) -> Result<()> {
    let source = match fs::canonicalize(source) {
        Ok(p) if p.is_dir() => p,
        _ => return Ok(()),
    };
    let anchor = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let Ok(anchor) = fs::canonicalize(anchor) else {
        return Ok(());
    };
    let resolved = match target.file_name() {
        Some(name) => anchor.join(name),
        None => anchor,
    };
    if resolved.starts_with(&source) {
        return Err(Error::Destination {
            path: target.to_path_buf(),
            message: format!("cannot copy {} into itself", source.display()),
        });
    }
    Ok(())
}
