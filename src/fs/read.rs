use std::fs::{self, File, Metadata};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use crate::error::{IoResultExt, Result};
use crate::types::EntryKind;

/// what a source path turned out to be, read without following symlinks
#[derive(Debug, Clone)]
pub struct SourceEntry {
    pub path: PathBuf,
    pub kind: EntryKind,
    /// permission bits, setuid/setgid/sticky included
    pub mode: u32,
}

impl SourceEntry {
    pub fn stat(path: &Path) -> Result<Self> {
        let meta = fs::symlink_metadata(path).with_path(path)?;
        Ok(Self::from_metadata(path, &meta))
    }

    pub fn from_metadata(path: &Path, meta: &Metadata) -> Self {
        Self {
            path: path.to_path_buf(),
            kind: entry_kind(meta),
            mode: meta.mode() & 0o7777,
        }
    }
}

/// classify metadata; fifos, sockets and devices all count as `Other`
pub fn entry_kind(meta: &Metadata) -> EntryKind {
    let ft = meta.file_type();
    if ft.is_file() {
        EntryKind::File
    } else if ft.is_dir() {
        EntryKind::Directory
    } else if ft.is_symlink() {
        EntryKind::Symlink
    } else {
        EntryKind::Other
    }
}

/// read symlink target
pub fn read_symlink_target(path: &Path) -> Result<PathBuf> {
    fs::read_link(path).with_path(path)
}

pub fn open_source(path: &Path) -> Result<File> {
    File::open(path).with_path(path)
}

/// entries of `dir`, sorted by file name so traversal order is stable
pub fn list_children(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut children = Vec::new();
    for entry in fs::read_dir(dir).with_path(dir)? {
        let entry = entry.with_path(dir)?;
        children.push(entry.path());
    }
    children.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(children)
}
