use std::fs::{self, File, OpenOptions, Permissions};
use std::io;
use std::os::unix::fs::{lchown, symlink, PermissionsExt};
use std::path::{Path, PathBuf};

use nix::unistd::{chown, Gid, Uid};

use crate::config::Ownership;
use crate::error::{Error, IoResultExt, Result};

/// create a single directory level
///
/// returns false when a directory was already there.
pub fn create_directory(path: &Path) -> Result<bool> {
    match fs::create_dir(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            let meta = fs::symlink_metadata(path).with_path(path)?;
            if meta.is_dir() {
                Ok(false)
            } else {
                Err(e).with_path(path)
            }
        }
        Err(e) => Err(e).with_path(path),
    }
}

/// create a symlink pointing at `target`, replacing a non-directory in the way
pub fn create_symlink(path: &Path, target: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "a directory is in the way",
            ))
            .with_path(path)
        }
        Ok(_) => fs::remove_file(path).with_path(path)?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e).with_path(path),
    }

    symlink(target, path).with_path(path)?;

    let written = fs::read_link(path).with_path(path)?;
    if written != target {
        return Err(Error::Verification {
            path: path.to_path_buf(),
            message: format!(
                "link reads back as {}, expected {}",
                written.display(),
                target.display()
            ),
        });
    }
    Ok(())
}

/// chown a file or directory
pub fn set_owner(path: &Path, owner: Ownership) -> Result<()> {
    chown(
        path,
        Some(Uid::from_raw(owner.uid)),
        Some(Gid::from_raw(owner.gid)),
    )
    .map_err(|e| Error::Ownership {
        path: path.to_path_buf(),
        uid: owner.uid,
        gid: owner.gid,
        source: e.into(),
    })
}

/// chown a symlink itself, not what it points at
pub fn set_link_owner(path: &Path, owner: Ownership) -> Result<()> {
    lchown(path, Some(owner.uid), Some(owner.gid)).map_err(|source| Error::Ownership {
        path: path.to_path_buf(),
        uid: owner.uid,
        gid: owner.gid,
        source,
    })
}

pub fn set_mode(path: &Path, mode: u32) -> Result<()> {
    fs::set_permissions(path, Permissions::from_mode(mode & 0o7777)).with_path(path)
}

/// a file written next to its final location and renamed into place
///
/// the staging file is removed on drop unless committed, so the target
/// path never holds partially written content.
pub struct StagedFile {
    file: File,
    staging: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl StagedFile {
    pub fn create(target: &Path) -> Result<Self> {
        let name = target.file_name().ok_or_else(|| Error::Destination {
            path: target.to_path_buf(),
            message: "target has no file name".into(),
        })?;
        let staging_name = format!(
            ".{}.auditcp-{}",
            name.to_string_lossy(),
            uuid::Uuid::new_v4().simple()
        );
        let staging = target
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join(staging_name);

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&staging)
            .with_path(&staging)?;

        Ok(Self {
            file,
            staging,
            target: target.to_path_buf(),
            committed: false,
        })
    }

    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    /// where the content currently lives
    pub fn path(&self) -> &Path {
        &self.staging
    }

    /// flush content to stable storage
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all().with_path(&self.staging)
    }

    /// atomically replace the target with the staged content
    pub fn commit(mut self) -> Result<()> {
        fs::rename(&self.staging, &self.target).with_path(&self.target)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.staging);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::MetadataExt;
    use tempfile::tempdir;

    fn staging_leftovers(dir: &Path) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .contains(".auditcp-")
            })
            .count()
    }

    #[test]
    fn test_create_directory_reports_existing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("subdir");

        assert!(create_directory(&path).unwrap());
        assert!(!create_directory(&path).unwrap());
        assert!(path.is_dir());
    }

    #[test]
    fn test_create_directory_over_file_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("taken");
        fs::write(&path, "x").unwrap();

        assert!(create_directory(&path).is_err());
    }

    #[test]
    fn test_create_symlink_replaces_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("link");
        fs::write(&path, "old").unwrap();

        create_symlink(&path, Path::new("/target/path")).unwrap();

        assert!(path.symlink_metadata().unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&path).unwrap(), PathBuf::from("/target/path"));
    }

    #[test]
    fn test_create_symlink_refuses_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("occupied");
        fs::create_dir(&path).unwrap();

        assert!(create_symlink(&path, Path::new("x")).is_err());
        assert!(path.is_dir());
    }

    #[test]
    fn test_set_owner_to_self() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("file");
        fs::write(&path, "content").unwrap();
        let me = Ownership::effective();

        set_owner(&path, me).unwrap();

        let meta = fs::metadata(&path).unwrap();
        assert_eq!((meta.uid(), meta.gid()), (me.uid, me.gid));
    }

    #[test]
    fn test_set_link_owner_does_not_follow() {
        let dir = tempdir().unwrap();
        let link = dir.path().join("dangling");
        symlink("/does/not/exist", &link).unwrap();

        // chown through a dangling link would fail with ENOENT
        set_link_owner(&link, Ownership::effective()).unwrap();
    }

    #[test]
    fn test_set_mode() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("file");
        fs::write(&path, "content").unwrap();

        set_mode(&path, 0o600).unwrap();

        let meta = fs::metadata(&path).unwrap();
        assert_eq!(meta.mode() & 0o777, 0o600);
    }

    #[test]
    fn test_staged_file_commit() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("out.bin");
        fs::write(&target, "previous").unwrap();

        let mut staged = StagedFile::create(&target).unwrap();
        staged.file_mut().write_all(b"fresh").unwrap();
        staged.sync().unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"previous");

        staged.commit().unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"fresh");
        assert_eq!(staging_leftovers(dir.path()), 0);
    }

    #[test]
    fn test_staged_file_dropped_leaves_nothing() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("out.bin");

        {
            let mut staged = StagedFile::create(&target).unwrap();
            staged.file_mut().write_all(b"partial").unwrap();
            assert!(staged.path().exists());
        }

        assert!(!target.exists());
        assert_eq!(staging_leftovers(dir.path()), 0);
    }
}
