//! File modes, group ownership and the process umask.
//!
//! The umask is process-wide, so changes are serialized through a global
//! lock and restored when the guard drops. Only directory and link creation
//! run under the guard; file modes are set explicitly after writing.

use std::fs::{self, DirBuilder};
use std::io::{self, Write};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use tempfile::NamedTempFile;

use crate::config::FsConfig;
use crate::error::{StoreError, StoreResult};

static UMASK_LOCK: Mutex<()> = Mutex::new(());

/// Holds a relaxed umask until dropped.
pub struct UmaskGuard {
    previous: libc::mode_t,
    _lock: MutexGuard<'static, ()>,
}

impl UmaskGuard {
    /// Install `mask` as the process umask.
    pub fn set(mask: u32) -> Self {
        let lock = UMASK_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // SAFETY: umask has no memory-safety preconditions; concurrent
        // callers inside this crate are serialized by UMASK_LOCK.
        let previous = unsafe { libc::umask(mask as libc::mode_t) };
        Self {
            previous,
            _lock: lock,
        }
    }
}

impl Drop for UmaskGuard {
    fn drop(&mut self) {
        // SAFETY: see `UmaskGuard::set`.
        unsafe {
            libc::umask(self.previous);
        }
    }
}

/// Mode and ownership applied to everything the fs stores create.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FilePolicy {
    pub umask: u32,
    pub dir_mode: u32,
    pub file_mode: u32,
    pub gid: Option<u32>,
}

impl FilePolicy {
    pub fn from_config(config: &FsConfig) -> Self {
        Self {
            umask: config.umask,
            dir_mode: config.dir_permissions,
            file_mode: config.dump_permissions,
            gid: config.dump_gid,
        }
    }

    /// Create `dir` and any missing parents.
    ///
    /// A directory that appears concurrently is not an error.
    pub fn create_dirs(&self, dir: &Path) -> StoreResult<()> {
        let _umask = UmaskGuard::set(self.umask);
        match DirBuilder::new()
            .recursive(true)
            .mode(self.dir_mode)
            .create(dir)
        {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && dir.is_dir() => Ok(()),
            Err(e) => Err(StoreError::io(dir, e)),
        }
    }

    /// Write `data` to `path` through a temporary file in the same
    /// directory, so readers never observe a half-written file.
    pub fn write_file(&self, path: &Path, data: &[u8]) -> StoreResult<()> {
        let dir = path
            .parent()
            .ok_or_else(|| StoreError::corrupt(path, "file path has no parent"))?;
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir, e))?;
        tmp.write_all(data).map_err(|e| StoreError::io(tmp.path(), e))?;
        tmp.as_file()
            .sync_data()
            .map_err(|e| StoreError::io(tmp.path(), e))?;
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(self.file_mode))
            .map_err(|e| StoreError::io(tmp.path(), e))?;
        if let Some(gid) = self.gid {
            std::os::unix::fs::chown(tmp.path(), None, Some(gid))
                .map_err(|e| StoreError::io(tmp.path(), e))?;
        }
        tmp.persist(path).map_err(|e| StoreError::io(path, e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> FilePolicy {
        FilePolicy::from_config(&FsConfig::default())
    }

    #[test]
    fn create_dirs_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        policy().create_dirs(&nested).unwrap();
        policy().create_dirs(&nested).unwrap();
        assert!(nested.is_dir());
    }

    #[test]
    fn write_file_sets_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.json");
        policy().write_file(&path, b"{}").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"{}");
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o660);
    }

    #[test]
    fn write_file_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.dump");
        policy().write_file(&path, b"first").unwrap();
        policy().write_file(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
        // No temp files left behind.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn write_into_missing_dir_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing/x.json");
        let err = policy().write_file(&path, b"{}").unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn directories_get_configured_mode() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("shared");
        let policy = FilePolicy {
            umask: 0o000,
            dir_mode: 0o775,
            ..policy()
        };
        policy.create_dirs(&nested).unwrap();
        let mode = fs::metadata(&nested).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o775);
    }
}
