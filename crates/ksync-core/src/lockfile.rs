use crate::error::StorageError;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::Path;

/// Exclusive advisory lock on a sidecar file, released on drop.
#[derive(Debug)]
pub struct LockFile {
    file: File,
}

impl LockFile {
    /// Blocks until the lock is held.
    pub fn acquire(path: &Path) -> Result<Self, StorageError> {
        let file = open_lock_file(path)?;
        file.lock_exclusive().map_err(|source| StorageError::Lock {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self { file })
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

fn open_lock_file(path: &Path) -> Result<File, StorageError> {
    let lock_err = |source| StorageError::Lock {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(lock_err)?;
    }
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
        .map_err(lock_err)
}
