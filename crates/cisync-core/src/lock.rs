//! Per-working-tree exclusivity.
//!
//! At most one engine may drive a given working tree at a time. The lock is
//! an advisory exclusive lock on `<root>/.git/cisync.lock` (or
//! `<root>/.cisync.lock` outside a git checkout), released on drop.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::domain::{EngineError, Result};

/// Held for the lifetime of one engine invocation.
#[derive(Debug)]
pub struct WorkspaceLock {
    file: File,
    path: PathBuf,
}

impl WorkspaceLock {
    /// Where the lock file for `root` lives.
    pub fn lock_path(root: &Path) -> PathBuf {
        let git_dir = root.join(".git");
        if git_dir.is_dir() {
            git_dir.join("cisync.lock")
        } else {
            root.join(".cisync.lock")
        }
    }

    /// Take the lock without waiting; a held lock is [`EngineError::WorkspaceBusy`].
    pub fn acquire(root: &Path) -> Result<Self> {
        let path = Self::lock_path(root);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                debug!(path = %path.display(), "workspace lock acquired");
                Ok(Self { file, path })
            }
            Err(err)
                if err.kind() == ErrorKind::WouldBlock
                    || err.raw_os_error() == fs2::lock_contended_error().raw_os_error() =>
            {
                Err(EngineError::WorkspaceBusy {
                    path: root.to_path_buf(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        FileExt::unlock(&self.file).ok();
    }
}
