//! Filesystem-backed durable store.
//!
//! Documents are plain files under a root directory. Store paths such as
//! `/config.json` are resolved relative to that root, so the same path works
//! on the host and on a VFS mount point like `/spiffs`.

use crate::error::StoreError;
use crate::store::{DurableStore, OpenMode};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a store path to a file below the root.
    pub fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

fn open_error(path: &str, err: io::Error) -> StoreError {
    if err.kind() == io::ErrorKind::NotFound {
        StoreError::NotFound(path.to_string())
    } else {
        StoreError::Open {
            path: path.to_string(),
            reason: err.to_string(),
        }
    }
}

impl DurableStore for FsStore {
    type Handle = File;

    fn mount(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root)
            .map_err(|e| StoreError::MountFailed(format!("{}: {}", self.root.display(), e)))
    }

    fn format(&self) -> Result<(), StoreError> {
        let failed = |e: io::Error| StoreError::FormatFailed(e.to_string());

        if !self.root.exists() {
            return fs::create_dir_all(&self.root).map_err(failed);
        }

        for entry in fs::read_dir(&self.root).map_err(failed)? {
            let path = entry.map_err(failed)?.path();
            if path.is_dir() {
                fs::remove_dir_all(&path).map_err(failed)?;
            } else {
                fs::remove_file(&path).map_err(failed)?;
            }
        }
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_file()
    }

    fn open(&self, path: &str, mode: OpenMode) -> Result<File, StoreError> {
        let file = self.resolve(path);
        let result = match mode {
            OpenMode::Read => File::open(&file),
            OpenMode::Write => OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&file),
        };
        result.map_err(|e| open_error(path, e))
    }

    fn remove(&self, path: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.resolve(path)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}
