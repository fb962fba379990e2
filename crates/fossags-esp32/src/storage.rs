//! SPIFFS-backed durable store.
//!
//! The SPIFFS partition is registered with the ESP-IDF VFS at
//! [`SPIFFS_BASE_PATH`], after which documents are ordinary files. File
//! operations go through an [`FsStore`] rooted at the mount point.

use std::fs::File;
use std::ptr;

use esp_idf_svc::sys::{self, esp, esp_vfs_spiffs_conf_t};
use fossags_core::{DurableStore, FsStore, OpenMode, StoreError};
use log::{info, warn};

/// VFS mount point of the SPIFFS partition.
pub const SPIFFS_BASE_PATH: &str = "/spiffs";

const MAX_OPEN_FILES: usize = 5;

/// The configuration filesystem on the default SPIFFS partition.
#[derive(Debug, Clone)]
pub struct SpiffsStore {
    files: FsStore,
}

impl SpiffsStore {
    pub fn new() -> Self {
        Self {
            files: FsStore::new(SPIFFS_BASE_PATH),
        }
    }

    /// Bytes used and total on the partition.
    pub fn usage(&self) -> Option<(usize, usize)> {
        let mut total = 0;
        let mut used = 0;
        esp!(unsafe { sys::esp_spiffs_info(ptr::null(), &mut total, &mut used) }).ok()?;
        Some((used, total))
    }
}

impl Default for SpiffsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DurableStore for SpiffsStore {
    type Handle = File;

    fn mount(&self) -> Result<(), StoreError> {
        if unsafe { sys::esp_spiffs_mounted(ptr::null()) } {
            return Ok(());
        }

        let conf = esp_vfs_spiffs_conf_t {
            base_path: c"/spiffs".as_ptr(),
            partition_label: ptr::null(),
            max_files: MAX_OPEN_FILES,
            // Formatting is the caller's decision, after the format notifier.
            format_if_mount_failed: false,
        };

        esp!(unsafe { sys::esp_vfs_spiffs_register(&conf) }).map_err(|e| {
            warn!("SPIFFS mount failed: {}", e);
            StoreError::MountFailed(e.to_string())
        })?;

        if let Some((used, total)) = self.usage() {
            info!("SPIFFS mounted at {}: {}/{} bytes used", SPIFFS_BASE_PATH, used, total);
        }
        Ok(())
    }

    fn format(&self) -> Result<(), StoreError> {
        info!("Formatting SPIFFS, this takes a while...");
        esp!(unsafe { sys::esp_spiffs_format(ptr::null()) })
            .map_err(|e| StoreError::FormatFailed(e.to_string()))
    }

    fn exists(&self, path: &str) -> bool {
        self.files.exists(path)
    }

    fn open(&self, path: &str, mode: OpenMode) -> Result<File, StoreError> {
        self.files.open(path, mode)
    }

    fn remove(&self, path: &str) -> Result<(), StoreError> {
        self.files.remove(path)
    }
}
