//! Durable document store.
//!
//! The configuration document lives on a small flash filesystem. This module
//! abstracts that filesystem so the codec and the config manager can run on
//! both targets:
//! - Linux: [`FsStore`](crate::fs_store::FsStore) rooted at a data directory
//! - ESP32: SPIFFS, mounted through the ESP-IDF VFS
//!
//! [`MemoryStore`] is the in-memory implementation used by tests. It can be
//! told to fail mounts, formats or writes.

use crate::error::StoreError;
use std::collections::HashMap;
use std::io::{self, Cursor, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// How a document is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read from the start of an existing document.
    Read,
    /// Create the document, truncating any previous contents.
    Write,
}

/// Flash-backed filesystem holding the configuration document.
///
/// All methods are synchronous to support embedded platforms.
pub trait DurableStore {
    /// Open document handle.
    type Handle: Read + Write;

    /// Make the filesystem available.
    fn mount(&self) -> Result<(), StoreError>;

    /// Wipe the filesystem. Destroys every document; only used for recovery
    /// after a failed mount.
    fn format(&self) -> Result<(), StoreError>;

    /// Check if a document exists.
    fn exists(&self, path: &str) -> bool;

    /// Open a document.
    fn open(&self, path: &str, mode: OpenMode) -> Result<Self::Handle, StoreError>;

    /// Delete a document. Removing a missing document is not an error.
    fn remove(&self, path: &str) -> Result<(), StoreError>;
}

impl<S: DurableStore + ?Sized> DurableStore for &S {
    type Handle = S::Handle;

    fn mount(&self) -> Result<(), StoreError> {
        (**self).mount()
    }

    fn format(&self) -> Result<(), StoreError> {
        (**self).format()
    }

    fn exists(&self, path: &str) -> bool {
        (**self).exists(path)
    }

    fn open(&self, path: &str, mode: OpenMode) -> Result<Self::Handle, StoreError> {
        (**self).open(path, mode)
    }

    fn remove(&self, path: &str) -> Result<(), StoreError> {
        (**self).remove(path)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    files: HashMap<String, Vec<u8>>,
    mounted: bool,
    failing_mounts: u32,
    fail_format: bool,
    fail_writes: bool,
    mount_calls: u32,
    format_calls: u32,
}

/// In-memory store.
///
/// Clones share the same documents, so a test can keep a handle to the
/// store after moving a clone into the config manager.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls to [`DurableStore::mount`] fail.
    pub fn fail_mount(self, count: u32) -> Self {
        self.lock().failing_mounts = count;
        self
    }

    /// Make [`DurableStore::format`] fail.
    pub fn fail_format(self) -> Self {
        self.lock().fail_format = true;
        self
    }

    /// Make opening any document for writing fail.
    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Store a document directly, bypassing the codec.
    pub fn insert(&self, path: &str, contents: impl Into<Vec<u8>>) {
        self.lock().files.insert(path.to_string(), contents.into());
    }

    /// Raw contents of a document.
    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(path).cloned()
    }

    pub fn is_mounted(&self) -> bool {
        self.lock().mounted
    }

    pub fn mount_calls(&self) -> u32 {
        self.lock().mount_calls
    }

    pub fn format_calls(&self) -> u32 {
        self.lock().format_calls
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DurableStore for MemoryStore {
    type Handle = MemoryHandle;

    fn mount(&self) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.mount_calls += 1;
        if state.failing_mounts > 0 {
            state.failing_mounts -= 1;
            return Err(StoreError::MountFailed("simulated mount failure".to_string()));
        }
        state.mounted = true;
        Ok(())
    }

    fn format(&self) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.format_calls += 1;
        if state.fail_format {
            return Err(StoreError::FormatFailed("simulated format failure".to_string()));
        }
        state.files.clear();
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        self.lock().files.contains_key(path)
    }

    fn open(&self, path: &str, mode: OpenMode) -> Result<MemoryHandle, StoreError> {
        let mut state = self.lock();
        match mode {
            OpenMode::Read => {
                let data = state
                    .files
                    .get(path)
                    .cloned()
                    .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
                Ok(MemoryHandle::Reader(Cursor::new(data)))
            }
            OpenMode::Write => {
                if state.fail_writes {
                    return Err(StoreError::Open {
                        path: path.to_string(),
                        reason: "simulated write failure".to_string(),
                    });
                }
                state.files.insert(path.to_string(), Vec::new());
                Ok(MemoryHandle::Writer {
                    store: self.clone(),
                    path: path.to_string(),
                })
            }
        }
    }

    fn remove(&self, path: &str) -> Result<(), StoreError> {
        self.lock().files.remove(path);
        Ok(())
    }
}

/// Handle to a document in a [`MemoryStore`].
///
/// Writes land in the store immediately, so a partially written document is
/// visible exactly as it would be on flash.
#[derive(Debug)]
pub enum MemoryHandle {
    Reader(Cursor<Vec<u8>>),
    Writer { store: MemoryStore, path: String },
}

impl Read for MemoryHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            MemoryHandle::Reader(cursor) => cursor.read(buf),
            MemoryHandle::Writer { .. } => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "document opened for writing",
            )),
        }
    }
}

impl Write for MemoryHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            MemoryHandle::Reader(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "document opened for reading",
            )),
            MemoryHandle::Writer { store, path } => {
                store
                    .lock()
                    .files
                    .entry(path.clone())
                    .or_default()
                    .extend_from_slice(buf);
                Ok(buf.len())
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
