//! `FileInstanceMgr` — enforces single-writer-per-path semantics and
//! refcounts concurrent openers of the same logical file.
//!
//! A writer slot is acquired lazily, on the first `write`, not on `open` —
//! two clients may hold a handle to the same path for reading, and the
//! first one to actually write wins the slot; any other write attempt
//! fails with `PermissionDenied` until the slot is released.

use crate::error::{ObjfsError, Result};
use crate::file_impl::FileImpl;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

struct FileInstance {
    refcount: usize,
    writer_held: bool,
    inner: Arc<Mutex<FileImpl>>,
}

/// Registry of open files, keyed by path.
pub struct FileInstanceMgr {
    instances: Mutex<HashMap<String, FileInstance>>,
}

impl Default for FileInstanceMgr {
    fn default() -> Self {
        Self::new()
    }
}

impl FileInstanceMgr {
    pub fn new() -> Self {
        Self {
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a new opener of `path`, constructing the shared `FileImpl`
    /// via `make` only if no instance is currently live for this path.
    ///
    /// `make` performs object-store I/O (`SliceFile::open`'s recovery scan),
    /// so it always runs outside the map mutex — held only long enough to
    /// check for and then insert an entry — with a double-check after
    /// construction in case another opener raced us to the same path.
    pub fn acquire<F>(&self, path: &str, make: F) -> Result<FileObject>
    where
        F: FnOnce() -> Result<FileImpl>,
    {
        if let Some(obj) = self.try_share(path) {
            return Ok(obj);
        }
        let file_impl = make()?;
        let inner = Arc::new(Mutex::new(file_impl));
        let mut map = self.instances.lock().unwrap();
        if let Some(inst) = map.get_mut(path) {
            inst.refcount += 1;
            return Ok(FileObject {
                path: path.to_string(),
                inner: inst.inner.clone(),
                is_writer: false,
            });
        }
        map.insert(
            path.to_string(),
            FileInstance {
                refcount: 1,
                writer_held: false,
                inner: inner.clone(),
            },
        );
        Ok(FileObject {
            path: path.to_string(),
            inner,
            is_writer: false,
        })
    }

    fn try_share(&self, path: &str) -> Option<FileObject> {
        let mut map = self.instances.lock().unwrap();
        let inst = map.get_mut(path)?;
        inst.refcount += 1;
        Some(FileObject {
            path: path.to_string(),
            inner: inst.inner.clone(),
            is_writer: false,
        })
    }

    /// Returns `true` if at least one handle is currently open for `path`.
    pub fn is_open(&self, path: &str) -> bool {
        self.instances.lock().unwrap().contains_key(path)
    }

    fn try_acquire_writer(&self, path: &str) -> Result<bool> {
        let mut map = self.instances.lock().unwrap();
        let inst = map
            .get_mut(path)
            .ok_or_else(|| ObjfsError::Internal(format!("no open instance for {path}")))?;
        if inst.writer_held {
            return Ok(false);
        }
        inst.writer_held = true;
        Ok(true)
    }

    fn release(&self, path: &str, was_writer: bool) {
        let mut map = self.instances.lock().unwrap();
        if let Some(inst) = map.get_mut(path) {
            if was_writer {
                inst.writer_held = false;
            }
            inst.refcount -= 1;
            if inst.refcount == 0 {
                map.remove(path);
            }
        }
    }
}

/// A per-client handle onto a shared [`FileImpl`]. Dropping it (or calling
/// [`FileObject::release`] explicitly) decrements the refcount and, if this
/// handle held the writer slot, frees it for the next writer.
pub struct FileObject {
    path: String,
    inner: Arc<Mutex<FileImpl>>,
    is_writer: bool,
}

impl FileObject {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Attempts to become the sole writer for this path. Idempotent once
    /// held; fails with `PermissionDenied` if another handle already holds
    /// the slot.
    pub fn claim_writer(&mut self, mgr: &FileInstanceMgr) -> Result<()> {
        if self.is_writer {
            return Ok(());
        }
        if mgr.try_acquire_writer(&self.path)? {
            self.is_writer = true;
            Ok(())
        } else {
            Err(ObjfsError::PermissionDenied(format!(
                "{} already has an active writer",
                self.path
            )))
        }
    }

    pub fn is_writer(&self) -> bool {
        self.is_writer
    }

    pub fn with_inner<T>(&self, f: impl FnOnce(&mut FileImpl) -> Result<T>) -> Result<T> {
        let mut guard = self.inner.lock().unwrap();
        f(&mut guard)
    }

    pub fn release(self, mgr: &FileInstanceMgr) {
        mgr.release(&self.path, self.is_writer);
    }
}
