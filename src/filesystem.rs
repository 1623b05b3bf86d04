//! `Filesystem` — the external façade: a flat object bucket presented as a
//! hierarchical namespace with POSIX-flavored file semantics layered on
//! top of [`FileImpl`]/[`SliceFile`].
//!
//! Directories have no native representation in the backing store; a
//! directory is the set of keys sharing its prefix, made discoverable by a
//! zero-byte marker object. Every object this crate uses internally for
//! bookkeeping (`$slice$/...`, `$cache$/...`, `$tmp$/...`, `$dir$/...`) is
//! filtered out of [`Filesystem::readdir`] — these are implementation
//! detail, never part of the visible namespace.

use crate::config::FsConfig;
use crate::dir_cache::{DirCache, Ttl};
use crate::error::{ObjfsError, Result};
use crate::file_impl::FileImpl;
use crate::file_instance::{FileInstanceMgr, FileObject};
use crate::object_io::ObjectIO;
use crate::slice_meta::SliceMeta;
use std::sync::Arc;
use tracing::{info, warn};

fn dir_marker_key(path: &str) -> String {
    format!("$dir$/{}/", path.trim_end_matches('/'))
}

#[derive(Debug, Clone, Copy)]
pub struct Attr {
    pub is_dir: bool,
    pub size: u64,
    pub mtime: u64,
}

/// Synthetic capacity figures — there is no real notion of "free space" over
/// a flat object bucket, so `bfree`/`bavail` simply mirror `blocks`.
#[derive(Debug, Clone, Copy)]
pub struct Statfs {
    pub block_size: u64,
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
}

/// A handle returned by [`Filesystem::open`]. Must be released via
/// [`Filesystem::close`] once the caller is done with it.
pub struct FileHandle {
    path: String,
    object: FileObject,
}

impl FileHandle {
    pub fn path(&self) -> &str {
        &self.path
    }
}

pub struct Filesystem {
    io: Arc<dyn ObjectIO>,
    instances: FileInstanceMgr,
    dir_cache: DirCache,
    config: FsConfig,
}

impl Filesystem {
    pub fn new(io: Arc<dyn ObjectIO>, config: FsConfig) -> Self {
        let dir_cache = DirCache::new(config.dir_cache_short_ttl);
        Self {
            io,
            instances: FileInstanceMgr::new(),
            dir_cache,
            config,
        }
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    fn is_hidden(component: &str) -> bool {
        component.starts_with('$') && component.ends_with('$')
    }

    pub fn mkdir(&self, path: &str) -> Result<()> {
        if self.exists(path)? {
            return Err(ObjfsError::AlreadyExists(path.to_string()));
        }
        self.io.put(&dir_marker_key(path), &[])?;
        self.dir_cache.set(path, true, Ttl::One);
        info!(path, "mkdir");
        Ok(())
    }

    pub fn getattr(&self, path: &str) -> Result<Attr> {
        if path.is_empty() || path == "/" {
            return Ok(Attr { is_dir: true, size: 0, mtime: 0 });
        }
        if let Ok(meta) = self.io.head(&dir_marker_key(path)) {
            return Ok(Attr {
                is_dir: true,
                size: 0,
                mtime: meta.mtime,
            });
        }

        let meta_key = SliceMeta::meta_key(path);
        if let Ok(head) = self.io.head(&meta_key) {
            let mut buf = vec![0u8; head.size as usize];
            let n = self.io.get_range(&meta_key, &mut buf, 0)?;
            buf.truncate(n);
            let meta = SliceMeta::from_bytes(&buf)?;
            return Ok(Attr {
                is_dir: false,
                size: meta.file_len,
                mtime: head.mtime,
            });
        }

        let head = self.io.head(path)?;
        Ok(Attr {
            is_dir: false,
            size: head.size,
            mtime: head.mtime,
        })
    }

    pub fn exists(&self, path: &str) -> Result<bool> {
        self.dir_cache.exist(path, || match self.getattr(path) {
            Ok(_) => Ok(true),
            Err(ObjfsError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        })
    }

    pub fn readdir(&self, path: &str) -> Result<Vec<String>> {
        let prefix = if path.is_empty() || path == "/" {
            String::new()
        } else {
            format!("{}/", path.trim_end_matches('/'))
        };
        let entries = self.io.list(&prefix, '/')?;
        let mut names: Vec<String> = entries
            .into_iter()
            .filter_map(|e| {
                let rest = e.name.strip_prefix(&prefix).unwrap_or(&e.name);
                let rest = rest.trim_end_matches('/');
                if rest.is_empty() || Self::is_hidden(rest) {
                    None
                } else {
                    Some(rest.to_string())
                }
            })
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    pub fn open(&self, path: &str, create: bool) -> Result<FileHandle> {
        let io = self.io.clone();
        let config = self.config.clone();
        let path_owned = path.to_string();
        let object = self.instances.acquire(path, move || FileImpl::open(io, &config, &path_owned, create))?;
        self.dir_cache.set(path, true, Ttl::One);
        Ok(FileHandle {
            path: path.to_string(),
            object,
        })
    }

    pub fn read(&self, handle: &FileHandle, dst: &mut [u8], offset: u64) -> Result<usize> {
        handle.object.with_inner(|f| f.read(dst, offset))
    }

    /// Appends `data` at `offset`. Acquires the single-writer slot for this
    /// path lazily, on this first write, rather than at `open` time. A
    /// second handle attempting to write while another holds the slot gets
    /// `PermissionDenied`.
    pub fn write(&self, handle: &mut FileHandle, data: &[u8], offset: u64) -> Result<()> {
        handle.object.claim_writer(&self.instances)?;
        handle.object.with_inner(|f| f.write(data, offset))?;
        self.dir_cache.invalidate(&handle.path);
        Ok(())
    }

    pub fn flush(&self, handle: &FileHandle) -> Result<()> {
        handle.object.with_inner(|f| f.flush())
    }

    /// Only `len == 0` is supported; non-zero truncation of an
    /// append-optimized file is out of scope.
    pub fn truncate(&self, handle: &mut FileHandle, len: u64) -> Result<()> {
        if len != 0 {
            return Err(ObjfsError::Unsupported("truncate to non-zero length".into()));
        }
        handle.object.claim_writer(&self.instances)?;
        handle.object.with_inner(|f| f.truncate_zero())?;
        self.dir_cache.invalidate(&handle.path);
        Ok(())
    }

    pub fn close(&self, handle: FileHandle) {
        handle.object.release(&self.instances);
    }

    /// Deletes a file. Fails with `Busy` if any handle is currently open
    /// for this path.
    pub fn unlink(&self, path: &str) -> Result<()> {
        if self.instances.is_open(path) {
            return Err(ObjfsError::Busy(path.to_string()));
        }
        let meta_key = SliceMeta::meta_key(path);
        if let Ok(head) = self.io.head(&meta_key) {
            let mut buf = vec![0u8; head.size as usize];
            let n = self.io.get_range(&meta_key, &mut buf, 0)?;
            buf.truncate(n);
            if let Ok(meta) = SliceMeta::from_bytes(&buf) {
                for n in 0..meta.slice_count {
                    let _ = self.io.delete(&SliceMeta::sealed_slice_key(path, n));
                }
                let _ = self.io.delete(&meta.cur_slice_name);
            }
            let _ = self.io.delete(&meta_key);
        }
        self.io.delete(path)?;
        self.dir_cache.invalidate(path);
        warn!(path, "unlink");
        Ok(())
    }

    pub fn statfs(&self) -> Statfs {
        Statfs {
            block_size: self.config.statfs_block_size,
            blocks: self.config.statfs_blocks,
            bfree: self.config.statfs_blocks,
            bavail: self.config.statfs_blocks,
        }
    }
}
