//! # objfs — an append-optimized file-system layer over flat object storage
//!
//! Presents a hierarchical, POSIX-flavored namespace (open/read/write/
//! flush/truncate/unlink/mkdir/readdir/statfs) on top of a key/value object
//! bucket (S3/Aliyun-OSS compatible). Guarantees held throughout:
//!
//! - Files are append-only past `BLOCK_SIZE`-aligned staged block objects;
//!   random in-place rewrites are never performed against the backing
//!   store, only server-side multipart copy
//! - A file larger than `SLICE_SIZE` is split into sealed, exactly
//!   `SLICE_SIZE`-long slices plus one tail slice, tracked by a `SliceMeta`
//!   side-car so growth never needs to re-upload historical bytes
//! - A crash between a staged-block PUT and the next `SliceMeta` save is
//!   always recoverable: [`slice_file::SliceFile::open`] reconciles meta
//!   against the live object sizes on every open
//! - At most one writer holds the write slot for a given path at a time;
//!   other openers may still read
//!
//! Concurrency is plain OS threads and blocking object-store calls — there
//! is no async runtime here, and none of the user-facing mount adapters
//! (WebDAV, FUSE, Dokan) live in this crate. [`object_io::MemObjectStore`]
//! is the only concrete `ObjectIO`; real S3/OSS clients are external
//! collaborators behind the same trait.

pub mod cache_buffer;
pub mod config;
pub mod dir_cache;
pub mod error;
pub mod file_impl;
pub mod file_instance;
pub mod filesystem;
pub mod object_io;
pub mod slice_file;
pub mod slice_meta;

pub use config::FsConfig;
pub use error::{to_errno, ObjfsError, Result};
pub use filesystem::{Attr, FileHandle, Filesystem, Statfs};
pub use object_io::{MemObjectStore, ObjectIO};
