//! Crate-wide error type and the negative-errno convention exposed to
//! callers that need the raw POSIX-style codes (CLI, adapters).

use thiserror::Error;

/// Every fallible operation in this crate returns this error.
#[derive(Error, Debug)]
pub enum ObjfsError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("busy: {0}")]
    Busy(String),

    #[error("invalid: {0}")]
    Invalid(String),

    #[error("object store I/O error: {0}")]
    Io(String),

    #[error("inconsistent state: {0}")]
    Inconsistent(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ObjfsError>;

/// The externally visible error codes from the façade's surface shape.
pub mod errno {
    pub const OK: i32 = 0;
    pub const EPERM: i32 = -1;
    pub const ENOENT: i32 = -2;
    pub const EIO: i32 = -5;
    pub const EBUSY: i32 = -16;
    pub const EEXIST: i32 = -17;
    pub const ENOTDIR: i32 = -20;
    pub const EISDIR: i32 = -21;
    pub const EINVAL: i32 = -22;
    pub const ENOSYS: i32 = -38;
}

/// Map an [`ObjfsError`] onto the negative-errno convention in the spec.
///
/// This is the only place that convention is encoded; adapters (a CLI,
/// a FUSE binding) should call this rather than matching on [`ObjfsError`]
/// variants themselves.
pub fn to_errno(err: &ObjfsError) -> i32 {
    match err {
        ObjfsError::NotFound(_) => errno::ENOENT,
        ObjfsError::AlreadyExists(_) => errno::EEXIST,
        ObjfsError::PermissionDenied(_) => errno::EPERM,
        ObjfsError::Busy(_) => errno::EBUSY,
        ObjfsError::Invalid(_) => errno::EINVAL,
        ObjfsError::Io(_) => errno::EIO,
        ObjfsError::Inconsistent(_) => errno::EIO,
        ObjfsError::Unsupported(_) => errno::ENOSYS,
        ObjfsError::Internal(_) => errno::EIO,
    }
}
