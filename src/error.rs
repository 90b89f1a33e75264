//! Error types shared by the volatile VFS and the replication adapter.

use std::os::raw::c_int;

use libsqlite3_sys as ffi;
use thiserror::Error;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the volatile file system and the WAL replication
/// adapter.
///
/// Each variant maps onto a single SQLite result code via
/// [`Error::sqlite_code`], which is what the engine-facing callbacks
/// return. The user-facing facade returns the variants themselves.
#[derive(Error, Debug)]
pub enum Error {
    /// The file could not be opened. `errno` holds the host errno that
    /// the VFS also records as its last error.
    #[error("unable to open volatile file {name}")]
    CantOpen { name: String, errno: i32 },

    /// Delete was asked to remove a file that does not exist.
    #[error("no such volatile file: {0}")]
    DeleteNotFound(String),

    /// Delete was asked to remove a file that still has open handles.
    #[error("volatile file {0} is still referenced")]
    DeleteBusy(String),

    /// The read hit a region that was never written. The destination
    /// buffer has been zero-filled.
    #[error("short read of volatile file")]
    ShortRead,

    /// A read that does not match any legal page or frame shape.
    #[error("invalid read of {len} bytes at offset {offset}")]
    InvalidRead { offset: u64, len: usize },

    /// A write that does not match any legal page or frame shape.
    #[error("invalid write of {len} bytes at offset {offset}")]
    InvalidWrite { offset: u64, len: usize },

    /// A truncation to a size that is not reachable from the current
    /// file layout.
    #[error("cannot truncate volatile file to {size} bytes")]
    InvalidTruncate { size: u64 },

    /// A page size that is not a power of two in the supported range.
    #[error("invalid page size {0}")]
    InvalidPageSize(u32),

    /// An attempt to change the page size after it has been recorded.
    #[error("changing page size is not supported")]
    PageSizeChanged,

    /// A WAL file operation needed the page size of its database, but no
    /// database with a recorded page size exists under the derived name.
    #[error("no database page size recorded for WAL {0}")]
    UnknownWalPageSize(String),

    /// Shared memory regions must be mapped densely, one at a time.
    #[error("shared memory region {0} requested out of order")]
    InvalidShmRegion(usize),

    /// A name that cannot cross the engine boundary (embedded NUL).
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// Dump refuses to write outside its target directory.
    #[error("cannot dump absolute file path {0}")]
    AbsolutePath(String),

    /// A replication is already registered under this name.
    #[error("replication {0} is already registered")]
    AlreadyRegistered(String),

    /// No replication is registered under this name, or the hook set is
    /// not known to the registry.
    #[error("no replication registered under {0}")]
    NotRegistered(String),

    /// The connection is already driving a replication as leader.
    #[error("connection is already a replication leader")]
    AlreadyLeader,

    /// A follower frame batch whose page payload does not match its
    /// frame count.
    #[error("frame batch payload of {len} bytes does not match {frames} frames of {page_size} bytes")]
    FrameBatchMismatch {
        len: usize,
        frames: usize,
        page_size: usize,
    },

    /// An engine call failed with the given result code.
    #[error("engine error code {0}")]
    Engine(i32),

    /// Host file system error while dumping.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The SQLite result code reported to the engine for this error.
    pub fn sqlite_code(&self) -> c_int {
        match self {
            Error::CantOpen { .. } => ffi::SQLITE_CANTOPEN,
            Error::DeleteNotFound(_) => ffi::SQLITE_IOERR_DELETE_NOENT,
            Error::DeleteBusy(_) => ffi::SQLITE_IOERR_DELETE,
            Error::ShortRead => ffi::SQLITE_IOERR_SHORT_READ,
            Error::InvalidRead { .. } => ffi::SQLITE_IOERR_READ,
            Error::InvalidWrite { .. }
            | Error::InvalidTruncate { .. }
            | Error::InvalidPageSize(_)
            | Error::PageSizeChanged => ffi::SQLITE_IOERR_WRITE,
            Error::UnknownWalPageSize(_) | Error::InvalidShmRegion(_) => ffi::SQLITE_IOERR,
            Error::Engine(code) => *code,
            Error::InvalidName(_)
            | Error::AbsolutePath(_)
            | Error::AlreadyRegistered(_)
            | Error::NotRegistered(_)
            | Error::AlreadyLeader
            | Error::FrameBatchMismatch { .. }
            | Error::Io(_) => ffi::SQLITE_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_engine_expectations() {
        let err = Error::CantOpen {
            name: "test.db".into(),
            errno: libc::ENOENT,
        };
        assert_eq!(err.sqlite_code(), ffi::SQLITE_CANTOPEN);
        assert_eq!(Error::ShortRead.sqlite_code(), ffi::SQLITE_IOERR_SHORT_READ);
        assert_eq!(
            Error::DeleteBusy("x".into()).sqlite_code(),
            ffi::SQLITE_IOERR_DELETE
        );
        assert_eq!(
            Error::DeleteNotFound("x".into()).sqlite_code(),
            ffi::SQLITE_IOERR_DELETE_NOENT
        );
        assert_eq!(
            Error::Engine(ffi::SQLITE_MISUSE).sqlite_code(),
            ffi::SQLITE_MISUSE
        );
    }
}
