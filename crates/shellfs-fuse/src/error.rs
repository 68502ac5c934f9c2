//! Error handling and errno mapping for the FUSE layer.

use std::io;
use thiserror::Error;

/// Errors raised by filesystem operations before they are translated to
/// POSIX error codes for the kernel.
///
/// The entry kind set is closed, so the "kind not representable" failure
/// mode of a structurally-typed design cannot occur here: every dispatch
/// over [`shellfs_core::EntryKind`] is an exhaustive match.
#[derive(Debug, Error)]
pub enum FsError {
    /// Lookup failed: no entry at this path, or unknown inode.
    #[error("no such entry (inode {0})")]
    NotFound(u64),

    /// A directory operation addressed a non-directory inode.
    #[error("inode {0} is not a directory")]
    NotDirectory(u64),

    /// A file operation addressed a directory inode.
    #[error("inode {0} is a directory")]
    IsDirectory(u64),

    /// Unknown or stale file handle.
    #[error("invalid file handle: {0}")]
    BadHandle(u64),

    /// Write access requested on the read-only projection.
    #[error("filesystem is read-only")]
    ReadOnly,

    /// IO error from a source file or spawned command.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl FsError {
    /// Converts this error to a libc error code for FUSE.
    pub fn to_errno(&self) -> i32 {
        match self {
            FsError::NotFound(_) => libc::ENOENT,
            FsError::NotDirectory(_) => libc::ENOTDIR,
            FsError::IsDirectory(_) => libc::EISDIR,
            FsError::BadHandle(_) => libc::EBADF,
            FsError::ReadOnly => libc::EROFS,
            FsError::Io(e) => io_error_to_errno(e),
        }
    }
}

/// Maps an IO error to its raw OS errno, defaulting to EIO.
pub fn io_error_to_errno(e: &io::Error) -> i32 {
    e.raw_os_error().unwrap_or(libc::EIO)
}

/// Result type for FUSE operations.
pub type FsResult<T> = Result<T, FsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(FsError::NotFound(7).to_errno(), libc::ENOENT);
        assert_eq!(FsError::NotDirectory(7).to_errno(), libc::ENOTDIR);
        assert_eq!(FsError::IsDirectory(7).to_errno(), libc::EISDIR);
        assert_eq!(FsError::BadHandle(3).to_errno(), libc::EBADF);
        assert_eq!(FsError::ReadOnly.to_errno(), libc::EROFS);
    }

    #[test]
    fn test_io_error_passthrough() {
        let e = io::Error::from_raw_os_error(libc::EACCES);
        assert_eq!(FsError::Io(e).to_errno(), libc::EACCES);

        let e = io::Error::from_raw_os_error(libc::ENOENT);
        assert_eq!(io_error_to_errno(&e), libc::ENOENT);
    }

    #[test]
    fn test_io_error_without_os_code_is_eio() {
        let e = io::Error::other("custom error");
        assert_eq!(io_error_to_errno(&e), libc::EIO);
    }

    #[test]
    fn test_display_carries_context() {
        assert!(FsError::NotFound(42).to_string().contains("42"));
        assert!(FsError::BadHandle(9).to_string().contains('9'));
    }
}
