//! Internal error type and its mapping onto POSIX errno values.

#[derive(Debug, Clone, thiserror::Error)]
pub enum FsError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("directory not empty: {0}")]
    NotEmpty(String),
    #[error("bad handle: {0}")]
    BadHandle(u64),
    #[error("out of handles")]
    OutOfHandles,
    #[error("out of memory")]
    NoMemory,
    #[error("out of range")]
    OutOfRange,
    #[error("backend io error: {0}")]
    BackendIo(String),
    #[error("unsupported")]
    Unsupported,
    #[error("permission denied: {0}")]
    Permission(String),
    #[error("invalid argument: {0}")]
    InvalidArg(String),
}

/// Maps an internal error onto a negative errno, matching the ErrorMap table.
pub fn to_errno(err: &FsError) -> i32 {
    use FsError::*;
    match err {
        NotFound(_) => -libc::ENOENT,
        NotADirectory(_) => -libc::ENOTDIR,
        NotEmpty(_) => -libc::ENOTEMPTY,
        BadHandle(_) => -libc::EBADF,
        OutOfHandles => -libc::ENFILE,
        NoMemory => -libc::ENOMEM,
        OutOfRange => -libc::EROFS,
        BackendIo(_) => -libc::EIO,
        Unsupported => -libc::ENOTSUP,
        Permission(_) => -libc::EACCES,
        InvalidArg(_) => -libc::EINVAL,
    }
}

/// `fuser`'s `reply.error()` wants a positive errno, the reverse of [`to_errno`].
pub fn to_positive_errno(err: &FsError) -> i32 {
    -to_errno(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping_is_positive_for_fuser() {
        assert_eq!(to_positive_errno(&FsError::NotFound("/x".into())), libc::ENOENT);
        assert_eq!(to_positive_errno(&FsError::OutOfHandles), libc::ENFILE);
        assert_eq!(to_positive_errno(&FsError::Unsupported), libc::ENOTSUP);
    }

    #[test]
    fn to_errno_is_negative() {
        assert!(to_errno(&FsError::NoMemory) < 0);
    }
}
