//! The surfaced error type shared by every engine and by `FsMount`
//! (`spec.md` §6 "Errors").

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    #[error("invalid image")]
    InvalidImage,
    #[error("bad block")]
    BadBlock,
    #[error("volume is read-only")]
    ReadOnly,
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    Exists,
    #[error("invalid name")]
    InvalidName,
    #[error("invalid mode for this operation")]
    InvalidMode,
    #[error("disk full")]
    DiskFull,
    #[error("file too large")]
    FileTooLarge,
    #[error("entry is damaged")]
    Damaged,
    #[error("open conflict")]
    OpenConflict,
    #[error("access denied")]
    AccessDenied,
    #[error("index out of range")]
    OutOfRange,
    #[error("operation not supported by this format")]
    NotSupported,
}

pub type Result<T> = core::result::Result<T, Error>;

impl From<paleofs_io::ChunkError> for Error {
    fn from(value: paleofs_io::ChunkError) -> Self {
        match value {
            paleofs_io::ChunkError::BadBlock => Error::BadBlock,
            paleofs_io::ChunkError::OutOfRange => Error::OutOfRange,
            paleofs_io::ChunkError::AccessDenied => Error::AccessDenied,
        }
    }
}

impl From<paleofs_common::AllocError> for Error {
    fn from(value: paleofs_common::AllocError) -> Self {
        match value {
            paleofs_common::AllocError::DiskFull => Error::DiskFull,
            paleofs_common::AllocError::OutOfRange => Error::OutOfRange,
            paleofs_common::AllocError::TransactionAlreadyOpen => Error::InvalidMode,
            paleofs_common::AllocError::NoActiveTransaction => Error::InvalidMode,
        }
    }
}
