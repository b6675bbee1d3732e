//! Error types and the related `ZipResult<T>`

use thiserror::Error;

pub type ZipResult<T> = Result<T, ZipError>;

/// Coarse classification of a [`ZipError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or malformed archive structures
    Format,
    /// A compression or encryption feature this crate doesn't implement
    Unsupported,
    /// Wrong password, or data that failed its checksum/authentication tag
    Security,
    /// Caller-provided names, comments, dates or options were rejected
    Validation,
    /// The byte source or sink failed
    Resource,
}

#[derive(Debug, Error)]
pub enum ZipError {
    /// The archive contained invalid data per the format.
    #[error("Invalid Zip archive: {0}")]
    InvalidArchive(&'static str),

    /// The archive uses an unsupported feature
    #[error("Unsupported Zip archive: {0}")]
    UnsupportedArchive(String),

    /// The password verification value didn't match
    #[error("Invalid password")]
    InvalidPassword,

    /// The CRC-32 or the AES authentication code didn't match the data
    #[error("Invalid signature")]
    InvalidSignature,

    /// The entry is encrypted and no password was given
    #[error("File contains encrypted entry")]
    PasswordRequired,

    /// Compressed data couldn't be decoded
    #[error("Corrupt entry data: {0}")]
    CorruptData(String),

    /// An entry with the same name was already added
    #[error("File already exists: {0}")]
    DuplicateEntry(String),

    /// A name, comment, date, version or option was out of range
    #[error("Invalid entry: {0}")]
    InvalidEntry(String),

    /// An error reported by a byte source or sink
    #[error("Resource error: {0:#}")]
    Resource(#[from] anyhow::Error),

    /// An error from underlying I/O
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    /// An earlier write to the archive sink failed, leaving its contents
    /// unknown
    #[error("Archive sink failed while writing an earlier entry")]
    SinkFailed,

    /// A codec worker went away before answering
    #[error("Codec worker failed: {0}")]
    Worker(&'static str),
}

impl ZipError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ZipError::InvalidArchive(_) => ErrorKind::Format,
            ZipError::UnsupportedArchive(_) => ErrorKind::Unsupported,
            ZipError::InvalidPassword
            | ZipError::InvalidSignature
            | ZipError::PasswordRequired
            | ZipError::CorruptData(_) => ErrorKind::Security,
            ZipError::DuplicateEntry(_) | ZipError::InvalidEntry(_) => ErrorKind::Validation,
            ZipError::Resource(_)
            | ZipError::Io(_)
            | ZipError::SinkFailed
            | ZipError::Worker(_) => ErrorKind::Resource,
        }
    }
}
