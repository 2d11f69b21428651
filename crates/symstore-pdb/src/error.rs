use std::path::PathBuf;

use thiserror::Error;

/// Errors from identifying and decoding binary files.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("{0}: file not found")]
    FileNotExists(PathBuf),

    #[error("{0}: not a known file type")]
    UnknownFileType(PathBuf),

    #[error("{path}: invalid PE file: {reason}")]
    InvalidPeFile { path: PathBuf, reason: String },

    /// A file whose signature matched could not be decoded.
    #[error("{path}: failed to parse file: {source}")]
    ParseFile {
        path: PathBuf,
        #[source]
        source: Box<IdentityError>,
    },

    #[error("{0}: PDB signature not found")]
    SignatureNotFound(PathBuf),

    #[error("invalid stream index {index} (stream count {count})")]
    InvalidStreamIndex { index: usize, count: usize },

    /// Structural problem at a given byte offset.
    #[error("corrupt data at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },

    /// Headers are not those of a PE image.
    #[error("bad PE format: {0}")]
    PeFormat(String),

    /// The signature of the requested format did not match.
    #[error("signature mismatch")]
    SignatureMismatch,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IdentityError {
    pub(crate) fn corrupt(offset: usize, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            offset: offset as u64,
            reason: reason.into(),
        }
    }
}

/// Result alias for identity operations.
pub type IdentityResult<T> = Result<T, IdentityError>;
