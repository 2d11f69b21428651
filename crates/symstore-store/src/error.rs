use std::path::PathBuf;

use symstore_pdb::IdentityError;
use symstore_types::{TransactionId, TransactionType, TypeError};

/// Errors from symbol store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Identity of an input file could not be determined.
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("failed to copy {} to {}: {source}", src.display(), dest.display())]
    CopyFile {
        src: PathBuf,
        dest: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {}: {source}", path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to rename {} to {}: {source}", src.display(), dest.display())]
    RenameFile {
        src: PathBuf,
        dest: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ID {0} doesn't exist")]
    TransactionNotFound(TransactionId),

    #[error("transaction {id} is a {actual} transaction, expected {expected}")]
    ImproperTransactionType {
        id: TransactionId,
        expected: TransactionType,
        actual: TransactionType,
    },

    #[error("compression is not supported: no CAB tool found")]
    CompressionNotSupported,

    #[error("decompression is not supported: no CAB tool found")]
    DecompressionNotSupported,

    /// The external CAB tool ran but reported failure.
    #[error("{tool} failed: {output}")]
    CabCompression { tool: String, output: String },

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl StoreError {
    pub(crate) fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ReadFile {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::WriteFile {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn copy(src: impl Into<PathBuf>, dest: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::CopyFile {
            src: src.into(),
            dest: dest.into(),
            source,
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
