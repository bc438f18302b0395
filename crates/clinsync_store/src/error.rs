//! Error types for state stores.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in a state store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// An underlying I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The store's data directory is locked by another process.
    #[error("state directory {path} is locked by another process")]
    Locked {
        /// The contested directory.
        path: String,
    },

    /// A key contained characters that cannot form a file name.
    #[error("invalid store key: {key}")]
    InvalidKey {
        /// The offending key.
        key: String,
    },
}
