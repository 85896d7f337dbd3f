//! Error types for indexes and storage backends.

use std::fmt;

use cogito_logic::LogicError;

/// Errors raised by node stores, indexes and term storages.
#[derive(Debug)]
pub enum StorageError {
    /// Backend IO failure.
    Backend { message: String },

    /// The persisted state failed validation (checksum mismatch, dangling
    /// node reference).
    Corrupt { detail: String },

    /// An index invariant was violated: two sibling nodes for the same
    /// concrete key at one trie level, or a rebound trie edge.
    CorruptIndex { detail: String },

    /// A term could not be serialized into an opaque blob.
    Unserializable { detail: String },

    /// The backend does not support transactions at all.
    TransactionsUnsupported,

    /// Commit or rollback without a transaction in flight.
    NoActiveTransaction,

    /// This backend does not nest transactions.
    NestedTransaction,

    /// An algebra-level failure bubbled up from normalization or
    /// unification.
    Logic(LogicError),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Backend { message } => write!(f, "storage backend failure: {}", message),
            StorageError::Corrupt { detail } => write!(f, "persisted state is corrupt: {}", detail),
            StorageError::CorruptIndex { detail } => write!(f, "index invariant violated: {}", detail),
            StorageError::Unserializable { detail } => {
                write!(f, "term cannot be serialized: {}", detail)
            }
            StorageError::TransactionsUnsupported => {
                write!(f, "this storage does not support transactions")
            }
            StorageError::NoActiveTransaction => {
                write!(f, "no transaction is in flight")
            }
            StorageError::NestedTransaction => {
                write!(f, "transactions cannot be nested")
            }
            StorageError::Logic(inner) => write!(f, "{}", inner),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Logic(inner) => Some(inner),
            _ => None,
        }
    }
}

impl From<LogicError> for StorageError {
    fn from(inner: LogicError) -> Self {
        StorageError::Logic(inner)
    }
}

impl From<std::io::Error> for StorageError {
    fn from(inner: std::io::Error) -> Self {
        StorageError::Backend {
            message: inner.to_string(),
        }
    }
}

impl From<bincode::Error> for StorageError {
    fn from(inner: bincode::Error) -> Self {
        StorageError::Unserializable {
            detail: inner.to_string(),
        }
    }
}

/// Alias for `std::result::Result<T, StorageError>`.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
