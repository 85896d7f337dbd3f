//! Error taxonomy of the proof engine.
//!
//! Within the engine a failed unification against one candidate is never an
//! error, just an empty source. The kinds below cover everything else;
//! errors reaching the multiplexer surface exactly once at the consumer.

use std::fmt;

use cogito_logic::LogicError;
use cogito_runtime::SinkClosed;
use cogito_storage::StorageError;

/// Errors raised by the engine, its components and its proof streams.
#[derive(Debug)]
pub enum EngineError {
    /// Term algebra failure (malformed term, forced unification conflict).
    Logic(LogicError),

    /// Storage backend failure; rolled back if inside a transaction.
    Storage(StorageError),

    /// A `TotallyUnsafe` component was invoked inside a hypothetical scope.
    UnsafeOperation { component: String },

    /// A component was configured or used against its contract: bad
    /// parameter names, a missing declared argument, or a handler result of
    /// a shape the context cannot accept.
    HandlerContract { detail: String },

    /// `prove` was called from inside the scheduler, or `async_prove` from
    /// outside it.
    ConcurrencyMisuse { detail: String },

    /// An operation the engine refuses to pretend it implements.
    Unsupported { detail: String },

    /// The scheduler thread could not be started.
    Scheduler { detail: String },

    /// The consuming side of a proof stream went away mid-emission.
    Canceled,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Logic(inner) => write!(f, "{}", inner),
            EngineError::Storage(inner) => write!(f, "{}", inner),
            EngineError::UnsafeOperation { component } => {
                write!(f, "component {} is totally unsafe and cannot run in a hypothetical scope", component)
            }
            EngineError::HandlerContract { detail } => {
                write!(f, "handler contract violation: {}", detail)
            }
            EngineError::ConcurrencyMisuse { detail } => {
                write!(f, "concurrency misuse: {}", detail)
            }
            EngineError::Unsupported { detail } => write!(f, "unsupported: {}", detail),
            EngineError::Scheduler { detail } => {
                write!(f, "could not start the scheduler: {}", detail)
            }
            EngineError::Canceled => write!(f, "the proof stream was closed by its consumer"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Logic(inner) => Some(inner),
            EngineError::Storage(inner) => Some(inner),
            _ => None,
        }
    }
}

impl From<LogicError> for EngineError {
    fn from(inner: LogicError) -> Self {
        EngineError::Logic(inner)
    }
}

impl From<StorageError> for EngineError {
    fn from(inner: StorageError) -> Self {
        EngineError::Storage(inner)
    }
}

impl From<SinkClosed> for EngineError {
    fn from(_: SinkClosed) -> Self {
        EngineError::Canceled
    }
}

impl From<std::io::Error> for EngineError {
    fn from(inner: std::io::Error) -> Self {
        EngineError::Scheduler {
            detail: inner.to_string(),
        }
    }
}

/// Alias for `std::result::Result<T, EngineError>`.
pub type EngineResult<T> = std::result::Result<T, EngineError>;
