use std::error::Error;

use futures::future::BoxFuture;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The document changed since it was read, or already exists on create.
    #[error("storage conflict on `{key}`")]
    Conflict { key: String },
    /// The stored document could not be decoded into the expected model.
    #[error("stored document `{key}` is corrupted")]
    Corrupted {
        key: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Construct a conflict error for the given document key.
    pub fn conflict(key: impl Into<String>) -> Self {
        StorageError::Conflict { key: key.into() }
    }

    /// Construct a corruption error for a document that failed to decode.
    pub fn corrupted(key: impl Into<String>, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Corrupted {
            key: key.into(),
            source: Box::new(source),
        }
    }

    /// Whether the error is an optimistic-concurrency conflict that can be retried.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict { .. })
    }
}

/// Liveness hooks every backend exposes to the storage supervisor.
pub trait StoreHealth: Send + Sync {
    /// Cheap round-trip proving the backend answers.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Re-establish the underlying connection after a failed health check.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
