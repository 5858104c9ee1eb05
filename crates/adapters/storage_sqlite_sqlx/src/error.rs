//! Storage-specific error type wrapping sqlx errors.

use ccuhub_domain::error::CcuError;

/// Errors originating from the `SQLite` state directory.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A query or connection failed.
    #[error("database error")]
    Database(#[from] sqlx::Error),

    /// Failed to (de)serialize a stored JSON value.
    #[error("JSON serialization error")]
    Json(#[from] serde_json::Error),

    /// Failed to run migrations.
    #[error("migration error")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The state directory could not be created.
    #[error("cannot prepare state directory")]
    Io(#[from] std::io::Error),

    /// The writer task is gone; nothing can be persisted any more.
    #[error("storage writer is not running")]
    WriterStopped,
}

impl StorageError {
    /// Whether retrying the same write could succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Database(
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::Database(_)
            )
        )
    }
}

impl From<StorageError> for CcuError {
    fn from(err: StorageError) -> Self {
        Self::Storage(Box::new(err))
    }
}
