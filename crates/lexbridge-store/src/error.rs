use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// Optimistic write lost against a concurrent writer.
    #[error("Version conflict (expected version {expected})")]
    Conflict { expected: i64 },

    /// Insert collided with a uniqueness constraint.
    #[error("Duplicate record")]
    Duplicate,

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// The call did not complete within the configured timeout, or the
    /// worker running it died.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A previous call panicked while holding the connection.
    #[error("Store lock poisoned")]
    Poisoned,
}

impl StoreError {
    /// Whether retrying the same call later can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Conflict { .. } | StoreError::Unavailable(_)
        )
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Map "no rows" onto [`StoreError::NotFound`].
pub(crate) fn not_found(e: rusqlite::Error) -> StoreError {
    match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        other => StoreError::Sqlite(other),
    }
}

/// Map a uniqueness violation onto [`StoreError::Duplicate`].
pub(crate) fn duplicate(e: rusqlite::Error) -> StoreError {
    match e {
        rusqlite::Error::SqliteFailure(ref err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::Duplicate
        }
        other => StoreError::Sqlite(other),
    }
}
