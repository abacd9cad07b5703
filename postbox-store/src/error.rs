/// Errors produced by the store layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The underlying SQLite engine failed (I/O, corruption, locking).
    ///
    /// Always fatal for the calling operation; the store never retries.
    #[error("storage error: {0}")]
    Sqlite(#[source] rusqlite::Error),

    /// A referential or check constraint was violated, e.g. a message that
    /// points at a chat which does not exist.
    #[error("constraint violated: {0}")]
    Constraint(String),

    /// A lookup by id found no row.
    #[error("not found: {0}")]
    NotFound(String),

    /// Applying a schema migration failed.
    #[error("migration error: {0}")]
    Migration(String),

    /// Filesystem error while preparing the database location.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether this error is a benign lookup miss.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(failure, message)
                if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Self::Constraint(message.unwrap_or_else(|| failure.to_string()))
            }
            other => Self::Sqlite(other),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
