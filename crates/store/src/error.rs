use thiserror::Error;

/// Errors that can occur when interacting with the durable stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be turned back into a domain value.
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// An order with this payment reference already exists.
    #[error("Duplicate payment reference: {0}")]
    DuplicatePaymentReference(String),
}

impl StoreError {
    /// Returns true for failures worth retrying (connectivity, pool exhaustion,
    /// serialization conflicts), false for data errors.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            StoreError::Database(sqlx::Error::Database(db)) => {
                // serialization_failure, deadlock_detected
                db.code().is_some_and(|c| c == "40001" || c == "40P01")
            }
            StoreError::Database(err) => matches!(
                err,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
                    | sqlx::Error::Protocol(_)
            ),
            _ => false,
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
