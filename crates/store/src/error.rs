use thiserror::Error;

use crate::{AggregateId, Version};

/// Errors that can occur when interacting with the record store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The stored version did not match the version the writer expected.
    #[error(
        "Concurrency conflict for aggregate {aggregate_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        aggregate_id: AggregateId,
        expected: Version,
        actual: Version,
    },

    /// A write violated a uniqueness or integrity constraint.
    #[error("Constraint '{constraint}' violated: {detail}")]
    ConstraintViolation { constraint: String, detail: String },

    /// The transaction was already committed or rolled back.
    #[error("Transaction {0} is no longer active")]
    TransactionClosed(crate::TransactionId),

    /// The change set was malformed before it reached storage.
    #[error("Invalid change set: {0}")]
    InvalidChange(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
