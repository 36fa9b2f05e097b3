//! Error types for realmshop storage.

use realmshop_core::ShopError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
///
/// Callers discriminate three kinds of failure: validation rejections
/// ([`StoreError::Rejected`], terminal, nothing changed), conflicts with existing
/// rows ([`StoreError::Conflict`], terminal), and infrastructure failures
/// ([`StoreError::Database`], retryable).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// A stored row could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record.
        entity: &'static str,
        /// Key that was looked up.
        id: String,
    },

    /// A unique key already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The operation was rejected by ledger validation inside the transaction.
    #[error(transparent)]
    Rejected(#[from] ShopError),
}

impl StoreError {
    /// Build a [`StoreError::NotFound`].
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether retrying the same call may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::Conflict(db.message().to_string())
            }
            sqlx::Error::Decode(e) | sqlx::Error::ColumnDecode { source: e, .. } => {
                Self::Serialization(e.to_string())
            }
            _ => Self::Database(err.to_string()),
        }
    }
}

impl From<realmshop_core::IdError> for StoreError {
    fn from(err: realmshop_core::IdError) -> Self {
        Self::Serialization(err.to_string())
    }
}
