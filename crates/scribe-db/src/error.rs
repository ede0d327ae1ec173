//! Error type shared by every query module.

use thiserror::Error;

/// Result alias for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by the persistence layer.
///
/// Lookup and storage failures are fatal to the calling operation; callers
/// must not assume any part of a failed write was applied.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A non-deleted project already uses this name.
    #[error("a project named {0:?} already exists")]
    DuplicateName(String),

    /// The requested row does not exist.
    #[error("{entity} {key} not found")]
    NotFound { entity: &'static str, key: String },

    /// The database was unreachable or rejected the statement.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl StoreError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    /// `true` for [`StoreError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Returns `true` when `err` is a unique-constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}
