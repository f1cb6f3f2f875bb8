//! Error taxonomy.
//!
//! Two closed enumerations, one per layer:
//!
//! - [`DataError`] is the only error a repository or transaction manager
//!   returns.
//! - [`DomainError`] is the only error a use case returns.
//!
//! [`map_data_error`] is the single place where one becomes the other.
//! Nothing outside it matches on `DataError` variants.

use std::error::Error;

use thiserror::Error;

use crate::validate::ValidationError;

/// Data-layer errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataError {
    /// The requested row does not exist.
    #[error("record not found")]
    NotFound,
    /// A uniqueness constraint was violated.
    #[error("duplicate record: {0}")]
    Duplicate(String),
    /// The unit of work could not be opened, was reentered or was cancelled.
    #[error("transaction failed: {0}")]
    TransactionFailed(String),
    /// Any other storage failure, including failed commits.
    #[error("database error: {0}")]
    Database(String),
}

/// Domain-layer errors.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("symbol not found")]
    NotFound,
    #[error("invalid symbol id: {0}")]
    InvalidId(i64),
    #[error("validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
    #[error("symbol already exists")]
    Duplicate,
    /// Storage or publish failure; the write was rolled back and the whole
    /// operation may be retried.
    #[error("database operation failed")]
    DatabaseOperation(#[source] Box<dyn Error + Send + Sync>),
}

impl DomainError {
    /// Map this error to an HTTP-style status code.
    pub fn status_code(&self) -> u16 {
        match self {
            DomainError::NotFound => 404,
            DomainError::InvalidId(_) => 400,
            DomainError::ValidationFailed(_) => 400,
            DomainError::Duplicate => 409,
            DomainError::DatabaseOperation(_) => 500,
        }
    }

    /// Whether retrying the same call can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DomainError::DatabaseOperation(_))
    }
}

/// Translate a data-layer error into its domain-layer counterpart.
///
/// Total over [`DataError`]: every variant has exactly one target. The
/// original error is kept as the source of `DatabaseOperation`.
pub fn map_data_error(err: DataError) -> DomainError {
    match err {
        DataError::NotFound => DomainError::NotFound,
        DataError::Duplicate(_) => DomainError::Duplicate,
        DataError::TransactionFailed(_) | DataError::Database(_) => {
            DomainError::DatabaseOperation(Box::new(err))
        }
    }
}

impl From<DataError> for DomainError {
    fn from(err: DataError) -> Self {
        map_data_error(err)
    }
}
