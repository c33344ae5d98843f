//! Domain error taxonomy.

use store::StoreError;
use thiserror::Error;

/// Errors that can occur during domain operations.
///
/// Every failure carries a stable kind and message pair; callers map the kind
/// to a transport-level status. Raw persistence errors never cross this
/// boundary except wrapped in [`DomainError::Storage`].
#[derive(Debug, Error)]
pub enum DomainError {
    /// A referenced entity id or unique key does not resolve.
    #[error("{0}")]
    NotFound(String),

    /// A precondition the caller could have checked failed.
    #[error("{0}")]
    BadRequest(String),

    /// The actor lacks ownership or privilege for the requested mutation.
    #[error("{0}")]
    Forbidden(String),

    /// A uniqueness race not caught by pre-checks.
    #[error("{0}")]
    Conflict(String),

    /// An infrastructure failure in the store.
    #[error("storage error: {0}")]
    Storage(StoreError),
}

/// Classification of a [`DomainError`], for transport mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    BadRequest,
    Forbidden,
    Conflict,
    Storage,
}

impl DomainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::NotFound(_) => ErrorKind::NotFound,
            DomainError::BadRequest(_) => ErrorKind::BadRequest,
            DomainError::Forbidden(_) => ErrorKind::Forbidden,
            DomainError::Conflict(_) => ErrorKind::Conflict,
            DomainError::Storage(_) => ErrorKind::Storage,
        }
    }
}

impl From<StoreError> for DomainError {
    fn from(e: StoreError) -> Self {
        match e {
            // a pre-check missed a concurrent writer
            StoreError::UniqueViolation { entity, field } => {
                DomainError::Conflict(format!("duplicate {field} in {entity}"))
            }
            other => DomainError::Storage(other),
        }
    }
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;
