use thiserror::Error;

/// Errors that can occur when interacting with a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique constraint was violated on insert or update.
    #[error("unique constraint violated on {entity}.{field}")]
    UniqueViolation {
        entity: &'static str,
        field: &'static str,
    },

    /// An update or delete referenced a row that does not exist.
    #[error("{entity} row {id} does not exist")]
    MissingRow { entity: &'static str, id: i64 },

    /// A stored value could not be decoded into its domain representation.
    #[error("corrupt row: {0}")]
    Decode(String),

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
