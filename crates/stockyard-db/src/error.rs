//! # Database Error Types
//!
//! Error types for the local store and its mutation paths.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)        Rule violation (CoreError)           │
//! │       │                                   │                             │
//! │       └─────────────────┬─────────────────┘                             │
//! │                         ▼                                               │
//! │  DbError (this module) ← unit of work aborts, nothing is written        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SyncError (stockyard-sync)                                             │
//! │       │                                                                 │
//! │       └── UniqueViolation during a pull → disaster recovery             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use stockyard_core::{CoreError, ValidationError};
use thiserror::Error;

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found in database.
    ///
    /// ## When This Occurs
    /// - Updating, adjusting or deleting an item id that doesn't exist
    /// - Cancelling an unknown invoice
    /// - A sale line referencing a deleted item
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation.
    ///
    /// ## When This Occurs
    /// - A code or barcode already owned by another item
    /// - Any UNIQUE index violation reported by SQLite
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// Not enough stock for a sale line.
    #[error("Insufficient stock for item {item_id}: available {available}, requested {requested}")]
    InsufficientStock {
        item_id: i64,
        available: i64,
        requested: i64,
    },

    /// Operation not allowed in the entity's current state.
    #[error("{0}")]
    InvalidState(String),

    /// Input rejected before touching storage.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Foreign key constraint violation.
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// Database connection failed.
    ///
    /// ## When This Occurs
    /// - Database file can't be created
    /// - File permissions issue
    /// - Disk full
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Creates a UniqueViolation error.
    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        DbError::UniqueViolation {
            field: field.into(),
            value: value.into(),
        }
    }

    /// True for constraint failures the pull reconciler escalates on.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, DbError::UniqueViolation { .. })
    }
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → DbError::NotFound
/// sqlx::Error::Database       → Analyze message for constraint type
/// sqlx::Error::PoolTimedOut   → DbError::PoolExhausted
/// Other                       → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();

                // "UNIQUE constraint failed: catalog_items.code"
                if msg.contains("UNIQUE constraint failed") {
                    let field = msg
                        .split("UNIQUE constraint failed: ")
                        .nth(1)
                        .unwrap_or("unknown")
                        .to_string();
                    DbError::UniqueViolation {
                        field,
                        value: "unknown".to_string(),
                    }
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation {
                        message: msg.to_string(),
                    }
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

impl From<CoreError> for DbError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound { entity, id } => DbError::NotFound {
                entity: entity.to_string(),
                id,
            },
            CoreError::InsufficientStock {
                item_id,
                available,
                requested,
            } => DbError::InsufficientStock {
                item_id,
                available,
                requested,
            },
            CoreError::DuplicateIdentifier { field, value } => {
                DbError::UniqueViolation { field, value }
            }
            err @ CoreError::InvalidState { .. } => DbError::InvalidState(err.to_string()),
            CoreError::Validation(v) => DbError::Validation(v),
        }
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;
