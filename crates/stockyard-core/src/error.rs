//! # Error Types
//!
//! Domain-specific error types for stockyard-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  stockyard-core errors (this file)                                      │
//! │  ├── CoreError        - Ledger and catalog rule violations              │
//! │  └── ValidationError  - Input validation failures                       │
//! │                                                                         │
//! │  stockyard-db errors (separate crate)                                   │
//! │  └── DbError          - Unit-of-work failures (abort + rollback)        │
//! │                                                                         │
//! │  stockyard-sync errors (separate crate)                                 │
//! │  └── SyncError        - Remote store, config, tenant resolution         │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → SyncError                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Business rule violations raised by pure domain code.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Catalog item or invoice cannot be found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A sale line asks for more units than are on hand.
    ///
    /// ## When This Occurs
    /// ```text
    /// confirm_invoice(line: item 7 × 5)
    ///      │
    ///      ▼
    /// UPDATE ... WHERE quantity >= 5   → 0 rows
    ///      │
    ///      ▼
    /// InsufficientStock { item_id: 7, available: 3, requested: 5 }
    ///      │
    ///      ▼
    /// whole invoice rolled back
    /// ```
    #[error("Insufficient stock for item {item_id}: available {available}, requested {requested}")]
    InsufficientStock {
        item_id: i64,
        available: i64,
        requested: i64,
    },

    /// A code or barcode is already owned by another item.
    #[error("{field} '{value}' is already in use")]
    DuplicateIdentifier { field: String, value: String },

    /// The entity is not in a state that allows the operation.
    #[error("{entity} {id} is {state}, cannot {operation}")]
    InvalidState {
        entity: &'static str,
        id: i64,
        state: String,
        operation: &'static str,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too short.
    #[error("{field} must be at least {min} characters")]
    TooShort { field: String, min: usize },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    Negative { field: String },

    /// Invalid format (bad characters, unparseable date).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
