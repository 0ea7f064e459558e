//! # Validation Module
//!
//! Input validation run at the top of every local mutation path.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: THIS MODULE (pure)                                            │
//! │  ├── Names, codes, barcodes, prices, quantities                         │
//! │  └── Cancel reasons, invoice drafts                                     │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: UnitOfWork (stockyard-db)                                     │
//! │  ├── Code/barcode availability checks                                   │
//! │  └── Conditional stock decrement                                        │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: SQLite                                                        │
//! │  ├── UNIQUE (code, barcode) COLLATE NOCASE                              │
//! │  └── CHECK (quantity >= 0)                                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use stockyard_core::validation::{validate_code, validate_sale_quantity};
//!
//! assert!(validate_code("ABC000001").is_ok());
//! assert!(validate_sale_quantity(5).is_ok());
//! ```

use crate::error::ValidationError;
use crate::types::{CatalogItem, ImportRow, InvoiceDraft};
use crate::MAX_LINE_QUANTITY;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

const MAX_CODE_LEN: usize = 64;
const MAX_NAME_LEN: usize = 200;
const MAX_REASON_LEN: usize = 500;

// =============================================================================
// String Validators
// =============================================================================

/// Validates an item code (SKU).
///
/// ## Rules
/// - Must not be blank
/// - At most 64 characters
/// - Letters, digits, hyphens, underscores and dots only
///
/// ## Example
/// ```rust
/// use stockyard_core::validation::validate_code;
///
/// assert!(validate_code("TEA-001").is_ok());
/// assert!(validate_code("").is_err());
/// assert!(validate_code("has space").is_err());
/// ```
pub fn validate_code(code: &str) -> ValidationResult<()> {
    let code = code.trim();

    if code.is_empty() {
        return Err(ValidationError::Required {
            field: "code".to_string(),
        });
    }

    if code.chars().count() > MAX_CODE_LEN {
        return Err(ValidationError::TooLong {
            field: "code".to_string(),
            max: MAX_CODE_LEN,
        });
    }

    if !code
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(ValidationError::InvalidFormat {
            field: "code".to_string(),
            reason: "must contain only letters, numbers, '-', '_' and '.'".to_string(),
        });
    }

    Ok(())
}

/// Validates a barcode.
///
/// ## Rules
/// - Must not be blank
/// - At most 64 characters
/// - No whitespace
pub fn validate_barcode(barcode: &str) -> ValidationResult<()> {
    let barcode = barcode.trim();

    if barcode.is_empty() {
        return Err(ValidationError::Required {
            field: "barcode".to_string(),
        });
    }

    if barcode.chars().count() > MAX_CODE_LEN {
        return Err(ValidationError::TooLong {
            field: "barcode".to_string(),
            max: MAX_CODE_LEN,
        });
    }

    if barcode.chars().any(char::is_whitespace) {
        return Err(ValidationError::InvalidFormat {
            field: "barcode".to_string(),
            reason: "must not contain whitespace".to_string(),
        });
    }

    Ok(())
}

/// Validates an item name (required, at most 200 characters).
pub fn validate_item_name(name: &str) -> ValidationResult<()> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::Required {
            field: "name".to_string(),
        });
    }

    if name.chars().count() > MAX_NAME_LEN {
        return Err(ValidationError::TooLong {
            field: "name".to_string(),
            max: MAX_NAME_LEN,
        });
    }

    Ok(())
}

/// Validates the free-text reason given when cancelling an invoice.
pub fn validate_cancel_reason(reason: &str) -> ValidationResult<()> {
    let reason = reason.trim();

    if reason.is_empty() {
        return Err(ValidationError::Required {
            field: "cancel reason".to_string(),
        });
    }

    if reason.chars().count() > MAX_REASON_LEN {
        return Err(ValidationError::TooLong {
            field: "cancel reason".to_string(),
            max: MAX_REASON_LEN,
        });
    }

    Ok(())
}

/// Validates a search query.
///
/// ## Returns
/// The trimmed query string; empty means "everything".
pub fn validate_search_query(query: &str) -> ValidationResult<String> {
    let query = query.trim();

    if query.chars().count() > 100 {
        return Err(ValidationError::TooLong {
            field: "query".to_string(),
            max: 100,
        });
    }

    Ok(query.to_string())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates the quantity of a sale line.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed MAX_LINE_QUANTITY
pub fn validate_sale_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_LINE_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_LINE_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a price in cents. Zero is allowed.
///
/// ```rust
/// use stockyard_core::validation::validate_price_cents;
///
/// assert!(validate_price_cents("list_price", 0).is_ok());
/// assert!(validate_price_cents("list_price", -1).is_err());
/// ```
pub fn validate_price_cents(field: &str, cents: i64) -> ValidationResult<()> {
    if cents < 0 {
        return Err(ValidationError::Negative {
            field: field.to_string(),
        });
    }

    Ok(())
}

/// Validates the zero-padded width of allocated SKUs.
pub fn validate_sku_width(width: usize) -> ValidationResult<()> {
    if !(1..=12).contains(&width) {
        return Err(ValidationError::OutOfRange {
            field: "sku width".to_string(),
            min: 1,
            max: 12,
        });
    }

    Ok(())
}

// =============================================================================
// Aggregate Validators
// =============================================================================

fn validate_optional_prices(prices: &[(&str, Option<i64>)]) -> ValidationResult<()> {
    for (field, value) in prices {
        if let Some(cents) = value {
            validate_price_cents(field, *cents)?;
        }
    }
    Ok(())
}

/// Validates an item about to be written by a local mutation path.
///
/// Codes and barcodes are only checked when present; allocation fills
/// them in later.
pub fn validate_item(item: &CatalogItem) -> ValidationResult<()> {
    validate_item_name(&item.name)?;

    if item.quantity < 0 {
        return Err(ValidationError::Negative {
            field: "quantity".to_string(),
        });
    }

    if let Some(code) = item.normalized_code() {
        validate_code(code)?;
    }
    if let Some(barcode) = item.normalized_barcode() {
        validate_barcode(barcode)?;
    }
    if let Some(min) = item.min_stock {
        if min < 0 {
            return Err(ValidationError::Negative {
                field: "min_stock".to_string(),
            });
        }
    }

    validate_optional_prices(&[
        ("price", item.price),
        ("purchase_price", item.purchase_price),
        ("list_price", item.list_price),
        ("cash_price", item.cash_price),
        ("transfer_price", item.transfer_price),
        ("transfer_net_price", item.transfer_net_price),
        ("ml_price", item.ml_price),
        ("ml3c_price", item.ml3c_price),
        ("ml6c_price", item.ml6c_price),
    ])
}

/// Validates one import row. Negative quantities are clamped later, not
/// rejected.
pub fn validate_import_row(row: &ImportRow) -> ValidationResult<()> {
    validate_item_name(&row.name)?;

    if let Some(code) = row.normalized_code() {
        validate_code(code)?;
    }
    if let Some(barcode) = row.normalized_barcode() {
        validate_barcode(barcode)?;
    }

    validate_optional_prices(&[
        ("price", row.price),
        ("purchase_price", row.purchase_price),
        ("list_price", row.list_price),
        ("cash_price", row.cash_price),
        ("transfer_price", row.transfer_price),
    ])
}

/// Validates a sale before any stock is touched.
pub fn validate_invoice_draft(draft: &InvoiceDraft) -> ValidationResult<()> {
    if draft.lines.is_empty() {
        return Err(ValidationError::Required {
            field: "invoice lines".to_string(),
        });
    }

    for line in &draft.lines {
        validate_sale_quantity(line.quantity)?;
        validate_price_cents("unit_price", line.unit_price)?;
    }

    validate_price_cents("taxes", draft.taxes)?;
    validate_price_cents("discount", draft.discount)?;
    validate_price_cents("surcharge", draft.surcharge)?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
