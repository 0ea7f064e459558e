//! # stockyard-core: Pure Domain Logic for Stockyard
//!
//! Types and rules of the catalog, the stock ledger and the sync merge, with
//! zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Stockyard Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐    │
//! │  │                    UI layer (host application)                  │    │
//! │  └─────────────────────────────┬───────────────────────────────────┘    │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐    │
//! │  │        stockyard-sync: Inventory facade, push, pull, recovery   │    │
//! │  └─────────────────────────────┬───────────────────────────────────┘    │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐    │
//! │  │        stockyard-db: UnitOfWork, ledger, outbox, mutations      │    │
//! │  └─────────────────────────────┬───────────────────────────────────┘    │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐    │
//! │  │               ★ stockyard-core (THIS CRATE) ★                   │    │
//! │  │                                                                 │    │
//! │  │   ┌─────────┐ ┌─────────┐ ┌──────────┐ ┌──────────┐ ┌─────────┐ │    │
//! │  │   │  types  │ │  money  │ │ pricing  │ │ identity │ │reconcile│ │    │
//! │  │   └─────────┘ └─────────┘ └──────────┘ └──────────┘ └─────────┘ │    │
//! │  │                                                                 │    │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS            │    │
//! │  └─────────────────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Catalog items, movements, outbox entries, invoices, imports
//! - [`money`] - Integer-cent money
//! - [`pricing`] - Auto pricing and the calculator seam
//! - [`identity`] - Id/barcode/code index and SKU helpers
//! - [`reconcile`] - Last-writer-wins, field defense, snapshot dedupe
//! - [`validation`] - Input checks for mutation paths
//! - [`error`] - Domain error types

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod identity;
pub mod money;
pub mod pricing;
pub mod reconcile;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use identity::{CatalogIndex, MatchedBy, SkuFormat};
pub use money::Money;
pub use pricing::{apply_auto_pricing, PricedFields, PricingCalculator, TieredMarkupCalculator};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Largest quantity accepted on a single sale line.
pub const MAX_LINE_QUANTITY: i64 = 9_999;

/// Zero-padded width of allocated SKU sequences.
pub const DEFAULT_SKU_WIDTH: usize = 6;

/// Longest error text stored on an outbox entry.
pub const SYNC_ERROR_MAX_LEN: usize = 512;

/// Truncates an error message to at most `max` characters.
pub fn truncate_error(message: &str, max: usize) -> String {
    message.chars().take(max).collect()
}
