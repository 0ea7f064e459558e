//! # stockyard-db: Local Transactional Store
//!
//! SQLite storage for the catalog, the stock ledger, the sync outbox and
//! invoices, plus every local mutation path.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Stockyard Data Flow                              │
//! │                                                                         │
//! │  Inventory facade (stockyard-sync)                                      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐    │
//! │  │                  stockyard-db (THIS CRATE)                      │    │
//! │  │                                                                 │    │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐    │    │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │    │    │
//! │  │   │   (pool.rs)   │    │ catalog       │    │  (embedded)  │    │    │
//! │  │   │               │    │ ledger        │    │              │    │    │
//! │  │   │ SqlitePool    │◄───│ outbox        │    │ 001..005     │    │    │
//! │  │   │ UnitOfWork    │    │ invoice       │    │              │    │    │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘    │    │
//! │  │                                                                 │    │
//! │  └─────────────────────────────────────────────────────────────────┘    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐    │
//! │  │                     SQLite Database (WAL)                       │    │
//! │  └─────────────────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`unit_of_work`] - Transaction boundary with ledger and outbox writes
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stockyard_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("path/to/stockyard.db")).await?;
//! let committed = db.catalog().adjust_stock(id, -2, MovementReason::Damage, None).await?;
//! pusher.enqueue(committed.dirty);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod unit_of_work;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use unit_of_work::{Committed, Savepoint, UnitOfWork};

// Repository re-exports for convenience
pub use repository::catalog::CatalogRepository;
pub use repository::import::simulate_import;
pub use repository::invoice::InvoiceRepository;
pub use repository::ledger::LedgerRepository;
pub use repository::outbox::OutboxRepository;
pub use repository::tenant::TenantConfigRepository;
