//! # Repository Module
//!
//! Database repositories for Stockyard.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Layout                                    │
//! │                                                                         │
//! │  Inventory facade (stockyard-sync)                                      │
//! │       │                                                                 │
//! │       │  db.catalog().adjust_stock(id, -2, DAMAGE, None)                │
//! │       ▼                                                                 │
//! │  CatalogRepository ───┐                                                 │
//! │  InvoiceRepository ───┼──► UnitOfWork ──► ledger + outbox row helpers   │
//! │  (import_items) ──────┘                                                 │
//! │                                                                         │
//! │  LedgerRepository, OutboxRepository, TenantConfigRepository: reads      │
//! │  and bookkeeping outside a unit of work                                 │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite Database                                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`catalog::CatalogRepository`] - Item reads, mutation paths, bulk import
//! - [`ledger::LedgerRepository`] - Movement history and conservation checks
//! - [`outbox::OutboxRepository`] - Pending pushes
//! - [`invoice::InvoiceRepository`] - Sales and cancellations
//! - [`tenant::TenantConfigRepository`] - Cached SKU settings

pub mod catalog;
pub mod import;
pub mod invoice;
pub mod ledger;
pub mod outbox;
pub mod tenant;
