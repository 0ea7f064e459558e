//! # stockyard-sync: Sync Engine for Stockyard
//!
//! Moves the local catalog, ledger and invoices to and from a tenant-scoped
//! remote document store, offline first.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Agent Architecture                          │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                      SyncAgent (Main Orchestrator)               │  │
//! │  │                                                                  │  │
//! │  │  Spawns the push worker and the pull loop                        │  │
//! │  │  Owns the Inventory facade and the SyncStatus                    │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │   Inventory    │  │PushSynchronizer│  │  PullReconciler        │    │
//! │  │                │  │                │  │                        │    │
//! │  │ Local writes   │  │ Outbox entries │  │ LWW merge with field   │    │
//! │  │ via stockyard- │  │ → one remote   │  │ defense; escalates to  │    │
//! │  │ db, enqueue    │  │ write batch    │  │ DisasterRecovery on a  │    │
//! │  │ after commit   │  │                │  │ uniqueness conflict    │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                               │                     │                   │
//! │                               └──────────┬──────────┘                   │
//! │                                          ▼                              │
//! │                               ┌──────────────────────┐                  │
//! │                               │ RemoteStore (trait)  │                  │
//! │                               │ tenants/{t}/products │                  │
//! │                               │ tenants/{t}/invoices │                  │
//! │                               │ .../product_deletions│                  │
//! │                               └──────────────────────┘                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`agent`] - Main `SyncAgent` orchestrator and status events
//! - [`cache`] - SKU prefix and item list caches
//! - [`config`] - Sync configuration (TOML file + env overrides)
//! - [`document`] - Remote document shapes
//! - [`error`] - Sync error types
//! - [`inventory`] - Facade over every local mutation
//! - [`pull`] - Pull reconciler
//! - [`push`] - Pusher and the queue-driven push worker
//! - [`recovery`] - Catalog restore from a remote snapshot
//! - [`remote`] - Remote store trait and the in-memory store
//! - [`tenant`] - Active tenant lookup
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stockyard_db::{Database, DbConfig};
//! use stockyard_sync::{InMemoryRemoteStore, SyncAgent, SyncConfig};
//!
//! let config = SyncConfig::load_or_default(None);
//! let db = Database::new(DbConfig::new("stockyard.db")).await?;
//!
//! let mut agent = SyncAgent::new(config, db, Arc::new(InMemoryRemoteStore::new()));
//! agent.start().await?;
//!
//! let inventory = agent.inventory()?;
//! inventory.adjust_stock(1, -2, StockAdjustmentReason::Damage, None).await?;
//!
//! let status = agent.status().await;
//! println!("Pending: {}", status.pending_count);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod cache;
pub mod config;
pub mod document;
pub mod error;
pub mod inventory;
pub mod pull;
pub mod push;
pub mod recovery;
pub mod remote;
pub mod tenant;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{NoOpEmitter, SyncAgent, SyncAgentBuilder, SyncAgentHandle, SyncEventEmitter, SyncStatus};
pub use cache::{ItemsCache, SkuPrefixCache};
pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use inventory::Inventory;
pub use pull::{PullReconciler, PullReport};
pub use push::{PushHandle, PushReport, PushSynchronizer, Pusher};
pub use recovery::{DisasterRecovery, RecoveryReport};
pub use remote::{Document, InMemoryRemoteStore, RemoteStore, SetMode, WriteBatch};
pub use tenant::{StaticTenantProvider, TenantProvider};
