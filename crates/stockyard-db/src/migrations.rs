//! # Database Migrations
//!
//! Embedded SQL migrations for the Stockyard store.
//!
//! ## Schema
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Migration Set                                      │
//! │                                                                         │
//! │  001_catalog_items.sql     items, NOCASE unique code / barcode          │
//! │  002_stock_movements.sql   append-only ledger (no FK, no UPDATE/DELETE) │
//! │  003_sync_outbox.sql       (entity_type, entity_id) + revision          │
//! │  004_invoices.sql          invoices + invoice_items                     │
//! │  005_tenant_sku_config.sql offline tenant SKU settings                  │
//! │                                                                         │
//! │  Applied in filename order, recorded in _sqlx_migrations.               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Never edit an applied migration; add the next numbered file instead.

use sqlx::SqlitePool;
use tracing::info;

use crate::error::DbResult;

/// Migrations embedded from `migrations/sqlite` at compile time.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Runs all pending database migrations. Safe to call repeatedly.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    info!("Checking for pending migrations");

    MIGRATOR.run(pool).await?;

    info!("All migrations applied successfully");
    Ok(())
}

/// Returns `(total, applied)` migration counts for diagnostics.
pub async fn migration_status(pool: &SqlitePool) -> DbResult<(usize, usize)> {
    let total = MIGRATOR.migrations.len();

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
        .unwrap_or(0);

    Ok((total, applied as usize))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    #[tokio::test]
    async fn test_all_migrations_applied_once() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        run_migrations(db.pool()).await.unwrap();

        let (total, applied) = migration_status(db.pool()).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(applied, total);
    }
}
