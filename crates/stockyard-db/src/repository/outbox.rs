//! # Sync Outbox Repository
//!
//! Tracks which entities still have local changes the remote store has not
//! seen.
//!
//! ## The Outbox Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Outbox Pattern Implementation                        │
//! │                                                                         │
//! │  LOCAL OPERATION (e.g., confirm_invoice)                                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐    │
//! │  │                   SINGLE UNIT OF WORK                           │    │
//! │  │  1. INSERT INTO invoices ...                                    │    │
//! │  │  2. UPDATE catalog_items SET quantity = quantity - ?            │    │
//! │  │  3. INSERT INTO stock_movements ...                             │    │
//! │  │  4. INSERT INTO sync_outbox (entity_type, entity_id) ...        │    │
//! │  │     ON CONFLICT DO UPDATE SET revision = revision + 1           │    │
//! │  └─────────────────────────────────────────────────────────────────┘    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  COMMIT ← all succeed or all fail                                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  PUSHER (stockyard-sync)                                                │
//! │  1. read entries (remember each revision)                               │
//! │  2. one remote batch                                                    │
//! │  3a. success → clear_observed: DELETE ... WHERE revision = observed     │
//! │  3b. failure → mark_failed: last_attempt_at, last_error                 │
//! │                                                                         │
//! │  An edit that lands while a push is in flight bumps the revision, so    │
//! │  the entry survives and is pushed again.                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use stockyard_core::{DirtyKey, EntityType, OutboxEntry, SyncState};
use tracing::debug;

use crate::error::DbResult;

const ENTRY_COLUMNS: &str =
    "entity_type, entity_id, created_at, last_attempt_at, last_error, revision";

/// Repository for sync outbox operations.
#[derive(Debug, Clone)]
pub struct OutboxRepository {
    pool: SqlitePool,
}

impl OutboxRepository {
    /// Creates a new OutboxRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OutboxRepository { pool }
    }

    /// The entry for one entity, if it has pending changes.
    pub async fn get(&self, entity_type: EntityType, entity_id: i64) -> DbResult<Option<OutboxEntry>> {
        let mut conn = self.pool.acquire().await?;
        fetch_entry(&mut conn, entity_type, entity_id).await
    }

    /// Gets pending entries, oldest first.
    pub async fn pending(&self, limit: u32) -> DbResult<Vec<OutboxEntry>> {
        let entries = sqlx::query_as::<_, OutboxEntry>(&format!(
            "SELECT {} FROM sync_outbox ORDER BY created_at ASC, entity_id ASC LIMIT ?1",
            ENTRY_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    /// Current entries for the given keys; keys without an entry are
    /// skipped.
    pub async fn entries_for(&self, keys: &[DirtyKey]) -> DbResult<Vec<OutboxEntry>> {
        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(entry) = self.get(key.entity_type, key.entity_id).await? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Counts pending sync entries.
    pub async fn count_pending(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_outbox")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Counts entries whose last push failed.
    pub async fn count_failed(&self) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sync_outbox WHERE last_error IS NOT NULL")
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    /// Derived sync state of one entity.
    pub async fn sync_state(&self, entity_type: EntityType, entity_id: i64) -> DbResult<SyncState> {
        let entry = self.get(entity_type, entity_id).await?;
        Ok(SyncState::from_entry(entry.as_ref()))
    }

    /// Removes entries unconditionally after a successful push.
    pub async fn mark_pushed(&self, entity_type: EntityType, ids: &[i64]) -> DbResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("DELETE FROM sync_outbox WHERE entity_type = ");
        qb.push_bind(entity_type).push(" AND entity_id IN (");
        let mut sep = qb.separated(", ");
        for id in ids {
            sep.push_bind(*id);
        }
        sep.push_unseparated(")");

        let result = qb.build().execute(&self.pool).await?;
        debug!(entity_type = %entity_type, count = result.rows_affected(), "Outbox entries cleared");
        Ok(result.rows_affected())
    }

    /// Removes entries only if nobody re-marked them since they were read.
    ///
    /// ## Returns
    /// Number of entries removed; the rest were re-marked during the push
    /// and stay queued.
    pub async fn clear_observed(&self, observed: &[OutboxEntry]) -> DbResult<u64> {
        let mut cleared = 0;
        let mut tx = self.pool.begin().await?;
        for entry in observed {
            let result = sqlx::query(
                r#"
                DELETE FROM sync_outbox
                WHERE entity_type = ?1 AND entity_id = ?2 AND revision = ?3
                "#,
            )
            .bind(entry.entity_type)
            .bind(entry.entity_id)
            .bind(entry.revision)
            .execute(&mut *tx)
            .await?;
            cleared += result.rows_affected();
        }
        tx.commit().await?;

        debug!(observed = observed.len(), cleared, "Outbox entries cleared");
        Ok(cleared)
    }

    /// Records a failed push attempt; the entries stay queued.
    pub async fn mark_failed(
        &self,
        entity_type: EntityType,
        ids: &[i64],
        attempt_time: DateTime<Utc>,
        error: &str,
    ) -> DbResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE sync_outbox SET last_attempt_at = ");
        qb.push_bind(attempt_time)
            .push(", last_error = ")
            .push_bind(error)
            .push(" WHERE entity_type = ")
            .push_bind(entity_type)
            .push(" AND entity_id IN (");
        let mut sep = qb.separated(", ");
        for id in ids {
            sep.push_bind(*id);
        }
        sep.push_unseparated(")");

        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Product ids queued for push whose local row is gone.
    pub async fn pending_product_deletions(&self) -> DbResult<Vec<i64>> {
        let mut conn = self.pool.acquire().await?;
        pending_product_deletions(&mut conn).await
    }
}

// =============================================================================
// Row Helpers
// =============================================================================

pub async fn fetch_entry(
    conn: &mut SqliteConnection,
    entity_type: EntityType,
    entity_id: i64,
) -> DbResult<Option<OutboxEntry>> {
    let entry = sqlx::query_as::<_, OutboxEntry>(&format!(
        "SELECT {} FROM sync_outbox WHERE entity_type = ?1 AND entity_id = ?2",
        ENTRY_COLUMNS
    ))
    .bind(entity_type)
    .bind(entity_id)
    .fetch_optional(conn)
    .await?;

    Ok(entry)
}

pub(crate) async fn upsert_entry(
    conn: &mut SqliteConnection,
    entity_type: EntityType,
    entity_id: i64,
    now: DateTime<Utc>,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO sync_outbox (entity_type, entity_id, created_at, revision)
        VALUES (?1, ?2, ?3, 1)
        ON CONFLICT (entity_type, entity_id) DO UPDATE SET
            revision = revision + 1,
            last_error = NULL
        "#,
    )
    .bind(entity_type)
    .bind(entity_id)
    .bind(now)
    .execute(conn)
    .await?;

    Ok(())
}

/// Product ids queued for push whose local row is gone.
pub async fn pending_product_deletions(conn: &mut SqliteConnection) -> DbResult<Vec<i64>> {
    let ids: Vec<i64> = sqlx::query_scalar(
        r#"
        SELECT o.entity_id FROM sync_outbox o
        WHERE o.entity_type = 'PRODUCT'
          AND NOT EXISTS (SELECT 1 FROM catalog_items c WHERE c.id = o.entity_id)
        ORDER BY o.entity_id
        "#,
    )
    .fetch_all(conn)
    .await?;

    Ok(ids)
}

/// Product entries whose item still exists locally.
pub async fn pending_product_ids(conn: &mut SqliteConnection) -> DbResult<Vec<i64>> {
    let ids: Vec<i64> = sqlx::query_scalar(
        r#"
        SELECT o.entity_id FROM sync_outbox o
        JOIN catalog_items c ON c.id = o.entity_id
        WHERE o.entity_type = 'PRODUCT'
        ORDER BY o.entity_id
        "#,
    )
    .fetch_all(conn)
    .await?;

    Ok(ids)
}

/// Drops every product entry; used when a remote snapshot replaces the
/// local catalog.
pub async fn delete_all_products(conn: &mut SqliteConnection) -> DbResult<u64> {
    let result = sqlx::query("DELETE FROM sync_outbox WHERE entity_type = 'PRODUCT'")
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}

// =============================================================================
// Unit Tests
// =============================================================================
