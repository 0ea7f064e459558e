//! # Stock Ledger Repository
//!
//! Read side of the append-only movement ledger, plus the single insert
//! helper used by [`UnitOfWork::record_movement`](crate::UnitOfWork::record_movement).
//!
//! ## Conservation
//! ```text
//! catalog_items.quantity  ==  catalog_items.opening_quantity
//!                              + SUM(stock_movements.delta WHERE item_id = id)
//! ```
//! `conservation_violations()` lists every item breaking the equation; a
//! healthy store returns nothing.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use stockyard_core::{LedgerMismatch, MovementReason, MovementWithItem, StockMovement};

use crate::error::DbResult;

/// Repository for stock movement history.
#[derive(Debug, Clone)]
pub struct LedgerRepository {
    pool: SqlitePool,
}

impl LedgerRepository {
    /// Creates a new LedgerRepository.
    pub fn new(pool: SqlitePool) -> Self {
        LedgerRepository { pool }
    }

    /// Movements of one item, newest first.
    pub async fn history(&self, item_id: i64, limit: u32) -> DbResult<Vec<MovementWithItem>> {
        let rows = sqlx::query_as::<_, MovementWithItem>(
            r#"
            SELECT m.id, m.item_id, c.name AS item_name, m.delta, m.reason,
                   m.ts, m.note, m.user_name
            FROM stock_movements m
            LEFT JOIN catalog_items c ON c.id = m.item_id
            WHERE m.item_id = ?1
            ORDER BY m.id DESC
            LIMIT ?2
            "#,
        )
        .bind(item_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Most recent movements across all items, newest first.
    pub async fn recent(&self, limit: u32) -> DbResult<Vec<MovementWithItem>> {
        let rows = sqlx::query_as::<_, MovementWithItem>(
            r#"
            SELECT m.id, m.item_id, c.name AS item_name, m.delta, m.reason,
                   m.ts, m.note, m.user_name
            FROM stock_movements m
            LEFT JOIN catalog_items c ON c.id = m.item_id
            ORDER BY m.id DESC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Raw movements of one item in insertion order.
    pub async fn movements(&self, item_id: i64) -> DbResult<Vec<StockMovement>> {
        let rows = sqlx::query_as::<_, StockMovement>(
            r#"
            SELECT id, item_id, delta, reason, ts, note, user_name
            FROM stock_movements
            WHERE item_id = ?1
            ORDER BY id ASC
            "#,
        )
        .bind(item_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Sum of all deltas recorded for an id, including deleted items.
    pub async fn delta_sum(&self, item_id: i64) -> DbResult<i64> {
        let mut conn = self.pool.acquire().await?;
        delta_sum(&mut conn, item_id).await
    }

    /// `opening_quantity + Σ delta` for an existing item.
    pub async fn expected_quantity(&self, item_id: i64) -> DbResult<Option<i64>> {
        let expected: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT c.opening_quantity
                   + COALESCE((SELECT SUM(m.delta) FROM stock_movements m WHERE m.item_id = c.id), 0)
            FROM catalog_items c
            WHERE c.id = ?1
            "#,
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(expected)
    }

    /// Items whose live quantity disagrees with their ledger.
    pub async fn conservation_violations(&self) -> DbResult<Vec<LedgerMismatch>> {
        let rows = sqlx::query_as::<_, LedgerMismatch>(
            r#"
            SELECT item_id, quantity, expected FROM (
                SELECT c.id AS item_id,
                       c.quantity AS quantity,
                       c.opening_quantity
                         + COALESCE((SELECT SUM(m.delta) FROM stock_movements m
                                     WHERE m.item_id = c.id), 0) AS expected
                FROM catalog_items c
            )
            WHERE quantity <> expected
            ORDER BY item_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

// =============================================================================
// Row Helpers
// =============================================================================

pub(crate) async fn insert_movement(
    conn: &mut SqliteConnection,
    item_id: i64,
    delta: i64,
    reason: MovementReason,
    ts: DateTime<Utc>,
    note: Option<&str>,
) -> DbResult<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO stock_movements (item_id, delta, reason, ts, note)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(item_id)
    .bind(delta)
    .bind(reason)
    .bind(ts)
    .bind(note)
    .execute(conn)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Σ delta for an id, used to seed the opening quantity of items inserted
/// from a remote snapshot.
pub async fn delta_sum(conn: &mut SqliteConnection, item_id: i64) -> DbResult<i64> {
    let sum: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(delta), 0) FROM stock_movements WHERE item_id = ?1",
    )
    .bind(item_id)
    .fetch_one(conn)
    .await?;

    Ok(sum)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::pool::{Database, DbConfig};
    use stockyard_core::{EntityType, MovementReason};

    #[tokio::test]
    async fn test_history_is_newest_first_and_survives_without_item() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let mut uow = db.begin().await.unwrap();
        uow.record_movement(42, 5, MovementReason::ManualReceive, Some("first"))
            .await
            .unwrap();
        uow.record_movement(42, -2, MovementReason::Damage, Some("second"))
            .await
            .unwrap();
        uow.mark_dirty(EntityType::Product, 42).await.unwrap();
        uow.commit(()).await.unwrap();

        let history = db.ledger().history(42, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].note.as_deref(), Some("second"));
        assert_eq!(history[0].reason, MovementReason::Damage);
        assert_eq!(history[0].item_name, None);
        assert_eq!(db.ledger().delta_sum(42).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_movements_cannot_be_rewritten() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let mut uow = db.begin().await.unwrap();
        uow.record_movement(1, 1, MovementReason::ManualAdjust, None)
            .await
            .unwrap();
        uow.commit(()).await.unwrap();

        let update = sqlx::query("UPDATE stock_movements SET delta = 99")
            .execute(db.pool())
            .await;
        assert!(update.is_err());

        let delete = sqlx::query("DELETE FROM stock_movements")
            .execute(db.pool())
            .await;
        assert!(delete.is_err());
    }
}
