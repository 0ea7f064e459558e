//! # Unit of Work
//!
//! The transaction boundary around every local state change.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     One Unit of Work                                    │
//! │                                                                         │
//! │  UnitOfWork::begin(pool)          BEGIN (holds one pooled connection)   │
//! │       │                                                                 │
//! │       ├── item upsert             UPDATE catalog_items ...              │
//! │       ├── record_movement()       INSERT INTO stock_movements ...       │
//! │       ├── mark_dirty()            INSERT INTO sync_outbox ... ON        │
//! │       │                           CONFLICT DO UPDATE revision + 1       │
//! │       ▼                                                                 │
//! │  commit(value) ─────────────────► COMMIT → Committed { value, dirty }   │
//! │                                                                         │
//! │  error / early return / drop ───► ROLLBACK (nothing was written)        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Ledger rows and outbox marks can only be written through this type, so
//! a quantity change can never land without its movement and outbox entry.

use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use stockyard_core::{DirtyKey, DirtySet, EntityType, MovementReason};
use tracing::debug;

use crate::error::DbResult;
use crate::repository::{ledger, outbox};

/// Value returned by a committed unit of work with the outbox keys it
/// touched, ready for the push queue.
#[derive(Debug, Clone)]
pub struct Committed<T> {
    pub value: T,
    pub dirty: DirtySet,
}

impl<T> Committed<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Committed<U> {
        Committed {
            value: f(self.value),
            dirty: self.dirty,
        }
    }
}

/// A savepoint inside a unit of work, used to isolate one import row.
#[derive(Debug)]
pub struct Savepoint {
    name: String,
    dirty_before: DirtySet,
}

/// An open SQLite transaction plus the outbox keys marked inside it.
///
/// Dropping it without calling [`UnitOfWork::commit`] rolls back.
pub struct UnitOfWork {
    tx: Transaction<'static, Sqlite>,
    dirty: DirtySet,
    now: DateTime<Utc>,
    savepoints: u32,
}

impl UnitOfWork {
    /// Opens a transaction on one pooled connection.
    pub async fn begin(pool: &SqlitePool) -> DbResult<Self> {
        let tx = pool.begin().await?;
        Ok(Self {
            tx,
            dirty: DirtySet::new(),
            now: Utc::now(),
            savepoints: 0,
        })
    }

    /// The transaction's connection, for repository row helpers.
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    /// Timestamp shared by every row written in this unit.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn dirty(&self) -> &DirtySet {
        &self.dirty
    }

    /// Appends one ledger row.
    ///
    /// ## Returns
    /// The new movement id.
    pub async fn record_movement(
        &mut self,
        item_id: i64,
        delta: i64,
        reason: MovementReason,
        note: Option<&str>,
    ) -> DbResult<i64> {
        debug!(item_id, delta, reason = %reason, "Recording stock movement");
        let now = self.now;
        ledger::insert_movement(&mut self.tx, item_id, delta, reason, now, note).await
    }

    /// Upserts the outbox entry for an entity and remembers the key.
    ///
    /// Re-marking an entity bumps its revision and clears any stored error.
    pub async fn mark_dirty(&mut self, entity_type: EntityType, entity_id: i64) -> DbResult<()> {
        let now = self.now;
        outbox::upsert_entry(&mut self.tx, entity_type, entity_id, now).await?;
        self.dirty.insert(DirtyKey::new(entity_type, entity_id));
        Ok(())
    }

    /// Starts a nested savepoint.
    pub async fn savepoint(&mut self) -> DbResult<Savepoint> {
        self.savepoints += 1;
        let name = format!("uow_sp_{}", self.savepoints);
        sqlx::query(&format!("SAVEPOINT {}", name))
            .execute(&mut *self.tx)
            .await?;
        Ok(Savepoint {
            name,
            dirty_before: self.dirty.clone(),
        })
    }

    /// Keeps everything written since the savepoint.
    pub async fn release(&mut self, savepoint: Savepoint) -> DbResult<()> {
        sqlx::query(&format!("RELEASE {}", savepoint.name))
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    /// Discards everything written since the savepoint, including outbox
    /// keys marked after it.
    pub async fn rollback_to(&mut self, savepoint: Savepoint) -> DbResult<()> {
        sqlx::query(&format!("ROLLBACK TO {}", savepoint.name))
            .execute(&mut *self.tx)
            .await?;
        sqlx::query(&format!("RELEASE {}", savepoint.name))
            .execute(&mut *self.tx)
            .await?;
        self.dirty = savepoint.dirty_before;
        Ok(())
    }

    /// Commits and hands back `value` with the touched outbox keys.
    pub async fn commit<T>(self, value: T) -> DbResult<Committed<T>> {
        self.tx.commit().await?;
        debug!(dirty = self.dirty.len(), "Unit of work committed");
        Ok(Committed {
            value,
            dirty: self.dirty,
        })
    }

    /// Explicit rollback; equivalent to dropping the unit.
    pub async fn rollback(self) -> DbResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
