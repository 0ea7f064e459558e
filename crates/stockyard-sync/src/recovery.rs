//! # Disaster Recovery
//!
//! Last resort of the pull: when a remote snapshot cannot be merged
//! without breaking a uniqueness constraint, the local catalog is replaced
//! by a deduplicated copy of the snapshot.
//!
//! ```text
//! remote snapshot ──► dedupe_snapshot ──► one unit of work:
//!                     (identity key,        count what is lost
//!                      newest wins,         delete every item
//!                      clear colliding      drop PRODUCT outbox entries
//!                      barcodes)            insert the kept records
//! ```
//!
//! Local-only items and unpushed edits are lost. The loss is logged at
//! `error!` and reported so the agent can warn the user.

use std::collections::HashSet;

use serde::Serialize;
use stockyard_core::reconcile::{dedupe_snapshot, identity_key};
use stockyard_core::CatalogItem;
use stockyard_db::repository::catalog::{self, normalize_identifiers};
use stockyard_db::repository::outbox;
use stockyard_db::Database;
use tracing::error;

use crate::error::SyncResult;

/// What a restore kept and what it threw away.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Items inserted from the snapshot.
    pub restored: usize,
    /// Local items with no counterpart in the snapshot.
    pub discarded_local: usize,
    /// Items whose pending push was dropped.
    pub discarded_dirty: usize,
    /// Snapshot records collapsed into a newer duplicate.
    pub duplicates_dropped: usize,
    /// Barcodes cleared because two kept records shared them.
    pub barcodes_cleared: usize,
}

/// Replaces the local catalog with a remote snapshot.
#[derive(Debug, Clone)]
pub struct DisasterRecovery {
    db: Database,
}

impl DisasterRecovery {
    pub fn new(db: Database) -> Self {
        DisasterRecovery { db }
    }

    pub async fn restore(&self, snapshot: Vec<CatalogItem>) -> SyncResult<RecoveryReport> {
        let snapshot = dedupe_snapshot(snapshot.into_iter().map(normalize_identifiers).collect());
        let remote_ids: HashSet<i64> = snapshot.records.iter().map(|r| r.id).filter(|id| *id > 0).collect();
        let remote_keys: HashSet<String> = snapshot.records.iter().map(identity_key).collect();

        let mut uow = self.db.begin().await?;

        let local = catalog::fetch_all(uow.conn()).await?;
        let discarded_local = local
            .iter()
            .filter(|item| !remote_ids.contains(&item.id) && !remote_keys.contains(&identity_key(item)))
            .count();
        let discarded_dirty = outbox::pending_product_ids(uow.conn()).await?.len();

        catalog::delete_all_items(uow.conn()).await?;
        outbox::delete_all_products(uow.conn()).await?;

        let mut restored = 0;
        for mut record in snapshot.records {
            record.quantity = record.quantity.max(0);
            if record.id > 0 && catalog::id_taken(uow.conn(), record.id).await? {
                record.id = 0;
            }
            catalog::insert_seeded(uow.conn(), &record).await?;
            restored += 1;
        }

        uow.commit(()).await?;

        let report = RecoveryReport {
            restored,
            discarded_local,
            discarded_dirty,
            duplicates_dropped: snapshot.duplicates_dropped,
            barcodes_cleared: snapshot.barcodes_cleared,
        };
        error!(
            restored = report.restored,
            discarded_local = report.discarded_local,
            discarded_dirty = report.discarded_dirty,
            duplicates_dropped = report.duplicates_dropped,
            "Local catalog replaced by remote snapshot"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use stockyard_core::{EntityType, SkuFormat, TieredMarkupCalculator};
    use stockyard_db::DbConfig;

    fn remote(id: i64, code: &str, barcode: Option<&str>, qty: i64, age_min: i64) -> CatalogItem {
        let mut item = CatalogItem::new(format!("remote {}", id))
            .with_code(code)
            .with_quantity(qty)
            .with_updated_at(Utc::now() - Duration::minutes(age_min));
        item.id = id;
        item.barcode = barcode.map(str::to_string);
        item
    }

    #[tokio::test]
    async fn test_restore_replaces_catalog() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let sku = SkuFormat::new("LOC", 6);
        let pricing = TieredMarkupCalculator::default();
        let local_only = db
            .catalog()
            .create_item(CatalogItem::new("Local only").with_quantity(2), &sku, &pricing)
            .await
            .unwrap();

        let snapshot = vec![
            remote(10, "ABC000001", Some("111"), 5, 10),
            // same code, older: dropped
            remote(11, "abc000001", Some("222"), 9, 60),
            // newer record keeps barcode 111, this one loses it
            remote(12, "ABC000002", Some("111"), -4, 30),
        ];

        let report = DisasterRecovery::new(db.clone()).restore(snapshot).await.unwrap();
        assert_eq!(report.restored, 2);
        assert_eq!(report.discarded_local, 1);
        assert_eq!(report.discarded_dirty, 1);
        assert_eq!(report.duplicates_dropped, 1);
        assert_eq!(report.barcodes_cleared, 1);

        assert!(db.catalog().get(local_only.value).await.unwrap().is_none());
        let kept = db.catalog().get(10).await.unwrap().unwrap();
        assert_eq!(kept.quantity, 5);
        let cleared = db.catalog().get(12).await.unwrap().unwrap();
        assert_eq!(cleared.barcode, None);
        assert_eq!(cleared.quantity, 0);

        assert!(db.outbox().get(EntityType::Product, local_only.value).await.unwrap().is_none());
        assert!(db.ledger().conservation_violations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restore_stores_blank_codes_as_null() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let first = remote(20, "", Some("111"), 1, 5);
        let mut second = remote(21, "", Some("222"), 2, 5);
        second.code = Some("  ".into());

        let report = DisasterRecovery::new(db.clone()).restore(vec![first, second]).await.unwrap();
        assert_eq!(report.restored, 2);
        assert_eq!(report.duplicates_dropped, 0);
        assert_eq!(db.catalog().get(20).await.unwrap().unwrap().code, None);
        assert_eq!(db.catalog().get(21).await.unwrap().unwrap().code, None);
    }
}
