//! # Pull Reconciler
//!
//! Merges the tenant's remote catalog into the local store.
//!
//! ## Pull Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         sync_down()                                     │
//! │                                                                         │
//! │  list products ──► drop tombstoned ids ──► drop ids deleted locally    │
//! │                                            but not pushed yet           │
//! │                               │                                         │
//! │                               ▼                                         │
//! │  ┌──────────────────── one unit of work ──────────────────────────┐    │
//! │  │  CatalogIndex of local items                                    │    │
//! │  │  for each remote record:                                        │    │
//! │  │    resolve (id → barcode → code)                                │    │
//! │  │      none  → insert, seeded opening quantity                    │    │
//! │  │              id changed? mark dirty                             │    │
//! │  │      match → remote newer or equal? apply with field defense,   │    │
//! │  │              REMOTE_SYNC movement for the quantity change       │    │
//! │  │              else mark local dirty (push back)                  │    │
//! │  │    update index                                                 │    │
//! │  └─────────────────────────────┬───────────────────────────────────┘    │
//! │                                │                                        │
//! │        UniqueViolation ────────┴──► rollback, DisasterRecovery          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use stockyard_core::reconcile::{merge, MergeDecision};
use stockyard_core::{CatalogIndex, CatalogItem, EntityType, MovementReason};
use stockyard_db::repository::catalog;
use stockyard_db::{Committed, Database};
use tracing::{debug, info, warn};

use crate::document::{from_document, ItemDocument};
use crate::error::SyncResult;
use crate::recovery::{DisasterRecovery, RecoveryReport};
use crate::remote::{deletions_collection, products_collection, RemoteStore};
use crate::tenant::TenantProvider;

/// Outcome of one pull.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullReport {
    /// Remote records written locally (inserted or merged).
    pub applied: usize,
    /// Local items queued to overwrite their remote copy.
    pub pushed_back: usize,
    /// Remote documents that could not be read.
    pub skipped: usize,
    /// Set when the merge gave up and the catalog was restored instead.
    pub recovery: Option<RecoveryReport>,
}

/// Downloads and merges the remote catalog.
pub struct PullReconciler {
    db: Database,
    remote: Arc<dyn RemoteStore>,
    tenants: Arc<dyn TenantProvider>,
    recovery: DisasterRecovery,
}

impl PullReconciler {
    pub fn new(db: Database, remote: Arc<dyn RemoteStore>, tenants: Arc<dyn TenantProvider>) -> Self {
        PullReconciler {
            recovery: DisasterRecovery::new(db.clone()),
            db,
            remote,
            tenants,
        }
    }

    /// Pulls the tenant's catalog.
    ///
    /// ## Returns
    /// The report with the keys to push back. Nothing is written unless
    /// the whole merge succeeds; a uniqueness conflict anywhere switches
    /// to [`DisasterRecovery`].
    pub async fn sync_down(&self) -> SyncResult<Committed<PullReport>> {
        let tenant_id = self.tenants.require_tenant_id()?;
        let (records, skipped) = self.fetch_snapshot(&tenant_id).await?;
        debug!(tenant = %tenant_id, records = records.len(), skipped, "Remote catalog fetched");

        match self.merge_snapshot(&records).await {
            Ok(mut committed) => {
                committed.value.skipped = skipped;
                info!(
                    applied = committed.value.applied,
                    pushed_back = committed.value.pushed_back,
                    "Pull merged"
                );
                Ok(committed)
            }
            Err(e) if e.is_unique_violation() => {
                warn!(error = %e, "Pull hit a uniqueness conflict, restoring from snapshot");
                let report = self.recovery.restore(records).await?;
                Ok(Committed {
                    value: PullReport {
                        applied: report.restored,
                        pushed_back: 0,
                        skipped,
                        recovery: Some(report),
                    },
                    dirty: Default::default(),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Remote records minus tombstones and pending local deletions.
    async fn fetch_snapshot(&self, tenant_id: &str) -> SyncResult<(Vec<CatalogItem>, usize)> {
        let collection = products_collection(tenant_id);
        let docs = self.remote.list(&collection).await?;

        let mut gone: HashSet<i64> = self
            .remote
            .list(&deletions_collection(tenant_id))
            .await?
            .into_iter()
            .filter_map(|(id, _)| id.parse().ok())
            .collect();
        gone.extend(self.db.outbox().pending_product_deletions().await?);

        let now = Utc::now();
        let mut records = Vec::with_capacity(docs.len());
        let mut skipped = 0;
        for (doc_id, body) in docs {
            let path = format!("{}/{}", collection, doc_id);
            let parsed = from_document::<ItemDocument>(&path, body)
                .and_then(|doc| doc.into_item(&path, &doc_id, now));
            match parsed {
                Ok(item) if item.id > 0 && gone.contains(&item.id) => {
                    debug!(id = item.id, "Skipping deleted product");
                }
                Ok(item) => records.push(item),
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable product document");
                    skipped += 1;
                }
            }
        }

        Ok((records, skipped))
    }

    async fn merge_snapshot(&self, records: &[CatalogItem]) -> SyncResult<Committed<PullReport>> {
        let mut uow = self.db.begin().await?;
        let mut index = CatalogIndex::from_items(catalog::fetch_all(uow.conn()).await?);
        let mut report = PullReport::default();

        for remote in records {
            let matched = index.resolve(remote).map(|(local, _)| local.clone());

            match matched {
                None => {
                    let mut item = remote.clone();
                    let wanted = item.id;
                    if wanted > 0 && catalog::id_taken(uow.conn(), wanted).await? {
                        item.id = 0;
                    }
                    item.id = catalog::insert_seeded(uow.conn(), &item).await?;
                    if item.id != wanted {
                        uow.mark_dirty(EntityType::Product, item.id).await?;
                        report.pushed_back += 1;
                    }
                    debug!(id = item.id, remote_id = wanted, "Inserted remote item");
                    report.applied += 1;
                    index.upsert(item);
                }
                Some(local) => match merge(&local, remote, &index) {
                    MergeDecision::ApplyRemote { merged, defended } => {
                        if merged == local {
                            continue;
                        }
                        catalog::update_item_row(uow.conn(), &merged).await?;

                        let delta = merged.quantity - local.quantity;
                        if delta != 0 {
                            uow.record_movement(
                                local.id,
                                delta,
                                MovementReason::RemoteSync,
                                Some("Remote sync"),
                            )
                            .await?;
                        }
                        if defended.any() {
                            // the remote copy still carries the rejected identifier
                            uow.mark_dirty(EntityType::Product, local.id).await?;
                            report.pushed_back += 1;
                        }
                        report.applied += 1;
                        index.upsert(merged);
                    }
                    MergeDecision::KeepLocal => {
                        uow.mark_dirty(EntityType::Product, local.id).await?;
                        report.pushed_back += 1;
                    }
                },
            }
        }

        Ok(uow.commit(report).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{to_document, DeletionTombstone};
    use crate::remote::{deletion_doc, product_doc, InMemoryRemoteStore, SetMode};
    use crate::tenant::StaticTenantProvider;
    use chrono::Duration;
    use stockyard_core::{DirtyKey, SkuFormat, TieredMarkupCalculator};
    use stockyard_db::DbConfig;

    struct Fixture {
        db: Database,
        remote: Arc<InMemoryRemoteStore>,
        pull: PullReconciler,
    }

    async fn fixture() -> Fixture {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let remote = Arc::new(InMemoryRemoteStore::new());
        let tenants = Arc::new(StaticTenantProvider::new(Some("t1".into())));
        let pull = PullReconciler::new(db.clone(), remote.clone(), tenants);
        Fixture { db, remote, pull }
    }

    async fn put_remote(remote: &InMemoryRemoteStore, item: &CatalogItem) {
        let doc = to_document(&ItemDocument::from_item(item, "t1", "other-device")).unwrap();
        remote.set(&product_doc("t1", item.id), doc, SetMode::Replace).await.unwrap();
    }

    fn remote_item(id: i64, code: &str, barcode: &str, qty: i64) -> CatalogItem {
        let mut item = CatalogItem::new(format!("Remote {}", id))
            .with_code(code)
            .with_barcode(barcode)
            .with_quantity(qty);
        item.id = id;
        item
    }

    async fn create_local(db: &Database, code: &str, barcode: &str, qty: i64) -> i64 {
        let item = CatalogItem::new(format!("Local {}", code))
            .with_code(code)
            .with_barcode(barcode)
            .with_quantity(qty);
        db.catalog()
            .create_item(item, &SkuFormat::new("ABC", 6), &TieredMarkupCalculator::default())
            .await
            .unwrap()
            .value
    }

    #[tokio::test]
    async fn test_inserts_new_remote_items() {
        let fx = fixture().await;
        put_remote(&fx.remote, &remote_item(7, "ABC000007", "777", 4)).await;

        let pulled = fx.pull.sync_down().await.unwrap();
        assert_eq!(pulled.value.applied, 1);
        assert!(pulled.dirty.is_empty());

        let item = fx.db.catalog().get(7).await.unwrap().unwrap();
        assert_eq!(item.quantity, 4);
        assert!(fx.db.ledger().conservation_violations().await.unwrap().is_empty());

        // a second pull changes nothing
        let again = fx.pull.sync_down().await.unwrap();
        assert_eq!(again.value.applied, 0);
        assert!(fx.db.ledger().movements(7).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_push_then_pull_on_another_device() {
        let fx = fixture().await;
        let id = create_local(&fx.db, "", "", 5).await;
        let config = crate::config::SyncConfig::default();
        let tenants = Arc::new(StaticTenantProvider::new(Some("t1".into())));
        let pusher = crate::push::Pusher::new(fx.db.clone(), fx.remote.clone(), tenants.clone(), &config);
        let pushed = pusher.push(&[DirtyKey::product(id)].into_iter().collect()).await;
        assert_eq!(pushed.pushed, 1);

        let other = Database::new(DbConfig::in_memory()).await.unwrap();
        let pull = PullReconciler::new(other.clone(), fx.remote.clone(), tenants);
        let pulled = pull.sync_down().await.unwrap();
        assert_eq!(pulled.value.applied, 1);
        assert!(pulled.dirty.is_empty());

        let mine = fx.db.catalog().get(id).await.unwrap().unwrap();
        let theirs = other.catalog().get(id).await.unwrap().unwrap();
        assert_eq!(theirs.code, mine.code);
        assert_eq!(theirs.barcode, mine.barcode);
        assert_eq!(theirs.name, mine.name);
        assert_eq!(theirs.quantity, 5);
        assert!(other.ledger().conservation_violations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_barcode_match_updates_instead_of_inserting() {
        let fx = fixture().await;
        let id = create_local(&fx.db, "ABC000001", "111", 2).await;
        fx.db.outbox().mark_pushed(EntityType::Product, &[id]).await.unwrap();

        let mut remote = remote_item(900, "ABC000001", "111", 9);
        remote.updated_at = Utc::now() + Duration::minutes(1);
        put_remote(&fx.remote, &remote).await;

        let pulled = fx.pull.sync_down().await.unwrap();
        assert_eq!(pulled.value.applied, 1);
        assert_eq!(fx.db.catalog().count().await.unwrap(), 1);
        assert!(fx.db.catalog().get(900).await.unwrap().is_none());
        assert_eq!(fx.db.catalog().get(id).await.unwrap().unwrap().quantity, 9);
    }

    #[tokio::test]
    async fn test_lww_newer_remote_wins() {
        let fx = fixture().await;
        let id = create_local(&fx.db, "ABC000001", "111", 10).await;
        fx.db.outbox().mark_pushed(EntityType::Product, &[id]).await.unwrap();

        let mut remote = fx.db.catalog().get(id).await.unwrap().unwrap();
        remote.quantity = 6;
        remote.name = "Renamed elsewhere".into();
        remote.updated_at = remote.updated_at + Duration::minutes(5);
        put_remote(&fx.remote, &remote).await;

        let pulled = fx.pull.sync_down().await.unwrap();
        assert_eq!(pulled.value.applied, 1);
        assert_eq!(pulled.value.pushed_back, 0);

        let local = fx.db.catalog().get(id).await.unwrap().unwrap();
        assert_eq!(local.quantity, 6);
        assert_eq!(local.name, "Renamed elsewhere");
        let movements = fx.db.ledger().movements(id).await.unwrap();
        let last = movements.iter().find(|m| m.reason == MovementReason::RemoteSync).unwrap();
        assert_eq!(last.delta, -4);
        assert!(fx.db.ledger().conservation_violations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lww_older_remote_is_pushed_back() {
        let fx = fixture().await;
        let id = create_local(&fx.db, "ABC000001", "111", 10).await;
        fx.db.outbox().mark_pushed(EntityType::Product, &[id]).await.unwrap();

        let mut remote = fx.db.catalog().get(id).await.unwrap().unwrap();
        remote.quantity = 1;
        remote.updated_at = remote.updated_at - Duration::hours(1);
        put_remote(&fx.remote, &remote).await;

        let pulled = fx.pull.sync_down().await.unwrap();
        assert_eq!(pulled.value.pushed_back, 1);
        assert!(pulled.dirty.contains(&DirtyKey::product(id)));
        assert_eq!(fx.db.catalog().get(id).await.unwrap().unwrap().quantity, 10);
    }

    #[tokio::test]
    async fn test_field_defense_keeps_code_owned_elsewhere() {
        let fx = fixture().await;
        let a = create_local(&fx.db, "ABC000001", "111", 1).await;
        let b = create_local(&fx.db, "ABC000002", "222", 1).await;
        fx.db.outbox().mark_pushed(EntityType::Product, &[a, b]).await.unwrap();

        // remote copy of A claims B's code
        let mut remote = fx.db.catalog().get(a).await.unwrap().unwrap();
        remote.code = Some("ABC000002".into());
        remote.name = "Edited elsewhere".into();
        remote.updated_at = remote.updated_at + Duration::minutes(1);
        put_remote(&fx.remote, &remote).await;

        let pulled = fx.pull.sync_down().await.unwrap();
        assert!(pulled.value.recovery.is_none());
        let merged = fx.db.catalog().get(a).await.unwrap().unwrap();
        assert_eq!(merged.name, "Edited elsewhere");
        assert_eq!(merged.code.as_deref(), Some("ABC000001"));
        assert_eq!(merged.barcode.as_deref(), Some("111"));
        assert!(pulled.dirty.contains(&DirtyKey::product(a)));
        assert!(!pulled.dirty.contains(&DirtyKey::product(b)));
    }

    #[tokio::test]
    async fn test_tombstones_and_local_deletions_are_skipped() {
        let fx = fixture().await;
        put_remote(&fx.remote, &remote_item(5, "ABC000005", "555", 1)).await;
        put_remote(&fx.remote, &remote_item(6, "ABC000006", "666", 1)).await;
        let tombstone = to_document(&DeletionTombstone::new(5, Utc::now())).unwrap();
        fx.remote.set(&deletion_doc("t1", 5), tombstone, SetMode::Merge).await.unwrap();

        // 6 reaches this device, then is deleted here before the push
        fx.pull.sync_down().await.unwrap();
        fx.db.catalog().delete_item(6).await.unwrap();

        let pulled = fx.pull.sync_down().await.unwrap();
        assert_eq!(pulled.value.applied, 0);
        assert!(fx.db.catalog().get(5).await.unwrap().is_none());
        assert!(fx.db.catalog().get(6).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_case_variant_code_is_defended_without_recovery() {
        let fx = fixture().await;
        let a = create_local(&fx.db, "ABC000001", "111", 1).await;
        let b = create_local(&fx.db, "ABC000002", "222", 1).await;
        fx.db.outbox().mark_pushed(EntityType::Product, &[a, b]).await.unwrap();
        let unsynced = create_local(&fx.db, "ABC000003", "333", 4).await;

        // newer remote copy of A claims B's code in another case
        let mut remote = fx.db.catalog().get(a).await.unwrap().unwrap();
        remote.code = Some("abc000002".into());
        remote.name = "Edited elsewhere".into();
        remote.updated_at = remote.updated_at + Duration::minutes(1);
        put_remote(&fx.remote, &remote).await;

        let pulled = fx.pull.sync_down().await.unwrap();
        assert!(pulled.value.recovery.is_none());
        assert!(pulled.dirty.contains(&DirtyKey::product(a)));

        let merged = fx.db.catalog().get(a).await.unwrap().unwrap();
        assert_eq!(merged.name, "Edited elsewhere");
        assert_eq!(merged.code.as_deref(), Some("ABC000001"));
        assert_eq!(fx.db.catalog().get(b).await.unwrap().unwrap().code.as_deref(), Some("ABC000002"));
        assert!(fx.db.catalog().get(unsynced).await.unwrap().is_some());
        assert!(fx.db.outbox().get(EntityType::Product, unsynced).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_case_variant_of_new_record_merges_into_local() {
        let fx = fixture().await;
        let local = create_local(&fx.db, "ABC000001", "111", 3).await;

        // different id and barcode, same code in another case
        put_remote(&fx.remote, &remote_item(40, "abc000001", "999", 8)).await;

        let pulled = fx.pull.sync_down().await.unwrap();
        assert!(pulled.value.recovery.is_none());
        assert_eq!(fx.db.catalog().count().await.unwrap(), 1);
        assert!(fx.db.catalog().get(40).await.unwrap().is_none());
        assert_eq!(fx.db.catalog().get(local).await.unwrap().unwrap().quantity, 8);
        assert!(fx.db.ledger().conservation_violations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blank_remote_codes_insert_as_null() {
        let fx = fixture().await;
        for (id, barcode) in [(1, "111"), (2, "222")] {
            let item = remote_item(id, "", barcode, 1);
            let doc = to_document(&ItemDocument::from_item(&item, "t1", "other-device")).unwrap();
            fx.remote.set(&product_doc("t1", id), doc, SetMode::Replace).await.unwrap();
        }

        let pulled = fx.pull.sync_down().await.unwrap();
        assert!(pulled.value.recovery.is_none());
        assert_eq!(pulled.value.applied, 2);
        assert_eq!(fx.db.catalog().count().await.unwrap(), 2);
        assert_eq!(fx.db.catalog().get(1).await.unwrap().unwrap().code, None);

        // and keeps working on the next pull
        let again = fx.pull.sync_down().await.unwrap();
        assert_eq!(again.value.applied, 0);
    }

    #[tokio::test]
    async fn test_unforeseen_conflict_escalates_to_recovery() {
        let fx = fixture().await;
        let local = create_local(&fx.db, "ABC000001", "111", 3).await;

        // a constraint the index knows nothing about
        sqlx::query("CREATE UNIQUE INDEX test_unique_name ON catalog_items (name)")
            .execute(fx.db.pool())
            .await
            .unwrap();
        let mut remote = remote_item(40, "XYZ000040", "999", 8);
        remote.name = "Local ABC000001".into();
        put_remote(&fx.remote, &remote).await;

        let pulled = fx.pull.sync_down().await.unwrap();
        let recovery = pulled.value.recovery.expect("recovery report");
        assert_eq!(recovery.restored, 1);
        assert_eq!(recovery.discarded_dirty, 1);

        assert!(fx.db.catalog().get(local).await.unwrap().is_none());
        assert_eq!(fx.db.catalog().get(40).await.unwrap().unwrap().quantity, 8);
        assert_eq!(fx.db.outbox().count_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reassigned_id_is_marked_dirty() {
        let fx = fixture().await;
        let local = create_local(&fx.db, "ABC000001", "111", 1).await;
        fx.db.outbox().mark_pushed(EntityType::Product, &[local]).await.unwrap();

        // same id allocated on another device for a different item
        put_remote(&fx.remote, &remote_item(local, "XYZ000001", "999", 2)).await;

        let pulled = fx.pull.sync_down().await.unwrap();
        assert_eq!(pulled.value.applied, 1);
        assert_eq!(pulled.value.pushed_back, 1);

        let inserted = fx.db.catalog().get_by_code("XYZ000001").await.unwrap().unwrap();
        assert_ne!(inserted.id, local);
        assert!(pulled.dirty.contains(&DirtyKey::product(inserted.id)));
        assert_eq!(fx.db.catalog().get(local).await.unwrap().unwrap().code.as_deref(), Some("ABC000001"));
    }
}
