//! # Inventory Facade
//!
//! The single entry point the application talks to. Every mutation runs in
//! its own unit of work in `stockyard-db`; once it commits, the facade hands
//! the touched keys to the push queue and republishes the item list.
//!
//! ```text
//! caller ──► Inventory::adjust_stock ──► CatalogRepository (one transaction)
//!                   │                             │
//!                   │◄──── Committed { value, dirty }
//!                   │
//!                   ├──► PushHandle::enqueue(dirty)     (try_send, non-blocking)
//!                   └──► ItemsCache::invalidate + watch::send_replace
//! ```

use std::sync::Arc;

use stockyard_core::{
    CatalogItem, DirtySet, ImportReport, ImportRow, ImportStrategy, Invoice, InvoiceDetail,
    InvoiceDraft, InvoiceReceipt, ItemPage, MovementWithItem, PricingCalculator,
    StockAdjustmentReason,
};
use stockyard_db::{simulate_import, Committed, Database};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info};

use crate::cache::{ItemsCache, SkuPrefixCache};
use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::pull::{PullReconciler, PullReport};
use crate::push::{PushHandle, PushReport};
use crate::remote::RemoteStore;
use crate::tenant::TenantProvider;

/// Local-first catalog, ledger and invoice operations.
pub struct Inventory {
    db: Database,
    pricing: Arc<dyn PricingCalculator>,
    sku: SkuPrefixCache,
    items: ItemsCache,
    push: PushHandle,
    pull: PullReconciler,
    items_tx: watch::Sender<Arc<Vec<CatalogItem>>>,
}

impl Inventory {
    /// Builds the facade and publishes the current item list.
    ///
    /// ## Arguments
    /// * `push` - handle of a running push synchronizer
    pub async fn new(
        db: Database,
        remote: Arc<dyn RemoteStore>,
        tenants: Arc<dyn TenantProvider>,
        pricing: Arc<dyn PricingCalculator>,
        push: PushHandle,
        config: &SyncConfig,
    ) -> SyncResult<Self> {
        let items = ItemsCache::new();
        let initial = items.get_or_load(&db.catalog()).await?;
        let (items_tx, _) = watch::channel(initial);

        Ok(Inventory {
            sku: SkuPrefixCache::new(db.clone(), remote.clone(), tenants.clone(), config),
            pull: PullReconciler::new(db.clone(), remote, tenants),
            db,
            pricing,
            items,
            push,
            items_tx,
        })
    }

    // =========================================================================
    // Catalog
    // =========================================================================

    /// Creates an item, allocating a SKU when it has no code.
    pub async fn create_item(&self, item: CatalogItem) -> SyncResult<i64> {
        let sku = self.sku.get_or_load().await?;
        let committed = self.db.catalog().create_item(item, &sku, self.pricing.as_ref()).await?;
        info!(id = committed.value, "Item created");
        self.after_commit(committed).await
    }

    pub async fn update_item(&self, item: CatalogItem) -> SyncResult<CatalogItem> {
        let committed = self.db.catalog().update_item(item, self.pricing.as_ref()).await?;
        self.after_commit(committed).await
    }

    pub async fn delete_item(&self, id: i64) -> SyncResult<()> {
        let committed = self.db.catalog().delete_item(id).await?;
        info!(id, "Item deleted");
        self.after_commit(committed).await
    }

    /// Adjusts stock by `delta`, floored at zero.
    ///
    /// ## Returns
    /// The delta actually applied.
    pub async fn adjust_stock(
        &self,
        id: i64,
        delta: i64,
        reason: StockAdjustmentReason,
        note: Option<&str>,
    ) -> SyncResult<i64> {
        let committed = self
            .db
            .catalog()
            .adjust_stock(id, delta, reason.movement_reason(), note)
            .await?;
        self.after_commit(committed).await
    }

    pub async fn adjust_stock_by_barcode(&self, barcode: &str, delta: i64) -> SyncResult<i64> {
        let committed = self.db.catalog().adjust_stock_by_barcode(barcode, delta).await?;
        self.after_commit(committed).await
    }

    /// Re-prices every auto-priced item; returns how many changed.
    pub async fn recalculate_auto_pricing(&self) -> SyncResult<usize> {
        let committed = self.db.catalog().recalculate_auto_pricing(self.pricing.as_ref()).await?;
        info!(changed = committed.value, "Auto pricing recalculated");
        self.after_commit(committed).await
    }

    pub async fn import_items(
        &self,
        rows: &[ImportRow],
        strategy: ImportStrategy,
    ) -> SyncResult<ImportReport> {
        let sku = self.sku.get_or_load().await?;
        let committed = self
            .db
            .catalog()
            .import_items(rows, strategy, &sku, self.pricing.as_ref())
            .await?;
        info!(
            strategy = strategy.as_str(),
            inserted = committed.value.inserted,
            updated = committed.value.updated,
            errors = committed.value.errors.len(),
            "Import finished"
        );
        self.after_commit(committed).await
    }

    /// Dry run of [`Inventory::import_items`] against the cached item list.
    pub async fn simulate_import(&self, rows: &[ImportRow]) -> SyncResult<ImportReport> {
        let existing = self.items.get_or_load(&self.db.catalog()).await?;
        Ok(simulate_import(rows, &existing))
    }

    // =========================================================================
    // Invoices
    // =========================================================================

    pub async fn confirm_invoice(&self, draft: &InvoiceDraft) -> SyncResult<InvoiceReceipt> {
        let committed = self.db.invoices().confirm_invoice(draft).await?;
        info!(invoice = %committed.value.invoice_number, lines = draft.lines.len(), "Invoice confirmed");
        self.after_commit(committed).await
    }

    pub async fn cancel_invoice(&self, id: i64, reason: &str) -> SyncResult<Invoice> {
        let committed = self.db.invoices().cancel_invoice(id, reason).await?;
        info!(invoice = id, "Invoice cancelled");
        self.after_commit(committed).await
    }

    pub async fn invoice_detail(&self, id: i64) -> SyncResult<Option<InvoiceDetail>> {
        Ok(self.db.invoices().detail(id).await?)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Item list updates, starting with the current list.
    pub fn observe_items(&self) -> WatchStream<Arc<Vec<CatalogItem>>> {
        WatchStream::new(self.items_tx.subscribe())
    }

    pub async fn items(&self) -> SyncResult<Arc<Vec<CatalogItem>>> {
        self.items.get_or_load(&self.db.catalog()).await
    }

    pub async fn search_page(&self, query: &str, offset: i64, limit: i64) -> SyncResult<ItemPage> {
        Ok(self.db.catalog().search_page(query, offset, limit).await?)
    }

    pub async fn movement_history(&self, item_id: i64, limit: u32) -> SyncResult<Vec<MovementWithItem>> {
        Ok(self.db.ledger().history(item_id, limit).await?)
    }

    pub async fn recent_movements(&self, limit: u32) -> SyncResult<Vec<MovementWithItem>> {
        Ok(self.db.ledger().recent(limit).await?)
    }

    // =========================================================================
    // Sync
    // =========================================================================

    /// Pulls the remote catalog and queues whatever must be pushed back.
    pub async fn sync_down(&self) -> SyncResult<PullReport> {
        let Committed { value, dirty } = self.pull.sync_down().await?;
        // merged rows change the list even when nothing goes back out
        self.refresh_items().await?;
        self.enqueue(dirty);
        Ok(value)
    }

    /// Pushes every pending outbox entry and waits for the result.
    pub async fn flush_push(&self) -> SyncResult<PushReport> {
        self.push.flush().await
    }

    /// Drops tenant-scoped caches after the active tenant changed.
    pub async fn tenant_changed(&self) -> SyncResult<()> {
        self.sku.invalidate().await;
        self.refresh_items().await
    }

    async fn after_commit<T>(&self, committed: Committed<T>) -> SyncResult<T> {
        let Committed { value, dirty } = committed;
        if !dirty.is_empty() {
            self.refresh_items().await?;
            self.enqueue(dirty);
        }
        Ok(value)
    }

    fn enqueue(&self, dirty: DirtySet) {
        if dirty.is_empty() {
            return;
        }
        let keys = dirty.len();
        if self.push.enqueue(dirty) {
            debug!(keys, "Queued for push");
        }
    }

    async fn refresh_items(&self) -> SyncResult<()> {
        self.items.invalidate().await;
        let items = self.items.get_or_load(&self.db.catalog()).await?;
        self.items_tx.send_replace(items);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push::{Pusher, PushSynchronizer};
    use crate::remote::{invoice_doc, product_doc, products_collection, InMemoryRemoteStore};
    use crate::tenant::StaticTenantProvider;
    use chrono::Utc;
    use stockyard_core::{InvoiceLine, InvoiceStatus, MovementReason, SyncState, TieredMarkupCalculator};
    use stockyard_db::DbConfig;
    use tokio_stream::StreamExt;

    struct Fixture {
        inventory: Inventory,
        db: Database,
        remote: Arc<InMemoryRemoteStore>,
    }

    async fn fixture() -> Fixture {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let remote = Arc::new(InMemoryRemoteStore::new());
        let tenants: Arc<dyn TenantProvider> = Arc::new(StaticTenantProvider::new(Some("t1".into())));
        let mut config = SyncConfig::default();
        config.tenant.store_name = Some("Corner Shop".into());

        let pusher = Pusher::new(db.clone(), remote.clone(), tenants.clone(), &config);
        let (worker, handle) = PushSynchronizer::new(pusher, db.clone(), &config);
        tokio::spawn(worker.run());

        let inventory = Inventory::new(
            db.clone(),
            remote.clone(),
            tenants,
            Arc::new(TieredMarkupCalculator::default()),
            handle,
            &config,
        )
        .await
        .unwrap();

        Fixture { inventory, db, remote }
    }

    #[tokio::test]
    async fn test_sale_and_cancel_reach_the_remote() {
        let fx = fixture().await;
        let id = fx
            .inventory
            .create_item(CatalogItem::new("Coffee").with_quantity(10))
            .await
            .unwrap();
        let created = fx.db.catalog().get(id).await.unwrap().unwrap();
        assert_eq!(created.code.as_deref(), Some("COR000001"));

        let draft = InvoiceDraft {
            lines: vec![InvoiceLine {
                item_id: id,
                item_name: "Coffee".into(),
                quantity: 3,
                unit_price: 1_000,
            }],
            ..Default::default()
        };
        let receipt = fx.inventory.confirm_invoice(&draft).await.unwrap();
        fx.inventory.cancel_invoice(receipt.invoice_id, "returned").await.unwrap();

        let report = fx.inventory.flush_push().await.unwrap();
        assert_eq!(report.failed, 0);
        assert_eq!(fx.db.outbox().count_pending().await.unwrap(), 0);

        let product = fx.remote.get(&product_doc("t1", id)).await.unwrap().unwrap();
        assert_eq!(product["quantity"], serde_json::json!(10));
        let invoice = fx.remote.get(&invoice_doc("t1", receipt.invoice_id)).await.unwrap().unwrap();
        assert_eq!(invoice["status"], serde_json::to_value(InvoiceStatus::Cancelled).unwrap());

        let detail = fx.inventory.invoice_detail(receipt.invoice_id).await.unwrap().unwrap();
        assert_eq!(detail.sync_state, SyncState::Synced);

        let history: Vec<_> = fx
            .inventory
            .movement_history(id, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.reason)
            .collect();
        assert_eq!(
            history,
            vec![MovementReason::SaleCancel, MovementReason::Sale, MovementReason::ProductCreate]
        );
        assert!(fx.db.ledger().conservation_violations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_import_duplicates_and_dry_run_agree() {
        let fx = fixture().await;
        let rows = vec![
            ImportRow { code: Some("X1".into()), ..ImportRow::new("first", 2) },
            ImportRow { code: Some("x1".into()), ..ImportRow::new("second", 3) },
            ImportRow::new("third", 1),
        ];

        let dry = fx.inventory.simulate_import(&rows).await.unwrap();
        let report = fx.inventory.import_items(&rows, ImportStrategy::Append).await.unwrap();

        assert_eq!(report.inserted, 2);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("Line 3:"));
        assert_eq!(dry.inserted, report.inserted);
        assert_eq!(dry.errors.len(), report.errors.len());

        // the dry run now sees the imported items
        let again = fx.inventory.simulate_import(&rows[..1]).await.unwrap();
        assert_eq!(again.updated, 1);
        assert_eq!(fx.inventory.items().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_bulk_import_rejects_in_file_duplicates() {
        let fx = fixture().await;
        let mut rows: Vec<ImportRow> = (0..100)
            .map(|i| ImportRow {
                code: Some(format!("IMP{:03}", i)),
                ..ImportRow::new(format!("Item {}", i), 1)
            })
            .collect();
        for (dup, original) in [(10, 1), (50, 2), (99, 3)] {
            rows[dup].code = Some(format!("IMP{:03}", original));
        }

        let report = fx.inventory.import_items(&rows, ImportStrategy::Replace).await.unwrap();
        assert_eq!(report.inserted, 97);
        assert_eq!(report.errors.len(), 3);
        assert!(report.errors.iter().all(|e| e.contains("duplicated in file")));

        fx.inventory.flush_push().await.unwrap();
        assert_eq!(fx.remote.count(&products_collection("t1")).await, 97);
    }

    #[tokio::test]
    async fn test_observe_items_follows_mutations() {
        let fx = fixture().await;
        let mut stream = fx.inventory.observe_items();
        assert!(stream.next().await.unwrap().is_empty());

        let id = fx
            .inventory
            .create_item(CatalogItem::new("Tea").with_quantity(1))
            .await
            .unwrap();
        let items = stream.next().await.unwrap();
        assert_eq!(items.len(), 1);

        let applied = fx
            .inventory
            .adjust_stock(id, -5, StockAdjustmentReason::Damage, None)
            .await
            .unwrap();
        assert_eq!(applied, -1);
        let items = stream.next().await.unwrap();
        assert_eq!(items[0].quantity, 0);
    }

    #[tokio::test]
    async fn test_sync_down_pulls_remote_items() {
        let fx = fixture().await;
        let id = fx
            .inventory
            .create_item(CatalogItem::new("Soap").with_quantity(4))
            .await
            .unwrap();
        fx.inventory.flush_push().await.unwrap();

        // another device sold two
        let mut body = fx.remote.get(&product_doc("t1", id)).await.unwrap().unwrap();
        let later = Utc::now() + chrono::Duration::minutes(1);
        body.insert("quantity".into(), serde_json::json!(2));
        body.insert("updatedAt".into(), serde_json::json!(later.to_rfc3339()));
        fx.remote
            .set(&product_doc("t1", id), body, crate::remote::SetMode::Replace)
            .await
            .unwrap();

        let report = fx.inventory.sync_down().await.unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(fx.inventory.items().await.unwrap()[0].quantity, 2);
        let last = &fx.inventory.recent_movements(1).await.unwrap()[0];
        assert_eq!(last.reason, MovementReason::RemoteSync);
        assert_eq!(last.delta, -2);
    }
}
