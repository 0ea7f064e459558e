//! # Push Synchronizer
//!
//! Uploads outbox entries to the remote store.
//!
//! ## Push Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Push Flow                                       │
//! │                                                                         │
//! │  committed unit of work ──► PushHandle::enqueue(dirty)   (try_send)    │
//! │                                      │                                  │
//! │                                      ▼                                  │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    PushSynchronizer task                         │   │
//! │  │                                                                  │   │
//! │  │  Push(dirty) ─► Pusher::push(keys)                               │   │
//! │  │  Flush(reply) ─► every pending entry, report on the oneshot      │   │
//! │  │  retry tick ───► every pending entry                             │   │
//! │  │  shutdown ─────► stop                                            │   │
//! │  └────────────────────────────┬─────────────────────────────────────┘   │
//! │                               ▼                                         │
//! │  Pusher::push(keys)                                                     │
//! │    1. read the outbox entries (revision observed now)                   │
//! │    2. load each entity                                                  │
//! │         product present  → merge-set doc, delete tombstone              │
//! │         product missing  → delete doc, write tombstone                  │
//! │         invoice          → set doc with embedded lines                  │
//! │    3. commit one batch                                                  │
//! │    4. ok  → clear_observed (re-marked entries stay)                     │
//! │       err → mark_failed with the error, truncated                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A full queue only delays a push: the entries are already in the outbox
//! and the next retry tick or flush picks them up.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use stockyard_core::{truncate_error, DirtyKey, DirtySet, EntityType, OutboxEntry};
use stockyard_db::Database;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::document::{to_document, DeletionTombstone, InvoiceDocument, ItemDocument};
use crate::error::{SyncError, SyncResult};
use crate::remote::{deletion_doc, invoice_doc, product_doc, RemoteStore, SetMode, WriteBatch};
use crate::tenant::TenantProvider;

// =============================================================================
// Push Report
// =============================================================================

/// Outcome of one push.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushReport {
    /// Entries whose entity reached the remote store.
    pub pushed: usize,
    /// Entries left queued with an error.
    pub failed: usize,
    /// Keys with nothing to push: no outbox entry, or nothing to write.
    pub skipped: usize,
}

impl PushReport {
    fn add(&mut self, other: PushReport) {
        self.pushed += other.pushed;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

// =============================================================================
// Pusher
// =============================================================================

/// Turns outbox entries into one remote write batch.
pub struct Pusher {
    db: Database,
    remote: Arc<dyn RemoteStore>,
    tenants: Arc<dyn TenantProvider>,
    device_id: String,
    error_max_len: usize,
}

impl Pusher {
    pub fn new(
        db: Database,
        remote: Arc<dyn RemoteStore>,
        tenants: Arc<dyn TenantProvider>,
        config: &SyncConfig,
    ) -> Self {
        Pusher {
            db,
            remote,
            tenants,
            device_id: config.device.id.clone(),
            error_max_len: config.push.error_max_len,
        }
    }

    /// Pushes the entities behind `keys`.
    ///
    /// Never fails: every problem ends up either in the outbox as
    /// `last_error` or, when even the outbox is unreadable, in the log.
    pub async fn push(&self, keys: &DirtySet) -> PushReport {
        if keys.is_empty() {
            return PushReport::default();
        }

        let wanted: Vec<DirtyKey> = keys.iter().copied().collect();
        let entries = match self.db.outbox().entries_for(&wanted).await {
            Ok(entries) => entries,
            Err(e) => {
                error!(error = %e, keys = wanted.len(), "Cannot read outbox, push skipped");
                return PushReport {
                    skipped: wanted.len(),
                    ..Default::default()
                };
            }
        };
        let already_clear = wanted.len() - entries.len();

        let mut report = self.push_entries(entries).await;
        report.skipped += already_clear;
        report
    }

    async fn push_entries(&self, entries: Vec<OutboxEntry>) -> PushReport {
        if entries.is_empty() {
            return PushReport::default();
        }

        let tenant_id = match self.tenants.require_tenant_id() {
            Ok(tenant_id) => tenant_id,
            Err(e) => return self.fail(&entries, &e).await,
        };

        let (batch, orphans) = match self.build_batch(&tenant_id, &entries).await {
            Ok(built) => built,
            Err(e) => return self.fail(&entries, &e).await,
        };

        let (orphaned, included): (Vec<OutboxEntry>, Vec<OutboxEntry>) = entries
            .into_iter()
            .partition(|entry| orphans.contains(&entry.key()));

        if !orphaned.is_empty() {
            // nothing left to send for these; drop them unless re-marked
            if let Err(e) = self.db.outbox().clear_observed(&orphaned).await {
                warn!(error = %e, "Failed to clear orphaned outbox entries");
            }
        }

        if batch.is_empty() {
            return PushReport {
                skipped: orphaned.len(),
                ..Default::default()
            };
        }

        let writes = batch.len();
        match self.remote.commit_batch(batch).await {
            Ok(()) => {
                if let Err(e) = self.db.outbox().clear_observed(&included).await {
                    // pushed but still queued: the next push repeats it
                    warn!(error = %e, "Failed to clear pushed outbox entries");
                }
                info!(
                    tenant = %tenant_id,
                    entries = included.len(),
                    writes,
                    "Push committed"
                );
                PushReport {
                    pushed: included.len(),
                    failed: 0,
                    skipped: orphaned.len(),
                }
            }
            Err(e) => {
                let mut report = self.fail(&included, &e).await;
                report.skipped = orphaned.len();
                report
            }
        }
    }

    /// Builds the batch for `entries`.
    ///
    /// ## Returns
    /// The batch and the keys of invoices that no longer exist locally.
    async fn build_batch(
        &self,
        tenant_id: &str,
        entries: &[OutboxEntry],
    ) -> SyncResult<(WriteBatch, HashSet<DirtyKey>)> {
        let mut batch = WriteBatch::new();
        let mut orphans = HashSet::new();
        let now = Utc::now();
        let catalog = self.db.catalog();
        let invoices = self.db.invoices();

        for entry in entries {
            let id = entry.entity_id;
            match entry.entity_type {
                EntityType::Product => match catalog.get(id).await? {
                    Some(item) => {
                        let doc = to_document(&ItemDocument::from_item(
                            &item,
                            tenant_id,
                            &self.device_id,
                        ))?;
                        batch
                            .set(product_doc(tenant_id, id), doc, SetMode::Merge)
                            .delete(deletion_doc(tenant_id, id));
                    }
                    None => {
                        let tombstone = to_document(&DeletionTombstone::new(id, now))?;
                        batch
                            .delete(product_doc(tenant_id, id))
                            .set(deletion_doc(tenant_id, id), tombstone, SetMode::Merge);
                    }
                },
                EntityType::Invoice => match invoices.get(id).await? {
                    Some(invoice) => {
                        let items = invoices.items(id).await?;
                        let doc = to_document(&InvoiceDocument::from_invoice(
                            &invoice,
                            &items,
                            tenant_id,
                            &self.device_id,
                        ))?;
                        batch.set(invoice_doc(tenant_id, id), doc, SetMode::Replace);
                    }
                    None => {
                        warn!(invoice_id = id, "Queued invoice no longer exists");
                        orphans.insert(entry.key());
                    }
                },
            }
        }

        Ok((batch, orphans))
    }

    /// Records `err` on every entry and reports them as failed.
    async fn fail(&self, entries: &[OutboxEntry], err: &SyncError) -> PushReport {
        let message = truncate_error(&err.to_string(), self.error_max_len);
        let now = Utc::now();
        warn!(entries = entries.len(), error = %message, "Push failed");

        for entity_type in [EntityType::Product, EntityType::Invoice] {
            let ids: Vec<i64> = entries
                .iter()
                .filter(|e| e.entity_type == entity_type)
                .map(|e| e.entity_id)
                .collect();
            if let Err(e) = self
                .db
                .outbox()
                .mark_failed(entity_type, &ids, now, &message)
                .await
            {
                error!(error = %e, %entity_type, "Failed to record push failure");
            }
        }

        PushReport {
            failed: entries.len(),
            ..Default::default()
        }
    }
}

// =============================================================================
// Push Synchronizer
// =============================================================================

enum PushCommand {
    Push(DirtySet),
    Flush(oneshot::Sender<PushReport>),
}

/// Handle for feeding and controlling a running [`PushSynchronizer`].
#[derive(Clone)]
pub struct PushHandle {
    work_tx: mpsc::Sender<PushCommand>,
    shutdown_tx: mpsc::Sender<()>,
}

impl PushHandle {
    /// Queues `dirty` for push without waiting.
    ///
    /// ## Returns
    /// `false` when the queue is full or closed; the entries stay in the
    /// outbox for the next retry or flush.
    pub fn enqueue(&self, dirty: DirtySet) -> bool {
        if dirty.is_empty() {
            return true;
        }
        match self.work_tx.try_send(PushCommand::Push(dirty)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(PushCommand::Push(dirty))) => {
                warn!(keys = dirty.len(), "Push queue full, entries wait for the next retry");
                false
            }
            Err(_) => {
                debug!("Push queue closed, handoff dropped");
                false
            }
        }
    }

    /// Pushes every pending outbox entry and waits for the result.
    pub async fn flush(&self) -> SyncResult<PushReport> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.work_tx
            .send(PushCommand::Flush(reply_tx))
            .await
            .map_err(|_| SyncError::ShuttingDown)?;
        reply_rx
            .await
            .map_err(|_| SyncError::ChannelError("Flush reply dropped".into()))
    }

    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Shutdown channel closed".into()))
    }
}

/// Background task that owns the [`Pusher`].
pub struct PushSynchronizer {
    pusher: Pusher,
    db: Database,
    work_rx: mpsc::Receiver<PushCommand>,
    shutdown_rx: mpsc::Receiver<()>,
    retry_interval: Option<Duration>,
    batch_limit: u32,
}

impl PushSynchronizer {
    /// Creates the worker and its handle. Spawn [`PushSynchronizer::run`].
    pub fn new(pusher: Pusher, db: Database, config: &SyncConfig) -> (Self, PushHandle) {
        let (work_tx, work_rx) = mpsc::channel(config.push.queue_capacity);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let worker = PushSynchronizer {
            pusher,
            db,
            work_rx,
            shutdown_rx,
            retry_interval: config.push.retry_interval(),
            batch_limit: config.push.batch_limit,
        };

        (worker, PushHandle { work_tx, shutdown_tx })
    }

    /// Runs the push loop until shutdown or until every handle is gone.
    pub async fn run(mut self) {
        info!(retry = ?self.retry_interval, "Push synchronizer starting");

        let mut retry = self.retry_interval.map(|period| {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                command = self.work_rx.recv() => match command {
                    Some(PushCommand::Push(dirty)) => {
                        let report = self.pusher.push(&dirty).await;
                        debug!(?report, "Queued push done");
                    }
                    Some(PushCommand::Flush(reply)) => {
                        let report = self.push_pending().await;
                        let _ = reply.send(report);
                    }
                    None => break,
                },

                _ = async {
                    match retry.as_mut() {
                        Some(interval) => {
                            interval.tick().await;
                        }
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    let report = self.push_pending().await;
                    if report.pushed + report.failed > 0 {
                        info!(?report, "Retry pass done");
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Push synchronizer shutting down");
                    break;
                }
            }
        }

        info!("Push synchronizer stopped");
    }

    /// Pushes everything in the outbox, page by page, trying each key once.
    async fn push_pending(&self) -> PushReport {
        let mut total = PushReport::default();
        let mut attempted: HashSet<DirtyKey> = HashSet::new();

        loop {
            let entries = match self.db.outbox().pending(self.batch_limit).await {
                Ok(entries) => entries,
                Err(e) => {
                    error!(error = %e, "Cannot read pending outbox entries");
                    break;
                }
            };

            let fresh: DirtySet = entries
                .iter()
                .map(OutboxEntry::key)
                .filter(|key| !attempted.contains(key))
                .collect();
            if fresh.is_empty() {
                break;
            }
            attempted.extend(fresh.iter().copied());
            total.add(self.pusher.push(&fresh).await);
        }

        total
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{deletions_collection, products_collection, InMemoryRemoteStore};
    use crate::tenant::StaticTenantProvider;
    use stockyard_core::{CatalogItem, InvoiceDraft, InvoiceLine, SkuFormat, SyncState, TieredMarkupCalculator};
    use stockyard_db::DbConfig;

    struct Fixture {
        db: Database,
        remote: Arc<InMemoryRemoteStore>,
        tenants: Arc<StaticTenantProvider>,
        config: SyncConfig,
    }

    impl Fixture {
        async fn new() -> Self {
            let mut config = SyncConfig::default();
            config.push.error_max_len = 40;
            Fixture {
                db: Database::new(DbConfig::in_memory()).await.unwrap(),
                remote: Arc::new(InMemoryRemoteStore::new()),
                tenants: Arc::new(StaticTenantProvider::new(Some("t1".into()))),
                config,
            }
        }

        fn pusher(&self) -> Pusher {
            Pusher::new(self.db.clone(), self.remote.clone(), self.tenants.clone(), &self.config)
        }

        async fn create(&self, name: &str, qty: i64) -> (i64, DirtySet) {
            let item = CatalogItem::new(name).with_quantity(qty);
            let committed = self
                .db
                .catalog()
                .create_item(item, &SkuFormat::new("ABC", 6), &TieredMarkupCalculator::default())
                .await
                .unwrap();
            (committed.value, committed.dirty)
        }
    }

    #[tokio::test]
    async fn test_push_product_and_invoice() {
        let fx = Fixture::new().await;
        let (id, mut dirty) = fx.create("Cola", 5).await;

        let draft = InvoiceDraft {
            lines: vec![InvoiceLine {
                item_id: id,
                item_name: "Cola".into(),
                quantity: 2,
                unit_price: 1_500,
            }],
            ..Default::default()
        };
        let sale = fx.db.invoices().confirm_invoice(&draft).await.unwrap();
        dirty.extend(sale.dirty);

        let report = fx.pusher().push(&dirty).await;
        assert_eq!(report, PushReport { pushed: 2, failed: 0, skipped: 0 });
        assert_eq!(fx.db.outbox().count_pending().await.unwrap(), 0);

        let doc = fx.remote.get(&product_doc("t1", id)).await.unwrap().unwrap();
        assert_eq!(doc["quantity"], 3);
        assert_eq!(doc["code"], "ABC000001");

        let invoice = fx
            .remote
            .get(&invoice_doc("t1", sale.value.invoice_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(invoice["items"][0]["quantity"], 2);
        assert_eq!(invoice["status"], "ISSUED");

        // already pushed keys are skipped
        let again = fx.pusher().push(&dirty).await;
        assert_eq!(again.skipped, 2);
    }

    #[tokio::test]
    async fn test_deleted_product_leaves_tombstone() {
        let fx = Fixture::new().await;
        let (id, dirty) = fx.create("Tea", 1).await;
        fx.pusher().push(&dirty).await;

        let deleted = fx.db.catalog().delete_item(id).await.unwrap();
        let report = fx.pusher().push(&deleted.dirty).await;

        assert_eq!(report.pushed, 1);
        assert_eq!(fx.remote.count(&products_collection("t1")).await, 0);
        let tombstone = fx.remote.get(&deletion_doc("t1", id)).await.unwrap().unwrap();
        assert_eq!(tombstone["productId"], id);
        assert_eq!(fx.remote.count(&deletions_collection("t1")).await, 1);
    }

    #[tokio::test]
    async fn test_offline_push_records_truncated_error() {
        let fx = Fixture::new().await;
        let (id, dirty) = fx.create("Mate", 2).await;
        fx.remote.set_offline(true);

        let report = fx.pusher().push(&dirty).await;
        assert_eq!(report, PushReport { pushed: 0, failed: 1, skipped: 0 });

        let entry = fx.db.outbox().get(EntityType::Product, id).await.unwrap().unwrap();
        let message = entry.last_error.unwrap();
        assert_eq!(message.chars().count(), 40);
        assert!(message.starts_with("Remote store unavailable"));
        assert!(entry.last_attempt_at.is_some());
        assert_eq!(
            fx.db.outbox().sync_state(EntityType::Product, id).await.unwrap(),
            SyncState::Error
        );

        fx.remote.set_offline(false);
        let report = fx.pusher().push(&dirty).await;
        assert_eq!(report.pushed, 1);
        assert!(fx.db.outbox().get(EntityType::Product, id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_tenant_marks_failed() {
        let fx = Fixture::new().await;
        fx.tenants.set_tenant(None);
        let (id, dirty) = fx.create("Soap", 0).await;

        let report = fx.pusher().push(&dirty).await;
        assert_eq!(report.failed, 1);
        let entry = fx.db.outbox().get(EntityType::Product, id).await.unwrap().unwrap();
        assert_eq!(entry.last_error.as_deref(), Some("No tenant selected"));
        assert_eq!(fx.remote.commit_count(), 0);
    }

    #[tokio::test]
    async fn test_worker_flush_and_shutdown() {
        let fx = Fixture::new().await;
        let (worker, handle) = PushSynchronizer::new(fx.pusher(), fx.db.clone(), &fx.config);
        let task = tokio::spawn(worker.run());

        fx.remote.set_offline(true);
        let (_, dirty) = fx.create("Rice", 3).await;
        assert!(handle.enqueue(dirty));
        fx.create("Beans", 4).await;

        fx.remote.set_offline(false);
        // the queued push may have run offline; the flush retries it
        let report = handle.flush().await.unwrap();
        assert_eq!(report.failed, 0);
        assert_eq!(fx.db.outbox().count_pending().await.unwrap(), 0);
        assert_eq!(fx.remote.count(&products_collection("t1")).await, 2);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
        assert!(matches!(handle.flush().await, Err(SyncError::ShuttingDown)));
    }
}
