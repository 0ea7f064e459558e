//! # Sync Agent
//!
//! Main orchestrator for the sync engine. Owns the push worker, the
//! inventory facade and the periodic pull.
//!
//! ## Agent Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SyncAgent Architecture                           │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                         SyncAgent                                │  │
//! │  │                                                                  │  │
//! │  │  • Validates config and spawns the background tasks              │  │
//! │  │  • Hands out the Inventory facade                                │  │
//! │  │  • Tracks pending/failed counts and recovery warnings            │  │
//! │  │  • Emits status events to the host application                   │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │PushSynchronizer│  │   Inventory    │  │   Pull loop            │    │
//! │  │                │  │                │  │                        │    │
//! │  │ Drains queued  │  │ Local writes,  │  │ sync_down on start and │    │
//! │  │ dirty keys,    │  │ enqueue after  │  │ every pull interval,   │    │
//! │  │ retries outbox │  │ commit         │  │ then flush             │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  STATUS EVENTS:                                                         │
//! │  ──────────────                                                         │
//! │  emit_status   - after every sync pass                                  │
//! │  emit_recovery - the catalog was replaced by a remote snapshot          │
//! │  emit_error    - { message, retryable }                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use stockyard_core::{PricingCalculator, TieredMarkupCalculator};
use stockyard_db::Database;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::inventory::Inventory;
use crate::pull::PullReport;
use crate::push::{PushHandle, PushReport, PushSynchronizer, Pusher};
use crate::recovery::RecoveryReport;
use crate::remote::RemoteStore;
use crate::tenant::{StaticTenantProvider, TenantProvider};

// =============================================================================
// Sync Status
// =============================================================================

/// Current sync status for external queries.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStatus {
    /// Whether the background tasks are running.
    pub running: bool,

    pub device_id: String,

    /// Active tenant at the last sync pass.
    pub tenant_id: Option<String>,

    /// Outbox entries waiting for a push.
    pub pending_count: i64,

    /// Outbox entries whose last push failed.
    pub failed_count: i64,

    #[serde(skip)]
    pub last_push: Option<PushReport>,

    /// Last successful pull (RFC 3339).
    pub last_pull_at: Option<String>,

    /// Last error message (if any).
    pub last_error: Option<String>,

    /// Set when a pull had to replace the local catalog.
    pub recovery_warning: Option<RecoveryReport>,
}

// =============================================================================
// Event Emitter Trait
// =============================================================================

/// Receives sync events (implemented by the host application).
pub trait SyncEventEmitter: Send + Sync {
    /// Emits a sync status change event.
    fn emit_status(&self, status: &SyncStatus);

    /// Emits a disaster recovery warning.
    fn emit_recovery(&self, report: &RecoveryReport);

    /// Emits a sync error event.
    fn emit_error(&self, message: &str, retryable: bool);
}

/// No-op event emitter for testing.
pub struct NoOpEmitter;

impl SyncEventEmitter for NoOpEmitter {
    fn emit_status(&self, _status: &SyncStatus) {}
    fn emit_recovery(&self, _report: &RecoveryReport) {}
    fn emit_error(&self, _message: &str, _retryable: bool) {}
}

// =============================================================================
// Sync Agent
// =============================================================================

/// Components created by [`SyncAgent::start`].
struct Running {
    inventory: Arc<Inventory>,
    push: PushHandle,
    shutdown_tx: mpsc::Sender<()>,
}

/// Main sync agent that orchestrates all sync operations.
pub struct SyncAgent {
    config: Arc<SyncConfig>,
    db: Database,
    remote: Arc<dyn RemoteStore>,
    tenants: Arc<dyn TenantProvider>,
    pricing: Arc<dyn PricingCalculator>,

    /// Present when tenants come from the config and can be switched.
    static_tenants: Option<Arc<StaticTenantProvider>>,

    /// Current sync status.
    status: Arc<RwLock<SyncStatus>>,

    /// Event emitter for host notifications.
    emitter: Arc<dyn SyncEventEmitter>,

    /// Set between start and shutdown.
    running: Option<Running>,
}

impl SyncAgent {
    /// Creates a new sync agent with the tenant taken from `config` and the
    /// default pricing calculator.
    pub fn new(config: SyncConfig, db: Database, remote: Arc<dyn RemoteStore>) -> Self {
        Self::from_parts(config, db, remote, None, None, Arc::new(NoOpEmitter))
    }

    fn from_parts(
        config: SyncConfig,
        db: Database,
        remote: Arc<dyn RemoteStore>,
        tenants: Option<Arc<dyn TenantProvider>>,
        pricing: Option<Arc<dyn PricingCalculator>>,
        emitter: Arc<dyn SyncEventEmitter>,
    ) -> Self {
        let (tenants, static_tenants) = match tenants {
            Some(tenants) => (tenants, None),
            None => {
                let provider = Arc::new(StaticTenantProvider::from_config(&config));
                (provider.clone() as Arc<dyn TenantProvider>, Some(provider))
            }
        };

        SyncAgent {
            config: Arc::new(config),
            db,
            remote,
            tenants,
            pricing: pricing.unwrap_or_else(|| Arc::new(TieredMarkupCalculator::default())),
            static_tenants,
            status: Arc::new(RwLock::new(SyncStatus::default())),
            emitter,
            running: None,
        }
    }

    /// Returns the current sync status.
    pub async fn status(&self) -> SyncStatus {
        self.status.read().await.clone()
    }

    /// The inventory facade of a started agent.
    pub fn inventory(&self) -> SyncResult<Arc<Inventory>> {
        self.running
            .as_ref()
            .map(|r| r.inventory.clone())
            .ok_or_else(|| SyncError::Internal("Sync agent not started".into()))
    }

    pub fn tenants(&self) -> Arc<dyn TenantProvider> {
        self.tenants.clone()
    }

    /// Starts the sync agent.
    ///
    /// Spawns the push synchronizer and the pull loop. The agent keeps
    /// running until [`SyncAgent::shutdown`] is called.
    pub async fn start(&mut self) -> SyncResult<()> {
        if self.running.is_some() {
            debug!("Sync agent already running");
            return Ok(());
        }

        self.config.validate()?;

        info!(
            device_id = %self.config.device_id(),
            tenant = ?self.tenants.current_tenant_id(),
            "Starting sync agent"
        );

        let pusher = Pusher::new(
            self.db.clone(),
            self.remote.clone(),
            self.tenants.clone(),
            &self.config,
        );
        let (push_worker, push) = PushSynchronizer::new(pusher, self.db.clone(), &self.config);
        tokio::spawn(push_worker.run());

        let inventory = Arc::new(
            Inventory::new(
                self.db.clone(),
                self.remote.clone(),
                self.tenants.clone(),
                self.pricing.clone(),
                push.clone(),
                &self.config,
            )
            .await?,
        );

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let pass = SyncPass {
            inventory: inventory.clone(),
            db: self.db.clone(),
            tenants: self.tenants.clone(),
            status: self.status.clone(),
            emitter: self.emitter.clone(),
        };
        tokio::spawn(Self::pull_loop(
            pass,
            self.config.pull.on_start,
            self.config.pull.interval(),
            shutdown_rx,
        ));

        {
            let mut s = self.status.write().await;
            s.running = true;
            s.device_id = self.config.device_id().to_string();
            s.tenant_id = self.tenants.current_tenant_id();
        }

        self.running = Some(Running {
            inventory,
            push,
            shutdown_tx,
        });

        info!("Sync agent started");
        Ok(())
    }

    /// Pulls, then pushes everything pending, and refreshes the status.
    pub async fn sync_now(&self) -> SyncResult<PullReport> {
        let running = self
            .running
            .as_ref()
            .ok_or_else(|| SyncError::Internal("Sync agent not started".into()))?;

        SyncPass {
            inventory: running.inventory.clone(),
            db: self.db.clone(),
            tenants: self.tenants.clone(),
            status: self.status.clone(),
            emitter: self.emitter.clone(),
        }
        .run()
        .await
    }

    /// Switches the active tenant and drops tenant-scoped caches.
    ///
    /// Only available with the config-backed tenant provider; a custom
    /// provider switches on its own and calls [`Inventory::tenant_changed`].
    pub async fn switch_tenant(&self, tenant: Option<String>) -> SyncResult<()> {
        let Some(provider) = self.static_tenants.as_ref() else {
            return Err(SyncError::InvalidConfig(
                "Tenant provider does not support switching".into(),
            ));
        };
        if provider.set_tenant(tenant.clone()) {
            info!(tenant = ?tenant, "Tenant changed");
            if let Some(running) = &self.running {
                running.inventory.tenant_changed().await?;
            }
            self.status.write().await.tenant_id = tenant;
        }
        Ok(())
    }

    /// Stops the sync agent gracefully.
    pub async fn shutdown(&mut self) -> SyncResult<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        info!("Shutting down sync agent");

        let _ = running.shutdown_tx.send(()).await;
        let _ = running.push.shutdown().await;

        self.status.write().await.running = false;

        info!("Sync agent stopped");
        Ok(())
    }

    /// Runs a pass on start, then one per interval, until shutdown.
    async fn pull_loop(
        pass: SyncPass,
        on_start: bool,
        interval: Option<Duration>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        if on_start {
            if let Err(e) = pass.run().await {
                debug!(error = %e, "Initial sync pass failed");
            }
        }

        let Some(period) = interval else {
            debug!("No pull interval configured, pulls run on demand");
            return;
        };

        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = pass.run().await {
                        debug!(error = %e, "Periodic sync pass failed");
                    }
                }

                _ = shutdown_rx.recv() => {
                    info!("Pull loop received shutdown");
                    break;
                }
            }
        }

        info!("Pull loop stopped");
    }
}

// =============================================================================
// Sync Pass
// =============================================================================

struct SyncPass {
    inventory: Arc<Inventory>,
    db: Database,
    tenants: Arc<dyn TenantProvider>,
    status: Arc<RwLock<SyncStatus>>,
    emitter: Arc<dyn SyncEventEmitter>,
}

impl SyncPass {
    /// Pull, flush, then record the outcome. A failed pull still flushes.
    async fn run(&self) -> SyncResult<PullReport> {
        let pulled = self.inventory.sync_down().await;
        let pushed = self.inventory.flush_push().await;
        let pending = self.db.outbox().count_pending().await?;
        let failed = self.db.outbox().count_failed().await?;

        let mut s = self.status.write().await;
        s.tenant_id = self.tenants.current_tenant_id();
        s.pending_count = pending;
        s.failed_count = failed;
        if let Ok(report) = &pushed {
            s.last_push = Some(*report);
        }

        match &pulled {
            Ok(report) => {
                s.last_pull_at = Some(Utc::now().to_rfc3339());
                s.last_error = None;
                if let Some(recovery) = &report.recovery {
                    warn!(
                        discarded_local = recovery.discarded_local,
                        discarded_dirty = recovery.discarded_dirty,
                        "Local catalog was replaced during pull"
                    );
                    s.recovery_warning = Some(recovery.clone());
                    self.emitter.emit_recovery(recovery);
                }
            }
            Err(e) => {
                warn!(error = %e, "Pull failed");
                s.last_error = Some(e.to_string());
                self.emitter.emit_error(&e.to_string(), e.is_retryable());
            }
        }
        self.emitter.emit_status(&s);
        drop(s);

        let report = pulled?;
        pushed?;
        Ok(report)
    }
}

// =============================================================================
// Agent Handle (for external control)
// =============================================================================

/// Handle for reading status and stopping background work without owning
/// the agent.
#[derive(Clone)]
pub struct SyncAgentHandle {
    shutdown_tx: mpsc::Sender<()>,
    push: PushHandle,
    status: Arc<RwLock<SyncStatus>>,
}

impl SyncAgentHandle {
    /// Gets the current sync status.
    pub async fn status(&self) -> SyncStatus {
        self.status.read().await.clone()
    }

    /// Signals the background tasks to shut down.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.push.shutdown().await;
        self.status.write().await.running = false;
    }
}

impl SyncAgent {
    /// A handle for a started agent.
    pub fn handle(&self) -> Option<SyncAgentHandle> {
        self.running.as_ref().map(|r| SyncAgentHandle {
            shutdown_tx: r.shutdown_tx.clone(),
            push: r.push.clone(),
            status: self.status.clone(),
        })
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for creating SyncAgent with options.
pub struct SyncAgentBuilder {
    config: SyncConfig,
    db: Option<Database>,
    remote: Option<Arc<dyn RemoteStore>>,
    tenants: Option<Arc<dyn TenantProvider>>,
    pricing: Option<Arc<dyn PricingCalculator>>,
    emitter: Option<Arc<dyn SyncEventEmitter>>,
}

impl SyncAgentBuilder {
    /// Creates a new builder with the given config.
    pub fn new(config: SyncConfig) -> Self {
        SyncAgentBuilder {
            config,
            db: None,
            remote: None,
            tenants: None,
            pricing: None,
            emitter: None,
        }
    }

    pub fn with_database(mut self, db: Database) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemoteStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Replaces the config-backed tenant provider.
    pub fn with_tenants(mut self, tenants: Arc<dyn TenantProvider>) -> Self {
        self.tenants = Some(tenants);
        self
    }

    pub fn with_pricing(mut self, pricing: Arc<dyn PricingCalculator>) -> Self {
        self.pricing = Some(pricing);
        self
    }

    /// Sets the event emitter.
    pub fn with_emitter(mut self, emitter: Arc<dyn SyncEventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Builds the SyncAgent.
    pub fn build(self) -> SyncResult<SyncAgent> {
        let db = self
            .db
            .ok_or_else(|| SyncError::InvalidConfig("Database required".into()))?;
        let remote = self
            .remote
            .ok_or_else(|| SyncError::InvalidConfig("Remote store required".into()))?;
        let emitter = self.emitter.unwrap_or_else(|| Arc::new(NoOpEmitter));

        Ok(SyncAgent::from_parts(
            self.config,
            db,
            remote,
            self.tenants,
            self.pricing,
            emitter,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{to_document, ItemDocument};
    use crate::remote::{product_doc, InMemoryRemoteStore, SetMode};
    use std::sync::Mutex;
    use stockyard_core::{CatalogItem, SkuFormat};
    use stockyard_db::DbConfig;

    #[derive(Default)]
    struct RecordingEmitter {
        events: Mutex<Vec<String>>,
    }

    impl SyncEventEmitter for RecordingEmitter {
        fn emit_status(&self, status: &SyncStatus) {
            self.events.lock().unwrap().push(format!("status:{}", status.pending_count));
        }
        fn emit_recovery(&self, report: &RecoveryReport) {
            self.events.lock().unwrap().push(format!("recovery:{}", report.restored));
        }
        fn emit_error(&self, _message: &str, retryable: bool) {
            self.events.lock().unwrap().push(format!("error:{}", retryable));
        }
    }

    fn test_config() -> SyncConfig {
        let mut config = SyncConfig::default();
        config.tenant.id = Some("t1".into());
        config.tenant.sku_prefix = Some("TST".into());
        config.pull.on_start = false;
        config.push.retry_interval_secs = 0;
        config
    }

    async fn started(
        emitter: Arc<RecordingEmitter>,
    ) -> (SyncAgent, Database, Arc<InMemoryRemoteStore>) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let remote = Arc::new(InMemoryRemoteStore::new());
        let mut agent = SyncAgentBuilder::new(test_config())
            .with_database(db.clone())
            .with_remote(remote.clone())
            .with_emitter(emitter)
            .build()
            .unwrap();
        agent.start().await.unwrap();
        (agent, db, remote)
    }

    #[test]
    fn test_sync_status_default() {
        let status = SyncStatus::default();
        assert!(!status.running);
        assert_eq!(status.pending_count, 0);
        assert!(status.recovery_warning.is_none());
    }

    #[test]
    fn test_builder_requires_database_and_remote() {
        let result = SyncAgentBuilder::new(test_config()).build();
        assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut config = test_config();
        config.push.queue_capacity = 0;

        let mut agent = SyncAgent::new(config, db, Arc::new(InMemoryRemoteStore::new()));
        assert!(agent.start().await.is_err());
        assert!(agent.inventory().is_err());
        assert!(!agent.status().await.running);
    }

    #[tokio::test]
    async fn test_sync_now_pushes_and_updates_status() {
        let emitter = Arc::new(RecordingEmitter::default());
        let (mut agent, _db, remote) = started(emitter.clone()).await;

        let inventory = agent.inventory().unwrap();
        let id = inventory
            .create_item(CatalogItem::new("Rice").with_quantity(3))
            .await
            .unwrap();

        agent.sync_now().await.unwrap();
        assert!(remote.get(&product_doc("t1", id)).await.unwrap().is_some());

        let status = agent.status().await;
        assert!(status.running);
        assert_eq!(status.tenant_id.as_deref(), Some("t1"));
        assert_eq!(status.pending_count, 0);
        assert!(status.last_pull_at.is_some());
        assert_eq!(emitter.events.lock().unwrap().last().map(String::as_str), Some("status:0"));

        agent.shutdown().await.unwrap();
        assert!(!agent.status().await.running);
        assert!(agent.inventory().is_err());
    }

    #[tokio::test]
    async fn test_offline_pass_reports_error() {
        let emitter = Arc::new(RecordingEmitter::default());
        let (agent, _db, remote) = started(emitter.clone()).await;

        remote.set_offline(true);
        agent
            .inventory()
            .unwrap()
            .create_item(CatalogItem::new("Salt"))
            .await
            .unwrap();

        assert!(agent.sync_now().await.is_err());
        let status = agent.status().await;
        assert!(status.last_error.is_some());
        assert_eq!(status.pending_count, 1);
        assert_eq!(status.failed_count, 1);
        assert!(emitter.events.lock().unwrap().contains(&"error:true".to_string()));
    }

    #[tokio::test]
    async fn test_recovery_raises_warning() {
        let emitter = Arc::new(RecordingEmitter::default());
        let (agent, db, remote) = started(emitter.clone()).await;

        // written straight to the store so it stays local-only until the pull
        db.catalog()
            .create_item(
                CatalogItem::new("Local").with_code("ABC000001"),
                &SkuFormat::new("TST", 6),
                &TieredMarkupCalculator::default(),
            )
            .await
            .unwrap();

        // names are not identifiers, so the merge cannot foresee this clash
        sqlx::query("CREATE UNIQUE INDEX test_unique_name ON catalog_items (name)")
            .execute(db.pool())
            .await
            .unwrap();
        let mut conflicting = CatalogItem::new("Local").with_code("XYZ000050").with_barcode("999");
        conflicting.id = 50;
        let doc = to_document(&ItemDocument::from_item(&conflicting, "t1", "other")).unwrap();
        remote.set(&product_doc("t1", 50), doc, SetMode::Replace).await.unwrap();

        let report = agent.sync_now().await.unwrap();
        assert!(report.recovery.is_some());

        let status = agent.status().await;
        assert_eq!(status.recovery_warning.map(|r| r.restored), Some(1));
        assert!(emitter.events.lock().unwrap().contains(&"recovery:1".to_string()));
        assert_eq!(agent.inventory().unwrap().items().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_switch_tenant_updates_status() {
        let (agent, _db, _remote) = started(Arc::new(RecordingEmitter::default())).await;

        agent.switch_tenant(Some("t2".into())).await.unwrap();
        assert_eq!(agent.tenants().current_tenant_id().as_deref(), Some("t2"));
        assert_eq!(agent.status().await.tenant_id.as_deref(), Some("t2"));

        let handle = agent.handle().unwrap();
        handle.shutdown().await;
        assert!(!handle.status().await.running);
    }
}
