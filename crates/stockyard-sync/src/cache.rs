//! # Caches
//!
//! Two read-mostly caches shared by the inventory facade.
//!
//! ```text
//! ┌──────────────────┐  get_or_load   ┌──────────────────────────────────┐
//! │  SkuPrefixCache  │ ─────────────► │ tenant doc ─► tenant_sku_config │
//! │  (per tenant)    │                │ (offline) ─► config / store name │
//! └──────────────────┘                └──────────────────────────────────┘
//! ┌──────────────────┐  get_or_load   ┌──────────────────────────────────┐
//! │   ItemsCache     │ ─────────────► │ catalog_items (all rows)         │
//! └──────────────────┘                └──────────────────────────────────┘
//! ```
//!
//! Both are invalidated explicitly: the prefix on tenant change, the item
//! list after every committed mutation.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use stockyard_core::identity::resolve_sku_prefix;
use stockyard_core::{CatalogItem, SkuFormat, TenantSkuConfig};
use stockyard_db::{CatalogRepository, Database};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::remote::{tenant_doc, RemoteStore};
use crate::tenant::TenantProvider;

// =============================================================================
// SKU Prefix Cache
// =============================================================================

#[derive(Debug, Clone)]
struct CachedFormat {
    tenant_id: String,
    format: SkuFormat,
}

/// Resolves the SKU format once per tenant.
///
/// ## Prefix Resolution
/// 1. `skuPrefix` of the tenant document, normalised
/// 2. `tenant.sku_prefix` from the config file
/// 3. first letters of the store name (tenant document, then config)
/// 4. `SKU`
///
/// The result is written to `tenant_sku_config`, which answers instead of
/// the tenant document when the remote store cannot be reached.
pub struct SkuPrefixCache {
    db: Database,
    remote: Arc<dyn RemoteStore>,
    tenants: Arc<dyn TenantProvider>,
    configured_prefix: Option<String>,
    configured_store: Option<String>,
    width: usize,
    cached: RwLock<Option<CachedFormat>>,
}

impl SkuPrefixCache {
    pub fn new(
        db: Database,
        remote: Arc<dyn RemoteStore>,
        tenants: Arc<dyn TenantProvider>,
        config: &SyncConfig,
    ) -> Self {
        SkuPrefixCache {
            db,
            remote,
            tenants,
            configured_prefix: config.tenant.sku_prefix.clone(),
            configured_store: config.tenant.store_name.clone(),
            width: config.sku.width,
            cached: RwLock::new(None),
        }
    }

    /// The SKU format for the current tenant.
    ///
    /// Without a tenant the format comes from the config file alone and is
    /// not cached.
    pub async fn get_or_load(&self) -> SyncResult<SkuFormat> {
        let Some(tenant_id) = self.tenants.current_tenant_id() else {
            return Ok(self.configured_format());
        };

        if let Some(hit) = self.cached.read().await.as_ref() {
            if hit.tenant_id == tenant_id {
                return Ok(hit.format.clone());
            }
        }

        let mut cached = self.cached.write().await;
        if let Some(hit) = cached.as_ref() {
            if hit.tenant_id == tenant_id {
                return Ok(hit.format.clone());
            }
        }

        let format = self.load(&tenant_id).await?;
        *cached = Some(CachedFormat {
            tenant_id,
            format: format.clone(),
        });
        Ok(format)
    }

    /// Drops the cached format; the next call reloads it.
    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
        debug!("SKU prefix cache invalidated");
    }

    fn configured_format(&self) -> SkuFormat {
        let prefix = resolve_sku_prefix(
            self.configured_prefix.as_deref(),
            self.configured_store.as_deref(),
        );
        SkuFormat::new(prefix, self.width)
    }

    async fn load(&self, tenant_id: &str) -> SyncResult<SkuFormat> {
        match self.remote.get(&tenant_doc(tenant_id)).await {
            Ok(doc) => {
                let field = |key: &str| {
                    doc.as_ref()
                        .and_then(|d| d.get(key))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                };
                let remote_prefix = field("skuPrefix");
                let store_name = field("storeName")
                    .or_else(|| field("name"))
                    .or_else(|| self.configured_store.clone());

                let prefix = resolve_sku_prefix(
                    remote_prefix.as_deref().or(self.configured_prefix.as_deref()),
                    store_name.as_deref(),
                );

                self.db
                    .tenant_config()
                    .save(&TenantSkuConfig {
                        tenant_id: tenant_id.to_string(),
                        store_name,
                        sku_prefix: prefix.clone(),
                        updated_at: Utc::now(),
                    })
                    .await?;

                info!(tenant = %tenant_id, prefix = %prefix, "SKU prefix resolved");
                Ok(SkuFormat::new(prefix, self.width))
            }
            Err(e) => {
                warn!(tenant = %tenant_id, error = %e, "Tenant document unavailable, using cached SKU prefix");
                let stored = self.db.tenant_config().get(tenant_id).await?;
                Ok(match stored {
                    Some(config) => SkuFormat::new(config.sku_prefix, self.width),
                    None => self.configured_format(),
                })
            }
        }
    }
}

// =============================================================================
// Items Cache
// =============================================================================

/// The full item list, shared with observers.
#[derive(Debug, Default)]
pub struct ItemsCache {
    items: RwLock<Option<Arc<Vec<CatalogItem>>>>,
}

impl ItemsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_load(&self, catalog: &CatalogRepository) -> SyncResult<Arc<Vec<CatalogItem>>> {
        if let Some(items) = self.items.read().await.as_ref() {
            return Ok(items.clone());
        }

        let mut slot = self.items.write().await;
        if let Some(items) = slot.as_ref() {
            return Ok(items.clone());
        }

        let items = Arc::new(catalog.list_all().await?);
        debug!(count = items.len(), "Items cache loaded");
        *slot = Some(items.clone());
        Ok(items)
    }

    pub async fn invalidate(&self) {
        *self.items.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{InMemoryRemoteStore, SetMode};
    use crate::tenant::StaticTenantProvider;
    use serde_json::json;
    use stockyard_db::DbConfig;

    async fn setup(tenant: Option<&str>) -> (Database, Arc<InMemoryRemoteStore>, Arc<StaticTenantProvider>) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let remote = Arc::new(InMemoryRemoteStore::new());
        let tenants = Arc::new(StaticTenantProvider::new(tenant.map(str::to_string)));
        (db, remote, tenants)
    }

    #[tokio::test]
    async fn test_prefix_from_tenant_document_is_persisted() {
        let (db, remote, tenants) = setup(Some("t1")).await;
        let body = json!({"skuPrefix": "ab-c", "storeName": "Corner Shop"});
        remote
            .set(&tenant_doc("t1"), body.as_object().cloned().unwrap(), SetMode::Replace)
            .await
            .unwrap();

        let cache = SkuPrefixCache::new(db.clone(), remote.clone(), tenants, &SyncConfig::default());
        let format = cache.get_or_load().await.unwrap();
        assert_eq!(format.prefix, "ABC");
        assert_eq!(format.width, 6);

        let stored = db.tenant_config().get("t1").await.unwrap().unwrap();
        assert_eq!(stored.sku_prefix, "ABC");
        assert_eq!(stored.store_name.as_deref(), Some("Corner Shop"));

        // cached: an offline store no longer matters
        remote.set_offline(true);
        assert_eq!(cache.get_or_load().await.unwrap().prefix, "ABC");
    }

    #[tokio::test]
    async fn test_offline_falls_back_to_stored_prefix() {
        let (db, remote, tenants) = setup(Some("t1")).await;
        db.tenant_config()
            .save(&TenantSkuConfig {
                tenant_id: "t1".into(),
                store_name: None,
                sku_prefix: "OFF".into(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
        remote.set_offline(true);

        let cache = SkuPrefixCache::new(db, remote, tenants, &SyncConfig::default());
        assert_eq!(cache.get_or_load().await.unwrap().prefix, "OFF");
    }

    #[tokio::test]
    async fn test_cache_follows_tenant_switch() {
        let (db, remote, tenants) = setup(Some("t1")).await;
        let mut config = SyncConfig::default();
        config.tenant.store_name = Some("Kiosko".into());

        let cache = SkuPrefixCache::new(db, remote.clone(), tenants.clone(), &config);
        assert_eq!(cache.get_or_load().await.unwrap().prefix, "KIO");

        let body = json!({"skuPrefix": "NEW"});
        remote
            .set(&tenant_doc("t2"), body.as_object().cloned().unwrap(), SetMode::Replace)
            .await
            .unwrap();
        tenants.set_tenant(Some("t2".into()));
        assert_eq!(cache.get_or_load().await.unwrap().prefix, "NEW");

        tenants.set_tenant(None);
        assert_eq!(cache.get_or_load().await.unwrap().prefix, "KIO");
    }

    #[tokio::test]
    async fn test_items_cache_reloads_after_invalidate() {
        let (db, _, _) = setup(None).await;
        let cache = ItemsCache::new();

        assert!(cache.get_or_load(&db.catalog()).await.unwrap().is_empty());

        let sku = SkuFormat::new("ABC", 6);
        let pricing = stockyard_core::TieredMarkupCalculator::default();
        db.catalog()
            .create_item(CatalogItem::new("Cola"), &sku, &pricing)
            .await
            .unwrap();

        // stale until invalidated
        assert!(cache.get_or_load(&db.catalog()).await.unwrap().is_empty());
        cache.invalidate().await;
        assert_eq!(cache.get_or_load(&db.catalog()).await.unwrap().len(), 1);
    }
}
