//! # Tenant SKU Config Repository
//!
//! Offline copy of the tenant settings used for SKU allocation. The sync
//! crate refreshes it whenever the tenant document is read, and falls back
//! to it when the remote store is unreachable.

use sqlx::SqlitePool;
use stockyard_core::TenantSkuConfig;
use tracing::debug;

use crate::error::DbResult;

/// Repository for the cached tenant SKU settings.
#[derive(Debug, Clone)]
pub struct TenantConfigRepository {
    pool: SqlitePool,
}

impl TenantConfigRepository {
    /// Creates a new TenantConfigRepository.
    pub fn new(pool: SqlitePool) -> Self {
        TenantConfigRepository { pool }
    }

    pub async fn get(&self, tenant_id: &str) -> DbResult<Option<TenantSkuConfig>> {
        let config = sqlx::query_as::<_, TenantSkuConfig>(
            r#"
            SELECT tenant_id, store_name, sku_prefix, updated_at
            FROM tenant_sku_config
            WHERE tenant_id = ?1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(config)
    }

    /// Inserts or replaces the cached settings of one tenant.
    pub async fn save(&self, config: &TenantSkuConfig) -> DbResult<()> {
        debug!(tenant_id = %config.tenant_id, prefix = %config.sku_prefix, "Saving tenant SKU config");

        sqlx::query(
            r#"
            INSERT INTO tenant_sku_config (tenant_id, store_name, sku_prefix, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (tenant_id) DO UPDATE SET
                store_name = excluded.store_name,
                sku_prefix = excluded.sku_prefix,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&config.tenant_id)
        .bind(config.store_name.as_deref())
        .bind(&config.sku_prefix)
        .bind(config.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use stockyard_core::TenantSkuConfig;

    use crate::pool::{Database, DbConfig};

    #[tokio::test]
    async fn test_save_overwrites_previous_prefix() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert!(db.tenant_config().get("t1").await.unwrap().is_none());

        let mut config = TenantSkuConfig {
            tenant_id: "t1".into(),
            store_name: Some("Corner Shop".into()),
            sku_prefix: "COR".into(),
            updated_at: Utc::now(),
        };
        db.tenant_config().save(&config).await.unwrap();

        config.sku_prefix = "CORNER".into();
        db.tenant_config().save(&config).await.unwrap();

        let stored = db.tenant_config().get("t1").await.unwrap().unwrap();
        assert_eq!(stored.sku_prefix, "CORNER");
        assert_eq!(stored.store_name.as_deref(), Some("Corner Shop"));
    }
}
