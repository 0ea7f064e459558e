//! # Tenant Provider
//!
//! Where push, pull and SKU allocation learn which tenant they work for.
//! The host application owns sign-in and tenant selection; this crate only
//! reads the result.

use std::sync::{PoisonError, RwLock};

use tracing::{info, warn};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};

/// Source of the current tenant id.
pub trait TenantProvider: Send + Sync {
    /// The selected tenant, or `None` before one is chosen.
    fn current_tenant_id(&self) -> Option<String>;

    /// The selected tenant, failing with [`SyncError::MissingTenant`].
    fn require_tenant_id(&self) -> SyncResult<String> {
        self.current_tenant_id()
            .filter(|t| !t.trim().is_empty())
            .ok_or(SyncError::MissingTenant)
    }
}

/// A tenant id held in memory and switched by the host.
#[derive(Debug, Default)]
pub struct StaticTenantProvider {
    tenant: RwLock<Option<String>>,
}

impl StaticTenantProvider {
    pub fn new(tenant: Option<String>) -> Self {
        StaticTenantProvider {
            tenant: RwLock::new(tenant),
        }
    }

    /// Starts with the tenant named in the config file.
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.tenant_id().map(str::to_string))
    }

    /// Switches tenant.
    ///
    /// ## Returns
    /// `true` when the tenant actually changed; callers then invalidate
    /// tenant-scoped caches.
    pub fn set_tenant(&self, tenant: Option<String>) -> bool {
        let mut current = self.tenant.write().unwrap_or_else(|poisoned| {
            warn!("Tenant lock poisoned, recovering");
            PoisonError::into_inner(poisoned)
        });
        if *current == tenant {
            return false;
        }
        info!(from = ?*current, to = ?tenant, "Tenant changed");
        *current = tenant;
        true
    }
}

impl TenantProvider for StaticTenantProvider {
    fn current_tenant_id(&self) -> Option<String> {
        self.tenant
            .read()
            .unwrap_or_else(|poisoned| {
                warn!("Tenant lock poisoned, recovering");
                PoisonError::into_inner(poisoned)
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_tenant() {
        let provider = StaticTenantProvider::new(None);
        assert!(matches!(provider.require_tenant_id(), Err(SyncError::MissingTenant)));

        assert!(provider.set_tenant(Some("corner-shop".into())));
        assert!(!provider.set_tenant(Some("corner-shop".into())));
        assert_eq!(provider.require_tenant_id().unwrap(), "corner-shop");

        provider.set_tenant(Some("  ".into()));
        assert!(provider.require_tenant_id().is_err());
    }

    #[test]
    fn test_poisoned_lock_keeps_tenant() {
        let provider = std::sync::Arc::new(StaticTenantProvider::new(Some("t1".into())));

        let poisoner = provider.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.tenant.write().unwrap();
            panic!("poison the tenant lock");
        })
        .join();
        assert!(provider.tenant.is_poisoned());

        assert_eq!(provider.current_tenant_id().as_deref(), Some("t1"));
        assert!(provider.set_tenant(Some("t2".into())));
        assert_eq!(provider.require_tenant_id().unwrap(), "t2");
    }
}
