//! # Sync Configuration
//!
//! Configuration management for push, pull and SKU allocation.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                            │
//! │     STOCKYARD_TENANT_ID=corner-shop                                     │
//! │     STOCKYARD_PULL_INTERVAL=300                                         │
//! │                                                                         │
//! │  2. TOML Config File                                                    │
//! │     ~/.config/stockyard/sync.toml (Linux)                               │
//! │     ~/Library/Application Support/com.stockyard.stockyard/sync.toml     │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                    │
//! │     no tenant, width 6, retry every 30s, no periodic pull               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [device]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//! name = "Front counter"
//!
//! [tenant]
//! id = "corner-shop"
//! store_name = "Corner Shop"
//! sku_prefix = "COR"
//!
//! [sku]
//! width = 6
//!
//! [push]
//! queue_capacity = 256
//! retry_interval_secs = 30
//! error_max_len = 512
//!
//! [pull]
//! on_start = true
//! interval_secs = 0  # 0 = only on demand
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use stockyard_core::identity::normalize_sku_prefix;
use stockyard_core::validation::validate_sku_width;
use stockyard_core::{DEFAULT_SKU_WIDTH, SYNC_ERROR_MAX_LEN};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Device Configuration
// =============================================================================

/// Configuration for this device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device identifier (UUID v4), written into pushed documents.
    /// Auto-generated on first run if not provided.
    pub id: String,

    /// Human-readable device name.
    #[serde(default = "default_device_name")]
    pub name: String,
}

fn default_device_name() -> String {
    "Stockyard Terminal".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            id: Uuid::new_v4().to_string(),
            name: default_device_name(),
        }
    }
}

// =============================================================================
// Tenant Settings
// =============================================================================

/// The tenant this device works for.
///
/// `sku_prefix` and `store_name` only matter when the tenant document in
/// the remote store does not provide them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantSettings {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub store_name: Option<String>,

    #[serde(default)]
    pub sku_prefix: Option<String>,
}

// =============================================================================
// SKU Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkuSettings {
    /// Zero-padded digits after the prefix.
    #[serde(default = "default_sku_width")]
    pub width: usize,
}

fn default_sku_width() -> usize {
    DEFAULT_SKU_WIDTH
}

impl Default for SkuSettings {
    fn default() -> Self {
        SkuSettings {
            width: default_sku_width(),
        }
    }
}

// =============================================================================
// Push Settings
// =============================================================================

/// Push worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushSettings {
    /// Dirty sets the push queue holds before handoffs are dropped.
    /// Dropped handoffs are picked up by the next retry or flush.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Seconds between retries of everything still pending.
    /// Set to 0 to retry only on flush.
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,

    /// Stored push errors are cut to this many characters.
    #[serde(default = "default_error_max_len")]
    pub error_max_len: usize,

    /// Outbox entries read per flush pass.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: u32,
}

fn default_queue_capacity() -> usize {
    256
}
fn default_retry_interval() -> u64 {
    30
}
fn default_error_max_len() -> usize {
    SYNC_ERROR_MAX_LEN
}
fn default_batch_limit() -> u32 {
    500
}

impl Default for PushSettings {
    fn default() -> Self {
        PushSettings {
            queue_capacity: default_queue_capacity(),
            retry_interval_secs: default_retry_interval(),
            error_max_len: default_error_max_len(),
            batch_limit: default_batch_limit(),
        }
    }
}

impl PushSettings {
    pub fn retry_interval(&self) -> Option<Duration> {
        (self.retry_interval_secs > 0).then(|| Duration::from_secs(self.retry_interval_secs))
    }
}

// =============================================================================
// Pull Settings
// =============================================================================

/// Pull settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullSettings {
    /// Run one pull as soon as the agent starts.
    #[serde(default = "default_true")]
    pub on_start: bool,

    /// Seconds between background pulls. 0 disables them.
    #[serde(default)]
    pub interval_secs: u64,
}

fn default_true() -> bool {
    true
}

impl Default for PullSettings {
    fn default() -> Self {
        PullSettings {
            on_start: true,
            interval_secs: 0,
        }
    }
}

impl PullSettings {
    pub fn interval(&self) -> Option<Duration> {
        (self.interval_secs > 0).then(|| Duration::from_secs(self.interval_secs))
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete sync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub tenant: TenantSettings,

    #[serde(default)]
    pub sku: SkuSettings,

    #[serde(default)]
    pub push: PushSettings,

    #[serde(default)]
    pub pull: PullSettings,
}

impl SyncConfig {
    /// Creates a new config with defaults and a generated device ID.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load sync config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.device.id.trim().is_empty() {
            return Err(SyncError::InvalidConfig("device.id must not be empty".into()));
        }

        if let Some(prefix) = self.tenant.sku_prefix.as_deref() {
            if normalize_sku_prefix(prefix).is_none() {
                return Err(SyncError::InvalidConfig(format!(
                    "tenant.sku_prefix '{}' needs at least 3 letters or digits",
                    prefix
                )));
            }
        }

        validate_sku_width(self.sku.width)
            .map_err(|e| SyncError::InvalidConfig(format!("sku.width: {}", e)))?;

        if self.push.queue_capacity == 0 {
            return Err(SyncError::InvalidConfig(
                "push.queue_capacity must be greater than 0".into(),
            ));
        }
        if self.push.error_max_len == 0 {
            return Err(SyncError::InvalidConfig(
                "push.error_max_len must be greater than 0".into(),
            ));
        }
        if self.push.batch_limit == 0 {
            return Err(SyncError::InvalidConfig(
                "push.batch_limit must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies `STOCKYARD_*` overrides read through `lookup`.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(id) = lookup("STOCKYARD_DEVICE_ID") {
            debug!(device_id = %id, "Overriding device ID from environment");
            self.device.id = id;
        }

        if let Some(tenant) = lookup("STOCKYARD_TENANT_ID") {
            debug!(tenant = %tenant, "Overriding tenant from environment");
            self.tenant.id = Some(tenant).filter(|t| !t.trim().is_empty());
        }

        if let Some(name) = lookup("STOCKYARD_STORE_NAME") {
            self.tenant.store_name = Some(name);
        }

        if let Some(prefix) = lookup("STOCKYARD_SKU_PREFIX") {
            self.tenant.sku_prefix = Some(prefix);
        }

        if let Some(secs) = lookup("STOCKYARD_PULL_INTERVAL") {
            match secs.parse::<u64>() {
                Ok(s) => self.pull.interval_secs = s,
                Err(_) => warn!(value = %secs, "Ignoring invalid STOCKYARD_PULL_INTERVAL"),
            }
        }

        if let Some(secs) = lookup("STOCKYARD_PUSH_RETRY_INTERVAL") {
            match secs.parse::<u64>() {
                Ok(s) => self.push.retry_interval_secs = s,
                Err(_) => warn!(value = %secs, "Ignoring invalid STOCKYARD_PUSH_RETRY_INTERVAL"),
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "stockyard", "stockyard")
            .map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    /// Configured tenant, if any.
    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant.id.as_deref().filter(|t| !t.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert!(!config.device.id.is_empty()); // Auto-generated
        assert_eq!(config.sku.width, DEFAULT_SKU_WIDTH);
        assert_eq!(config.push.error_max_len, 512);
        assert_eq!(config.push.retry_interval(), Some(Duration::from_secs(30)));
        assert!(config.pull.on_start);
        assert_eq!(config.pull.interval(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = SyncConfig::default();

        config.tenant.sku_prefix = Some("a-b".into());
        assert!(config.validate().is_err());
        config.tenant.sku_prefix = Some("abc".into());
        assert!(config.validate().is_ok());

        config.sku.width = 0;
        assert!(config.validate().is_err());
        config.sku.width = 6;

        config.push.queue_capacity = 0;
        assert!(config.validate().unwrap_err().is_config_error());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("STOCKYARD_TENANT_ID", "corner-shop"),
            ("STOCKYARD_STORE_NAME", "Corner Shop"),
            ("STOCKYARD_PULL_INTERVAL", "300"),
            ("STOCKYARD_PUSH_RETRY_INTERVAL", "soon"),
        ]
        .into_iter()
        .collect();

        let mut config = SyncConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.tenant_id(), Some("corner-shop"));
        assert_eq!(config.tenant.store_name.as_deref(), Some("Corner Shop"));
        assert_eq!(config.pull.interval(), Some(Duration::from_secs(300)));
        // unparsable values keep the previous setting
        assert_eq!(config.push.retry_interval_secs, 30);
    }

    #[test]
    fn test_toml_round_trip() {
        let toml_str = r#"
            [tenant]
            id = "t-1"
            sku_prefix = "TND"

            [push]
            retry_interval_secs = 0
        "#;
        let config: SyncConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.tenant_id(), Some("t-1"));
        assert_eq!(config.push.retry_interval(), None);
        assert_eq!(config.push.queue_capacity, 256);

        let out = toml::to_string_pretty(&config).unwrap();
        assert!(out.contains("[tenant]"));
        assert!(out.contains("[push]"));
    }
}
