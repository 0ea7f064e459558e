//! # Sync Error Types
//!
//! Error types for push, pull and recovery.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐  │
//! │  │  Configuration  │  │   Remote store  │  │     Documents           │  │
//! │  │                 │  │                 │  │                         │  │
//! │  │  InvalidConfig  │  │  Unavailable    │  │  InvalidDocument        │  │
//! │  │  ConfigLoad...  │  │  Rejected       │  │  SerializationFailed    │  │
//! │  │  MissingTenant  │  │                 │  │                         │  │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘  │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────────────────────────────────┐   │
//! │  │    Database     │  │     Internal                                │   │
//! │  │                 │  │                                             │   │
//! │  │  Database(..)   │  │  ShuttingDown, ChannelError, Internal       │   │
//! │  └─────────────────┘  └─────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use stockyard_db::DbError;
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all possible sync failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// No tenant is selected; nothing can be pushed or pulled.
    #[error("No tenant selected")]
    MissingTenant,

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Remote Store Errors
    // =========================================================================
    /// The remote store could not be reached.
    #[error("Remote store unavailable: {0}")]
    RemoteUnavailable(String),

    /// The remote store refused a read or write.
    #[error("Remote store rejected request: {0}")]
    RemoteRejected(String),

    // =========================================================================
    // Document Errors
    // =========================================================================
    /// A remote document could not be mapped to a local record.
    #[error("Invalid document {path}: {reason}")]
    InvalidDocument { path: String, reason: String },

    /// Failed to serialize a document.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    // =========================================================================
    // Database Errors
    // =========================================================================
    /// Local store failure, kept intact so callers can inspect it.
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal sync agent error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Agent is shutting down.
    #[error("Sync agent is shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if the same operation may succeed later unchanged.
    ///
    /// ## Retryable Errors
    /// - Remote store unreachable
    /// - Local pool exhausted
    ///
    /// ## Non-Retryable Errors
    /// - Configuration errors and a missing tenant
    /// - Rejected writes and malformed documents
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::RemoteUnavailable(_)
                | SyncError::ChannelError(_)
                | SyncError::Database(DbError::PoolExhausted)
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::MissingTenant
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    /// True when the local merge hit a uniqueness constraint; the pull
    /// escalates these to disaster recovery.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, SyncError::Database(err) if err.is_unique_violation())
    }
}
