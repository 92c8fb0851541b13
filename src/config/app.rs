//! Application-level configuration.

use serde::Deserialize;

/// Application-level settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Application name used in logs and notifications.
    pub name: String,
    /// Environment: "development", "staging", or "production".
    pub env: String,
    /// Logging verbosity: "debug", "info", "warn", "error".
    pub log_level: Option<String>,
    /// Seconds between decision cycles (default: 60).
    pub poll_interval_secs: Option<u64>,
    /// Seconds between closed-order history syncs (default: 1800).
    pub closed_sync_interval_secs: Option<u64>,
}
