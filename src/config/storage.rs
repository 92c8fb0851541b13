//! Storage configuration.

use serde::Deserialize;

/// Order/deal persistence settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Whether persistence is active.
    #[serde(default)]
    pub enabled: bool,
    /// Path to the SQLite database file.
    pub path: Option<String>,
}
