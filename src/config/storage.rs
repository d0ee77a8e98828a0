//! Storage configuration.

use serde::Deserialize;

/// Trade record storage settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Whether trade record storage is active.
    #[serde(default)]
    pub enabled: bool,
    /// Path to the SQLite database file.
    pub path: Option<String>,
}
