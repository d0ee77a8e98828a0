//! Fiat exchange-rate source configuration.

use serde::Deserialize;

/// Rate source settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RatesConfig {
    /// fixer.io rate lookups.
    pub fixer: Option<FixerConfig>,
}

/// fixer.io settings.
#[derive(Debug, Clone, Deserialize)]
pub struct FixerConfig {
    /// Whether fixer.io should be queried for the fiat to ZAR rate.
    #[serde(default)]
    pub enabled: bool,
    /// API key (loaded from FIXER_API_KEY env var).
    #[serde(skip)]
    pub api_key: String,
}
