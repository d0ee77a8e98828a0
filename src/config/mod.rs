//! Configuration loading and validation for the trade orchestrator.
//!
//! Uses serde_yaml to load YAML configuration files with support for
//! environment variable overrides for sensitive credentials.

mod app;
mod duration;
mod error;
mod exchange;
mod execution;
mod notification;
mod polling;
mod rates;
mod storage;
mod trade;

pub use app::AppConfig;
pub use error::ConfigError;
pub use exchange::{BitstampConfig, ExchangesConfig, ZarVenueConfig};
pub use execution::{ExecutionConfig, RetryConfig};
pub use notification::{NotificationConfig, PushoverConfig};
pub use polling::PollingConfig;
pub use rates::{FixerConfig, RatesConfig};
pub use storage::StorageConfig;
pub use trade::{TradeConfig, TradeMode, ZarVenue};

use rust_decimal::Decimal;
use serde::Deserialize;
use std::{env, fs};

/// Root configuration structure for the trade orchestrator.
///
/// Required sections: app, trade, exchanges.
/// Optional sections: polling, execution, rates, notification, storage.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Application-level settings like name and environment.
    pub app: AppConfig,
    /// Trade parameters: venue, target, totals, rebalancing.
    pub trade: TradeConfig,
    /// Per-venue settings for Luno, VALR and Bitstamp.
    pub exchanges: ExchangesConfig,
    /// Polling intervals for the sleep-based control loops (optional).
    #[serde(default)]
    pub polling: PollingConfig,
    /// API timeouts and retry behavior (optional).
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Fiat exchange-rate source (optional when trade.fiat_rate is set).
    pub rates: Option<RatesConfig>,
    /// Alert channels like Pushover (optional).
    pub notification: Option<NotificationConfig>,
    /// Trade record persistence (optional).
    pub storage: Option<StorageConfig>,
}

impl Config {
    /// Load configuration from a YAML file at the given path.
    ///
    /// First loads environment variables from `.env` file (if exists),
    /// then loads YAML config and credentials from environment variables:
    /// - `LUNO_API_KEY`, `LUNO_API_SECRET`
    /// - `VALR_API_KEY`, `VALR_API_SECRET`
    /// - `BITSTAMP_API_KEY`, `BITSTAMP_API_SECRET`, `BITSTAMP_CUSTOMER_ID`
    /// - `FIXER_API_KEY`
    /// - `PUSHOVER_APP_TOKEN`, `PUSHOVER_USER_KEY`
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore error if not found)
        dotenvy::dotenv().ok();

        let content = fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&content)?;

        config.load_credentials_from_env();
        config.validate()?;

        Ok(config)
    }

    /// Load credentials from environment variables.
    fn load_credentials_from_env(&mut self) {
        if let Some(ref mut luno) = self.exchanges.luno {
            luno.api_key = env::var("LUNO_API_KEY").unwrap_or_default();
            luno.api_secret = env::var("LUNO_API_SECRET").unwrap_or_default();
        }

        if let Some(ref mut valr) = self.exchanges.valr {
            valr.api_key = env::var("VALR_API_KEY").unwrap_or_default();
            valr.api_secret = env::var("VALR_API_SECRET").unwrap_or_default();
        }

        let bitstamp = &mut self.exchanges.bitstamp;
        bitstamp.api_key = env::var("BITSTAMP_API_KEY").unwrap_or_default();
        bitstamp.api_secret = env::var("BITSTAMP_API_SECRET").unwrap_or_default();
        bitstamp.customer_id = env::var("BITSTAMP_CUSTOMER_ID").unwrap_or_default();

        if let Some(ref mut rates) = self.rates {
            if let Some(ref mut fixer) = rates.fixer {
                if fixer.enabled {
                    fixer.api_key = env::var("FIXER_API_KEY").unwrap_or_default();
                }
            }
        }

        if let Some(ref mut notification) = self.notification {
            if let Some(ref mut pushover) = notification.pushover {
                if pushover.enabled {
                    pushover.app_token = env::var("PUSHOVER_APP_TOKEN").unwrap_or_default();
                    pushover.user_key = env::var("PUSHOVER_USER_KEY").unwrap_or_default();
                }
            }
        }
    }

    /// Returns the config block for the selected ZAR-leg venue.
    pub fn zar_venue_config(&self) -> Result<&ZarVenueConfig, ConfigError> {
        let section = match self.trade.zax {
            ZarVenue::Luno => self.exchanges.luno.as_ref(),
            ZarVenue::Valr => self.exchanges.valr.as_ref(),
        };
        section.ok_or_else(|| {
            ConfigError::Validation(format!(
                "exchanges.{} section is required when trade.zax = {}",
                self.trade.zax, self.trade.zax
            ))
        })
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.app.name.is_empty() {
            return Err(ConfigError::Validation("app.name is required".into()));
        }

        if self.trade.account.is_empty() {
            return Err(ConfigError::Validation("trade.account is required".into()));
        }

        if self.trade.target <= Decimal::ZERO {
            return Err(ConfigError::Validation(
                "trade.target must be positive".into(),
            ));
        }

        if self.trade.total_fiat_to_sell <= Decimal::ZERO
            || self.trade.total_zar_to_buy <= Decimal::ZERO
        {
            return Err(ConfigError::Validation(
                "trade.total_fiat_to_sell and trade.total_zar_to_buy must be positive".into(),
            ));
        }

        if self.trade.order_buffer < Decimal::ZERO {
            return Err(ConfigError::Validation(
                "trade.order_buffer must not be negative".into(),
            ));
        }

        if self.trade.minimum_withdrawal_zar <= Decimal::ZERO {
            return Err(ConfigError::Validation(
                "trade.minimum_withdrawal_zar must be positive".into(),
            ));
        }

        // A percent-denominated target prices the whole trade off the
        // configured rate, so the rate must exist and roughly agree with
        // the rate implied by the two totals.
        if !self.trade.target_in_zar {
            let fiat_rate = self.trade.fiat_rate.ok_or_else(|| {
                ConfigError::Validation(
                    "trade.fiat_rate is required when the target is a percentage".into(),
                )
            })?;
            self.sanity_check_rates(fiat_rate)?;
        }

        if self.trade.fiat_rate.is_none() && !self.fixer_enabled() {
            return Err(ConfigError::Validation(
                "rates.fixer must be enabled when trade.fiat_rate is not set".into(),
            ));
        }

        let venue = self.zar_venue_config()?;
        self.validate_zar_venue(venue)?;
        self.validate_bitstamp()?;
        self.validate_loss_factor(venue)?;

        let is_production = self.app.env != "development";
        if is_production {
            self.validate_credentials(venue)?;
        }

        Ok(())
    }

    /// Checks the configured fiat rate against the rate implied by the totals.
    ///
    /// The implied rate must fall within 5% of the configured rate; a bigger
    /// divergence means one of the three numbers is a typo.
    fn sanity_check_rates(&self, fiat_rate: Decimal) -> Result<(), ConfigError> {
        let implied = self.trade.total_zar_to_buy / self.trade.total_fiat_to_sell;
        let lower = fiat_rate * Decimal::new(95, 2);
        let upper = fiat_rate * Decimal::new(105, 2);

        if implied <= lower || implied >= upper {
            return Err(ConfigError::Validation(format!(
                "trade.fiat_rate ({}) diverges more than 5% from the rate implied by the totals ({:.3}); \
                 check trade.fiat_rate, trade.total_zar_to_buy and trade.total_fiat_to_sell",
                fiat_rate, implied
            )));
        }

        Ok(())
    }

    fn validate_zar_venue(&self, venue: &ZarVenueConfig) -> Result<(), ConfigError> {
        let name = self.trade.zax;

        if venue.min_order_btc <= Decimal::ZERO {
            return Err(ConfigError::Validation(format!(
                "exchanges.{}: min_order_btc must be positive",
                name
            )));
        }

        if self.trade.rebalance_after && venue.receive_address.is_empty() {
            return Err(ConfigError::Validation(format!(
                "exchanges.{}: receive_address is required when trade.rebalance_after is set",
                name
            )));
        }

        Ok(())
    }

    fn validate_bitstamp(&self) -> Result<(), ConfigError> {
        let bitstamp = &self.exchanges.bitstamp;

        if bitstamp.min_order_fiat <= Decimal::ZERO {
            return Err(ConfigError::Validation(
                "exchanges.bitstamp: min_order_fiat must be positive".into(),
            ));
        }

        if bitstamp.withdrawal_fee_btc < Decimal::ZERO {
            return Err(ConfigError::Validation(
                "exchanges.bitstamp: withdrawal_fee_btc must not be negative".into(),
            ));
        }

        Ok(())
    }

    /// The loss factor (1 minus the three fees on the round trip) must stay
    /// positive or every profit computation is meaningless.
    fn validate_loss_factor(&self, venue: &ZarVenueConfig) -> Result<(), ConfigError> {
        let zar_leg_fee = match self.trade.mode {
            TradeMode::Limit => venue.maker_fee,
            TradeMode::Market => venue.taker_fee,
        };
        let loss_factor = Decimal::ONE
            - self.exchanges.bitstamp.deposit_fee
            - self.exchanges.bitstamp.taker_fee
            - zar_leg_fee;

        if loss_factor <= Decimal::ZERO {
            return Err(ConfigError::Validation(format!(
                "configured fees sum to a loss factor of {} (must be positive)",
                loss_factor
            )));
        }

        Ok(())
    }

    fn validate_credentials(&self, venue: &ZarVenueConfig) -> Result<(), ConfigError> {
        let name = self.trade.zax;
        let env_prefix = name.to_string().to_uppercase();

        if venue.api_key.is_empty() || venue.api_secret.is_empty() {
            return Err(ConfigError::Validation(format!(
                "exchanges.{}: API credentials not found (set {}_API_KEY and {}_API_SECRET env vars)",
                name, env_prefix, env_prefix
            )));
        }

        let bitstamp = &self.exchanges.bitstamp;
        if bitstamp.api_key.is_empty()
            || bitstamp.api_secret.is_empty()
            || bitstamp.customer_id.is_empty()
        {
            return Err(ConfigError::Validation(
                "exchanges.bitstamp: API credentials not found (set BITSTAMP_API_KEY, \
                 BITSTAMP_API_SECRET and BITSTAMP_CUSTOMER_ID env vars)"
                    .into(),
            ));
        }

        if self.trade.fiat_rate.is_none() {
            let api_key_missing = self
                .rates
                .as_ref()
                .and_then(|r| r.fixer.as_ref())
                .map(|f| f.api_key.is_empty())
                .unwrap_or(true);
            if api_key_missing {
                return Err(ConfigError::Validation(
                    "rates.fixer: API key not found (set FIXER_API_KEY env var)".into(),
                ));
            }
        }

        if let Some(ref notification) = self.notification {
            if let Some(ref pushover) = notification.pushover {
                if pushover.enabled && (pushover.app_token.is_empty() || pushover.user_key.is_empty())
                {
                    return Err(ConfigError::Validation(
                        "notification.pushover: credentials not found (set PUSHOVER_APP_TOKEN \
                         and PUSHOVER_USER_KEY env vars)"
                            .into(),
                    ));
                }
            }
        }

        Ok(())
    }

    fn fixer_enabled(&self) -> bool {
        self.rates
            .as_ref()
            .and_then(|r| r.fixer.as_ref())
            .map(|f| f.enabled)
            .unwrap_or(false)
    }
}
