//! Exchange configuration.

use rust_decimal::Decimal;
use serde::Deserialize;

/// Per-venue settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangesConfig {
    /// Luno settings (required when trade.zax = luno).
    pub luno: Option<ZarVenueConfig>,
    /// VALR settings (required when trade.zax = valr).
    pub valr: Option<ZarVenueConfig>,
    /// Bitstamp settings. The fiat leg is always Bitstamp.
    pub bitstamp: BitstampConfig,
}

/// Settings for a ZAR-leg venue (Luno or VALR).
#[derive(Debug, Clone, Deserialize)]
pub struct ZarVenueConfig {
    /// API key (loaded from environment variable).
    #[serde(skip)]
    pub api_key: String,
    /// API secret (loaded from environment variable).
    #[serde(skip)]
    pub api_secret: String,
    /// Maker fee as a decimal (e.g. "0.001" for 0.1%). Applies to the
    /// post-only limit orders of limit mode.
    pub maker_fee: Decimal,
    /// Taker fee as a decimal. Applies to the crossing orders of market mode.
    pub taker_fee: Decimal,
    /// Smallest order the venue accepts, in BTC.
    pub min_order_btc: Decimal,
    /// BTC deposit address rebalancing withdrawals are sent to.
    #[serde(default)]
    pub receive_address: String,
}

/// Settings for the Bitstamp fiat leg.
#[derive(Debug, Clone, Deserialize)]
pub struct BitstampConfig {
    /// API key (loaded from environment variable).
    #[serde(skip)]
    pub api_key: String,
    /// API secret (loaded from environment variable).
    #[serde(skip)]
    pub api_secret: String,
    /// Customer id, part of the request signature (loaded from environment variable).
    #[serde(skip)]
    pub customer_id: String,
    /// Fee charged on fiat deposits, as a decimal.
    pub deposit_fee: Decimal,
    /// Taker fee on instant buys, as a decimal.
    pub taker_fee: Decimal,
    /// Smallest instant buy the venue accepts, in fiat. The venue minimum
    /// is 25; the default adds a margin for rounding errors.
    #[serde(default = "default_min_order_fiat")]
    pub min_order_fiat: Decimal,
    /// Flat fee charged on BTC withdrawals.
    pub withdrawal_fee_btc: Decimal,
}

fn default_min_order_fiat() -> Decimal {
    Decimal::new(251, 1)
}
