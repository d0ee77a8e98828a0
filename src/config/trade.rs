//! Trade configuration.

use rust_decimal::Decimal;
use serde::Deserialize;
use std::fmt;

use crate::domain::FiatCurrency;

/// Which ZAR-leg venue hosts the sell side of the trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZarVenue {
    Luno,
    Valr,
}

impl fmt::Display for ZarVenue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZarVenue::Luno => write!(f, "luno"),
            ZarVenue::Valr => write!(f, "valr"),
        }
    }
}

/// How the trade is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeMode {
    /// Post-only sell limit orders at the top of the book, filled and
    /// matched incrementally over many cycles.
    Limit,
    /// One-shot: sell well below the best bid so the order crosses
    /// immediately, then match the whole fiat amount at once.
    Market,
}

/// Parameters of a single arbitrage trade.
#[derive(Debug, Clone, Deserialize)]
pub struct TradeConfig {
    /// Account label used in notifications and trade records.
    pub account: String,
    /// ZAR-leg venue: "luno" or "valr".
    pub zax: ZarVenue,
    /// Execution mode: "limit" or "market".
    pub mode: TradeMode,
    /// Profit target. A percentage by default; an absolute ZAR amount
    /// when target_in_zar is set.
    pub target: Decimal,
    /// Interpret target as total ZAR out instead of a percentage.
    #[serde(default)]
    pub target_in_zar: bool,
    /// Total fiat available to spend on Bitcoin over the whole trade.
    pub total_fiat_to_sell: Decimal,
    /// Total ZAR the trade aims to realize on the ZAR leg.
    pub total_zar_to_buy: Decimal,
    /// Fiat currency of the Bitstamp leg: "usd" or "eur".
    pub fiat_currency: FiatCurrency,
    /// Fixed fiat to ZAR rate. When unset the rate comes from the rate
    /// source on every snapshot refresh. Required for percentage targets.
    pub fiat_rate: Option<Decimal>,
    /// Withdraw bought BTC from Bitstamp back to the ZAR-leg venue.
    #[serde(default)]
    pub rebalance_after: bool,
    /// Accumulated BTC below this ZAR-equivalent is not withdrawn, the
    /// flat withdrawal fee would eat small transfers.
    #[serde(default = "default_minimum_withdrawal_zar")]
    pub minimum_withdrawal_zar: Decimal,
    /// Small BTC amount left behind on every sell to absorb rounding.
    #[serde(default = "default_order_buffer")]
    pub order_buffer: Decimal,
}

fn default_minimum_withdrawal_zar() -> Decimal {
    Decimal::new(100_000, 0)
}

fn default_order_buffer() -> Decimal {
    Decimal::new(5, 4)
}
