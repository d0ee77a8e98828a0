//! Market snapshot shared by the profit evaluator and the trade loops.

use rust_decimal::Decimal;

/// MarketSnapshot holds the prices the profit computation runs on, all
/// refreshed together so no leg goes stale relative to the others.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketSnapshot {
    /// Fiat to ZAR exchange rate (from config or the rate source).
    pub fiat_rate: Decimal,
    /// Best BTC ask on the fiat leg.
    pub fiat_ask: Decimal,
    /// Best BTC bid on the fiat leg.
    pub fiat_bid: Decimal,
    /// Best BTC ask on the ZAR leg.
    pub zar_ask: Decimal,
    /// Best BTC bid on the ZAR leg.
    pub zar_bid: Decimal,
}
