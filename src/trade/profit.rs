//! Profit computation over a market snapshot.

use rust_decimal::Decimal;

use crate::config::TradeConfig;
use crate::domain::MarketSnapshot;

/// ProfitQuote is the round-trip profit implied by one market snapshot:
/// buy BTC with fiat at the fiat leg's ask, sell it for ZAR one rand
/// above the ZAR leg's bid, net of the cumulative fee drag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfitQuote {
    /// Net return of the round trip, as a percentage rounded to 2 dp.
    pub percent: Decimal,
    /// ZAR realized if the whole configured fiat amount round-trips at
    /// these prices, rounded to 2 dp.
    pub potential_zar_out: Decimal,
}

impl ProfitQuote {
    /// Computes the quote from a snapshot.
    ///
    /// `loss_factor` is one minus the sum of the percentage fees on both
    /// legs. Snapshot prices are positive by construction (decoders
    /// reject non-positive prices), so the divisions are safe.
    pub fn compute(
        snapshot: &MarketSnapshot,
        loss_factor: Decimal,
        total_fiat_to_sell: Decimal,
    ) -> Self {
        // Sells are priced one rand above the best bid, so profit is
        // quoted off bid + 1 as well.
        let zar_per_btc = (snapshot.zar_bid + Decimal::ONE) * loss_factor;

        let percent = ((Decimal::ONE / snapshot.fiat_rate / snapshot.fiat_ask * zar_per_btc)
            - Decimal::ONE)
            * Decimal::ONE_HUNDRED;
        let potential_zar_out = total_fiat_to_sell / snapshot.fiat_ask * zar_per_btc;

        Self {
            percent: percent.round_dp(2),
            potential_zar_out: potential_zar_out.round_dp(2),
        }
    }

    /// Reports whether this quote meets the configured target.
    ///
    /// Absolute-ZAR targets compare realized ZAR against the total the
    /// trade aims to buy; percentage targets compare the net return.
    pub fn target_hit(&self, config: &TradeConfig) -> bool {
        if config.target_in_zar {
            self.potential_zar_out >= config.total_zar_to_buy
        } else {
            self.percent >= config.target
        }
    }
}
