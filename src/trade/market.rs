//! Market trade: one liquidity-guarded crossing sell, one matching
//! instant buy, done.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::{info, warn};

use crate::domain::{Order, OrderSide, OrderStage};
use crate::trade::liquidity::enough_liquidity;
use crate::trade::session::TradeSession;
use crate::trade::{Outcome, TradeError};

/// Safety margin on the volume the book must absorb, on top of the
/// amount actually sold.
const LIQUIDITY_MARGIN: Decimal = Decimal::from_parts(1025, 0, 0, false, 3);

/// The sell is priced far enough under the best bid that it crosses the
/// whole depth the liquidity guard approved.
const CROSSING_PRICE_FACTOR: Decimal = Decimal::from_parts(9, 0, 0, false, 1);

impl TradeSession {
    pub(crate) async fn run_market(&mut self) -> Result<Outcome, TradeError> {
        let volume = loop {
            if !self.target_hit {
                tokio::time::sleep(self.missed_target_wait()).await;
                self.update_current_profit().await?;
                continue;
            }

            let volume = self.btc_to_sell().await?;
            if volume < self.zax.minimum_order_size() {
                let message = format!(
                    "BTC balance on {} supports an order of only {}, below the venue \
                     minimum of {}. Nothing traded.",
                    self.zax.name(),
                    volume,
                    self.zax.minimum_order_size(),
                );
                warn!("{}", message);
                self.notify(&message, false).await;
                return Ok(Outcome::InsufficientFunds);
            }

            let book = self.zax.orderbook().await?;
            let required = volume * LIQUIDITY_MARGIN;
            if enough_liquidity(
                &book.bids,
                self.snapshot.zar_bid,
                required,
                self.allowable_slippage(),
            ) {
                break volume;
            }

            info!(%required, "bid side too thin, waiting for depth");
            tokio::time::sleep(self.polling.target_retry).await;
            self.update_current_profit().await?;
        };

        let price = (self.snapshot.zar_bid * CROSSING_PRICE_FACTOR).round_dp(0);
        info!(%volume, %price, "placing crossing sell");
        let mut sell = self
            .zax
            .place_limit_order(OrderSide::Ask, volume, price, false)
            .await?;
        self.sell_order_ids.push(sell.id.clone());

        self.await_sell_complete(&mut sell).await?;
        if self.stage_of(&sell)? == OrderStage::Cancelled {
            let message = format!(
                "Crossing sell {} on {} was cancelled before filling. \
                 Trading stopped; reconcile the books manually.",
                sell.id,
                self.zax.name()
            );
            warn!("{}", message);
            self.notify(&message, true).await;
            self.sell_order = Some(sell);
            return Ok(Outcome::SellOrderCancelled);
        }

        self.apply_fill_to_fraction(&sell);
        self.attempt_match_unmatched(&mut sell).await?;
        self.send_trade_update(&sell).await;
        self.log_progress();
        self.maybe_rebalance().await;
        self.sell_order = Some(sell);

        self.record_trade().await;
        let message = format!(
            "Market trade complete for {}: sold R{} worth of BTC in one order.",
            self.config.account, self.config.total_zar_to_buy,
        );
        info!("{}", message);
        self.notify(&message, false).await;
        Ok(Outcome::Completed)
    }

    /// How long to wait before re-evaluating a missed target. Percentage
    /// targets wait proportionally to the shortfall, two seconds per
    /// percentage point, floored at the configured retry interval.
    fn missed_target_wait(&self) -> Duration {
        if self.config.target_in_zar {
            return self.polling.target_retry;
        }
        let shortfall = self.config.target - self.quote.percent;
        let secs = (shortfall * Decimal::TWO).to_u64().unwrap_or(0);
        self.polling.target_retry.max(Duration::from_secs(secs))
    }

    /// Slippage budget for the crossing sell: the margin by which the
    /// current quote clears the target. Anything less slipped still
    /// completes the trade at or above target.
    fn allowable_slippage(&self) -> Decimal {
        if self.config.target_in_zar {
            (self.quote.potential_zar_out - self.config.total_zar_to_buy)
                / self.config.total_zar_to_buy
        } else {
            (self.quote.percent - self.config.target) / Decimal::ONE_HUNDRED
        }
    }

    /// Polls the crossing sell until it leaves the book. A crossing order
    /// normally fills within one poll; anything still open is just
    /// polled again.
    async fn await_sell_complete(&mut self, sell: &mut Order) -> Result<(), TradeError> {
        loop {
            tokio::time::sleep(self.polling.order_status).await;
            self.refresh_order(sell).await?;
            match self.stage_of(sell)? {
                OrderStage::Unfilled | OrderStage::PartiallyFilled => {
                    info!(order_id = %sell.id, "crossing sell still open");
                }
                OrderStage::Cancelled | OrderStage::Complete => return Ok(()),
            }
        }
    }
}
