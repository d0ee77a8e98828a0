//! Limit trade: post-only sells at the top of the book, filled and
//! matched incrementally over as many cycles as the market allows.

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::domain::{Order, OrderSide, OrderStage};
use crate::trade::machine::{decide, SellOrderAction};
use crate::trade::session::TradeSession;
use crate::trade::{Outcome, TradeError};

/// How the inner monitoring loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MonitorOutcome {
    /// Order cancelled with nothing filled; start a new cycle.
    Restart,
    /// Order is done (filled, or cancelled by us after a partial fill);
    /// reconcile the fill.
    ProceedToMatch,
    /// Cancelled by someone other than the session.
    ExternallyCancelled,
}

impl TradeSession {
    pub(crate) async fn run_limit(&mut self) -> Result<Outcome, TradeError> {
        while !self.trade_complete() {
            self.reset_recent_buys();
            self.wait_for_btc_on_zar_leg().await?;

            while !self.update_current_profit().await? {
                tokio::time::sleep(self.polling.target_retry).await;
            }

            let volume = self.btc_to_sell().await?;
            if self.trade_complete() {
                break;
            }

            // One rand above the best bid keeps the order post-only while
            // staying at the very top of the ask side.
            let price = self.snapshot.zar_bid + Decimal::ONE;
            info!(%volume, %price, "placing post-only sell");
            let mut sell = self
                .zax
                .place_limit_order(OrderSide::Ask, volume, price, true)
                .await?;
            self.sell_order_ids.push(sell.id.clone());

            match self.monitor_sell_order(&mut sell).await? {
                MonitorOutcome::Restart => {
                    self.sell_order = Some(sell);
                    continue;
                }
                MonitorOutcome::ProceedToMatch => {
                    self.apply_fill_to_fraction(&sell);
                    self.attempt_match_unmatched(&mut sell).await?;
                    self.send_trade_update(&sell).await;
                    self.log_progress();
                    self.maybe_rebalance().await;
                    self.sell_order = Some(sell);
                }
                MonitorOutcome::ExternallyCancelled => {
                    let message = format!(
                        "Sell order {} on {} was cancelled outside the session. \
                         Trading stopped; reconcile the books manually.",
                        sell.id,
                        self.zax.name()
                    );
                    warn!("{}", message);
                    self.notify(&message, true).await;
                    self.sell_order = Some(sell);
                    return Ok(Outcome::SellOrderCancelled);
                }
            }
        }

        self.maybe_rebalance().await;
        self.record_trade().await;

        let message = format!(
            "Trade complete for {}: sold R{} worth of BTC across {} sell order(s).",
            self.config.account,
            self.config.total_zar_to_buy,
            self.sell_order_ids.len(),
        );
        info!("{}", message);
        self.notify(&message, false).await;
        Ok(Outcome::Completed)
    }

    /// Blocks until the ZAR leg holds enough BTC to place an order.
    /// Early cycles start here while the rebalance withdrawal of the
    /// previous trade is still in flight.
    async fn wait_for_btc_on_zar_leg(&mut self) -> Result<(), TradeError> {
        let needed = self.zax.minimum_order_size() + self.config.order_buffer;
        loop {
            self.update_zar_balances().await?;
            if self.zar_balances.btc >= needed {
                return Ok(());
            }
            info!(
                btc = %self.zar_balances.btc,
                %needed,
                "waiting for BTC to land on the ZAR leg"
            );
            tokio::time::sleep(self.polling.deposit_check).await;
        }
    }

    /// Polls the resting sell order until its life ends.
    ///
    /// Stage is derived from what the venue reports only while the order
    /// is ours to cancel. After the session's own cancel the order is
    /// consumed by filled amounts alone; some venues report a cancelled
    /// partially-filled order in a shape no stage derives from.
    async fn monitor_sell_order(&mut self, sell: &mut Order) -> Result<MonitorOutcome, TradeError> {
        loop {
            tokio::time::sleep(self.polling.order_status).await;

            let target_hit = self.update_current_profit().await?;
            self.refresh_order(sell).await?;
            let stage = self.stage_of(sell)?;
            let top_of_book = self.snapshot.zar_ask >= sell.limit_price;

            let action = decide(target_hit, stage, top_of_book);
            info!(
                order_id = %sell.id,
                ?stage,
                target_hit,
                top_of_book,
                ?action,
                "sell order polled"
            );

            match action {
                SellOrderAction::CancelAndRestart => {
                    self.cancel_and_refresh(sell).await?;
                    // The order may have filled in the race between the
                    // poll and the cancel landing.
                    if sell.filled_quote > Decimal::ZERO {
                        return Ok(MonitorOutcome::ProceedToMatch);
                    }
                    return Ok(MonitorOutcome::Restart);
                }
                SellOrderAction::CancelThenMatch => {
                    self.cancel_and_refresh(sell).await?;
                    return Ok(MonitorOutcome::ProceedToMatch);
                }
                SellOrderAction::Wait => continue,
                SellOrderAction::TryMatch => {
                    if self.matching_actionable(sell) {
                        self.attempt_match_unmatched(sell).await?;
                    } else {
                        tokio::time::sleep(self.polling.reconcile_idle).await;
                    }
                }
                SellOrderAction::ProceedToMatch => {
                    if stage == OrderStage::Cancelled {
                        return Ok(MonitorOutcome::ExternallyCancelled);
                    }
                    return Ok(MonitorOutcome::ProceedToMatch);
                }
            }
        }
    }
}
