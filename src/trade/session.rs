//! Trade session state and the operations shared by both trade variants.

use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{PollingConfig, TradeConfig, TradeMode};
use crate::domain::{MarketSnapshot, Order, OrderStage};
use crate::exchanges::{
    ExchangeError, FiatBalances, FiatExchange, RateSource, ZarBalances, ZarExchange,
};
use crate::notification::Notifier;
use crate::storage::{TradeRecord, TradeRecordStore};
use crate::trade::{Outcome, ProfitQuote, TradeError};

/// TradeSession owns all state of one arbitrage trade run.
///
/// It is the sole mutator of the monetary accounting: the fraction of the
/// trade remaining, the BTC accumulated for rebalancing, and the matched
/// amounts on active orders. All exchange calls are sequential; there is
/// no concurrent mutation anywhere in a session.
pub struct TradeSession {
    pub(crate) config: TradeConfig,
    pub(crate) polling: PollingConfig,

    pub(crate) zax: Arc<dyn ZarExchange>,
    pub(crate) fiat: Arc<dyn FiatExchange>,
    pub(crate) rates: Arc<dyn RateSource>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) store: Option<Arc<dyn TradeRecordStore>>,

    /// Prices of both legs plus the fiat rate, refreshed together.
    pub(crate) snapshot: MarketSnapshot,
    /// Profit implied by the latest snapshot.
    pub(crate) quote: ProfitQuote,
    /// Whether the latest quote met the configured target.
    pub(crate) target_hit: bool,

    pub(crate) zar_balances: ZarBalances,
    pub(crate) fiat_balances: FiatBalances,

    /// Fraction of the configured totals still to trade, in [0, 1].
    pub(crate) fraction_remaining: Decimal,
    /// BTC bought on the fiat leg and not yet withdrawn to the ZAR leg.
    pub(crate) not_yet_balanced: Decimal,

    /// Every sell order placed over the whole run.
    pub(crate) sell_order_ids: Vec<String>,
    /// Every matching buy placed over the whole run.
    pub(crate) buy_order_ids: Vec<String>,

    /// The sell order of the current (or last) cycle.
    pub(crate) sell_order: Option<Order>,
    /// The matching buy of the current (or last) reconciliation.
    pub(crate) buy_order: Option<Order>,

    /// Matching buys of the current sell cycle, for the per-cycle
    /// trade-update notification.
    pub(crate) recent_buy_order_ids: Vec<String>,
    pub(crate) recent_buy_fiat_spend: Decimal,
    pub(crate) recent_buy_btc: Decimal,
}

impl TradeSession {
    /// Creates a session. Nothing is fetched until [`TradeSession::run`].
    pub fn new(
        config: TradeConfig,
        polling: PollingConfig,
        zax: Arc<dyn ZarExchange>,
        fiat: Arc<dyn FiatExchange>,
        rates: Arc<dyn RateSource>,
        notifier: Arc<dyn Notifier>,
        store: Option<Arc<dyn TradeRecordStore>>,
    ) -> Self {
        Self {
            config,
            polling,
            zax,
            fiat,
            rates,
            notifier,
            store,
            snapshot: MarketSnapshot {
                fiat_rate: Decimal::ZERO,
                fiat_ask: Decimal::ZERO,
                fiat_bid: Decimal::ZERO,
                zar_ask: Decimal::ZERO,
                zar_bid: Decimal::ZERO,
            },
            quote: ProfitQuote {
                percent: Decimal::ZERO,
                potential_zar_out: Decimal::ZERO,
            },
            target_hit: false,
            zar_balances: ZarBalances {
                btc: Decimal::ZERO,
                zar: Decimal::ZERO,
            },
            fiat_balances: FiatBalances {
                btc: Decimal::ZERO,
                fiat: Decimal::ZERO,
            },
            fraction_remaining: Decimal::ONE,
            not_yet_balanced: Decimal::ZERO,
            sell_order_ids: Vec::new(),
            buy_order_ids: Vec::new(),
            sell_order: None,
            buy_order: None,
            recent_buy_order_ids: Vec::new(),
            recent_buy_fiat_spend: Decimal::ZERO,
            recent_buy_btc: Decimal::ZERO,
        }
    }

    /// Runs the trade to a terminal outcome.
    pub async fn run(&mut self) -> Result<Outcome, TradeError> {
        self.update_current_profit().await?;
        self.update_account_balances().await?;

        // Preflight: an underfunded fiat leg is an expected outcome, not
        // an error. Nothing has been traded yet.
        if self.config.total_fiat_to_sell > self.fiat_balances.fiat {
            let message = format!(
                "{} balance on the fiat leg is {} but the trade needs {}. Nothing traded.",
                self.config.fiat_currency.code(),
                self.fiat_balances.fiat,
                self.config.total_fiat_to_sell,
            );
            warn!("{}", message);
            self.notify(&message, false).await;
            return Ok(Outcome::InsufficientFunds);
        }

        match self.config.mode {
            TradeMode::Limit => self.run_limit().await,
            TradeMode::Market => self.run_market().await,
        }
    }

    /// Cumulative multiplicative fee drag over one round trip. The ZAR
    /// leg charges the maker fee on resting orders and the taker fee on
    /// crossing ones.
    pub(crate) fn loss_factor(&self) -> Decimal {
        let zar_leg_fee = match self.config.mode {
            TradeMode::Limit => self.zax.maker_fee(),
            TradeMode::Market => self.zax.taker_fee(),
        };
        Decimal::ONE - self.fiat.deposit_fee() - self.fiat.taker_fee() - zar_leg_fee
    }

    /// Refreshes the market snapshot and recomputes the profit quote.
    /// Returns whether the target is hit. Safe to call repeatedly.
    pub(crate) async fn update_current_profit(&mut self) -> Result<bool, TradeError> {
        self.refresh_snapshot().await?;

        self.quote = ProfitQuote::compute(
            &self.snapshot,
            self.loss_factor(),
            self.config.total_fiat_to_sell,
        );
        self.target_hit = self.quote.target_hit(&self.config);

        if self.config.target_in_zar {
            info!(
                target_zar = %self.config.total_zar_to_buy,
                potential_zar = %self.quote.potential_zar_out,
                target_hit = self.target_hit,
                "profit refreshed"
            );
        } else {
            info!(
                target_percent = %self.config.target,
                current_percent = %self.quote.percent,
                target_hit = self.target_hit,
                "profit refreshed"
            );
        }

        Ok(self.target_hit)
    }

    async fn refresh_snapshot(&mut self) -> Result<(), TradeError> {
        let fiat_rate = match self.config.fiat_rate {
            Some(rate) => rate,
            None => self.rates.zar_rate(self.config.fiat_currency).await?,
        };

        let fiat_ticker = self.fiat.ticker(self.config.fiat_currency).await?;
        let zar_ticker = self.zax.ticker().await?;

        self.snapshot = MarketSnapshot {
            fiat_rate,
            fiat_ask: fiat_ticker.ask,
            fiat_bid: fiat_ticker.bid,
            zar_ask: zar_ticker.ask,
            zar_bid: zar_ticker.bid,
        };
        debug!(
            fiat_rate = %self.snapshot.fiat_rate,
            fiat_ask = %self.snapshot.fiat_ask,
            fiat_bid = %self.snapshot.fiat_bid,
            zar_ask = %self.snapshot.zar_ask,
            zar_bid = %self.snapshot.zar_bid,
            "market snapshot refreshed"
        );
        Ok(())
    }

    pub(crate) async fn update_zar_balances(&mut self) -> Result<(), TradeError> {
        self.zar_balances = self.zax.balances().await?;
        Ok(())
    }

    pub(crate) async fn update_fiat_balances(&mut self) -> Result<(), TradeError> {
        self.fiat_balances = self.fiat.balances(self.config.fiat_currency).await?;
        Ok(())
    }

    pub(crate) async fn update_account_balances(&mut self) -> Result<(), TradeError> {
        self.update_zar_balances().await?;
        self.update_fiat_balances().await?;
        Ok(())
    }

    /// BTC to offer on the next sell order: the remainder of the trade at
    /// the current ask, capped by what is actually on the ZAR leg less
    /// the rounding buffer. Balances are re-fetched first; sizing off a
    /// stale balance risks offering BTC that is no longer there.
    pub(crate) async fn btc_to_sell(&mut self) -> Result<Decimal, TradeError> {
        self.update_account_balances().await?;

        let ideal =
            self.fraction_remaining * self.config.total_zar_to_buy / self.snapshot.zar_ask;
        let available = self.zar_balances.btc - self.config.order_buffer;
        Ok(ideal.min(available))
    }

    /// The trade is complete once the remainder is below either venue's
    /// minimum order size.
    pub(crate) fn trade_complete(&self) -> bool {
        let btc_left =
            self.fraction_remaining * self.config.total_zar_to_buy / self.snapshot.zar_ask;
        let fiat_left = self.fraction_remaining * self.config.total_fiat_to_sell;

        btc_left < self.zax.minimum_order_size() + self.config.order_buffer
            || fiat_left < self.fiat.minimum_order_fiat()
    }

    /// The configured ZAR withdrawal floor at the current ask price.
    pub(crate) fn minimum_withdrawal_btc(&self) -> Decimal {
        self.config.minimum_withdrawal_zar / self.snapshot.zar_ask
    }

    /// Derives the lifecycle stage, failing fatally when none applies.
    pub(crate) fn stage_of(&self, order: &Order) -> Result<OrderStage, TradeError> {
        order.stage().ok_or_else(|| TradeError::UnexpectedOrderState {
            venue: order.venue,
            order_id: order.id.clone(),
            state: order.state.clone(),
        })
    }

    /// Re-fetches an order in place, carrying the matched amount forward.
    pub(crate) async fn refresh_order(&self, order: &mut Order) -> Result<(), TradeError> {
        let matched_quote = order.matched_quote;
        let mut refreshed = self.zax.get_order(&order.id).await?;
        refreshed.matched_quote = matched_quote;
        *order = refreshed;
        Ok(())
    }

    /// Issues a cancel, then refreshes to observe it taking effect.
    pub(crate) async fn cancel_and_refresh(&self, order: &mut Order) -> Result<(), TradeError> {
        self.zax.cancel_order(&order.id).await?;
        self.refresh_order(order).await
    }

    /// Reduces the fraction remaining by the share of the total this sell
    /// order realized. Clamped to zero so rounding on the final cycle
    /// cannot push it negative.
    pub(crate) fn apply_fill_to_fraction(&mut self, sell: &Order) {
        let fraction_just_sold = sell.filled_quote / self.config.total_zar_to_buy;
        info!(
            %fraction_just_sold,
            fraction_remaining = %self.fraction_remaining,
            "updating trade progress"
        );
        self.fraction_remaining =
            (self.fraction_remaining - fraction_just_sold).max(Decimal::ZERO);
    }

    /// Fiat needed on the fiat leg to match the sell order's unmatched
    /// proceeds, uncapped.
    pub(crate) fn fiat_to_match(&self, sell: &Order) -> Decimal {
        sell.unmatched_quote() / self.config.total_zar_to_buy * self.config.total_fiat_to_sell
    }

    /// Whether the unmatched amount is worth acting on: positive, and big
    /// enough to clear the fiat leg's minimum order size.
    pub(crate) fn matching_actionable(&self, sell: &Order) -> bool {
        sell.unmatched_quote() > Decimal::ZERO
            && self.fiat_to_match(sell) > self.fiat.minimum_order_fiat()
    }

    /// Converts the sell order's unmatched proceeds into a matching
    /// instant buy on the fiat leg.
    ///
    /// The spend is capped by the current fiat balance, re-fetched here
    /// so matching done earlier in the cycle is accounted for. An
    /// explicit rejection by the venue is fatal: the legs' books no
    /// longer agree and continuing risks losing track of funds.
    pub(crate) async fn attempt_match_unmatched(
        &mut self,
        sell: &mut Order,
    ) -> Result<(), TradeError> {
        let unmatched = sell.unmatched_quote();
        if !self.matching_actionable(sell) {
            info!(%unmatched, "unmatched proceeds not actionable");
            return Ok(());
        }

        self.update_account_balances().await?;
        let fiat_amount = self.fiat_to_match(sell).min(self.fiat_balances.fiat);

        info!(%unmatched, %fiat_amount, "matching unmatched proceeds on the fiat leg");

        let buy = match self
            .fiat
            .instant_buy(fiat_amount, self.config.fiat_currency)
            .await
        {
            Ok(buy) => buy,
            Err(ExchangeError::Rejected(reason)) => {
                return Err(TradeError::MatchingBuyRejected(reason));
            }
            Err(err) => return Err(err.into()),
        };

        sell.matched_quote += unmatched;
        self.not_yet_balanced += buy.filled_base;

        self.buy_order_ids.push(buy.id.clone());
        self.recent_buy_order_ids.push(buy.id.clone());
        self.recent_buy_fiat_spend += buy.filled_quote;
        self.recent_buy_btc += buy.filled_base;

        info!(
            buy_order_id = %buy.id,
            btc_bought = %buy.filled_base,
            not_yet_balanced = %self.not_yet_balanced,
            "matching buy complete"
        );
        self.buy_order = Some(buy);
        Ok(())
    }

    /// Withdraws the accumulated BTC when it clears the configured floor,
    /// or unconditionally once the trade is complete.
    pub(crate) async fn maybe_rebalance(&mut self) {
        if !self.config.rebalance_after || self.not_yet_balanced <= Decimal::ZERO {
            return;
        }
        if self.not_yet_balanced > self.minimum_withdrawal_btc() || self.trade_complete() {
            self.rebalance_btc().await;
        } else {
            info!(
                not_yet_balanced = %self.not_yet_balanced,
                minimum = %self.minimum_withdrawal_btc(),
                "accumulated BTC below withdrawal floor, skipping rebalance"
            );
        }
    }

    /// Moves the accumulated BTC from the fiat leg back to the ZAR leg.
    ///
    /// Never fatal: on any failure the accumulator is left untouched for
    /// the next trigger. The receive address is verified first and a
    /// failed verification skips the withdrawal entirely rather than
    /// sending funds to an address the venue does not recognize.
    pub(crate) async fn rebalance_btc(&mut self) {
        let address = self.zax.receive_address().to_string();
        info!(address = %address, "rebalancing BTC to the ZAR leg");

        match self.zax.verify_receive_address(&address).await {
            Ok(true) => {}
            Ok(false) => {
                let message = format!(
                    "{} did not recognize receive address {}. Withdrawal skipped.",
                    self.zax.name(),
                    address
                );
                warn!("{}", message);
                self.notify(&message, true).await;
                return;
            }
            Err(err) => {
                let message =
                    format!("Receive address verification failed: {}. Withdrawal skipped.", err);
                warn!("{}", message);
                self.notify(&message, true).await;
                return;
            }
        }

        let amount = self.not_yet_balanced - self.fiat.withdrawal_fee_btc();
        if amount <= Decimal::ZERO {
            warn!(
                not_yet_balanced = %self.not_yet_balanced,
                "accumulated BTC does not cover the withdrawal fee, skipping"
            );
            return;
        }

        match self.fiat.withdraw_btc(amount, &address).await {
            Ok(withdrawal_id) => {
                info!(%withdrawal_id, %amount, "rebalance withdrawal submitted");
                self.not_yet_balanced = Decimal::ZERO;
            }
            Err(err) => {
                let message = format!(
                    "Rebalance withdrawal of {} BTC failed: {}. Will retry on the next trigger.",
                    amount, err
                );
                warn!("{}", message);
                self.notify(&message, true).await;
            }
        }
    }

    /// Best-effort notification; delivery failures never abort a trade.
    pub(crate) async fn notify(&self, message: &str, urgent: bool) {
        if let Err(err) = self.notifier.send(message, urgent).await {
            warn!(error = %err, "notification delivery failed");
        }
    }

    pub(crate) fn reset_recent_buys(&mut self) {
        self.recent_buy_order_ids.clear();
        self.recent_buy_fiat_spend = Decimal::ZERO;
        self.recent_buy_btc = Decimal::ZERO;
    }

    pub(crate) fn log_progress(&self) {
        let complete = (Decimal::ONE - self.fraction_remaining) * Decimal::ONE_HUNDRED;
        info!(
            percent_complete = %complete.round_dp(2),
            percent_remaining = %(self.fraction_remaining * Decimal::ONE_HUNDRED).round_dp(2),
            "trade progress"
        );
    }

    /// Sends the per-cycle trade update after a sell order's life ends.
    pub(crate) async fn send_trade_update(&self, sell: &Order) {
        let btc_profit = self.recent_buy_btc - sell.filled_base;
        let complete = (Decimal::ONE - self.fraction_remaining) * Decimal::ONE_HUNDRED;

        let message = format!(
            "Trade update for {}:\n\n\
             Just sold {} BTC for R{} and bought {} BTC for {} {}\n\n\
             Profit in BTC: {}\n\
             Profit in ZAR: R{}\n\
             Percentage complete: {}%\n\n\
             Buy order ID(s): {}\n\
             Sell order ID: {}",
            self.config.account,
            sell.filled_base.round_dp(6),
            sell.filled_quote.round_dp(2),
            self.recent_buy_btc.round_dp(6),
            self.recent_buy_fiat_spend.round_dp(2),
            self.config.fiat_currency.code(),
            btc_profit.round_dp(6),
            (btc_profit * self.snapshot.zar_bid).round_dp(2),
            complete.round_dp(2),
            self.recent_buy_order_ids.join(", "),
            sell.id,
        );
        self.notify(&message, false).await;
    }

    /// Persists the run summary. Best-effort: a storage failure is logged
    /// and swallowed, the money already moved.
    pub(crate) async fn record_trade(&self) {
        let Some(store) = &self.store else {
            return;
        };

        let completed_at = Utc::now();
        let record = TradeRecord {
            account: self.config.account.clone(),
            total_zar: self.config.total_zar_to_buy,
            total_fiat: self.config.total_fiat_to_sell,
            fiat_currency: self.config.fiat_currency,
            // The fiat was typically bought within the last few days; the
            // window lets reporting find the matching rate.
            window_start: completed_at - ChronoDuration::days(5),
            completed_at,
            zar_order_ids: self.sell_order_ids.clone(),
            fiat_order_ids: self.buy_order_ids.clone(),
        };

        if let Err(err) = store.save(&record).await {
            warn!(error = %err, "failed to persist the trade record");
        }
    }
}
