use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::{PollingConfig, TradeConfig, TradeMode, ZarVenue};
use crate::domain::{
    FiatCurrency, MarketSnapshot, Order, OrderSide, OrderStage, Orderbook, PriceLevel, Ticker,
    Venue,
};
use crate::exchanges::{
    ExchangeError, FiatBalances, FiatExchange, FixedRate, Result as ExchangeResult, ZarBalances,
    ZarExchange,
};
use crate::notification::NoopNotifier;
use crate::trade::machine::{decide, SellOrderAction};
use crate::trade::{enough_liquidity, Outcome, ProfitQuote, TradeError, TradeSession};

fn order(venue: Venue, id: &str, state: &str) -> Order {
    Order {
        id: id.to_string(),
        venue,
        side: OrderSide::Ask,
        state: state.to_string(),
        pair: "XBTZAR".to_string(),
        limit_price: dec!(410001),
        limit_volume: dec!(0.2),
        filled_base: Decimal::ZERO,
        filled_quote: Decimal::ZERO,
        fee_base: Decimal::ZERO,
        fee_quote: Decimal::ZERO,
        matched_quote: Decimal::ZERO,
        created_at: None,
        completed_at: None,
    }
}

fn trade_config() -> TradeConfig {
    TradeConfig {
        account: "test".to_string(),
        zax: ZarVenue::Luno,
        mode: TradeMode::Limit,
        target: dec!(1.0),
        target_in_zar: false,
        total_fiat_to_sell: dec!(5000),
        total_zar_to_buy: dec!(100000),
        fiat_currency: FiatCurrency::Usd,
        fiat_rate: Some(dec!(20)),
        rebalance_after: false,
        minimum_withdrawal_zar: dec!(100000),
        order_buffer: dec!(0.0005),
    }
}

fn fast_polling() -> PollingConfig {
    PollingConfig {
        deposit_check: Duration::ZERO,
        target_retry: Duration::ZERO,
        order_status: Duration::ZERO,
        reconcile_idle: Duration::ZERO,
    }
}

/// ZAR-leg venue with a scripted sequence of get_order responses.
struct ScriptedZar {
    ticker: Ticker,
    book: Orderbook,
    balances: ZarBalances,
    /// Returned by place_limit_order, first in first out.
    placements: Mutex<VecDeque<Order>>,
    /// Returned by get_order, first in first out.
    order_states: Mutex<VecDeque<Order>>,
    cancelled: Mutex<Vec<String>>,
    verify_address: bool,
}

impl ScriptedZar {
    fn new() -> Self {
        Self {
            ticker: Ticker {
                ask: dec!(410010),
                bid: dec!(410000),
            },
            book: Orderbook {
                bids: vec![PriceLevel {
                    price: dec!(410000),
                    volume: dec!(5),
                }],
                asks: vec![PriceLevel {
                    price: dec!(410010),
                    volume: dec!(5),
                }],
            },
            balances: ZarBalances {
                btc: dec!(1),
                zar: Decimal::ZERO,
            },
            placements: Mutex::new(VecDeque::new()),
            order_states: Mutex::new(VecDeque::new()),
            cancelled: Mutex::new(Vec::new()),
            verify_address: true,
        }
    }

    fn script_placement(&self, order: Order) {
        self.placements.lock().unwrap().push_back(order);
    }

    fn script_order_state(&self, order: Order) {
        self.order_states.lock().unwrap().push_back(order);
    }
}

#[async_trait]
impl ZarExchange for ScriptedZar {
    fn name(&self) -> Venue {
        Venue::Luno
    }

    fn maker_fee(&self) -> Decimal {
        Decimal::ZERO
    }

    fn taker_fee(&self) -> Decimal {
        Decimal::ZERO
    }

    fn minimum_order_size(&self) -> Decimal {
        dec!(0.0002)
    }

    fn receive_address(&self) -> &str {
        "3test-address"
    }

    async fn ticker(&self) -> ExchangeResult<Ticker> {
        Ok(self.ticker)
    }

    async fn orderbook(&self) -> ExchangeResult<Orderbook> {
        Ok(self.book.clone())
    }

    async fn balances(&self) -> ExchangeResult<ZarBalances> {
        Ok(self.balances)
    }

    async fn place_limit_order(
        &self,
        _side: OrderSide,
        _volume: Decimal,
        _price: Decimal,
        _post_only: bool,
    ) -> ExchangeResult<Order> {
        self.placements
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ExchangeError::Api("no scripted placement".to_string()))
    }

    async fn cancel_order(&self, order_id: &str) -> ExchangeResult<()> {
        self.cancelled.lock().unwrap().push(order_id.to_string());
        Ok(())
    }

    async fn get_order(&self, order_id: &str) -> ExchangeResult<Order> {
        self.order_states
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ExchangeError::OrderNotFound(order_id.to_string()))
    }

    async fn verify_receive_address(&self, _address: &str) -> ExchangeResult<bool> {
        Ok(self.verify_address)
    }
}

/// Fiat-leg venue recording instant buys and withdrawals.
struct ScriptedFiat {
    ticker: Ticker,
    balances: Mutex<FiatBalances>,
    buys: Mutex<Vec<Decimal>>,
    withdrawals: Mutex<Vec<Decimal>>,
    reject_buys: bool,
    fail_withdrawals: bool,
}

impl ScriptedFiat {
    fn new() -> Self {
        Self {
            ticker: Ticker {
                ask: dec!(20000),
                bid: dec!(19990),
            },
            balances: Mutex::new(FiatBalances {
                btc: Decimal::ZERO,
                fiat: dec!(5000),
            }),
            buys: Mutex::new(Vec::new()),
            withdrawals: Mutex::new(Vec::new()),
            reject_buys: false,
            fail_withdrawals: false,
        }
    }
}

#[async_trait]
impl FiatExchange for ScriptedFiat {
    fn deposit_fee(&self) -> Decimal {
        Decimal::ZERO
    }

    fn taker_fee(&self) -> Decimal {
        Decimal::ZERO
    }

    fn minimum_order_fiat(&self) -> Decimal {
        dec!(25)
    }

    fn withdrawal_fee_btc(&self) -> Decimal {
        dec!(0.0002)
    }

    async fn ticker(&self, _currency: FiatCurrency) -> ExchangeResult<Ticker> {
        Ok(self.ticker)
    }

    async fn balances(&self, _currency: FiatCurrency) -> ExchangeResult<FiatBalances> {
        Ok(*self.balances.lock().unwrap())
    }

    async fn instant_buy(
        &self,
        fiat_amount: Decimal,
        _currency: FiatCurrency,
    ) -> ExchangeResult<Order> {
        if self.reject_buys {
            return Err(ExchangeError::Rejected("instant buy refused".to_string()));
        }
        self.buys.lock().unwrap().push(fiat_amount);

        let btc = fiat_amount / self.ticker.ask;
        let mut buy = order(Venue::Bitstamp, "1001", "Finished");
        buy.side = OrderSide::Bid;
        buy.filled_base = btc;
        buy.filled_quote = fiat_amount;
        Ok(buy)
    }

    async fn withdraw_btc(&self, amount: Decimal, _address: &str) -> ExchangeResult<String> {
        if self.fail_withdrawals {
            return Err(ExchangeError::Api("withdrawal refused".to_string()));
        }
        self.withdrawals.lock().unwrap().push(amount);
        Ok("w-1".to_string())
    }
}

fn session(zax: Arc<ScriptedZar>, fiat: Arc<ScriptedFiat>, config: TradeConfig) -> TradeSession {
    TradeSession::new(
        config,
        fast_polling(),
        zax,
        fiat,
        Arc::new(FixedRate(dec!(20))),
        Arc::new(NoopNotifier),
        None,
    )
}

// ==================== state machine ====================

#[test]
fn decide_covers_every_observation() {
    use OrderStage::*;
    use SellOrderAction::*;

    assert_eq!(decide(false, Unfilled, true), CancelAndRestart);
    assert_eq!(decide(false, Unfilled, false), CancelAndRestart);
    assert_eq!(decide(false, PartiallyFilled, true), CancelThenMatch);
    assert_eq!(decide(false, PartiallyFilled, false), CancelThenMatch);
    assert_eq!(decide(true, Unfilled, true), Wait);
    assert_eq!(decide(true, Unfilled, false), CancelAndRestart);
    assert_eq!(decide(true, PartiallyFilled, true), TryMatch);
    assert_eq!(decide(true, PartiallyFilled, false), CancelThenMatch);
    for target_hit in [true, false] {
        for top in [true, false] {
            assert_eq!(decide(target_hit, Cancelled, top), ProceedToMatch);
            assert_eq!(decide(target_hit, Complete, top), ProceedToMatch);
        }
    }
}

#[test]
fn underivable_stage_is_fatal() {
    let sess = session(
        Arc::new(ScriptedZar::new()),
        Arc::new(ScriptedFiat::new()),
        trade_config(),
    );
    // VALR reports a cancelled order with a fill in a shape no stage
    // derives from.
    let mut bad = order(Venue::Valr, "V1", "Cancelled");
    bad.filled_quote = dec!(500);

    match sess.stage_of(&bad) {
        Err(TradeError::UnexpectedOrderState { venue, state, .. }) => {
            assert_eq!(venue, Venue::Valr);
            assert_eq!(state, "Cancelled");
        }
        other => panic!("expected UnexpectedOrderState, got {:?}", other.map(|_| ())),
    }
}

// ==================== profit ====================

#[test]
fn profit_quote_matches_hand_computation() {
    let snapshot = MarketSnapshot {
        fiat_rate: dec!(20),
        fiat_ask: dec!(20000),
        fiat_bid: dec!(19990),
        zar_ask: dec!(300010),
        zar_bid: dec!(300000),
    };
    // (1 / 20 / 20000 * 300001 * 0.97 - 1) * 100 = -27.25
    let quote = ProfitQuote::compute(&snapshot, dec!(0.97), dec!(5000));
    assert_eq!(quote.percent, dec!(-27.25));
    // 5000 / 20000 * 300001 * 0.97 = 72750.24
    assert_eq!(quote.potential_zar_out, dec!(72750.24));
}

#[test]
fn target_hit_by_percent_and_by_zar() {
    let snapshot = MarketSnapshot {
        fiat_rate: dec!(20),
        fiat_ask: dec!(20000),
        fiat_bid: dec!(19990),
        zar_ask: dec!(410010),
        zar_bid: dec!(410000),
    };
    let quote = ProfitQuote::compute(&snapshot, Decimal::ONE, dec!(5000));
    // 410001 / 400000 = 2.5% over par.
    assert_eq!(quote.percent, dec!(2.50));

    let mut config = trade_config();
    config.target = dec!(2);
    assert!(quote.target_hit(&config));
    config.target = dec!(3);
    assert!(!quote.target_hit(&config));

    config.target_in_zar = true;
    config.total_zar_to_buy = dec!(100000);
    assert!(quote.target_hit(&config));
    config.total_zar_to_buy = dec!(110000);
    assert!(!quote.target_hit(&config));
}

// ==================== liquidity ====================

#[test]
fn liquidity_budget_separates_pass_from_fail() {
    let bids = vec![
        PriceLevel {
            price: dec!(100),
            volume: dec!(1),
        },
        PriceLevel {
            price: dec!(99),
            volume: dec!(2),
        },
        PriceLevel {
            price: dec!(98),
            volume: dec!(5),
        },
    ];
    // Two coins consume levels 1 and 2: weighted price 99.5, slippage 0.5%.
    assert!(enough_liquidity(&bids, dec!(100), dec!(2), dec!(0.01)));
    assert!(!enough_liquidity(&bids, dec!(100), dec!(2), dec!(0.005)));
}

#[test]
fn exhausted_book_fails_liquidity() {
    let bids = vec![PriceLevel {
        price: dec!(100),
        volume: dec!(1),
    }];
    assert!(!enough_liquidity(&bids, dec!(100), dec!(3), dec!(0.05)));
}

#[test]
fn liquidity_fails_early_once_over_budget() {
    // Level 2 already blows the budget; level 3 could supply the volume
    // but is never able to repair the weighted price.
    let bids = vec![
        PriceLevel {
            price: dec!(100),
            volume: dec!(1),
        },
        PriceLevel {
            price: dec!(80),
            volume: dec!(1),
        },
        PriceLevel {
            price: dec!(100),
            volume: dec!(50),
        },
    ];
    assert!(!enough_liquidity(&bids, dec!(100), dec!(10), dec!(0.05)));
}

// ==================== reconciliation ====================

#[tokio::test]
async fn matching_caps_spend_by_fiat_balance() {
    let zax = Arc::new(ScriptedZar::new());
    let fiat = Arc::new(ScriptedFiat::new());
    fiat.balances.lock().unwrap().fiat = dec!(3000);

    let mut sess = session(zax, fiat.clone(), trade_config());
    let mut sell = order(Venue::Luno, "S1", "COMPLETE");
    sell.filled_base = dec!(0.24);
    sell.filled_quote = dec!(100000);

    // Ideal spend is the full 5000, balance only covers 3000.
    sess.attempt_match_unmatched(&mut sell).await.unwrap();

    assert_eq!(*fiat.buys.lock().unwrap(), vec![dec!(3000)]);
    assert_eq!(sell.matched_quote, dec!(100000));
    assert!(sell.matched_quote <= sell.filled_quote);
    assert_eq!(sess.buy_order_ids.len(), 1);
    assert!(sess.not_yet_balanced > Decimal::ZERO);
}

#[tokio::test]
async fn sub_minimum_fill_is_left_unmatched() {
    let zax = Arc::new(ScriptedZar::new());
    let fiat = Arc::new(ScriptedFiat::new());

    let mut sess = session(zax, fiat.clone(), trade_config());
    let mut sell = order(Venue::Luno, "S1", "PENDING");
    // 400 of 100000 filled: ideal spend is 20, under the 25 minimum.
    sell.filled_quote = dec!(400);

    assert!(!sess.matching_actionable(&sell));
    sess.attempt_match_unmatched(&mut sell).await.unwrap();

    assert!(fiat.buys.lock().unwrap().is_empty());
    assert_eq!(sell.matched_quote, Decimal::ZERO);
}

#[tokio::test]
async fn rejected_matching_buy_is_fatal() {
    let zax = Arc::new(ScriptedZar::new());
    let mut fiat = ScriptedFiat::new();
    fiat.reject_buys = true;

    let mut sess = session(zax, Arc::new(fiat), trade_config());
    let mut sell = order(Venue::Luno, "S1", "COMPLETE");
    sell.filled_quote = dec!(100000);

    let err = sess.attempt_match_unmatched(&mut sell).await.unwrap_err();
    assert!(matches!(err, TradeError::MatchingBuyRejected(_)));
    // Nothing was bought, so nothing may be marked matched.
    assert_eq!(sell.matched_quote, Decimal::ZERO);
}

#[test]
fn fraction_remaining_is_monotone_and_clamped() {
    let mut sess = session(
        Arc::new(ScriptedZar::new()),
        Arc::new(ScriptedFiat::new()),
        trade_config(),
    );
    assert_eq!(sess.fraction_remaining, Decimal::ONE);

    let mut sell = order(Venue::Luno, "S1", "COMPLETE");
    sell.filled_quote = dec!(40000);
    sess.apply_fill_to_fraction(&sell);
    assert_eq!(sess.fraction_remaining, dec!(0.6));

    sess.apply_fill_to_fraction(&sell);
    assert_eq!(sess.fraction_remaining, dec!(0.2));

    // Rounding on the last cycle may overshoot; the fraction clamps.
    sell.filled_quote = dec!(30000);
    sess.apply_fill_to_fraction(&sell);
    assert_eq!(sess.fraction_remaining, Decimal::ZERO);
}

// ==================== rebalancing ====================

#[tokio::test]
async fn rebalance_skips_below_the_withdrawal_floor() {
    let zax = Arc::new(ScriptedZar::new());
    let fiat = Arc::new(ScriptedFiat::new());
    let mut config = trade_config();
    config.rebalance_after = true;

    let mut sess = session(zax, fiat.clone(), config);
    sess.snapshot.zar_ask = dec!(410010);
    // Floor is 100000 ZAR, about 0.244 BTC at this ask.
    sess.not_yet_balanced = dec!(0.1);

    sess.maybe_rebalance().await;

    assert!(fiat.withdrawals.lock().unwrap().is_empty());
    assert_eq!(sess.not_yet_balanced, dec!(0.1));
}

#[tokio::test]
async fn completed_trade_bypasses_the_withdrawal_floor() {
    let zax = Arc::new(ScriptedZar::new());
    let fiat = Arc::new(ScriptedFiat::new());
    let mut config = trade_config();
    config.rebalance_after = true;

    let mut sess = session(zax, fiat.clone(), config);
    sess.snapshot.zar_ask = dec!(410010);
    sess.fraction_remaining = Decimal::ZERO;
    sess.not_yet_balanced = dec!(0.1);

    sess.maybe_rebalance().await;

    // Withdrawal went out net of the flat fee, accumulator reset.
    assert_eq!(*fiat.withdrawals.lock().unwrap(), vec![dec!(0.0998)]);
    assert_eq!(sess.not_yet_balanced, Decimal::ZERO);
}

#[tokio::test]
async fn unverified_address_skips_the_withdrawal() {
    let mut zax = ScriptedZar::new();
    zax.verify_address = false;
    let fiat = Arc::new(ScriptedFiat::new());
    let mut config = trade_config();
    config.rebalance_after = true;

    let mut sess = session(Arc::new(zax), fiat.clone(), config);
    sess.snapshot.zar_ask = dec!(410010);
    sess.not_yet_balanced = dec!(1);

    sess.maybe_rebalance().await;

    assert!(fiat.withdrawals.lock().unwrap().is_empty());
    assert_eq!(sess.not_yet_balanced, dec!(1));
}

#[tokio::test]
async fn failed_withdrawal_keeps_the_accumulator() {
    let zax = Arc::new(ScriptedZar::new());
    let mut fiat = ScriptedFiat::new();
    fiat.fail_withdrawals = true;
    let mut config = trade_config();
    config.rebalance_after = true;

    let mut sess = session(zax, Arc::new(fiat), config);
    sess.snapshot.zar_ask = dec!(410010);
    sess.not_yet_balanced = dec!(1);

    sess.maybe_rebalance().await;

    assert_eq!(sess.not_yet_balanced, dec!(1));
}

// ==================== full runs ====================

#[tokio::test]
async fn limit_trade_completes_in_one_cycle() {
    let zax = Arc::new(ScriptedZar::new());
    let fiat = Arc::new(ScriptedFiat::new());

    let placed = order(Venue::Luno, "S1", "PENDING");
    zax.script_placement(placed);

    // First poll finds the order fully filled.
    let mut filled = order(Venue::Luno, "S1", "COMPLETE");
    filled.filled_base = dec!(0.2439);
    filled.filled_quote = dec!(100000);
    zax.script_order_state(filled);

    let mut sess = session(zax.clone(), fiat.clone(), trade_config());
    let outcome = sess.run().await.unwrap();

    assert_eq!(outcome, Outcome::Completed);
    assert_eq!(sess.sell_order_ids, vec!["S1".to_string()]);
    assert_eq!(sess.buy_order_ids.len(), 1);
    assert_eq!(*fiat.buys.lock().unwrap(), vec![dec!(5000)]);
    assert_eq!(sess.fraction_remaining, Decimal::ZERO);
    assert!(zax.cancelled.lock().unwrap().is_empty());

    let sell = sess.sell_order.as_ref().unwrap();
    assert!(sell.matched_quote <= sell.filled_quote);
    assert_eq!(sess.buy_order.as_ref().unwrap().id, "1001");
}

#[tokio::test]
async fn externally_cancelled_sell_stops_the_trade() {
    let zax = Arc::new(ScriptedZar::new());
    let fiat = Arc::new(ScriptedFiat::new());

    zax.script_placement(order(Venue::Luno, "S1", "PENDING"));
    // Luno reports COMPLETE with nothing filled: cancelled, not by us.
    zax.script_order_state(order(Venue::Luno, "S1", "COMPLETE"));

    let mut sess = session(zax.clone(), fiat.clone(), trade_config());
    let outcome = sess.run().await.unwrap();

    assert_eq!(outcome, Outcome::SellOrderCancelled);
    assert_eq!(outcome.exit_code(), 1);
    assert!(fiat.buys.lock().unwrap().is_empty());
    assert!(zax.cancelled.lock().unwrap().is_empty());
}

#[tokio::test]
async fn market_trade_sells_buys_and_completes() {
    let zax = Arc::new(ScriptedZar::new());
    let fiat = Arc::new(ScriptedFiat::new());
    let mut config = trade_config();
    config.mode = TradeMode::Market;
    config.target = dec!(2);

    zax.script_placement(order(Venue::Luno, "M1", "PENDING"));
    let mut filled = order(Venue::Luno, "M1", "COMPLETE");
    filled.filled_base = dec!(0.2439);
    filled.filled_quote = dec!(100000);
    zax.script_order_state(filled);

    let mut sess = session(zax.clone(), fiat.clone(), config);
    let outcome = sess.run().await.unwrap();

    assert_eq!(outcome, Outcome::Completed);
    assert_eq!(sess.sell_order_ids, vec!["M1".to_string()]);
    assert_eq!(*fiat.buys.lock().unwrap(), vec![dec!(5000)]);
}

#[tokio::test]
async fn underfunded_fiat_leg_trades_nothing() {
    let zax = Arc::new(ScriptedZar::new());
    let fiat = Arc::new(ScriptedFiat::new());
    fiat.balances.lock().unwrap().fiat = dec!(100);

    let mut sess = session(zax.clone(), fiat.clone(), trade_config());
    let outcome = sess.run().await.unwrap();

    assert_eq!(outcome, Outcome::InsufficientFunds);
    assert_eq!(outcome.exit_code(), 0);
    assert!(fiat.buys.lock().unwrap().is_empty());
    assert!(sess.sell_order_ids.is_empty());
}
