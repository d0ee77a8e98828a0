//! Tests for exchange decoders and the retry policy.

use super::*;
use crate::domain::OrderStage;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

// ==================== Luno decoder tests ====================

#[test]
fn test_decode_luno_ticker() {
    let body = br#"{"pair":"XBTZAR","timestamp":1614592718372,"bid":"720000.00","ask":"721500.00","last_trade":"720500.00"}"#;
    let ticker = luno::decode_ticker(body).unwrap();
    assert_eq!(ticker.ask, dec!(721500.00));
    assert_eq!(ticker.bid, dec!(720000.00));
}

#[test]
fn test_decode_luno_ticker_rejects_zero_price() {
    let body = br#"{"bid":"0","ask":"721500.00"}"#;
    assert!(luno::decode_ticker(body).is_err());
}

#[test]
fn test_decode_luno_orderbook() {
    let body = br#"{
        "timestamp": 1614592718372,
        "bids": [{"price":"720000.00","volume":"0.5"},{"price":"719900.00","volume":"1.2"}],
        "asks": [{"price":"721500.00","volume":"0.3"}]
    }"#;
    let book = luno::decode_orderbook(body).unwrap();
    assert_eq!(book.bids.len(), 2);
    assert_eq!(book.best_bid().unwrap().price, dec!(720000.00));
    assert_eq!(book.best_ask().unwrap().volume, dec!(0.3));
}

#[test]
fn test_decode_luno_balances() {
    let body = br#"{"balance":[
        {"account_id":"1","asset":"XBT","balance":"0.145","reserved":"0.01","unconfirmed":"0"},
        {"account_id":"2","asset":"ZAR","balance":"2500.50","reserved":"0","unconfirmed":"0"},
        {"account_id":"3","asset":"ETH","balance":"9.9","reserved":"0","unconfirmed":"0"}
    ]}"#;
    let balances = luno::decode_balances(body).unwrap();
    assert_eq!(balances.btc, dec!(0.145));
    assert_eq!(balances.zar, dec!(2500.50));
}

#[test]
fn test_decode_luno_ask_order() {
    let body = br#"{
        "order_id":"BXMC2CJ7HNB88U4",
        "type":"ASK",
        "state":"PENDING",
        "pair":"XBTZAR",
        "limit_price":"720001.00",
        "limit_volume":"0.01",
        "base":"0.004",
        "counter":"2880.00",
        "fee_base":"0.00",
        "fee_counter":"2.88",
        "creation_timestamp":1614592718372,
        "completed_timestamp":0,
        "expiration_timestamp":0
    }"#;
    let order = luno::decode_order(body).unwrap();

    assert_eq!(order.id, "BXMC2CJ7HNB88U4");
    assert_eq!(order.venue, Venue::Luno);
    assert_eq!(order.side, OrderSide::Ask);
    assert_eq!(order.stage(), Some(OrderStage::PartiallyFilled));
    assert_eq!(order.filled_base, dec!(0.004));
    assert_eq!(order.filled_quote, dec!(2880.00));
    assert_eq!(order.fee_quote, dec!(2.88));
    assert!(order.created_at.is_some());
    // Luno reports open orders with a zero completed timestamp
    assert!(order.completed_at.is_none());
}

#[test]
fn test_decode_luno_bid_order_is_negated() {
    let body = br#"{
        "order_id":"BX1",
        "type":"BID",
        "state":"COMPLETE",
        "pair":"XBTZAR",
        "limit_price":"700000.00",
        "limit_volume":"0.01",
        "base":"0.01",
        "counter":"7000.00",
        "fee_base":"0.00",
        "fee_counter":"7.00",
        "creation_timestamp":1614592718372,
        "completed_timestamp":1614592918372
    }"#;
    let order = luno::decode_order(body).unwrap();

    assert_eq!(order.side, OrderSide::Bid);
    assert_eq!(order.filled_base, dec!(-0.01));
    assert_eq!(order.filled_quote, dec!(-7000.00));
    assert_eq!(order.fee_quote, dec!(7.00));
}

// ==================== VALR decoder tests ====================

#[test]
fn test_decode_valr_ticker() {
    let body = br#"{
        "currencyPair":"BTCZAR",
        "askPrice":"722000",
        "bidPrice":"721000",
        "lastTradedPrice":"721500"
    }"#;
    let ticker = valr::decode_ticker(body).unwrap();
    assert_eq!(ticker.ask, dec!(722000));
    assert_eq!(ticker.bid, dec!(721000));
}

#[test]
fn test_decode_valr_orderbook() {
    let body = br#"{
        "Asks":[{"side":"sell","quantity":"0.1","price":"722000","currencyPair":"BTCZAR","orderCount":1}],
        "Bids":[{"side":"buy","quantity":"0.3","price":"721000","currencyPair":"BTCZAR","orderCount":2},
                {"side":"buy","quantity":"1.1","price":"720500","currencyPair":"BTCZAR","orderCount":1}]
    }"#;
    let book = valr::decode_orderbook(body).unwrap();
    assert_eq!(book.best_bid().unwrap().price, dec!(721000));
    assert_eq!(book.bids[1].volume, dec!(1.1));
    assert_eq!(book.asks.len(), 1);
}

#[test]
fn test_decode_valr_balances() {
    let body = br#"[
        {"currency":"BTC","available":"0.2","reserved":"0.01","total":"0.21"},
        {"currency":"ZAR","available":"15000.55","reserved":"0","total":"15000.55"},
        {"currency":"XRP","available":"100","reserved":"0","total":"100"}
    ]"#;
    let balances = valr::decode_balances(body).unwrap();
    assert_eq!(balances.btc, dec!(0.2));
    assert_eq!(balances.zar, dec!(15000.55));
}

#[test]
fn test_decode_valr_ask_order_fill_from_remaining() {
    let body = br#"{
        "orderId":"38511e49-a755-4f8f-a2a1-232bdf452846",
        "orderStatusType":"Partially Filled",
        "currencyPair":"BTCZAR",
        "originalPrice":"721001",
        "remainingQuantity":"0.006",
        "originalQuantity":"0.01",
        "orderSide":"sell",
        "orderType":"post-only limit",
        "totalFee":"2.88",
        "feeCurrency":"ZAR",
        "orderCreatedAt":"2021-03-01T10:00:00.000Z",
        "orderUpdatedAt":"2021-03-01T10:05:00.000Z"
    }"#;
    let order = valr::decode_order(body).unwrap();

    assert_eq!(order.venue, Venue::Valr);
    assert_eq!(order.side, OrderSide::Ask);
    assert_eq!(order.stage(), Some(OrderStage::PartiallyFilled));
    // Fill derived from original minus remaining, priced at the limit
    assert_eq!(order.filled_base, dec!(0.004));
    assert_eq!(order.filled_quote, dec!(2884.004));
    assert_eq!(order.fee_quote, dec!(2.88));
    assert_eq!(order.fee_base, Decimal::ZERO);
}

#[test]
fn test_decode_valr_open_order_side_key() {
    // Open orders report side/createdAt instead of orderSide/orderCreatedAt
    let body = br#"{
        "orderId":"9e1bba6a",
        "orderStatusType":"Placed",
        "currencyPair":"BTCZAR",
        "originalPrice":"721001",
        "remainingQuantity":"0.01",
        "originalQuantity":"0.01",
        "side":"sell",
        "createdAt":"2021-03-01T10:00:00.000Z"
    }"#;
    let order = valr::decode_order(body).unwrap();
    assert_eq!(order.side, OrderSide::Ask);
    assert_eq!(order.stage(), Some(OrderStage::Unfilled));
    assert!(order.created_at.is_some());
    assert!(order.completed_at.is_none());
}

#[test]
fn test_decode_valr_bid_order_is_negated() {
    let body = br#"{
        "orderId":"b1",
        "orderStatusType":"Filled",
        "currencyPair":"BTCZAR",
        "originalPrice":"700000",
        "remainingQuantity":"0",
        "originalQuantity":"0.01",
        "orderSide":"buy",
        "totalFee":"0.0001",
        "feeCurrency":"BTC",
        "orderCreatedAt":"2021-03-01T10:00:00.000Z",
        "orderUpdatedAt":"2021-03-01T10:01:00.000Z"
    }"#;
    let order = valr::decode_order(body).unwrap();
    assert_eq!(order.filled_base, dec!(-0.01));
    assert_eq!(order.filled_quote, dec!(-7000.00));
    assert_eq!(order.fee_base, dec!(0.0001));
}

// ==================== Bitstamp decoder tests ====================

#[test]
fn test_decode_bitstamp_ticker() {
    let body = br#"{"high":"52000","last":"50100","bid":"50000.00","ask":"50050.00","low":"49000"}"#;
    let ticker = bitstamp::decode_ticker(body).unwrap();
    assert_eq!(ticker.ask, dec!(50050.00));
    assert_eq!(ticker.bid, dec!(50000.00));
}

#[test]
fn test_decode_bitstamp_balances() {
    let body = br#"{
        "btc_available":"0.05","btc_balance":"0.06","btc_reserved":"0.01",
        "usd_available":"4000.25","usd_balance":"4000.25","usd_reserved":"0.00",
        "eur_available":"10.00"
    }"#;
    let balances =
        bitstamp::decode_balances(body, crate::domain::FiatCurrency::Usd).unwrap();
    assert_eq!(balances.btc, dec!(0.05));
    assert_eq!(balances.fiat, dec!(4000.25));

    let balances =
        bitstamp::decode_balances(body, crate::domain::FiatCurrency::Eur).unwrap();
    assert_eq!(balances.fiat, dec!(10.00));
}

#[test]
fn test_decode_bitstamp_order_amalgamates_transactions() {
    let body = br#"{
        "status":"Finished",
        "transactions":[
            {"tid":1,"btc":"0.01","usd":"500.00","price":"50000.00","fee":"2.00","datetime":"2021-03-01 10:00:00.123000","type":2},
            {"tid":2,"btc":"0.02","usd":"1001.00","price":"50050.00","fee":"4.00","datetime":"2021-03-01 10:00:01.500000","type":2}
        ]
    }"#;
    let order =
        bitstamp::decode_order(body, "12345", crate::domain::FiatCurrency::Usd).unwrap();

    assert_eq!(order.venue, Venue::Bitstamp);
    assert_eq!(order.side, OrderSide::Bid);
    assert_eq!(order.state, "Finished");
    assert_eq!(order.filled_base, dec!(0.03));
    assert_eq!(order.filled_quote, dec!(1501.00));
    assert_eq!(order.fee_quote, dec!(6.00));
    assert!(order.created_at.is_some());
    assert!(order.is_complete());
}

#[test]
fn test_decode_bitstamp_canceled_order_is_complete() {
    // Venue quirk: instant orders that filled report Canceled
    let body = br#"{
        "status":"Canceled",
        "transactions":[
            {"tid":1,"btc":"0.01","usd":"500.00","price":"50000.00","fee":"2.00","datetime":"2021-03-01 10:00:00","type":2}
        ]
    }"#;
    let order =
        bitstamp::decode_order(body, "12345", crate::domain::FiatCurrency::Usd).unwrap();
    assert!(order.is_complete());
}

#[test]
fn test_decode_bitstamp_order_error_status() {
    let body = br#"{"status":"error","reason":"Order not found."}"#;
    let result = bitstamp::decode_order(body, "12345", crate::domain::FiatCurrency::Usd);
    assert!(matches!(result, Err(ExchangeError::Api(_))));
}

#[test]
fn test_decode_bitstamp_order_mixed_number_types() {
    // Bitstamp mixes numbers and strings in the same response family
    let body = br#"{
        "status":"Finished",
        "transactions":[
            {"tid":1,"btc":0.01,"usd":500.0,"price":50000.0,"fee":2.0,"datetime":"2021-03-01 10:00:00","type":2}
        ]
    }"#;
    let order =
        bitstamp::decode_order(body, "12345", crate::domain::FiatCurrency::Usd).unwrap();
    assert_eq!(order.filled_base, dec!(0.01));
    assert_eq!(order.filled_quote, dec!(500));
}

// ==================== Error taxonomy tests ====================

#[test]
fn test_retryable_errors() {
    assert!(ExchangeError::RateLimited("x".into()).is_retryable());
    assert!(ExchangeError::Api("x".into()).is_retryable());

    assert!(!ExchangeError::Unauthorized("x".into()).is_retryable());
    assert!(!ExchangeError::InsufficientFunds("x".into()).is_retryable());
    assert!(!ExchangeError::Rejected("x".into()).is_retryable());
    assert!(!ExchangeError::OrderNotFound("x".into()).is_retryable());
}

// ==================== Retry policy tests ====================

fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, Duration::ZERO, Duration::ZERO, 1.0)
}

#[tokio::test]
async fn test_retry_succeeds_after_transient_failures() {
    let calls = Arc::new(AtomicU32::new(0));
    let calls_ref = Arc::clone(&calls);

    let result = fast_policy(5)
        .run(|| {
            let calls = Arc::clone(&calls_ref);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ExchangeError::RateLimited("test".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), 42);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retry_exhausts_attempt_ceiling() {
    let calls = Arc::new(AtomicU32::new(0));
    let calls_ref = Arc::clone(&calls);

    let result: Result<()> = fast_policy(3)
        .run(|| {
            let calls = Arc::clone(&calls_ref);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ExchangeError::Api("down".into()))
            }
        })
        .await;

    assert!(matches!(result, Err(ExchangeError::Api(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retry_propagates_fatal_errors_immediately() {
    let calls = Arc::new(AtomicU32::new(0));
    let calls_ref = Arc::clone(&calls);

    let result: Result<()> = fast_policy(10)
        .run(|| {
            let calls = Arc::clone(&calls_ref);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ExchangeError::Unauthorized("bad key".into()))
            }
        })
        .await;

    assert!(matches!(result, Err(ExchangeError::Unauthorized(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
