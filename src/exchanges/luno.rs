//! Luno BTC/ZAR exchange integration.
//!
//! REST client for the Luno API using HTTP basic auth, plus the decode
//! path from Luno wire formats into the shared [`Order`] model.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client as HttpClient, Response, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::{ExecutionConfig, ZarVenueConfig};
use crate::domain::{Order, OrderSide, Orderbook, PriceLevel, Ticker, Venue};
use crate::exchanges::utils::{parse_decimal, parse_positive_price};
use crate::exchanges::{ExchangeError, Result, RetryPolicy, ZarBalances, ZarExchange};

/// Production Luno HTTP API endpoint.
const BASE_URL: &str = "https://api.mybitx.com/api/1";

/// The only pair this integration trades.
const PAIR: &str = "XBTZAR";

/// Luno calls bitcoin XBT.
const BTC_ASSET: &str = "XBT";

const ZAR_ASSET: &str = "ZAR";

/// Maximum volume precision the venue accepts.
const VOLUME_SCALE: u32 = 6;

/// Luno exchange implementation for the ZAR leg.
pub struct LunoExchange {
    http: HttpClient,
    config: ZarVenueConfig,
    retry: RetryPolicy,
    placement_retry: RetryPolicy,
}

impl LunoExchange {
    /// Creates a new Luno client from the venue and execution config.
    pub fn new(config: ZarVenueConfig, execution: &ExecutionConfig) -> Self {
        let http = HttpClient::builder()
            .timeout(execution.timeout)
            .build()
            .expect("failed to build http client");

        Self {
            http,
            retry: RetryPolicy::from_config(&execution.retry),
            placement_retry: RetryPolicy::for_placement(&execution.retry),
            config,
        }
    }

    async fn get_signed(&self, path: &str) -> Result<Vec<u8>> {
        let url = format!("{}{}", BASE_URL, path);
        let response = self
            .http
            .get(&url)
            .basic_auth(&self.config.api_key, Some(&self.config.api_secret))
            .send()
            .await?;
        read_body(response).await
    }

    async fn post_signed(&self, path: &str, form: &[(&str, String)]) -> Result<Vec<u8>> {
        let url = format!("{}{}", BASE_URL, path);
        let response = self
            .http
            .post(&url)
            .basic_auth(&self.config.api_key, Some(&self.config.api_secret))
            .form(form)
            .send()
            .await?;
        read_body(response).await
    }
}

#[async_trait]
impl ZarExchange for LunoExchange {
    fn name(&self) -> Venue {
        Venue::Luno
    }

    fn maker_fee(&self) -> Decimal {
        self.config.maker_fee
    }

    fn taker_fee(&self) -> Decimal {
        self.config.taker_fee
    }

    fn minimum_order_size(&self) -> Decimal {
        self.config.min_order_btc
    }

    fn receive_address(&self) -> &str {
        &self.config.receive_address
    }

    async fn ticker(&self) -> Result<Ticker> {
        let path = format!("/ticker?pair={}", PAIR);
        let body = self.retry.run(|| self.get_signed(&path)).await?;
        decode_ticker(&body)
    }

    async fn orderbook(&self) -> Result<Orderbook> {
        let path = format!("/orderbook?pair={}", PAIR);
        let body = self.retry.run(|| self.get_signed(&path)).await?;
        decode_orderbook(&body)
    }

    async fn balances(&self) -> Result<ZarBalances> {
        let body = self.retry.run(|| self.get_signed("/balance")).await?;
        let balances = decode_balances(&body)?;
        debug!(btc = %balances.btc, zar = %balances.zar, "fetched luno balances");
        Ok(balances)
    }

    async fn place_limit_order(
        &self,
        side: OrderSide,
        volume: Decimal,
        price: Decimal,
        post_only: bool,
    ) -> Result<Order> {
        // The venue rejects more than six decimals; round down so we never
        // offer more than is available.
        let volume = volume.trunc_with_scale(VOLUME_SCALE).normalize();
        let price = price.round();
        let order_type = match side {
            OrderSide::Ask => "ASK",
            OrderSide::Bid => "BID",
        };

        info!(
            order_type,
            %volume,
            %price,
            post_only,
            "placing luno limit order"
        );

        let form = [
            ("pair", PAIR.to_string()),
            ("type", order_type.to_string()),
            ("volume", volume.to_string()),
            ("price", price.to_string()),
            ("post_only", post_only.to_string()),
        ];

        let body = self
            .placement_retry
            .run(|| self.post_signed("/postorder", &form))
            .await?;
        let resp: PlaceOrderResponse = serde_json::from_slice(&body)
            .map_err(|e| ExchangeError::Api(format!("parse luno place response: {}", e)))?;

        self.get_order(&resp.order_id).await
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        info!(order_id, "cancelling luno order");

        let form = [("order_id", order_id.to_string())];
        let body = self
            .retry
            .run(|| self.post_signed("/stoporder", &form))
            .await?;
        let resp: StopOrderResponse = serde_json::from_slice(&body)
            .map_err(|e| ExchangeError::Api(format!("parse luno cancel response: {}", e)))?;

        // An unsuccessful cancel usually means the order went terminal
        // first; the follow-up refresh observes the real state.
        if !resp.success {
            warn!(order_id, "luno reported cancel unsuccessful");
        }
        Ok(())
    }

    async fn get_order(&self, order_id: &str) -> Result<Order> {
        let path = format!("/orders/{}", order_id);
        let body = self.retry.run(|| self.get_signed(&path)).await?;
        decode_order(&body)
    }

    async fn verify_receive_address(&self, address: &str) -> Result<bool> {
        let path = format!(
            "/funding_address?address={}&asset={}",
            urlencoding::encode(address),
            BTC_ASSET
        );
        let body = self.retry.run(|| self.get_signed(&path)).await?;
        let resp: FundingAddressResponse = serde_json::from_slice(&body)
            .map_err(|e| ExchangeError::Api(format!("parse luno funding address: {}", e)))?;

        let valid =
            resp.address.as_deref() == Some(address) && resp.asset.as_deref() == Some(BTC_ASSET);
        info!(address, valid, "luno receive address verification");
        Ok(valid)
    }
}

async fn read_body(response: Response) -> Result<Vec<u8>> {
    let status = response.status();
    let body = response.bytes().await?;

    if status == StatusCode::UNAUTHORIZED {
        return Err(ExchangeError::Unauthorized(
            "luno rejected the API credentials".to_string(),
        ));
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ExchangeError::RateLimited("luno".to_string()));
    }
    if !status.is_success() {
        return Err(parse_error_response(status, &body));
    }

    Ok(body.to_vec())
}

/// Creates an ExchangeError from a Luno error payload.
fn parse_error_response(status: StatusCode, body: &[u8]) -> ExchangeError {
    #[derive(Deserialize)]
    struct ErrorResponse {
        error: Option<String>,
        error_code: Option<String>,
    }

    if let Ok(resp) = serde_json::from_slice::<ErrorResponse>(body) {
        if resp.error_code.as_deref() == Some("ErrInsufficientBalance") {
            return ExchangeError::InsufficientFunds(
                resp.error
                    .unwrap_or_else(|| "luno balance too low".to_string()),
            );
        }
        if let Some(message) = resp.error {
            return ExchangeError::Api(format!("luno {}: {}", status, message));
        }
    }

    ExchangeError::Api(format!(
        "luno {}: {}",
        status,
        String::from_utf8_lossy(body)
    ))
}

/// Luno ticker response.
#[derive(Debug, Deserialize)]
struct TickerResponse {
    ask: String,
    bid: String,
    #[allow(dead_code)]
    timestamp: Option<i64>,
}

/// Luno balance list response.
#[derive(Debug, Deserialize)]
struct BalanceResponse {
    balance: Vec<BalanceEntry>,
}

#[derive(Debug, Deserialize)]
struct BalanceEntry {
    asset: String,
    balance: String,
    #[allow(dead_code)]
    reserved: Option<String>,
}

/// Luno orderbook response.
#[derive(Debug, Deserialize)]
struct OrderbookResponse {
    bids: Vec<OrderbookEntry>,
    asks: Vec<OrderbookEntry>,
}

#[derive(Debug, Deserialize)]
struct OrderbookEntry {
    price: String,
    volume: String,
}

/// Luno place order response.
#[derive(Debug, Deserialize)]
struct PlaceOrderResponse {
    order_id: String,
}

/// Luno cancel (stop order) response.
#[derive(Debug, Deserialize)]
struct StopOrderResponse {
    success: bool,
}

/// Luno funding address response.
#[derive(Debug, Deserialize)]
struct FundingAddressResponse {
    address: Option<String>,
    asset: Option<String>,
}

/// Luno order info response.
#[derive(Debug, Deserialize)]
struct OrderResponse {
    order_id: String,
    #[serde(rename = "type")]
    order_type: String,
    state: String,
    pair: String,
    limit_price: String,
    limit_volume: String,
    base: String,
    counter: String,
    fee_base: String,
    fee_counter: String,
    creation_timestamp: Option<i64>,
    completed_timestamp: Option<i64>,
    #[allow(dead_code)]
    expiration_timestamp: Option<i64>,
}

impl OrderResponse {
    fn to_order(&self) -> Result<Order> {
        let side = match self.order_type.as_str() {
            "ASK" => OrderSide::Ask,
            "BID" => OrderSide::Bid,
            other => {
                return Err(ExchangeError::Api(format!(
                    "unknown luno order type: {}",
                    other
                )));
            }
        };

        let mut order = Order {
            id: self.order_id.clone(),
            venue: Venue::Luno,
            side,
            state: self.state.clone(),
            pair: self.pair.clone(),
            limit_price: parse_decimal(&self.limit_price, "luno limit_price")?,
            limit_volume: parse_decimal(&self.limit_volume, "luno limit_volume")?,
            filled_base: parse_decimal(&self.base, "luno base")?,
            filled_quote: parse_decimal(&self.counter, "luno counter")?,
            fee_base: parse_decimal(&self.fee_base, "luno fee_base")?,
            fee_quote: parse_decimal(&self.fee_counter, "luno fee_counter")?,
            matched_quote: Decimal::ZERO,
            created_at: timestamp_ms(self.creation_timestamp),
            completed_at: timestamp_ms(self.completed_timestamp),
        };
        order.negate_bid_fills();
        Ok(order)
    }
}

/// Luno reports open orders with a zero completed timestamp.
fn timestamp_ms(value: Option<i64>) -> Option<DateTime<Utc>> {
    value
        .filter(|&ms| ms > 0)
        .and_then(DateTime::from_timestamp_millis)
}

pub(crate) fn decode_ticker(body: &[u8]) -> Result<Ticker> {
    let resp: TickerResponse = serde_json::from_slice(body)
        .map_err(|e| ExchangeError::Api(format!("parse luno ticker: {}", e)))?;
    Ok(Ticker {
        ask: parse_positive_price(&resp.ask, "luno ask")?,
        bid: parse_positive_price(&resp.bid, "luno bid")?,
    })
}

pub(crate) fn decode_orderbook(body: &[u8]) -> Result<Orderbook> {
    let resp: OrderbookResponse = serde_json::from_slice(body)
        .map_err(|e| ExchangeError::Api(format!("parse luno orderbook: {}", e)))?;
    Ok(Orderbook {
        bids: parse_levels(&resp.bids)?,
        asks: parse_levels(&resp.asks)?,
    })
}

fn parse_levels(entries: &[OrderbookEntry]) -> Result<Vec<PriceLevel>> {
    entries
        .iter()
        .map(|entry| {
            Ok(PriceLevel {
                price: parse_decimal(&entry.price, "luno level price")?,
                volume: parse_decimal(&entry.volume, "luno level volume")?,
            })
        })
        .collect()
}

pub(crate) fn decode_balances(body: &[u8]) -> Result<ZarBalances> {
    let resp: BalanceResponse = serde_json::from_slice(body)
        .map_err(|e| ExchangeError::Api(format!("parse luno balances: {}", e)))?;

    let mut btc = Decimal::ZERO;
    let mut zar = Decimal::ZERO;
    for entry in &resp.balance {
        match entry.asset.as_str() {
            BTC_ASSET => btc = parse_decimal(&entry.balance, "luno BTC balance")?,
            ZAR_ASSET => zar = parse_decimal(&entry.balance, "luno ZAR balance")?,
            _ => {}
        }
    }
    Ok(ZarBalances { btc, zar })
}

pub(crate) fn decode_order(body: &[u8]) -> Result<Order> {
    let resp: OrderResponse = serde_json::from_slice(body)
        .map_err(|e| ExchangeError::Api(format!("parse luno order: {}", e)))?;
    resp.to_order()
}
