//! VALR BTC/ZAR exchange integration.
//!
//! REST client for the VALR API. Requests are signed with HMAC-SHA512
//! over `timestamp + verb + path + body`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client as HttpClient, Method, Response, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha512;
use tracing::{debug, info, warn};

use crate::config::{ExecutionConfig, ZarVenueConfig};
use crate::domain::{Order, OrderSide, Orderbook, PriceLevel, Ticker, Venue};
use crate::exchanges::utils::{parse_decimal, parse_positive_price};
use crate::exchanges::{ExchangeError, Result, RetryPolicy, ZarBalances, ZarExchange};

/// Production VALR HTTP API endpoint.
const BASE_URL: &str = "https://api.valr.com";

const PAIR: &str = "BTCZAR";

const BTC_CURRENCY: &str = "BTC";

const ZAR_CURRENCY: &str = "ZAR";

/// Maximum volume precision the venue accepts.
const VOLUME_SCALE: u32 = 6;

/// VALR exchange implementation for the ZAR leg.
pub struct ValrExchange {
    http: HttpClient,
    config: ZarVenueConfig,
    retry: RetryPolicy,
    placement_retry: RetryPolicy,
}

impl ValrExchange {
    /// Creates a new VALR client from the venue and execution config.
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

    /// Builds the three VALR auth headers for a request.
    fn auth_headers(&self, verb: &Method, path: &str, body: &str) -> Result<Vec<(String, String)>> {
        let timestamp = Utc::now().timestamp_millis().to_string();
        let payload = format!("{}{}{}{}", timestamp, verb.as_str(), path, body);

        let mut mac = Hmac::<Sha512>::new_from_slice(self.config.api_secret.as_bytes())
            .map_err(|e| ExchangeError::Api(format!("valr hmac key: {}", e)))?;
        mac.update(payload.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        Ok(vec![
            ("X-VALR-API-KEY".to_string(), self.config.api_key.clone()),
            ("X-VALR-SIGNATURE".to_string(), signature),
            ("X-VALR-TIMESTAMP".to_string(), timestamp),
        ])
    }

    async fn request(&self, method: Method, path: &str, body: Option<String>) -> Result<Vec<u8>> {
        let url = format!("{}{}", BASE_URL, path);
        let body = body.unwrap_or_default();
        let headers = self.auth_headers(&method, path, &body)?;

        let mut request = self.http.request(method, &url);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        if !body.is_empty() {
            request = request
                .header("Content-Type", "application/json")
                .body(body);
        }

        read_body(request.send().await?).await
    }

    async fn get_public(&self, path: &str) -> Result<Vec<u8>> {
        let url = format!("{}{}", BASE_URL, path);
        read_body(self.http.get(&url).send().await?).await
    }
}

#[async_trait]
impl ZarExchange for ValrExchange {
    fn name(&self) -> Venue {
        Venue::Valr
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
        let path = format!("/v1/public/{}/marketsummary", PAIR);
        let body = self.retry.run(|| self.get_public(&path)).await?;
        decode_ticker(&body)
    }

    async fn orderbook(&self) -> Result<Orderbook> {
        // The aggregated public book; one level per price.
        let path = format!("/v1/public/{}/orderbook", PAIR);
        let body = self.retry.run(|| self.get_public(&path)).await?;
        decode_orderbook(&body)
    }

    async fn balances(&self) -> Result<ZarBalances> {
        let body = self
            .retry
            .run(|| self.request(Method::GET, "/v1/account/balances", None))
            .await?;
        let balances = decode_balances(&body)?;
        debug!(btc = %balances.btc, zar = %balances.zar, "fetched valr balances");
        Ok(balances)
    }

    async fn place_limit_order(
        &self,
        side: OrderSide,
        volume: Decimal,
        price: Decimal,
        post_only: bool,
    ) -> Result<Order> {
        let volume = volume.trunc_with_scale(VOLUME_SCALE).normalize();
        let price = price.round();
        let valr_side = match side {
            OrderSide::Ask => "SELL",
            OrderSide::Bid => "BUY",
        };

        info!(side = valr_side, %volume, %price, post_only, "placing valr limit order");

        let payload = serde_json::json!({
            "side": valr_side,
            "quantity": volume.to_string(),
            "price": price.to_string(),
            "pair": PAIR,
            "postOnly": post_only,
        });
        let body = payload.to_string();

        let response = self
            .placement_retry
            .run(|| self.request(Method::POST, "/v1/orders/limit", Some(body.clone())))
            .await?;
        let resp: PlaceOrderResponse = serde_json::from_slice(&response)
            .map_err(|e| ExchangeError::Api(format!("parse valr place response: {}", e)))?;

        let order = self.get_order(&resp.id).await?;

        // VALR accepts the order asynchronously; a post-only order that
        // would cross comes back Failed rather than being rejected at
        // placement time.
        if order.state == "Failed" {
            return Err(ExchangeError::Rejected(format!(
                "valr order {} failed",
                order.id
            )));
        }

        Ok(order)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        info!(order_id, "cancelling valr order");

        let payload = serde_json::json!({ "orderId": order_id, "pair": PAIR });
        let body = payload.to_string();
        self.retry
            .run(|| self.request(Method::DELETE, "/v1/orders/order", Some(body.clone())))
            .await?;
        Ok(())
    }

    async fn get_order(&self, order_id: &str) -> Result<Order> {
        let path = format!("/v1/orders/{}/orderid/{}", PAIR, order_id);
        let body = self
            .retry
            .run(|| self.request(Method::GET, &path, None))
            .await?;
        decode_order(&body)
    }

    async fn verify_receive_address(&self, address: &str) -> Result<bool> {
        let path = format!("/v1/wallet/crypto/{}/deposit/address", BTC_CURRENCY);
        let body = self
            .retry
            .run(|| self.request(Method::GET, &path, None))
            .await?;
        let resp: DepositAddressResponse = serde_json::from_slice(&body)
            .map_err(|e| ExchangeError::Api(format!("parse valr deposit address: {}", e)))?;

        let valid = resp.address.as_deref() == Some(address)
            && resp.currency.as_deref() == Some(BTC_CURRENCY);
        info!(address, valid, "valr receive address verification");
        Ok(valid)
    }
}

async fn read_body(response: Response) -> Result<Vec<u8>> {
    let status = response.status();
    let body = response.bytes().await?;

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(ExchangeError::Unauthorized(
            "valr rejected the API credentials".to_string(),
        ));
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ExchangeError::RateLimited("valr".to_string()));
    }
    if !status.is_success() {
        return Err(parse_error_response(status, &body));
    }

    Ok(body.to_vec())
}

/// Creates an ExchangeError from a VALR error payload.
fn parse_error_response(status: StatusCode, body: &[u8]) -> ExchangeError {
    #[derive(Deserialize)]
    struct ErrorResponse {
        message: Option<String>,
    }

    if let Ok(resp) = serde_json::from_slice::<ErrorResponse>(body) {
        if let Some(message) = resp.message {
            if message.to_lowercase().contains("insufficient") {
                return ExchangeError::InsufficientFunds(message);
            }
            return ExchangeError::Api(format!("valr {}: {}", status, message));
        }
    }

    ExchangeError::Api(format!(
        "valr {}: {}",
        status,
        String::from_utf8_lossy(body)
    ))
}

/// VALR market summary response.
#[derive(Debug, Deserialize)]
struct MarketSummaryResponse {
    #[serde(rename = "askPrice")]
    ask_price: String,
    #[serde(rename = "bidPrice")]
    bid_price: String,
}

/// VALR aggregated orderbook response.
#[derive(Debug, Deserialize)]
struct OrderbookResponse {
    #[serde(rename = "Bids")]
    bids: Vec<OrderbookEntry>,
    #[serde(rename = "Asks")]
    asks: Vec<OrderbookEntry>,
}

#[derive(Debug, Deserialize)]
struct OrderbookEntry {
    price: String,
    quantity: String,
}

/// VALR account balance entry.
#[derive(Debug, Deserialize)]
struct BalanceEntry {
    currency: String,
    available: String,
}

/// VALR place order response.
#[derive(Debug, Deserialize)]
struct PlaceOrderResponse {
    id: String,
}

/// VALR deposit address response.
#[derive(Debug, Deserialize)]
struct DepositAddressResponse {
    currency: Option<String>,
    address: Option<String>,
}

/// VALR order info response.
///
/// Open orders report `side`/`createdAt` where historical orders report
/// `orderSide`/`orderCreatedAt`, so both spellings are accepted.
#[derive(Debug, Deserialize)]
struct OrderResponse {
    #[serde(rename = "orderId")]
    order_id: String,
    #[serde(rename = "orderSide")]
    order_side: Option<String>,
    side: Option<String>,
    #[serde(rename = "orderStatusType")]
    order_status_type: String,
    #[serde(rename = "currencyPair")]
    currency_pair: String,
    #[serde(rename = "originalPrice")]
    original_price: String,
    #[serde(rename = "originalQuantity")]
    original_quantity: String,
    #[serde(rename = "remainingQuantity")]
    remaining_quantity: String,
    #[serde(rename = "totalFee", default)]
    total_fee: Option<String>,
    #[serde(rename = "feeCurrency", default)]
    fee_currency: Option<String>,
    #[serde(rename = "orderCreatedAt")]
    order_created_at: Option<String>,
    #[serde(rename = "createdAt")]
    created_at: Option<String>,
    #[serde(rename = "orderUpdatedAt")]
    order_updated_at: Option<String>,
}

impl OrderResponse {
    fn to_order(&self) -> Result<Order> {
        let raw_side = self
            .order_side
            .as_deref()
            .or(self.side.as_deref())
            .unwrap_or_default();
        let side = match raw_side.to_lowercase().as_str() {
            "sell" => OrderSide::Ask,
            "buy" => OrderSide::Bid,
            other => {
                return Err(ExchangeError::Api(format!(
                    "unknown valr order side: {}",
                    other
                )));
            }
        };

        let limit_price = parse_decimal(&self.original_price, "valr originalPrice")?;
        let original = parse_decimal(&self.original_quantity, "valr originalQuantity")?;
        let remaining = parse_decimal(&self.remaining_quantity, "valr remainingQuantity")?;

        // The venue reports no fill amounts directly, only the remaining
        // quantity; fills are priced at the limit since the order rests.
        let filled_base = original - remaining;
        let filled_quote = limit_price * filled_base;

        let total_fee = match &self.total_fee {
            Some(fee) => parse_decimal(fee, "valr totalFee")?,
            None => Decimal::ZERO,
        };
        let (fee_base, fee_quote) = match self.fee_currency.as_deref() {
            Some(BTC_CURRENCY) => (total_fee, Decimal::ZERO),
            Some(ZAR_CURRENCY) => (Decimal::ZERO, total_fee),
            _ => (Decimal::ZERO, Decimal::ZERO),
        };

        let mut order = Order {
            id: self.order_id.clone(),
            venue: Venue::Valr,
            side,
            state: self.order_status_type.clone(),
            pair: self.currency_pair.clone(),
            limit_price,
            limit_volume: original,
            filled_base,
            filled_quote,
            fee_base,
            fee_quote,
            matched_quote: Decimal::ZERO,
            created_at: timestamp_rfc3339(
                self.order_created_at.as_deref().or(self.created_at.as_deref()),
            ),
            completed_at: timestamp_rfc3339(self.order_updated_at.as_deref()),
        };
        order.negate_bid_fills();
        Ok(order)
    }
}

fn timestamp_rfc3339(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn order_failed_reason(body: &[u8]) -> Option<String> {
    #[derive(Deserialize)]
    struct FailedReason {
        #[serde(rename = "failedReason")]
        failed_reason: Option<String>,
    }

    serde_json::from_slice::<FailedReason>(body)
        .ok()
        .and_then(|r| r.failed_reason)
}

pub(crate) fn decode_ticker(body: &[u8]) -> Result<Ticker> {
    let resp: MarketSummaryResponse = serde_json::from_slice(body)
        .map_err(|e| ExchangeError::Api(format!("parse valr market summary: {}", e)))?;
    Ok(Ticker {
        ask: parse_positive_price(&resp.ask_price, "valr askPrice")?,
        bid: parse_positive_price(&resp.bid_price, "valr bidPrice")?,
    })
}

pub(crate) fn decode_orderbook(body: &[u8]) -> Result<Orderbook> {
    let resp: OrderbookResponse = serde_json::from_slice(body)
        .map_err(|e| ExchangeError::Api(format!("parse valr orderbook: {}", e)))?;
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
                price: parse_decimal(&entry.price, "valr level price")?,
                volume: parse_decimal(&entry.quantity, "valr level quantity")?,
            })
        })
        .collect()
}

pub(crate) fn decode_balances(body: &[u8]) -> Result<ZarBalances> {
    let entries: Vec<BalanceEntry> = serde_json::from_slice(body)
        .map_err(|e| ExchangeError::Api(format!("parse valr balances: {}", e)))?;

    let mut btc = Decimal::ZERO;
    let mut zar = Decimal::ZERO;
    for entry in &entries {
        match entry.currency.as_str() {
            BTC_CURRENCY => btc = parse_decimal(&entry.available, "valr BTC balance")?,
            ZAR_CURRENCY => zar = parse_decimal(&entry.available, "valr ZAR balance")?,
            _ => {}
        }
    }
    Ok(ZarBalances { btc, zar })
}

pub(crate) fn decode_order(body: &[u8]) -> Result<Order> {
    let resp: OrderResponse = serde_json::from_slice(body)
        .map_err(|e| ExchangeError::Api(format!("parse valr order: {}", e)))?;

    if let Some(reason) = order_failed_reason(body) {
        if !reason.is_empty() {
            warn!(order_id = %resp.order_id, reason = %reason, "valr order reported a failure reason");
        }
    }

    resp.to_order()
}
