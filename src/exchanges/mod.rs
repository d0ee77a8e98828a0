//! Exchange integration abstractions and implementations.
//!
//! One module per venue: Luno and VALR serve the ZAR leg, Bitstamp the
//! fiat leg. Each venue module owns its wire-format structs and decodes
//! them into the shared [`Order`](crate::domain::Order) model.

mod bitstamp;
mod luno;
mod rates;
mod retry;
mod utils;
mod valr;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::{FiatCurrency, Order, OrderSide, Orderbook, Ticker, Venue};

pub use bitstamp::BitstampExchange;
pub use luno::LunoExchange;
pub use rates::{FixedRate, FixerClient, RateSource};
pub use retry::RetryPolicy;
pub use valr::ValrExchange;

/// Exchange errors.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Credentials rejected by the venue.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The venue rate-limited the request.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Insufficient funds for the operation.
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    /// The venue explicitly rejected the request.
    #[error("rejected: {0}")]
    Rejected(String),

    /// Order not found.
    #[error("order {0} not found")]
    OrderNotFound(String),

    /// API error from the exchange.
    #[error("API error: {0}")]
    Api(String),

    /// Transport error.
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
}

impl ExchangeError {
    /// Reports whether retrying the call can change the outcome.
    ///
    /// Authorization failures, missing funds, explicit rejections and
    /// unknown orders are stable conditions and propagate immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExchangeError::RateLimited(_) | ExchangeError::Api(_) | ExchangeError::Request(_)
        )
    }
}

/// Result type for exchange operations.
pub type Result<T> = std::result::Result<T, ExchangeError>;

/// Balances held on the ZAR-leg venue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZarBalances {
    pub btc: Decimal,
    pub zar: Decimal,
}

/// Balances held on the fiat-leg venue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FiatBalances {
    pub btc: Decimal,
    pub fiat: Decimal,
}

/// ZarExchange is the BTC/ZAR venue the sell leg of the trade runs on.
///
/// Implemented by [`LunoExchange`] and [`ValrExchange`]; the session works
/// against this trait only.
#[async_trait]
pub trait ZarExchange: Send + Sync {
    /// Name returns the venue identifier.
    fn name(&self) -> Venue;

    /// Maker fee for resting limit orders, as a fraction.
    fn maker_fee(&self) -> Decimal;

    /// Taker fee for crossing orders, as a fraction.
    fn taker_fee(&self) -> Decimal;

    /// The smallest order the venue accepts, in BTC.
    fn minimum_order_size(&self) -> Decimal;

    /// Configured BTC receive address for custody rebalancing.
    fn receive_address(&self) -> &str;

    /// Fetches the current top of book for the BTC/ZAR pair.
    async fn ticker(&self) -> Result<Ticker>;

    /// Fetches the aggregated BTC/ZAR orderbook.
    async fn orderbook(&self) -> Result<Orderbook>;

    /// Fetches the available BTC and ZAR balances.
    async fn balances(&self) -> Result<ZarBalances>;

    /// Places a limit order and returns it freshly fetched from the venue.
    async fn place_limit_order(
        &self,
        side: OrderSide,
        volume: Decimal,
        price: Decimal,
        post_only: bool,
    ) -> Result<Order>;

    /// Cancels an open order. The caller observes the outcome by
    /// re-fetching the order afterwards.
    async fn cancel_order(&self, order_id: &str) -> Result<()>;

    /// Retrieves the current state of an order by its ID.
    async fn get_order(&self, order_id: &str) -> Result<Order>;

    /// Checks that the given BTC address belongs to this account.
    async fn verify_receive_address(&self, address: &str) -> Result<bool>;
}

/// FiatExchange is the venue the matching instant buys run on.
#[async_trait]
pub trait FiatExchange: Send + Sync {
    /// Deposit fee charged on inbound fiat, as a fraction.
    fn deposit_fee(&self) -> Decimal;

    /// Taker fee charged on instant orders, as a fraction.
    fn taker_fee(&self) -> Decimal;

    /// The smallest instant order the venue accepts, in fiat.
    fn minimum_order_fiat(&self) -> Decimal;

    /// Flat BTC fee charged per withdrawal.
    fn withdrawal_fee_btc(&self) -> Decimal;

    /// Fetches the current top of book for BTC against the given currency.
    async fn ticker(&self, currency: FiatCurrency) -> Result<Ticker>;

    /// Fetches the available BTC and fiat balances.
    async fn balances(&self, currency: FiatCurrency) -> Result<FiatBalances>;

    /// Places an instant market buy of BTC for the given fiat amount,
    /// polls until the venue reports the order done, and returns it with
    /// all partial fills amalgamated.
    async fn instant_buy(&self, fiat_amount: Decimal, currency: FiatCurrency) -> Result<Order>;

    /// Withdraws BTC to the given address. Returns the withdrawal ID.
    /// Never retried internally: a withdrawal is not idempotent.
    async fn withdraw_btc(&self, amount: Decimal, address: &str) -> Result<String>;
}

#[cfg(test)]
mod tests;
