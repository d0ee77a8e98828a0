//! Domain models for the two-legged arbitrage trade.

mod currency;
mod order;
mod orderbook;
mod snapshot;

pub use currency::FiatCurrency;
pub use order::{Order, OrderSide, OrderStage, Venue};
pub use orderbook::{Orderbook, PriceLevel, Ticker};
pub use snapshot::MarketSnapshot;
