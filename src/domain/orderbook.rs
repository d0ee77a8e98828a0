//! Orderbook and ticker data structures.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// PriceLevel represents a single price level in the orderbook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub volume: Decimal,
}

/// Orderbook represents the current state of bids and asks for a pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Orderbook {
    /// Sorted list of bid price levels (highest to lowest).
    pub bids: Vec<PriceLevel>,
    /// Sorted list of ask price levels (lowest to highest).
    pub asks: Vec<PriceLevel>,
}

impl Orderbook {
    /// Returns the best bid price level, if available.
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    /// Returns the best ask price level, if available.
    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }
}

/// Ticker is the current top of book for a pair.
///
/// Decoders reject non-positive prices, so both fields are safe to divide
/// by downstream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    /// Best ask price in quote currency.
    pub ask: Decimal,
    /// Best bid price in quote currency.
    pub bid: Decimal,
}
