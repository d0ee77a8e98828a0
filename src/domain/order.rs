//! Core business entities for orders across the three venues.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Venue identifies the exchange an order lives on.
///
/// Each venue reports order lifecycle in its own vocabulary, so the venue
/// tag travels with the order and selects the right stage derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    /// Luno, a ZAR-leg venue (pair XBTZAR).
    Luno,
    /// VALR, a ZAR-leg venue (pair BTCZAR).
    Valr,
    /// Bitstamp, the fiat-leg venue (pairs btcusd / btceur).
    Bitstamp,
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Venue::Luno => "luno",
            Venue::Valr => "valr",
            Venue::Bitstamp => "bitstamp",
        };
        f.write_str(s)
    }
}

/// OrderSide represents the direction of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    /// Bid is a buy order.
    Bid,
    /// Ask is a sell order.
    Ask,
}

/// OrderStage is the normalized lifecycle stage of an order, derived from
/// the venue-reported state string and the filled amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStage {
    /// The order is open with nothing filled yet.
    Unfilled,
    /// The order is open with some volume filled.
    PartiallyFilled,
    /// The order was cancelled without filling anything.
    Cancelled,
    /// The order filled (fully, or partially before a cancel).
    Complete,
}

/// Order represents an order on any of the three venues, normalized from
/// the venue's wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// ID is the unique identifier assigned by the venue.
    pub id: String,
    /// Venue the order was placed on.
    pub venue: Venue,
    /// Side indicates whether this is a bid or an ask.
    pub side: OrderSide,
    /// State is the venue-reported lifecycle state, verbatim.
    pub state: String,
    /// Pair is the trading pair in the venue's own notation.
    pub pair: String,
    /// Limit price in quote currency.
    pub limit_price: Decimal,
    /// Limit volume in base currency (BTC).
    pub limit_volume: Decimal,
    /// Base currency (BTC) filled so far. Negative for bids, see
    /// [`Order::negate_bid_fills`].
    pub filled_base: Decimal,
    /// Quote currency filled so far (ZAR on the ZAR leg, fiat on Bitstamp).
    pub filled_quote: Decimal,
    /// Fee charged in base currency.
    pub fee_base: Decimal,
    /// Fee charged in quote currency.
    pub fee_quote: Decimal,
    /// Quote amount already matched by an instant buy on the other leg.
    /// Session bookkeeping, never reported by the venue.
    pub matched_quote: Decimal,
    /// CreatedAt is when the venue accepted the order.
    pub created_at: Option<DateTime<Utc>>,
    /// CompletedAt is when the order reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Derives the lifecycle stage from the venue state and filled amounts.
    ///
    /// Returns `None` when no stage can be derived; callers treat that as a
    /// fatal unexpected-state condition.
    pub fn stage(&self) -> Option<OrderStage> {
        match self.venue {
            Venue::Luno => self.luno_stage(),
            Venue::Valr => self.valr_stage(),
            Venue::Bitstamp => self.bitstamp_stage(),
        }
    }

    fn luno_stage(&self) -> Option<OrderStage> {
        match self.state.as_str() {
            "PENDING" if self.filled_base.is_zero() => Some(OrderStage::Unfilled),
            "PENDING" if self.filled_base > Decimal::ZERO => Some(OrderStage::PartiallyFilled),
            "COMPLETE" if self.filled_base.is_zero() => Some(OrderStage::Cancelled),
            "COMPLETE" => Some(OrderStage::Complete),
            _ => None,
        }
    }

    fn valr_stage(&self) -> Option<OrderStage> {
        match self.state.as_str() {
            "Placed" => Some(OrderStage::Unfilled),
            "Partially Filled" => Some(OrderStage::PartiallyFilled),
            // A cancelled order that filled something matches nothing and
            // surfaces as the fatal unexpected-state case.
            "Cancelled" if self.filled_quote.is_zero() => Some(OrderStage::Cancelled),
            "Filled" => Some(OrderStage::Complete),
            _ => None,
        }
    }

    fn bitstamp_stage(&self) -> Option<OrderStage> {
        match self.state.as_str() {
            // TODO: Bitstamp reports Canceled for instant orders that did in
            // fact fill completely; confirm with the venue and tighten this
            // to Finished only.
            "Finished" | "Canceled" => Some(OrderStage::Complete),
            "Open" | "In Queue" if self.filled_base.is_zero() => Some(OrderStage::Unfilled),
            "Open" | "In Queue" => Some(OrderStage::PartiallyFilled),
            _ => None,
        }
    }

    /// Reports whether the order is open with nothing filled.
    pub fn is_unfilled(&self) -> bool {
        self.stage() == Some(OrderStage::Unfilled)
    }

    /// Reports whether the order is open with some volume filled.
    pub fn is_partially_filled(&self) -> bool {
        self.stage() == Some(OrderStage::PartiallyFilled)
    }

    /// Reports whether the order was cancelled without filling.
    pub fn is_cancelled(&self) -> bool {
        self.stage() == Some(OrderStage::Cancelled)
    }

    /// Reports whether the order filled.
    pub fn is_complete(&self) -> bool {
        self.stage() == Some(OrderStage::Complete)
    }

    /// Full quote value of the order if it fills completely.
    pub fn potential_quote(&self) -> Decimal {
        self.limit_price * self.limit_volume
    }

    /// Percentage of the limit volume filled so far.
    ///
    /// `None` once cancelled, or when there is no limit volume to fill
    /// (aggregates built by [`Order::combine`]).
    pub fn percentage_filled(&self) -> Option<Decimal> {
        if self.is_cancelled() || self.limit_volume.is_zero() {
            return None;
        }
        Some(self.filled_base / self.limit_volume * Decimal::ONE_HUNDRED)
    }

    /// Quote filled but not yet matched by an instant buy on the other leg.
    pub fn unmatched_quote(&self) -> Decimal {
        self.filled_quote - self.matched_quote
    }

    /// Average price across all partial fills. `None` when nothing filled.
    pub fn weighted_average_price(&self) -> Option<Decimal> {
        if self.filled_base.is_zero() {
            return None;
        }
        Some(self.filled_quote / self.filled_base)
    }

    /// Bid-side fills are recorded negated so that the direction of flow
    /// survives aggregation over mixed-side records. Fees stay positive.
    /// Applied by the Luno and VALR decoders.
    pub(crate) fn negate_bid_fills(&mut self) {
        if self.side == OrderSide::Bid {
            self.filled_base = -self.filled_base;
            self.filled_quote = -self.filled_quote;
        }
    }

    /// Combines several orders into a single aggregate for reporting.
    ///
    /// Filled amounts and fees are summed; identity, limit fields and
    /// timestamps come from the first order; the matched amount is reset.
    /// Returns `None` for an empty slice.
    pub fn combine(orders: &[Order]) -> Option<Order> {
        let first = orders.first()?;
        let mut combined = first.clone();
        combined.filled_base = Decimal::ZERO;
        combined.filled_quote = Decimal::ZERO;
        combined.fee_base = Decimal::ZERO;
        combined.fee_quote = Decimal::ZERO;
        combined.matched_quote = Decimal::ZERO;

        for order in orders {
            combined.filled_base += order.filled_base;
            combined.filled_quote += order.filled_quote;
            combined.fee_base += order.fee_base;
            combined.fee_quote += order.fee_quote;
        }

        Some(combined)
    }
}
