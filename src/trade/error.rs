//! Fatal trade errors and terminal session outcomes.

use thiserror::Error;

use crate::domain::Venue;
use crate::exchanges::ExchangeError;

/// Fatal errors that stop a trade session.
///
/// Everything here means the session must not keep trading: either an
/// adapter exhausted its retries on something the session cannot work
/// around, or the books on the two legs can no longer be trusted to
/// line up.
#[derive(Debug, Error)]
pub enum TradeError {
    /// An exchange call failed past the adapter's retry ceiling, or with
    /// an error that is never retried.
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    /// An order reached a state no lifecycle stage can be derived from.
    /// Guessing here risks double-counting money, so the session stops.
    #[error("unexpected state '{state}' for order {order_id} on {venue}")]
    UnexpectedOrderState {
        venue: Venue,
        order_id: String,
        state: String,
    },

    /// The fiat leg explicitly rejected a matching buy. The sell-side
    /// fill it was meant to match is now unaccounted for.
    #[error("matching buy rejected: {0}")]
    MatchingBuyRejected(String),
}

/// Terminal outcome of a trade session that ended without a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The configured totals were traded down to below both venues'
    /// minimum order sizes.
    Completed,
    /// Balances were insufficient at preflight; nothing was traded.
    InsufficientFunds,
    /// The active sell order was cancelled by someone other than the
    /// session. The operator must reconcile the books manually.
    SellOrderCancelled,
}

impl Outcome {
    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Completed | Outcome::InsufficientFunds => 0,
            Outcome::SellOrderCancelled => 1,
        }
    }
}
