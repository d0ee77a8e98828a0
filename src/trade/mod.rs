//! Trade orchestration: profit evaluation, the sell-order state machine,
//! fill reconciliation and custody rebalancing.

mod error;
mod limit;
mod liquidity;
mod machine;
mod market;
mod profit;
mod session;

pub use error::{Outcome, TradeError};
pub use liquidity::enough_liquidity;
pub use machine::{decide, SellOrderAction};
pub use profit::ProfitQuote;
pub use session::TradeSession;

#[cfg(test)]
mod tests;
