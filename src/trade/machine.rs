//! Transition table for the sell-order lifecycle.

use crate::domain::OrderStage;

/// What the limit-trade inner loop does next with the active sell order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SellOrderAction {
    /// Cancel the order and restart the outer cycle from profit
    /// evaluation, with no fill to account for.
    CancelAndRestart,
    /// Cancel the order and reconcile whatever filled.
    CancelThenMatch,
    /// Leave the order resting and poll again.
    Wait,
    /// Leave the order resting; reconcile the partial fill if it is
    /// large enough to act on, then poll again.
    TryMatch,
    /// The order is terminal; reconcile without issuing a cancel.
    ProceedToMatch,
}

/// Decides the next action from the current poll's observations.
///
/// Rows are evaluated in order, first match wins. Terminal stages route
/// to matching regardless of target or book position. Underivable stages
/// never reach here; the caller fails fatally before consulting the
/// table.
pub fn decide(target_hit: bool, stage: OrderStage, top_of_book: bool) -> SellOrderAction {
    match (target_hit, stage, top_of_book) {
        (false, OrderStage::Unfilled, _) => SellOrderAction::CancelAndRestart,
        (false, OrderStage::PartiallyFilled, _) => SellOrderAction::CancelThenMatch,
        (true, OrderStage::Unfilled, true) => SellOrderAction::Wait,
        (true, OrderStage::Unfilled, false) => SellOrderAction::CancelAndRestart,
        (true, OrderStage::PartiallyFilled, true) => SellOrderAction::TryMatch,
        (true, OrderStage::PartiallyFilled, false) => SellOrderAction::CancelThenMatch,
        (_, OrderStage::Cancelled, _) => SellOrderAction::ProceedToMatch,
        (_, OrderStage::Complete, _) => SellOrderAction::ProceedToMatch,
    }
}
