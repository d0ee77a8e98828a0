//! Pre-trade liquidity guard for the market variant.

use rust_decimal::Decimal;
use tracing::debug;

use crate::domain::PriceLevel;

/// Walks the bid side of a book and reports whether `required` BTC can be
/// sold without exceeding the slippage budget.
///
/// Levels must be best-first. At each level the volume-weighted average
/// price over everything consumed so far is compared against the
/// reference bid; slippage over budget fails immediately even when deeper
/// levels could still supply the volume, because those levels only make
/// the weighted price worse.
pub fn enough_liquidity(
    bids: &[PriceLevel],
    reference_bid: Decimal,
    required: Decimal,
    allowable_slippage: Decimal,
) -> bool {
    if reference_bid <= Decimal::ZERO {
        return false;
    }

    let mut volume_total = Decimal::ZERO;
    let mut price_volume_total = Decimal::ZERO;

    for (i, level) in bids.iter().enumerate() {
        volume_total += level.volume;
        price_volume_total += level.price * level.volume;
        if volume_total <= Decimal::ZERO {
            continue;
        }

        let weighted_price = price_volume_total / volume_total;
        let slippage = Decimal::ONE - weighted_price / reference_bid;

        debug!(
            level = i + 1,
            %volume_total,
            %weighted_price,
            %slippage,
            "walking bid levels"
        );

        if slippage > allowable_slippage {
            return false;
        }
        if volume_total >= required {
            return slippage <= allowable_slippage;
        }
    }

    // The whole book could not supply the volume.
    false
}
