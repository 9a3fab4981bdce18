//! Performance commission on closed copies.

use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

use crate::models::{CommissionType, CopiedTrade, NewCommission, Offer};

pub struct CommissionCalculator;

impl CommissionCalculator {
    /// Performance fee owed on `copied` under `offer`'s fee schedule.
    ///
    /// `None` when the copy has no profit yet, the offer charges no
    /// performance fee, or the rounded amount is not positive.
    pub fn performance_fee(copied: &CopiedTrade, offer: &Offer) -> Option<NewCommission> {
        let profit = copied.profit?;
        let pct = offer.fee_schedule().performance_fee_pct;
        if pct.is_zero() {
            return None;
        }

        let amount = (profit * pct / dec!(100))
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
            .max(Decimal::ZERO);
        if amount <= Decimal::ZERO {
            return None;
        }

        Some(NewCommission {
            subscription_id: copied.subscription_id,
            kind: CommissionType::Performance,
            amount,
            period_from: copied.opened_at,
            period_to: copied.closed_at.unwrap_or_else(Utc::now),
        })
    }
}
