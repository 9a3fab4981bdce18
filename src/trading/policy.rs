//! Copy policy: decides whether a master trade is copied into a subscription
//! and in what shape.
//!
//! Evaluation is pure. Anything that needs the store (today's realised loss,
//! drawdown of the copy P&L curve) is gathered by the caller into a
//! [`RiskSnapshot`] first.

use std::fmt;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::{SubscriptionSettings, Trade, TradeDirection};

/// Why a trade was not copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    SymbolNotAllowed,
    SymbolBlocked,
    BelowMinimumLot,
    DailyLossLimit,
    DrawdownLimit,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::SymbolNotAllowed => "symbol not allowed",
            RejectReason::SymbolBlocked => "symbol blocked",
            RejectReason::BelowMinimumLot => "below minimum lot",
            RejectReason::DailyLossLimit => "daily loss limit reached",
            RejectReason::DrawdownLimit => "drawdown limit reached",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Shape of an accepted copy.
#[derive(Debug, Clone, PartialEq)]
pub struct CopyDraft {
    pub direction: TradeDirection,
    pub volume: Decimal,
    /// Effective ratio after clamping (volume / master volume)
    pub copy_ratio: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CopyDecision {
    Accept(CopyDraft),
    Reject(RejectReason),
}

impl CopyDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, CopyDecision::Accept(_))
    }
}

/// Realised P&L state of one subscription at evaluation time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RiskSnapshot {
    /// Sum of profits of copies closed today (negative on a losing day)
    pub daily_realized: Decimal,

    /// Current drawdown from the peak of the cumulative realised P&L, in percent
    pub drawdown_pct: Decimal,
}

impl RiskSnapshot {
    /// Build from realised profits: the full history (oldest first) and today's closes.
    pub fn from_profits(history: &[Decimal], today: &[Decimal]) -> Self {
        Self {
            daily_realized: today.iter().copied().sum(),
            drawdown_pct: current_drawdown_pct(history),
        }
    }

    /// Loss realised today, as a positive amount.
    pub fn daily_loss(&self) -> Decimal {
        if self.daily_realized < Decimal::ZERO {
            -self.daily_realized
        } else {
            Decimal::ZERO
        }
    }
}

/// Drawdown of the final equity from its running peak. Zero until the curve
/// has been in profit.
fn current_drawdown_pct(pnls: &[Decimal]) -> Decimal {
    let mut equity = Decimal::ZERO;
    let mut peak = Decimal::ZERO;

    for pnl in pnls {
        equity += pnl;
        if equity > peak {
            peak = equity;
        }
    }

    if peak > Decimal::ZERO {
        (peak - equity) / peak * dec!(100)
    } else {
        Decimal::ZERO
    }
}

/// Decide whether and how `trade` is copied under `settings`.
pub fn evaluate(trade: &Trade, settings: &SubscriptionSettings, risk: &RiskSnapshot) -> CopyDecision {
    let filter = &settings.filter;
    let symbol = trade.symbol.to_uppercase();

    // Symbol filters
    if !filter.allows(&symbol) {
        return CopyDecision::Reject(RejectReason::SymbolNotAllowed);
    }
    if filter.blocks(&symbol) {
        return CopyDecision::Reject(RejectReason::SymbolBlocked);
    }

    // Risk rules
    if let Some(limit) = settings.risk.max_daily_loss {
        if risk.daily_loss() >= limit {
            return CopyDecision::Reject(RejectReason::DailyLossLimit);
        }
    }
    if let Some(limit) = settings.risk.max_drawdown_pct {
        if risk.drawdown_pct >= limit {
            if settings.risk.stop_on_drawdown {
                return CopyDecision::Reject(RejectReason::DrawdownLimit);
            }
            warn!(
                trade_id = trade.id,
                drawdown_pct = %risk.drawdown_pct,
                limit = %limit,
                "Drawdown limit exceeded, copying anyway"
            );
        }
    }

    // Sizing
    let copy = &settings.copy;
    let mut volume = trade.volume * copy.copy_ratio;

    if let Some(max) = copy.max_position_size {
        if volume > max {
            debug!(trade_id = trade.id, raw = %volume, max = %max, "Clamped to max position size");
            volume = max;
        }
    }
    if let Some(max) = filter.max_lot_size {
        if volume > max {
            volume = max;
        }
    }
    if let Some(min) = filter.min_lot_size {
        if volume < min {
            return CopyDecision::Reject(RejectReason::BelowMinimumLot);
        }
    }

    // Direction and protective levels
    let (direction, sl_candidate, tp_candidate) = if copy.invert_signals {
        (trade.direction.inverted(), trade.take_profit, trade.stop_loss)
    } else {
        (trade.direction, trade.stop_loss, trade.take_profit)
    };

    CopyDecision::Accept(CopyDraft {
        direction,
        volume,
        copy_ratio: volume / trade.volume,
        stop_loss: sl_candidate.filter(|_| copy.copy_stop_loss),
        take_profit: tp_candidate.filter(|_| copy.copy_take_profit),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::models::TradeStatus;

    fn trade(symbol: &str, volume: Decimal) -> Trade {
        let now = Utc::now();
        Trade {
            id: 1,
            strategy_id: 1,
            master_account_id: 10,
            symbol: symbol.to_string(),
            direction: TradeDirection::Buy,
            volume,
            open_price: dec!(1.0850),
            opened_at: now,
            stop_loss: Some(dec!(1.0800)),
            take_profit: Some(dec!(1.0950)),
            close_price: None,
            closed_at: None,
            profit: None,
            commission: None,
            swap: None,
            status: TradeStatus::Open,
            created_at: now,
        }
    }

    fn accepted(decision: CopyDecision) -> CopyDraft {
        match decision {
            CopyDecision::Accept(draft) => draft,
            CopyDecision::Reject(reason) => panic!("unexpected rejection: {reason}"),
        }
    }

    fn with_allowed(symbols: &[&str]) -> SubscriptionSettings {
        let mut settings = SubscriptionSettings::default();
        settings.filter.allowed_symbols = symbols.iter().map(|s| s.to_string()).collect();
        settings
    }

    #[test]
    fn test_volume_scales_by_ratio() {
        let mut settings = SubscriptionSettings::default();
        settings.copy.copy_ratio = dec!(0.5);

        let draft = accepted(evaluate(&trade("EURUSD", dec!(1.0)), &settings, &RiskSnapshot::default()));
        assert_eq!(draft.volume, dec!(0.5));
        assert_eq!(draft.copy_ratio, dec!(0.5));
        assert_eq!(draft.direction, TradeDirection::Buy);
    }

    #[test]
    fn test_default_ratio_copies_one_to_one() {
        let settings = SubscriptionSettings::default();
        let draft = accepted(evaluate(&trade("EURUSD", dec!(0.3)), &settings, &RiskSnapshot::default()));
        assert_eq!(draft.volume, dec!(0.3));
    }

    #[test]
    fn test_clamps_to_max_position_size() {
        let mut settings = SubscriptionSettings::default();
        settings.copy.copy_ratio = dec!(2);
        settings.copy.max_position_size = Some(dec!(0.8));

        let draft = accepted(evaluate(&trade("EURUSD", dec!(1.0)), &settings, &RiskSnapshot::default()));
        assert_eq!(draft.volume, dec!(0.8));
        assert_eq!(draft.copy_ratio, dec!(0.8));
    }

    #[test]
    fn test_whitelist_excludes_other_symbols() {
        let settings = with_allowed(&["GBPUSD"]);
        assert_eq!(
            evaluate(&trade("EURUSD", dec!(1.0)), &settings, &RiskSnapshot::default()),
            CopyDecision::Reject(RejectReason::SymbolNotAllowed)
        );
        assert!(evaluate(&trade("gbpusd", dec!(1.0)), &settings, &RiskSnapshot::default()).is_accepted());
    }

    #[test]
    fn test_blacklist_applies_without_whitelist() {
        let mut settings = SubscriptionSettings::default();
        settings.filter.blocked_symbols.insert("XAUUSD".to_string());

        assert_eq!(
            evaluate(&trade("XAUUSD", dec!(1.0)), &settings, &RiskSnapshot::default()),
            CopyDecision::Reject(RejectReason::SymbolBlocked)
        );
    }

    #[test]
    fn test_blacklist_applies_to_whitelisted_symbols() {
        let mut settings = with_allowed(&["EURUSD", "XAUUSD"]);
        settings.filter.blocked_symbols.insert("XAUUSD".to_string());

        assert_eq!(
            evaluate(&trade("XAUUSD", dec!(1.0)), &settings, &RiskSnapshot::default()),
            CopyDecision::Reject(RejectReason::SymbolBlocked)
        );
        assert!(evaluate(&trade("EURUSD", dec!(1.0)), &settings, &RiskSnapshot::default()).is_accepted());
    }

    #[test]
    fn test_lot_limits() {
        let mut settings = SubscriptionSettings::default();
        settings.copy.copy_ratio = dec!(0.1);
        settings.filter.min_lot_size = Some(dec!(0.2));
        assert_eq!(
            evaluate(&trade("EURUSD", dec!(1.0)), &settings, &RiskSnapshot::default()),
            CopyDecision::Reject(RejectReason::BelowMinimumLot)
        );

        let mut settings = SubscriptionSettings::default();
        settings.copy.copy_ratio = dec!(3);
        settings.filter.max_lot_size = Some(dec!(1.5));
        let draft = accepted(evaluate(&trade("EURUSD", dec!(1.0)), &settings, &RiskSnapshot::default()));
        assert_eq!(draft.volume, dec!(1.5));
    }

    #[test]
    fn test_protective_levels_follow_flags() {
        let settings = SubscriptionSettings::default();
        let draft = accepted(evaluate(&trade("EURUSD", dec!(1.0)), &settings, &RiskSnapshot::default()));
        assert_eq!(draft.stop_loss, None);
        assert_eq!(draft.take_profit, None);

        let mut settings = SubscriptionSettings::default();
        settings.copy.copy_stop_loss = true;
        let draft = accepted(evaluate(&trade("EURUSD", dec!(1.0)), &settings, &RiskSnapshot::default()));
        assert_eq!(draft.stop_loss, Some(dec!(1.0800)));
        assert_eq!(draft.take_profit, None);
    }

    #[test]
    fn test_inversion_swaps_direction_and_levels() {
        let mut settings = SubscriptionSettings::default();
        settings.copy.invert_signals = true;
        settings.copy.copy_stop_loss = true;
        settings.copy.copy_take_profit = true;

        let draft = accepted(evaluate(&trade("EURUSD", dec!(1.0)), &settings, &RiskSnapshot::default()));
        assert_eq!(draft.direction, TradeDirection::Sell);
        assert_eq!(draft.stop_loss, Some(dec!(1.0950)));
        assert_eq!(draft.take_profit, Some(dec!(1.0800)));
    }

    #[test]
    fn test_daily_loss_limit() {
        let mut settings = SubscriptionSettings::default();
        settings.risk.max_daily_loss = Some(dec!(100));

        let risk = RiskSnapshot::from_profits(&[], &[dec!(-60), dec!(-40)]);
        assert_eq!(
            evaluate(&trade("EURUSD", dec!(1.0)), &settings, &risk),
            CopyDecision::Reject(RejectReason::DailyLossLimit)
        );

        let risk = RiskSnapshot::from_profits(&[], &[dec!(-60), dec!(30)]);
        assert!(evaluate(&trade("EURUSD", dec!(1.0)), &settings, &risk).is_accepted());
    }

    #[test]
    fn test_drawdown_limit_only_stops_when_configured() {
        let mut settings = SubscriptionSettings::default();
        settings.risk.max_drawdown_pct = Some(dec!(20));

        // Peak 100, now 50
        let risk = RiskSnapshot::from_profits(&[dec!(100), dec!(-50)], &[]);
        assert_eq!(risk.drawdown_pct, dec!(50));
        assert!(evaluate(&trade("EURUSD", dec!(1.0)), &settings, &risk).is_accepted());

        settings.risk.stop_on_drawdown = true;
        assert_eq!(
            evaluate(&trade("EURUSD", dec!(1.0)), &settings, &risk),
            CopyDecision::Reject(RejectReason::DrawdownLimit)
        );
    }

    #[test]
    fn test_drawdown_is_zero_without_profit_peak() {
        let risk = RiskSnapshot::from_profits(&[dec!(-10), dec!(-20)], &[]);
        assert_eq!(risk.drawdown_pct, Decimal::ZERO);
    }
}
