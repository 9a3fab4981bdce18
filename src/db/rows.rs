//! Raw table rows and their conversion into domain models.

use chrono::{DateTime, Utc};

use crate::error::{CopyError, Result};
use crate::models::{
    AuditOperation, Commission, CopiedTrade, EntityKind, FeeSchedule, Offer, StatusHistoryEntry,
    Strategy, Subscription, SubscriptionSettings, Trade,
};

use super::{parse_decimal, parse_opt_decimal};

#[derive(Debug, Clone, sqlx::FromRow)]
pub(super) struct StrategyRow {
    pub id: i64,
    pub master_user_id: i64,
    pub master_account_id: i64,
    pub nickname: String,
    pub status: String,
    pub status_reason: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<StrategyRow> for Strategy {
    type Error = CopyError;

    fn try_from(row: StrategyRow) -> Result<Self> {
        Ok(Strategy {
            id: row.id,
            master_user_id: row.master_user_id,
            master_account_id: row.master_account_id,
            nickname: row.nickname,
            status: row.status.parse().map_err(corrupt("strategies.status"))?,
            status_reason: row.status_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(super) struct OfferRow {
    pub id: i64,
    pub strategy_id: i64,
    pub name: String,
    pub performance_fee: String,
    pub performance_fee_interval: String,
    pub management_fee: String,
    pub management_fee_interval: String,
    pub registration_fee: String,
    pub status: String,
    pub status_reason: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<OfferRow> for Offer {
    type Error = CopyError;

    fn try_from(row: OfferRow) -> Result<Self> {
        Ok(Offer {
            id: row.id,
            strategy_id: row.strategy_id,
            name: row.name,
            fees: FeeSchedule {
                performance_fee_pct: parse_decimal("offers.performance_fee", &row.performance_fee)?,
                performance_fee_interval: row
                    .performance_fee_interval
                    .parse()
                    .map_err(corrupt("offers.performance_fee_interval"))?,
                management_fee_pct: parse_decimal("offers.management_fee", &row.management_fee)?,
                management_fee_interval: row
                    .management_fee_interval
                    .parse()
                    .map_err(corrupt("offers.management_fee_interval"))?,
                registration_fee: parse_decimal("offers.registration_fee", &row.registration_fee)?,
            },
            status: row.status.parse().map_err(corrupt("offers.status"))?,
            status_reason: row.status_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(super) struct SubscriptionRow {
    pub id: i64,
    pub investor_user_id: i64,
    pub investor_account_id: i64,
    pub offer_id: i64,
    pub strategy_id: i64,
    pub status: String,
    pub status_reason: String,
    pub config: String,
    pub risk_rules: String,
    pub filter: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = CopyError;

    fn try_from(row: SubscriptionRow) -> Result<Self> {
        let settings = SubscriptionSettings {
            copy: serde_json::from_str(&row.config)?,
            risk: serde_json::from_str(&row.risk_rules)?,
            filter: serde_json::from_str(&row.filter)?,
        };

        Ok(Subscription {
            id: row.id,
            investor_user_id: row.investor_user_id,
            investor_account_id: row.investor_account_id,
            offer_id: row.offer_id,
            strategy_id: row.strategy_id,
            status: row.status.parse().map_err(corrupt("subscriptions.status"))?,
            status_reason: row.status_reason,
            settings,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(super) struct HistoryRow {
    pub id: i64,
    pub subscription_id: i64,
    pub old_status: String,
    pub new_status: String,
    pub reason: String,
    pub changed_by: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<HistoryRow> for StatusHistoryEntry {
    type Error = CopyError;

    fn try_from(row: HistoryRow) -> Result<Self> {
        Ok(StatusHistoryEntry {
            id: row.id,
            subscription_id: row.subscription_id,
            old_status: row.old_status.parse().map_err(corrupt("history.old_status"))?,
            new_status: row.new_status.parse().map_err(corrupt("history.new_status"))?,
            reason: row.reason,
            actor: row.changed_by.parse().map_err(corrupt("history.changed_by"))?,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(super) struct TradeRow {
    pub id: i64,
    pub strategy_id: i64,
    pub master_account_id: i64,
    pub symbol: String,
    pub direction: String,
    pub volume: String,
    pub open_price: String,
    pub opened_at: DateTime<Utc>,
    pub stop_loss: Option<String>,
    pub take_profit: Option<String>,
    pub close_price: Option<String>,
    pub closed_at: Option<DateTime<Utc>>,
    pub profit: Option<String>,
    pub commission: Option<String>,
    pub swap: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<TradeRow> for Trade {
    type Error = CopyError;

    fn try_from(row: TradeRow) -> Result<Self> {
        Ok(Trade {
            id: row.id,
            strategy_id: row.strategy_id,
            master_account_id: row.master_account_id,
            symbol: row.symbol,
            direction: row.direction.parse().map_err(corrupt("trades.direction"))?,
            volume: parse_decimal("trades.volume", &row.volume)?,
            open_price: parse_decimal("trades.open_price", &row.open_price)?,
            opened_at: row.opened_at,
            stop_loss: parse_opt_decimal("trades.stop_loss", row.stop_loss)?,
            take_profit: parse_opt_decimal("trades.take_profit", row.take_profit)?,
            close_price: parse_opt_decimal("trades.close_price", row.close_price)?,
            closed_at: row.closed_at,
            profit: parse_opt_decimal("trades.profit", row.profit)?,
            commission: parse_opt_decimal("trades.commission", row.commission)?,
            swap: parse_opt_decimal("trades.swap", row.swap)?,
            status: row.status.parse()?,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(super) struct CopiedTradeRow {
    pub id: i64,
    pub trade_id: i64,
    pub subscription_id: i64,
    pub investor_account_id: i64,
    pub symbol: String,
    pub direction: String,
    pub volume: String,
    pub copy_ratio: String,
    pub open_price: String,
    pub opened_at: DateTime<Utc>,
    pub stop_loss: Option<String>,
    pub take_profit: Option<String>,
    pub close_price: Option<String>,
    pub closed_at: Option<DateTime<Utc>>,
    pub profit: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<CopiedTradeRow> for CopiedTrade {
    type Error = CopyError;

    fn try_from(row: CopiedTradeRow) -> Result<Self> {
        Ok(CopiedTrade {
            id: row.id,
            trade_id: row.trade_id,
            subscription_id: row.subscription_id,
            investor_account_id: row.investor_account_id,
            symbol: row.symbol,
            direction: row.direction.parse().map_err(corrupt("copied_trades.direction"))?,
            volume: parse_decimal("copied_trades.volume", &row.volume)?,
            copy_ratio: parse_decimal("copied_trades.copy_ratio", &row.copy_ratio)?,
            open_price: parse_decimal("copied_trades.open_price", &row.open_price)?,
            opened_at: row.opened_at,
            stop_loss: parse_opt_decimal("copied_trades.stop_loss", row.stop_loss)?,
            take_profit: parse_opt_decimal("copied_trades.take_profit", row.take_profit)?,
            close_price: parse_opt_decimal("copied_trades.close_price", row.close_price)?,
            closed_at: row.closed_at,
            profit: parse_opt_decimal("copied_trades.profit", row.profit)?,
            status: row.status.parse()?,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(super) struct CommissionRow {
    pub id: i64,
    pub subscription_id: i64,
    #[sqlx(rename = "type")]
    pub kind: String,
    pub amount: String,
    pub period_from: DateTime<Utc>,
    pub period_to: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<CommissionRow> for Commission {
    type Error = CopyError;

    fn try_from(row: CommissionRow) -> Result<Self> {
        Ok(Commission {
            id: row.id,
            subscription_id: row.subscription_id,
            kind: row.kind.parse()?,
            amount: parse_decimal("commissions.amount", &row.amount)?,
            period_from: row.period_from,
            period_to: row.period_to,
            created_at: row.created_at,
        })
    }
}

/// Audit rows are only read back by tests and tooling.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuditRow {
    pub id: i64,
    pub entity: String,
    pub entity_id: i64,
    pub operation: String,
    pub actor: String,
    pub before_value: Option<String>,
    pub after_value: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditRow {
    pub fn entity(&self) -> Result<EntityKind> {
        self.entity.parse()
    }

    pub fn operation(&self) -> Result<AuditOperation> {
        self.operation.parse()
    }
}

/// Re-label a parse failure of a stored enum as corruption of `field`.
fn corrupt(field: &'static str) -> impl Fn(CopyError) -> CopyError {
    move |e| CopyError::Corrupt(format!("{field}: {e}"))
}
