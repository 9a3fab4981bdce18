use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::Result;
use crate::models::{
    CopiedTrade, CopiedTradeClose, NewCopiedTrade, NewTrade, Page, Pagination, Trade, TradeClose,
    TradeStatus,
};
use crate::repository::{CopiedTradeFilter, CopiedTradeStore, TradeStore};

use super::rows::{CopiedTradeRow, TradeRow};
use super::{opt_text, parse_decimal, Database};

// ==================== Trades ====================

#[async_trait]
impl TradeStore for Database {
    async fn get_trade(&self, id: i64) -> Result<Option<Trade>> {
        let row = sqlx::query_as::<_, TradeRow>("SELECT * FROM trades WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Trade::try_from).transpose()
    }

    async fn create_trade(&self, trade: &NewTrade) -> Result<Trade> {
        let now = Utc::now();
        let row = sqlx::query_as::<_, TradeRow>(
            r#"
            INSERT INTO trades (strategy_id, master_account_id, symbol, direction, volume,
                                open_price, opened_at, stop_loss, take_profit, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(trade.strategy_id)
        .bind(trade.master_account_id)
        .bind(&trade.symbol)
        .bind(trade.direction.as_str())
        .bind(trade.volume.to_string())
        .bind(trade.open_price.to_string())
        .bind(trade.opened_at.unwrap_or(now))
        .bind(opt_text(trade.stop_loss))
        .bind(opt_text(trade.take_profit))
        .bind(TradeStatus::Open.as_str())
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn list_trades_by_strategy(
        &self,
        strategy_id: i64,
        page: Pagination,
    ) -> Result<Page<Trade>> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM trades WHERE strategy_id = ?")
            .bind(strategy_id)
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query_as::<_, TradeRow>(
            "SELECT * FROM trades WHERE strategy_id = ? ORDER BY id DESC LIMIT ? OFFSET ?",
        )
        .bind(strategy_id)
        .bind(i64::from(page.limit))
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok(Page {
            data: rows.into_iter().map(Trade::try_from).collect::<Result<_>>()?,
            total,
            page: page.page,
            limit: page.limit,
        })
    }

    async fn close_trade(
        &self,
        id: i64,
        close: &TradeClose,
        closed_at: DateTime<Utc>,
    ) -> Result<Option<Trade>> {
        let row = sqlx::query_as::<_, TradeRow>(
            r#"
            UPDATE trades
            SET close_price = ?, closed_at = ?, profit = ?, commission = ?, swap = ?, status = ?
            WHERE id = ? AND status = ?
            RETURNING *
            "#,
        )
        .bind(close.close_price.to_string())
        .bind(closed_at)
        .bind(close.profit.to_string())
        .bind(close.commission.to_string())
        .bind(close.swap.to_string())
        .bind(TradeStatus::Closed.as_str())
        .bind(id)
        .bind(TradeStatus::Open.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Trade::try_from).transpose()
    }
}

// ==================== Copied trades ====================

#[async_trait]
impl CopiedTradeStore for Database {
    async fn find_copied_trade(
        &self,
        trade_id: i64,
        subscription_id: i64,
    ) -> Result<Option<CopiedTrade>> {
        let row = sqlx::query_as::<_, CopiedTradeRow>(
            "SELECT * FROM copied_trades WHERE trade_id = ? AND subscription_id = ?",
        )
        .bind(trade_id)
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(CopiedTrade::try_from).transpose()
    }

    async fn insert_copied_trade(&self, copy: &NewCopiedTrade) -> Result<Option<CopiedTrade>> {
        let row = sqlx::query_as::<_, CopiedTradeRow>(
            r#"
            INSERT INTO copied_trades (trade_id, subscription_id, investor_account_id, symbol,
                                       direction, volume, copy_ratio, open_price, opened_at,
                                       stop_loss, take_profit, close_price, closed_at, profit,
                                       status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(trade_id, subscription_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(copy.trade_id)
        .bind(copy.subscription_id)
        .bind(copy.investor_account_id)
        .bind(&copy.symbol)
        .bind(copy.direction.as_str())
        .bind(copy.volume.to_string())
        .bind(copy.copy_ratio.to_string())
        .bind(copy.open_price.to_string())
        .bind(copy.opened_at)
        .bind(opt_text(copy.stop_loss))
        .bind(opt_text(copy.take_profit))
        .bind(opt_text(copy.close_price))
        .bind(copy.closed_at)
        .bind(opt_text(copy.profit))
        .bind(copy.status.as_str())
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        row.map(CopiedTrade::try_from).transpose()
    }

    async fn list_copied_trades(
        &self,
        filter: &CopiedTradeFilter,
        page: Pagination,
    ) -> Result<Page<CopiedTrade>> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM copied_trades
            WHERE (? IS NULL OR subscription_id = ?)
              AND (? IS NULL OR trade_id = ?)
            "#,
        )
        .bind(filter.subscription_id)
        .bind(filter.subscription_id)
        .bind(filter.trade_id)
        .bind(filter.trade_id)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, CopiedTradeRow>(
            r#"
            SELECT * FROM copied_trades
            WHERE (? IS NULL OR subscription_id = ?)
              AND (? IS NULL OR trade_id = ?)
            ORDER BY id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(filter.subscription_id)
        .bind(filter.subscription_id)
        .bind(filter.trade_id)
        .bind(filter.trade_id)
        .bind(i64::from(page.limit))
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok(Page {
            data: rows
                .into_iter()
                .map(CopiedTrade::try_from)
                .collect::<Result<_>>()?,
            total,
            page: page.page,
            limit: page.limit,
        })
    }

    async fn open_copies_of_trade(&self, trade_id: i64) -> Result<Vec<CopiedTrade>> {
        let rows = sqlx::query_as::<_, CopiedTradeRow>(
            "SELECT * FROM copied_trades WHERE trade_id = ? AND status = ? ORDER BY id",
        )
        .bind(trade_id)
        .bind(TradeStatus::Open.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(CopiedTrade::try_from).collect()
    }

    async fn close_copied_trade(
        &self,
        id: i64,
        close: &CopiedTradeClose,
    ) -> Result<Option<CopiedTrade>> {
        let row = sqlx::query_as::<_, CopiedTradeRow>(
            r#"
            UPDATE copied_trades
            SET close_price = ?, closed_at = ?, profit = ?, status = ?
            WHERE id = ? AND status = ?
            RETURNING *
            "#,
        )
        .bind(close.close_price.to_string())
        .bind(close.closed_at)
        .bind(close.profit.to_string())
        .bind(TradeStatus::Closed.as_str())
        .bind(id)
        .bind(TradeStatus::Open.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(CopiedTrade::try_from).transpose()
    }

    async fn realized_profits(
        &self,
        subscription_id: i64,
        closed_since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Decimal>> {
        let raw: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT profit FROM copied_trades
            WHERE subscription_id = ? AND status = ? AND profit IS NOT NULL
              AND (? IS NULL OR closed_at >= ?)
            ORDER BY closed_at, id
            "#,
        )
        .bind(subscription_id)
        .bind(TradeStatus::Closed.as_str())
        .bind(closed_since)
        .bind(closed_since)
        .fetch_all(&self.pool)
        .await?;

        raw.iter()
            .map(|p| parse_decimal("copied_trades.profit", p))
            .collect()
    }
}
