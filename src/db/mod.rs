//! SQLite persistence for the copy engine.
//!
//! Stores everything the engine reads and writes:
//! - Strategies, offers and their fee schedules
//! - Subscriptions, their settings and status history
//! - Master trades and copied trades (unique per trade/subscription pair)
//! - Commissions and the audit log
//!
//! Decimals are stored as TEXT so no precision is lost on the way through SQLite.

mod catalog;
mod ledger;
mod rows;
mod subscriptions;
mod trades;

pub use rows::AuditRow;

use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{CopyError, Result};

/// Database connection pool implementing every store trait.
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection.
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Private in-memory database. A single connection keeps the data alive.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run all database migrations.
    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS strategies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                master_user_id INTEGER NOT NULL,
                master_account_id INTEGER NOT NULL,
                nickname TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'preparing',
                status_reason TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS offers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                strategy_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                performance_fee TEXT NOT NULL DEFAULT '0',
                performance_fee_interval TEXT NOT NULL DEFAULT 'monthly',
                management_fee TEXT NOT NULL DEFAULT '0',
                management_fee_interval TEXT NOT NULL DEFAULT 'monthly',
                registration_fee TEXT NOT NULL DEFAULT '0',
                status TEXT NOT NULL DEFAULT 'active',
                status_reason TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (strategy_id) REFERENCES strategies(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subscriptions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                investor_user_id INTEGER NOT NULL,
                investor_account_id INTEGER NOT NULL,
                offer_id INTEGER NOT NULL,
                strategy_id INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'preparing',
                status_reason TEXT NOT NULL DEFAULT '',
                config TEXT NOT NULL DEFAULT '{}',
                risk_rules TEXT NOT NULL DEFAULT '{}',
                filter TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (offer_id) REFERENCES offers(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subscription_status_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subscription_id INTEGER NOT NULL,
                old_status TEXT NOT NULL,
                new_status TEXT NOT NULL,
                reason TEXT NOT NULL DEFAULT '',
                changed_by TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (subscription_id) REFERENCES subscriptions(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                strategy_id INTEGER NOT NULL,
                master_account_id INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                direction TEXT NOT NULL,
                volume TEXT NOT NULL,
                open_price TEXT NOT NULL,
                opened_at TEXT NOT NULL,
                stop_loss TEXT,
                take_profit TEXT,
                close_price TEXT,
                closed_at TEXT,
                profit TEXT,
                commission TEXT,
                swap TEXT,
                status TEXT NOT NULL DEFAULT 'open',
                created_at TEXT NOT NULL,
                FOREIGN KEY (strategy_id) REFERENCES strategies(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS copied_trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                trade_id INTEGER NOT NULL,
                subscription_id INTEGER NOT NULL,
                investor_account_id INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                direction TEXT NOT NULL,
                volume TEXT NOT NULL,
                copy_ratio TEXT NOT NULL,
                open_price TEXT NOT NULL,
                opened_at TEXT NOT NULL,
                stop_loss TEXT,
                take_profit TEXT,
                close_price TEXT,
                closed_at TEXT,
                profit TEXT,
                status TEXT NOT NULL DEFAULT 'open',
                created_at TEXT NOT NULL,
                UNIQUE(trade_id, subscription_id),
                FOREIGN KEY (trade_id) REFERENCES trades(id),
                FOREIGN KEY (subscription_id) REFERENCES subscriptions(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS commissions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subscription_id INTEGER NOT NULL,
                type TEXT NOT NULL,
                amount TEXT NOT NULL,
                period_from TEXT NOT NULL,
                period_to TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (subscription_id) REFERENCES subscriptions(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entity TEXT NOT NULL,
                entity_id INTEGER NOT NULL,
                operation TEXT NOT NULL,
                actor TEXT NOT NULL,
                before_value TEXT,
                after_value TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Indexes
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_subscriptions_strategy ON subscriptions(strategy_id, status)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_subscriptions_offer ON subscriptions(offer_id, status)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_status_history_subscription ON subscription_status_history(subscription_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_strategy ON trades(strategy_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_copied_trades_subscription ON copied_trades(subscription_id, status)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_commissions_subscription ON commissions(subscription_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_entity ON audit_log(entity, entity_id)")
            .execute(&self.pool)
            .await?;

        debug!("Database migrations applied");
        Ok(())
    }

    /// Get the connection pool (for advanced queries).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn parse_decimal(field: &str, raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw).map_err(|e| CopyError::Corrupt(format!("{field} '{raw}': {e}")))
}

fn parse_opt_decimal(field: &str, raw: Option<String>) -> Result<Option<Decimal>> {
    raw.map(|r| parse_decimal(field, &r)).transpose()
}

fn opt_text(value: Option<Decimal>) -> Option<String> {
    value.map(|d| d.to_string())
}
