use async_trait::async_trait;
use chrono::Utc;

use crate::error::Result;
use crate::models::{
    Actor, NewSubscription, StatusHistoryEntry, Subscription, SubscriptionSettings,
    SubscriptionStatus,
};
use crate::repository::{ArchiveScope, StatusChange, SubscriptionStore};

use super::rows::{HistoryRow, SubscriptionRow};
use super::Database;

const INSERT_HISTORY: &str = r#"
    INSERT INTO subscription_status_history
        (subscription_id, old_status, new_status, reason, changed_by, created_at)
    VALUES (?, ?, ?, ?, ?, ?)
    RETURNING *
"#;

// ==================== Subscriptions ====================

#[async_trait]
impl SubscriptionStore for Database {
    async fn get_subscription(&self, id: i64) -> Result<Option<Subscription>> {
        let row = sqlx::query_as::<_, SubscriptionRow>("SELECT * FROM subscriptions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Subscription::try_from).transpose()
    }

    async fn create_subscription(
        &self,
        subscription: &NewSubscription,
        strategy_id: i64,
    ) -> Result<Subscription> {
        let now = Utc::now();
        let settings = &subscription.settings;

        let row = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            INSERT INTO subscriptions (investor_user_id, investor_account_id, offer_id, strategy_id,
                                       status, status_reason, config, risk_rules, filter,
                                       created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, '', ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(subscription.investor_user_id)
        .bind(subscription.investor_account_id)
        .bind(subscription.offer_id)
        .bind(strategy_id)
        .bind(SubscriptionStatus::Preparing.as_str())
        .bind(serde_json::to_string(&settings.copy)?)
        .bind(serde_json::to_string(&settings.risk)?)
        .bind(serde_json::to_string(&settings.filter)?)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn update_settings(
        &self,
        id: i64,
        settings: &SubscriptionSettings,
    ) -> Result<Option<Subscription>> {
        let row = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            UPDATE subscriptions
            SET config = ?, risk_rules = ?, filter = ?, updated_at = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(serde_json::to_string(&settings.copy)?)
        .bind(serde_json::to_string(&settings.risk)?)
        .bind(serde_json::to_string(&settings.filter)?)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Subscription::try_from).transpose()
    }

    async fn list_active_by_strategy(&self, strategy_id: i64) -> Result<Vec<Subscription>> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(
            "SELECT * FROM subscriptions WHERE strategy_id = ? AND status = ? ORDER BY id",
        )
        .bind(strategy_id)
        .bind(SubscriptionStatus::Active.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Subscription::try_from).collect()
    }

    async fn transition_status(
        &self,
        change: &StatusChange,
    ) -> Result<Option<(Subscription, StatusHistoryEntry)>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            UPDATE subscriptions
            SET status = ?, status_reason = ?, updated_at = ?
            WHERE id = ? AND status = ?
            RETURNING *
            "#,
        )
        .bind(change.to.as_str())
        .bind(&change.reason)
        .bind(now)
        .bind(change.subscription_id)
        .bind(change.from.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(updated) = updated else {
            tx.rollback().await?;
            return Ok(None);
        };

        let history = sqlx::query_as::<_, HistoryRow>(INSERT_HISTORY)
            .bind(change.subscription_id)
            .bind(change.from.as_str())
            .bind(change.to.as_str())
            .bind(&change.reason)
            .bind(change.actor.to_string())
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Some((updated.try_into()?, history.try_into()?)))
    }

    async fn archive_active(
        &self,
        scope: ArchiveScope,
        reason: &str,
        actor: Actor,
    ) -> Result<Vec<Subscription>> {
        let (column, scope_id) = match scope {
            ArchiveScope::Strategy(id) => ("strategy_id", id),
            ArchiveScope::Offer(id) => ("offer_id", id),
        };
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            UPDATE subscriptions
            SET status = ?, status_reason = ?, updated_at = ?
            WHERE {column} = ? AND status = ?
            RETURNING *
            "#
        );
        let rows = sqlx::query_as::<_, SubscriptionRow>(&sql)
            .bind(SubscriptionStatus::Archived.as_str())
            .bind(reason)
            .bind(now)
            .bind(scope_id)
            .bind(SubscriptionStatus::Active.as_str())
            .fetch_all(&mut *tx)
            .await?;

        for row in &rows {
            sqlx::query(
                r#"
                INSERT INTO subscription_status_history
                    (subscription_id, old_status, new_status, reason, changed_by, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(row.id)
            .bind(SubscriptionStatus::Active.as_str())
            .bind(SubscriptionStatus::Archived.as_str())
            .bind(reason)
            .bind(actor.to_string())
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        let mut archived: Vec<Subscription> = rows
            .into_iter()
            .map(Subscription::try_from)
            .collect::<Result<_>>()?;
        archived.sort_by_key(|s| s.id);
        Ok(archived)
    }

    async fn status_history(&self, id: i64) -> Result<Vec<StatusHistoryEntry>> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            "SELECT * FROM subscription_status_history WHERE subscription_id = ? ORDER BY id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StatusHistoryEntry::try_from).collect()
    }
}
