use async_trait::async_trait;
use chrono::Utc;

use crate::error::Result;
use crate::models::{NewOffer, NewStrategy, Offer, OfferStatus, Strategy, StrategyStatus};
use crate::repository::{OfferStore, StrategyStore};

use super::rows::{OfferRow, StrategyRow};
use super::Database;

// ==================== Strategies ====================

#[async_trait]
impl StrategyStore for Database {
    async fn get_strategy(&self, id: i64) -> Result<Option<Strategy>> {
        let row = sqlx::query_as::<_, StrategyRow>("SELECT * FROM strategies WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Strategy::try_from).transpose()
    }

    async fn create_strategy(&self, strategy: &NewStrategy) -> Result<Strategy> {
        let now = Utc::now();
        let row = sqlx::query_as::<_, StrategyRow>(
            r#"
            INSERT INTO strategies (master_user_id, master_account_id, nickname, status,
                                    status_reason, created_at, updated_at)
            VALUES (?, ?, ?, ?, '', ?, ?)
            RETURNING *
            "#,
        )
        .bind(strategy.master_user_id)
        .bind(strategy.master_account_id)
        .bind(&strategy.nickname)
        .bind(StrategyStatus::Preparing.as_str())
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn set_strategy_status(
        &self,
        id: i64,
        from: StrategyStatus,
        to: StrategyStatus,
        reason: &str,
    ) -> Result<Option<Strategy>> {
        let row = sqlx::query_as::<_, StrategyRow>(
            r#"
            UPDATE strategies
            SET status = ?, status_reason = ?, updated_at = ?
            WHERE id = ? AND status = ?
            RETURNING *
            "#,
        )
        .bind(to.as_str())
        .bind(reason)
        .bind(Utc::now())
        .bind(id)
        .bind(from.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Strategy::try_from).transpose()
    }
}

// ==================== Offers ====================

#[async_trait]
impl OfferStore for Database {
    async fn get_offer(&self, id: i64) -> Result<Option<Offer>> {
        let row = sqlx::query_as::<_, OfferRow>("SELECT * FROM offers WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Offer::try_from).transpose()
    }

    async fn create_offer(&self, offer: &NewOffer) -> Result<Offer> {
        let now = Utc::now();
        let fees = &offer.fees;

        let row = sqlx::query_as::<_, OfferRow>(
            r#"
            INSERT INTO offers (strategy_id, name, performance_fee, performance_fee_interval,
                                management_fee, management_fee_interval, registration_fee,
                                status, status_reason, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, '', ?, ?)
            RETURNING *
            "#,
        )
        .bind(offer.strategy_id)
        .bind(&offer.name)
        .bind(fees.performance_fee_pct.to_string())
        .bind(fees.performance_fee_interval.as_str())
        .bind(fees.management_fee_pct.to_string())
        .bind(fees.management_fee_interval.as_str())
        .bind(fees.registration_fee.to_string())
        .bind(OfferStatus::Active.as_str())
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn set_offer_status(
        &self,
        id: i64,
        from: OfferStatus,
        to: OfferStatus,
        reason: &str,
    ) -> Result<Option<Offer>> {
        let row = sqlx::query_as::<_, OfferRow>(
            r#"
            UPDATE offers
            SET status = ?, status_reason = ?, updated_at = ?
            WHERE id = ? AND status = ?
            RETURNING *
            "#,
        )
        .bind(to.as_str())
        .bind(reason)
        .bind(Utc::now())
        .bind(id)
        .bind(from.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Offer::try_from).transpose()
    }
}
