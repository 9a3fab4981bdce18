use async_trait::async_trait;
use chrono::Utc;

use crate::error::Result;
use crate::models::{AuditEntry, Commission, EntityKind, NewCommission};
use crate::repository::{AuditSink, CommissionStore};

use super::rows::{AuditRow, CommissionRow};
use super::Database;

// ==================== Commissions ====================

#[async_trait]
impl CommissionStore for Database {
    async fn create_commission(&self, commission: &NewCommission) -> Result<Commission> {
        let row = sqlx::query_as::<_, CommissionRow>(
            r#"
            INSERT INTO commissions (subscription_id, type, amount, period_from, period_to, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(commission.subscription_id)
        .bind(commission.kind.as_str())
        .bind(commission.amount.to_string())
        .bind(commission.period_from)
        .bind(commission.period_to)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn commissions_for_subscription(&self, subscription_id: i64) -> Result<Vec<Commission>> {
        let rows = sqlx::query_as::<_, CommissionRow>(
            "SELECT * FROM commissions WHERE subscription_id = ? ORDER BY id",
        )
        .bind(subscription_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Commission::try_from).collect()
    }
}

// ==================== Audit log ====================

#[async_trait]
impl AuditSink for Database {
    async fn record(&self, entry: &AuditEntry) -> Result<()> {
        let before = entry.before.as_ref().map(serde_json::to_string).transpose()?;
        let after = entry.after.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO audit_log (entity, entity_id, operation, actor, before_value, after_value, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.entity.as_str())
        .bind(entry.entity_id)
        .bind(entry.operation.as_str())
        .bind(entry.actor.to_string())
        .bind(before)
        .bind(after)
        .bind(entry.recorded_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

impl Database {
    /// Audit trail of one entity, oldest first.
    pub async fn audit_trail(&self, entity: EntityKind, entity_id: i64) -> Result<Vec<AuditRow>> {
        let rows = sqlx::query_as::<_, AuditRow>(
            "SELECT * FROM audit_log WHERE entity = ? AND entity_id = ? ORDER BY id",
        )
        .bind(entity.as_str())
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
