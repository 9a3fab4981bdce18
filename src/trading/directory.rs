//! Subscription directory: which subscriptions receive copies, and bulk archival.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::Result;
use crate::models::{Actor, AuditEntry, AuditOperation, EntityKind, Subscription, SubscriptionStatus};
use crate::repository::{record_best_effort, ArchiveScope, AuditSink, SubscriptionStore};

#[derive(Clone)]
pub struct SubscriptionDirectory {
    subscriptions: Arc<dyn SubscriptionStore>,
    audit: Arc<dyn AuditSink>,
}

impl SubscriptionDirectory {
    pub fn new(subscriptions: Arc<dyn SubscriptionStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            subscriptions,
            audit,
        }
    }

    /// Active subscriptions following `strategy_id`. May be empty.
    pub async fn active_for_strategy(&self, strategy_id: i64) -> Result<Vec<Subscription>> {
        self.subscriptions.list_active_by_strategy(strategy_id).await
    }

    /// Active subscriptions among `ids`. Unknown and inactive ids are dropped,
    /// duplicates collapse.
    pub async fn by_ids(&self, ids: &[i64]) -> Result<Vec<Subscription>> {
        let unique: BTreeSet<i64> = ids.iter().copied().collect();
        let mut found = Vec::with_capacity(unique.len());

        for id in unique {
            match self.subscriptions.get_subscription(id).await? {
                Some(sub) if sub.is_active() => found.push(sub),
                Some(sub) => {
                    debug!(subscription_id = id, status = %sub.status, "Skipping inactive subscription")
                }
                None => debug!(subscription_id = id, "Skipping unknown subscription"),
            }
        }

        Ok(found)
    }

    /// Archive every active subscription of a strategy. Returns how many moved.
    pub async fn archive_all_for_strategy(
        &self,
        strategy_id: i64,
        reason: &str,
        actor: Actor,
    ) -> Result<usize> {
        self.archive(ArchiveScope::Strategy(strategy_id), reason, actor)
            .await
    }

    /// Archive every active subscription of an offer. Returns how many moved.
    pub async fn archive_all_for_offer(
        &self,
        offer_id: i64,
        reason: &str,
        actor: Actor,
    ) -> Result<usize> {
        self.archive(ArchiveScope::Offer(offer_id), reason, actor).await
    }

    async fn archive(&self, scope: ArchiveScope, reason: &str, actor: Actor) -> Result<usize> {
        let archived = self
            .subscriptions
            .archive_active(scope, reason, actor)
            .await?;

        for sub in &archived {
            let mut before = sub.clone();
            before.status = SubscriptionStatus::Active;

            let entry = AuditEntry::new(
                EntityKind::Subscription,
                sub.id,
                AuditOperation::StatusChange,
                actor,
            )
            .before(&before)
            .after(sub);
            record_best_effort(self.audit.as_ref(), entry).await;
        }

        info!(
            scope = ?scope,
            reason,
            count = archived.len(),
            "Archived active subscriptions"
        );
        Ok(archived.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    use crate::testkit::TestEnv;

    #[tokio::test]
    async fn test_by_ids_filters_and_dedupes() {
        let env = TestEnv::new().await;
        let a = env.active_subscription(Default::default()).await;
        let b = env.active_subscription(Default::default()).await;
        let preparing = env.subscription(Default::default()).await;

        let found = assert_ok!(
            env.directory()
                .by_ids(&[b.id, a.id, b.id, preparing.id, 9_999])
                .await
        );
        let ids: Vec<i64> = found.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![a.id, b.id]);
    }

    #[tokio::test]
    async fn test_active_for_strategy_empty() {
        let env = TestEnv::new().await;
        let found = assert_ok!(env.directory().active_for_strategy(env.strategy.id).await);
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_cascading_archive_touches_only_active() {
        let env = TestEnv::new().await;
        let second_offer = env.offer(Default::default()).await;

        let a = env.active_subscription(Default::default()).await;
        let b = env.active_subscription(Default::default()).await;
        let c = env
            .active_subscription_on(second_offer.id, Default::default())
            .await;
        let suspended = env.active_subscription(Default::default()).await;
        env.set_status(suspended.id, SubscriptionStatus::Suspended).await;
        let archived = env.active_subscription(Default::default()).await;
        env.set_status(archived.id, SubscriptionStatus::Archived).await;

        let count = assert_ok!(
            env.directory()
                .archive_all_for_strategy(env.strategy.id, "strategy_archived", Actor::System)
                .await
        );
        assert_eq!(count, 3);

        for id in [a.id, b.id, c.id] {
            let sub = env.subscription_by_id(id).await;
            assert_eq!(sub.status, SubscriptionStatus::Archived);
            assert_eq!(sub.status_reason, "strategy_archived");

            let history = env.history(id).await;
            let last = history.last().unwrap();
            assert_eq!(last.old_status, SubscriptionStatus::Active);
            assert_eq!(last.new_status, SubscriptionStatus::Archived);
            assert_eq!(last.actor, Actor::System);
        }

        // Untouched: only the transitions made while seeding
        assert_eq!(env.subscription_by_id(suspended.id).await.status, SubscriptionStatus::Suspended);
        assert_eq!(env.history(suspended.id).await.len(), 2);
        assert_eq!(env.history(archived.id).await.len(), 2);
    }

    #[tokio::test]
    async fn test_archive_scoped_to_offer() {
        let env = TestEnv::new().await;
        let other_offer = env.offer(Default::default()).await;
        let kept = env.active_subscription(Default::default()).await;
        let gone = env
            .active_subscription_on(other_offer.id, Default::default())
            .await;

        let count = assert_ok!(
            env.directory()
                .archive_all_for_offer(other_offer.id, "offer_archived", Actor::User(1))
                .await
        );
        assert_eq!(count, 1);
        assert!(env.subscription_by_id(kept.id).await.is_active());
        assert_eq!(env.subscription_by_id(gone.id).await.status, SubscriptionStatus::Archived);
    }
}
