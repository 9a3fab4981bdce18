//! Subscription lifecycle: status transitions, history, and the cascades
//! triggered when a strategy or offer is archived or deleted.

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{CopyError, Result};
use crate::models::{
    Actor, AuditEntry, AuditOperation, EntityKind, NewOffer, NewStrategy, NewSubscription, Offer,
    OfferStatus, StatusHistoryEntry, Strategy, StrategyStatus, Subscription, SubscriptionSettings,
    SubscriptionStatus,
};
use crate::repository::{record_best_effort, StatusChange, Stores};

use super::config::EngineConfig;
use super::directory::SubscriptionDirectory;

/// A strategy or offer status change and how many subscriptions it archived.
#[derive(Debug, Clone, Serialize)]
pub struct StatusCascade<T> {
    pub updated: T,
    pub archived_subscriptions: usize,
}

#[derive(Clone)]
pub struct SubscriptionLifecycle {
    config: EngineConfig,
    stores: Stores,
    directory: SubscriptionDirectory,
}

impl SubscriptionLifecycle {
    pub fn new(stores: Stores, config: EngineConfig) -> Self {
        let directory = SubscriptionDirectory::new(stores.subscriptions.clone(), stores.audit.clone());
        Self {
            config,
            stores,
            directory,
        }
    }

    // ==================== Subscriptions ====================

    /// Subscribe an investor account to an active offer. Starts in `preparing`.
    pub async fn create_subscription(
        &self,
        subscription: NewSubscription,
        actor: Actor,
    ) -> Result<Subscription> {
        let settings = subscription.settings.validate()?;
        let subscription = NewSubscription {
            settings,
            ..subscription
        };

        let offer = self
            .stores
            .offers
            .get_offer(subscription.offer_id)
            .await?
            .ok_or_else(|| CopyError::not_found("offer", subscription.offer_id))?;
        if !offer.is_active() {
            return Err(CopyError::OfferNotActive(offer.id));
        }

        let created = self
            .stores
            .subscriptions
            .create_subscription(&subscription, offer.strategy_id)
            .await?;

        info!(
            subscription_id = created.id,
            offer_id = created.offer_id,
            strategy_id = created.strategy_id,
            investor_account_id = created.investor_account_id,
            "Subscription created"
        );

        let entry = AuditEntry::new(EntityKind::Subscription, created.id, AuditOperation::Insert, actor)
            .after(&created);
        record_best_effort(self.stores.audit.as_ref(), entry).await;

        Ok(created)
    }

    /// Replace a subscription's settings.
    pub async fn update_settings(
        &self,
        id: i64,
        settings: SubscriptionSettings,
        actor: Actor,
    ) -> Result<Subscription> {
        let settings = settings.validate()?;

        let before = self.get_subscription(id).await?;
        if before.status.is_terminal() {
            return Err(CopyError::validation(format!("subscription {id} is deleted")));
        }

        let updated = self
            .stores
            .subscriptions
            .update_settings(id, &settings)
            .await?
            .ok_or_else(|| CopyError::not_found("subscription", id))?;

        info!(subscription_id = id, actor = %actor, "Subscription settings updated");

        let entry = AuditEntry::new(EntityKind::Subscription, id, AuditOperation::Update, actor)
            .before(&before)
            .after(&updated);
        record_best_effort(self.stores.audit.as_ref(), entry).await;

        Ok(updated)
    }

    /// Move a subscription to `new_status`.
    ///
    /// The update only applies while the stored status is the one that was
    /// validated; a concurrent change forces a re-read and re-validation.
    pub async fn change_status(
        &self,
        id: i64,
        new_status: SubscriptionStatus,
        reason: &str,
        actor: Actor,
    ) -> Result<Subscription> {
        for attempt in 1..=self.config.status_retry_limit {
            let current = self.get_subscription(id).await?;
            if !current.status.can_transition_to(new_status) {
                return Err(CopyError::invalid_transition(current.status, new_status));
            }

            let change = StatusChange {
                subscription_id: id,
                from: current.status,
                to: new_status,
                reason: reason.to_string(),
                actor,
            };

            match self.stores.subscriptions.transition_status(&change).await? {
                Some((updated, history)) => {
                    info!(
                        subscription_id = id,
                        from = %history.old_status,
                        to = %history.new_status,
                        reason,
                        actor = %actor,
                        "Subscription status changed"
                    );

                    let entry = AuditEntry::new(
                        EntityKind::Subscription,
                        id,
                        AuditOperation::StatusChange,
                        actor,
                    )
                    .before(&current)
                    .after(&updated);
                    record_best_effort(self.stores.audit.as_ref(), entry).await;

                    return Ok(updated);
                }
                None => {
                    warn!(subscription_id = id, attempt, "Status changed concurrently, retrying");
                }
            }
        }

        Err(CopyError::Conflict(id))
    }

    /// Status transitions of a subscription, oldest first.
    pub async fn status_history(&self, id: i64) -> Result<Vec<StatusHistoryEntry>> {
        self.get_subscription(id).await?;
        self.stores.subscriptions.status_history(id).await
    }

    async fn get_subscription(&self, id: i64) -> Result<Subscription> {
        self.stores
            .subscriptions
            .get_subscription(id)
            .await?
            .ok_or_else(|| CopyError::not_found("subscription", id))
    }

    // ==================== Strategies ====================

    pub async fn create_strategy(&self, strategy: NewStrategy, actor: Actor) -> Result<Strategy> {
        let strategy = strategy.validate()?;
        let created = self.stores.strategies.create_strategy(&strategy).await?;

        info!(strategy_id = created.id, nickname = %created.nickname, "Strategy created");

        let entry = AuditEntry::new(EntityKind::Strategy, created.id, AuditOperation::Insert, actor)
            .after(&created);
        record_best_effort(self.stores.audit.as_ref(), entry).await;

        Ok(created)
    }

    /// Change a strategy's status. Archiving or deleting it archives every
    /// active subscription following it, with reason `strategy_<status>`
    /// unless `reason` is given.
    pub async fn change_strategy_status(
        &self,
        id: i64,
        new_status: StrategyStatus,
        reason: Option<&str>,
        actor: Actor,
    ) -> Result<StatusCascade<Strategy>> {
        let cascade_reason = match reason {
            Some(r) if !r.is_empty() => r.to_string(),
            _ => format!("strategy_{new_status}"),
        };

        let mut attempt = 0;
        let mut archived_subscriptions = 0;
        let (before, updated) = loop {
            attempt += 1;
            let current = self
                .stores
                .strategies
                .get_strategy(id)
                .await?
                .ok_or_else(|| CopyError::not_found("strategy", id))?;
            if !current.status.can_transition_to(new_status) {
                return Err(CopyError::invalid_transition(current.status, new_status));
            }

            // Subscriptions are archived before the status moves; a failed cascade
            // leaves the strategy status unchanged
            if new_status.closes_subscriptions() {
                archived_subscriptions += self
                    .directory
                    .archive_all_for_strategy(id, &cascade_reason, actor)
                    .await?;
            }

            let applied = self
                .stores
                .strategies
                .set_strategy_status(id, current.status, new_status, reason.unwrap_or_default())
                .await?;
            match applied {
                Some(updated) => break (current, updated),
                None if attempt < self.config.status_retry_limit => {
                    warn!(strategy_id = id, attempt, "Strategy status changed concurrently, retrying");
                }
                None => return Err(CopyError::Conflict(id)),
            }
        };

        info!(
            strategy_id = id,
            from = %before.status,
            to = %updated.status,
            "Strategy status changed"
        );

        let entry = AuditEntry::new(EntityKind::Strategy, id, AuditOperation::StatusChange, actor)
            .before(&before)
            .after(&updated);
        record_best_effort(self.stores.audit.as_ref(), entry).await;

        Ok(StatusCascade {
            updated,
            archived_subscriptions,
        })
    }

    // ==================== Offers ====================

    pub async fn create_offer(&self, offer: NewOffer, actor: Actor) -> Result<Offer> {
        let offer = offer.validate()?;

        let strategy = self
            .stores
            .strategies
            .get_strategy(offer.strategy_id)
            .await?
            .ok_or_else(|| CopyError::not_found("strategy", offer.strategy_id))?;
        if strategy.status.closes_subscriptions() {
            return Err(CopyError::StrategyNotActive(strategy.id));
        }

        let created = self.stores.offers.create_offer(&offer).await?;

        info!(
            offer_id = created.id,
            strategy_id = created.strategy_id,
            performance_fee = %created.fees.performance_fee_pct,
            "Offer created"
        );

        let entry = AuditEntry::new(EntityKind::Offer, created.id, AuditOperation::Insert, actor)
            .after(&created);
        record_best_effort(self.stores.audit.as_ref(), entry).await;

        Ok(created)
    }

    /// Change an offer's status. Archiving or deleting it archives its active
    /// subscriptions, with reason `offer_<status>` unless `reason` is given.
    pub async fn change_offer_status(
        &self,
        id: i64,
        new_status: OfferStatus,
        reason: Option<&str>,
        actor: Actor,
    ) -> Result<StatusCascade<Offer>> {
        let cascade_reason = match reason {
            Some(r) if !r.is_empty() => r.to_string(),
            _ => format!("offer_{new_status}"),
        };

        let mut attempt = 0;
        let mut archived_subscriptions = 0;
        let (before, updated) = loop {
            attempt += 1;
            let current = self
                .stores
                .offers
                .get_offer(id)
                .await?
                .ok_or_else(|| CopyError::not_found("offer", id))?;
            if !current.status.can_transition_to(new_status) {
                return Err(CopyError::invalid_transition(current.status, new_status));
            }

            // Subscriptions are archived before the status moves; a failed cascade
            // leaves the offer status unchanged
            if new_status.closes_subscriptions() {
                archived_subscriptions += self
                    .directory
                    .archive_all_for_offer(id, &cascade_reason, actor)
                    .await?;
            }

            let applied = self
                .stores
                .offers
                .set_offer_status(id, current.status, new_status, reason.unwrap_or_default())
                .await?;
            match applied {
                Some(updated) => break (current, updated),
                None if attempt < self.config.status_retry_limit => {
                    warn!(offer_id = id, attempt, "Offer status changed concurrently, retrying");
                }
                None => return Err(CopyError::Conflict(id)),
            }
        };

        info!(
            offer_id = id,
            from = %before.status,
            to = %updated.status,
            "Offer status changed"
        );

        let entry = AuditEntry::new(EntityKind::Offer, id, AuditOperation::StatusChange, actor)
            .before(&before)
            .after(&updated);
        record_best_effort(self.stores.audit.as_ref(), entry).await;

        Ok(StatusCascade {
            updated,
            archived_subscriptions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use rust_decimal_macros::dec;
    use tokio_test::{assert_err, assert_ok};

    use crate::models::{AuditOperation, FeeSchedule};
    use crate::repository::{OfferStore, StrategyStore};
    use crate::testkit::{FailingArchive, RacingSubscriptions, TestEnv};

    #[tokio::test]
    async fn test_change_status_records_history() {
        let env = TestEnv::new().await;
        let sub = env.subscription(Default::default()).await;
        let lifecycle = env.lifecycle();

        let active = assert_ok!(
            lifecycle
                .change_status(sub.id, SubscriptionStatus::Active, "approved", Actor::User(5))
                .await
        );
        assert_eq!(active.status, SubscriptionStatus::Active);
        assert_eq!(active.status_reason, "approved");

        assert_ok!(
            lifecycle
                .change_status(sub.id, SubscriptionStatus::Suspended, "paused", Actor::User(5))
                .await
        );
        assert_ok!(
            lifecycle
                .change_status(sub.id, SubscriptionStatus::Active, "resumed", Actor::System)
                .await
        );

        let history = assert_ok!(lifecycle.status_history(sub.id).await);
        let steps: Vec<(SubscriptionStatus, SubscriptionStatus)> = history
            .iter()
            .map(|h| (h.old_status, h.new_status))
            .collect();
        assert_eq!(
            steps,
            vec![
                (SubscriptionStatus::Preparing, SubscriptionStatus::Active),
                (SubscriptionStatus::Active, SubscriptionStatus::Suspended),
                (SubscriptionStatus::Suspended, SubscriptionStatus::Active),
            ]
        );
        assert_eq!(history[0].actor, Actor::User(5));
        assert_eq!(history[2].actor, Actor::System);
        assert_eq!(history[1].reason, "paused");

        let trail = assert_ok!(env.db.audit_trail(EntityKind::Subscription, sub.id).await);
        assert_eq!(trail.len(), 3);
        assert_eq!(trail[0].operation().unwrap(), AuditOperation::StatusChange);
    }

    #[tokio::test]
    async fn test_invalid_transitions_are_rejected() {
        let env = TestEnv::new().await;
        let sub = env.subscription(Default::default()).await;
        let lifecycle = env.lifecycle();

        let err = assert_err!(
            lifecycle
                .change_status(sub.id, SubscriptionStatus::Suspended, "", Actor::System)
                .await
        );
        assert!(matches!(err, CopyError::InvalidTransition { .. }));
        assert_eq!(err.to_string(), "Invalid status transition: from preparing to suspended");

        let err = assert_err!(
            lifecycle
                .change_status(sub.id, SubscriptionStatus::Preparing, "", Actor::System)
                .await
        );
        assert!(matches!(err, CopyError::InvalidTransition { .. }));
        assert!(env.history(sub.id).await.is_empty());
    }

    #[tokio::test]
    async fn test_deleted_is_terminal() {
        let env = TestEnv::new().await;
        let sub = env.active_subscription(Default::default()).await;
        let lifecycle = env.lifecycle();

        assert_ok!(
            lifecycle
                .change_status(sub.id, SubscriptionStatus::Deleted, "closed", Actor::User(1))
                .await
        );

        for target in [
            SubscriptionStatus::Preparing,
            SubscriptionStatus::Active,
            SubscriptionStatus::Suspended,
            SubscriptionStatus::Archived,
            SubscriptionStatus::Deleted,
        ] {
            let err = assert_err!(lifecycle.change_status(sub.id, target, "", Actor::System).await);
            assert!(matches!(err, CopyError::InvalidTransition { .. }), "{target}");
        }
        assert_eq!(env.subscription_by_id(sub.id).await.status, SubscriptionStatus::Deleted);
    }

    #[tokio::test]
    async fn test_unknown_subscription() {
        let env = TestEnv::new().await;
        let lifecycle = env.lifecycle();

        let err = assert_err!(
            lifecycle
                .change_status(41, SubscriptionStatus::Active, "", Actor::System)
                .await
        );
        assert!(matches!(err, CopyError::NotFound { entity: "subscription", id: 41 }));
        assert_err!(lifecycle.status_history(41).await);
    }

    #[tokio::test]
    async fn test_lost_races_end_in_conflict() {
        let env = TestEnv::new().await;
        let sub = env.subscription(Default::default()).await;

        let mut stores = env.stores();
        stores.subscriptions = Arc::new(RacingSubscriptions {
            inner: env.db.clone(),
        });

        let err = assert_err!(
            env.lifecycle_with(stores)
                .change_status(sub.id, SubscriptionStatus::Active, "", Actor::System)
                .await
        );
        assert!(matches!(err, CopyError::Conflict(id) if id == sub.id));
    }

    #[tokio::test]
    async fn test_archiving_strategy_cascades() {
        let env = TestEnv::new().await;
        let second_offer = env.offer(FeeSchedule::default()).await;

        let a = env.active_subscription(Default::default()).await;
        let b = env.active_subscription(Default::default()).await;
        let c = env
            .active_subscription_on(second_offer.id, Default::default())
            .await;
        let suspended = env.active_subscription(Default::default()).await;
        env.set_status(suspended.id, SubscriptionStatus::Suspended).await;
        let preparing = env.subscription(Default::default()).await;

        let cascade = assert_ok!(
            env.lifecycle()
                .change_strategy_status(env.strategy.id, StrategyStatus::Archived, None, Actor::User(1))
                .await
        );
        assert_eq!(cascade.updated.status, StrategyStatus::Archived);
        assert_eq!(cascade.archived_subscriptions, 3);

        let mut cascade_rows = 0;
        for id in [a.id, b.id, c.id] {
            let sub = env.subscription_by_id(id).await;
            assert_eq!(sub.status, SubscriptionStatus::Archived);
            assert_eq!(sub.status_reason, "strategy_archived");
            cascade_rows += env
                .history(id)
                .await
                .iter()
                .filter(|h| h.reason == "strategy_archived")
                .count();
        }
        assert_eq!(cascade_rows, 3);

        assert_eq!(env.subscription_by_id(suspended.id).await.status, SubscriptionStatus::Suspended);
        assert_eq!(env.subscription_by_id(preparing.id).await.status, SubscriptionStatus::Preparing);
    }

    #[tokio::test]
    async fn test_strategy_cascade_uses_given_reason() {
        let env = TestEnv::new().await;
        let sub = env.active_subscription(Default::default()).await;

        assert_ok!(
            env.lifecycle()
                .change_strategy_status(
                    env.strategy.id,
                    StrategyStatus::Deleted,
                    Some("master left"),
                    Actor::System
                )
                .await
        );
        assert_eq!(env.subscription_by_id(sub.id).await.status_reason, "master left");
    }

    #[tokio::test]
    async fn test_reactivating_strategy_does_not_cascade() {
        let env = TestEnv::new().await;
        let lifecycle = env.lifecycle();
        let sub = env.active_subscription(Default::default()).await;

        assert_ok!(
            lifecycle
                .change_strategy_status(env.strategy.id, StrategyStatus::Archived, None, Actor::System)
                .await
        );
        let cascade = assert_ok!(
            lifecycle
                .change_strategy_status(env.strategy.id, StrategyStatus::Active, None, Actor::System)
                .await
        );
        assert_eq!(cascade.archived_subscriptions, 0);
        assert_eq!(env.subscription_by_id(sub.id).await.status, SubscriptionStatus::Archived);

        let err = assert_err!(
            lifecycle
                .change_strategy_status(env.strategy.id, StrategyStatus::Preparing, None, Actor::System)
                .await
        );
        assert!(matches!(err, CopyError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_deleting_offer_cascades() {
        let env = TestEnv::new().await;
        let other = env.offer(FeeSchedule::default()).await;
        let kept = env.active_subscription(Default::default()).await;
        let gone = env.active_subscription_on(other.id, Default::default()).await;

        let cascade = assert_ok!(
            env.lifecycle()
                .change_offer_status(other.id, OfferStatus::Deleted, None, Actor::User(3))
                .await
        );
        assert_eq!(cascade.updated.status, OfferStatus::Deleted);
        assert_eq!(cascade.archived_subscriptions, 1);

        let gone = env.subscription_by_id(gone.id).await;
        assert_eq!(gone.status, SubscriptionStatus::Archived);
        assert_eq!(gone.status_reason, "offer_deleted");
        assert!(env.subscription_by_id(kept.id).await.is_active());
    }

    #[tokio::test]
    async fn test_create_subscription() {
        let env = TestEnv::new().await;
        let lifecycle = env.lifecycle();

        let mut settings = SubscriptionSettings::default();
        settings.copy.copy_ratio = dec!(0.25);
        settings.filter.blocked_symbols.insert("xauusd".to_string());

        let sub = assert_ok!(
            lifecycle
                .create_subscription(
                    NewSubscription {
                        investor_user_id: 9,
                        investor_account_id: 90,
                        offer_id: env.offer.id,
                        settings,
                    },
                    Actor::User(9)
                )
                .await
        );
        assert_eq!(sub.status, SubscriptionStatus::Preparing);
        assert_eq!(sub.strategy_id, env.strategy.id);
        assert_eq!(sub.settings.copy.copy_ratio, dec!(0.25));
        assert!(sub.settings.filter.blocked_symbols.contains("XAUUSD"));
        assert!(env.history(sub.id).await.is_empty());

        let trail = assert_ok!(env.db.audit_trail(EntityKind::Subscription, sub.id).await);
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].operation().unwrap(), AuditOperation::Insert);
        assert_eq!(trail[0].actor, "user:9");
    }

    #[tokio::test]
    async fn test_create_subscription_requires_active_offer() {
        let env = TestEnv::new().await;
        let lifecycle = env.lifecycle();
        let new_sub = |offer_id| NewSubscription {
            investor_user_id: 9,
            investor_account_id: 90,
            offer_id,
            settings: SubscriptionSettings::default(),
        };

        let err = assert_err!(lifecycle.create_subscription(new_sub(404), Actor::System).await);
        assert!(matches!(err, CopyError::NotFound { entity: "offer", .. }));

        assert_ok!(
            lifecycle
                .change_offer_status(env.offer.id, OfferStatus::Archived, None, Actor::System)
                .await
        );
        let err = assert_err!(lifecycle.create_subscription(new_sub(env.offer.id), Actor::System).await);
        assert!(matches!(err, CopyError::OfferNotActive(_)));

        let mut bad = new_sub(env.offer.id);
        bad.settings.copy.copy_ratio = dec!(-1);
        let err = assert_err!(lifecycle.create_subscription(bad, Actor::System).await);
        assert!(matches!(err, CopyError::Validation(_)));
    }

    #[tokio::test]
    async fn test_update_settings() {
        let env = TestEnv::new().await;
        let lifecycle = env.lifecycle();
        let sub = env.active_subscription(Default::default()).await;

        let mut settings = sub.settings.clone();
        settings.filter.allowed_symbols.insert("gbpusd".to_string());
        settings.copy.max_position_size = Some(dec!(2));

        let updated = assert_ok!(lifecycle.update_settings(sub.id, settings, Actor::User(4)).await);
        assert!(updated.settings.filter.allowed_symbols.contains("GBPUSD"));
        assert_eq!(updated.settings.copy.max_position_size, Some(dec!(2)));
        assert_eq!(env.subscription_by_id(sub.id).await.settings, updated.settings);

        let trail = assert_ok!(env.db.audit_trail(EntityKind::Subscription, sub.id).await);
        let last = trail.last().unwrap();
        assert_eq!(last.operation().unwrap(), AuditOperation::Update);
        assert!(last.before_value.is_some());
        assert!(last.after_value.is_some());

        let mut bad = SubscriptionSettings::default();
        bad.risk.max_drawdown_pct = Some(dec!(0));
        assert_err!(lifecycle.update_settings(sub.id, bad, Actor::User(4)).await);

        let err = assert_err!(
            lifecycle
                .update_settings(999, SubscriptionSettings::default(), Actor::User(4))
                .await
        );
        assert!(matches!(err, CopyError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_create_strategy_and_offer() {
        let env = TestEnv::new().await;
        let lifecycle = env.lifecycle();

        let strategy = assert_ok!(
            lifecycle
                .create_strategy(
                    NewStrategy {
                        master_user_id: 2,
                        master_account_id: 200,
                        nickname: "  beta ".to_string(),
                    },
                    Actor::User(2)
                )
                .await
        );
        assert_eq!(strategy.nickname, "beta");
        assert_eq!(strategy.status, StrategyStatus::Preparing);

        let offer = assert_ok!(
            lifecycle
                .create_offer(
                    NewOffer {
                        strategy_id: strategy.id,
                        name: "gold".to_string(),
                        fees: FeeSchedule {
                            performance_fee_pct: dec!(25),
                            registration_fee: dec!(10),
                            ..FeeSchedule::default()
                        },
                    },
                    Actor::User(2)
                )
                .await
        );
        assert_eq!(offer.status, OfferStatus::Active);
        assert_eq!(offer.fee_schedule().performance_fee_pct, dec!(25));
        assert_eq!(offer.fee_schedule().registration_fee, dec!(10));

        let err = assert_err!(
            lifecycle
                .create_offer(
                    NewOffer {
                        strategy_id: strategy.id,
                        name: "greedy".to_string(),
                        fees: FeeSchedule {
                            performance_fee_pct: dec!(120),
                            ..FeeSchedule::default()
                        },
                    },
                    Actor::User(2)
                )
                .await
        );
        assert!(matches!(err, CopyError::Validation(_)));

        assert_ok!(
            lifecycle
                .change_strategy_status(strategy.id, StrategyStatus::Deleted, None, Actor::User(2))
                .await
        );
        let err = assert_err!(
            lifecycle
                .create_offer(
                    NewOffer {
                        strategy_id: strategy.id,
                        name: "late".to_string(),
                        fees: FeeSchedule::default(),
                    },
                    Actor::User(2)
                )
                .await
        );
        assert!(matches!(err, CopyError::StrategyNotActive(_)));
    }

    #[tokio::test]
    async fn test_failed_strategy_cascade_can_be_retried() {
        let env = TestEnv::new().await;
        let sub = env.active_subscription(Default::default()).await;

        let mut stores = env.stores();
        stores.subscriptions = Arc::new(FailingArchive {
            inner: env.db.clone(),
        });
        assert_err!(
            env.lifecycle_with(stores)
                .change_strategy_status(env.strategy.id, StrategyStatus::Archived, None, Actor::System)
                .await
        );

        let strategy = assert_ok!(env.db.get_strategy(env.strategy.id).await).unwrap();
        assert_eq!(strategy.status, StrategyStatus::Active);
        assert!(env.subscription_by_id(sub.id).await.is_active());

        let cascade = assert_ok!(
            env.lifecycle()
                .change_strategy_status(env.strategy.id, StrategyStatus::Archived, None, Actor::System)
                .await
        );
        assert_eq!(cascade.updated.status, StrategyStatus::Archived);
        assert_eq!(cascade.archived_subscriptions, 1);
        assert_eq!(env.subscription_by_id(sub.id).await.status, SubscriptionStatus::Archived);
    }

    #[tokio::test]
    async fn test_failed_offer_cascade_can_be_retried() {
        let env = TestEnv::new().await;
        let sub = env.active_subscription(Default::default()).await;

        let mut stores = env.stores();
        stores.subscriptions = Arc::new(FailingArchive {
            inner: env.db.clone(),
        });
        assert_err!(
            env.lifecycle_with(stores)
                .change_offer_status(env.offer.id, OfferStatus::Deleted, None, Actor::System)
                .await
        );

        let offer = assert_ok!(env.db.get_offer(env.offer.id).await).unwrap();
        assert_eq!(offer.status, OfferStatus::Active);
        assert!(env.subscription_by_id(sub.id).await.is_active());

        let cascade = assert_ok!(
            env.lifecycle()
                .change_offer_status(env.offer.id, OfferStatus::Deleted, None, Actor::System)
                .await
        );
        assert_eq!(cascade.archived_subscriptions, 1);
        assert_eq!(env.subscription_by_id(sub.id).await.status_reason, "offer_deleted");
    }
}
