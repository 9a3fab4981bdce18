//! Storage interfaces consumed by the copy engine.
//!
//! Every store is an object-safe async trait so the engine can be wired to
//! the SQLite [`Database`](crate::db::Database) or to test doubles.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::warn;

use crate::error::Result;
use crate::models::{
    Actor, AuditEntry, Commission, CopiedTrade, CopiedTradeClose, NewCommission, NewCopiedTrade,
    NewOffer, NewStrategy, NewSubscription, NewTrade, Offer, OfferStatus, Page, Pagination,
    StatusHistoryEntry, Strategy, StrategyStatus, Subscription, SubscriptionSettings,
    SubscriptionStatus, Trade, TradeClose,
};

/// Filter for listing copied trades.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopiedTradeFilter {
    pub subscription_id: Option<i64>,
    pub trade_id: Option<i64>,
}

/// A compare-and-set status change: applied only while the row is still `from`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub subscription_id: i64,
    pub from: SubscriptionStatus,
    pub to: SubscriptionStatus,
    pub reason: String,
    pub actor: Actor,
}

/// Which active subscriptions a bulk archive touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveScope {
    Strategy(i64),
    Offer(i64),
}

#[async_trait]
pub trait TradeStore: Send + Sync {
    async fn get_trade(&self, id: i64) -> Result<Option<Trade>>;

    async fn create_trade(&self, trade: &NewTrade) -> Result<Trade>;

    async fn list_trades_by_strategy(&self, strategy_id: i64, page: Pagination)
        -> Result<Page<Trade>>;

    /// Close an open trade. Returns `None` if the trade was not open.
    async fn close_trade(
        &self,
        id: i64,
        close: &TradeClose,
        closed_at: DateTime<Utc>,
    ) -> Result<Option<Trade>>;
}

#[async_trait]
pub trait CopiedTradeStore: Send + Sync {
    async fn find_copied_trade(
        &self,
        trade_id: i64,
        subscription_id: i64,
    ) -> Result<Option<CopiedTrade>>;

    /// Insert a copy unless the (trade, subscription) pair already has one.
    /// Returns `None` when the pair was taken.
    async fn insert_copied_trade(&self, copy: &NewCopiedTrade) -> Result<Option<CopiedTrade>>;

    async fn list_copied_trades(
        &self,
        filter: &CopiedTradeFilter,
        page: Pagination,
    ) -> Result<Page<CopiedTrade>>;

    async fn open_copies_of_trade(&self, trade_id: i64) -> Result<Vec<CopiedTrade>>;

    /// Close an open copy. Returns `None` if it was already closed.
    async fn close_copied_trade(
        &self,
        id: i64,
        close: &CopiedTradeClose,
    ) -> Result<Option<CopiedTrade>>;

    /// Realised profit of each closed copy of a subscription, oldest close first.
    async fn realized_profits(
        &self,
        subscription_id: i64,
        closed_since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Decimal>>;
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn get_subscription(&self, id: i64) -> Result<Option<Subscription>>;

    async fn create_subscription(
        &self,
        subscription: &NewSubscription,
        strategy_id: i64,
    ) -> Result<Subscription>;

    async fn update_settings(
        &self,
        id: i64,
        settings: &SubscriptionSettings,
    ) -> Result<Option<Subscription>>;

    async fn list_active_by_strategy(&self, strategy_id: i64) -> Result<Vec<Subscription>>;

    /// Update the status and append the history row in one write.
    /// Returns `None` if the stored status is no longer `change.from`.
    async fn transition_status(
        &self,
        change: &StatusChange,
    ) -> Result<Option<(Subscription, StatusHistoryEntry)>>;

    /// Move every active subscription in `scope` to archived, one history row
    /// each, atomically. Returns the archived subscriptions.
    async fn archive_active(
        &self,
        scope: ArchiveScope,
        reason: &str,
        actor: Actor,
    ) -> Result<Vec<Subscription>>;

    /// Status transitions, oldest first.
    async fn status_history(&self, id: i64) -> Result<Vec<StatusHistoryEntry>>;
}

#[async_trait]
pub trait StrategyStore: Send + Sync {
    async fn get_strategy(&self, id: i64) -> Result<Option<Strategy>>;

    async fn create_strategy(&self, strategy: &NewStrategy) -> Result<Strategy>;

    /// Compare-and-set status update; `None` when the stored status is not `from`.
    async fn set_strategy_status(
        &self,
        id: i64,
        from: StrategyStatus,
        to: StrategyStatus,
        reason: &str,
    ) -> Result<Option<Strategy>>;
}

#[async_trait]
pub trait OfferStore: Send + Sync {
    async fn get_offer(&self, id: i64) -> Result<Option<Offer>>;

    async fn create_offer(&self, offer: &NewOffer) -> Result<Offer>;

    async fn set_offer_status(
        &self,
        id: i64,
        from: OfferStatus,
        to: OfferStatus,
        reason: &str,
    ) -> Result<Option<Offer>>;
}

#[async_trait]
pub trait CommissionStore: Send + Sync {
    async fn create_commission(&self, commission: &NewCommission) -> Result<Commission>;

    async fn commissions_for_subscription(&self, subscription_id: i64) -> Result<Vec<Commission>>;
}

/// Append-only audit log writer.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: &AuditEntry) -> Result<()>;
}

/// Write an audit entry, logging instead of failing.
pub async fn record_best_effort(sink: &dyn AuditSink, entry: AuditEntry) {
    if let Err(e) = sink.record(&entry).await {
        warn!(
            entity = %entry.entity,
            entity_id = entry.entity_id,
            operation = entry.operation.as_str(),
            error = %e,
            "Failed to write audit record"
        );
    }
}

/// The full set of collaborators the engine talks to.
#[derive(Clone)]
pub struct Stores {
    pub trades: Arc<dyn TradeStore>,
    pub copies: Arc<dyn CopiedTradeStore>,
    pub subscriptions: Arc<dyn SubscriptionStore>,
    pub strategies: Arc<dyn StrategyStore>,
    pub offers: Arc<dyn OfferStore>,
    pub commissions: Arc<dyn CommissionStore>,
    pub audit: Arc<dyn AuditSink>,
}

impl Stores {
    /// Back every collaborator with one store implementing all of them.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: TradeStore
            + CopiedTradeStore
            + SubscriptionStore
            + StrategyStore
            + OfferStore
            + CommissionStore
            + AuditSink
            + 'static,
    {
        Self {
            trades: store.clone(),
            copies: store.clone(),
            subscriptions: store.clone(),
            strategies: store.clone(),
            offers: store.clone(),
            commissions: store.clone(),
            audit: store,
        }
    }
}
