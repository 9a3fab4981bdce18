//! Shared fixtures for async tests: a seeded in-memory database and store
//! doubles that fail on demand.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::db::Database;
use crate::error::{CopyError, Result};
use crate::models::{
    Actor, AuditEntry, Commission, CopiedTrade, CopiedTradeClose, FeeSchedule, NewCommission,
    NewCopiedTrade, NewOffer, NewStrategy, NewSubscription, NewTrade, Offer, Page, Pagination,
    StatusHistoryEntry, Strategy, StrategyStatus, Subscription, SubscriptionSettings,
    SubscriptionStatus, Trade, TradeClose, TradeDirection,
};
use crate::repository::{
    ArchiveScope, AuditSink, CommissionStore, CopiedTradeFilter, CopiedTradeStore, OfferStore,
    StatusChange, Stores, StrategyStore, SubscriptionStore, TradeStore,
};
use crate::trading::{CopyEngine, EngineConfig, SubscriptionDirectory, SubscriptionLifecycle};

/// In-memory database with an active strategy and an active offer charging
/// a 20% performance fee.
pub struct TestEnv {
    pub db: Arc<Database>,
    pub strategy: Strategy,
    pub offer: Offer,
    next_account: AtomicI64,
}

impl TestEnv {
    pub async fn new() -> Self {
        let db = Arc::new(Database::in_memory().await.unwrap());

        let strategy = db
            .create_strategy(&NewStrategy {
                master_user_id: 1,
                master_account_id: 100,
                nickname: "alpha".to_string(),
            })
            .await
            .unwrap();
        let strategy = db
            .set_strategy_status(strategy.id, StrategyStatus::Preparing, StrategyStatus::Active, "")
            .await
            .unwrap()
            .unwrap();

        let offer = db
            .create_offer(&NewOffer {
                strategy_id: strategy.id,
                name: "standard".to_string(),
                fees: FeeSchedule {
                    performance_fee_pct: dec!(20),
                    ..FeeSchedule::default()
                },
            })
            .await
            .unwrap();

        Self {
            db,
            strategy,
            offer,
            next_account: AtomicI64::new(1000),
        }
    }

    pub fn stores(&self) -> Stores {
        Stores::shared(self.db.clone())
    }

    pub fn engine(&self) -> CopyEngine {
        CopyEngine::new(self.stores(), EngineConfig::default())
    }

    pub fn engine_with(&self, stores: Stores) -> CopyEngine {
        CopyEngine::new(stores, EngineConfig::default())
    }

    pub fn lifecycle(&self) -> SubscriptionLifecycle {
        SubscriptionLifecycle::new(self.stores(), EngineConfig::default())
    }

    pub fn lifecycle_with(&self, stores: Stores) -> SubscriptionLifecycle {
        SubscriptionLifecycle::new(stores, EngineConfig::default())
    }

    pub fn directory(&self) -> SubscriptionDirectory {
        SubscriptionDirectory::new(self.db.clone(), self.db.clone())
    }

    /// Another active offer on the seeded strategy.
    pub async fn offer(&self, fees: FeeSchedule) -> Offer {
        self.db
            .create_offer(&NewOffer {
                strategy_id: self.strategy.id,
                name: "extra".to_string(),
                fees,
            })
            .await
            .unwrap()
    }

    /// A `preparing` subscription on the seeded offer.
    pub async fn subscription(&self, settings: SubscriptionSettings) -> Subscription {
        self.subscription_on(self.offer.id, settings).await
    }

    pub async fn subscription_on(&self, offer_id: i64, settings: SubscriptionSettings) -> Subscription {
        let account = self.next_account.fetch_add(1, Ordering::SeqCst);
        self.db
            .create_subscription(
                &NewSubscription {
                    investor_user_id: account,
                    investor_account_id: account,
                    offer_id,
                    settings: settings.validate().unwrap(),
                },
                self.strategy.id,
            )
            .await
            .unwrap()
    }

    pub async fn active_subscription(&self, settings: SubscriptionSettings) -> Subscription {
        self.active_subscription_on(self.offer.id, settings).await
    }

    pub async fn active_subscription_on(
        &self,
        offer_id: i64,
        settings: SubscriptionSettings,
    ) -> Subscription {
        let sub = self.subscription_on(offer_id, settings).await;
        self.set_status(sub.id, SubscriptionStatus::Active).await
    }

    /// Apply a transition directly through the store.
    pub async fn set_status(&self, id: i64, to: SubscriptionStatus) -> Subscription {
        let current = self.subscription_by_id(id).await;
        let (updated, _) = self
            .db
            .transition_status(&StatusChange {
                subscription_id: id,
                from: current.status,
                to,
                reason: "seed".to_string(),
                actor: Actor::System,
            })
            .await
            .unwrap()
            .unwrap();
        updated
    }

    pub async fn subscription_by_id(&self, id: i64) -> Subscription {
        self.db.get_subscription(id).await.unwrap().unwrap()
    }

    pub async fn history(&self, id: i64) -> Vec<StatusHistoryEntry> {
        self.db.status_history(id).await.unwrap()
    }

    /// An open buy on the seeded strategy.
    pub async fn trade(&self, symbol: &str, volume: Decimal) -> Trade {
        self.db
            .create_trade(&self.new_trade(symbol, volume))
            .await
            .unwrap()
    }

    pub fn new_trade(&self, symbol: &str, volume: Decimal) -> NewTrade {
        NewTrade {
            strategy_id: self.strategy.id,
            master_account_id: self.strategy.master_account_id,
            symbol: symbol.to_string(),
            direction: TradeDirection::Buy,
            volume,
            open_price: dec!(1.0850),
            stop_loss: Some(dec!(1.0800)),
            take_profit: Some(dec!(1.0950)),
            opened_at: None,
        }
    }
}

fn injected(what: &str) -> CopyError {
    CopyError::Corrupt(format!("injected {what} failure"))
}

/// Commission store that always fails.
pub struct FailingCommissions;

#[async_trait]
impl CommissionStore for FailingCommissions {
    async fn create_commission(&self, _commission: &NewCommission) -> Result<Commission> {
        Err(injected("commission"))
    }

    async fn commissions_for_subscription(&self, _subscription_id: i64) -> Result<Vec<Commission>> {
        Err(injected("commission"))
    }
}

/// Audit sink that always fails.
pub struct FailingAudit;

#[async_trait]
impl AuditSink for FailingAudit {
    async fn record(&self, _entry: &AuditEntry) -> Result<()> {
        Err(injected("audit"))
    }
}

/// Copied trade store whose inserts fail for one subscription.
pub struct FlakyCopies {
    pub inner: Arc<Database>,
    pub fail_for: i64,
}

#[async_trait]
impl CopiedTradeStore for FlakyCopies {
    async fn find_copied_trade(
        &self,
        trade_id: i64,
        subscription_id: i64,
    ) -> Result<Option<CopiedTrade>> {
        self.inner.find_copied_trade(trade_id, subscription_id).await
    }

    async fn insert_copied_trade(&self, copy: &NewCopiedTrade) -> Result<Option<CopiedTrade>> {
        if copy.subscription_id == self.fail_for {
            return Err(injected("insert"));
        }
        self.inner.insert_copied_trade(copy).await
    }

    async fn list_copied_trades(
        &self,
        filter: &CopiedTradeFilter,
        page: Pagination,
    ) -> Result<Page<CopiedTrade>> {
        self.inner.list_copied_trades(filter, page).await
    }

    async fn open_copies_of_trade(&self, trade_id: i64) -> Result<Vec<CopiedTrade>> {
        self.inner.open_copies_of_trade(trade_id).await
    }

    async fn close_copied_trade(
        &self,
        id: i64,
        close: &CopiedTradeClose,
    ) -> Result<Option<CopiedTrade>> {
        self.inner.close_copied_trade(id, close).await
    }

    async fn realized_profits(
        &self,
        subscription_id: i64,
        closed_since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Decimal>> {
        self.inner.realized_profits(subscription_id, closed_since).await
    }
}

/// Subscription store that loses every compare-and-set race.
pub struct RacingSubscriptions {
    pub inner: Arc<Database>,
}

#[async_trait]
impl SubscriptionStore for RacingSubscriptions {
    async fn get_subscription(&self, id: i64) -> Result<Option<Subscription>> {
        self.inner.get_subscription(id).await
    }

    async fn create_subscription(
        &self,
        subscription: &NewSubscription,
        strategy_id: i64,
    ) -> Result<Subscription> {
        self.inner.create_subscription(subscription, strategy_id).await
    }

    async fn update_settings(
        &self,
        id: i64,
        settings: &SubscriptionSettings,
    ) -> Result<Option<Subscription>> {
        self.inner.update_settings(id, settings).await
    }

    async fn list_active_by_strategy(&self, strategy_id: i64) -> Result<Vec<Subscription>> {
        self.inner.list_active_by_strategy(strategy_id).await
    }

    async fn transition_status(
        &self,
        _change: &StatusChange,
    ) -> Result<Option<(Subscription, StatusHistoryEntry)>> {
        Ok(None)
    }

    async fn archive_active(
        &self,
        scope: ArchiveScope,
        reason: &str,
        actor: Actor,
    ) -> Result<Vec<Subscription>> {
        self.inner.archive_active(scope, reason, actor).await
    }

    async fn status_history(&self, id: i64) -> Result<Vec<StatusHistoryEntry>> {
        self.inner.status_history(id).await
    }
}

/// Subscription store whose bulk archive always fails.
pub struct FailingArchive {
    pub inner: Arc<Database>,
}

#[async_trait]
impl SubscriptionStore for FailingArchive {
    async fn get_subscription(&self, id: i64) -> Result<Option<Subscription>> {
        self.inner.get_subscription(id).await
    }

    async fn create_subscription(
        &self,
        subscription: &NewSubscription,
        strategy_id: i64,
    ) -> Result<Subscription> {
        self.inner.create_subscription(subscription, strategy_id).await
    }

    async fn update_settings(
        &self,
        id: i64,
        settings: &SubscriptionSettings,
    ) -> Result<Option<Subscription>> {
        self.inner.update_settings(id, settings).await
    }

    async fn list_active_by_strategy(&self, strategy_id: i64) -> Result<Vec<Subscription>> {
        self.inner.list_active_by_strategy(strategy_id).await
    }

    async fn transition_status(
        &self,
        change: &StatusChange,
    ) -> Result<Option<(Subscription, StatusHistoryEntry)>> {
        self.inner.transition_status(change).await
    }

    async fn archive_active(
        &self,
        _scope: ArchiveScope,
        _reason: &str,
        _actor: Actor,
    ) -> Result<Vec<Subscription>> {
        Err(injected("archive"))
    }

    async fn status_history(&self, id: i64) -> Result<Vec<StatusHistoryEntry>> {
        self.inner.status_history(id).await
    }
}

/// Trade store that serves one stale snapshot of a trade before reading
/// through, as if the trade changed right after the first read.
pub struct StaleTrades {
    pub inner: Arc<Database>,
    pub stale: Mutex<Option<Trade>>,
}

impl StaleTrades {
    pub fn new(inner: Arc<Database>, snapshot: Trade) -> Self {
        Self {
            inner,
            stale: Mutex::new(Some(snapshot)),
        }
    }
}

#[async_trait]
impl TradeStore for StaleTrades {
    async fn get_trade(&self, id: i64) -> Result<Option<Trade>> {
        let stale = {
            let mut slot = self.stale.lock().unwrap();
            match slot.as_ref() {
                Some(trade) if trade.id == id => slot.take(),
                _ => None,
            }
        };
        match stale {
            Some(trade) => Ok(Some(trade)),
            None => self.inner.get_trade(id).await,
        }
    }

    async fn create_trade(&self, trade: &NewTrade) -> Result<Trade> {
        self.inner.create_trade(trade).await
    }

    async fn list_trades_by_strategy(
        &self,
        strategy_id: i64,
        page: Pagination,
    ) -> Result<Page<Trade>> {
        self.inner.list_trades_by_strategy(strategy_id, page).await
    }

    async fn close_trade(
        &self,
        id: i64,
        close: &TradeClose,
        closed_at: DateTime<Utc>,
    ) -> Result<Option<Trade>> {
        self.inner.close_trade(id, close, closed_at).await
    }
}
