//! Copy engine: replicates master trades into subscribed investor accounts.
//!
//! A copy run resolves the target subscriptions, then works through them in a
//! bounded pool. Every subscription is handled on its own: a rejection or a
//! failed write for one never stops the others. Commission and audit writes
//! that follow a copy are side effects and cannot undo it.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use crate::error::{CopyError, Result};
use crate::models::{
    Actor, AuditEntry, AuditOperation, Commission, CopiedTrade, CopiedTradeClose, EntityKind,
    FeeInterval, NewCopiedTrade, NewTrade, Offer, Page, Pagination, Subscription, Trade,
    TradeClose, TradeStatus,
};
use crate::repository::{record_best_effort, CopiedTradeFilter, Stores};

use super::commission::CommissionCalculator;
use super::config::EngineConfig;
use super::directory::SubscriptionDirectory;
use super::policy::{self, CopyDecision, CopyDraft, RejectReason, RiskSnapshot};

/// Cooperative cancellation for a copy run.
///
/// Checked before each subscription starts. Work already started is finished.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    shutdown: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn none() -> Self {
        Self::default()
    }

    /// Fires once the watched flag turns `true`.
    pub fn from_watch(shutdown: watch::Receiver<bool>) -> Self {
        Self {
            shutdown: Some(shutdown),
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn is_cancelled(&self) -> bool {
        let flagged = self
            .shutdown
            .as_ref()
            .map(|rx| *rx.borrow())
            .unwrap_or(false);
        let expired = self
            .deadline
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false);
        flagged || expired
    }
}

/// What happened to one subscription during a copy run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CopyOutcome {
    Copied { copied_trade_id: i64 },
    AlreadyCopied { copied_trade_id: i64 },
    Rejected { reason: RejectReason },
    /// Requested explicitly but not an active subscription of the trade's strategy
    Ineligible,
    Failed { error: String },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionOutcome {
    pub subscription_id: i64,
    #[serde(flatten)]
    pub outcome: CopyOutcome,
}

/// Result of one copy run.
#[derive(Debug, Clone, Serialize)]
pub struct CopyReport {
    pub run_id: Uuid,
    pub trade_id: i64,
    /// Copies created by this run
    pub created: Vec<CopiedTrade>,
    /// One entry per target subscription, ordered by subscription id
    pub outcomes: Vec<SubscriptionOutcome>,
}

impl CopyReport {
    pub fn count(&self, pred: impl Fn(&CopyOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.outcome)).count()
    }

    pub fn outcome_for(&self, subscription_id: i64) -> Option<&CopyOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.subscription_id == subscription_id)
            .map(|o| &o.outcome)
    }
}

/// Result of closing a master trade.
#[derive(Debug, Clone, Serialize)]
pub struct CloseReport {
    pub trade: Trade,
    pub closed_copies: Vec<CopiedTrade>,
    pub commissions: Vec<Commission>,
}

/// Copy-trading engine.
#[derive(Clone)]
pub struct CopyEngine {
    config: EngineConfig,
    stores: Stores,
    directory: SubscriptionDirectory,
}

impl CopyEngine {
    pub fn new(stores: Stores, config: EngineConfig) -> Self {
        let directory = SubscriptionDirectory::new(stores.subscriptions.clone(), stores.audit.clone());
        Self {
            config,
            stores,
            directory,
        }
    }

    pub fn directory(&self) -> &SubscriptionDirectory {
        &self.directory
    }

    /// Record a master trade under an active strategy.
    pub async fn create_trade(&self, trade: NewTrade) -> Result<Trade> {
        let trade = trade.validate()?;

        let strategy = self
            .stores
            .strategies
            .get_strategy(trade.strategy_id)
            .await?
            .ok_or_else(|| CopyError::not_found("strategy", trade.strategy_id))?;
        if !strategy.is_active() {
            return Err(CopyError::StrategyNotActive(strategy.id));
        }

        let created = self.stores.trades.create_trade(&trade).await?;

        info!(
            trade_id = created.id,
            strategy_id = created.strategy_id,
            symbol = %created.symbol,
            direction = %created.direction,
            volume = %created.volume,
            "Master trade recorded"
        );

        let entry = AuditEntry::new(EntityKind::Trade, created.id, AuditOperation::Insert, Actor::System)
            .after(&created);
        record_best_effort(self.stores.audit.as_ref(), entry).await;

        Ok(created)
    }

    /// Copy `trade_id` into its subscriptions.
    ///
    /// With `explicit_ids` only those subscriptions are considered; any that
    /// are not active subscriptions of the trade's strategy are reported as
    /// [`CopyOutcome::Ineligible`]. Already copied pairs are left alone.
    pub async fn copy_trade(
        &self,
        trade_id: i64,
        explicit_ids: Option<Vec<i64>>,
        cancel: &CancelSignal,
    ) -> Result<CopyReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("copy_run", %run_id, trade_id);

        self.run_copy(run_id, trade_id, explicit_ids, cancel)
            .instrument(span)
            .await
    }

    async fn run_copy(
        &self,
        run_id: Uuid,
        trade_id: i64,
        explicit_ids: Option<Vec<i64>>,
        cancel: &CancelSignal,
    ) -> Result<CopyReport> {
        let trade = self
            .stores
            .trades
            .get_trade(trade_id)
            .await?
            .ok_or_else(|| CopyError::not_found("trade", trade_id))?;
        let trade = Arc::new(trade);

        let mut outcomes = Vec::new();
        let targets = match explicit_ids.filter(|ids| !ids.is_empty()) {
            Some(ids) => {
                let requested: BTreeSet<i64> = ids.into_iter().collect();
                let eligible: Vec<Subscription> = self
                    .directory
                    .by_ids(&requested.iter().copied().collect::<Vec<_>>())
                    .await?
                    .into_iter()
                    .filter(|s| s.strategy_id == trade.strategy_id)
                    .collect();

                let eligible_ids: BTreeSet<i64> = eligible.iter().map(|s| s.id).collect();
                for id in requested.difference(&eligible_ids) {
                    debug!(subscription_id = id, "Requested subscription is not eligible");
                    outcomes.push(SubscriptionOutcome {
                        subscription_id: *id,
                        outcome: CopyOutcome::Ineligible,
                    });
                }
                eligible
            }
            None => self.directory.active_for_strategy(trade.strategy_id).await?,
        };

        if targets.is_empty() {
            info!(ineligible = outcomes.len(), "No subscriptions to copy into");
        }

        let results: Vec<(SubscriptionOutcome, Option<CopiedTrade>)> = stream::iter(targets)
            .map(|sub| {
                let trade = Arc::clone(&trade);
                async move {
                    if cancel.is_cancelled() {
                        return (
                            SubscriptionOutcome {
                                subscription_id: sub.id,
                                outcome: CopyOutcome::Cancelled,
                            },
                            None,
                        );
                    }
                    self.copy_one(&trade, sub).await
                }
            })
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect()
            .await;

        let mut created = Vec::new();
        for (outcome, copy) in results {
            outcomes.push(outcome);
            created.extend(copy);
        }
        outcomes.sort_by_key(|o| o.subscription_id);
        created.sort_by_key(|c| c.subscription_id);

        let report = CopyReport {
            run_id,
            trade_id,
            created,
            outcomes,
        };

        info!(
            copied = report.created.len(),
            already_copied = report.count(|o| matches!(o, CopyOutcome::AlreadyCopied { .. })),
            rejected = report.count(|o| matches!(o, CopyOutcome::Rejected { .. })),
            failed = report.count(|o| matches!(o, CopyOutcome::Failed { .. })),
            cancelled = report.count(|o| matches!(o, CopyOutcome::Cancelled)),
            "Copy run finished"
        );

        Ok(report)
    }

    async fn copy_one(
        &self,
        trade: &Trade,
        sub: Subscription,
    ) -> (SubscriptionOutcome, Option<CopiedTrade>) {
        let subscription_id = sub.id;

        let (outcome, copy) = match self.try_copy(trade, &sub).await {
            Ok(result) => result,
            Err(e) => {
                error!(subscription_id, error = %e, "Failed to copy trade");
                (CopyOutcome::Failed { error: e.to_string() }, None)
            }
        };

        (
            SubscriptionOutcome {
                subscription_id,
                outcome,
            },
            copy,
        )
    }

    async fn try_copy(
        &self,
        trade: &Trade,
        sub: &Subscription,
    ) -> Result<(CopyOutcome, Option<CopiedTrade>)> {
        if let Some(existing) = self.stores.copies.find_copied_trade(trade.id, sub.id).await? {
            debug!(subscription_id = sub.id, copied_trade_id = existing.id, "Already copied");
            return Ok((
                CopyOutcome::AlreadyCopied {
                    copied_trade_id: existing.id,
                },
                None,
            ));
        }

        let risk = self.risk_snapshot(sub).await?;
        let draft = match policy::evaluate(trade, &sub.settings, &risk) {
            CopyDecision::Accept(draft) => draft,
            CopyDecision::Reject(reason) => {
                info!(
                    subscription_id = sub.id,
                    symbol = %trade.symbol,
                    reason = %reason,
                    "Copy rejected"
                );
                return Ok((CopyOutcome::Rejected { reason }, None));
            }
        };

        let new_copy = build_copy(trade, sub, draft);
        let Some(copy) = self.stores.copies.insert_copied_trade(&new_copy).await? else {
            // Lost a race with a concurrent run for the same pair
            let existing = self
                .stores
                .copies
                .find_copied_trade(trade.id, sub.id)
                .await?
                .ok_or_else(|| CopyError::Corrupt(format!("copy of trade {} vanished", trade.id)))?;
            return Ok((
                CopyOutcome::AlreadyCopied {
                    copied_trade_id: existing.id,
                },
                None,
            ));
        };

        info!(
            subscription_id = sub.id,
            copied_trade_id = copy.id,
            investor_account_id = copy.investor_account_id,
            direction = %copy.direction,
            volume = %copy.volume,
            "Trade copied"
        );

        let entry = AuditEntry::new(EntityKind::CopiedTrade, copy.id, AuditOperation::Insert, Actor::System)
            .after(&copy);
        record_best_effort(self.stores.audit.as_ref(), entry).await;

        let mut offers = HashMap::new();
        let copy = if copy.status == TradeStatus::Open {
            self.settle_late_copy(trade.id, copy, &mut offers).await
        } else {
            self.charge_performance_fee(&copy, &mut offers).await;
            copy
        };

        Ok((
            CopyOutcome::Copied {
                copied_trade_id: copy.id,
            },
            Some(copy),
        ))
    }

    /// Close a copy whose master closed after this run read it. Such a copy
    /// was inserted too late for the close fan-out to see it.
    async fn settle_late_copy(
        &self,
        trade_id: i64,
        copy: CopiedTrade,
        offers: &mut HashMap<i64, Option<Offer>>,
    ) -> CopiedTrade {
        match self.try_settle_late_copy(trade_id, &copy, offers).await {
            Ok(Some(settled)) => settled,
            Ok(None) => copy,
            Err(e) => {
                error!(copied_trade_id = copy.id, error = %e, "Failed to settle copy of a closed trade");
                copy
            }
        }
    }

    async fn try_settle_late_copy(
        &self,
        trade_id: i64,
        copy: &CopiedTrade,
        offers: &mut HashMap<i64, Option<Offer>>,
    ) -> Result<Option<CopiedTrade>> {
        let master = self
            .stores
            .trades
            .get_trade(trade_id)
            .await?
            .ok_or_else(|| CopyError::not_found("trade", trade_id))?;
        if !master.is_closed() {
            return Ok(None);
        }

        match self.close_copy(&master, copy, offers).await? {
            Some((closed, _)) => {
                info!(
                    subscription_id = closed.subscription_id,
                    copied_trade_id = closed.id,
                    profit = ?closed.profit,
                    "Closed copy of a trade that closed during the run"
                );
                Ok(Some(closed))
            }
            // The close fan-out got to it first
            None => self.stores.copies.find_copied_trade(trade_id, copy.subscription_id).await,
        }
    }

    /// Realised P&L state, queried only when the subscription has risk rules.
    async fn risk_snapshot(&self, sub: &Subscription) -> Result<RiskSnapshot> {
        let rules = &sub.settings.risk;
        if rules.max_daily_loss.is_none() && rules.max_drawdown_pct.is_none() {
            return Ok(RiskSnapshot::default());
        }

        let (day_start, _) = FeeInterval::Daily.period_containing(Utc::now());
        let history = self.stores.copies.realized_profits(sub.id, None).await?;
        let today = self
            .stores
            .copies
            .realized_profits(sub.id, Some(day_start))
            .await?;

        Ok(RiskSnapshot::from_profits(&history, &today))
    }

    /// Close an open master trade and every open copy of it.
    pub async fn close_trade(&self, trade_id: i64, close: TradeClose) -> Result<CloseReport> {
        let trade = self
            .stores
            .trades
            .get_trade(trade_id)
            .await?
            .ok_or_else(|| CopyError::not_found("trade", trade_id))?;
        if trade.is_closed() {
            return Err(CopyError::validation("trade already closed"));
        }
        if close.close_price <= Decimal::ZERO {
            return Err(CopyError::validation("close price must be positive"));
        }

        let closed_at = close.closed_at.unwrap_or_else(Utc::now);
        if closed_at < trade.opened_at {
            return Err(CopyError::validation("trade cannot close before it opened"));
        }

        let closed = self
            .stores
            .trades
            .close_trade(trade_id, &close, closed_at)
            .await?
            .ok_or_else(|| CopyError::validation("trade already closed"))?;

        info!(
            trade_id,
            profit = ?closed.profit,
            close_price = ?closed.close_price,
            "Master trade closed"
        );

        let entry = AuditEntry::new(EntityKind::Trade, trade_id, AuditOperation::Update, Actor::System)
            .before(&trade)
            .after(&closed);
        record_best_effort(self.stores.audit.as_ref(), entry).await;

        let mut closed_copies = Vec::new();
        let mut commissions = Vec::new();
        let mut offers = HashMap::new();

        for copy in self.stores.copies.open_copies_of_trade(trade_id).await? {
            match self.close_copy(&closed, &copy, &mut offers).await {
                Ok(Some((updated, commission))) => {
                    commissions.extend(commission);
                    closed_copies.push(updated);
                }
                Ok(None) => {}
                Err(e) => error!(copied_trade_id = copy.id, error = %e, "Failed to close copy"),
            }
        }

        info!(
            trade_id,
            copies = closed_copies.len(),
            commissions = commissions.len(),
            "Copies closed"
        );

        Ok(CloseReport {
            trade: closed,
            closed_copies,
            commissions,
        })
    }

    /// Close one open copy at its closed master's price and charge the fee.
    /// `None` when the copy was already closed.
    async fn close_copy(
        &self,
        master: &Trade,
        copy: &CopiedTrade,
        offers: &mut HashMap<i64, Option<Offer>>,
    ) -> Result<Option<(CopiedTrade, Option<Commission>)>> {
        let (Some(close_price), Some(closed_at)) = (master.close_price, master.closed_at) else {
            return Err(CopyError::Corrupt(format!(
                "closed trade {} has no close price",
                master.id
            )));
        };
        let copy_close = CopiedTradeClose {
            close_price,
            closed_at,
            profit: copy_profit(master, copy.direction == master.direction, copy.volume),
        };

        let Some(updated) = self.stores.copies.close_copied_trade(copy.id, &copy_close).await? else {
            debug!(copied_trade_id = copy.id, "Copy already closed");
            return Ok(None);
        };

        let entry = AuditEntry::new(EntityKind::CopiedTrade, updated.id, AuditOperation::Update, Actor::System)
            .before(copy)
            .after(&updated);
        record_best_effort(self.stores.audit.as_ref(), entry).await;

        let commission = self.charge_performance_fee(&updated, offers).await;
        Ok(Some((updated, commission)))
    }

    /// Record the performance fee for a closed copy. Failures are logged only.
    async fn charge_performance_fee(
        &self,
        copy: &CopiedTrade,
        offers: &mut HashMap<i64, Option<Offer>>,
    ) -> Option<Commission> {
        match self.try_charge_performance_fee(copy, offers).await {
            Ok(commission) => commission,
            Err(e) => {
                error!(
                    copied_trade_id = copy.id,
                    subscription_id = copy.subscription_id,
                    error = %e,
                    "Failed to record commission"
                );
                None
            }
        }
    }

    async fn try_charge_performance_fee(
        &self,
        copy: &CopiedTrade,
        offers: &mut HashMap<i64, Option<Offer>>,
    ) -> Result<Option<Commission>> {
        let sub = self
            .stores
            .subscriptions
            .get_subscription(copy.subscription_id)
            .await?
            .ok_or_else(|| CopyError::not_found("subscription", copy.subscription_id))?;

        let offer = match offers.get(&sub.offer_id) {
            Some(cached) => cached.clone(),
            None => {
                let offer = self.stores.offers.get_offer(sub.offer_id).await?;
                offers.insert(sub.offer_id, offer.clone());
                offer
            }
        };
        let offer = offer.ok_or_else(|| CopyError::not_found("offer", sub.offer_id))?;

        let Some(fee) = CommissionCalculator::performance_fee(copy, &offer) else {
            return Ok(None);
        };

        let commission = self.stores.commissions.create_commission(&fee).await?;
        info!(
            subscription_id = commission.subscription_id,
            commission_id = commission.id,
            amount = %commission.amount,
            "Performance fee recorded"
        );

        let entry = AuditEntry::new(EntityKind::Commission, commission.id, AuditOperation::Insert, Actor::System)
            .after(&commission);
        record_best_effort(self.stores.audit.as_ref(), entry).await;

        Ok(Some(commission))
    }

    /// Copied trades, newest first.
    pub async fn list_copied_trades(
        &self,
        filter: CopiedTradeFilter,
        page: Pagination,
    ) -> Result<Page<CopiedTrade>> {
        let page = page.normalised(self.config.default_page_limit, self.config.max_page_limit);
        self.stores.copies.list_copied_trades(&filter, page).await
    }

    /// Master trades of a strategy, newest first.
    pub async fn list_trades(&self, strategy_id: i64, page: Pagination) -> Result<Page<Trade>> {
        let page = page.normalised(self.config.default_page_limit, self.config.max_page_limit);
        self.stores.trades.list_trades_by_strategy(strategy_id, page).await
    }
}

/// Copy row for an accepted draft. A copy of an already closed trade is
/// recorded closed.
fn build_copy(trade: &Trade, sub: &Subscription, draft: CopyDraft) -> NewCopiedTrade {
    let same_side = draft.direction == trade.direction;
    let profit = trade
        .profit
        .map(|_| copy_profit(trade, same_side, draft.volume));

    NewCopiedTrade {
        trade_id: trade.id,
        subscription_id: sub.id,
        investor_account_id: sub.investor_account_id,
        symbol: trade.symbol.clone(),
        direction: draft.direction,
        volume: draft.volume,
        copy_ratio: draft.copy_ratio,
        open_price: trade.open_price,
        opened_at: trade.opened_at,
        stop_loss: draft.stop_loss,
        take_profit: draft.take_profit,
        close_price: trade.close_price,
        closed_at: trade.closed_at,
        profit,
        status: trade.status,
    }
}

/// Master profit scaled to the copy's volume; negated for inverted copies.
fn copy_profit(trade: &Trade, same_side: bool, volume: Decimal) -> Decimal {
    let scaled = trade.scaled_profit(volume).unwrap_or(Decimal::ZERO);
    if same_side {
        scaled
    } else {
        -scaled
    }
}
