//! Domain models: strategies, offers, subscriptions, trades, commissions, audit.

mod audit;
mod commission;
mod offer;
mod page;
mod strategy;
mod subscription;
mod trade;

pub use audit::{AuditEntry, AuditOperation, EntityKind};
pub use commission::{Commission, CommissionType, NewCommission};
pub use offer::{FeeInterval, FeeSchedule, NewOffer, Offer, OfferStatus};
pub use page::{Page, Pagination};
pub use strategy::{NewStrategy, Strategy, StrategyStatus};
pub use subscription::{
    Actor, CopySettings, NewSubscription, RiskRules, StatusHistoryEntry, Subscription,
    SubscriptionSettings, SubscriptionStatus, SymbolFilter,
};
pub use trade::{
    CopiedTrade, CopiedTradeClose, NewCopiedTrade, NewTrade, Trade, TradeClose, TradeDirection,
    TradeStatus,
};
