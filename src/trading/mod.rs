//! Copy engine, policy evaluation, commissions and subscription lifecycle.

mod commission;
mod config;
mod copy_engine;
mod directory;
mod lifecycle;
mod policy;

pub use commission::CommissionCalculator;
pub use config::EngineConfig;
pub use copy_engine::{
    CancelSignal, CloseReport, CopyEngine, CopyOutcome, CopyReport, SubscriptionOutcome,
};
pub use directory::SubscriptionDirectory;
pub use lifecycle::{StatusCascade, SubscriptionLifecycle};
pub use policy::{evaluate, CopyDecision, CopyDraft, RejectReason, RiskSnapshot};
