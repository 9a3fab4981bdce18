//! Investor subscriptions, their copy settings and lifecycle states.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{CopyError, Result};

/// Subscription lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    /// Created, not yet receiving copies
    Preparing,
    /// Receiving copies
    Active,
    /// Temporarily paused by the investor or risk rules
    Suspended,
    /// Closed, usually because the strategy or offer went away
    Archived,
    /// Terminal
    Deleted,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Preparing => "preparing",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Suspended => "suspended",
            SubscriptionStatus::Archived => "archived",
            SubscriptionStatus::Deleted => "deleted",
        }
    }

    /// Check if this state can transition to another state
    pub fn can_transition_to(&self, target: SubscriptionStatus) -> bool {
        use SubscriptionStatus::*;

        match (self, target) {
            (Deleted, _) => false,
            (_, Deleted) => true,

            (Preparing, Active) => true,

            (Active, Suspended) => true,
            (Active, Archived) => true,

            (Suspended, Active) => true,
            (Suspended, Archived) => true,

            _ => false,
        }
    }

    /// Get valid next states from current state
    pub fn valid_transitions(&self) -> Vec<SubscriptionStatus> {
        use SubscriptionStatus::*;

        match self {
            Preparing => vec![Active, Deleted],
            Active => vec![Suspended, Archived, Deleted],
            Suspended => vec![Active, Archived, Deleted],
            Archived => vec![Deleted],
            Deleted => vec![],
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self == SubscriptionStatus::Deleted
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = CopyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "preparing" => Ok(Self::Preparing),
            "active" => Ok(Self::Active),
            "suspended" => Ok(Self::Suspended),
            "archived" => Ok(Self::Archived),
            "deleted" => Ok(Self::Deleted),
            other => Err(CopyError::validation(format!(
                "unknown subscription status '{other}'"
            ))),
        }
    }
}

/// Who performed a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Actor {
    System,
    User(i64),
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::System => f.pad("system"),
            Actor::User(id) => f.pad(&format!("user:{id}")),
        }
    }
}

impl FromStr for Actor {
    type Err = CopyError;

    fn from_str(s: &str) -> Result<Self> {
        if s == "system" {
            return Ok(Actor::System);
        }
        s.strip_prefix("user:")
            .and_then(|id| id.parse().ok())
            .map(Actor::User)
            .ok_or_else(|| CopyError::validation(format!("unknown actor '{s}'")))
    }
}

/// How trades are sized and shaped for this subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CopySettings {
    /// Multiplier applied to the master volume
    pub copy_ratio: Decimal,

    /// Upper bound on a single copied position, in lots
    pub max_position_size: Option<Decimal>,

    /// Copy buys as sells and vice versa
    pub invert_signals: bool,

    pub copy_stop_loss: bool,
    pub copy_take_profit: bool,
}

impl Default for CopySettings {
    fn default() -> Self {
        Self {
            copy_ratio: dec!(1.0),
            max_position_size: None,
            invert_signals: false,
            copy_stop_loss: false,
            copy_take_profit: false,
        }
    }
}

/// Loss limits for this subscription.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskRules {
    /// Drawdown of realised copy P&L, in percent (0-100)
    pub max_drawdown_pct: Option<Decimal>,

    /// Realised loss allowed per UTC day, in account currency
    pub max_daily_loss: Option<Decimal>,

    /// Refuse new copies once the drawdown limit is hit
    pub stop_on_drawdown: bool,
}

/// Symbol and lot filters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SymbolFilter {
    /// Whitelist; when non-empty only these symbols pass. `blocked_symbols`
    /// is checked afterwards and still applies to whitelisted symbols
    pub allowed_symbols: BTreeSet<String>,
    pub blocked_symbols: BTreeSet<String>,
    pub min_lot_size: Option<Decimal>,
    pub max_lot_size: Option<Decimal>,
}

impl SymbolFilter {
    pub fn allows(&self, symbol: &str) -> bool {
        self.allowed_symbols.is_empty() || self.allowed_symbols.contains(symbol)
    }

    pub fn blocks(&self, symbol: &str) -> bool {
        self.blocked_symbols.contains(symbol)
    }
}

/// Typed per-subscription configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionSettings {
    pub copy: CopySettings,
    pub risk: RiskRules,
    pub filter: SymbolFilter,
}

impl SubscriptionSettings {
    /// Check invariants and normalise symbols. Called on create and update only.
    pub fn validate(mut self) -> Result<Self> {
        if self.copy.copy_ratio <= Decimal::ZERO {
            return Err(CopyError::validation("copy ratio must be positive"));
        }
        positive("max position size", self.copy.max_position_size)?;
        positive("min lot size", self.filter.min_lot_size)?;
        positive("max lot size", self.filter.max_lot_size)?;
        positive("max daily loss", self.risk.max_daily_loss)?;

        if let (Some(min), Some(max)) = (self.filter.min_lot_size, self.filter.max_lot_size) {
            if min > max {
                return Err(CopyError::validation(format!(
                    "min lot size {min} exceeds max lot size {max}"
                )));
            }
        }
        if let Some(dd) = self.risk.max_drawdown_pct {
            if dd <= Decimal::ZERO || dd > dec!(100) {
                return Err(CopyError::validation("max drawdown must be within (0, 100]"));
            }
        }

        self.filter.allowed_symbols = normalise_symbols(self.filter.allowed_symbols)?;
        self.filter.blocked_symbols = normalise_symbols(self.filter.blocked_symbols)?;
        Ok(self)
    }
}

fn positive(field: &str, value: Option<Decimal>) -> Result<()> {
    match value {
        Some(v) if v <= Decimal::ZERO => {
            Err(CopyError::validation(format!("{field} must be positive")))
        }
        _ => Ok(()),
    }
}

fn normalise_symbols(symbols: BTreeSet<String>) -> Result<BTreeSet<String>> {
    symbols
        .into_iter()
        .map(|s| {
            let s = s.trim().to_uppercase();
            if s.is_empty() {
                Err(CopyError::validation("symbol lists must not contain blanks"))
            } else {
                Ok(s)
            }
        })
        .collect()
}

/// An investor account's binding to an offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub investor_user_id: i64,
    pub investor_account_id: i64,
    pub offer_id: i64,
    pub strategy_id: i64,
    pub status: SubscriptionStatus,
    pub status_reason: String,
    pub settings: SubscriptionSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }
}

/// Input for creating a subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSubscription {
    pub investor_user_id: i64,
    pub investor_account_id: i64,
    pub offer_id: i64,
    #[serde(default)]
    pub settings: SubscriptionSettings,
}

/// One applied status transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub id: i64,
    pub subscription_id: i64,
    pub old_status: SubscriptionStatus,
    pub new_status: SubscriptionStatus,
    pub reason: String,
    pub actor: Actor,
    pub created_at: DateTime<Utc>,
}
