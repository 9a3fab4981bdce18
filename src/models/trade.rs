//! Master trades and the copies made from them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{CopyError, Result};

/// Direction of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeDirection {
    Buy,
    Sell,
}

impl TradeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeDirection::Buy => "buy",
            TradeDirection::Sell => "sell",
        }
    }

    /// The opposite direction, used when a subscription inverts signals.
    pub fn inverted(self) -> Self {
        match self {
            TradeDirection::Buy => TradeDirection::Sell,
            TradeDirection::Sell => TradeDirection::Buy,
        }
    }
}

impl fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for TradeDirection {
    type Err = CopyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "buy" => Ok(Self::Buy),
            "sell" => Ok(Self::Sell),
            other => Err(CopyError::validation(format!("unknown trade direction '{other}'"))),
        }
    }
}

/// Open/closed state shared by master trades and their copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Open,
    Closed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Open => "open",
            TradeStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for TradeStatus {
    type Err = CopyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            other => Err(CopyError::Corrupt(format!("unknown trade status '{other}'"))),
        }
    }
}

/// A trade executed by a master account under a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: i64,
    pub strategy_id: i64,
    pub master_account_id: i64,

    /// Instrument symbol, upper-cased on creation (e.g. "EURUSD")
    pub symbol: String,

    pub direction: TradeDirection,

    /// Size in lots, always positive
    pub volume: Decimal,

    pub open_price: Decimal,
    pub opened_at: DateTime<Utc>,

    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,

    // Populated once the trade is closed
    pub close_price: Option<Decimal>,
    pub closed_at: Option<DateTime<Utc>>,
    pub profit: Option<Decimal>,
    pub commission: Option<Decimal>,
    pub swap: Option<Decimal>,

    pub status: TradeStatus,
    pub created_at: DateTime<Utc>,
}

impl Trade {
    pub fn is_closed(&self) -> bool {
        self.status == TradeStatus::Closed
    }

    /// Share of this trade's profit attributable to a copy of `copy_volume` lots.
    pub fn scaled_profit(&self, copy_volume: Decimal) -> Option<Decimal> {
        let profit = self.profit?;
        if self.volume.is_zero() {
            return Some(Decimal::ZERO);
        }
        Some(
            (profit * copy_volume / self.volume)
                .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
        )
    }
}

/// Input for recording a new master trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTrade {
    pub strategy_id: i64,
    pub master_account_id: i64,
    pub symbol: String,
    pub direction: TradeDirection,
    pub volume: Decimal,
    pub open_price: Decimal,
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
    #[serde(default)]
    pub take_profit: Option<Decimal>,
    /// Defaults to the time of recording
    #[serde(default)]
    pub opened_at: Option<DateTime<Utc>>,
}

impl NewTrade {
    /// Check field constraints and normalise the symbol.
    pub fn validate(mut self) -> Result<Self> {
        self.symbol = self.symbol.trim().to_uppercase();
        if self.symbol.is_empty() {
            return Err(CopyError::validation("symbol must not be empty"));
        }
        if self.volume <= Decimal::ZERO {
            return Err(CopyError::validation("volume must be positive"));
        }
        if self.open_price <= Decimal::ZERO {
            return Err(CopyError::validation("open price must be positive"));
        }
        if matches!(self.stop_loss, Some(sl) if sl <= Decimal::ZERO) {
            return Err(CopyError::validation("stop loss must be positive"));
        }
        if matches!(self.take_profit, Some(tp) if tp <= Decimal::ZERO) {
            return Err(CopyError::validation("take profit must be positive"));
        }
        Ok(self)
    }
}

/// Close data reported for a master trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeClose {
    pub close_price: Decimal,
    pub profit: Decimal,
    #[serde(default)]
    pub commission: Decimal,
    #[serde(default)]
    pub swap: Decimal,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
}

/// A master trade replicated into an investor account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopiedTrade {
    pub id: i64,
    pub trade_id: i64,
    pub subscription_id: i64,
    pub investor_account_id: i64,
    pub symbol: String,
    pub direction: TradeDirection,
    pub volume: Decimal,

    /// Ratio actually applied (copy volume / master volume)
    pub copy_ratio: Decimal,

    pub open_price: Decimal,
    pub opened_at: DateTime<Utc>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub close_price: Option<Decimal>,
    pub closed_at: Option<DateTime<Utc>>,
    pub profit: Option<Decimal>,
    pub status: TradeStatus,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a copied trade.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCopiedTrade {
    pub trade_id: i64,
    pub subscription_id: i64,
    pub investor_account_id: i64,
    pub symbol: String,
    pub direction: TradeDirection,
    pub volume: Decimal,
    pub copy_ratio: Decimal,
    pub open_price: Decimal,
    pub opened_at: DateTime<Utc>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub close_price: Option<Decimal>,
    pub closed_at: Option<DateTime<Utc>>,
    pub profit: Option<Decimal>,
    pub status: TradeStatus,
}

/// Close data applied to a copied trade.
#[derive(Debug, Clone, PartialEq)]
pub struct CopiedTradeClose {
    pub close_price: Decimal,
    pub closed_at: DateTime<Utc>,
    pub profit: Decimal,
}
