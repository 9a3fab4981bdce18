//! Master strategies.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CopyError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyStatus {
    Preparing,
    Active,
    Archived,
    Deleted,
}

impl StrategyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyStatus::Preparing => "preparing",
            StrategyStatus::Active => "active",
            StrategyStatus::Archived => "archived",
            StrategyStatus::Deleted => "deleted",
        }
    }

    pub fn can_transition_to(&self, target: StrategyStatus) -> bool {
        use StrategyStatus::*;

        matches!(
            (self, target),
            (Preparing, Active)
                | (Preparing, Deleted)
                | (Active, Archived)
                | (Active, Deleted)
                | (Archived, Active)
                | (Archived, Deleted)
        )
    }

    /// Archiving or deleting a strategy takes its subscribers with it.
    pub fn closes_subscriptions(&self) -> bool {
        matches!(self, StrategyStatus::Archived | StrategyStatus::Deleted)
    }
}

impl fmt::Display for StrategyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for StrategyStatus {
    type Err = CopyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "preparing" => Ok(Self::Preparing),
            "active" => Ok(Self::Active),
            "archived" => Ok(Self::Archived),
            "deleted" => Ok(Self::Deleted),
            other => Err(CopyError::validation(format!("unknown strategy status '{other}'"))),
        }
    }
}

/// A master trader's published trading approach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub id: i64,
    pub master_user_id: i64,
    pub master_account_id: i64,
    pub nickname: String,
    pub status: StrategyStatus,
    pub status_reason: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Strategy {
    pub fn is_active(&self) -> bool {
        self.status == StrategyStatus::Active
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStrategy {
    pub master_user_id: i64,
    pub master_account_id: i64,
    pub nickname: String,
}

impl NewStrategy {
    pub fn validate(mut self) -> Result<Self> {
        self.nickname = self.nickname.trim().to_string();
        if self.nickname.is_empty() {
            return Err(CopyError::validation("nickname must not be empty"));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_transitions() {
        use StrategyStatus::*;

        assert!(Preparing.can_transition_to(Active));
        assert!(Active.can_transition_to(Archived));
        assert!(Archived.can_transition_to(Active));
        assert!(!Deleted.can_transition_to(Active));
        assert!(!Preparing.can_transition_to(Archived));
        assert!(Archived.closes_subscriptions());
        assert!(!Active.closes_subscriptions());
    }
}
