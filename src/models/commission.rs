//! Fees charged to investors.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{CopyError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommissionType {
    Performance,
    Management,
    Registration,
}

impl CommissionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommissionType::Performance => "performance",
            CommissionType::Management => "management",
            CommissionType::Registration => "registration",
        }
    }
}

impl fmt::Display for CommissionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for CommissionType {
    type Err = CopyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "performance" => Ok(Self::Performance),
            "management" => Ok(Self::Management),
            "registration" => Ok(Self::Registration),
            other => Err(CopyError::Corrupt(format!("unknown commission type '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commission {
    pub id: i64,
    pub subscription_id: i64,
    pub kind: CommissionType,
    pub amount: Decimal,
    pub period_from: DateTime<Utc>,
    pub period_to: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCommission {
    pub subscription_id: i64,
    pub kind: CommissionType,
    pub amount: Decimal,
    pub period_from: DateTime<Utc>,
    pub period_to: DateTime<Utc>,
}
