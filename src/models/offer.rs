//! Offers: fee-configured products built on top of a strategy.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{CopyError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfferStatus {
    Active,
    Archived,
    Deleted,
}

impl OfferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OfferStatus::Active => "active",
            OfferStatus::Archived => "archived",
            OfferStatus::Deleted => "deleted",
        }
    }

    pub fn can_transition_to(&self, target: OfferStatus) -> bool {
        use OfferStatus::*;

        matches!(
            (self, target),
            (Active, Archived) | (Active, Deleted) | (Archived, Active) | (Archived, Deleted)
        )
    }

    pub fn closes_subscriptions(&self) -> bool {
        matches!(self, OfferStatus::Archived | OfferStatus::Deleted)
    }
}

impl fmt::Display for OfferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for OfferStatus {
    type Err = CopyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "archived" => Ok(Self::Archived),
            "deleted" => Ok(Self::Deleted),
            other => Err(CopyError::validation(format!("unknown offer status '{other}'"))),
        }
    }
}

/// How often a periodic fee accrues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeInterval {
    Daily,
    Weekly,
    Monthly,
}

impl FeeInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeeInterval::Daily => "daily",
            FeeInterval::Weekly => "weekly",
            FeeInterval::Monthly => "monthly",
        }
    }

    /// Accrual window `[from, to)` that contains `at`.
    ///
    /// Days are UTC days, weeks start on Monday, months are calendar months.
    pub fn period_containing(&self, at: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let date = at.date_naive();
        let (start, end) = match self {
            FeeInterval::Daily => (date, date + Duration::days(1)),
            FeeInterval::Weekly => {
                let start = date - Duration::days(date.weekday().num_days_from_monday() as i64);
                (start, start + Duration::days(7))
            }
            FeeInterval::Monthly => {
                let start = date.with_day(1).unwrap_or(date);
                let end = if start.month() == 12 {
                    NaiveDate::from_ymd_opt(start.year() + 1, 1, 1)
                } else {
                    NaiveDate::from_ymd_opt(start.year(), start.month() + 1, 1)
                }
                .unwrap_or(start + Duration::days(31));
                (start, end)
            }
        };
        (midnight(start), midnight(end))
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

impl fmt::Display for FeeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for FeeInterval {
    type Err = CopyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => Err(CopyError::validation(format!("unknown fee interval '{other}'"))),
        }
    }
}

/// Fee configuration of an offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// Share of realised profit, in percent (0-100)
    pub performance_fee_pct: Decimal,
    pub performance_fee_interval: FeeInterval,

    /// Periodic fee, in percent (0-100)
    pub management_fee_pct: Decimal,
    pub management_fee_interval: FeeInterval,

    /// One-off fee charged at subscription
    pub registration_fee: Decimal,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            performance_fee_pct: Decimal::ZERO,
            performance_fee_interval: FeeInterval::Monthly,
            management_fee_pct: Decimal::ZERO,
            management_fee_interval: FeeInterval::Monthly,
            registration_fee: Decimal::ZERO,
        }
    }
}

impl FeeSchedule {
    pub fn validate(&self) -> Result<()> {
        let pct = Decimal::ZERO..=dec!(100);
        if !pct.contains(&self.performance_fee_pct) {
            return Err(CopyError::validation("performance fee must be within [0, 100]"));
        }
        if !pct.contains(&self.management_fee_pct) {
            return Err(CopyError::validation("management fee must be within [0, 100]"));
        }
        if self.registration_fee < Decimal::ZERO {
            return Err(CopyError::validation("registration fee must not be negative"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub id: i64,
    pub strategy_id: i64,
    pub name: String,
    pub fees: FeeSchedule,
    pub status: OfferStatus,
    pub status_reason: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Offer {
    /// Fee configuration, read by the periodic management/registration fee job.
    pub fn fee_schedule(&self) -> &FeeSchedule {
        &self.fees
    }

    pub fn is_active(&self) -> bool {
        self.status == OfferStatus::Active
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOffer {
    pub strategy_id: i64,
    pub name: String,
    #[serde(default)]
    pub fees: FeeSchedule,
}

impl NewOffer {
    pub fn validate(mut self) -> Result<Self> {
        self.name = self.name.trim().to_string();
        if self.name.is_empty() {
            return Err(CopyError::validation("offer name must not be empty"));
        }
        self.fees.validate()?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 30, 0).unwrap()
    }

    #[test]
    fn test_daily_period() {
        let (from, to) = FeeInterval::Daily.period_containing(at(2024, 3, 5, 13));
        assert_eq!(from, at(2024, 3, 5, 0) - Duration::minutes(30));
        assert_eq!(to - from, Duration::days(1));
    }

    #[test]
    fn test_weekly_period_starts_monday() {
        // 2024-03-07 is a Thursday
        let (from, to) = FeeInterval::Weekly.period_containing(at(2024, 3, 7, 9));
        assert_eq!(from.date_naive(), NaiveDate::from_ymd_opt(2024, 3, 4).unwrap());
        assert_eq!(to.date_naive(), NaiveDate::from_ymd_opt(2024, 3, 11).unwrap());
    }

    #[test]
    fn test_monthly_period_rolls_over_year() {
        let (from, to) = FeeInterval::Monthly.period_containing(at(2024, 12, 31, 23));
        assert_eq!(from.date_naive(), NaiveDate::from_ymd_opt(2024, 12, 1).unwrap());
        assert_eq!(to.date_naive(), NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
    }

    #[test]
    fn test_fee_validation() {
        let mut fees = FeeSchedule::default();
        assert!(fees.validate().is_ok());

        fees.performance_fee_pct = dec!(120);
        assert!(fees.validate().is_err());

        let fees = FeeSchedule {
            registration_fee: dec!(-1),
            ..Default::default()
        };
        assert!(fees.validate().is_err());
    }

    #[test]
    fn test_offer_transitions() {
        assert!(OfferStatus::Active.can_transition_to(OfferStatus::Archived));
        assert!(!OfferStatus::Deleted.can_transition_to(OfferStatus::Active));
        assert!(OfferStatus::Deleted.closes_subscriptions());
    }
}
