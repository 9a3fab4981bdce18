//! Engine configuration.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CopyError, Result};

/// Tuning knobs for the copy engine and lifecycle service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Subscriptions processed concurrently per copy run
    pub max_concurrency: usize,

    /// Page size when the caller asks for none
    pub default_page_limit: u32,

    /// Largest page size a caller may request
    pub max_page_limit: u32,

    /// Compare-and-set attempts before a status change reports a conflict
    pub status_retry_limit: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            default_page_limit: 20,
            max_page_limit: 100,
            status_retry_limit: 3,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `COPYTRADER_*` variables (a `.env` file is honoured).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = parse_var(&lookup, "COPYTRADER_MAX_CONCURRENCY")? {
            config.max_concurrency = v;
        }
        if let Some(v) = parse_var(&lookup, "COPYTRADER_PAGE_LIMIT")? {
            config.default_page_limit = v;
        }
        if let Some(v) = parse_var(&lookup, "COPYTRADER_MAX_PAGE_LIMIT")? {
            config.max_page_limit = v;
        }
        if let Some(v) = parse_var(&lookup, "COPYTRADER_STATUS_RETRIES")? {
            config.status_retry_limit = v;
        }

        config.validate()?;
        debug!(?config, "Engine configuration loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(CopyError::validation("max_concurrency must be at least 1"));
        }
        if self.default_page_limit == 0 || self.max_page_limit == 0 {
            return Err(CopyError::validation("page limits must be at least 1"));
        }
        if self.default_page_limit > self.max_page_limit {
            return Err(CopyError::validation(
                "default page limit exceeds max page limit",
            ));
        }
        if self.status_retry_limit == 0 {
            return Err(CopyError::validation("status_retry_limit must be at least 1"));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| CopyError::validation(format!("{key}: invalid value '{raw}'"))),
    }
}
