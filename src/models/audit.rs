//! Append-only audit trail entries.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CopyError, Result};

use super::Actor;

/// Audited entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Strategy,
    Offer,
    Subscription,
    Trade,
    CopiedTrade,
    Commission,
}

impl EntityKind {
    /// Table-style name written to the audit log.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Strategy => "strategies",
            EntityKind::Offer => "offers",
            EntityKind::Subscription => "subscriptions",
            EntityKind::Trade => "trades",
            EntityKind::CopiedTrade => "copied_trades",
            EntityKind::Commission => "commissions",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = CopyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "strategies" => Ok(Self::Strategy),
            "offers" => Ok(Self::Offer),
            "subscriptions" => Ok(Self::Subscription),
            "trades" => Ok(Self::Trade),
            "copied_trades" => Ok(Self::CopiedTrade),
            "commissions" => Ok(Self::Commission),
            other => Err(CopyError::Corrupt(format!("unknown audit entity '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOperation {
    Insert,
    Update,
    Delete,
    StatusChange,
}

impl AuditOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOperation::Insert => "insert",
            AuditOperation::Update => "update",
            AuditOperation::Delete => "delete",
            AuditOperation::StatusChange => "status_change",
        }
    }
}

impl FromStr for AuditOperation {
    type Err = CopyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "insert" => Ok(Self::Insert),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            "status_change" => Ok(Self::StatusChange),
            other => Err(CopyError::Corrupt(format!("unknown audit operation '{other}'"))),
        }
    }
}

/// A single audit record, before it is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entity: EntityKind,
    pub entity_id: i64,
    pub operation: AuditOperation,
    pub actor: Actor,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(entity: EntityKind, entity_id: i64, operation: AuditOperation, actor: Actor) -> Self {
        Self {
            entity,
            entity_id,
            operation,
            actor,
            before: None,
            after: None,
            recorded_at: Utc::now(),
        }
    }

    /// Snapshot `value` as the "before" image. Unserialisable values are dropped.
    pub fn before<T: Serialize>(mut self, value: &T) -> Self {
        self.before = serde_json::to_value(value).ok();
        self
    }

    pub fn after<T: Serialize>(mut self, value: &T) -> Self {
        self.after = serde_json::to_value(value).ok();
        self
    }
}
