//! Trade copy engine.
//!
//! Fans a master trader's executed trade out to every investor account
//! subscribed to the trader's strategy, sizing and filtering it per
//! subscription, and records the copies, performance commissions, status
//! history and audit trail.

pub mod db;
pub mod error;
pub mod models;
pub mod repository;
pub mod trading;

#[cfg(test)]
mod testkit;

pub use error::{CopyError, Result};
