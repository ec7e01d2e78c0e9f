//! Strategy catalog and time-bounded assignments.
//!
//! Assignments are owned by an external management surface; the core only
//! reads them to attribute snapshots and trades.

use crate::domain::{AccountId, Symbol, TimeMs};
use serde::{Deserialize, Serialize};

/// A named trading strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Strategy {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

/// A time-bounded mapping of (account, symbol) to a strategy.
///
/// Multiple rows may exist per (account, symbol) across time; overlaps are a
/// data-entry error upstream and resolved deterministically by latest
/// `starts_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyAssignment {
    pub id: i64,
    pub account: AccountId,
    pub symbol: Symbol,
    pub strategy_id: i64,
    pub starts_at: TimeMs,
    pub ends_at: Option<TimeMs>,
    pub active: bool,
}

impl StrategyAssignment {
    /// Whether this assignment covers the given instant.
    pub fn covers(&self, at: TimeMs) -> bool {
        self.starts_at <= at && self.ends_at.map_or(true, |end| end >= at)
    }
}
