//! Normalized per-cycle ingestion payload.
//!
//! Venue adapters produce one `AccountCycle` per poll: an account-level
//! ledger observation plus the open positions and new fills seen in that
//! cycle. `margin_rate` and `is_reducing` are venue-dependent and stay
//! `None` when the venue does not report them; downstream code degrades
//! through its fallback paths instead of erroring.

use crate::domain::{AccountId, Decimal, PositionSide, Symbol, TimeMs};
use serde::{Deserialize, Serialize};

/// Account-level totals observed in one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerObservation {
    pub total_equity: Decimal,
    pub total_margin_used: Decimal,
}

/// One open position as seen in a cycle. Ephemeral input, never persisted
/// directly; zero-size observations mean "no longer open".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionObservation {
    pub symbol: Symbol,
    pub side: PositionSide,
    pub size: Decimal,
    pub notional_usd: Decimal,
    pub entry_price: Decimal,
    /// Venue-supplied per-position initial margin rate, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub margin_rate: Option<Decimal>,
    /// Opaque venue payload kept for audit only; core logic never reads it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_payload: Option<serde_json::Value>,
}

/// One raw execution record as seen in a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillObservation {
    pub symbol: Symbol,
    pub side: PositionSide,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub realized_pnl: Decimal,
    pub fees: Decimal,
    /// true = closing leg, false = opening leg, None = venue did not say.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_reducing: Option<bool>,
    /// Venue trade id, preferred stable identity when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trade_id: Option<i64>,
    /// Execution time; defaults to the cycle's `observed_at` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_at: Option<TimeMs>,
}

/// The full normalized payload for one ingestion cycle of one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountCycle {
    pub account: AccountId,
    pub observed_at: TimeMs,
    pub ledger: LedgerObservation,
    #[serde(default)]
    pub positions: Vec<PositionObservation>,
    #[serde(default)]
    pub fills: Vec<FillObservation>,
}
