//! Pure computation engines: leverage inference, lifecycle tracking,
//! and fill aggregation. No I/O; the ingest layer feeds them committed
//! state and persists their outputs atomically.

use crate::domain::{AccountId, Decimal, PositionSide, Symbol, TimeMs};
use serde::{Deserialize, Serialize};

pub mod aggregation;
pub mod leverage;
pub mod lifecycle;

pub use aggregation::{group_fills, TradeGroup};
pub use leverage::{CalculationMethod, LeverageCalculator, LeverageInference};
pub use lifecycle::{LifecycleTracker, TrackerOutputs};

/// One open-to-close span of a position on a symbol/side.
///
/// The leverage fields are written once when the lifecycle opens and are
/// copied verbatim onto every snapshot; they are never recomputed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifecycle {
    pub id: i64,
    pub account: AccountId,
    pub symbol: Symbol,
    pub side: PositionSide,
    pub opened_at: TimeMs,
    pub closed_at: Option<TimeMs>, // None while open
    pub leverage: Option<Decimal>,
    pub collateral_used: Option<Decimal>,
    pub calculation_method: CalculationMethod,
}

/// One persisted observation of an open position within a lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub symbol: Symbol,
    pub side: PositionSide,
    pub size: Decimal,
    pub notional_usd: Decimal,
    pub entry_price: Decimal,
    pub leverage: Option<Decimal>,
    pub collateral_used: Option<Decimal>,
    pub calculation_method: CalculationMethod,
    pub lifecycle_id: i64,
    pub observed_at: TimeMs,
    pub opened_at: TimeMs,
    /// Audit-only venue payload; never consulted by core logic.
    pub raw_payload: Option<serde_json::Value>,
}

/// Non-fatal data-quality findings surfaced on the cycle report.
///
/// These are the error-reporting channel of the core: every failure mode
/// degrades to `calculation_method = unknown` or `strategy_id = None`
/// instead of aborting the cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anomaly {
    /// No ledger entry precedes the lifecycle open.
    MissingBaseline { symbol: Symbol },
    /// Margin decreased or stayed flat while a position opened.
    NonPositiveDelta { symbol: Symbol, delta: Decimal },
    /// Multiple lifecycles opened between two ledger observations; the
    /// full margin delta was attributed to each independently.
    AmbiguousAttribution {
        symbol: Symbol,
        opens_in_cycle: usize,
    },
    /// Baseline ledger entry older than one ingestion interval.
    StaleLedger {
        baseline_at: TimeMs,
        age_ms: i64,
    },
    /// Exact duplicate of an already-ingested observation; absorbed.
    DuplicateObservation { observed_at: TimeMs },
}
