//! Aggregated round-trip trades derived from raw fills.

use crate::domain::{AccountId, Decimal, PositionSide, Symbol, TimeMs};
use serde::{Deserialize, Serialize};

/// A complete round-trip trade reconstructed from its opening and closing
/// fills. Derived data: fully rebuildable from the `fills` table plus the
/// leverage/strategy context already resolved at ingestion time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedTrade {
    pub account: AccountId,
    pub symbol: Symbol,
    pub side: PositionSide,
    pub total_size: Decimal,
    pub avg_entry_price: Decimal,
    pub avg_exit_price: Decimal,
    pub total_pnl: Decimal,
    pub total_fees: Decimal,
    pub leverage: Option<Decimal>,
    pub collateral_used: Option<Decimal>,
    pub strategy_id: Option<i64>,
    /// Number of raw fills merged into this trade, for auditability.
    pub fill_count: i64,
    /// Timestamp of the last fill in the group.
    pub representative_at: TimeMs,
}
