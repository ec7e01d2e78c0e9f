//! Account-level ledger entries: periodic equity and margin-in-use snapshots.

use crate::domain::{AccountId, Decimal, TimeMs};
use serde::{Deserialize, Serialize};

/// One account-level observation per ingestion cycle.
///
/// Append-only. `total_margin_used` is the venue's aggregate collateral in
/// use across all open positions; the margin-delta between two consecutive
/// entries is the collateral proxy for a position opened in between.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub account: AccountId,
    pub observed_at: TimeMs,
    pub total_equity: Decimal,
    pub total_margin_used: Decimal,
}
