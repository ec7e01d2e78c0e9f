//! Fill type representing a single persisted execution record.

use crate::domain::{AccountId, Decimal, PositionSide, Symbol, TimeMs};
use serde::{Deserialize, Serialize};

/// A single execution record, append-only and keyed by `fill_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    /// Stable unique identifier for this fill.
    pub fill_key: String,
    /// Account the fill belongs to.
    pub account: AccountId,
    /// Traded symbol.
    pub symbol: Symbol,
    /// Side of the position this fill affects.
    pub side: PositionSide,
    /// Size/quantity executed.
    pub size: Decimal,
    /// Entry price of the position leg.
    pub entry_price: Decimal,
    /// Exit price (venue-reported; zero for pure opening fills).
    pub exit_price: Decimal,
    /// Realized PnL booked by this fill.
    pub realized_pnl: Decimal,
    /// Fees paid.
    pub fees: Decimal,
    /// true = closing, false = opening, None = venue did not say.
    pub is_reducing: Option<bool>,
    /// Execution time.
    pub observed_at: TimeMs,
}

impl Fill {
    /// Create a new Fill, computing its stable key.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        account: AccountId,
        symbol: Symbol,
        side: PositionSide,
        size: Decimal,
        entry_price: Decimal,
        exit_price: Decimal,
        realized_pnl: Decimal,
        fees: Decimal,
        is_reducing: Option<bool>,
        trade_id: Option<i64>,
        observed_at: TimeMs,
    ) -> Self {
        let fill_key = Self::compute_fill_key(
            &account,
            &symbol,
            observed_at,
            side,
            &size,
            &entry_price,
            &exit_price,
            &realized_pnl,
            &fees,
            trade_id,
        );
        Fill {
            fill_key,
            account,
            symbol,
            side,
            size,
            entry_price,
            exit_price,
            realized_pnl,
            fees,
            is_reducing,
            observed_at,
        }
    }

    /// Generate a stable unique key for this fill.
    ///
    /// Priority: venue `trade_id` (if present) > hash of deterministic fields.
    #[allow(clippy::too_many_arguments)]
    pub fn compute_fill_key(
        account: &AccountId,
        symbol: &Symbol,
        observed_at: TimeMs,
        side: PositionSide,
        size: &Decimal,
        entry_price: &Decimal,
        exit_price: &Decimal,
        realized_pnl: &Decimal,
        fees: &Decimal,
        trade_id: Option<i64>,
    ) -> String {
        if let Some(tid) = trade_id {
            return format!("tid:{}", tid);
        }

        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(account.as_str());
        hasher.update(symbol.as_str());
        hasher.update(observed_at.as_ms().to_le_bytes());
        hasher.update(if side == PositionSide::Long { b"L" } else { b"S" });
        hasher.update(size.to_canonical_string());
        hasher.update(entry_price.to_canonical_string());
        hasher.update(exit_price.to_canonical_string());
        hasher.update(realized_pnl.to_canonical_string());
        hasher.update(fees.to_canonical_string());
        let hash = hasher.finalize();
        format!("hash:{}", hex::encode(&hash[..16]))
    }

    /// Borrow the precomputed fill key.
    pub fn fill_key(&self) -> &str {
        &self.fill_key
    }
}
