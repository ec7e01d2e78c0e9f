//! Grouping of raw fills into complete round-trip trades.
//!
//! Fills are walked chronologically per (account, symbol). Opening fills
//! accumulate the open leg, closing fills the close leg; a group completes
//! when the close leg catches up with the open leg (the position is flat
//! again). When `is_reducing` is unknown, a fill counts as closing iff a
//! strictly earlier fill already opened an unmatched position. Orphan
//! closing fills (open leg outside the retention window) are grouped by
//! time proximity instead.

use crate::domain::{Decimal, Fill, PositionSide, Symbol, TimeMs};

/// One reconstructed round trip, before leverage/strategy enrichment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeGroup {
    pub symbol: Symbol,
    pub side: PositionSide,
    /// Size of the open leg; falls back to the close leg for orphan groups.
    pub total_size: Decimal,
    pub avg_entry_price: Decimal,
    pub avg_exit_price: Decimal,
    pub total_pnl: Decimal,
    pub total_fees: Decimal,
    pub fill_count: i64,
    /// Timestamp of the first opening fill, when the group has one.
    pub opened_at: Option<TimeMs>,
    /// Timestamp of the last fill in the group.
    pub representative_at: TimeMs,
}

#[derive(Debug, Default)]
struct GroupBuilder {
    side: Option<PositionSide>,
    open_size: Decimal,
    open_value: Decimal,
    close_size: Decimal,
    close_exit_value: Decimal,
    close_entry_value: Decimal,
    total_pnl: Decimal,
    total_fees: Decimal,
    fill_count: i64,
    opened_at: Option<TimeMs>,
    last_at: Option<TimeMs>,
}

impl GroupBuilder {
    fn is_empty(&self) -> bool {
        self.fill_count == 0
    }

    /// An unmatched open exists: strictly earlier opens outweigh closes.
    fn has_unmatched_open(&self) -> bool {
        self.open_size > self.close_size
    }

    /// Flat again: every opened unit has been closed.
    fn is_complete(&self) -> bool {
        self.open_size.is_positive() && self.close_size >= self.open_size
    }

    fn has_closes(&self) -> bool {
        self.close_size.is_positive()
    }

    fn push(&mut self, fill: &Fill, reducing: bool) {
        if reducing {
            self.close_size = self.close_size + fill.size;
            self.close_exit_value = self.close_exit_value + fill.size * fill.exit_price;
            self.close_entry_value = self.close_entry_value + fill.size * fill.entry_price;
        } else {
            self.open_size = self.open_size + fill.size;
            self.open_value = self.open_value + fill.size * fill.entry_price;
            if self.opened_at.is_none() {
                self.opened_at = Some(fill.observed_at);
            }
        }
        self.side.get_or_insert(fill.side);
        self.total_pnl = self.total_pnl + fill.realized_pnl;
        self.total_fees = self.total_fees + fill.fees;
        self.fill_count += 1;
        self.last_at = Some(fill.observed_at);
    }

    fn finish(self, symbol: &Symbol) -> Option<TradeGroup> {
        let representative_at = self.last_at?;
        let side = self.side?;

        let (total_size, avg_entry_price) = if self.open_size.is_positive() {
            (self.open_size, self.open_value / self.open_size)
        } else if self.close_size.is_positive() {
            // Orphan close-only group: closing fills carry the venue's
            // entry price, so the entry average is still recoverable.
            (self.close_size, self.close_entry_value / self.close_size)
        } else {
            return None;
        };

        let avg_exit_price = if self.close_size.is_positive() {
            self.close_exit_value / self.close_size
        } else {
            Decimal::zero()
        };

        Some(TradeGroup {
            symbol: symbol.clone(),
            side,
            total_size,
            avg_entry_price,
            avg_exit_price,
            total_pnl: self.total_pnl,
            total_fees: self.total_fees,
            fill_count: self.fill_count,
            opened_at: self.opened_at,
            representative_at,
        })
    }
}

/// Group one symbol's fills into round trips.
///
/// `window_ms` bounds the time proximity of close-only groups (fills whose
/// opening legs predate the retention window). Groups that contain no
/// closing fill are still-open positions and are not emitted.
pub fn group_fills(symbol: &Symbol, fills: &[Fill], window_ms: i64) -> Vec<TradeGroup> {
    let mut sorted: Vec<&Fill> = fills.iter().collect();
    sorted.sort_by(|a, b| {
        a.observed_at
            .cmp(&b.observed_at)
            .then_with(|| a.fill_key.cmp(&b.fill_key))
    });

    let mut groups = Vec::new();
    let mut builder = GroupBuilder::default();

    for fill in sorted {
        let reducing = fill.is_reducing.unwrap_or_else(|| builder.has_unmatched_open());

        let split_before = if builder.is_empty() {
            false
        } else if !reducing && !builder.has_unmatched_open() {
            // A fresh opening fill while nothing is left open starts a new
            // round trip.
            true
        } else if !builder.open_size.is_positive() {
            // Close-only grouping: proximity window decides the boundary.
            builder
                .last_at
                .map_or(false, |last| fill.observed_at.since(last) > window_ms)
        } else {
            false
        };

        if split_before {
            flush(&mut builder, symbol, &mut groups);
        }

        builder.push(fill, reducing);

        if builder.is_complete() {
            flush(&mut builder, symbol, &mut groups);
        }
    }

    if builder.has_closes() {
        flush(&mut builder, symbol, &mut groups);
    }

    groups
}

fn flush(builder: &mut GroupBuilder, symbol: &Symbol, groups: &mut Vec<TradeGroup>) {
    let done = std::mem::take(builder);
    if !done.has_closes() {
        // Open leg without any close: the round trip has not finished.
        return;
    }
    if let Some(group) = done.finish(symbol) {
        groups.push(group);
    }
}
