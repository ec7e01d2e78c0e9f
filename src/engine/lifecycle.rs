//! Position lifecycle tracking across ingestion cycles.
//!
//! One tracker is seeded per account per cycle with the open lifecycles
//! read from storage, processes that cycle's position observations, and
//! accumulates the lifecycles to open/close and snapshots to persist. The
//! ingest layer commits the outputs atomically together with the cycle's
//! ledger entry.

use crate::domain::{
    AccountId, Decimal, LedgerEntry, PositionObservation, PositionSide, Symbol, TimeMs,
};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

use super::{Anomaly, LeverageCalculator, Lifecycle, Snapshot};

/// Outputs accumulated over one cycle, ready for atomic persistence.
#[derive(Debug, Default)]
pub struct TrackerOutputs {
    /// Brand-new lifecycles with engine-assigned ids.
    pub opened: Vec<Lifecycle>,
    /// (lifecycle_id, closed_at) pairs for lifecycles that ended.
    pub closed: Vec<(i64, TimeMs)>,
    /// Snapshots to persist, one per open position observed.
    pub snapshots: Vec<Snapshot>,
    /// Non-fatal findings for the cycle report.
    pub anomalies: Vec<Anomaly>,
}

/// In-memory view of one currently open lifecycle.
#[derive(Debug, Clone)]
struct OpenState {
    lifecycle_id: i64,
    opened_at: TimeMs,
    leverage: Option<Decimal>,
    collateral_used: Option<Decimal>,
    method: super::CalculationMethod,
}

/// State machine per (symbol, side) key for a single account.
///
/// Closed --size>0--> Open (new lifecycle, leverage inferred once).
/// Open --size>0--> snapshot copying the lifecycle's leverage verbatim.
/// Open --size==0 or absent--> closed_at set; the lifecycle is terminal.
/// Reopening always allocates a fresh lifecycle id.
pub struct LifecycleTracker {
    account: AccountId,
    open: HashMap<(Symbol, PositionSide), OpenState>,
    next_lifecycle_id: i64,
    outputs: TrackerOutputs,
}

impl LifecycleTracker {
    /// Seed a tracker from the open lifecycles currently in storage.
    ///
    /// `next_lifecycle_id` must be greater than every persisted id so the
    /// engine can assign ids without a round-trip per open.
    pub fn new(account: AccountId, open_lifecycles: Vec<Lifecycle>, next_lifecycle_id: i64) -> Self {
        let mut open = HashMap::with_capacity(open_lifecycles.len());
        for lifecycle in open_lifecycles {
            open.insert(
                (lifecycle.symbol.clone(), lifecycle.side),
                OpenState {
                    lifecycle_id: lifecycle.id,
                    opened_at: lifecycle.opened_at,
                    leverage: lifecycle.leverage,
                    collateral_used: lifecycle.collateral_used,
                    method: lifecycle.calculation_method,
                },
            );
        }
        Self {
            account,
            open,
            next_lifecycle_id,
            outputs: TrackerOutputs::default(),
        }
    }

    /// Apply one cycle's position observations.
    ///
    /// `baseline` is the most recent ledger entry strictly before
    /// `observed_at`; `current_margin_used` comes from this cycle's ledger
    /// observation. Observations with `size == 0` and open keys absent
    /// from the cycle both close their lifecycle at `observed_at`.
    pub fn apply_cycle(
        &mut self,
        observed_at: TimeMs,
        positions: &[PositionObservation],
        current_margin_used: Decimal,
        baseline: Option<&LedgerEntry>,
        calculator: &LeverageCalculator,
    ) {
        let mut seen: HashSet<(Symbol, PositionSide)> = HashSet::new();
        let mut opened_this_cycle: Vec<Symbol> = Vec::new();

        for obs in positions {
            if !obs.size.is_positive() {
                // Zero-size means "no longer open"; the closing sweep below
                // handles it because the key is never marked seen.
                continue;
            }

            let key = (obs.symbol.clone(), obs.side);
            seen.insert(key.clone());

            if let Some(state) = self.open.get(&key) {
                // Existing lifecycle: copy the write-once leverage fields.
                self.outputs.snapshots.push(Snapshot {
                    symbol: obs.symbol.clone(),
                    side: obs.side,
                    size: obs.size,
                    notional_usd: obs.notional_usd,
                    entry_price: obs.entry_price,
                    leverage: state.leverage,
                    collateral_used: state.collateral_used,
                    calculation_method: state.method,
                    lifecycle_id: state.lifecycle_id,
                    observed_at,
                    opened_at: state.opened_at,
                    raw_payload: obs.raw_payload.clone(),
                });
            } else {
                self.open_lifecycle(
                    obs,
                    observed_at,
                    current_margin_used,
                    baseline,
                    calculator,
                );
                opened_this_cycle.push(obs.symbol.clone());
            }
        }

        // Close every open lifecycle the cycle no longer reports.
        let to_close: Vec<(Symbol, PositionSide)> = self
            .open
            .keys()
            .filter(|key| !seen.contains(*key))
            .cloned()
            .collect();
        for key in to_close {
            if let Some(state) = self.open.remove(&key) {
                info!(
                    account = %self.account,
                    symbol = %key.0,
                    side = %key.1,
                    lifecycle_id = state.lifecycle_id,
                    "position closed"
                );
                self.outputs.closed.push((state.lifecycle_id, observed_at));
            }
        }

        if opened_this_cycle.len() >= 2 {
            // The whole margin delta was attributed to each open; a known
            // approximation, recorded rather than silently corrected.
            warn!(
                account = %self.account,
                opens = opened_this_cycle.len(),
                "multiple lifecycles opened in one cycle, margin delta is ambiguous"
            );
            let opens_in_cycle = opened_this_cycle.len();
            for symbol in opened_this_cycle {
                self.outputs.anomalies.push(Anomaly::AmbiguousAttribution {
                    symbol,
                    opens_in_cycle,
                });
            }
        }
    }

    fn open_lifecycle(
        &mut self,
        obs: &PositionObservation,
        observed_at: TimeMs,
        current_margin_used: Decimal,
        baseline: Option<&LedgerEntry>,
        calculator: &LeverageCalculator,
    ) {
        let inference = calculator.infer(
            &obs.symbol,
            obs.notional_usd,
            current_margin_used,
            obs.margin_rate,
            baseline,
            observed_at,
        );
        self.outputs.anomalies.extend(inference.anomalies);

        let lifecycle_id = self.next_lifecycle_id;
        self.next_lifecycle_id += 1;

        info!(
            account = %self.account,
            symbol = %obs.symbol,
            side = %obs.side,
            lifecycle_id,
            leverage = ?inference.leverage,
            method = inference.method.as_str(),
            "position opened"
        );

        self.outputs.opened.push(Lifecycle {
            id: lifecycle_id,
            account: self.account.clone(),
            symbol: obs.symbol.clone(),
            side: obs.side,
            opened_at: observed_at,
            closed_at: None,
            leverage: inference.leverage,
            collateral_used: inference.collateral_used,
            calculation_method: inference.method,
        });

        self.outputs.snapshots.push(Snapshot {
            symbol: obs.symbol.clone(),
            side: obs.side,
            size: obs.size,
            notional_usd: obs.notional_usd,
            entry_price: obs.entry_price,
            leverage: inference.leverage,
            collateral_used: inference.collateral_used,
            calculation_method: inference.method,
            lifecycle_id,
            observed_at,
            opened_at: observed_at,
            raw_payload: obs.raw_payload.clone(),
        });

        self.open.insert(
            (obs.symbol.clone(), obs.side),
            OpenState {
                lifecycle_id,
                opened_at: observed_at,
                leverage: inference.leverage,
                collateral_used: inference.collateral_used,
                method: inference.method,
            },
        );
    }

    /// Consume the tracker, yielding the accumulated outputs.
    pub fn into_outputs(self) -> TrackerOutputs {
        self.outputs
    }
}
