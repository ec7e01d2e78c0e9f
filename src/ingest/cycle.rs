//! Atomic, idempotent application of one ingestion cycle.

use crate::config::Config;
use crate::db::Repository;
use crate::domain::{AccountCycle, AccountId, Fill, TimeMs};
use crate::engine::{Anomaly, LeverageCalculator, LifecycleTracker};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::info;

use super::Aggregator;

/// Structured outcome of one ingestion cycle.
///
/// Anomalies are the error channel: the cycle itself never aborts for
/// data-quality reasons, it degrades and reports.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub account: AccountId,
    pub observed_at: TimeMs,
    pub ledger_inserted: bool,
    pub lifecycles_opened: usize,
    pub lifecycles_closed: usize,
    pub snapshots_written: usize,
    pub fills_ingested: usize,
    pub trades_aggregated: usize,
    pub anomalies: Vec<Anomaly>,
}

impl CycleReport {
    fn duplicate(account: AccountId, observed_at: TimeMs) -> Self {
        CycleReport {
            account,
            observed_at,
            ledger_inserted: false,
            lifecycles_opened: 0,
            lifecycles_closed: 0,
            snapshots_written: 0,
            fills_ingested: 0,
            trades_aggregated: 0,
            anomalies: vec![Anomaly::DuplicateObservation { observed_at }],
        }
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    /// A cycle for this account is already being applied; the caller must
    /// skip or retry later, never interleave.
    #[error("Ingestion already in flight for account {0}")]
    CycleInFlight(String),
    /// Cycles must arrive in non-decreasing observed_at order per account.
    #[error("Cycle at {observed}ms predates the latest ledger entry at {latest}ms")]
    OutOfOrderCycle { observed: i64, latest: i64 },
    #[error("Invalid cycle payload: {0}")]
    InvalidCycle(String),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Applies normalized cycles: tracker + calculator + atomic persistence,
/// then aggregation over the committed fills.
#[derive(Clone)]
pub struct CycleIngestor {
    repo: Arc<Repository>,
    calculator: LeverageCalculator,
    aggregator: Aggregator,
    in_flight: Arc<Mutex<HashSet<AccountId>>>,
}

/// Releases the per-account in-flight slot when the cycle finishes,
/// including on error paths.
struct InFlightGuard {
    in_flight: Arc<Mutex<HashSet<AccountId>>>,
    account: AccountId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut set) = self.in_flight.lock() {
            set.remove(&self.account);
        }
    }
}

impl CycleIngestor {
    pub fn new(repo: Arc<Repository>, config: &Config) -> Self {
        Self {
            calculator: LeverageCalculator::new(config.ingest_interval_ms),
            aggregator: Aggregator::new(repo.clone(), config.aggregation_window_ms),
            repo,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Apply one cycle end to end.
    ///
    /// Accounts are independent; cycles for different accounts may run
    /// concurrently, while a second cycle for the same account is refused
    /// with `CycleInFlight`. All writes for the cycle commit atomically;
    /// a failure rolls everything back so the next cycle's margin delta
    /// never reads partial state.
    pub async fn ingest(&self, cycle: AccountCycle) -> Result<CycleReport, IngestError> {
        if cycle.ledger.total_margin_used.is_negative() {
            return Err(IngestError::InvalidCycle(
                "totalMarginUsed must be >= 0".to_string(),
            ));
        }

        let account = cycle.account.clone();
        let _guard = self.acquire(&account)?;

        if let Some(latest) = self.repo.latest_ledger_time(&account).await? {
            if cycle.observed_at <= latest {
                // A replayed cycle is absorbed; a genuinely new cycle that
                // predates the ledger head would corrupt delta computation.
                if self
                    .repo
                    .ledger_entry_exists(&account, cycle.observed_at)
                    .await?
                {
                    return Ok(CycleReport::duplicate(account, cycle.observed_at));
                }
                return Err(IngestError::OutOfOrderCycle {
                    observed: cycle.observed_at.as_ms(),
                    latest: latest.as_ms(),
                });
            }
        }

        let baseline = self
            .repo
            .latest_ledger_before(&account, cycle.observed_at)
            .await?;
        let open_lifecycles = self.repo.load_open_lifecycles(&account).await?;
        let next_lifecycle_id = self.repo.next_lifecycle_id().await?;

        let mut tracker =
            LifecycleTracker::new(account.clone(), open_lifecycles, next_lifecycle_id);
        tracker.apply_cycle(
            cycle.observed_at,
            &cycle.positions,
            cycle.ledger.total_margin_used,
            baseline.as_ref(),
            &self.calculator,
        );
        let outputs = tracker.into_outputs();

        let fills: Vec<Fill> = cycle
            .fills
            .iter()
            .map(|f| {
                Fill::new(
                    account.clone(),
                    f.symbol.clone(),
                    f.side,
                    f.size,
                    f.entry_price,
                    f.exit_price,
                    f.realized_pnl,
                    f.fees,
                    f.is_reducing,
                    f.trade_id,
                    f.observed_at.unwrap_or(cycle.observed_at),
                )
            })
            .collect();

        let stats = match self
            .repo
            .apply_cycle_atomic(
                &account,
                cycle.observed_at,
                &cycle.ledger,
                &outputs.opened,
                &outputs.closed,
                &outputs.snapshots,
                &fills,
            )
            .await?
        {
            Some(stats) => stats,
            // Lost a race with an identical cycle; absorb silently.
            None => return Ok(CycleReport::duplicate(account, cycle.observed_at)),
        };

        // Aggregation is a pure batch recomputation over committed fills.
        let trades_aggregated = self
            .aggregator
            .aggregate_account(&account, TimeMs::new(0))
            .await?;

        let report = CycleReport {
            account,
            observed_at: cycle.observed_at,
            ledger_inserted: true,
            lifecycles_opened: outputs.opened.len(),
            lifecycles_closed: outputs.closed.len(),
            snapshots_written: stats.snapshots_inserted,
            fills_ingested: stats.fills_inserted,
            trades_aggregated,
            anomalies: outputs.anomalies,
        };

        info!(
            account = %report.account,
            observed_at = %report.observed_at,
            opened = report.lifecycles_opened,
            closed = report.lifecycles_closed,
            snapshots = report.snapshots_written,
            fills = report.fills_ingested,
            anomalies = report.anomalies.len(),
            "cycle ingested"
        );

        Ok(report)
    }

    fn acquire(&self, account: &AccountId) -> Result<InFlightGuard, IngestError> {
        let mut set = self
            .in_flight
            .lock()
            .map_err(|_| IngestError::CycleInFlight(account.as_str().to_string()))?;
        if !set.insert(account.clone()) {
            return Err(IngestError::CycleInFlight(account.as_str().to_string()));
        }
        Ok(InFlightGuard {
            in_flight: self.in_flight.clone(),
            account: account.clone(),
        })
    }
}
