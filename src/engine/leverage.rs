//! Leverage inference via margin-delta tracking.
//!
//! The venue APIs report account-level margin aggregates but not the
//! collateral backing an individual position. When a position opens, the
//! increase in `total_margin_used` between two consecutive ledger entries
//! equals the collateral that position consumed:
//!
//! 1. The tracker determines this is the first observation of a new
//!    lifecycle.
//! 2. Fetch the most recent ledger entry before the open.
//! 3. `collateral = current_margin_used - previous.total_margin_used`
//! 4. `leverage = notional_usd / collateral`
//!
//! When no baseline exists or the delta is non-positive, fall back to a
//! venue-supplied per-position margin rate (`leverage = 1 / rate`); when
//! neither source is usable the result is `unknown`. Inference runs once
//! per lifecycle and the stored value is never revisited.

use crate::domain::{Decimal, LedgerEntry, Symbol, TimeMs};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::warn;

use super::Anomaly;

/// Positions cannot exceed 50x on the venues we ingest; anything above is
/// a margin-isolation artifact, not a real multiplier.
const MAX_LEVERAGE: i64 = 50;

/// How a lifecycle's leverage was derived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationMethod {
    /// Inferred from the account-level margin-in-use delta.
    MarginDelta,
    /// Derived from a venue-supplied per-position margin rate.
    MarginRate,
    /// Collateral could not be isolated.
    #[default]
    Unknown,
}

impl CalculationMethod {
    /// Stable string form used in database columns.
    pub fn as_str(&self) -> &'static str {
        match self {
            CalculationMethod::MarginDelta => "margin_delta",
            CalculationMethod::MarginRate => "margin_rate",
            CalculationMethod::Unknown => "unknown",
        }
    }
}

impl FromStr for CalculationMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "margin_delta" => Ok(CalculationMethod::MarginDelta),
            "margin_rate" => Ok(CalculationMethod::MarginRate),
            "unknown" => Ok(CalculationMethod::Unknown),
            other => Err(format!("unknown calculation method: {}", other)),
        }
    }
}

/// Result of one leverage inference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeverageInference {
    pub leverage: Option<Decimal>,
    pub collateral_used: Option<Decimal>,
    pub method: CalculationMethod,
    pub anomalies: Vec<Anomaly>,
}

impl LeverageInference {
    fn unknown(anomalies: Vec<Anomaly>) -> Self {
        LeverageInference {
            leverage: None,
            collateral_used: None,
            method: CalculationMethod::Unknown,
            anomalies,
        }
    }
}

/// Pure margin-delta leverage calculator.
///
/// Callers fetch the baseline ledger entry (most recent entry strictly
/// before the lifecycle open) from storage and pass it in; the calculator
/// itself performs no I/O.
#[derive(Debug, Clone)]
pub struct LeverageCalculator {
    /// A baseline older than this is flagged stale (one ingestion interval).
    stale_after_ms: i64,
}

impl LeverageCalculator {
    pub fn new(stale_after_ms: i64) -> Self {
        Self { stale_after_ms }
    }

    /// Infer leverage and collateral for a newly opened lifecycle.
    ///
    /// Only meaningful on the *first* observation of a lifecycle; the
    /// tracker guarantees it is invoked exactly once per lifecycle.
    pub fn infer(
        &self,
        symbol: &Symbol,
        notional_usd: Decimal,
        current_margin_used: Decimal,
        margin_rate: Option<Decimal>,
        baseline: Option<&LedgerEntry>,
        opened_at: TimeMs,
    ) -> LeverageInference {
        let mut anomalies = Vec::new();

        match baseline {
            None => {
                warn!(symbol = %symbol, "no prior ledger entry, cannot isolate collateral");
                anomalies.push(Anomaly::MissingBaseline {
                    symbol: symbol.clone(),
                });
            }
            Some(entry) => {
                let age_ms = opened_at.since(entry.observed_at);
                if age_ms > self.stale_after_ms {
                    warn!(
                        symbol = %symbol,
                        baseline_at = %entry.observed_at,
                        age_ms,
                        "baseline ledger entry is stale"
                    );
                    anomalies.push(Anomaly::StaleLedger {
                        baseline_at: entry.observed_at,
                        age_ms,
                    });
                }

                let delta = current_margin_used - entry.total_margin_used;
                if delta.is_positive() {
                    if delta > notional_usd {
                        // Signature of several positions opening inside one
                        // polling interval; computed anyway, never silently
                        // corrected.
                        warn!(
                            symbol = %symbol,
                            delta = %delta,
                            notional = %notional_usd,
                            "margin delta exceeds notional, possible simultaneous opens"
                        );
                    }
                    let leverage = Self::normalize(notional_usd / delta);
                    return LeverageInference {
                        leverage: Some(leverage),
                        collateral_used: Some(delta),
                        method: CalculationMethod::MarginDelta,
                        anomalies,
                    };
                }

                warn!(symbol = %symbol, delta = %delta, "non-positive margin delta, trying fallback");
                anomalies.push(Anomaly::NonPositiveDelta {
                    symbol: symbol.clone(),
                    delta,
                });
            }
        }

        if let Some(rate) = margin_rate {
            if rate.is_positive() {
                let leverage = Self::normalize(Decimal::from_i64(1) / rate);
                let collateral = notional_usd * rate;
                return LeverageInference {
                    leverage: Some(leverage),
                    collateral_used: Some(collateral),
                    method: CalculationMethod::MarginRate,
                    anomalies,
                };
            }
        }

        LeverageInference::unknown(anomalies)
    }

    /// Clamp into `[0, 50]` and round to one decimal place.
    fn normalize(leverage: Decimal) -> Decimal {
        leverage
            .clamp(Decimal::zero(), Decimal::from_i64(MAX_LEVERAGE))
            .round_dp(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AccountId;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn baseline(observed_at: i64, margin_used: &str) -> LedgerEntry {
        LedgerEntry {
            id: 1,
            account: AccountId::new("0x1".to_string()),
            observed_at: TimeMs::new(observed_at),
            total_equity: dec("1000"),
            total_margin_used: dec(margin_used),
        }
    }

    fn calc() -> LeverageCalculator {
        LeverageCalculator::new(300_000)
    }

    #[test]
    fn test_margin_delta_btc_example() {
        // {margin:0}@T1, {margin:162.22}@T2, new BTC notional 810.27 at T2.
        let b = baseline(1000, "0");
        let result = calc().infer(
            &Symbol::new("BTC".to_string()),
            dec("810.27"),
            dec("162.22"),
            None,
            Some(&b),
            TimeMs::new(61_000),
        );

        assert_eq!(result.leverage, Some(dec("5.0")));
        assert_eq!(result.collateral_used, Some(dec("162.22")));
        assert_eq!(result.method, CalculationMethod::MarginDelta);
        assert!(result.anomalies.is_empty());
    }

    #[test]
    fn test_margin_delta_sol_example() {
        // {margin:162.22}@T2, {margin:166.12}@T3, new SOL notional 77.91.
        let b = baseline(61_000, "162.22");
        let result = calc().infer(
            &Symbol::new("SOL".to_string()),
            dec("77.91"),
            dec("166.12"),
            None,
            Some(&b),
            TimeMs::new(121_000),
        );

        assert_eq!(result.collateral_used, Some(dec("3.90")));
        assert_eq!(result.leverage, Some(dec("20.0")));
        assert_eq!(result.method, CalculationMethod::MarginDelta);
    }

    #[test]
    fn test_leverage_clamped_to_cap() {
        let b = baseline(1000, "0");
        let result = calc().infer(
            &Symbol::new("BTC".to_string()),
            dec("10000"),
            dec("1"), // 10000x before the clamp
            None,
            Some(&b),
            TimeMs::new(2000),
        );

        assert_eq!(result.leverage, Some(dec("50")));
    }

    #[test]
    fn test_missing_baseline_falls_back_to_margin_rate() {
        let result = calc().infer(
            &Symbol::new("BTC".to_string()),
            dec("1000"),
            dec("100"),
            Some(dec("0.1")),
            None,
            TimeMs::new(1000),
        );

        assert_eq!(result.leverage, Some(dec("10")));
        assert_eq!(result.collateral_used, Some(dec("100")));
        assert_eq!(result.method, CalculationMethod::MarginRate);
        assert!(matches!(
            result.anomalies.as_slice(),
            [Anomaly::MissingBaseline { .. }]
        ));
    }

    #[test]
    fn test_missing_baseline_no_rate_is_unknown() {
        let result = calc().infer(
            &Symbol::new("BTC".to_string()),
            dec("1000"),
            dec("100"),
            None,
            None,
            TimeMs::new(1000),
        );

        assert_eq!(result.leverage, None);
        assert_eq!(result.collateral_used, None);
        assert_eq!(result.method, CalculationMethod::Unknown);
    }

    #[test]
    fn test_non_positive_delta_falls_back() {
        let b = baseline(1000, "200");
        let result = calc().infer(
            &Symbol::new("ETH".to_string()),
            dec("500"),
            dec("150"), // margin decreased while a position opened
            Some(dec("0.05")),
            Some(&b),
            TimeMs::new(2000),
        );

        assert_eq!(result.method, CalculationMethod::MarginRate);
        assert_eq!(result.leverage, Some(dec("20")));
        assert!(matches!(
            result.anomalies.as_slice(),
            [Anomaly::NonPositiveDelta { .. }]
        ));
    }

    #[test]
    fn test_zero_margin_rate_is_not_usable() {
        let b = baseline(1000, "200");
        let result = calc().infer(
            &Symbol::new("ETH".to_string()),
            dec("500"),
            dec("200"),
            Some(dec("0")),
            Some(&b),
            TimeMs::new(2000),
        );

        assert_eq!(result.method, CalculationMethod::Unknown);
        assert_eq!(result.leverage, None);
    }

    #[test]
    fn test_stale_baseline_flagged_but_computed() {
        let b = baseline(1000, "0");
        let result = calc().infer(
            &Symbol::new("BTC".to_string()),
            dec("810.27"),
            dec("162.22"),
            None,
            Some(&b),
            TimeMs::new(10_000_000), // far beyond one interval
        );

        assert_eq!(result.method, CalculationMethod::MarginDelta);
        assert_eq!(result.leverage, Some(dec("5.0")));
        assert!(matches!(
            result.anomalies.as_slice(),
            [Anomaly::StaleLedger { .. }]
        ));
    }

    #[test]
    fn test_delta_above_notional_still_computes() {
        let b = baseline(1000, "0");
        let result = calc().infer(
            &Symbol::new("BTC".to_string()),
            dec("100"),
            dec("250"), // delta 250 > notional 100
            None,
            Some(&b),
            TimeMs::new(2000),
        );

        assert_eq!(result.method, CalculationMethod::MarginDelta);
        assert_eq!(result.collateral_used, Some(dec("250")));
        assert_eq!(result.leverage, Some(dec("0.4")));
    }

    #[test]
    fn test_method_str_roundtrip() {
        for method in [
            CalculationMethod::MarginDelta,
            CalculationMethod::MarginRate,
            CalculationMethod::Unknown,
        ] {
            assert_eq!(
                CalculationMethod::from_str(method.as_str()).unwrap(),
                method
            );
        }
    }
}
