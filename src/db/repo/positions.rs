//! Position lifecycle and snapshot operations for the repository.

use crate::domain::{AccountId, Decimal, PositionSide, Symbol, TimeMs};
use crate::engine::{CalculationMethod, Lifecycle, Snapshot};
use sqlx::Row;
use std::str::FromStr;
use tracing::warn;

use super::{parse_decimal, parse_optional_decimal, Repository};

/// Leverage context copied from the snapshot covering a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeverageContext {
    pub leverage: Option<Decimal>,
    pub collateral_used: Option<Decimal>,
    pub calculation_method: CalculationMethod,
    pub lifecycle_id: i64,
}

fn row_to_lifecycle(row: &sqlx::sqlite::SqliteRow) -> Lifecycle {
    let method_str: String = row.get("calculation_method");
    let calculation_method = CalculationMethod::from_str(&method_str).unwrap_or_else(|e| {
        warn!(error = %e, "Unknown calculation_method in storage, defaulting");
        CalculationMethod::Unknown
    });
    let side_str: String = row.get("side");
    let side = PositionSide::from_str(&side_str).unwrap_or_else(|e| {
        warn!(error = %e, "Unknown side in storage, defaulting to long");
        PositionSide::Long
    });

    Lifecycle {
        id: row.get("id"),
        account: AccountId::new(row.get::<String, _>("account")),
        symbol: Symbol::new(row.get::<String, _>("symbol")),
        side,
        opened_at: TimeMs::new(row.get("opened_at_ms")),
        closed_at: row.get::<Option<i64>, _>("closed_at_ms").map(TimeMs::new),
        leverage: parse_optional_decimal(row.get("leverage"), "leverage"),
        collateral_used: parse_optional_decimal(row.get("collateral_used"), "collateral_used"),
        calculation_method,
    }
}

impl Repository {
    /// Load the currently open lifecycles for an account (tracker seed).
    pub async fn load_open_lifecycles(
        &self,
        account: &AccountId,
    ) -> Result<Vec<Lifecycle>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, account, symbol, side, opened_at_ms, closed_at_ms,
                   leverage, collateral_used, calculation_method
            FROM position_lifecycles
            WHERE account = ? AND closed_at_ms IS NULL
            ORDER BY id ASC
            "#,
        )
        .bind(account.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_lifecycle).collect())
    }

    /// The next free lifecycle id across all accounts.
    pub async fn next_lifecycle_id(&self) -> Result<i64, sqlx::Error> {
        let row = sqlx::query("SELECT MAX(id) AS max_id FROM position_lifecycles")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<Option<i64>, _>("max_id").unwrap_or(0) + 1)
    }

    /// Query lifecycles for an account, optionally narrowed to a symbol.
    pub async fn query_lifecycles(
        &self,
        account: &AccountId,
        symbol: Option<&Symbol>,
    ) -> Result<Vec<Lifecycle>, sqlx::Error> {
        let rows = match symbol {
            Some(symbol) => {
                sqlx::query(
                    r#"
                    SELECT id, account, symbol, side, opened_at_ms, closed_at_ms,
                           leverage, collateral_used, calculation_method
                    FROM position_lifecycles
                    WHERE account = ? AND symbol = ?
                    ORDER BY opened_at_ms ASC, id ASC
                    "#,
                )
                .bind(account.as_str())
                .bind(symbol.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT id, account, symbol, side, opened_at_ms, closed_at_ms,
                           leverage, collateral_used, calculation_method
                    FROM position_lifecycles
                    WHERE account = ?
                    ORDER BY opened_at_ms ASC, id ASC
                    "#,
                )
                .bind(account.as_str())
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.iter().map(row_to_lifecycle).collect())
    }

    /// Query position snapshots for an account with optional symbol and
    /// time window, ordered deterministically.
    pub async fn query_position_snapshots(
        &self,
        account: &AccountId,
        symbol: Option<&Symbol>,
        from: Option<TimeMs>,
        to: Option<TimeMs>,
    ) -> Result<Vec<Snapshot>, sqlx::Error> {
        let from_ms = from.unwrap_or(TimeMs::new(0)).as_ms();
        let to_ms = to.unwrap_or(TimeMs::new(i64::MAX)).as_ms();

        let rows = match symbol {
            Some(symbol) => {
                sqlx::query(
                    r#"
                    SELECT symbol, side, size, notional_usd, entry_price,
                           leverage, collateral_used, calculation_method,
                           lifecycle_id, observed_at_ms, opened_at_ms, raw_payload
                    FROM position_snapshots
                    WHERE account = ? AND symbol = ?
                      AND observed_at_ms >= ? AND observed_at_ms <= ?
                    ORDER BY observed_at_ms ASC, symbol ASC, side ASC
                    "#,
                )
                .bind(account.as_str())
                .bind(symbol.as_str())
                .bind(from_ms)
                .bind(to_ms)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT symbol, side, size, notional_usd, entry_price,
                           leverage, collateral_used, calculation_method,
                           lifecycle_id, observed_at_ms, opened_at_ms, raw_payload
                    FROM position_snapshots
                    WHERE account = ? AND observed_at_ms >= ? AND observed_at_ms <= ?
                    ORDER BY observed_at_ms ASC, symbol ASC, side ASC
                    "#,
                )
                .bind(account.as_str())
                .bind(from_ms)
                .bind(to_ms)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows
            .iter()
            .map(|row| {
                let method_str: String = row.get("calculation_method");
                let side_str: String = row.get("side");
                Snapshot {
                    symbol: Symbol::new(row.get::<String, _>("symbol")),
                    side: PositionSide::from_str(&side_str).unwrap_or(PositionSide::Long),
                    size: parse_decimal(&row.get::<String, _>("size"), "size"),
                    notional_usd: parse_decimal(
                        &row.get::<String, _>("notional_usd"),
                        "notional_usd",
                    ),
                    entry_price: parse_decimal(
                        &row.get::<String, _>("entry_price"),
                        "entry_price",
                    ),
                    leverage: parse_optional_decimal(row.get("leverage"), "leverage"),
                    collateral_used: parse_optional_decimal(
                        row.get("collateral_used"),
                        "collateral_used",
                    ),
                    calculation_method: CalculationMethod::from_str(&method_str)
                        .unwrap_or(CalculationMethod::Unknown),
                    lifecycle_id: row.get("lifecycle_id"),
                    observed_at: TimeMs::new(row.get("observed_at_ms")),
                    opened_at: TimeMs::new(row.get("opened_at_ms")),
                    raw_payload: row
                        .get::<Option<String>, _>("raw_payload")
                        .and_then(|s| serde_json::from_str(&s).ok()),
                }
            })
            .collect())
    }

    /// Leverage context from the most recent snapshot at or before `at`.
    ///
    /// Used by the aggregator to inherit the leverage already computed for
    /// the lifecycle covering an opening fill; never recomputed here.
    pub async fn leverage_context_at(
        &self,
        account: &AccountId,
        symbol: &Symbol,
        side: PositionSide,
        at: TimeMs,
    ) -> Result<Option<LeverageContext>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT leverage, collateral_used, calculation_method, lifecycle_id
            FROM position_snapshots
            WHERE account = ? AND symbol = ? AND side = ? AND observed_at_ms <= ?
            ORDER BY observed_at_ms DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(account.as_str())
        .bind(symbol.as_str())
        .bind(side.as_str())
        .bind(at.as_ms())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| {
            let method_str: String = r.get("calculation_method");
            LeverageContext {
                leverage: parse_optional_decimal(r.get("leverage"), "leverage"),
                collateral_used: parse_optional_decimal(
                    r.get("collateral_used"),
                    "collateral_used",
                ),
                calculation_method: CalculationMethod::from_str(&method_str)
                    .unwrap_or(CalculationMethod::Unknown),
                lifecycle_id: r.get("lifecycle_id"),
            }
        }))
    }
}
