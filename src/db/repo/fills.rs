//! Fill and aggregated-trade operations for the repository.

use crate::domain::{AccountId, AggregatedTrade, Fill, PositionSide, Symbol, TimeMs};
use sqlx::Row;
use std::str::FromStr;

use super::{parse_decimal, parse_optional_decimal, Repository};

fn row_to_fill(row: &sqlx::sqlite::SqliteRow) -> Fill {
    let side_str: String = row.get("side");
    Fill {
        fill_key: row.get("fill_key"),
        account: AccountId::new(row.get::<String, _>("account")),
        symbol: Symbol::new(row.get::<String, _>("symbol")),
        side: PositionSide::from_str(&side_str).unwrap_or(PositionSide::Long),
        size: parse_decimal(&row.get::<String, _>("size"), "size"),
        entry_price: parse_decimal(&row.get::<String, _>("entry_price"), "entry_price"),
        exit_price: parse_decimal(&row.get::<String, _>("exit_price"), "exit_price"),
        realized_pnl: parse_decimal(&row.get::<String, _>("realized_pnl"), "realized_pnl"),
        fees: parse_decimal(&row.get::<String, _>("fees"), "fees"),
        is_reducing: row.get::<Option<i64>, _>("is_reducing").map(|v| v != 0),
        observed_at: TimeMs::new(row.get("observed_at_ms")),
    }
}

impl Repository {
    /// Insert fills idempotently outside a cycle transaction.
    ///
    /// Returns the number of newly inserted fills (excludes duplicates).
    pub async fn insert_fills_batch(&self, fills: &[Fill]) -> Result<usize, sqlx::Error> {
        if fills.is_empty() {
            return Ok(0);
        }

        let mut total_inserted = 0usize;
        let mut tx = self.pool.begin().await?;

        for fill in fills {
            let result = sqlx::query(
                r#"
                INSERT INTO fills
                (fill_key, account, symbol, side, size, entry_price, exit_price,
                 realized_pnl, fees, is_reducing, observed_at_ms)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(fill_key) DO NOTHING
                "#,
            )
            .bind(fill.fill_key())
            .bind(fill.account.as_str())
            .bind(fill.symbol.as_str())
            .bind(fill.side.as_str())
            .bind(fill.size.to_canonical_string())
            .bind(fill.entry_price.to_canonical_string())
            .bind(fill.exit_price.to_canonical_string())
            .bind(fill.realized_pnl.to_canonical_string())
            .bind(fill.fees.to_canonical_string())
            .bind(fill.is_reducing.map(|b| if b { 1 } else { 0 }))
            .bind(fill.observed_at.as_ms())
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                total_inserted += 1;
            }
        }

        tx.commit().await?;
        Ok(total_inserted)
    }

    /// Query fills for an account since a timestamp, optionally per symbol,
    /// ordered deterministically for grouping.
    pub async fn query_fills(
        &self,
        account: &AccountId,
        symbol: Option<&Symbol>,
        since: TimeMs,
    ) -> Result<Vec<Fill>, sqlx::Error> {
        let rows = match symbol {
            Some(symbol) => {
                sqlx::query(
                    r#"
                    SELECT fill_key, account, symbol, side, size, entry_price, exit_price,
                           realized_pnl, fees, is_reducing, observed_at_ms
                    FROM fills
                    WHERE account = ? AND symbol = ? AND observed_at_ms >= ?
                    ORDER BY observed_at_ms ASC, fill_key ASC
                    "#,
                )
                .bind(account.as_str())
                .bind(symbol.as_str())
                .bind(since.as_ms())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT fill_key, account, symbol, side, size, entry_price, exit_price,
                           realized_pnl, fees, is_reducing, observed_at_ms
                    FROM fills
                    WHERE account = ? AND observed_at_ms >= ?
                    ORDER BY observed_at_ms ASC, fill_key ASC
                    "#,
                )
                .bind(account.as_str())
                .bind(since.as_ms())
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.iter().map(row_to_fill).collect())
    }

    /// Distinct symbols with fills for an account since a timestamp.
    pub async fn query_fill_symbols(
        &self,
        account: &AccountId,
        since: TimeMs,
    ) -> Result<Vec<Symbol>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT symbol
            FROM fills
            WHERE account = ? AND observed_at_ms >= ?
            ORDER BY symbol ASC
            "#,
        )
        .bind(account.as_str())
        .bind(since.as_ms())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| Symbol::new(r.get::<String, _>("symbol")))
            .collect())
    }

    /// Replace the aggregated trades for (account, symbol) from `since`
    /// onward in one transaction: the batch-recompute contract that makes
    /// aggregation idempotent and fully rebuildable.
    pub async fn replace_aggregated_trades(
        &self,
        account: &AccountId,
        symbol: &Symbol,
        since: TimeMs,
        trades: &[AggregatedTrade],
    ) -> Result<usize, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM aggregated_trades
            WHERE account = ? AND symbol = ? AND representative_ms >= ?
            "#,
        )
        .bind(account.as_str())
        .bind(symbol.as_str())
        .bind(since.as_ms())
        .execute(&mut *tx)
        .await?;

        for trade in trades {
            sqlx::query(
                r#"
                INSERT INTO aggregated_trades
                (account, symbol, side, total_size, avg_entry_price, avg_exit_price,
                 total_pnl, total_fees, leverage, collateral_used, strategy_id,
                 fill_count, representative_ms)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(trade.account.as_str())
            .bind(trade.symbol.as_str())
            .bind(trade.side.as_str())
            .bind(trade.total_size.to_canonical_string())
            .bind(trade.avg_entry_price.to_canonical_string())
            .bind(trade.avg_exit_price.to_canonical_string())
            .bind(trade.total_pnl.to_canonical_string())
            .bind(trade.total_fees.to_canonical_string())
            .bind(trade.leverage.map(|d| d.to_canonical_string()))
            .bind(trade.collateral_used.map(|d| d.to_canonical_string()))
            .bind(trade.strategy_id)
            .bind(trade.fill_count)
            .bind(trade.representative_at.as_ms())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(trades.len())
    }

    /// Query aggregated trades for an account, optionally per symbol,
    /// from `since` onward.
    pub async fn query_aggregated_trades(
        &self,
        account: &AccountId,
        symbol: Option<&Symbol>,
        since: TimeMs,
    ) -> Result<Vec<AggregatedTrade>, sqlx::Error> {
        let rows = match symbol {
            Some(symbol) => {
                sqlx::query(
                    r#"
                    SELECT account, symbol, side, total_size, avg_entry_price, avg_exit_price,
                           total_pnl, total_fees, leverage, collateral_used, strategy_id,
                           fill_count, representative_ms
                    FROM aggregated_trades
                    WHERE account = ? AND symbol = ? AND representative_ms >= ?
                    ORDER BY representative_ms ASC, symbol ASC, id ASC
                    "#,
                )
                .bind(account.as_str())
                .bind(symbol.as_str())
                .bind(since.as_ms())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT account, symbol, side, total_size, avg_entry_price, avg_exit_price,
                           total_pnl, total_fees, leverage, collateral_used, strategy_id,
                           fill_count, representative_ms
                    FROM aggregated_trades
                    WHERE account = ? AND representative_ms >= ?
                    ORDER BY representative_ms ASC, symbol ASC, id ASC
                    "#,
                )
                .bind(account.as_str())
                .bind(since.as_ms())
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows
            .iter()
            .map(|row| {
                let side_str: String = row.get("side");
                AggregatedTrade {
                    account: AccountId::new(row.get::<String, _>("account")),
                    symbol: Symbol::new(row.get::<String, _>("symbol")),
                    side: PositionSide::from_str(&side_str).unwrap_or(PositionSide::Long),
                    total_size: parse_decimal(&row.get::<String, _>("total_size"), "total_size"),
                    avg_entry_price: parse_decimal(
                        &row.get::<String, _>("avg_entry_price"),
                        "avg_entry_price",
                    ),
                    avg_exit_price: parse_decimal(
                        &row.get::<String, _>("avg_exit_price"),
                        "avg_exit_price",
                    ),
                    total_pnl: parse_decimal(&row.get::<String, _>("total_pnl"), "total_pnl"),
                    total_fees: parse_decimal(&row.get::<String, _>("total_fees"), "total_fees"),
                    leverage: parse_optional_decimal(row.get("leverage"), "leverage"),
                    collateral_used: parse_optional_decimal(
                        row.get("collateral_used"),
                        "collateral_used",
                    ),
                    strategy_id: row.get("strategy_id"),
                    fill_count: row.get("fill_count"),
                    representative_at: TimeMs::new(row.get("representative_ms")),
                }
            })
            .collect())
    }
}
