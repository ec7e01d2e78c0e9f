//! Batch recomputation of aggregated trades from committed fills.

use crate::db::Repository;
use crate::domain::{AccountId, AggregatedTrade, Symbol, TimeMs};
use crate::engine::group_fills;
use std::sync::Arc;
use tracing::debug;

/// Rebuilds aggregated trades for (account, symbol) windows.
///
/// Aggregation reads only committed rows, so it is safe to run while
/// ingestion is in flight for the same account.
#[derive(Clone)]
pub struct Aggregator {
    repo: Arc<Repository>,
    window_ms: i64,
}

impl Aggregator {
    pub fn new(repo: Arc<Repository>, window_ms: i64) -> Self {
        Self { repo, window_ms }
    }

    /// Recompute and store aggregated trades from `since` onward.
    ///
    /// Idempotent: the same fills always produce the same trades, and the
    /// affected window is replaced wholesale in one transaction.
    pub async fn aggregate(
        &self,
        account: &AccountId,
        symbol: &Symbol,
        since: TimeMs,
    ) -> Result<Vec<AggregatedTrade>, sqlx::Error> {
        let fills = self.repo.query_fills(account, Some(symbol), since).await?;
        let groups = group_fills(symbol, &fills, self.window_ms);

        let mut trades = Vec::with_capacity(groups.len());
        for group in groups {
            // Leverage context comes from the snapshot covering the open
            // leg; strategy from the assignment active when the round trip
            // began. Neither is recomputed here.
            let context_at = group.opened_at.unwrap_or(group.representative_at);
            let context = self
                .repo
                .leverage_context_at(account, symbol, group.side, context_at)
                .await?;
            let strategy_id = self
                .repo
                .resolve_strategy_id(account, symbol, context_at)
                .await?;

            let (leverage, collateral_used) = match context {
                Some(ctx) => (ctx.leverage, ctx.collateral_used),
                None => (None, None),
            };

            trades.push(AggregatedTrade {
                account: account.clone(),
                symbol: symbol.clone(),
                side: group.side,
                total_size: group.total_size,
                avg_entry_price: group.avg_entry_price,
                avg_exit_price: group.avg_exit_price,
                total_pnl: group.total_pnl,
                total_fees: group.total_fees,
                leverage,
                collateral_used,
                strategy_id,
                fill_count: group.fill_count,
                representative_at: group.representative_at,
            });
        }

        self.repo
            .replace_aggregated_trades(account, symbol, since, &trades)
            .await?;

        debug!(
            account = %account,
            symbol = %symbol,
            trades = trades.len(),
            "aggregated trades rebuilt"
        );

        Ok(trades)
    }

    /// Rebuild every symbol with fills for an account from `since` onward.
    /// Returns the total number of trades produced.
    pub async fn aggregate_account(
        &self,
        account: &AccountId,
        since: TimeMs,
    ) -> Result<usize, sqlx::Error> {
        let symbols = self.repo.query_fill_symbols(account, since).await?;
        let mut total = 0usize;
        for symbol in &symbols {
            total += self.aggregate(account, symbol, since).await?.len();
        }
        Ok(total)
    }
}
