use crate::api::AppState;
use crate::domain::{AccountId, Symbol, TimeMs};
use crate::error::AppError;
use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradesQuery {
    pub account: String,
    pub symbol: Option<String>,
    pub since_ms: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradesResponse {
    pub trades: Vec<AggregatedTradeDto>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedTradeDto {
    pub symbol: String,
    pub side: String,
    pub total_size: String,
    pub avg_entry_price: String,
    pub avg_exit_price: String,
    pub total_pnl: String,
    pub total_fees: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leverage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collateral_used: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy_id: Option<i64>,
    pub fill_count: i64,
    pub time_ms: i64,
}

pub async fn get_trades(
    Query(params): Query<TradesQuery>,
    State(state): State<AppState>,
) -> Result<Json<TradesResponse>, AppError> {
    let account = AccountId::from_str(&params.account)
        .map_err(|_| AppError::BadRequest("Invalid account".into()))?;

    let symbol = match params.symbol.as_deref() {
        Some(s) => {
            Some(Symbol::from_str(s).map_err(|_| AppError::BadRequest("Invalid symbol".into()))?)
        }
        None => None,
    };

    let since = TimeMs::new(params.since_ms.unwrap_or(0));

    let trades = state
        .repo
        .query_aggregated_trades(&account, symbol.as_ref(), since)
        .await
        .map_err(|e| AppError::Internal(format!("Trade query failed: {}", e)))?;

    let trade_dtos = trades
        .into_iter()
        .map(|t| AggregatedTradeDto {
            symbol: t.symbol.as_str().to_string(),
            side: t.side.to_string(),
            total_size: t.total_size.to_canonical_string(),
            avg_entry_price: t.avg_entry_price.to_canonical_string(),
            avg_exit_price: t.avg_exit_price.to_canonical_string(),
            total_pnl: t.total_pnl.to_canonical_string(),
            total_fees: t.total_fees.to_canonical_string(),
            leverage: t.leverage.map(|d| d.to_canonical_string()),
            collateral_used: t.collateral_used.map(|d| d.to_canonical_string()),
            strategy_id: t.strategy_id,
            fill_count: t.fill_count,
            time_ms: t.representative_at.as_ms(),
        })
        .collect();

    Ok(Json(TradesResponse { trades: trade_dtos }))
}
