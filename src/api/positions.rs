use crate::api::AppState;
use crate::domain::{AccountId, Symbol, TimeMs};
use crate::error::AppError;
use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionsHistoryQuery {
    pub account: String,
    pub symbol: Option<String>,
    pub from_ms: Option<i64>,
    pub to_ms: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionsHistoryResponse {
    pub snapshots: Vec<PositionSnapshotDto>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionSnapshotDto {
    pub observed_at_ms: i64,
    pub observed_at: Option<String>,
    pub symbol: String,
    pub side: String,
    pub size: String,
    pub notional_usd: String,
    pub entry_price: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leverage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collateral_used: Option<String>,
    pub calculation_method: String,
    pub lifecycle_id: i64,
    pub opened_at_ms: i64,
}

pub async fn get_positions_history(
    Query(params): Query<PositionsHistoryQuery>,
    State(state): State<AppState>,
) -> Result<Json<PositionsHistoryResponse>, AppError> {
    let account = AccountId::from_str(&params.account)
        .map_err(|_| AppError::BadRequest("Invalid account".into()))?;

    let symbol = match params.symbol.as_deref() {
        Some(s) => {
            Some(Symbol::from_str(s).map_err(|_| AppError::BadRequest("Invalid symbol".into()))?)
        }
        None => None,
    };

    let from_ms = params.from_ms.map(TimeMs::new);
    let to_ms = params.to_ms.map(TimeMs::new);
    if let (Some(from_ms), Some(to_ms)) = (from_ms, to_ms) {
        if from_ms > to_ms {
            return Err(AppError::BadRequest("fromMs must be <= toMs".into()));
        }
    }

    let snapshots = state
        .repo
        .query_position_snapshots(&account, symbol.as_ref(), from_ms, to_ms)
        .await
        .map_err(|e| AppError::Internal(format!("Snapshot query failed: {}", e)))?;

    let snapshot_dtos = snapshots
        .into_iter()
        .map(|s| PositionSnapshotDto {
            observed_at_ms: s.observed_at.as_ms(),
            observed_at: s.observed_at.to_datetime().map(|dt| dt.to_rfc3339()),
            symbol: s.symbol.as_str().to_string(),
            side: s.side.to_string(),
            size: s.size.to_canonical_string(),
            notional_usd: s.notional_usd.to_canonical_string(),
            entry_price: s.entry_price.to_canonical_string(),
            leverage: s.leverage.map(|d| d.to_canonical_string()),
            collateral_used: s.collateral_used.map(|d| d.to_canonical_string()),
            calculation_method: s.calculation_method.as_str().to_string(),
            lifecycle_id: s.lifecycle_id,
            opened_at_ms: s.opened_at.as_ms(),
        })
        .collect();

    Ok(Json(PositionsHistoryResponse {
        snapshots: snapshot_dtos,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecyclesQuery {
    pub account: String,
    pub symbol: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecyclesResponse {
    pub lifecycles: Vec<LifecycleDto>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleDto {
    pub id: i64,
    pub symbol: String,
    pub side: String,
    pub opened_at_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leverage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collateral_used: Option<String>,
    pub calculation_method: String,
}

pub async fn get_lifecycles(
    Query(params): Query<LifecyclesQuery>,
    State(state): State<AppState>,
) -> Result<Json<LifecyclesResponse>, AppError> {
    let account = AccountId::from_str(&params.account)
        .map_err(|_| AppError::BadRequest("Invalid account".into()))?;

    let symbol = match params.symbol.as_deref() {
        Some(s) => {
            Some(Symbol::from_str(s).map_err(|_| AppError::BadRequest("Invalid symbol".into()))?)
        }
        None => None,
    };

    let lifecycles = state
        .repo
        .query_lifecycles(&account, symbol.as_ref())
        .await
        .map_err(|e| AppError::Internal(format!("Lifecycle query failed: {}", e)))?;

    let dtos = lifecycles
        .into_iter()
        .map(|l| LifecycleDto {
            id: l.id,
            symbol: l.symbol.as_str().to_string(),
            side: l.side.to_string(),
            opened_at_ms: l.opened_at.as_ms(),
            closed_at_ms: l.closed_at.map(|t| t.as_ms()),
            leverage: l.leverage.map(|d| d.to_canonical_string()),
            collateral_used: l.collateral_used.map(|d| d.to_canonical_string()),
            calculation_method: l.calculation_method.as_str().to_string(),
        })
        .collect();

    Ok(Json(LifecyclesResponse { lifecycles: dtos }))
}
