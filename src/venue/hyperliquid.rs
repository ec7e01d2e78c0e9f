//! Hyperliquid payload adapter.
//!
//! Maps the clearinghouse state (`marginSummary`, `assetPositions`) and
//! `userFills` records into the normalized cycle. Hyperliquid does not
//! expose a per-position margin rate, so `margin_rate` stays absent and
//! leverage inference relies entirely on the margin delta. The fill `dir`
//! field ("Open Long", "Close Short", ...) yields `is_reducing` when
//! present.

use crate::domain::{
    AccountCycle, AccountId, Decimal, FillObservation, LedgerObservation, PositionObservation,
    PositionSide, Symbol, TimeMs,
};
use tracing::warn;

use super::{get_decimal, opt_decimal, VenueError};

/// Normalize a Hyperliquid clearinghouse state plus fills into one cycle.
pub fn normalize(
    account: AccountId,
    observed_at: TimeMs,
    state: &serde_json::Value,
    fills: &[serde_json::Value],
) -> Result<AccountCycle, VenueError> {
    let margin_summary = state
        .get("marginSummary")
        .ok_or_else(|| VenueError::ParseError("Missing marginSummary field".to_string()))?;

    let ledger = LedgerObservation {
        total_equity: get_decimal(margin_summary, "accountValue")?,
        total_margin_used: get_decimal(margin_summary, "totalMarginUsed")?,
    };

    let mut positions = Vec::new();
    if let Some(asset_positions) = state.get("assetPositions").and_then(|v| v.as_array()) {
        for ap in asset_positions {
            let Some(position) = ap.get("position") else {
                continue;
            };
            match parse_position(position) {
                Ok(Some(obs)) => positions.push(obs),
                Ok(None) => {} // flat, nothing to observe
                Err(e) => warn!("Failed to parse Hyperliquid position: {}", e),
            }
        }
    }

    let mut normalized_fills = Vec::new();
    for fill_json in fills {
        match parse_fill(fill_json) {
            Ok(fill) => normalized_fills.push(fill),
            Err(e) => warn!("Failed to parse Hyperliquid fill: {}", e),
        }
    }

    Ok(AccountCycle {
        account,
        observed_at,
        ledger,
        positions,
        fills: normalized_fills,
    })
}

fn parse_position(position: &serde_json::Value) -> Result<Option<PositionObservation>, VenueError> {
    let coin = position
        .get("coin")
        .and_then(|v| v.as_str())
        .ok_or_else(|| VenueError::ParseError("Missing coin field".to_string()))?;

    // szi is the signed size: positive = long, negative = short.
    let szi = get_decimal(position, "szi")?;
    if szi.is_zero() {
        return Ok(None);
    }
    let side = if szi.is_positive() {
        PositionSide::Long
    } else {
        PositionSide::Short
    };
    let size = szi.abs();

    let entry_price = opt_decimal(position, "entryPx").unwrap_or_else(Decimal::zero);
    let notional_usd = opt_decimal(position, "positionValue")
        .map(|v| v.abs())
        .unwrap_or_else(|| size * entry_price);

    Ok(Some(PositionObservation {
        symbol: Symbol::new(coin.to_string()),
        side,
        size,
        notional_usd,
        entry_price,
        margin_rate: None, // not exposed by the clearinghouse state
        raw_payload: Some(position.clone()),
    }))
}

fn parse_fill(fill_json: &serde_json::Value) -> Result<FillObservation, VenueError> {
    let coin = fill_json
        .get("coin")
        .and_then(|v| v.as_str())
        .ok_or_else(|| VenueError::ParseError("Missing coin field".to_string()))?;

    let time_ms = fill_json
        .get("time")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| VenueError::ParseError("Missing time field".to_string()))?;

    let px = get_decimal(fill_json, "px")?;
    let sz = get_decimal(fill_json, "sz")?;
    let fee = opt_decimal(fill_json, "fee").unwrap_or_else(Decimal::zero);
    let closed_pnl = opt_decimal(fill_json, "closedPnl").unwrap_or_else(Decimal::zero);
    let tid = fill_json.get("tid").and_then(|v| v.as_i64());

    // dir is e.g. "Open Long" / "Close Short"; it carries both the position
    // side and whether the fill reduces it.
    let dir = fill_json.get("dir").and_then(|v| v.as_str());
    let is_reducing = dir.and_then(|d| {
        if d.starts_with("Close") {
            Some(true)
        } else if d.starts_with("Open") {
            Some(false)
        } else {
            None
        }
    });
    let side = match dir {
        Some(d) if d.ends_with("Long") => PositionSide::Long,
        Some(d) if d.ends_with("Short") => PositionSide::Short,
        _ => {
            // B = buy, A = ask/sell; an approximation when dir is absent.
            let side_str = fill_json
                .get("side")
                .and_then(|v| v.as_str())
                .ok_or_else(|| VenueError::ParseError("Missing side field".to_string()))?;
            match side_str {
                "B" => PositionSide::Long,
                "A" => PositionSide::Short,
                other => {
                    return Err(VenueError::ParseError(format!("Invalid side: {}", other)))
                }
            }
        }
    };

    Ok(FillObservation {
        symbol: Symbol::new(coin.to_string()),
        side,
        size: sz,
        entry_price: px,
        exit_price: px,
        realized_pnl: closed_pnl,
        fees: fee,
        is_reducing,
        trade_id: tid,
        observed_at: Some(TimeMs::new(time_ms)),
    })
}
