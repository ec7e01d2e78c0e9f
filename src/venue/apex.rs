//! Apex Omni payload adapter.
//!
//! Maps the balance endpoint (`totalEquityValue`, `initialMargin`),
//! position records (`customInitialMarginRate` as the margin-rate
//! fallback), and fills (`reduceOnly` as `is_reducing`) into the
//! normalized cycle. `customInitialMarginRate` is sometimes reported as 0;
//! a non-positive rate is treated as absent so the fallback chain stays
//! honest.

use crate::domain::{
    AccountCycle, AccountId, Decimal, FillObservation, LedgerObservation, PositionObservation,
    PositionSide, Symbol, TimeMs,
};
use std::str::FromStr;
use tracing::warn;

use super::{get_decimal, opt_decimal, VenueError};

/// Normalize an Apex Omni balance + positions + fills into one cycle.
pub fn normalize(
    account: AccountId,
    observed_at: TimeMs,
    balance: &serde_json::Value,
    positions: &[serde_json::Value],
    fills: &[serde_json::Value],
) -> Result<AccountCycle, VenueError> {
    let ledger = LedgerObservation {
        total_equity: get_decimal(balance, "totalEquityValue")?,
        total_margin_used: get_decimal(balance, "initialMargin")?,
    };

    let mut normalized_positions = Vec::new();
    for position in positions {
        match parse_position(position) {
            Ok(Some(obs)) => normalized_positions.push(obs),
            Ok(None) => {}
            Err(e) => warn!("Failed to parse Apex position: {}", e),
        }
    }

    let mut normalized_fills = Vec::new();
    for fill_json in fills {
        match parse_fill(fill_json) {
            Ok(fill) => normalized_fills.push(fill),
            Err(e) => warn!("Failed to parse Apex fill: {}", e),
        }
    }

    Ok(AccountCycle {
        account,
        observed_at,
        ledger,
        positions: normalized_positions,
        fills: normalized_fills,
    })
}

fn parse_position(position: &serde_json::Value) -> Result<Option<PositionObservation>, VenueError> {
    let symbol = position
        .get("symbol")
        .and_then(|v| v.as_str())
        .ok_or_else(|| VenueError::ParseError("Missing symbol field".to_string()))?;

    let size = get_decimal(position, "size")?.abs();
    if size.is_zero() {
        return Ok(None);
    }

    let side_str = position
        .get("side")
        .and_then(|v| v.as_str())
        .ok_or_else(|| VenueError::ParseError("Missing side field".to_string()))?;
    let side = PositionSide::from_str(side_str)
        .map_err(|e| VenueError::ParseError(format!("Invalid side: {}", e)))?;

    let entry_price = opt_decimal(position, "entryPrice").unwrap_or_else(Decimal::zero);
    let notional_usd = size * entry_price;

    // Reported as 0 by the API often enough that zero means "unknown".
    let margin_rate =
        opt_decimal(position, "customInitialMarginRate").filter(|rate| rate.is_positive());

    Ok(Some(PositionObservation {
        symbol: Symbol::new(symbol.to_string()),
        side,
        size,
        notional_usd,
        entry_price,
        margin_rate,
        raw_payload: Some(position.clone()),
    }))
}

fn parse_fill(fill_json: &serde_json::Value) -> Result<FillObservation, VenueError> {
    let symbol = fill_json
        .get("symbol")
        .and_then(|v| v.as_str())
        .ok_or_else(|| VenueError::ParseError("Missing symbol field".to_string()))?;

    let side_str = fill_json
        .get("side")
        .and_then(|v| v.as_str())
        .ok_or_else(|| VenueError::ParseError("Missing side field".to_string()))?;
    let side = PositionSide::from_str(side_str)
        .map_err(|e| VenueError::ParseError(format!("Invalid side: {}", e)))?;

    let size = get_decimal(fill_json, "size")?.abs();
    let price = opt_decimal(fill_json, "price").unwrap_or_else(Decimal::zero);
    let entry_price = opt_decimal(fill_json, "entryPrice").unwrap_or(price);
    let exit_price = opt_decimal(fill_json, "exitPrice").unwrap_or(price);
    let realized_pnl = opt_decimal(fill_json, "totalPnl")
        .or_else(|| opt_decimal(fill_json, "closedPnl"))
        .unwrap_or_else(Decimal::zero);
    let fees = opt_decimal(fill_json, "fee").unwrap_or_else(Decimal::zero);

    // reduceOnly: true = closing, false = opening; absent on some order
    // types, and then the aggregator's tie-break applies.
    let is_reducing = fill_json.get("reduceOnly").and_then(|v| v.as_bool());

    let observed_at = fill_json
        .get("createdAt")
        .and_then(|v| v.as_i64())
        .map(TimeMs::new);

    Ok(FillObservation {
        symbol: Symbol::new(symbol.to_string()),
        side,
        size,
        entry_price,
        exit_price,
        realized_pnl,
        fees,
        is_reducing,
        trade_id: None, // Apex ids are opaque strings; the hash key applies
        observed_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn account() -> AccountId {
        AccountId::new("apex-1".to_string())
    }

    fn balance() -> serde_json::Value {
        serde_json::json!({
            "totalEquityValue": "2500.00",
            "initialMargin": "166.12",
            "availableBalance": "2300.00"
        })
    }

    #[test]
    fn test_normalize_position_with_margin_rate() {
        let positions = vec![serde_json::json!({
            "symbol": "SOL-USDT",
            "side": "LONG",
            "size": "5",
            "entryPrice": "15.582",
            "customInitialMarginRate": "0.05"
        })];

        let cycle = normalize(account(), TimeMs::new(1000), &balance(), &positions, &[]).unwrap();
        assert_eq!(cycle.ledger.total_margin_used, dec("166.12"));
        assert_eq!(cycle.positions.len(), 1);

        let sol = &cycle.positions[0];
        assert_eq!(sol.margin_rate, Some(dec("0.05")));
        assert_eq!(sol.notional_usd, dec("77.91"));
    }

    #[test]
    fn test_zero_margin_rate_treated_as_absent() {
        let positions = vec![serde_json::json!({
            "symbol": "BTC-USDT",
            "side": "SHORT",
            "size": "0.01",
            "entryPrice": "81000",
            "customInitialMarginRate": "0"
        })];

        let cycle = normalize(account(), TimeMs::new(1000), &balance(), &positions, &[]).unwrap();
        assert_eq!(cycle.positions[0].margin_rate, None);
        assert_eq!(cycle.positions[0].side, PositionSide::Short);
    }

    #[test]
    fn test_fill_reduce_only_mapped() {
        let fills = vec![
            serde_json::json!({
                "symbol": "BTC-USDT", "side": "BUY", "size": "0.5",
                "price": "100", "reduceOnly": false, "createdAt": 1000,
                "fee": "0.1"
            }),
            serde_json::json!({
                "symbol": "BTC-USDT", "side": "SELL", "size": "0.5",
                "entryPrice": "100", "exitPrice": "110", "totalPnl": "5",
                "reduceOnly": true, "createdAt": 2000, "fee": "0.1"
            }),
        ];

        let cycle = normalize(account(), TimeMs::new(3000), &balance(), &[], &fills).unwrap();
        assert_eq!(cycle.fills.len(), 2);
        assert_eq!(cycle.fills[0].is_reducing, Some(false));
        assert_eq!(cycle.fills[1].is_reducing, Some(true));
        assert_eq!(cycle.fills[1].exit_price, dec("110"));
        assert_eq!(cycle.fills[1].realized_pnl, dec("5"));
    }

    #[test]
    fn test_fill_without_reduce_only_stays_unknown() {
        let fills = vec![serde_json::json!({
            "symbol": "ETH-USDT", "side": "BUY", "size": "1", "price": "3000"
        })];

        let cycle = normalize(account(), TimeMs::new(3000), &balance(), &[], &fills).unwrap();
        assert_eq!(cycle.fills[0].is_reducing, None);
        // No per-fill timestamp: ingestion substitutes the cycle time.
        assert_eq!(cycle.fills[0].observed_at, None);
    }

    #[test]
    fn test_missing_balance_fields_is_error() {
        let bad = serde_json::json!({ "availableBalance": "1" });
        assert!(normalize(account(), TimeMs::new(1000), &bad, &[], &[]).is_err());
    }
}
