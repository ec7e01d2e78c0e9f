//! Per-venue payload adapters.
//!
//! Each leveraged-trading venue reports account state with its own field
//! names and types; the adapters here normalize a venue-tagged raw payload
//! into the `AccountCycle` the core consumes. Venue-specific extras
//! (`margin_rate`, `is_reducing`) are filled in where the venue provides
//! them and left absent otherwise, keeping the core algorithms
//! venue-agnostic.

use crate::domain::{AccountCycle, AccountId, Decimal, TimeMs};
use serde::Deserialize;
use std::fmt;

pub mod apex;
pub mod hyperliquid;
pub mod mock;

pub use mock::CycleBuilder;

/// A raw ingestion payload tagged by venue.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "venue", rename_all = "lowercase")]
pub enum CyclePayload {
    /// Hyperliquid clearinghouse state plus recent user fills.
    Hyperliquid {
        account: String,
        #[serde(rename = "observedAt")]
        observed_at: i64,
        state: serde_json::Value,
        #[serde(default)]
        fills: Vec<serde_json::Value>,
    },
    /// Apex Omni account balance, positions, and fills.
    Apex {
        account: String,
        #[serde(rename = "observedAt")]
        observed_at: i64,
        balance: serde_json::Value,
        #[serde(default)]
        positions: Vec<serde_json::Value>,
        #[serde(default)]
        fills: Vec<serde_json::Value>,
    },
    /// Already-normalized payload, passed through unchanged.
    Normalized(AccountCycle),
}

impl CyclePayload {
    /// Normalize into the venue-agnostic cycle the core consumes.
    pub fn normalize(self) -> Result<AccountCycle, VenueError> {
        match self {
            CyclePayload::Hyperliquid {
                account,
                observed_at,
                state,
                fills,
            } => hyperliquid::normalize(
                AccountId::new(account),
                TimeMs::new(observed_at),
                &state,
                &fills,
            ),
            CyclePayload::Apex {
                account,
                observed_at,
                balance,
                positions,
                fills,
            } => apex::normalize(
                AccountId::new(account),
                TimeMs::new(observed_at),
                &balance,
                &positions,
                &fills,
            ),
            CyclePayload::Normalized(cycle) => Ok(cycle),
        }
    }
}

/// Error type for venue payload normalization.
#[derive(Debug, Clone)]
pub enum VenueError {
    /// Required field missing or malformed.
    ParseError(String),
}

impl fmt::Display for VenueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VenueError::ParseError(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl std::error::Error for VenueError {}

/// Extract a required decimal that venues encode as either a JSON string
/// or a JSON number.
pub(crate) fn get_decimal(value: &serde_json::Value, field: &str) -> Result<Decimal, VenueError> {
    opt_decimal(value, field)
        .ok_or_else(|| VenueError::ParseError(format!("Missing or invalid {} field", field)))
}

/// Extract an optional decimal, tolerating string or number encodings.
pub(crate) fn opt_decimal(value: &serde_json::Value, field: &str) -> Option<Decimal> {
    match value.get(field)? {
        serde_json::Value::String(s) => Decimal::from_str_canonical(s).ok(),
        // The JSON text of a number is its exact decimal form.
        number @ serde_json::Value::Number(_) => {
            Decimal::from_str_canonical(&number.to_string()).ok()
        }
        _ => None,
    }
}
