//! Domain primitives: TimeMs, AccountId, Symbol, PositionSide.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Time in milliseconds since Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeMs(pub i64);

impl TimeMs {
    /// Create a TimeMs from milliseconds.
    pub fn new(ms: i64) -> Self {
        TimeMs(ms)
    }

    /// Get the underlying milliseconds value.
    pub fn as_ms(&self) -> i64 {
        self.0
    }

    /// Convert to a UTC datetime for display; None for out-of-range values.
    pub fn to_datetime(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        chrono::DateTime::from_timestamp_millis(self.0)
    }

    /// Milliseconds elapsed since `earlier` (saturating at zero).
    pub fn since(&self, earlier: TimeMs) -> i64 {
        self.0.saturating_sub(earlier.0).max(0)
    }
}

impl std::fmt::Display for TimeMs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339()),
            None => write!(f, "{}ms", self.0),
        }
    }
}

/// Venue account identifier (wallet address or venue account reference).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(pub String);

impl AccountId {
    /// Create an AccountId from a string.
    pub fn new(account: String) -> Self {
        AccountId(account)
    }

    /// Get the account id as a string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AccountId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err("account id must not be empty".to_string());
        }
        Ok(AccountId(s.to_string()))
    }
}

/// Traded symbol (e.g., "BTC", "SOL").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Symbol(pub String);

impl Symbol {
    /// Create a Symbol from a string.
    pub fn new(symbol: String) -> Self {
        Symbol(symbol)
    }

    /// Get the symbol as a string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Symbol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err("symbol must not be empty".to_string());
        }
        Ok(Symbol(s.to_string()))
    }
}

/// Position side: Long or Short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    /// Long position (profits when price rises).
    Long,
    /// Short position (profits when price falls).
    Short,
}

impl PositionSide {
    /// Stable string form used in database columns.
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "long",
            PositionSide::Short => "short",
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PositionSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "long" | "buy" => Ok(PositionSide::Long),
            "short" | "sell" => Ok(PositionSide::Short),
            other => Err(format!("unknown position side: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_serialization() {
        let long = PositionSide::Long;
        let json = serde_json::to_string(&long).unwrap();
        assert_eq!(json, "\"long\"");

        let short = PositionSide::Short;
        let json = serde_json::to_string(&short).unwrap();
        assert_eq!(json, "\"short\"");
    }

    #[test]
    fn test_side_from_str_accepts_venue_spellings() {
        assert_eq!(PositionSide::from_str("LONG").unwrap(), PositionSide::Long);
        assert_eq!(PositionSide::from_str("sell").unwrap(), PositionSide::Short);
        assert!(PositionSide::from_str("sideways").is_err());
    }

    #[test]
    fn test_account_id_rejects_empty() {
        assert!(AccountId::from_str("  ").is_err());
        assert_eq!(AccountId::from_str("0x123").unwrap().as_str(), "0x123");
    }

    #[test]
    fn test_timems_ordering_and_since() {
        let t1 = TimeMs::new(1000);
        let t2 = TimeMs::new(2000);
        assert!(t1 < t2);
        assert_eq!(t2.since(t1), 1000);
        assert_eq!(t1.since(t2), 0);
    }

    #[test]
    fn test_timems_display_is_rfc3339() {
        let t = TimeMs::new(1_700_000_000_000);
        assert!(t.to_string().starts_with("2023-11-14T"));
    }
}
