//! Builder for normalized cycles in tests, without venue payloads.

use crate::domain::{
    AccountCycle, AccountId, Decimal, FillObservation, LedgerObservation, PositionObservation,
    PositionSide, Symbol, TimeMs,
};

/// Builder producing `AccountCycle` values for tests.
#[derive(Debug, Clone)]
pub struct CycleBuilder {
    account: AccountId,
    observed_at: TimeMs,
    total_equity: Decimal,
    total_margin_used: Decimal,
    positions: Vec<PositionObservation>,
    fills: Vec<FillObservation>,
}

impl CycleBuilder {
    /// Start a cycle for an account at an observation time.
    pub fn new(account: &str, observed_at: i64) -> Self {
        Self {
            account: AccountId::new(account.to_string()),
            observed_at: TimeMs::new(observed_at),
            total_equity: Decimal::zero(),
            total_margin_used: Decimal::zero(),
            positions: Vec::new(),
            fills: Vec::new(),
        }
    }

    /// Set the ledger totals for the cycle.
    pub fn with_ledger(mut self, total_equity: &str, total_margin_used: &str) -> Self {
        self.total_equity = Decimal::from_str_canonical(total_equity).unwrap();
        self.total_margin_used = Decimal::from_str_canonical(total_margin_used).unwrap();
        self
    }

    /// Add an open long position observation.
    pub fn with_position(mut self, symbol: &str, size: &str, notional_usd: &str, entry_price: &str) -> Self {
        self.positions.push(PositionObservation {
            symbol: Symbol::new(symbol.to_string()),
            side: PositionSide::Long,
            size: Decimal::from_str_canonical(size).unwrap(),
            notional_usd: Decimal::from_str_canonical(notional_usd).unwrap(),
            entry_price: Decimal::from_str_canonical(entry_price).unwrap(),
            margin_rate: None,
            raw_payload: None,
        });
        self
    }

    /// Add a fully specified position observation.
    pub fn with_position_obs(mut self, observation: PositionObservation) -> Self {
        self.positions.push(observation);
        self
    }

    /// Add a fill observation.
    #[allow(clippy::too_many_arguments)]
    pub fn with_fill(
        mut self,
        symbol: &str,
        size: &str,
        entry_price: &str,
        exit_price: &str,
        realized_pnl: &str,
        is_reducing: Option<bool>,
        trade_id: i64,
        observed_at: i64,
    ) -> Self {
        self.fills.push(FillObservation {
            symbol: Symbol::new(symbol.to_string()),
            side: PositionSide::Long,
            size: Decimal::from_str_canonical(size).unwrap(),
            entry_price: Decimal::from_str_canonical(entry_price).unwrap(),
            exit_price: Decimal::from_str_canonical(exit_price).unwrap(),
            realized_pnl: Decimal::from_str_canonical(realized_pnl).unwrap(),
            fees: Decimal::zero(),
            is_reducing,
            trade_id: Some(trade_id),
            observed_at: Some(TimeMs::new(observed_at)),
        });
        self
    }

    /// Finish the cycle.
    pub fn build(self) -> AccountCycle {
        AccountCycle {
            account: self.account,
            observed_at: self.observed_at,
            ledger: LedgerObservation {
                total_equity: self.total_equity,
                total_margin_used: self.total_margin_used,
            },
            positions: self.positions,
            fills: self.fills,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_produces_cycle() {
        let cycle = CycleBuilder::new("0x1", 1000)
            .with_ledger("2500", "162.22")
            .with_position("BTC", "0.01", "810.27", "81027")
            .with_fill("BTC", "0.01", "81027", "0", "0", Some(false), 1, 1000)
            .build();

        assert_eq!(cycle.account.as_str(), "0x1");
        assert_eq!(cycle.positions.len(), 1);
        assert_eq!(cycle.fills.len(), 1);
        assert_eq!(
            cycle.ledger.total_margin_used,
            Decimal::from_str_canonical("162.22").unwrap()
        );
    }
}
