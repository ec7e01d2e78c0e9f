//! Core domain types shared across engines, storage, and the API.

pub mod cycle;
pub mod decimal;
pub mod fill;
pub mod ledger;
pub mod primitives;
pub mod strategy;
pub mod trade;

pub use cycle::{AccountCycle, FillObservation, LedgerObservation, PositionObservation};
pub use decimal::Decimal;
pub use fill::Fill;
pub use ledger::LedgerEntry;
pub use primitives::{AccountId, PositionSide, Symbol, TimeMs};
pub use strategy::{Strategy, StrategyAssignment};
pub use trade::AggregatedTrade;
