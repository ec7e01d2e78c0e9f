pub mod api;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod venue;

pub use config::Config;
pub use db::{init_db, Repository};
pub use domain::{
    AccountCycle, AccountId, AggregatedTrade, Decimal, Fill, LedgerEntry, PositionSide, Symbol,
    TimeMs,
};
pub use engine::{CalculationMethod, LeverageCalculator, LifecycleTracker};
pub use error::AppError;
pub use ingest::{CycleIngestor, CycleReport, IngestError};
pub use venue::{CycleBuilder, CyclePayload};
