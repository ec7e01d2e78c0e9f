//! Ingestion orchestration: atomic per-cycle application and batch
//! aggregation over committed fills.

pub mod aggregate;
pub mod cycle;

pub use aggregate::Aggregator;
pub use cycle::{CycleIngestor, CycleReport, IngestError};
