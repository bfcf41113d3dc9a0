//! Modular proctoring integrity engine.
//!
//! The engine fuses per-modality violation signals into a session risk score:
//! - **SessionRegistry**: Session lifecycle, one active session per attempt
//! - **SignalIngestor**: Validation, ordering, and violation indicators
//! - **RiskAggregator**: Decayed weighted fusion with level hysteresis
//! - **AlertManager**: Deduplicated alerts with async persistence
//! - **AnalyticsReporter**: Read-only session and assessment reports

mod access;
mod alerts;
mod analytics;
mod config;
#[allow(clippy::module_inception)]
mod engine;
mod ingest;
mod risk;
mod session;
mod store;

pub use access::*;
pub use alerts::*;
pub use analytics::*;
pub use config::*;
pub use engine::*;
pub use ingest::*;
pub use risk::*;
pub use session::*;
pub use store::*;
