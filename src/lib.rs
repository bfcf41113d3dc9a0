//! Exam-proctoring integrity engine.
//!
//! Fuses eye-tracking, ambient-noise, and face-detection signals from
//! external inference services into a per-session risk score, raises
//! deduplicated integrity alerts, and serves reports for review.
//!
//! # Quick start
//!
//! ```ignore
//! use proctor_engine::{Caller, EngineConfig, ModalitySet, ProctorEngine};
//!
//! let engine = ProctorEngine::new(EngineConfig::default())?;
//! let session_id = engine.start_monitoring(
//!     &Caller::Service,
//!     "attempt-42",
//!     "final-exam",
//!     "student-7",
//!     ModalitySet::all(),
//! )?;
//! ```

#![deny(unreachable_pub)]

mod errors;

pub mod engine;
pub mod logging;
pub mod types;

pub use engine::*;
pub use errors::{Error, Result, SessionStateError};
pub use logging::{init_logging, LogConfig, LogFormat};
pub use types::*;
