//! Structured logging setup.
//!
//! The engine logs through component-based targets so a host service can
//! filter per component:
//!
//! | Target | Description |
//! |--------|-------------|
//! | `proctor_engine::engine` | Engine lifecycle and the inactivity sweep |
//! | `proctor_engine::session` | Session start/end |
//! | `proctor_engine::ingest` | Signal validation and ordering |
//! | `proctor_engine::risk` | Fusion and level changes |
//! | `proctor_engine::alerts` | Alert creation, suppression, persistence |
//!
//! ```bash
//! # Debug only the risk component
//! RUST_LOG=info,proctor_engine::risk=debug
//! ```

use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::EnvFilter;

/// Log output format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable format (default for development)
    #[default]
    Pretty,
    /// JSON format (best for log aggregation)
    Json,
    /// Compact single-line format
    Compact,
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LogConfig {
    #[serde(default)]
    pub format: LogFormat,

    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default)]
    pub default_filter: Option<String>,
}

/// Initialize stdout logging. Call once, from the host binary.
///
/// # Errors
/// Fails when a subscriber is already installed.
pub fn init_logging(
    config: &LogConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let fallback = config.default_filter.as_deref().unwrap_or("info");
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    match config.format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .try_init()?;
        }
        LogFormat::Compact => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .compact()
                .try_init()?;
        }
        LogFormat::Pretty => {
            tracing_subscriber::fmt().with_env_filter(filter).try_init()?;
        }
    }
    Ok(())
}

/// Log target constants for component-specific filtering.
pub mod targets {
    /// Engine lifecycle and the inactivity sweep
    pub const ENGINE: &str = "proctor_engine::engine";
    /// Session start/end
    pub const SESSION: &str = "proctor_engine::session";
    /// Signal validation and ordering
    pub const INGEST: &str = "proctor_engine::ingest";
    /// Fusion and level changes
    pub const RISK: &str = "proctor_engine::risk";
    /// Alert creation, suppression, persistence
    pub const ALERTS: &str = "proctor_engine::alerts";
}
