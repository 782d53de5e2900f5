// Library interface for stridelog
// The CLI and the integration tests both go through these modules

pub mod best_efforts;
pub mod config;
pub mod crop;
pub mod database;
pub mod derive;
pub mod duplicates;
pub mod error;
pub mod geo;
pub mod import;
pub mod logging;
pub mod models;
pub mod relative_effort;
pub mod service;
pub mod store;
pub mod timeseries;
pub mod zones;

// Re-export commonly used types for convenience
pub use models::*;
pub use best_efforts::{BestEffortExtractor, BestEffortRepository, RecalculationLock, RecalculationSummary};
pub use config::AppConfig;
pub use database::Database;
pub use derive::SessionDeriver;
pub use error::{Result, StrideError};
pub use import::Format;
pub use logging::{LogConfig, LogFormat, LogLevel};
pub use service::{ImportOutcome, RelativeEffortSummary, SessionService};
pub use store::{MemoryStore, SessionStore};
pub use zones::ZoneCalculator;
