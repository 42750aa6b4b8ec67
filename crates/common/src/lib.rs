//! GeoResolve Common Library
//!
//! Shared code for the GeoResolve binaries including:
//! - Engine sessions with ordered connection failover
//! - Tickets for pending engine computations
//! - Context and observable resolution
//! - Dataset export
//! - Spatial context building (WKT and vector files)
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod config;
pub mod engine;
pub mod errors;
pub mod execution;
pub mod export;
pub mod metrics;
pub mod pipeline;
pub mod resolve;
pub mod spatial;
pub mod ticket;

// Re-export commonly used types
pub use config::AppConfig;
pub use engine::{EngineConnector, Session, SessionFactory};
pub use errors::{AppError, Result};
pub use execution::{validate, ExecutionArgs, ExecutionReport, ModelRunner, ValidationIssue};
pub use ticket::TicketFuture;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Semantic type of the context every observation is made in
pub const DEFAULT_BASE_OBSERVABLE: &str = "earth:Region";

/// Default grid resolution
pub const DEFAULT_RESOLUTION: &str = "1 km";

/// Earliest year the engine holds data for
pub const MIN_YEAR: i32 = 1900;

/// Latest year accepted for an execution
pub const MAX_YEAR: i32 = 9999;
