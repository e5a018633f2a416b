#![deny(missing_docs)]

//! Shared configuration, error types, IDs, and observability primitives for Elytra crates.
//!
//! Architecture role:
//! - defines the server configuration resolved from the environment
//! - provides common [`ElytraError`] / [`Result`] contracts
//! - hosts typed identifiers and the metrics registry
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`ids`]
//! - [`metrics`]
//! - [`time`]

/// Environment-driven server configuration.
pub mod config;
/// Shared error taxonomy.
pub mod error;
/// Strongly-typed identifier wrappers.
pub mod ids;
/// Metrics registry and Prometheus rendering helpers.
pub mod metrics;
/// Wall-clock helpers.
pub mod time;

pub use config::{env_or_default, env_u64_or_default, ServerConfig};
pub use error::{ElytraError, Result};
pub use ids::*;
pub use metrics::{global_metrics, MetricsRegistry};
pub use time::now_ms;
