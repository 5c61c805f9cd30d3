#![deny(missing_docs)]

//! Shared configuration, error types, ids, and observability primitives for
//! quiver crates.
//!
//! Architecture role:
//! - defines the value encoding ([`Id`], [`ResultType`]) every execution
//!   component agrees on
//! - provides common [`QuiverError`] / [`Result`] contracts
//! - hosts engine configuration and metrics utilities
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`ids`]
//! - [`metrics`]
//!
//! Feature flags:
//! - `expensive-checks`: forces sort-order validation on in release builds.

/// Shared engine configuration types.
pub mod config;
/// Shared error taxonomy.
pub mod error;
/// Value encoding shared across execution components.
pub mod ids;
/// Metrics registry and Prometheus rendering helpers.
pub mod metrics;

pub use config::{expensive_checks_enabled, EngineConfig};
pub use error::{QuiverError, Result};
pub use ids::{Id, ResultType};
pub use metrics::MetricsRegistry;
