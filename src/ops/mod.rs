//! Operations and observability.
//!
//! - `metrics` - Fan-out activity counters
//! - `telemetry` - Structured logging setup

pub mod metrics;
pub mod telemetry;

pub use metrics::*;
pub use telemetry::*;
