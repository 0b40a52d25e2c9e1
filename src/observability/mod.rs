//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Any metrics recorder installed by an embedding process
//! ```
//!
//! # Design Decisions
//! - Structured logging for machine parsing
//! - Worker index and pid flow through every worker log line
//! - Metrics are cheap (no-ops until a recorder is installed)

pub mod logging;
pub mod metrics;
