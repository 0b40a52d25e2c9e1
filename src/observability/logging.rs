//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber once, before any worker is forked
//! - Honour `RUST_LOG` first, then the configured level
//!
//! # Design Decisions
//! - Workers inherit the master's subscriber through fork; their events carry
//!   a `worker` span with index and pid

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. Later calls are no-ops.
pub fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("proxy_supervisor={default_level}")));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
