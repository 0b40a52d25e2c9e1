//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Master (per worker, per pool):
//!     → listener.rs (bind + listen, SO_REUSEPORT, owner recorded)
//!
//! Worker (after fork):
//!     inherited socket → relay.rs (tokio accept, backend pick, byte copy)
//!                      → connection.rs (in-flight tracking for drain)
//! ```
//!
//! # Design Decisions
//! - Forked workers never bind; they only serve what they inherit
//! - The relay is protocol-agnostic and stands in for the proxy data path

pub mod connection;
pub mod listener;
pub mod relay;

pub use listener::{ListenerError, ListeningResource};
