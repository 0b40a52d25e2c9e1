//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs), master only:
//!     SIGHUP              → reload_requested
//!     SIGTERM/SIGINT/QUIT → quit_requested
//!     SIGCHLD             → reap exited workers
//!
//! ControlFlags ──read by──▶ process::master (reload → provision → spawn → retire)
//! ```
//!
//! # Design Decisions
//! - One lock-free register per process; fork copies it into each worker
//! - The master only ever waits synchronously; workers use tokio signal streams

pub mod signals;

pub use signals::{ControlFlags, SignalWakeup, Wakeup, CONTROL};
