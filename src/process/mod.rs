//! Process supervision subsystem.
//!
//! # Data Flow
//! ```text
//! master.rs (control loop, woken by lifecycle::Wakeup)
//!     reload_requested  → Context::create (re-read config file)
//!                       → provision.rs (clone workers, migration.rs, bind)
//!                       → shutdown.rs (Quit + close the superseded generation)
//!     respawn_requested → spawner.rs (channel.rs pair + fork per worker)
//!                                 └─ child → worker.rs (tokio loop until Quit)
//!
//! single.rs: bind + worker loop in place, no fork, no channel
//! ```
//!
//! # Design Decisions
//! - The next generation is fully provisioned before any old worker is told to quit
//! - Listening sockets move between pools by value; an empty pool is `None`
//! - Fork and the wake-up source are traits so the control loop runs under test

use std::io;

use thiserror::Error;

use crate::config::ConfigError;
use crate::net::ListenerError;

pub mod channel;
pub mod context;
pub mod instance;
pub mod master;
pub mod migration;
pub mod provision;
pub mod shutdown;
pub mod single;
pub mod spawner;
pub mod worker;

pub use channel::{Channel, ChannelError, ChannelMessage, ChannelReader, Command};
pub use context::{Context, ContextId, PoolId, ServerPool};
pub use instance::{Instance, Role};
pub use master::Master;
pub use migration::{migrate_listeners, ListenerMove, MigrationReport};
pub use provision::{setup_listeners_for_workers, ProvisionReport};
pub use shutdown::{shutdown_workers, ShutdownReport};
pub use single::run_single_process;
pub use spawner::{spawn_workers, Fork, Forked, OsFork};

/// Error type for supervision operations.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to create context: {0}")]
    Context(#[from] ConfigError),

    #[error("failed to set up listeners: {0}")]
    Listener(#[from] ListenerError),

    #[error("channel failure: {0}")]
    Channel(#[from] ChannelError),

    #[error("failed to spawn worker: {0}")]
    Fork(#[source] nix::Error),

    #[error("failed waiting for signals: {0}")]
    Wakeup(#[source] io::Error),

    #[error("event loop failure: {0}")]
    Runtime(#[source] io::Error),
}
