//! proxy-supervisor
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────── master ───────────────────────────┐
//!   SIGHUP ──────▶│ SignalWakeup ─▶ ControlFlags ─▶ Master loop                     │
//!   SIGTERM ─────▶│                                  │ reload: Context + provision  │
//!   SIGCHLD ─────▶│                                  │ respawn: fork per worker     │
//!                 └──────────────────────────────────┼──────────────────────────────┘
//!                                                    │ fork + Channel (Quit)
//!                          ┌─────────────────────────┼─────────────────────────┐
//!                          ▼                         ▼                         ▼
//!                     worker 0                  worker 1        ...       worker N-1
//!                 listeners → relay          listeners → relay         listeners → relay
//! ```
//!
//! The master never starts a tokio runtime: every worker builds its own
//! after the fork.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use proxy_supervisor::config::load_config;
use proxy_supervisor::lifecycle::{SignalWakeup, CONTROL};
use proxy_supervisor::observability::logging::init_logging;
use proxy_supervisor::process::{run_single_process, Context, Instance, Master, OsFork};

#[derive(Parser, Debug)]
#[command(name = "proxy-supervisor", version, about = "Master/worker TCP proxy supervisor")]
struct Cli {
    /// Configuration file
    #[arg(short = 'c', long = "conf-file", default_value = "conf/proxy.toml")]
    conf_file: PathBuf,

    /// Load and validate the configuration, then exit
    #[arg(short = 't', long = "test-conf")]
    test_conf: bool,

    /// Serve in this process without forking workers
    #[arg(long)]
    single_process: bool,

    /// Overrides global.log_level
    #[arg(short = 'v', long = "log-level")]
    log_level: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli.conf_file) {
        Ok(config) => config,
        Err(e) => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"));
            tracing::error!(conf_file = %cli.conf_file.display(), error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let level = cli.log_level.clone().unwrap_or_else(|| config.global.log_level.clone());
    init_logging(&level);

    if cli.test_conf {
        tracing::info!(
            conf_file = %cli.conf_file.display(),
            pools = config.pools.len(),
            workers = config.global.worker_processes,
            "Configuration is valid"
        );
        return ExitCode::SUCCESS;
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        conf_file = %cli.conf_file.display(),
        "proxy-supervisor starting"
    );

    let context = Context::from_config(Arc::new(config));
    let instance = Instance::master(cli.conf_file.clone(), context);

    let result = if cli.single_process {
        run_single_process(instance, &CONTROL)
    } else {
        match SignalWakeup::install() {
            Ok(wakeup) => Master::new(instance, &CONTROL, OsFork, wakeup).run(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handling");
                return ExitCode::FAILURE;
            }
        }
    };

    match result {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Fatal error");
            ExitCode::FAILURE
        }
    }
}
