//! Master control loop.
//!
//! # State Machine
//! ```text
//! start:  provision generation 0 (respawn latched)
//! loop:
//!     reload_requested?  → new Context → provision(reloading)
//!                            ok  → respawn latched, old generation retired
//!                            err → previous Context restored, nothing respawned
//!     respawn_requested? → spawn every worker (failure ends the loop)
//!     wait for a wake-up → quit_requested? retire workers and return
//! ```
//!
//! # Design Decisions
//! - A failed reload never touches the running generation
//! - The loop blocks only in `Wakeup::wait`; nothing polls

use std::mem;

use crate::lifecycle::{ControlFlags, Wakeup};
use crate::observability::metrics;
use crate::process::context::Context;
use crate::process::instance::Instance;
use crate::process::provision::setup_listeners_for_workers;
use crate::process::shutdown::{shutdown_workers, ShutdownReport};
use crate::process::spawner::{spawn_workers, Fork};
use crate::process::ProcessError;

/// The master process: owns the worker generation and drives reloads.
pub struct Master<'a, F: Fork, W: Wakeup> {
    instance: Instance,
    flags: &'a ControlFlags,
    forker: F,
    wakeup: W,
}

impl<'a, F: Fork, W: Wakeup> Master<'a, F, W> {
    pub fn new(instance: Instance, flags: &'a ControlFlags, forker: F, wakeup: W) -> Self {
        Self {
            instance,
            flags,
            forker,
            wakeup,
        }
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Provision the first generation and latch a respawn for it.
    pub fn start(&mut self) -> Result<(), ProcessError> {
        self.flags.request_respawn();
        let report = setup_listeners_for_workers(&mut self.instance, false).map_err(|e| {
            tracing::error!(error = %e, "Failed to set up listeners");
            e
        })?;
        tracing::info!(workers = report.workers, "Master started");
        Ok(())
    }

    /// Run until quit (`Ok`) or a spawn failure (`Err`).
    pub fn run(mut self) -> Result<(), ProcessError> {
        self.start()?;
        loop {
            self.cycle()?;
            self.wakeup.wait(self.flags).map_err(ProcessError::Wakeup)?;
            if self.flags.quit_requested() {
                let report = self.stop();
                tracing::info!(retired = report.workers, "Master exiting");
                return Ok(());
            }
        }
    }

    /// One loop body: apply a pending reload, then a pending respawn.
    pub fn cycle(&mut self) -> Result<(), ProcessError> {
        if self.flags.take_reload() {
            self.reload();
        }

        if self.flags.take_respawn() {
            spawn_workers(&mut self.instance.workers, &mut self.forker, self.flags)?;
        }
        Ok(())
    }

    /// Load the configuration again and provision a new generation from it.
    ///
    /// Returns whether the new generation was installed.
    pub fn reload(&mut self) -> bool {
        tracing::info!(conf_file = %self.instance.conf_file().display(), "Reloading config");

        let context = match Context::create(self.instance.conf_file()) {
            Ok(context) => context,
            Err(e) => {
                tracing::error!(error = %e, "Failed to recreate context");
                metrics::record_reload("context_failed");
                return false;
            }
        };

        let previous = self.instance.replace_context(context);
        match setup_listeners_for_workers(&mut self.instance, true) {
            Ok(report) => {
                tracing::info!(
                    workers = report.workers,
                    migrated = report.migrated,
                    retired = report.retired.workers,
                    "Reload provisioned"
                );
                metrics::record_reload("ok");
                self.flags.request_respawn();
                drop(previous);
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Skipping reload, keeping current generation");
                metrics::record_reload("provision_failed");
                self.instance.replace_context(previous);
                false
            }
        }
    }

    /// Retire the current generation.
    pub fn stop(&mut self) -> ShutdownReport {
        shutdown_workers(mem::take(&mut self.instance.workers))
    }
}
