//! Worker provisioning: one fresh worker instance per configured process, each
//! with its own listening sockets, inherited from the previous generation where
//! the address is unchanged.

use std::mem;

use crate::observability::metrics;
use crate::process::instance::Instance;
use crate::process::migration::{move_listeners, return_listeners, ListenerMove};
use crate::process::shutdown::{shutdown_workers, ShutdownReport};
use crate::process::ProcessError;

/// Outcome of one successful provisioning pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    /// Workers in the new generation.
    pub workers: usize,
    /// Worker slots that had an old worker to inherit from.
    pub migration_attempts: usize,
    /// Sockets inherited across all slots.
    pub migrated: usize,
    /// Address matches skipped because the new pool already held a socket.
    pub migration_conflicts: usize,
    /// Old workers with no slot in the new generation.
    pub retired_without_target: usize,
    /// Result of retiring the old generation.
    pub retired: ShutdownReport,
}

/// Build the master's worker array for the current context.
///
/// On reload, worker `i` inherits matching sockets from old worker `i` before
/// binding the rest, and the old generation is retired once every new worker
/// is ready. On failure the master's worker array is left exactly as it was.
pub fn setup_listeners_for_workers(
    master: &mut Instance,
    reloading: bool,
) -> Result<ProvisionReport, ProcessError> {
    debug_assert!(reloading || master.workers.is_empty());

    let n = master.context().worker_processes();
    let mut old_workers = if reloading {
        mem::take(&mut master.workers)
    } else {
        Vec::new()
    };

    let mut report = ProvisionReport {
        workers: n,
        retired_without_target: old_workers.len().saturating_sub(n),
        ..ProvisionReport::default()
    };
    let mut workers: Vec<Instance> = Vec::with_capacity(n);
    let mut moves: Vec<Vec<ListenerMove>> = Vec::with_capacity(n);

    for i in 0..n {
        let mut worker = master.clone_as_worker();

        let mut inherited = Vec::new();
        if let Some(old) = old_workers.get_mut(i) {
            let migration = move_listeners(worker.context_mut(), old.context_mut());
            report.migration_attempts += 1;
            report.migrated += migration.migrated;
            report.migration_conflicts += migration.conflicts;
            inherited = migration.moves;
        }
        moves.push(inherited);

        let bound = worker.context_mut().bind_listeners();
        workers.push(worker);
        if let Err(e) = bound {
            tracing::error!(worker = i, error = %e, "Failed to set up listeners");
            return_inherited(&mut workers, &moves, &mut old_workers);
            master.workers = old_workers;
            return Err(e.into());
        }
        tracing::debug!(worker = i, "Worker provisioned");
    }

    master.workers = workers;
    if reloading {
        metrics::record_migration(report.migrated, report.migration_conflicts);
        report.retired = shutdown_workers(old_workers);
    }
    metrics::set_workers(n);
    Ok(report)
}

/// Undo a partial provisioning pass: hand inherited sockets back to the exact
/// pools they came from, then close what was freshly bound.
fn return_inherited(workers: &mut [Instance], moves: &[Vec<ListenerMove>], old_workers: &mut [Instance]) {
    for (i, worker) in workers.iter_mut().enumerate() {
        if let Some(old) = old_workers.get_mut(i) {
            return_listeners(old.context_mut(), worker.context_mut(), &moves[i]);
        }
        worker.context_mut().close_listeners();
    }
}
