//! Forking worker processes.
//!
//! # Responsibilities
//! - Give every worker a fresh channel
//! - Fork one child per worker, in order
//! - In the child, drop every resource that belongs to another worker
//!
//! # Design Decisions
//! - A fork failure aborts the pass; children already started keep running
//! - The master is single-threaded at fork time, so the child may allocate freely

use nix::unistd::{ForkResult, Pid};

use crate::lifecycle::ControlFlags;
use crate::observability::metrics;
use crate::process::channel::Channel;
use crate::process::instance::{Instance, Role};
use crate::process::{worker, ProcessError};

/// Which side of a fork the caller is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forked {
    Parent(Pid),
    Child,
}

/// Process duplication.
pub trait Fork {
    fn fork(&mut self) -> nix::Result<Forked>;
}

/// `fork(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsFork;

impl Fork for OsFork {
    fn fork(&mut self) -> nix::Result<Forked> {
        // SAFETY: the master never starts threads (no runtime, no exporter), so
        // the child is a complete copy with no lock held by a vanished thread.
        match unsafe { nix::unistd::fork() }? {
            ForkResult::Parent { child } => Ok(Forked::Parent(child)),
            ForkResult::Child => Ok(Forked::Child),
        }
    }
}

/// Fork one process per worker. Returns the number started.
///
/// In a child this never returns: the child runs its worker loop and exits.
///
/// # Panics
/// If `workers` is empty.
pub fn spawn_workers<F: Fork>(
    workers: &mut Vec<Instance>,
    forker: &mut F,
    flags: &ControlFlags,
) -> Result<usize, ProcessError> {
    assert!(!workers.is_empty(), "no workers to spawn");

    for i in 0..workers.len() {
        workers[i].channel = Some(Channel::open()?);

        match forker.fork() {
            Err(e) => {
                tracing::error!(worker = i, error = %e, "Failed to spawn worker");
                return Err(ProcessError::Fork(e));
            }
            Ok(Forked::Child) => {
                flags.set_role(Role::Worker);
                let worker = detach_worker(workers, i);
                let code = worker::run(i, worker, flags);
                std::process::exit(code);
            }
            Ok(Forked::Parent(pid)) => {
                let worker = &mut workers[i];
                worker.set_pid(pid);
                if let Some(channel) = worker.channel.as_mut() {
                    channel.close_worker_end();
                }
                tracing::info!(worker = i, pid = %pid, "Worker started");
                metrics::record_worker_spawned();
            }
        }
    }

    Ok(workers.len())
}

/// Release, in a freshly forked child, everything owned by the other workers:
/// their listening sockets and both ends of their channels. The child keeps
/// only the worker end of its own channel.
pub fn prune_foreign_resources(workers: &mut [Instance], own: usize) {
    for (i, worker) in workers.iter_mut().enumerate() {
        if i == own {
            if let Some(channel) = worker.channel.as_mut() {
                channel.close_master_end();
            }
            continue;
        }
        worker.context_mut().close_listeners();
        worker.channel = None;
    }
}

fn detach_worker(workers: &mut Vec<Instance>, own: usize) -> Instance {
    prune_foreign_resources(workers, own);
    let mut worker = workers.swap_remove(own);
    worker.set_pid(nix::unistd::getpid());
    workers.clear();
    worker
}
