//! Retiring a worker generation.
//!
//! Each worker is sent one Quit over its channel, the channel is closed, and the
//! worker's context is destroyed, closing every socket it did not hand on.
//! Delivery is best effort: a failed send is logged, and nothing waits for the
//! worker to exit. Exit statuses are collected by the master's SIGCHLD reaper.

use crate::observability::metrics;
use crate::process::channel::ChannelMessage;
use crate::process::instance::Instance;

/// Outcome of one `shutdown_workers` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Workers retired.
    pub workers: usize,
    /// Quit messages delivered.
    pub notified: usize,
    /// Quit messages that could not be written.
    pub failed: usize,
}

/// Notify and release every worker in `workers`, in order.
pub fn shutdown_workers(workers: Vec<Instance>) -> ShutdownReport {
    let mut report = ShutdownReport::default();

    for (i, worker) in workers.into_iter().enumerate() {
        let pid = worker.pid();
        let (mut context, channel) = worker.into_parts();

        match channel {
            Some(mut channel) => match channel.send(&ChannelMessage::quit()) {
                Ok(_) => {
                    tracing::info!(worker = i, pid = ?pid, "Quit sent");
                    report.notified += 1;
                }
                Err(e) => {
                    tracing::error!(worker = i, pid = ?pid, error = %e, "Failed to send quit message");
                    report.failed += 1;
                }
            },
            None => tracing::debug!(worker = i, "Worker was never spawned"),
        }

        context.close_listeners();
        report.workers += 1;
        metrics::record_worker_retired();
    }

    report
}
