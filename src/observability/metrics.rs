//! Supervisor metrics.
//!
//! # Metrics
//! - `supervisor_reloads_total` (counter): reload attempts by outcome
//! - `supervisor_listeners_migrated_total` (counter): sockets inherited across reloads
//! - `supervisor_workers_spawned_total` / `supervisor_workers_retired_total` (counters)
//! - `supervisor_workers` (gauge): size of the current generation
//! - `worker_connections_accepted_total` (counter): accepted clients by pool
//!
//! # Design Decisions
//! - Recorded through the `metrics` facade only; no exporter runs in the
//!   master, whose memory every worker inherits

pub fn record_reload(outcome: &'static str) {
    ::metrics::counter!("supervisor_reloads_total", "outcome" => outcome).increment(1);
}

pub fn record_migration(migrated: usize, conflicts: usize) {
    ::metrics::counter!("supervisor_listeners_migrated_total").increment(migrated as u64);
    if conflicts > 0 {
        ::metrics::counter!("supervisor_migration_conflicts_total").increment(conflicts as u64);
    }
}

pub fn record_worker_spawned() {
    ::metrics::counter!("supervisor_workers_spawned_total").increment(1);
}

pub fn record_worker_retired() {
    ::metrics::counter!("supervisor_workers_retired_total").increment(1);
}

pub fn set_workers(count: usize) {
    ::metrics::gauge!("supervisor_workers").set(count as f64);
}

pub fn record_connection_accepted(pool: &str) {
    ::metrics::counter!("worker_connections_accepted_total", "pool" => pool.to_string()).increment(1);
}
