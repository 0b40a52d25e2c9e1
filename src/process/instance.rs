//! Per-process descriptor.

use std::path::{Path, PathBuf};

use nix::unistd::Pid;

use crate::process::channel::Channel;
use crate::process::context::Context;

/// Which side of the supervision tree a process is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Role {
    Master = 0,
    Worker = 1,
}

impl From<u8> for Role {
    fn from(val: u8) -> Self {
        match val {
            1 => Role::Worker,
            _ => Role::Master,
        }
    }
}

/// One supervised process: the master, or one of its workers.
///
/// Only the master has `workers`; only a spawned worker has a `channel`.
#[derive(Debug)]
pub struct Instance {
    role: Role,
    pid: Option<Pid>,
    conf_file: PathBuf,
    context: Context,
    pub(crate) channel: Option<Channel>,
    pub(crate) workers: Vec<Instance>,
}

impl Instance {
    /// The master instance, owning the context loaded at startup.
    pub fn master(conf_file: impl Into<PathBuf>, context: Context) -> Self {
        Self {
            role: Role::Master,
            pid: Some(nix::unistd::getpid()),
            conf_file: conf_file.into(),
            context,
            channel: None,
            workers: Vec::new(),
        }
    }

    /// Clone this instance into a worker with a fresh context built from the
    /// same configuration snapshot.
    pub fn clone_as_worker(&self) -> Self {
        Self {
            role: Role::Worker,
            pid: None,
            conf_file: self.conf_file.clone(),
            context: Context::from_config(self.context.config().clone()),
            channel: None,
            workers: Vec::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn pid(&self) -> Option<Pid> {
        self.pid
    }

    pub(crate) fn set_pid(&mut self, pid: Pid) {
        self.pid = Some(pid);
    }

    pub fn conf_file(&self) -> &Path {
        &self.conf_file
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    /// Install a new context, returning the one it replaces.
    pub fn replace_context(&mut self, context: Context) -> Context {
        std::mem::replace(&mut self.context, context)
    }

    pub fn channel(&self) -> Option<&Channel> {
        self.channel.as_ref()
    }

    pub fn workers(&self) -> &[Instance] {
        &self.workers
    }

    pub fn workers_mut(&mut self) -> &mut [Instance] {
        &mut self.workers
    }

    /// Split a worker into its parts, consuming it.
    pub(crate) fn into_parts(self) -> (Context, Option<Channel>) {
        (self.context, self.channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PoolConfig, ProxyConfig};
    use std::sync::Arc;

    fn master() -> Instance {
        let config = ProxyConfig {
            pools: vec![PoolConfig::new("cache", "127.0.0.1:0")],
            ..ProxyConfig::default()
        };
        Instance::master("proxy.toml", Context::from_config(Arc::new(config)))
    }

    #[test]
    fn worker_clone_gets_fresh_context() {
        let master = master();
        let worker = master.clone_as_worker();

        assert_eq!(worker.role(), Role::Worker);
        assert!(worker.workers().is_empty());
        assert!(worker.pid().is_none());
        assert_ne!(worker.context().id(), master.context().id());
        assert!(Arc::ptr_eq(worker.context().config(), master.context().config()));
        assert_eq!(worker.conf_file(), master.conf_file());
    }

    #[test]
    fn role_from_raw() {
        assert_eq!(Role::from(Role::Worker as u8), Role::Worker);
        assert_eq!(Role::from(Role::Master as u8), Role::Master);
    }
}
