//! Shared utilities for the supervisor integration tests.

#![allow(dead_code)]

use std::cell::Cell;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use nix::errno::Errno;
use nix::unistd::Pid;
use proxy_supervisor::lifecycle::{ControlFlags, Wakeup};
use proxy_supervisor::process::{Context, Fork, Forked, Instance};

/// A configuration file in its own temporary directory.
pub struct ConfFile {
    _dir: tempfile::TempDir,
    path: PathBuf,
}

impl ConfFile {
    pub fn new(workers: usize, pools: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxy.toml");
        let conf = Self { _dir: dir, path };
        conf.rewrite(workers, pools);
        conf
    }

    pub fn rewrite(&self, workers: usize, pools: &[(&str, &str)]) {
        std::fs::write(&self.path, render(workers, pools)).unwrap();
    }

    pub fn write_raw(&self, contents: &str) {
        std::fs::write(&self.path, contents).unwrap();
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn master(&self) -> Instance {
        Instance::master(&self.path, Context::create(&self.path).unwrap())
    }
}

pub fn render(workers: usize, pools: &[(&str, &str)]) -> String {
    let mut out = format!("[global]\nworker_processes = {workers}\nshutdown_timeout_secs = 1\n");
    for (name, listen) in pools {
        out.push_str(&format!("\n[[pools]]\nname = \"{name}\"\nlisten = \"{listen}\"\n"));
    }
    out
}

/// Fake fork: always the parent, fake pids, optional failure on the n-th call.
#[derive(Clone)]
pub struct ScriptedFork {
    pub calls: Rc<Cell<usize>>,
    pub fail_on: Option<usize>,
}

impl ScriptedFork {
    pub fn new() -> Self {
        Self { calls: Rc::new(Cell::new(0)), fail_on: None }
    }

    pub fn failing_on(call: usize) -> Self {
        Self { calls: Rc::new(Cell::new(0)), fail_on: Some(call) }
    }
}

impl Fork for ScriptedFork {
    fn fork(&mut self) -> nix::Result<Forked> {
        let n = self.calls.get() + 1;
        self.calls.set(n);
        if self.fail_on == Some(n) {
            return Err(Errno::EAGAIN);
        }
        Ok(Forked::Parent(Pid::from_raw(30_000 + n as i32)))
    }
}

/// Wake-up source that replays a fixed list of register updates, then fails.
pub struct ScriptedWakeup(pub Vec<fn(&ControlFlags)>);

impl Wakeup for ScriptedWakeup {
    fn wait(&mut self, flags: &ControlFlags) -> io::Result<()> {
        if self.0.is_empty() {
            return Err(io::Error::new(io::ErrorKind::Other, "no more wake-ups"));
        }
        let action = self.0.remove(0);
        action(flags);
        Ok(())
    }
}

/// Raw fds of every worker, per pool.
pub fn listener_fds(master: &Instance) -> Vec<Vec<Option<i32>>> {
    use std::os::fd::AsRawFd;
    master
        .workers()
        .iter()
        .map(|w| {
            w.context()
                .pools()
                .iter()
                .map(|p| p.listener().map(|l| l.as_raw_fd()))
                .collect()
        })
        .collect()
}
