//! Control flags and OS signal handling.
//!
//! # Responsibilities
//! - Hold the process-wide control register (reload / respawn / quit / role)
//! - Translate signals into register updates for the master
//! - Reap exited workers on SIGCHLD
//!
//! # Design Decisions
//! - The master blocks its signals and waits for them synchronously; no
//!   handler runs asynchronously and no runtime thread exists before fork
//! - Any other trigger source can implement `Wakeup` and feed the same register
//! - SIGHUP triggers config reload, not shutdown

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use nix::errno::Errno;
use nix::sys::signal::{sigprocmask, SigSet, SigmaskHow, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

use crate::process::instance::Role;

/// Process-wide control register.
///
/// Fork copies it, so every worker starts with the master's values and then
/// diverges; nothing is shared across processes afterwards.
#[derive(Debug)]
pub struct ControlFlags {
    reload: AtomicBool,
    respawn: AtomicBool,
    quit: AtomicBool,
    role: AtomicU8,
}

/// The register of the running process.
pub static CONTROL: ControlFlags = ControlFlags::new();

impl ControlFlags {
    /// Initial state: a respawn is pending so the first cycle spawns workers.
    pub const fn new() -> Self {
        Self {
            reload: AtomicBool::new(false),
            respawn: AtomicBool::new(true),
            quit: AtomicBool::new(false),
            role: AtomicU8::new(Role::Master as u8),
        }
    }

    /// Restore the initial state.
    pub fn reset(&self) {
        self.reload.store(false, Ordering::SeqCst);
        self.respawn.store(true, Ordering::SeqCst);
        self.quit.store(false, Ordering::SeqCst);
        self.role.store(Role::Master as u8, Ordering::SeqCst);
    }

    pub fn request_reload(&self) {
        self.reload.store(true, Ordering::SeqCst);
    }

    /// Read and clear the reload latch.
    pub fn take_reload(&self) -> bool {
        self.reload.swap(false, Ordering::SeqCst)
    }

    pub fn request_respawn(&self) {
        self.respawn.store(true, Ordering::SeqCst);
    }

    /// Read and clear the respawn latch.
    pub fn take_respawn(&self) -> bool {
        self.respawn.swap(false, Ordering::SeqCst)
    }

    pub fn request_quit(&self) {
        self.quit.store(true, Ordering::SeqCst);
    }

    pub fn quit_requested(&self) -> bool {
        self.quit.load(Ordering::SeqCst)
    }

    pub fn role(&self) -> Role {
        Role::from(self.role.load(Ordering::SeqCst))
    }

    pub fn set_role(&self, role: Role) {
        self.role.store(role as u8, Ordering::SeqCst);
    }
}

impl Default for ControlFlags {
    fn default() -> Self {
        Self::new()
    }
}

/// Something the master control loop can block on between iterations.
pub trait Wakeup {
    /// Block until at least one external event arrived and has been applied to `flags`.
    fn wait(&mut self, flags: &ControlFlags) -> io::Result<()>;
}

/// Wake-up source driven by blocked, synchronously awaited signals.
#[derive(Debug)]
pub struct SignalWakeup {
    set: SigSet,
}

impl SignalWakeup {
    /// Block the master's signals on the calling thread.
    ///
    /// Must run before any worker is forked; workers clear the mask themselves.
    pub fn install() -> io::Result<Self> {
        let mut set = SigSet::empty();
        for signal in [
            Signal::SIGHUP,
            Signal::SIGINT,
            Signal::SIGTERM,
            Signal::SIGQUIT,
            Signal::SIGCHLD,
        ] {
            set.add(signal);
        }
        sigprocmask(SigmaskHow::SIG_BLOCK, Some(&set), None).map_err(io::Error::from)?;
        tracing::debug!("Master signal mask installed");
        Ok(Self { set })
    }
}

impl Wakeup for SignalWakeup {
    fn wait(&mut self, flags: &ControlFlags) -> io::Result<()> {
        let signal = self.set.wait().map_err(io::Error::from)?;
        apply_signal(signal, flags);
        Ok(())
    }
}

/// Translate one signal into register updates.
pub fn apply_signal(signal: Signal, flags: &ControlFlags) {
    match signal {
        Signal::SIGHUP => {
            tracing::info!("SIGHUP received, reload requested");
            flags.request_reload();
        }
        Signal::SIGINT | Signal::SIGTERM | Signal::SIGQUIT => {
            tracing::info!(signal = %signal, "Quit requested");
            flags.request_quit();
        }
        Signal::SIGCHLD => {
            reap_children();
        }
        other => tracing::debug!(signal = %other, "Ignoring signal"),
    }
}

/// Collect the exit status of every child that has terminated.
pub fn reap_children() -> usize {
    let mut reaped = 0;
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(pid, code)) => {
                tracing::info!(pid = %pid, exit_code = code, "Worker exited");
                reaped += 1;
            }
            Ok(WaitStatus::Signaled(pid, signal, _)) => {
                tracing::warn!(pid = %pid, signal = %signal, "Worker killed by signal");
                reaped += 1;
            }
            Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => break,
            Ok(_) => continue,
            Err(Errno::EINTR) => continue,
            Err(e) => {
                tracing::error!(error = %e, "waitpid failed");
                break;
            }
        }
    }
    reaped
}

/// Clear the calling thread's signal mask.
pub fn clear_signal_mask() -> io::Result<()> {
    sigprocmask(SigmaskHow::SIG_SETMASK, Some(&SigSet::empty()), None).map_err(io::Error::from)
}
