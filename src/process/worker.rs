//! Worker runtime.
//!
//! # Responsibilities
//! - Start from a clean signal mask and a private single-threaded tokio runtime
//! - Register inherited listeners and the channel with the event loop
//! - Relay connections until Quit, then drain and exit
//!
//! # Design Decisions
//! - One iteration waits for exactly one event (accept, message, or signal)
//! - Channel EOF means the master is gone and is handled like Quit
//! - After quit the listeners close first, then in-flight relays get a bounded grace period

use std::io;
use std::net::SocketAddr;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::time::Duration;

use futures_util::future::select_all;
use tokio::net::TcpStream;
use tokio::signal::unix::{signal, Signal, SignalKind};

use crate::lifecycle::signals::clear_signal_mask;
use crate::lifecycle::ControlFlags;
use crate::net::connection::ConnectionTracker;
use crate::net::relay::PoolRelay;
use crate::observability::metrics;
use crate::process::channel::{ChannelError, ChannelMessage, ChannelReader, Command};
use crate::process::context::Context;
use crate::process::instance::{Instance, Role};
use crate::process::ProcessError;

/// Entry point of a forked worker. Returns the process exit code.
///
/// # Panics
/// If `instance` is not a worker.
pub fn run(index: usize, instance: Instance, flags: &ControlFlags) -> i32 {
    assert_eq!(instance.role(), Role::Worker, "worker runtime started for a non-worker");

    let pid = nix::unistd::getpid();
    let span = tracing::info_span!("worker", index, pid = %pid);
    let _enter = span.enter();

    if let Err(e) = clear_signal_mask() {
        tracing::error!(error = %e, "Failed to clear signal mask");
        return 1;
    }

    let grace = Duration::from_secs(instance.context().config().global.shutdown_timeout_secs);
    let (context, channel) = instance.into_parts();
    let channel = channel.and_then(|mut c| c.take_worker_end());

    match serve(context, channel, grace, flags) {
        Ok(()) => {
            tracing::warn!(quit = flags.quit_requested(), "Worker terminated");
            0
        }
        Err(e) => {
            tracing::error!(error = %e, "Worker failed");
            1
        }
    }
}

/// Build a current-thread runtime and drive `context` until quit.
pub(crate) fn serve(
    context: Context,
    channel: Option<StdUnixStream>,
    grace: Duration,
    flags: &ControlFlags,
) -> Result<(), ProcessError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(ProcessError::Runtime)?;

    runtime.block_on(async move {
        let mut worker = WorkerRuntime::init(context, channel)?;
        worker.run(flags).await?;
        worker.drain(grace).await;
        Ok::<(), ProcessError>(())
    })
}

/// Pause after a failed accept (e.g. EMFILE) before polling the listeners again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

enum Event {
    Accepted(io::Result<(usize, TcpStream, SocketAddr)>),
    Message(Result<Option<ChannelMessage>, ChannelError>),
    Terminate(&'static str),
    Hangup,
}

/// Serving state of one worker inside its tokio runtime.
pub struct WorkerRuntime {
    relays: Vec<PoolRelay>,
    channel: Option<ChannelReader>,
    tracker: ConnectionTracker,
    sigterm: Signal,
    sigint: Signal,
    sighup: Signal,
}

impl WorkerRuntime {
    /// Register the context's listeners and the channel with the current runtime.
    pub fn init(mut context: Context, channel: Option<StdUnixStream>) -> Result<Self, ProcessError> {
        let mut relays = Vec::new();
        for pool in context.pools_mut() {
            let Some(resource) = pool.take_listener() else {
                continue;
            };
            let listener = resource.into_tokio().map_err(ProcessError::Runtime)?;
            relays.push(PoolRelay::new(pool.config(), listener));
        }

        let channel = match channel {
            Some(stream) => Some(ChannelReader::from_std(stream).map_err(ProcessError::Runtime)?),
            None => None,
        };

        for relay in &relays {
            if let Ok(addr) = relay.local_addr() {
                tracing::info!(pool = %relay.name(), address = %addr, "Serving");
            }
        }

        Ok(Self {
            relays,
            channel,
            tracker: ConnectionTracker::new(),
            sigterm: signal(SignalKind::terminate()).map_err(ProcessError::Runtime)?,
            sigint: signal(SignalKind::interrupt()).map_err(ProcessError::Runtime)?,
            sighup: signal(SignalKind::hangup()).map_err(ProcessError::Runtime)?,
        })
    }

    /// Iterate until the quit flag is set or an iteration fails.
    pub async fn run(&mut self, flags: &ControlFlags) -> Result<(), ProcessError> {
        while !flags.quit_requested() {
            self.drive_once(flags).await?;
        }
        Ok(())
    }

    /// Wait for and handle one event.
    pub async fn drive_once(&mut self, flags: &ControlFlags) -> Result<(), ProcessError> {
        let event = tokio::select! {
            accepted = accept_any(&self.relays) => Event::Accepted(accepted),
            message = next_message(&mut self.channel) => Event::Message(message),
            _ = self.sigterm.recv() => Event::Terminate("SIGTERM"),
            _ = self.sigint.recv() => Event::Terminate("SIGINT"),
            _ = self.sighup.recv() => Event::Hangup,
        };

        match event {
            Event::Accepted(Ok((index, stream, peer))) => {
                let relay = &self.relays[index];
                tracing::debug!(pool = %relay.name(), peer = %peer, "Connection accepted");
                metrics::record_connection_accepted(relay.name());
                relay.spawn_relay(stream, peer, self.tracker.track());
            }
            Event::Accepted(Err(e)) => {
                accept_failed(&e).await;
            }
            Event::Message(Ok(Some(msg))) => match msg.command {
                Command::Quit => {
                    tracing::info!("Quit command received");
                    flags.request_quit();
                }
            },
            Event::Message(Ok(None)) => {
                tracing::warn!("Channel closed by master, quitting");
                self.channel = None;
                flags.request_quit();
            }
            Event::Message(Err(ChannelError::UnknownCommand(op))) => {
                tracing::warn!(opcode = op, "Ignoring unknown command");
            }
            Event::Message(Err(e)) => return Err(e.into()),
            Event::Terminate(name) => {
                tracing::info!(signal = name, "Quit requested");
                flags.request_quit();
            }
            Event::Hangup => {
                tracing::debug!("SIGHUP ignored in worker; reload is driven by the master");
            }
        }
        Ok(())
    }

    /// Stop accepting, then wait up to `grace` for relayed connections to finish.
    pub async fn drain(self, grace: Duration) {
        drop(self.relays);
        let active = self.tracker.active_count();
        if active == 0 {
            return;
        }
        tracing::info!(active, grace_secs = grace.as_secs(), "Draining connections");
        if tokio::time::timeout(grace, self.tracker.wait_idle()).await.is_err() {
            tracing::warn!(
                active = self.tracker.active_count(),
                "Grace period expired, dropping remaining connections"
            );
        }
    }

    pub fn listener_count(&self) -> usize {
        self.relays.len()
    }
}

async fn accept_any(relays: &[PoolRelay]) -> io::Result<(usize, TcpStream, SocketAddr)> {
    if relays.is_empty() {
        return std::future::pending().await;
    }
    let accepts = relays.iter().enumerate().map(|(i, relay)| {
        Box::pin(async move {
            let (stream, peer) = relay.accept().await?;
            Ok::<_, io::Error>((i, stream, peer))
        })
    });
    let (accepted, _, _) = select_all(accepts).await;
    accepted
}

async fn accept_failed(error: &io::Error) {
    tracing::warn!(error = %error, "Accept failed");
    tokio::time::sleep(ACCEPT_BACKOFF).await;
}

async fn next_message(channel: &mut Option<ChannelReader>) -> Result<Option<ChannelMessage>, ChannelError> {
    match channel {
        Some(reader) => reader.next_message().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PoolConfig, ProxyConfig};
    use crate::process::channel::Channel;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn bound_context() -> Context {
        let config = ProxyConfig {
            pools: vec![PoolConfig::new("cache", "127.0.0.1:0")],
            ..ProxyConfig::default()
        };
        let mut ctx = Context::from_config(Arc::new(config));
        ctx.bind_listeners().unwrap();
        ctx
    }

    #[tokio::test]
    async fn quit_message_sets_flag() {
        let flags = ControlFlags::new();
        let mut channel = Channel::open().unwrap();
        let mut worker = WorkerRuntime::init(bound_context(), channel.take_worker_end()).unwrap();
        assert_eq!(worker.listener_count(), 1);

        channel.send(&ChannelMessage::quit()).unwrap();
        worker.run(&flags).await.unwrap();

        assert!(flags.quit_requested());
        worker.drain(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn master_hangup_is_treated_as_quit() {
        let flags = ControlFlags::new();
        let mut channel = Channel::open().unwrap();
        let mut worker = WorkerRuntime::init(bound_context(), channel.take_worker_end()).unwrap();

        drop(channel);
        worker.run(&flags).await.unwrap();
        assert!(flags.quit_requested());
    }

    #[tokio::test]
    async fn unknown_command_is_ignored() {
        let flags = ControlFlags::new();
        let (master_end, worker_end) = StdUnixStream::pair().unwrap();
        let mut worker = WorkerRuntime::init(bound_context(), Some(worker_end)).unwrap();

        master_end.set_nonblocking(true).unwrap();
        let mut master_end = tokio::net::UnixStream::from_std(master_end).unwrap();
        master_end.write_all(&42u32.to_le_bytes()).await.unwrap();

        worker.drive_once(&flags).await.unwrap();
        assert!(!flags.quit_requested());
    }

    #[tokio::test]
    async fn accepted_connection_is_relayed_and_closed_without_servers() {
        let flags = ControlFlags::new();
        let ctx = bound_context();
        let addr = ctx.pools()[0].listener().unwrap().local_addr();
        let mut worker = WorkerRuntime::init(ctx, None).unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        worker.drive_once(&flags).await.unwrap();

        let mut buf = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read, 0);
        assert!(!flags.quit_requested());
    }

    #[tokio::test]
    async fn failed_accept_backs_off() {
        let started = std::time::Instant::now();
        accept_failed(&io::Error::from_raw_os_error(nix::libc::EMFILE)).await;
        assert!(started.elapsed() >= ACCEPT_BACKOFF);
    }
}
