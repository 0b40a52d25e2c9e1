//! Master ↔ worker command channel.
//!
//! # Wire Format
//! ```text
//! +---------------------+
//! | command (u32, LE)   |   MESSAGE_LEN = 4 bytes, one record per command
//! +---------------------+
//! ```
//!
//! # Design Decisions
//! - Connected Unix socket pair; the master keeps one end, the worker the other
//! - Fixed-size records so a reader never needs framing state
//! - Unknown opcodes decode to an error the reader may log and skip

use std::io::{self, Write};
use std::os::unix::net::UnixStream;

use thiserror::Error;
use tokio::io::AsyncReadExt;

/// Size of one encoded message.
pub const MESSAGE_LEN: usize = 4;

/// Error type for channel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("short write: only {written} bytes of the record were sent")]
    ShortWrite { written: usize },

    #[error("unknown command opcode {0}")]
    UnknownCommand(u32),

    #[error("channel end already closed")]
    Closed,
}

/// Commands the master sends to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Command {
    /// Stop accepting, drain, and exit.
    Quit = 1,
}

impl TryFrom<u32> for Command {
    type Error = ChannelError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Command::Quit),
            other => Err(ChannelError::UnknownCommand(other)),
        }
    }
}

/// One fixed-size channel record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelMessage {
    pub command: Command,
}

impl ChannelMessage {
    pub fn quit() -> Self {
        Self {
            command: Command::Quit,
        }
    }

    pub fn encode(&self) -> [u8; MESSAGE_LEN] {
        (self.command as u32).to_le_bytes()
    }

    pub fn decode(buf: [u8; MESSAGE_LEN]) -> Result<Self, ChannelError> {
        let command = Command::try_from(u32::from_le_bytes(buf))?;
        Ok(Self { command })
    }
}

/// A connected pair of endpoints for one master/worker pair.
#[derive(Debug)]
pub struct Channel {
    master: Option<UnixStream>,
    worker: Option<UnixStream>,
}

impl Channel {
    /// Allocate a new socket pair.
    pub fn open() -> Result<Self, ChannelError> {
        let (master, worker) = UnixStream::pair()?;
        Ok(Self {
            master: Some(master),
            worker: Some(worker),
        })
    }

    /// Write one message from the master end. Returns the bytes written.
    pub fn send(&mut self, msg: &ChannelMessage) -> Result<usize, ChannelError> {
        let stream = self.master.as_mut().ok_or(ChannelError::Closed)?;
        let written = stream.write(&msg.encode())?;
        if written != MESSAGE_LEN {
            return Err(ChannelError::ShortWrite { written });
        }
        Ok(written)
    }

    /// Give the worker end to the caller (the worker runtime).
    pub fn take_worker_end(&mut self) -> Option<UnixStream> {
        self.worker.take()
    }

    /// Drop the parent's copy of the worker end after fork.
    pub fn close_worker_end(&mut self) {
        self.worker = None;
    }

    /// Drop the child's copy of the master end after fork.
    pub fn close_master_end(&mut self) {
        self.master = None;
    }
}

/// Worker end of a channel, registered with the worker's runtime.
///
/// Bytes of a partly received record are kept across calls, so
/// `next_message` may be cancelled (e.g. by losing a `select!`) without
/// breaking the record framing.
#[derive(Debug)]
pub struct ChannelReader {
    stream: tokio::net::UnixStream,
    buf: [u8; MESSAGE_LEN],
    filled: usize,
}

impl ChannelReader {
    pub fn new(stream: tokio::net::UnixStream) -> Self {
        Self {
            stream,
            buf: [0u8; MESSAGE_LEN],
            filled: 0,
        }
    }

    /// Register a std stream with the current tokio runtime.
    pub fn from_std(stream: UnixStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(Self::new(tokio::net::UnixStream::from_std(stream)?))
    }

    /// Read the next complete message.
    ///
    /// Returns `Ok(None)` once the master end is closed.
    pub async fn next_message(&mut self) -> Result<Option<ChannelMessage>, ChannelError> {
        while self.filled < MESSAGE_LEN {
            let read = self.stream.read(&mut self.buf[self.filled..]).await?;
            if read == 0 {
                if self.filled > 0 {
                    tracing::warn!(pending = self.filled, "Channel closed mid-record");
                }
                return Ok(None);
            }
            self.filled += read;
        }
        self.filled = 0;
        ChannelMessage::decode(self.buf).map(Some)
    }
}
