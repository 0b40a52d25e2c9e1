//! Listening-socket provisioning.
//!
//! # Responsibilities
//! - Bind and listen on a pool's configured address
//! - Allow every worker of a generation to bind the same address (SO_REUSEPORT)
//! - Record which pool currently owns the socket
//!
//! # Design Decisions
//! - Sockets are bound in the master as plain std listeners; event-loop
//!   registration happens later inside the worker that inherits them
//! - Ownership moves between pools by value, never by sharing

use std::io;
use std::net::{SocketAddr, TcpListener};
use std::os::fd::{AsRawFd, RawFd};

use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;

use crate::process::context::PoolId;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The configured address does not parse.
    #[error("invalid listen address '{0}'")]
    Address(String),

    /// Failed to create, bind or listen on the socket.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
}

/// A bound, listening socket plus the pool that owns it.
#[derive(Debug)]
pub struct ListeningResource {
    socket: TcpListener,
    local_addr: SocketAddr,
    owner: PoolId,
}

impl ListeningResource {
    /// Bind `addrstr` with the given backlog on behalf of `owner`.
    pub fn bind(addrstr: &str, backlog: i32, owner: PoolId) -> Result<Self, ListenerError> {
        let addr: SocketAddr = addrstr
            .parse()
            .map_err(|_| ListenerError::Address(addrstr.to_string()))?;

        let bind_err = |source: io::Error| ListenerError::Bind {
            addr: addrstr.to_string(),
            source,
        };

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(bind_err)?;
        socket.set_reuse_address(true).map_err(bind_err)?;
        socket.set_reuse_port(true).map_err(bind_err)?;
        socket.set_nonblocking(true).map_err(bind_err)?;
        socket.bind(&addr.into()).map_err(bind_err)?;
        socket.listen(backlog).map_err(bind_err)?;

        let socket: TcpListener = socket.into();
        let local_addr = socket.local_addr().map_err(bind_err)?;

        tracing::debug!(
            address = %local_addr,
            backlog,
            owner = %owner,
            "Listener bound"
        );

        Ok(Self {
            socket,
            local_addr,
            owner,
        })
    }

    /// The pool currently holding this socket.
    pub fn owner(&self) -> PoolId {
        self.owner
    }

    pub(crate) fn set_owner(&mut self, owner: PoolId) {
        self.owner = owner;
    }

    /// Address the socket is actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Register the socket with the current tokio runtime.
    pub fn into_tokio(self) -> io::Result<tokio::net::TcpListener> {
        tokio::net::TcpListener::from_std(self.socket)
    }
}

impl AsRawFd for ListeningResource {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}
