//! Per-generation context: the configuration snapshot and its proxy pools.
//!
//! A `Context` is rebuilt from scratch on every reload. Its pools start without
//! listening sockets; a pool gets one either by binding (`bind_listeners`) or by
//! inheriting it from the previous generation (see `migration`).

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::{load_config, ConfigError, PoolConfig, ProxyConfig};
use crate::net::{ListenerError, ListeningResource};

static CONTEXT_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier of one context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    pub fn new() -> Self {
        Self(CONTEXT_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// Identity of a pool: its context plus its position in that context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolId {
    pub context: ContextId,
    pub index: usize,
}

impl std::fmt::Display for PoolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/pool-{}", self.context, self.index)
    }
}

/// One configured listening endpoint and, once provisioned, its socket.
#[derive(Debug)]
pub struct ServerPool {
    id: PoolId,
    config: PoolConfig,
    listener: Option<ListeningResource>,
}

impl ServerPool {
    fn new(id: PoolId, config: PoolConfig) -> Self {
        Self {
            id,
            config,
            listener: None,
        }
    }

    pub fn id(&self) -> PoolId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Bind address; the key listeners migrate by.
    pub fn addrstr(&self) -> &str {
        &self.config.listen
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn listener(&self) -> Option<&ListeningResource> {
        self.listener.as_ref()
    }

    pub fn has_listener(&self) -> bool {
        self.listener.is_some()
    }

    /// Detach the socket, leaving the pool empty.
    pub fn take_listener(&mut self) -> Option<ListeningResource> {
        self.listener.take()
    }

    /// Adopt a socket, re-pointing its owner at this pool.
    ///
    /// Returns the socket back if the pool already holds one.
    pub fn install_listener(&mut self, mut resource: ListeningResource) -> Result<(), ListeningResource> {
        if self.listener.is_some() {
            return Err(resource);
        }
        resource.set_owner(self.id);
        self.listener = Some(resource);
        Ok(())
    }

    /// Close the socket if one is held.
    pub fn close_listener(&mut self) {
        if let Some(resource) = self.listener.take() {
            tracing::debug!(
                pool = %self.config.name,
                address = %resource.local_addr(),
                "Closing listener"
            );
        }
    }
}

/// One configuration generation.
#[derive(Debug)]
pub struct Context {
    id: ContextId,
    config: Arc<ProxyConfig>,
    pools: Vec<ServerPool>,
}

impl Context {
    /// Load the configuration file and build a fresh context from it.
    pub fn create(conf_file: &Path) -> Result<Self, ConfigError> {
        let config = load_config(conf_file)?;
        Ok(Self::from_config(Arc::new(config)))
    }

    /// Build a fresh context, with no sockets bound, from a loaded configuration.
    pub fn from_config(config: Arc<ProxyConfig>) -> Self {
        let id = ContextId::new();
        let pools = config
            .pools
            .iter()
            .cloned()
            .enumerate()
            .map(|(index, pool)| ServerPool::new(PoolId { context: id, index }, pool))
            .collect();

        Self { id, config, pools }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn config(&self) -> &Arc<ProxyConfig> {
        &self.config
    }

    pub fn worker_processes(&self) -> usize {
        self.config.global.worker_processes
    }

    pub fn pools(&self) -> &[ServerPool] {
        &self.pools
    }

    pub fn pools_mut(&mut self) -> &mut [ServerPool] {
        &mut self.pools
    }

    /// Number of pools currently holding a socket.
    pub fn listener_count(&self) -> usize {
        self.pools.iter().filter(|p| p.has_listener()).count()
    }

    /// Bind every pool that does not hold a socket yet.
    ///
    /// Pools that inherited a socket are skipped. Returns how many were bound.
    pub fn bind_listeners(&mut self) -> Result<usize, ListenerError> {
        let mut bound = 0;
        for pool in self.pools.iter_mut().filter(|p| !p.has_listener()) {
            let resource = ListeningResource::bind(&pool.config.listen, pool.config.backlog, pool.id)?;
            tracing::info!(
                pool = %pool.config.name,
                address = %resource.local_addr(),
                "Listening"
            );
            pool.listener = Some(resource);
            bound += 1;
        }
        Ok(bound)
    }

    /// Close every socket this context still owns.
    pub fn close_listeners(&mut self) {
        for pool in &mut self.pools {
            pool.close_listener();
        }
    }
}
