//! Single-process mode: no master/worker split, no channel, no migration.

use std::time::Duration;

use crate::lifecycle::ControlFlags;
use crate::process::instance::Instance;
use crate::process::{worker, ProcessError};

/// Bind the instance's own listeners and serve them in place until quit.
pub fn run_single_process(mut instance: Instance, flags: &ControlFlags) -> Result<(), ProcessError> {
    instance.context_mut().bind_listeners()?;

    let grace = Duration::from_secs(instance.context().config().global.shutdown_timeout_secs);
    let (context, _) = instance.into_parts();

    tracing::info!("Running in single-process mode");
    worker::serve(context, None, grace, flags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PoolConfig, ProxyConfig};
    use crate::process::context::Context;
    use std::sync::Arc;

    #[test]
    fn bind_failure_is_returned() {
        let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let config = ProxyConfig {
            pools: vec![PoolConfig::new("cache", blocker.local_addr().unwrap().to_string())],
            ..ProxyConfig::default()
        };
        let instance = Instance::master("proxy.toml", Context::from_config(Arc::new(config)));

        let err = run_single_process(instance, &ControlFlags::new()).unwrap_err();
        assert!(matches!(err, ProcessError::Listener(_)));
    }

    #[test]
    fn returns_once_quit_is_requested() {
        let config = ProxyConfig {
            pools: vec![PoolConfig::new("cache", "127.0.0.1:0")],
            ..ProxyConfig::default()
        };
        let instance = Instance::master("proxy.toml", Context::from_config(Arc::new(config)));
        let flags = ControlFlags::new();
        flags.request_quit();

        run_single_process(instance, &flags).unwrap();
    }
}
