//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (worker count, backlog)
//! - Check that every address parses
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Two pools sharing a listen address is tolerated (warned, not rejected)

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ProxyConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("worker_processes must be at least 1")]
    NoWorkers,

    #[error("at least one pool must be configured")]
    NoPools,

    #[error("pool #{0} has an empty name")]
    EmptyPoolName(usize),

    #[error("pool name '{0}' is used more than once")]
    DuplicatePoolName(String),

    #[error("pool '{pool}' has invalid listen address '{addr}'")]
    InvalidListen { pool: String, addr: String },

    #[error("pool '{pool}' has invalid server address '{addr}'")]
    InvalidServer { pool: String, addr: String },

    #[error("pool '{0}' backlog must be positive")]
    InvalidBacklog(String),
}

/// Check a parsed configuration, collecting every error found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.global.worker_processes == 0 {
        errors.push(ValidationError::NoWorkers);
    }
    if config.pools.is_empty() {
        errors.push(ValidationError::NoPools);
    }

    let mut names = HashSet::new();
    let mut listens = HashSet::new();
    for (i, pool) in config.pools.iter().enumerate() {
        if pool.name.is_empty() {
            errors.push(ValidationError::EmptyPoolName(i));
        } else if !names.insert(pool.name.as_str()) {
            errors.push(ValidationError::DuplicatePoolName(pool.name.clone()));
        }

        if pool.listen.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::InvalidListen {
                pool: pool.name.clone(),
                addr: pool.listen.clone(),
            });
        } else if !listens.insert(pool.listen.as_str()) {
            tracing::warn!(
                pool = %pool.name,
                listen = %pool.listen,
                "Listen address shared by several pools; only one will inherit its socket on reload"
            );
        }

        for server in &pool.servers {
            if server.parse::<SocketAddr>().is_err() {
                errors.push(ValidationError::InvalidServer {
                    pool: pool.name.clone(),
                    addr: server.clone(),
                });
            }
        }

        if pool.backlog <= 0 {
            errors.push(ValidationError::InvalidBacklog(pool.name.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
