//! Master/worker process supervisor for a TCP proxy.

pub mod config;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod process;

pub use config::schema::ProxyConfig;
pub use lifecycle::{ControlFlags, CONTROL};
pub use process::{Instance, Master};
