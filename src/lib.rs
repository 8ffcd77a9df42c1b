// src/lib.rs

pub mod config;
pub mod core;

// Re-export
pub use crate::config::{ClientConfig, RetryConfig, TlsConfig};
pub use crate::core::driver::{Acl, Connector, CreateFlags, DriverSession, SessionState, Stat};
pub use crate::core::{ConnectionManager, ConnectionRegistry, KeeperError};
pub use tokio_util::sync::CancellationToken;
