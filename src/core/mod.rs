// src/core/mod.rs

//! The session-resilient coordination client and its collaborators.

pub mod auth;
pub mod configurator;
pub mod driver;
pub mod errors;
pub mod manager;
pub mod metrics;
pub mod registry;
pub mod retry;
pub mod session;
pub mod transport;

pub use errors::KeeperError;
pub use manager::ConnectionManager;
pub use registry::ConnectionRegistry;
