// src/core/transport/mod.rs

//! Transport plumbing: the stream type, dialers and TLS material.

pub mod dialer;
pub mod stream;
pub mod tls;

pub use dialer::{DEFAULT_PORT, Dialer, HostProvider, RoundRobinHosts, parse_servers, server_host};
pub use stream::TransportStream;
pub use tls::TlsMaterial;
