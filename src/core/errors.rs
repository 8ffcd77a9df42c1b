// src/core/errors.rs

//! Defines the error type shared by the client, its transport layer and the drivers.

use std::sync::Arc;
use thiserror::Error;

/// Every failure the coordination client can surface.
///
/// The enum is `Clone` so a fault observed in one attempt can be kept as the cause
/// of a later `RetriesExhausted`. `std::io::Error` is not cloneable, so it is held
/// behind an `Arc`.
#[derive(Error, Debug, Clone)]
pub enum KeeperError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Dial failed: {0}")]
    Dial(String),

    #[error("Dial timed out after {0:?}")]
    DialTimeout(std::time::Duration),

    #[error("Authentication failed during session establishment")]
    AuthFailed,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("max retries number reached ({attempts} attempts): {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<KeeperError>,
    },

    // --- Driver answers ---
    /// The session behind the handle has been torn down.
    #[error("zk: connection closed")]
    SessionClosed,

    #[error("zk: connection loss")]
    ConnectionLoss,

    #[error("zk: operation timed out")]
    Timeout,

    #[error("zk: node does not exist: {0}")]
    NoNode(String),

    #[error("zk: node already exists: {0}")]
    NodeExists(String),

    #[error("zk: version conflict on {0}")]
    BadVersion(String),

    #[error("zk: node has children: {0}")]
    NotEmpty(String),

    #[error("zk: not authenticated")]
    NoAuth,

    #[error("zk: invalid ACL specified")]
    InvalidAcl,

    #[error("zk: invalid path: {0}")]
    InvalidPath(String),

    #[error("zk: ephemeral nodes may not have children: {0}")]
    NoChildrenForEphemerals(String),

    #[error("zk: {0}")]
    Driver(String),
}

impl KeeperError {
    /// True for the distinguished fault returned by an operation on a torn-down session.
    pub fn is_session_closed(&self) -> bool {
        matches!(self, KeeperError::SessionClosed)
    }

    /// Answers from the ensemble that no amount of retrying will change.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            KeeperError::NoNode(_)
                | KeeperError::NodeExists(_)
                | KeeperError::BadVersion(_)
                | KeeperError::NotEmpty(_)
                | KeeperError::NoAuth
                | KeeperError::InvalidAcl
                | KeeperError::InvalidPath(_)
                | KeeperError::NoChildrenForEphemerals(_)
        )
    }

    /// Faults raised while building the client. These are never retried.
    pub fn is_config(&self) -> bool {
        matches!(self, KeeperError::Config(_) | KeeperError::Tls(_))
    }

    /// Whether the retry loop may try again after this fault.
    ///
    /// `fail_fast_on_permanent` decides how driver answers such as `NoNode` are
    /// treated; with it unset every non-terminal fault is retried.
    pub fn is_retryable(&self, fail_fast_on_permanent: bool) -> bool {
        match self {
            KeeperError::Cancelled => false,
            KeeperError::RetriesExhausted { .. } => false,
            e if e.is_config() => false,
            e if e.is_permanent() => !fail_fast_on_permanent,
            _ => true,
        }
    }
}

impl PartialEq for KeeperError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (KeeperError::Io(e1), KeeperError::Io(e2)) => e1.kind() == e2.kind(),
            (KeeperError::Config(s1), KeeperError::Config(s2)) => s1 == s2,
            (KeeperError::Tls(s1), KeeperError::Tls(s2)) => s1 == s2,
            (KeeperError::Dial(s1), KeeperError::Dial(s2)) => s1 == s2,
            (KeeperError::DialTimeout(d1), KeeperError::DialTimeout(d2)) => d1 == d2,
            (
                KeeperError::RetriesExhausted {
                    attempts: a1,
                    source: s1,
                },
                KeeperError::RetriesExhausted {
                    attempts: a2,
                    source: s2,
                },
            ) => a1 == a2 && s1 == s2,
            (KeeperError::NoNode(p1), KeeperError::NoNode(p2)) => p1 == p2,
            (KeeperError::NodeExists(p1), KeeperError::NodeExists(p2)) => p1 == p2,
            (KeeperError::BadVersion(p1), KeeperError::BadVersion(p2)) => p1 == p2,
            (KeeperError::NotEmpty(p1), KeeperError::NotEmpty(p2)) => p1 == p2,
            (KeeperError::InvalidPath(p1), KeeperError::InvalidPath(p2)) => p1 == p2,
            (
                KeeperError::NoChildrenForEphemerals(p1),
                KeeperError::NoChildrenForEphemerals(p2),
            ) => p1 == p2,
            (KeeperError::Driver(s1), KeeperError::Driver(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for KeeperError {
    fn from(e: std::io::Error) -> Self {
        KeeperError::Io(Arc::new(e))
    }
}

impl From<rustls::Error> for KeeperError {
    fn from(e: rustls::Error) -> Self {
        KeeperError::Tls(e.to_string())
    }
}
