// src/core/driver/mod.rs

//! The seam between the resilience layer and a coordination-protocol driver.
//!
//! The wire protocol lives behind these traits. A driver hands back a
//! `DriverSession` plus a bounded channel of `SessionEvent`s for every
//! successful `connect`; the client owns everything above that: session
//! caching, loss detection, retries and credential injection.

use crate::core::KeeperError;
use crate::core::transport::{Dialer, HostProvider};
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub mod memory;

/// The connection states a driver reports on a session's notification stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Connecting,
    Connected,
    Disconnected,
    AuthFailed,
    Expired,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Connecting => "StateConnecting",
            SessionState::Connected => "StateConnected",
            SessionState::Disconnected => "StateDisconnected",
            SessionState::AuthFailed => "StateAuthFailed",
            SessionState::Expired => "StateExpired",
        };
        f.write_str(s)
    }
}

/// A single notification delivered on a session's event channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub state: SessionState,
    /// The ensemble member the driver was talking to, when known.
    pub server: Option<String>,
}

impl SessionEvent {
    pub fn new(state: SessionState) -> Self {
        Self {
            state,
            server: None,
        }
    }

    pub fn with_server(state: SessionState, server: impl Into<String>) -> Self {
        Self {
            state,
            server: Some(server.into()),
        }
    }
}

/// The receiving half of a session's notification stream.
pub type SessionEvents = mpsc::Receiver<SessionEvent>;

/// Node metadata returned by reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stat {
    /// Transaction id that created the node.
    pub czxid: i64,
    /// Transaction id that last modified the node.
    pub mzxid: i64,
    /// Data version, used for conditional `set` and `delete`.
    pub version: i32,
    /// Child list version.
    pub cversion: i32,
    pub data_length: i32,
    pub num_children: i32,
    /// Owning session id for ephemeral nodes, 0 otherwise.
    pub ephemeral_owner: i64,
}

/// Mode of a node created through `create`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CreateFlags {
    #[default]
    Persistent,
    Ephemeral,
    Sequential,
    EphemeralSequential,
}

impl CreateFlags {
    /// The protocol-level integer flag value.
    pub fn as_i32(self) -> i32 {
        match self {
            CreateFlags::Persistent => 0,
            CreateFlags::Ephemeral => 1,
            CreateFlags::Sequential => 2,
            CreateFlags::EphemeralSequential => 3,
        }
    }

    pub fn is_ephemeral(self) -> bool {
        matches!(self, CreateFlags::Ephemeral | CreateFlags::EphemeralSequential)
    }

    pub fn is_sequential(self) -> bool {
        matches!(self, CreateFlags::Sequential | CreateFlags::EphemeralSequential)
    }
}

impl TryFrom<i32> for CreateFlags {
    type Error = KeeperError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(CreateFlags::Persistent),
            1 => Ok(CreateFlags::Ephemeral),
            2 => Ok(CreateFlags::Sequential),
            3 => Ok(CreateFlags::EphemeralSequential),
            other => Err(KeeperError::Driver(format!("unknown create flags {other}"))),
        }
    }
}

/// Permission bits of an ACL entry.
pub mod perms {
    pub const READ: i32 = 1;
    pub const WRITE: i32 = 1 << 1;
    pub const CREATE: i32 = 1 << 2;
    pub const DELETE: i32 = 1 << 3;
    pub const ADMIN: i32 = 1 << 4;
    pub const ALL: i32 = READ | WRITE | CREATE | DELETE | ADMIN;
}

/// One access-control entry attached to a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Acl {
    pub perms: i32,
    pub scheme: String,
    pub id: String,
}

impl Acl {
    /// `world:anyone` with every permission.
    pub fn world_all() -> Vec<Acl> {
        vec![Acl {
            perms: perms::ALL,
            scheme: "world".into(),
            id: "anyone".into(),
        }]
    }

    /// Every permission for whichever identity created the node.
    pub fn auth_all() -> Vec<Acl> {
        vec![Acl {
            perms: perms::ALL,
            scheme: "auth".into(),
            id: String::new(),
        }]
    }

    pub fn allows(&self, perm: i32) -> bool {
        self.perms & perm == perm
    }
}

/// Everything a driver needs to open a session.
#[derive(Clone)]
pub struct ConnectOptions {
    /// Ensemble members as `host:port` entries.
    pub servers: Vec<String>,
    pub session_timeout: Duration,
    /// How to open the byte stream to a chosen member.
    pub dialer: Dialer,
    /// Which member to try next.
    pub host_provider: Arc<dyn HostProvider>,
    /// Capacity of the notification channel the driver should create.
    pub notification_capacity: usize,
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("servers", &self.servers)
            .field("session_timeout", &self.session_timeout)
            .field("dialer", &self.dialer)
            .field("notification_capacity", &self.notification_capacity)
            .finish()
    }
}

/// An open session on the ensemble.
///
/// Once the session has been torn down every operation must fail with
/// `KeeperError::SessionClosed`.
#[async_trait]
pub trait DriverSession: Send + Sync {
    async fn get(&self, path: &str) -> Result<(Bytes, Stat), KeeperError>;

    async fn exists(&self, path: &str) -> Result<(bool, Option<Stat>), KeeperError>;

    async fn create(
        &self,
        path: &str,
        value: Bytes,
        flags: CreateFlags,
        acl: &[Acl],
    ) -> Result<String, KeeperError>;

    async fn set(&self, path: &str, value: Bytes, version: i32) -> Result<Stat, KeeperError>;

    async fn delete(&self, path: &str, version: i32) -> Result<(), KeeperError>;

    async fn add_auth(&self, scheme: &str, secret: &[u8]) -> Result<(), KeeperError>;

    /// Releases the transport. Closing twice is a no-op.
    async fn close(&self);

    /// The session id assigned by the ensemble, 0 before it is known.
    fn session_id(&self) -> i64 {
        0
    }
}

/// Opens sessions. One `connect` call yields one session and its notification stream.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(
        &self,
        options: ConnectOptions,
    ) -> Result<(Arc<dyn DriverSession>, SessionEvents), KeeperError>;
}
