// src/core/driver/memory.rs

//! An in-process ensemble that implements `Connector`.
//!
//! It keeps a real node tree (versions, sequential and ephemeral nodes, ACLs)
//! and emits the same session notifications a network driver would, so
//! everything above the driver seam can be exercised without a server. Fault
//! hooks let a test expire, disconnect or silently kill sessions, fail the
//! next operations, stall handshakes and slow operations down.

use super::{
    Acl, ConnectOptions, Connector, CreateFlags, DriverSession, SessionEvent, SessionEvents,
    SessionState, Stat, perms,
};
use crate::core::KeeperError;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::{self, Sender, error::TrySendError};
use tracing::debug;

/// Session ids start here so they are easy to tell apart in logs.
const FIRST_SESSION_ID: i64 = 0x1000;

#[derive(Debug, Clone)]
struct Node {
    data: Bytes,
    stat: Stat,
    acl: Vec<Acl>,
    next_sequence: i32,
}

#[derive(Debug)]
struct Tree {
    nodes: BTreeMap<String, Node>,
    zxid: i64,
}

impl Tree {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/".to_string(),
            Node {
                data: Bytes::new(),
                stat: Stat::default(),
                acl: Acl::world_all(),
                next_sequence: 0,
            },
        );
        Self { nodes, zxid: 0 }
    }

    fn next_zxid(&mut self) -> i64 {
        self.zxid += 1;
        self.zxid
    }

    fn remove_ephemerals(&mut self, owner: i64) -> usize {
        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.stat.ephemeral_owner == owner)
            .map(|(p, _)| p.clone())
            .collect();
        for path in &owned {
            self.nodes.remove(path);
            if let Some(parent) = parent_of(path) {
                let zxid = self.next_zxid();
                if let Some(p) = self.nodes.get_mut(parent) {
                    p.stat.num_children -= 1;
                    p.stat.cversion += 1;
                    p.stat.mzxid = p.stat.mzxid.max(zxid);
                }
            }
        }
        owned.len()
    }
}

#[derive(Debug)]
struct SessionEntry {
    events: Sender<SessionEvent>,
    closed: Arc<AtomicBool>,
    server: String,
}

#[derive(Debug, Default)]
struct Faults {
    queued: VecDeque<KeeperError>,
    op_delay: Duration,
}

#[derive(Debug)]
struct EnsembleState {
    tree: Mutex<Tree>,
    sessions: Mutex<HashMap<i64, SessionEntry>>,
    faults: Mutex<Faults>,
    next_session_id: AtomicI64,
    connects: AtomicUsize,
    operations: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    reject_auth: AtomicBool,
    stall_handshake: AtomicBool,
}

/// An in-memory coordination ensemble. Cloning shares the same ensemble.
#[derive(Debug, Clone)]
pub struct MemoryEnsemble {
    state: Arc<EnsembleState>,
}

impl Default for MemoryEnsemble {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEnsemble {
    pub fn new() -> Self {
        Self {
            state: Arc::new(EnsembleState {
                tree: Mutex::new(Tree::new()),
                sessions: Mutex::new(HashMap::new()),
                faults: Mutex::new(Faults::default()),
                next_session_id: AtomicI64::new(FIRST_SESSION_ID),
                connects: AtomicUsize::new(0),
                operations: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                reject_auth: AtomicBool::new(false),
                stall_handshake: AtomicBool::new(false),
            }),
        }
    }

    /// Number of `connect` calls served.
    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Number of node operations attempted (including injected failures).
    pub fn operation_count(&self) -> usize {
        self.state.operations.load(Ordering::SeqCst)
    }

    /// Highest number of node operations observed running at the same time.
    pub fn max_concurrent_operations(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    /// Node operations running right now.
    pub fn operations_in_flight(&self) -> usize {
        self.state.in_flight.load(Ordering::SeqCst)
    }

    /// Sessions that are open and not yet torn down.
    pub fn live_sessions(&self) -> usize {
        self.state.sessions.lock().len()
    }

    /// Makes each node operation sleep for `delay` before running.
    pub fn set_operation_delay(&self, delay: Duration) {
        self.state.faults.lock().op_delay = delay;
    }

    /// Fails the next `count` node operations with `error`.
    pub fn fail_next(&self, count: usize, error: KeeperError) {
        let mut faults = self.state.faults.lock();
        for _ in 0..count {
            faults.queued.push_back(error.clone());
        }
    }

    /// Answers new handshakes with `AuthFailed` instead of `Connected`.
    pub fn reject_auth(&self, reject: bool) {
        self.state.reject_auth.store(reject, Ordering::SeqCst);
    }

    /// New handshakes report `Connecting` and then nothing.
    pub fn stall_handshake(&self, stall: bool) {
        self.state.stall_handshake.store(stall, Ordering::SeqCst);
    }

    /// Expires every open session: ephemerals are dropped, `Expired` is sent
    /// and the notification streams end.
    pub fn expire_sessions(&self) -> usize {
        self.end_sessions(Some(SessionState::Expired))
    }

    /// Sends `Disconnected` on every open session and tears it down.
    pub fn disconnect_sessions(&self) -> usize {
        self.end_sessions(Some(SessionState::Disconnected))
    }

    /// Tears every open session down without a terminal notification; the
    /// streams just end. Operations on the old handles fail with `SessionClosed`.
    pub fn kill_sessions_silently(&self) -> usize {
        self.end_sessions(None)
    }

    /// Sends `state` on every open session without tearing anything down.
    pub fn notify_all(&self, state: SessionState) {
        let sessions = self.state.sessions.lock();
        for entry in sessions.values() {
            notify(
                &entry.events,
                SessionEvent::with_server(state, entry.server.clone()),
            );
        }
    }

    fn end_sessions(&self, final_state: Option<SessionState>) -> usize {
        let ended: Vec<(i64, SessionEntry)> = self.state.sessions.lock().drain().collect();
        let mut tree = self.state.tree.lock();
        for (id, entry) in &ended {
            entry.closed.store(true, Ordering::SeqCst);
            tree.remove_ephemerals(*id);
            if let Some(state) = final_state {
                notify(
                    &entry.events,
                    SessionEvent::with_server(state, entry.server.clone()),
                );
            }
        }
        ended.len()
    }

    /// Reads a node directly, bypassing sessions and ACLs.
    pub fn peek(&self, path: &str) -> Option<(Bytes, Stat)> {
        self.state
            .tree
            .lock()
            .nodes
            .get(path)
            .map(|n| (n.data.clone(), n.stat))
    }
}

/// Delivers `event` without blocking the caller; a full queue is drained by a
/// short-lived task.
fn notify(events: &Sender<SessionEvent>, event: SessionEvent) {
    if let Err(TrySendError::Full(event)) = events.try_send(event) {
        let events = events.clone();
        tokio::spawn(async move {
            let _ = events.send(event).await;
        });
    }
}

#[async_trait]
impl Connector for MemoryEnsemble {
    async fn connect(
        &self,
        options: ConnectOptions,
    ) -> Result<(Arc<dyn DriverSession>, SessionEvents), KeeperError> {
        let server = options
            .host_provider
            .next()
            .or_else(|| options.servers.first().cloned())
            .ok_or_else(|| KeeperError::Dial("no servers to connect to".into()))?;
        self.state.connects.fetch_add(1, Ordering::SeqCst);

        let id = self.state.next_session_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(options.notification_capacity.max(1));
        let closed = Arc::new(AtomicBool::new(false));

        let stall = self.state.stall_handshake.load(Ordering::SeqCst);
        let reject = self.state.reject_auth.load(Ordering::SeqCst);
        let handshake = tx.clone();
        let handshake_server = server.clone();
        tokio::spawn(async move {
            let _ = handshake
                .send(SessionEvent::with_server(
                    SessionState::Connecting,
                    handshake_server.clone(),
                ))
                .await;
            if stall {
                return;
            }
            let outcome = if reject {
                SessionState::AuthFailed
            } else {
                SessionState::Connected
            };
            let _ = handshake
                .send(SessionEvent::with_server(outcome, handshake_server))
                .await;
        });

        self.state.sessions.lock().insert(
            id,
            SessionEntry {
                events: tx,
                closed: closed.clone(),
                server: server.clone(),
            },
        );
        debug!("memory ensemble: session 0x{:x} opened via {}", id, server);

        let session = MemorySession {
            id,
            state: self.state.clone(),
            closed,
            auth: Mutex::new(Vec::new()),
        };
        Ok((Arc::new(session), rx))
    }
}

/// A session on a `MemoryEnsemble`.
#[derive(Debug)]
pub struct MemorySession {
    id: i64,
    state: Arc<EnsembleState>,
    closed: Arc<AtomicBool>,
    auth: Mutex<Vec<(String, Bytes)>>,
}

/// Counts a node operation for its whole duration.
struct InFlight<'a>(&'a EnsembleState);

impl<'a> InFlight<'a> {
    fn enter(state: &'a EnsembleState) -> Self {
        let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(state)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemorySession {
    /// Common preamble of every node operation: count it, honour the configured
    /// delay, reject torn-down sessions and hand out queued faults.
    async fn begin(&self) -> Result<InFlight<'_>, KeeperError> {
        self.state.operations.fetch_add(1, Ordering::SeqCst);
        let guard = InFlight::enter(&self.state);
        let delay = self.state.faults.lock().op_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(KeeperError::SessionClosed);
        }
        if let Some(fault) = self.state.faults.lock().queued.pop_front() {
            return Err(fault);
        }
        Ok(guard)
    }

    fn permits(&self, acl: &[Acl], perm: i32) -> bool {
        let auth = self.auth.lock();
        acl.iter().filter(|entry| entry.allows(perm)).any(|entry| {
            (entry.scheme == "world" && entry.id == "anyone")
                || auth
                    .iter()
                    .any(|(scheme, secret)| *scheme == entry.scheme && secret[..] == *entry.id.as_bytes())
        })
    }

    /// Replaces `auth` entries with the identities this session has added.
    fn resolve_acl(&self, acl: &[Acl]) -> Result<Vec<Acl>, KeeperError> {
        if acl.is_empty() {
            return Err(KeeperError::InvalidAcl);
        }
        let auth = self.auth.lock();
        let mut resolved = Vec::with_capacity(acl.len());
        for entry in acl {
            if entry.scheme == "auth" {
                if auth.is_empty() {
                    return Err(KeeperError::InvalidAcl);
                }
                for (scheme, secret) in auth.iter() {
                    resolved.push(Acl {
                        perms: entry.perms,
                        scheme: scheme.clone(),
                        id: String::from_utf8_lossy(secret).into_owned(),
                    });
                }
            } else {
                resolved.push(entry.clone());
            }
        }
        Ok(resolved)
    }
}

#[async_trait]
impl DriverSession for MemorySession {
    async fn get(&self, path: &str) -> Result<(Bytes, Stat), KeeperError> {
        let _op = self.begin().await?;
        validate_path(path)?;
        let tree = self.state.tree.lock();
        let node = tree
            .nodes
            .get(path)
            .ok_or_else(|| KeeperError::NoNode(path.to_string()))?;
        if !self.permits(&node.acl, perms::READ) {
            return Err(KeeperError::NoAuth);
        }
        Ok((node.data.clone(), node.stat))
    }

    async fn exists(&self, path: &str) -> Result<(bool, Option<Stat>), KeeperError> {
        let _op = self.begin().await?;
        validate_path(path)?;
        let tree = self.state.tree.lock();
        Ok(match tree.nodes.get(path) {
            Some(node) => (true, Some(node.stat)),
            None => (false, None),
        })
    }

    async fn create(
        &self,
        path: &str,
        value: Bytes,
        flags: CreateFlags,
        acl: &[Acl],
    ) -> Result<String, KeeperError> {
        let _op = self.begin().await?;
        validate_path(path)?;
        let parent_path =
            parent_of(path).ok_or_else(|| KeeperError::NodeExists(path.to_string()))?;
        let acl = self.resolve_acl(acl)?;

        let mut tree = self.state.tree.lock();
        let (sequence, parent_ephemeral) = {
            let parent = tree
                .nodes
                .get(parent_path)
                .ok_or_else(|| KeeperError::NoNode(parent_path.to_string()))?;
            if !self.permits(&parent.acl, perms::CREATE) {
                return Err(KeeperError::NoAuth);
            }
            (parent.next_sequence, parent.stat.ephemeral_owner != 0)
        };
        if parent_ephemeral {
            return Err(KeeperError::NoChildrenForEphemerals(parent_path.to_string()));
        }

        let created = if flags.is_sequential() {
            format!("{path}{sequence:010}")
        } else {
            path.to_string()
        };
        if tree.nodes.contains_key(&created) {
            return Err(KeeperError::NodeExists(created));
        }

        let zxid = tree.next_zxid();
        let stat = Stat {
            czxid: zxid,
            mzxid: zxid,
            version: 0,
            cversion: 0,
            data_length: value.len() as i32,
            num_children: 0,
            ephemeral_owner: if flags.is_ephemeral() { self.id } else { 0 },
        };
        tree.nodes.insert(
            created.clone(),
            Node {
                data: value,
                stat,
                acl,
                next_sequence: 0,
            },
        );
        if let Some(parent) = tree.nodes.get_mut(parent_path) {
            parent.next_sequence += 1;
            parent.stat.num_children += 1;
            parent.stat.cversion += 1;
        }
        Ok(created)
    }

    async fn set(&self, path: &str, value: Bytes, version: i32) -> Result<Stat, KeeperError> {
        let _op = self.begin().await?;
        validate_path(path)?;
        let mut tree = self.state.tree.lock();
        let zxid = tree.next_zxid();
        let node = tree
            .nodes
            .get_mut(path)
            .ok_or_else(|| KeeperError::NoNode(path.to_string()))?;
        if !self.permits(&node.acl, perms::WRITE) {
            return Err(KeeperError::NoAuth);
        }
        if version != -1 && version != node.stat.version {
            return Err(KeeperError::BadVersion(path.to_string()));
        }
        node.stat.data_length = value.len() as i32;
        node.data = value;
        node.stat.version += 1;
        node.stat.mzxid = zxid;
        Ok(node.stat)
    }

    async fn delete(&self, path: &str, version: i32) -> Result<(), KeeperError> {
        let _op = self.begin().await?;
        validate_path(path)?;
        let parent_path =
            parent_of(path).ok_or_else(|| KeeperError::InvalidPath(path.to_string()))?;
        let mut tree = self.state.tree.lock();
        let parent_acl = tree
            .nodes
            .get(parent_path)
            .map(|p| p.acl.clone())
            .unwrap_or_default();
        let node = tree
            .nodes
            .get(path)
            .ok_or_else(|| KeeperError::NoNode(path.to_string()))?;
        if !self.permits(&parent_acl, perms::DELETE) {
            return Err(KeeperError::NoAuth);
        }
        if version != -1 && version != node.stat.version {
            return Err(KeeperError::BadVersion(path.to_string()));
        }
        if node.stat.num_children > 0 {
            return Err(KeeperError::NotEmpty(path.to_string()));
        }
        tree.nodes.remove(path);
        if let Some(parent) = tree.nodes.get_mut(parent_path) {
            parent.stat.num_children -= 1;
            parent.stat.cversion += 1;
        }
        Ok(())
    }

    async fn add_auth(&self, scheme: &str, secret: &[u8]) -> Result<(), KeeperError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(KeeperError::SessionClosed);
        }
        if scheme.is_empty() {
            return Err(KeeperError::Driver("auth scheme cannot be empty".into()));
        }
        self.auth
            .lock()
            .push((scheme.to_string(), Bytes::copy_from_slice(secret)));
        Ok(())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Dropping the entry drops the ensemble's sender, which ends the stream.
        self.state.sessions.lock().remove(&self.id);
        let removed = self.state.tree.lock().remove_ephemerals(self.id);
        debug!(
            "memory ensemble: session 0x{:x} closed, {} ephemeral node(s) removed",
            self.id, removed
        );
    }

    fn session_id(&self) -> i64 {
        self.id
    }
}

fn validate_path(path: &str) -> Result<(), KeeperError> {
    let valid = path.starts_with('/')
        && (path == "/" || !path.ends_with('/'))
        && !path.contains("//")
        && !path.contains('\0');
    if valid {
        Ok(())
    } else {
        Err(KeeperError::InvalidPath(path.to_string()))
    }
}

fn parent_of(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(i) => Some(&path[..i]),
        None => None,
    }
}
