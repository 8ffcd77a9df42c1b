// src/core/session/mod.rs

//! The cached "current session" of a `ConnectionManager` and the pieces that
//! create and retire it.

use crate::core::driver::DriverSession;
use crate::core::metrics::SESSION_INVALIDATIONS_TOTAL;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

pub mod dial;
pub mod monitor;

pub use dial::dial;
pub use monitor::{MonitorExit, SessionMonitor};

/// One established session. Identity matters: the cache and the monitor compare
/// sessions by pointer, never by value.
pub struct LiveSession {
    generation: u64,
    driver: Arc<dyn DriverSession>,
}

impl LiveSession {
    pub fn new(generation: u64, driver: Arc<dyn DriverSession>) -> Self {
        Self { generation, driver }
    }

    /// Increases by one for every session a manager establishes.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn driver(&self) -> &dyn DriverSession {
        self.driver.as_ref()
    }

    pub async fn close(&self) {
        self.driver.close().await;
    }
}

impl fmt::Debug for LiveSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveSession")
            .field("generation", &self.generation)
            .field("session_id", &self.driver.session_id())
            .finish()
    }
}

/// Holds the current session for one ensemble address.
///
/// Shared by the manager and every monitor it spawned. All read-then-replace
/// sequences happen under `current`'s lock.
#[derive(Debug)]
pub struct SessionSlot {
    address: String,
    current: Mutex<Option<Arc<LiveSession>>>,
    generations: AtomicU64,
}

impl SessionSlot {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            current: Mutex::new(None),
            generations: AtomicU64::new(0),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Locks the slot. Held across a dial so concurrent redials collapse into one.
    pub async fn lock(&self) -> MutexGuard<'_, Option<Arc<LiveSession>>> {
        self.current.lock().await
    }

    /// Wraps a freshly dialed driver session with the next generation number.
    pub fn next_session(&self, driver: Arc<dyn DriverSession>) -> Arc<LiveSession> {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        Arc::new(LiveSession::new(generation, driver))
    }

    /// The cached session, if any.
    pub async fn current(&self) -> Option<Arc<LiveSession>> {
        self.current.lock().await.clone()
    }

    /// Clears the cache if it still holds `session`. Returns whether it did.
    ///
    /// A session replaced by a concurrent redial is left alone, and clearing an
    /// empty slot is a no-op.
    pub async fn invalidate(&self, session: &Arc<LiveSession>, reason: &str) -> bool {
        let mut current = self.current.lock().await;
        match current.as_ref() {
            Some(cached) if Arc::ptr_eq(cached, session) => {
                *current = None;
                SESSION_INVALIDATIONS_TOTAL
                    .with_label_values(&[reason])
                    .inc();
                debug!(
                    "Invalidated session generation {} for addr {} ({})",
                    session.generation(),
                    self.address,
                    reason
                );
                true
            }
            _ => false,
        }
    }

    /// Removes and returns whatever session is cached.
    pub async fn take(&self) -> Option<Arc<LiveSession>> {
        self.current.lock().await.take()
    }
}
