// src/core/session/monitor.rs

//! The background watch bound to a single session.

use super::{LiveSession, SessionSlot};
use crate::core::driver::{SessionEvents, SessionState};
use crate::core::metrics::reason;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// How a monitor finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorExit {
    /// The session was lost. `cleared` tells whether the cache still pointed at it.
    Lost { state: SessionState, cleared: bool },
    /// The notification stream ended without a terminal state.
    StreamClosed,
}

/// Consumes one session's notifications and retires the session when it is lost.
pub struct SessionMonitor {
    slot: Arc<SessionSlot>,
    session: Arc<LiveSession>,
    events: SessionEvents,
}

impl SessionMonitor {
    pub fn new(slot: Arc<SessionSlot>, session: Arc<LiveSession>, events: SessionEvents) -> Self {
        Self {
            slot,
            session,
            events,
        }
    }

    /// Starts the watch as a detached task.
    pub fn spawn(self) -> JoinHandle<MonitorExit> {
        tokio::spawn(self.run())
    }

    /// Watches until the session is lost or its stream ends.
    ///
    /// `Disconnected` clears the cache but leaves the transport to the driver.
    /// `Expired` also closes it, as the session cannot come back.
    pub async fn run(mut self) -> MonitorExit {
        while let Some(event) = self.events.recv().await {
            match event.state {
                SessionState::Disconnected | SessionState::Expired => {
                    let label = if event.state == SessionState::Expired {
                        reason::EXPIRED
                    } else {
                        reason::DISCONNECTED
                    };
                    let cleared = self.slot.invalidate(&self.session, label).await;
                    if event.state == SessionState::Expired {
                        self.session.close().await;
                    }
                    info!(
                        "zk conn: session for addr {} ended: {:?}",
                        self.slot.address(),
                        event
                    );
                    return MonitorExit::Lost {
                        state: event.state,
                        cleared,
                    };
                }
                _ => info!(
                    "zk conn: session for addr {} event: {:?}",
                    self.slot.address(),
                    event
                ),
            }
        }
        info!(
            "zk conn: notification stream for addr {} closed (generation {})",
            self.slot.address(),
            self.session.generation()
        );
        MonitorExit::StreamClosed
    }
}
