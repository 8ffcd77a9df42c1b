// src/core/manager.rs

//! The top-level client: one cached session per ensemble address, five retried
//! coordination operations and an explicit shutdown.

use crate::config::ClientConfig;
use crate::core::KeeperError;
use crate::core::configurator::TlsAuthConfigurator;
use crate::core::driver::{Acl, Connector, CreateFlags, Stat};
use crate::core::metrics::{SESSION_INVALIDATIONS_TOTAL, reason};
use crate::core::retry::{RetryPolicy, SessionSource};
use crate::core::session::{LiveSession, SessionMonitor, SessionSlot, dial};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// State shared by every operation of one manager.
struct ManagerInner {
    slot: Arc<SessionSlot>,
    configurator: TlsAuthConfigurator,
    connector: Arc<dyn Connector>,
}

#[async_trait]
impl SessionSource for ManagerInner {
    async fn ensure_session(
        &self,
        token: &CancellationToken,
    ) -> Result<Arc<LiveSession>, KeeperError> {
        let mut current = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(KeeperError::Cancelled),
            guard = self.slot.lock() => guard,
        };
        if let Some(session) = current.as_ref() {
            return Ok(session.clone());
        }

        let (driver, events) = dial(self.connector.as_ref(), &self.configurator, token).await?;
        let session = self.slot.next_session(driver);
        *current = Some(session.clone());
        SessionMonitor::new(self.slot.clone(), session.clone(), events).spawn();
        self.configurator.inject_credentials(session.driver()).await;
        Ok(session)
    }

    async fn invalidate(&self, session: &Arc<LiveSession>) {
        self.slot.invalidate(session, reason::SESSION_CLOSED).await;
    }
}

/// A session-resilient client for one ensemble address.
///
/// Safe to share between tasks (wrap it in an `Arc`). At most one session is
/// current at any time; it is dialed lazily and replaced after loss.
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("address", &self.inner.slot.address())
            .field("tls", &self.inner.configurator.is_tls())
            .field("retry", &self.retry)
            .finish()
    }
}

impl ConnectionManager {
    /// Builds a manager for `address` (`host:port[,host:port...]`).
    ///
    /// Fails with a configuration fault when `config` is invalid for this
    /// address or the TLS material cannot be loaded. Nothing is dialed here.
    pub fn new(
        address: &str,
        config: &ClientConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, KeeperError> {
        let configurator = TlsAuthConfigurator::new(address, config)?;
        info!(
            "Created coordination client for {} ({} server(s), tls={}, concurrency={})",
            address,
            configurator.servers().len(),
            configurator.is_tls(),
            config.concurrency_limit
        );
        Ok(Self {
            inner: Arc::new(ManagerInner {
                slot: Arc::new(SessionSlot::new(address)),
                configurator,
                connector,
            }),
            retry: RetryPolicy::new(config.concurrency_limit, config.retry.clone()),
        })
    }

    pub fn address(&self) -> &str {
        self.inner.slot.address()
    }

    pub fn is_tls(&self) -> bool {
        self.inner.configurator.is_tls()
    }

    /// Whether a session is currently cached.
    pub async fn has_session(&self) -> bool {
        self.inner.slot.current().await.is_some()
    }

    /// Generation of the cached session; each successful dial increments it.
    pub async fn session_generation(&self) -> Option<u64> {
        self.inner.slot.current().await.map(|s| s.generation())
    }

    /// Concurrency permits not held by an in-flight operation.
    pub fn available_permits(&self) -> usize {
        self.retry.available_permits()
    }

    /// Reads the data and stat of `path`.
    pub async fn get(
        &self,
        token: &CancellationToken,
        path: &str,
    ) -> Result<(Bytes, Stat), KeeperError> {
        self.retry
            .run(token, self.inner.as_ref(), |session| async move {
                session.driver().get(path).await
            })
            .await
    }

    /// Reports whether `path` exists, with its stat when it does.
    pub async fn exists(
        &self,
        token: &CancellationToken,
        path: &str,
    ) -> Result<(bool, Option<Stat>), KeeperError> {
        self.retry
            .run(token, self.inner.as_ref(), |session| async move {
                session.driver().exists(path).await
            })
            .await
    }

    /// Creates `path` and returns the path actually created (sequential nodes
    /// get a suffix).
    pub async fn create(
        &self,
        token: &CancellationToken,
        path: &str,
        value: Bytes,
        flags: CreateFlags,
        acl: &[Acl],
    ) -> Result<String, KeeperError> {
        self.retry
            .run(token, self.inner.as_ref(), |session| {
                let value = value.clone();
                async move { session.driver().create(path, value, flags, acl).await }
            })
            .await
    }

    /// Replaces the data of `path` if its version matches `version` (-1 matches any).
    pub async fn set(
        &self,
        token: &CancellationToken,
        path: &str,
        value: Bytes,
        version: i32,
    ) -> Result<Stat, KeeperError> {
        self.retry
            .run(token, self.inner.as_ref(), |session| {
                let value = value.clone();
                async move { session.driver().set(path, value, version).await }
            })
            .await
    }

    /// Deletes `path` if its version matches `version` (-1 matches any).
    pub async fn delete(
        &self,
        token: &CancellationToken,
        path: &str,
        version: i32,
    ) -> Result<(), KeeperError> {
        self.retry
            .run(token, self.inner.as_ref(), |session| async move {
                session.driver().delete(path, version).await
            })
            .await
    }

    /// Closes the cached session's transport, if any. The next operation dials
    /// a fresh session. Calling it again is a no-op.
    pub async fn close(&self) {
        match self.inner.slot.take().await {
            Some(session) => {
                SESSION_INVALIDATIONS_TOTAL
                    .with_label_values(&[reason::CLOSED_BY_CALLER])
                    .inc();
                session.close().await;
                info!(
                    "Closed session generation {} for addr {}",
                    session.generation(),
                    self.address()
                );
            }
            None => debug!("Close on {} with no cached session", self.address()),
        }
    }
}
