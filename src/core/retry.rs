// src/core/retry.rs

//! Wraps each high-level operation with a concurrency gate, a bounded number of
//! attempts and a jittered delay between them.

use crate::config::RetryConfig;
use crate::core::KeeperError;
use crate::core::metrics::{OPERATIONS_IN_FLIGHT, RETRIES_EXHAUSTED_TOTAL, RETRIES_TOTAL};
use crate::core::session::LiveSession;
use async_trait::async_trait;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Attempts made for one operation before giving up.
pub const MAX_ATTEMPTS: u32 = 3;

/// Where the retry loop gets its session from, and where it reports a dead one.
#[async_trait]
pub trait SessionSource: Send + Sync {
    /// Returns the cached session, dialing a new one when there is none.
    async fn ensure_session(
        &self,
        token: &CancellationToken,
    ) -> Result<Arc<LiveSession>, KeeperError>;

    /// Drops `session` from the cache if it is still the cached one.
    async fn invalidate(&self, session: &Arc<LiveSession>);
}

/// A concurrency permit. Released when dropped, whichever way the operation ends.
pub struct OperationPermit<'a> {
    _permit: SemaphorePermit<'a>,
}

impl<'a> OperationPermit<'a> {
    fn new(permit: SemaphorePermit<'a>) -> Self {
        OPERATIONS_IN_FLIGHT.inc();
        Self { _permit: permit }
    }
}

impl Drop for OperationPermit<'_> {
    fn drop(&mut self) {
        OPERATIONS_IN_FLIGHT.dec();
    }
}

/// Gate plus attempt loop shared by every operation of one manager.
#[derive(Debug)]
pub struct RetryPolicy {
    gate: Semaphore,
    capacity: usize,
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(capacity: usize, config: RetryConfig) -> Self {
        Self {
            gate: Semaphore::new(capacity),
            capacity,
            config,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits not currently held by an operation.
    pub fn available_permits(&self) -> usize {
        self.gate.available_permits()
    }

    /// Waits for a permit, giving up if `token` is cancelled first.
    pub async fn acquire(
        &self,
        token: &CancellationToken,
    ) -> Result<OperationPermit<'_>, KeeperError> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(KeeperError::Cancelled),
            permit = self.gate.acquire() => permit
                .map(OperationPermit::new)
                .map_err(|e| KeeperError::Driver(e.to_string())),
        }
    }

    /// `base_delay` plus a uniform jitter in `[0, max_jitter)`.
    pub fn backoff_delay(&self) -> Duration {
        let max_jitter = self.config.max_jitter.as_nanos() as u64;
        let jitter = if max_jitter == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(rand::thread_rng().gen_range(0..max_jitter))
        };
        self.config.base_delay + jitter
    }

    /// Runs `op` against a session from `source`, at most `MAX_ATTEMPTS` times.
    ///
    /// Success returns at once. `SessionClosed` invalidates the session the
    /// attempt used and moves on to the next attempt. Other faults move on without
    /// invalidation, except cancellation and configuration faults, and driver
    /// answers that `fail_fast_on_permanent` marks as final. When every attempt
    /// has failed the last fault is returned inside `RetriesExhausted`.
    pub async fn run<T, Op, Fut>(
        &self,
        token: &CancellationToken,
        source: &dyn SessionSource,
        op: Op,
    ) -> Result<T, KeeperError>
    where
        Op: Fn(Arc<LiveSession>) -> Fut,
        Fut: Future<Output = Result<T, KeeperError>>,
    {
        let _permit = self.acquire(token).await?;
        let mut last_error: Option<KeeperError> = None;

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                RETRIES_TOTAL.inc();
                let delay = self.backoff_delay();
                debug!(
                    "Retrying in {:?} (attempt {}/{}) after: {}",
                    delay,
                    attempt + 1,
                    MAX_ATTEMPTS,
                    last_error
                        .as_ref()
                        .map(|e| e.to_string())
                        .unwrap_or_default()
                );
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(KeeperError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let session = match source.ensure_session(token).await {
                Ok(session) => session,
                Err(e) if !e.is_retryable(false) => return Err(e),
                Err(e) => {
                    last_error = Some(e);
                    continue;
                }
            };

            match op(session.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_session_closed() => {
                    source.invalidate(&session).await;
                    last_error = Some(e);
                }
                Err(e) if !e.is_retryable(self.config.fail_fast_on_permanent) => return Err(e),
                Err(e) => last_error = Some(e),
            }
        }

        RETRIES_EXHAUSTED_TOTAL.inc();
        let source = last_error
            .unwrap_or_else(|| KeeperError::Driver("no attempt was made".into()));
        warn!("Giving up after {} attempts: {}", MAX_ATTEMPTS, source);
        Err(KeeperError::RetriesExhausted {
            attempts: MAX_ATTEMPTS,
            source: Box::new(source),
        })
    }
}
