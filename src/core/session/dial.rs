// src/core/session/dial.rs

//! Session establishment: connect through the driver, then wait for the
//! session to report `Connected`.

use crate::core::KeeperError;
use crate::core::configurator::TlsAuthConfigurator;
use crate::core::driver::{Connector, DriverSession, SessionEvents, SessionState};
use crate::core::metrics::{DIAL_FAILURES_TOTAL, SESSIONS_ESTABLISHED_TOTAL};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Opens a session to the configured ensemble.
///
/// The connect call and the wait for `Connected` share one deadline of
/// `connect_timeout`. On `AuthFailed`, deadline, cancellation or a stream that
/// ends early the partial session is closed and an error returned. Only a
/// confirmed-connected session leaves this function.
pub async fn dial(
    connector: &dyn Connector,
    configurator: &TlsAuthConfigurator,
    token: &CancellationToken,
) -> Result<(Arc<dyn DriverSession>, SessionEvents), KeeperError> {
    let result = dial_inner(connector, configurator, token).await;
    match &result {
        Ok((session, _)) => {
            SESSIONS_ESTABLISHED_TOTAL.inc();
            info!(
                "zk conn: session 0x{:x} established for addr {}",
                session.session_id(),
                configurator.address()
            );
        }
        Err(KeeperError::Cancelled) => {
            debug!("Dial to {} cancelled by caller", configurator.address());
        }
        Err(e) => {
            DIAL_FAILURES_TOTAL.inc();
            warn!("zk conn: dial to {} failed: {}", configurator.address(), e);
        }
    }
    result
}

async fn dial_inner(
    connector: &dyn Connector,
    configurator: &TlsAuthConfigurator,
    token: &CancellationToken,
) -> Result<(Arc<dyn DriverSession>, SessionEvents), KeeperError> {
    let timeout = configurator.connect_timeout();
    let deadline = Instant::now() + timeout;

    let (session, mut events) = tokio::select! {
        biased;
        _ = token.cancelled() => return Err(KeeperError::Cancelled),
        res = tokio::time::timeout_at(deadline, connector.connect(configurator.connect_options())) => {
            res.map_err(|_| KeeperError::DialTimeout(timeout))??
        }
    };

    let outcome = tokio::select! {
        biased;
        _ = token.cancelled() => Err(KeeperError::Cancelled),
        res = tokio::time::timeout_at(deadline, wait_for_connected(&mut events)) => {
            res.unwrap_or(Err(KeeperError::DialTimeout(timeout)))
        }
    };

    match outcome {
        Ok(()) => Ok((session, events)),
        Err(e) => {
            session.close().await;
            Err(e)
        }
    }
}

async fn wait_for_connected(events: &mut SessionEvents) -> Result<(), KeeperError> {
    while let Some(event) = events.recv().await {
        match event.state {
            SessionState::Connected => return Ok(()),
            SessionState::AuthFailed => return Err(KeeperError::AuthFailed),
            state => debug!("zk conn: handshake event {}", state),
        }
    }
    Err(KeeperError::Dial(
        "notification stream closed before the session connected".into(),
    ))
}
