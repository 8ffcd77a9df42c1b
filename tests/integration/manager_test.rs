// tests/integration/manager_test.rs

//! End-to-end behaviour of `ConnectionManager` against the in-memory ensemble.

use super::test_helpers::{ScriptedConnector, fast_config, init_tracing, memory_manager, wait_until};
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use zksession::core::KeeperError;
use zksession::core::driver::{Acl, CreateFlags};
use zksession::core::manager::ConnectionManager;

#[tokio::test]
async fn test_first_operation_dials_lazily() {
    let (manager, ensemble) = memory_manager(&fast_config());
    assert_eq!(ensemble.connect_count(), 0);
    assert!(!manager.has_session().await);

    let token = CancellationToken::new();
    let (exists, stat) = manager.exists(&token, "/").await.unwrap();
    assert!(exists);
    assert!(stat.is_some());
    assert_eq!(ensemble.connect_count(), 1);
    assert_eq!(manager.session_generation().await, Some(1));
}

#[tokio::test]
async fn test_create_get_set_delete_round() {
    let (manager, ensemble) = memory_manager(&fast_config());
    let token = CancellationToken::new();

    let created = manager
        .create(
            &token,
            "/app",
            Bytes::from_static(b"v1"),
            CreateFlags::Persistent,
            &Acl::world_all(),
        )
        .await
        .unwrap();
    assert_eq!(created, "/app");

    let (data, stat) = manager.get(&token, "/app").await.unwrap();
    assert_eq!(data, Bytes::from_static(b"v1"));
    assert_eq!(stat.version, 0);

    let stat = manager
        .set(&token, "/app", Bytes::from_static(b"v2"), 0)
        .await
        .unwrap();
    assert_eq!(stat.version, 1);
    assert_eq!(stat.data_length, 2);

    manager.delete(&token, "/app", 1).await.unwrap();
    assert!(ensemble.peek("/app").is_none());
    let (exists, _) = manager.exists(&token, "/app").await.unwrap();
    assert!(!exists);
    // Every call above reused the one session.
    assert_eq!(ensemble.connect_count(), 1);
}

#[tokio::test]
async fn test_sequential_create_returns_actual_path() {
    let (manager, _ensemble) = memory_manager(&fast_config());
    let token = CancellationToken::new();

    let first = manager
        .create(
            &token,
            "/job-",
            Bytes::new(),
            CreateFlags::Sequential,
            &Acl::world_all(),
        )
        .await
        .unwrap();
    let second = manager
        .create(
            &token,
            "/job-",
            Bytes::new(),
            CreateFlags::Sequential,
            &Acl::world_all(),
        )
        .await
        .unwrap();
    assert_eq!(first, "/job-0000000000");
    assert_eq!(second, "/job-0000000001");
}

#[tokio::test]
async fn test_concurrency_gate_caps_operations_in_flight() {
    let mut config = fast_config();
    config.concurrency_limit = 32;
    let (manager, ensemble) = memory_manager(&config);
    let manager = Arc::new(manager);
    let token = CancellationToken::new();

    // Establish the session before the burst so the gate is the only limiter.
    manager.exists(&token, "/").await.unwrap();
    ensemble.set_operation_delay(Duration::from_millis(300));
    let ops_before = ensemble.operation_count();

    let mut handles = Vec::new();
    for _ in 0..40 {
        let manager = manager.clone();
        let token = token.clone();
        handles.push(tokio::spawn(async move { manager.get(&token, "/").await }));
    }

    let probe = &ensemble;
    assert!(
        wait_until(Duration::from_secs(2), move || async move {
            probe.operations_in_flight() == 32
        })
        .await,
        "32 operations should be in flight"
    );
    assert_eq!(manager.available_permits(), 0);

    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }
    assert_eq!(ensemble.max_concurrent_operations(), 32);
    assert_eq!(ensemble.operation_count() - ops_before, 40);
    assert_eq!(manager.available_permits(), 32);
}

#[tokio::test]
async fn test_silently_closed_session_is_replaced_on_next_attempt() {
    let (manager, ensemble) = memory_manager(&fast_config());
    let token = CancellationToken::new();
    manager
        .create(
            &token,
            "/cfg",
            Bytes::from_static(b"old"),
            CreateFlags::Persistent,
            &Acl::world_all(),
        )
        .await
        .unwrap();
    assert_eq!(ensemble.connect_count(), 1);

    assert_eq!(ensemble.kill_sessions_silently(), 1);
    // No notification arrived, so the stale handle is still cached.
    assert!(manager.has_session().await);

    let ops_before = ensemble.operation_count();
    let stat = manager
        .set(&token, "/cfg", Bytes::from_static(b"new"), -1)
        .await
        .unwrap();
    assert_eq!(stat.version, 1);
    assert_eq!(ensemble.operation_count() - ops_before, 2);
    assert_eq!(ensemble.connect_count(), 2);
    assert_eq!(manager.session_generation().await, Some(2));
    assert_eq!(ensemble.peek("/cfg").unwrap().0, Bytes::from_static(b"new"));
}

#[tokio::test]
async fn test_transient_faults_exhaust_retries() {
    let mut config = fast_config();
    config.retry.base_delay = Duration::from_millis(100);
    config.retry.max_jitter = Duration::from_millis(20);
    let (manager, ensemble) = memory_manager(&config);
    let token = CancellationToken::new();
    manager.exists(&token, "/").await.unwrap();

    ensemble.fail_next(3, KeeperError::Timeout);
    let ops_before = ensemble.operation_count();
    let started = Instant::now();
    let err = manager.delete(&token, "/y", 5).await.unwrap_err();
    let elapsed = started.elapsed();

    assert_eq!(
        err,
        KeeperError::RetriesExhausted {
            attempts: 3,
            source: Box::new(KeeperError::Timeout),
        }
    );
    assert_eq!(ensemble.operation_count() - ops_before, 3);
    // Two delays between three attempts, and no third delay after the last one.
    assert!(elapsed >= config.retry.base_delay * 2, "{elapsed:?}");
    assert!(elapsed < config.retry.base_delay * 3, "{elapsed:?}");
    tokio::time::sleep(config.retry.base_delay + config.retry.max_jitter).await;
    assert_eq!(ensemble.operation_count() - ops_before, 3);
    // A transient fault does not cost the session.
    assert_eq!(ensemble.connect_count(), 1);
}

#[tokio::test]
async fn test_transient_fault_then_success() {
    let (manager, ensemble) = memory_manager(&fast_config());
    let token = CancellationToken::new();
    manager.exists(&token, "/").await.unwrap();

    ensemble.fail_next(2, KeeperError::ConnectionLoss);
    let ops_before = ensemble.operation_count();
    let (exists, _) = manager.exists(&token, "/").await.unwrap();
    assert!(exists);
    assert_eq!(ensemble.operation_count() - ops_before, 3);
}

#[tokio::test]
async fn test_permanent_answer_fails_fast_by_default() {
    let (manager, ensemble) = memory_manager(&fast_config());
    let token = CancellationToken::new();
    manager.exists(&token, "/").await.unwrap();

    let ops_before = ensemble.operation_count();
    let err = manager.delete(&token, "/missing", -1).await.unwrap_err();
    assert_eq!(err, KeeperError::NoNode("/missing".into()));
    assert_eq!(ensemble.operation_count() - ops_before, 1);
}

#[tokio::test]
async fn test_permanent_answer_retried_when_fail_fast_disabled() {
    let mut config = fast_config();
    config.retry.fail_fast_on_permanent = false;
    let (manager, ensemble) = memory_manager(&config);
    let token = CancellationToken::new();
    manager.exists(&token, "/").await.unwrap();

    let ops_before = ensemble.operation_count();
    let err = manager.delete(&token, "/missing", -1).await.unwrap_err();
    match err {
        KeeperError::RetriesExhausted { attempts, source } => {
            assert_eq!(attempts, 3);
            assert_eq!(*source, KeeperError::NoNode("/missing".into()));
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
    assert_eq!(ensemble.operation_count() - ops_before, 3);
}

#[tokio::test]
async fn test_bad_version_is_reported() {
    let (manager, _ensemble) = memory_manager(&fast_config());
    let token = CancellationToken::new();
    manager
        .create(
            &token,
            "/v",
            Bytes::new(),
            CreateFlags::Persistent,
            &Acl::world_all(),
        )
        .await
        .unwrap();
    let err = manager
        .set(&token, "/v", Bytes::from_static(b"x"), 7)
        .await
        .unwrap_err();
    assert_eq!(err, KeeperError::BadVersion("/v".into()));
}

#[tokio::test]
async fn test_concurrent_first_operations_share_one_dial() {
    let (manager, ensemble) = memory_manager(&fast_config());
    let manager = Arc::new(manager);
    let token = CancellationToken::new();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let manager = manager.clone();
        let token = token.clone();
        handles.push(tokio::spawn(async move { manager.get(&token, "/").await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(ensemble.connect_count(), 1);
    assert_eq!(ensemble.live_sessions(), 1);
}

#[tokio::test]
async fn test_disconnect_notification_forces_redial() {
    let (manager, ensemble) = memory_manager(&fast_config());
    let token = CancellationToken::new();
    manager.exists(&token, "/").await.unwrap();

    assert_eq!(ensemble.disconnect_sessions(), 1);
    let m = &manager;
    assert!(
        wait_until(Duration::from_secs(1), move || async move { !m.has_session().await }).await,
        "monitor should clear the cache"
    );

    let ops_before = ensemble.operation_count();
    manager.exists(&token, "/").await.unwrap();
    assert_eq!(ensemble.connect_count(), 2);
    // The fresh session was dialed up front, so no attempt was wasted.
    assert_eq!(ensemble.operation_count() - ops_before, 1);
}

#[tokio::test]
async fn test_expiry_drops_ephemerals_and_redials() {
    let (manager, ensemble) = memory_manager(&fast_config());
    let token = CancellationToken::new();
    manager
        .create(
            &token,
            "/lock",
            Bytes::new(),
            CreateFlags::Ephemeral,
            &Acl::world_all(),
        )
        .await
        .unwrap();
    let owner = ensemble.peek("/lock").unwrap().1.ephemeral_owner;
    assert_ne!(owner, 0);

    ensemble.expire_sessions();
    let m = &manager;
    assert!(
        wait_until(Duration::from_secs(1), move || async move { !m.has_session().await }).await
    );
    assert!(ensemble.peek("/lock").is_none());

    manager
        .create(
            &token,
            "/lock",
            Bytes::new(),
            CreateFlags::Ephemeral,
            &Acl::world_all(),
        )
        .await
        .unwrap();
    assert_ne!(ensemble.peek("/lock").unwrap().1.ephemeral_owner, owner);
    assert_eq!(manager.session_generation().await, Some(2));
}

#[tokio::test]
async fn test_close_is_idempotent_and_next_operation_redials() {
    let (manager, ensemble) = memory_manager(&fast_config());
    let token = CancellationToken::new();
    manager.exists(&token, "/").await.unwrap();
    assert_eq!(ensemble.live_sessions(), 1);

    manager.close().await;
    assert!(!manager.has_session().await);
    assert_eq!(ensemble.live_sessions(), 0);
    manager.close().await;

    manager.exists(&token, "/").await.unwrap();
    assert_eq!(ensemble.connect_count(), 2);
}

#[tokio::test]
async fn test_close_without_session_is_noop() {
    let (manager, ensemble) = memory_manager(&fast_config());
    manager.close().await;
    assert_eq!(ensemble.connect_count(), 0);
}

#[tokio::test]
async fn test_metrics_are_exported() {
    let (manager, _ensemble) = memory_manager(&fast_config());
    manager
        .exists(&CancellationToken::new(), "/")
        .await
        .unwrap();
    let text = zksession::core::metrics::gather_metrics();
    assert!(text.contains("zksession_sessions_established_total"));
    assert!(text.contains("zksession_operations_in_flight"));
}

#[tokio::test]
async fn test_session_closed_answer_invalidates_and_redials() {
    init_tracing();
    let connector = ScriptedConnector::new();
    let manager = ConnectionManager::new(
        "127.0.0.1:2181",
        &fast_config(),
        connector.clone(),
    )
    .unwrap();
    connector.fail_next([KeeperError::SessionClosed]);

    let stat = manager
        .set(&CancellationToken::new(), "/x", Bytes::from_static(b"data"), 0)
        .await
        .unwrap();
    assert_eq!(stat.version, 1);
    assert_eq!(connector.connect_count(), 2);
    assert_eq!(connector.session(0).calls.load(Ordering::SeqCst), 1);
    assert_eq!(connector.session(1).calls.load(Ordering::SeqCst), 1);
    // The invalidated session is left to its driver; only the cache lets go of it.
    assert_eq!(connector.session(0).close_count(), 0);
}
