// tests/integration/registry_test.rs

use super::test_helpers::{fast_config, init_tracing};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use zksession::config::TlsConfig;
use zksession::core::KeeperError;
use zksession::core::driver::memory::MemoryEnsemble;
use zksession::core::registry::ConnectionRegistry;

fn registry() -> (ConnectionRegistry, MemoryEnsemble) {
    init_tracing();
    let ensemble = MemoryEnsemble::new();
    let registry = ConnectionRegistry::new(fast_config(), Arc::new(ensemble.clone())).unwrap();
    (registry, ensemble)
}

#[tokio::test]
async fn test_same_address_shares_manager() {
    let (registry, _ensemble) = registry();
    let a = registry.get_or_create("zk1:2181").unwrap();
    let b = registry.get_or_create("zk1:2181").unwrap();
    let c = registry.get_or_create("zk2:2181").unwrap();

    assert!(Arc::ptr_eq(&a, &b));
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!(registry.len(), 2);
    assert_eq!(c.address(), "zk2:2181");
}

#[tokio::test]
async fn test_remove_closes_manager_session() {
    let (registry, ensemble) = registry();
    let manager = registry.get_or_create("zk1:2181").unwrap();
    manager
        .exists(&CancellationToken::new(), "/")
        .await
        .unwrap();
    assert_eq!(ensemble.live_sessions(), 1);

    assert!(registry.remove("zk1:2181").await);
    assert!(registry.is_empty());
    assert_eq!(ensemble.live_sessions(), 0);
    assert!(!registry.remove("zk1:2181").await);
}

#[tokio::test]
async fn test_close_all_keeps_managers_registered() {
    let (registry, ensemble) = registry();
    let token = CancellationToken::new();
    for address in ["zk1:2181", "zk2:2181", "zk3:2181"] {
        registry
            .get_or_create(address)
            .unwrap()
            .exists(&token, "/")
            .await
            .unwrap();
    }
    assert_eq!(ensemble.live_sessions(), 3);

    registry.close_all().await;
    assert_eq!(ensemble.live_sessions(), 0);
    assert_eq!(registry.len(), 3);

    // A registered manager redials on its next operation.
    registry
        .get_or_create("zk2:2181")
        .unwrap()
        .exists(&token, "/")
        .await
        .unwrap();
    assert_eq!(ensemble.connect_count(), 4);
}

#[tokio::test]
async fn test_address_fault_is_not_cached() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut config = fast_config();
    config.tls = TlsConfig {
        cert_path: Some(dir.path().join("c.pem")),
        key_path: Some(dir.path().join("k.pem")),
        ca_path: Some(dir.path().join("ca.pem")),
    };
    let registry = ConnectionRegistry::new(config, Arc::new(MemoryEnsemble::new())).unwrap();

    let err = registry.get_or_create("zk1:2181,zk2:2181").unwrap_err();
    assert!(matches!(err, KeeperError::Config(_)));
    assert!(registry.is_empty());
}

#[test]
fn test_invalid_config_rejected() {
    let mut config = fast_config();
    config.concurrency_limit = 0;
    let err = ConnectionRegistry::new(config, Arc::new(MemoryEnsemble::new())).err().unwrap();
    assert!(err.is_config());
}
