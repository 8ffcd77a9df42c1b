// src/core/registry.rs

//! Keeps one `ConnectionManager` per ensemble address.

use crate::config::ClientConfig;
use crate::core::KeeperError;
use crate::core::driver::Connector;
use crate::core::manager::ConnectionManager;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use tracing::info;

/// Hands out the manager for an address, creating it on first request.
///
/// Every manager shares the registry's configuration and connector.
pub struct ConnectionRegistry {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    managers: DashMap<String, Arc<ConnectionManager>>,
}

impl ConnectionRegistry {
    pub fn new(config: ClientConfig, connector: Arc<dyn Connector>) -> Result<Self, KeeperError> {
        config.validate()?;
        Ok(Self {
            config,
            connector,
            managers: DashMap::new(),
        })
    }

    /// The manager for `address`. A configuration fault for this address is
    /// returned to the caller and nothing is cached.
    pub fn get_or_create(&self, address: &str) -> Result<Arc<ConnectionManager>, KeeperError> {
        if let Some(manager) = self.managers.get(address) {
            return Ok(manager.clone());
        }
        match self.managers.entry(address.to_string()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let manager = Arc::new(ConnectionManager::new(
                    address,
                    &self.config,
                    self.connector.clone(),
                )?);
                entry.insert(manager.clone());
                Ok(manager)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.managers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }

    /// Closes and forgets the manager for `address`. Returns whether one existed.
    pub async fn remove(&self, address: &str) -> bool {
        match self.managers.remove(address) {
            Some((_, manager)) => {
                manager.close().await;
                true
            }
            None => false,
        }
    }

    /// Closes every manager's session. The managers stay registered.
    pub async fn close_all(&self) {
        let managers: Vec<Arc<ConnectionManager>> =
            self.managers.iter().map(|m| m.value().clone()).collect();
        info!("Closing {} coordination client(s)", managers.len());
        for manager in managers {
            manager.close().await;
        }
    }
}
