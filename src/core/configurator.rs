// src/core/configurator.rs

//! Builds the transport options for each dial and injects credentials into new
//! sessions.
//!
//! All checks that do not need the network run in `TlsAuthConfigurator::new`, so a
//! bad TLS setup is reported to the caller before the first dial is attempted.

use crate::config::ClientConfig;
use crate::core::KeeperError;
use crate::core::auth::AuthCredential;
use crate::core::driver::{ConnectOptions, DriverSession};
use crate::core::transport::{
    Dialer, HostProvider, RoundRobinHosts, TlsMaterial, parse_servers, server_host,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Transport and credential settings for one ensemble address.
#[derive(Debug)]
pub struct TlsAuthConfigurator {
    address: String,
    servers: Vec<String>,
    hosts: Arc<RoundRobinHosts>,
    tls: Option<TlsMaterial>,
    auth_file: Option<PathBuf>,
    connect_timeout: Duration,
    session_timeout: Duration,
    notification_capacity: usize,
}

impl TlsAuthConfigurator {
    /// Validates `config` against `address` and loads any TLS material.
    pub fn new(address: &str, config: &ClientConfig) -> Result<Self, KeeperError> {
        config.validate()?;
        let servers = parse_servers(address)?;

        let tls = if config.tls.is_enabled() {
            // Verification is pinned to one server name, so only one member may be named.
            if servers.len() > 1 {
                return Err(KeeperError::Config(format!(
                    "TLS requires that all ensemble servers validate to a single server name, \
                     but address '{address}' names {} servers",
                    servers.len()
                )));
            }
            let server_name = server_host(&servers[0]);
            info!("Using TLS for {}/{}", address, server_name);
            Some(TlsMaterial::load(&config.tls, server_name)?)
        } else {
            None
        };

        Ok(Self {
            address: address.to_string(),
            hosts: Arc::new(RoundRobinHosts::new(servers.clone())),
            servers,
            tls,
            auth_file: config.auth_file.clone(),
            connect_timeout: config.connect_timeout,
            session_timeout: config.session_timeout,
            notification_capacity: config.notification_capacity,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn servers(&self) -> &[String] {
        &self.servers
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// The dialer handed to the driver: TLS when material is loaded, plain otherwise.
    pub fn dialer(&self) -> Dialer {
        match &self.tls {
            Some(material) => Dialer::Tls {
                timeout: self.connect_timeout,
                connector: material.connector(),
                server_name: material.server_name().clone(),
            },
            None => Dialer::plain(self.connect_timeout),
        }
    }

    /// Options for one `connect` call. The host rotation carries over between dials.
    pub fn connect_options(&self) -> ConnectOptions {
        let host_provider: Arc<dyn HostProvider> = self.hosts.clone();
        ConnectOptions {
            servers: self.servers.clone(),
            session_timeout: self.session_timeout,
            dialer: self.dialer(),
            host_provider,
            notification_capacity: self.notification_capacity,
        }
    }

    /// Reads the credential file and adds it to `session`.
    ///
    /// Never fails the session: problems are logged and the session carries on
    /// unauthenticated. Returns whether a credential was added.
    pub async fn inject_credentials(&self, session: &dyn DriverSession) -> bool {
        let Some(auth_file) = &self.auth_file else {
            return false;
        };
        let credential = match AuthCredential::load(auth_file).await {
            Ok(credential) => credential,
            Err(e) => {
                error!("{}", e);
                return false;
            }
        };
        if let Err(e) = session
            .add_auth(&credential.scheme, &credential.secret)
            .await
        {
            error!("failed to add auth to zk connection: {}", e);
            return false;
        }
        debug!(
            "Added '{}' credentials to session for addr {}",
            credential.scheme, self.address
        );
        true
    }
}
