// src/core/transport/tls.rs

//! Loading mutual-TLS material from PEM files and building the client connector.

use crate::config::TlsConfig;
use crate::core::KeeperError;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};

/// Certificate chain, key and trust roots, loaded once and never changed.
pub struct TlsMaterial {
    connector: TlsConnector,
    server_name: ServerName<'static>,
    chain_len: usize,
    roots_len: usize,
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("server_name", &self.server_name)
            .field("chain_len", &self.chain_len)
            .field("roots_len", &self.roots_len)
            .finish()
    }
}

impl TlsMaterial {
    /// Loads the configured PEM files and pins verification to `server_name`.
    ///
    /// Every failure here is a configuration fault: unreadable files, files with
    /// no PEM items, or a key the certificate does not accept.
    pub fn load(config: &TlsConfig, server_name: &str) -> Result<Self, KeeperError> {
        let (Some(cert_path), Some(key_path)) = (&config.cert_path, &config.key_path) else {
            return Err(KeeperError::Config(
                "TLS requires both tls.cert_path and tls.key_path".into(),
            ));
        };
        let ca_path = config
            .ca_path
            .as_ref()
            .ok_or_else(|| KeeperError::Config("TLS requires tls.ca_path".into()))?;

        let certs = load_certs(cert_path)?;
        let key = load_key(key_path)?;
        let roots = load_roots(ca_path)?;
        let chain_len = certs.len();
        let roots_len = roots.len();

        let server_name = ServerName::try_from(server_name.to_string()).map_err(|_| {
            KeeperError::Config(format!("Invalid TLS server name '{server_name}'"))
        })?;

        let client_config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_client_auth_cert(certs, key)
            .map_err(|e| {
                KeeperError::Tls(format!(
                    "Unable to use cert '{}' with key '{}': {e}",
                    cert_path.display(),
                    key_path.display()
                ))
            })?;

        Ok(Self {
            connector: TlsConnector::from(Arc::new(client_config)),
            server_name,
            chain_len,
            roots_len,
        })
    }

    pub fn connector(&self) -> TlsConnector {
        self.connector.clone()
    }

    pub fn server_name(&self) -> &ServerName<'static> {
        &self.server_name
    }
}

/// Loads TLS certificates from a PEM file.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, KeeperError> {
    let cert_file = File::open(path).map_err(|e| {
        KeeperError::Tls(format!(
            "Failed to open certificate file '{}': {e}",
            path.display()
        ))
    })?;
    let mut cert_reader = BufReader::new(cert_file);
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
            KeeperError::Tls(format!(
                "Failed to parse certificates in '{}': {e}",
                path.display()
            ))
        })?;
    if certs.is_empty() {
        return Err(KeeperError::Tls(format!(
            "No certificates found in '{}'",
            path.display()
        )));
    }
    Ok(certs)
}

/// Loads a private key from a PEM file.
pub fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, KeeperError> {
    let key_file = File::open(path).map_err(|e| {
        KeeperError::Tls(format!(
            "Failed to open private key file '{}': {e}",
            path.display()
        ))
    })?;
    let mut key_reader = BufReader::new(key_file);
    rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| {
            KeeperError::Tls(format!(
                "Failed to parse private key file '{}': {e}",
                path.display()
            ))
        })?
        .ok_or_else(|| {
            KeeperError::Tls(format!(
                "No private key found in key file '{}'",
                path.display()
            ))
        })
}

/// Loads the CA bundle into a root store.
pub fn load_roots(path: &Path) -> Result<rustls::RootCertStore, KeeperError> {
    let certs = load_certs(path)?;
    let mut roots = rustls::RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(certs);
    if added == 0 {
        return Err(KeeperError::Tls(format!(
            "No usable CA certificates in '{}' ({ignored} rejected)",
            path.display()
        )));
    }
    Ok(roots)
}
