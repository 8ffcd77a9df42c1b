// src/core/auth.rs

//! Parsing of the `scheme:secret` credential injected into each new session.

use bytes::Bytes;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Why a credential file could not be turned into an `AuthCredential`.
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("auth file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse auth file content, expected format <scheme>:<auth> but saw: {0}")]
    Malformed(String),
}

/// A credential added to a session with `add_auth`.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthCredential {
    pub scheme: String,
    pub secret: Bytes,
}

// The secret never appears in logs.
impl fmt::Debug for AuthCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthCredential")
            .field("scheme", &self.scheme)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl FromStr for AuthCredential {
    type Err = CredentialError;

    /// Trailing newlines are trimmed, then the line is split on the first `:`.
    /// The secret may itself contain colons.
    fn from_str(content: &str) -> Result<Self, Self::Err> {
        let line = content.trim_end_matches(['\n', '\r']);
        match line.split_once(':') {
            Some((scheme, secret)) if !scheme.is_empty() => Ok(AuthCredential {
                scheme: scheme.to_string(),
                secret: Bytes::copy_from_slice(secret.as_bytes()),
            }),
            _ => Err(CredentialError::Malformed(line.to_string())),
        }
    }
}

impl AuthCredential {
    /// Reads and parses the credential file.
    pub async fn load(path: &Path) -> Result<Self, CredentialError> {
        let content = tokio::fs::read_to_string(path).await?;
        content.parse()
    }
}
