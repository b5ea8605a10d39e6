//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Authentication and host key collaborators
//!
//! The SSH front end does not own any credential store. It asks an
//! [`Authenticator`] about passwords, an optional [`PublicKeyAuthenticator`]
//! about public keys, and a [`KeyPairProvider`] for its host keys.

use crate::{ProxyError, ProxyResult};
use async_trait::async_trait;
use russh::keys::ssh_key::PublicKey;
use russh::keys::{Algorithm, PrivateKey};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Password authentication
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Return `true` if `password` is valid for `username`
    async fn authenticate(&self, username: &str, password: &str) -> bool;
}

/// Public key authentication
#[async_trait]
pub trait PublicKeyAuthenticator: Send + Sync {
    /// Return `true` if `key` may log in as `username`
    async fn authenticate(&self, username: &str, key: &PublicKey) -> bool;
}

/// Source of SSH host keys
pub trait KeyPairProvider: Send + Sync {
    /// Host keys offered during key exchange
    fn host_keys(&self) -> Vec<PrivateKey>;
}

/// Fixed table of users and passwords
#[derive(Default)]
pub struct StaticPasswordAuthenticator {
    users: HashMap<String, String>,
}

impl StaticPasswordAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user
    pub fn with_user(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.users.insert(username.into(), password.into());
        self
    }
}

impl std::fmt::Debug for StaticPasswordAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticPasswordAuthenticator")
            .field("users", &self.users.len())
            .finish()
    }
}

#[async_trait]
impl Authenticator for StaticPasswordAuthenticator {
    async fn authenticate(&self, username: &str, password: &str) -> bool {
        match self.users.get(username) {
            Some(expected) => constant_time_eq(expected.as_bytes(), password.as_bytes()),
            None => {
                // Same work for unknown users
                let _ = constant_time_eq(password.as_bytes(), password.as_bytes());
                false
            }
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Public keys allowed per user, in OpenSSH `authorized_keys` form
#[derive(Debug, Default)]
pub struct AuthorizedKeysAuthenticator {
    keys: HashMap<String, Vec<PublicKey>>,
}

impl AuthorizedKeysAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow `key` for `username`
    pub fn with_key(mut self, username: impl Into<String>, key: PublicKey) -> Self {
        self.keys.entry(username.into()).or_default().push(key);
        self
    }

    /// Allow every key in `contents` for `username`
    ///
    /// Blank lines and `#` comments are skipped. A line that does not parse
    /// fails the whole call.
    pub fn with_authorized_keys(
        mut self,
        username: impl Into<String>,
        contents: &str,
    ) -> ProxyResult<Self> {
        let username = username.into();
        for (number, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let key = parse_authorized_key(line).map_err(|e| {
                ProxyError::KeyMaterial(format!("authorized key line {}: {}", number + 1, e))
            })?;
            self.keys.entry(username.clone()).or_default().push(key);
        }
        Ok(self)
    }

    /// Allow every key in the file at `path` for `username`
    pub fn with_authorized_keys_file(
        self,
        username: impl Into<String>,
        path: impl AsRef<Path>,
    ) -> ProxyResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::KeyMaterial(format!("failed to read {}: {}", path.display(), e))
        })?;
        self.with_authorized_keys(username, &contents)
    }

    /// Number of keys allowed for `username`
    pub fn key_count(&self, username: &str) -> usize {
        self.keys.get(username).map_or(0, Vec::len)
    }
}

/// Parse `[options] key-type base64 [comment]`
fn parse_authorized_key(line: &str) -> Result<PublicKey, String> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let start = if parts.first().is_some_and(|p| is_key_type(p)) {
        0
    } else {
        1
    };
    let data = parts
        .get(start + 1)
        .ok_or_else(|| "missing key data".to_string())?;
    russh::keys::parse_public_key_base64(data).map_err(|e| e.to_string())
}

fn is_key_type(token: &str) -> bool {
    token.starts_with("ssh-") || token.starts_with("ecdsa-") || token.starts_with("sk-")
}

#[async_trait]
impl PublicKeyAuthenticator for AuthorizedKeysAuthenticator {
    async fn authenticate(&self, username: &str, key: &PublicKey) -> bool {
        self.keys
            .get(username)
            .is_some_and(|keys| keys.iter().any(|k| k.key_data() == key.key_data()))
    }
}

/// Host keys read from OpenSSH private key files
pub struct FileKeyPairProvider {
    paths: Vec<PathBuf>,
    keys: Vec<PrivateKey>,
}

impl FileKeyPairProvider {
    /// Load every key in `paths`
    ///
    /// Fails if the list is empty or any file is not an unencrypted OpenSSH key.
    pub fn new<I, P>(paths: I) -> ProxyResult<Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let paths: Vec<PathBuf> = paths.into_iter().map(Into::into).collect();
        if paths.is_empty() {
            return Err(ProxyError::KeyMaterial(
                "at least one host key is required".to_string(),
            ));
        }

        let mut keys = Vec::with_capacity(paths.len());
        for path in &paths {
            debug!(path = %path.display(), "Loading host key");
            let key = PrivateKey::read_openssh_file(path).map_err(|e| {
                ProxyError::KeyMaterial(format!(
                    "failed to load host key from {}: {}",
                    path.display(),
                    e
                ))
            })?;
            keys.push(key);
        }
        Ok(Self { paths, keys })
    }

    /// Files the keys were read from
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

impl KeyPairProvider for FileKeyPairProvider {
    fn host_keys(&self) -> Vec<PrivateKey> {
        self.keys.clone()
    }
}

/// Ed25519 host key generated once at construction
///
/// Clients see a new host key on every restart.
pub struct GeneratedKeyPairProvider {
    key: PrivateKey,
}

impl GeneratedKeyPairProvider {
    pub fn new() -> ProxyResult<Self> {
        let key = PrivateKey::random(&mut rand::thread_rng(), Algorithm::Ed25519)
            .map_err(|e| ProxyError::KeyMaterial(format!("failed to generate host key: {}", e)))?;
        warn!("Using a generated host key; it changes on every restart");
        Ok(Self { key })
    }

    /// Public half of the generated key
    pub fn public_key(&self) -> &PublicKey {
        self.key.public_key()
    }
}

impl KeyPairProvider for GeneratedKeyPairProvider {
    fn host_keys(&self) -> Vec<PrivateKey> {
        vec![self.key.clone()]
    }
}
