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

//! SSH front end configuration

use netconfd_codec::{CapabilitySet, consts};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Standard NETCONF over SSH port
pub const NETCONF_SSH_PORT: u16 = 830;

/// SSH front end configuration
///
/// Use the builder pattern methods to customize the configuration.
///
/// # Example
///
/// ```
/// use netconfd_server::SshServerConfig;
/// use std::time::Duration;
///
/// let config = SshServerConfig::default()
///     .with_bind_address("127.0.0.1:2830".parse().unwrap())
///     .with_idle_timeout(Duration::from_secs(600))
///     .with_max_auth_attempts(3);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct SshServerConfig {
    /// Address the SSH listener binds to
    pub bind_address: SocketAddr,

    /// Loop-back address of the internal NETCONF engine
    ///
    /// Port 0 lets the engine pick a free port; tunnels always connect to
    /// the address the engine actually bound.
    pub internal_address: SocketAddr,

    /// SSH connections without traffic for this long are closed
    pub idle_timeout: Duration,

    /// Time a connection has to authenticate before it is dropped
    pub auth_timeout: Duration,

    /// Delay imposed after a rejected authentication attempt
    pub auth_rejection_time: Duration,

    /// Connect timeout for the loop-back leg, also used as the hello timeout
    pub connection_timeout: Duration,

    /// Authentication attempts allowed per SSH connection
    pub max_auth_attempts: usize,

    /// Base capabilities advertised by the engine, `None` for both base versions
    pub base_capabilities: Option<CapabilitySet>,

    /// Extension capabilities advertised in addition to the base ones
    pub extension_capabilities: CapabilitySet,

    /// How long closing a channel waits for the in-flight write
    pub close_timeout: Duration,

    /// Number of SSH data buffers queued towards the engine per channel
    ///
    /// A channel whose queue fills up is closed.
    pub read_buffer: usize,
}

impl Default for SshServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from((Ipv4Addr::UNSPECIFIED, NETCONF_SSH_PORT)),
            internal_address: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            idle_timeout: Duration::from_secs(1800),
            auth_timeout: Duration::from_secs(30),
            auth_rejection_time: Duration::from_secs(1),
            connection_timeout: Duration::from_secs(20),
            max_auth_attempts: 6,
            base_capabilities: None,
            extension_capabilities: CapabilitySet::new(),
            close_timeout: Duration::from_secs(5),
            read_buffer: 1024,
        }
    }
}

impl SshServerConfig {
    /// Create a new configuration with the given SSH bind address
    pub fn new(bind_address: SocketAddr) -> Self {
        Self {
            bind_address,
            ..Default::default()
        }
    }

    /// Set the SSH bind address
    pub fn with_bind_address(mut self, address: SocketAddr) -> Self {
        self.bind_address = address;
        self
    }

    /// Set the internal engine address
    pub fn with_internal_address(mut self, address: SocketAddr) -> Self {
        self.internal_address = address;
        self
    }

    /// Set the idle timeout duration
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the time allowed for authentication
    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    /// Set the delay after a rejected authentication attempt
    pub fn with_auth_rejection_time(mut self, delay: Duration) -> Self {
        self.auth_rejection_time = delay;
        self
    }

    /// Set the loop-back connect and hello timeout
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the number of authentication attempts per connection
    pub fn with_max_auth_attempts(mut self, attempts: usize) -> Self {
        self.max_auth_attempts = attempts;
        self
    }

    /// Override the advertised base capabilities
    pub fn with_base_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.base_capabilities = Some(capabilities);
        self
    }

    /// Advertise additional capabilities
    pub fn with_extension_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.extension_capabilities = capabilities;
        self
    }

    /// Set the channel close timeout
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Set the per-channel read queue depth
    pub fn with_read_buffer(mut self, buffers: usize) -> Self {
        self.read_buffer = buffers;
        self
    }

    /// Validate the configuration
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.idle_timeout.is_zero() {
            return Err("idle_timeout must be greater than 0".to_string());
        }

        if self.auth_timeout.is_zero() {
            return Err("auth_timeout must be greater than 0".to_string());
        }

        if self.connection_timeout.is_zero() {
            return Err("connection_timeout must be greater than 0".to_string());
        }

        if self.close_timeout.is_zero() {
            return Err("close_timeout must be greater than 0".to_string());
        }

        if self.max_auth_attempts == 0 {
            return Err("max_auth_attempts must be greater than 0".to_string());
        }

        if self.read_buffer == 0 {
            return Err("read_buffer must be greater than 0".to_string());
        }

        if let Some(base) = &self.base_capabilities {
            if !base.has_base() {
                return Err(format!(
                    "base capabilities must include {} or {}",
                    consts::BASE_1_0,
                    consts::BASE_1_1
                ));
            }
            let unknown = base.difference(&CapabilitySet::known_base());
            if !unknown.is_empty() {
                return Err(format!("unknown base capabilities: {}", unknown));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SshServerConfig::default();
        assert_eq!(config.bind_address.port(), NETCONF_SSH_PORT);
        assert!(config.internal_address.ip().is_loopback());
        assert_eq!(config.close_timeout, Duration::from_secs(5));
        assert!(config.auth_timeout > config.auth_rejection_time);
        assert!(config.base_capabilities.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = SshServerConfig::default()
            .with_idle_timeout(Duration::from_secs(600))
            .with_max_auth_attempts(3)
            .with_base_capabilities(CapabilitySet::new().with(consts::BASE_1_1));

        assert_eq!(config.idle_timeout, Duration::from_secs(600));
        assert_eq!(config.max_auth_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut config = SshServerConfig::default();
        config.idle_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        config.idle_timeout = Duration::from_secs(60);
        config.read_buffer = 0;
        assert!(config.validate().is_err());

        config.read_buffer = 8;
        config.auth_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_base_capability_override_is_checked() {
        let config = SshServerConfig::default()
            .with_base_capabilities(CapabilitySet::new().with("urn:example:base:2.0"));
        assert!(config.validate().is_err());

        let config = SshServerConfig::default().with_base_capabilities(
            CapabilitySet::new()
                .with(consts::BASE_1_0)
                .with("urn:example:base:2.0"),
        );
        let message = config.validate().unwrap_err();
        assert!(message.contains("urn:example:base:2.0"));
    }
}
