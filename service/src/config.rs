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

//! Engine configuration

use crate::SessionConfig;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Configuration of the loop-back NETCONF engine
///
/// # Example
///
/// ```
/// use netconfd_service::EngineConfig;
/// use std::time::Duration;
///
/// let config = EngineConfig::default()
///     .with_max_sessions(64)
///     .with_idle_timeout(Duration::from_secs(600));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Loop-back address to listen on (port 0 picks a free port)
    pub bind_address: SocketAddr,

    /// Maximum number of concurrent sessions
    pub max_sessions: usize,

    /// Max time to wait for the next request on a session
    pub read_timeout: Duration,

    /// Sessions without activity for this long are closed
    pub idle_timeout: Duration,

    /// Max time for a single reply or notification write
    pub write_timeout: Duration,

    /// How long shutdown waits for sessions to close
    pub shutdown_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            max_sessions: 1000,
            read_timeout: Duration::from_secs(3600),
            idle_timeout: Duration::from_secs(3600),
            write_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl EngineConfig {
    /// Create a new configuration with the given bind address
    pub fn new(bind_address: SocketAddr) -> Self {
        Self {
            bind_address,
            ..Default::default()
        }
    }

    /// Set the maximum number of concurrent sessions
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    /// Set the read timeout duration
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the idle timeout duration
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the write timeout duration
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the shutdown timeout duration
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Per-session timeouts derived from this configuration
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            read_timeout: self.read_timeout,
            idle_timeout: self.idle_timeout,
            write_timeout: self.write_timeout,
            ..Default::default()
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_sessions == 0 {
            return Err("max_sessions must be greater than 0".to_string());
        }
        if self.read_timeout.is_zero() {
            return Err("read_timeout must be greater than 0".to_string());
        }
        if self.idle_timeout.is_zero() {
            return Err("idle_timeout must be greater than 0".to_string());
        }
        if self.write_timeout.is_zero() {
            return Err("write_timeout must be greater than 0".to_string());
        }
        if self.shutdown_timeout.is_zero() {
            return Err("shutdown_timeout must be greater than 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(config.bind_address.ip().is_loopback());
        assert_eq!(config.max_sessions, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_session_config_follows_engine() {
        let config = EngineConfig::default()
            .with_read_timeout(Duration::from_secs(5))
            .with_write_timeout(Duration::from_secs(2));
        let session = config.session_config();
        assert_eq!(session.read_timeout, Duration::from_secs(5));
        assert_eq!(session.write_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_validation() {
        let mut config = EngineConfig::default();
        config.max_sessions = 0;
        assert!(config.validate().is_err());

        config.max_sessions = 10;
        config.idle_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
