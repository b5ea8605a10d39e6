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

//! Error types for the transport layer

use crate::Backend;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Result type for transport operations
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Transport error types
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O error from the underlying socket
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The selected backend cannot express the requested socket option
    #[error("{option} is not supported by the {backend} transport")]
    UnsupportedConfiguration {
        /// Option that was requested
        option: &'static str,
        /// Backend that rejected it
        backend: Backend,
    },

    /// A configuration value was rejected before touching the socket
    #[error("Invalid transport configuration: {0}")]
    InvalidConfiguration(String),

    /// Connecting to the remote address did not complete in time
    #[error("Connection to {addr} timed out after {timeout:?}")]
    ConnectTimeout {
        /// Target address
        addr: SocketAddr,
        /// Configured connect timeout
        timeout: Duration,
    },

    /// The executor has been shut down and accepts no more work
    #[error("Executor has been shut down")]
    ExecutorShutdown,
}

impl TransportError {
    /// Check if the error is a configuration failure rather than a runtime fault
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            TransportError::UnsupportedConfiguration { .. } | TransportError::InvalidConfiguration(_)
        )
    }

    /// Check if the error is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            TransportError::Io(_) | TransportError::ConnectTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_is_configuration_error() {
        let err = TransportError::UnsupportedConfiguration {
            option: "TCP_MD5SIG",
            backend: Backend::Portable,
        };
        assert!(err.is_configuration_error());
        assert!(!err.is_connection_error());
        assert_eq!(
            err.to_string(),
            "TCP_MD5SIG is not supported by the portable transport"
        );
    }

    #[test]
    fn test_connect_timeout_is_connection_error() {
        let err = TransportError::ConnectTimeout {
            addr: "127.0.0.1:830".parse().unwrap(),
            timeout: Duration::from_secs(2),
        };
        assert!(err.is_connection_error());
        assert!(!err.is_configuration_error());
    }
}
