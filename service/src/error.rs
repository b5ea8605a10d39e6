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

//! Error types for the NETCONF session engine

use crate::types::SessionId;
use netconfd_codec::{CodecError, ErrorTag, ErrorType, RpcError};
use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, NetconfError>;

/// NETCONF engine error types
#[derive(Debug, Error)]
pub enum NetconfError {
    /// I/O error from the underlying stream
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing or document error from the codec layer
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Socket setup failed
    #[error("Transport error: {0}")]
    Transport(#[from] netconfd_transport::TransportError),

    /// Invalid configuration, reported at construction
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The peer hello was missing or unacceptable
    #[error("Negotiation failed: {0}")]
    NegotiationFailed(String),

    /// Local and peer capabilities share no base protocol version
    #[error("No common base capability")]
    CapabilityMismatch,

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,

    /// Session with the given ID was not found
    #[error("Session {0} not found")]
    SessionNotFound(SessionId),

    /// Session has been closed
    #[error("Session closed")]
    SessionClosed,

    /// Server is not running
    #[error("Server not running")]
    ServerNotRunning,

    /// Maximum number of sessions reached
    #[error("Maximum sessions ({0}) reached")]
    MaxSessionsReached(usize),

    /// Generic error with a message
    #[error("{0}")]
    Other(String),
}

impl NetconfError {
    /// Check if the error is recoverable
    ///
    /// Recoverable errors end one session but leave the engine healthy.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            NetconfError::Timeout | NetconfError::SessionClosed | NetconfError::Io(_)
        )
    }

    /// Check if the error is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            NetconfError::SessionNotFound(_) | NetconfError::SessionClosed | NetconfError::Io(_)
        )
    }

    /// Check if the error is a protocol error
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            NetconfError::Codec(_)
                | NetconfError::NegotiationFailed(_)
                | NetconfError::CapabilityMismatch
        )
    }

    /// Check if the error was caused by configuration
    pub fn is_configuration_error(&self) -> bool {
        match self {
            NetconfError::Configuration(_) => true,
            NetconfError::Transport(e) => e.is_configuration_error(),
            _ => false,
        }
    }

    /// The `<rpc-error>` reported to the peer for a protocol failure.
    ///
    /// Returns `None` for failures where the transport is gone or the
    /// peer is owed no explanation.
    pub fn to_rpc_error(&self) -> Option<RpcError> {
        let error = match self {
            NetconfError::NegotiationFailed(reason) => {
                RpcError::new(ErrorType::Rpc, ErrorTag::MalformedMessage).with_message(reason)
            }
            NetconfError::Codec(e) if e.is_document_error() => {
                RpcError::new(ErrorType::Rpc, ErrorTag::MalformedMessage)
                    .with_message(e.to_string())
            }
            NetconfError::CapabilityMismatch => {
                RpcError::new(ErrorType::Protocol, ErrorTag::OperationFailed)
                    .with_message("no common base capability")
            }
            NetconfError::Timeout => RpcError::new(ErrorType::Rpc, ErrorTag::ResourceDenied)
                .with_message("hello not received in time"),
            _ => return None,
        };
        Some(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_is_recoverable() {
        assert!(NetconfError::Timeout.is_recoverable());
        assert!(NetconfError::SessionClosed.is_recoverable());
        assert!(!NetconfError::ServerNotRunning.is_recoverable());
        assert!(!NetconfError::MaxSessionsReached(100).is_recoverable());
    }

    #[test]
    fn test_error_is_connection_error() {
        assert!(NetconfError::SessionNotFound(SessionId::new(1)).is_connection_error());
        assert!(NetconfError::SessionClosed.is_connection_error());
        assert!(!NetconfError::Timeout.is_connection_error());
    }

    #[test]
    fn test_error_classification() {
        assert!(NetconfError::CapabilityMismatch.is_protocol_error());
        assert!(NetconfError::Configuration("x".into()).is_configuration_error());
        assert!(!NetconfError::CapabilityMismatch.is_configuration_error());
    }

    #[test]
    fn test_rpc_error_mapping() {
        let error = NetconfError::CapabilityMismatch.to_rpc_error().unwrap();
        assert_eq!(error.error_tag(), ErrorTag::OperationFailed);
        assert!(NetconfError::SessionClosed.to_rpc_error().is_none());
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        assert!(NetconfError::Io(io).to_rpc_error().is_none());
    }

    #[test]
    fn test_error_display() {
        let err = NetconfError::SessionNotFound(SessionId::new(42));
        assert_eq!(err.to_string(), "Session session-42 not found");

        let err = NetconfError::MaxSessionsReached(1000);
        assert_eq!(err.to_string(), "Maximum sessions (1000) reached");
    }
}
