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

//! Error types for the SSH front end

use netconfd_service::NetconfError;
use netconfd_transport::TransportError;
use std::io;
use std::time::Duration;

/// Result type for SSH front end operations
pub type ProxyResult<T> = std::result::Result<T, ProxyError>;

/// Errors raised by the SSH front end
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// I/O error on the loop-back connection
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Socket setup or connect failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The internal engine failed
    #[error("Engine error: {0}")]
    Engine(#[from] NetconfError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Host or authorized key could not be loaded
    #[error("Invalid key material: {0}")]
    KeyMaterial(String),

    /// The channel was closed before the write was issued
    #[error("SSH channel closed")]
    ChannelClosed,

    /// The SSH library refused the write
    #[error("SSH channel data not written")]
    NotWritten,

    /// The write was still in flight when the close timeout expired
    #[error("Write abandoned after {0:?}")]
    WriteAbandoned(Duration),

    /// SSH protocol error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),
}

impl ProxyError {
    /// Check if this error is recoverable
    ///
    /// Only errors local to one write or one tunnel are recoverable; the
    /// front end keeps serving other clients.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ProxyError::ChannelClosed
                | ProxyError::NotWritten
                | ProxyError::WriteAbandoned(_)
                | ProxyError::Transport(TransportError::ConnectTimeout { .. })
        )
    }

    /// Check if this error ends the affected tunnel
    pub fn is_connection_error(&self) -> bool {
        match self {
            ProxyError::Io(_)
            | ProxyError::ChannelClosed
            | ProxyError::NotWritten
            | ProxyError::WriteAbandoned(_)
            | ProxyError::Ssh(_) => true,
            ProxyError::Transport(e) => e.is_connection_error(),
            ProxyError::Engine(e) => e.is_connection_error(),
            _ => false,
        }
    }

    /// Check if this error must be fixed before the server can start
    pub fn is_configuration_error(&self) -> bool {
        match self {
            ProxyError::Configuration(_) | ProxyError::KeyMaterial(_) => true,
            ProxyError::Transport(e) => e.is_configuration_error(),
            ProxyError::Engine(e) => e.is_configuration_error(),
            _ => false,
        }
    }
}
