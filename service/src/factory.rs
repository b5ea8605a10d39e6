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

//! Negotiator factory and its builder
//!
//! The factory owns everything a hello exchange needs that does not depend
//! on the connection: local capabilities, the connection timeout, the
//! monitoring sink and the session ID source. Configuration mistakes are
//! reported by [`NegotiatorFactoryBuilder::build`], before any connection
//! is accepted.

use crate::{
    MonitoringSink, NetconfError, NetconfNegotiator, Result, SessionId, SessionIdProvider,
};
use netconfd_codec::{CapabilitySet, HelloMessage, consts};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

/// Default time allowed for the peer hello
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(20);

/// The local half of a hello exchange, fixed before any byte is sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationProposal {
    hello: HelloMessage,
    session_id: SessionId,
}

impl NegotiationProposal {
    /// Server hello to send
    pub fn hello(&self) -> &HelloMessage {
        &self.hello
    }

    /// Session ID announced in the hello
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }
}

/// Builder for [`NegotiatorFactory`]
///
/// # Example
///
/// ```
/// use netconfd_service::{NegotiatorFactoryBuilder, TracingMonitoringSink};
/// use netconfd_codec::consts;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let factory = NegotiatorFactoryBuilder::new()
///     .with_connection_timeout(Duration::from_secs(10))
///     .with_base_capabilities([consts::BASE_1_0, consts::BASE_1_1].into_iter().collect())
///     .with_monitoring(Arc::new(TracingMonitoringSink))
///     .build()
///     .unwrap();
/// assert!(factory.capabilities().contains(consts::BASE_1_1));
/// ```
#[derive(Clone)]
pub struct NegotiatorFactoryBuilder {
    connection_timeout: Duration,
    base_capabilities: CapabilitySet,
    extension_capabilities: CapabilitySet,
    monitoring: Option<Arc<dyn MonitoringSink>>,
    id_provider: Option<Arc<SessionIdProvider>>,
    max_message_size: usize,
}

impl NegotiatorFactoryBuilder {
    /// Start from the defaults: every known base capability, a 20 second
    /// connection timeout and a private ID provider
    pub fn new() -> Self {
        Self {
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            base_capabilities: CapabilitySet::known_base(),
            extension_capabilities: CapabilitySet::new(),
            monitoring: None,
            id_provider: None,
            max_message_size: consts::DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Time allowed for the peer hello
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Base capabilities to advertise; `base:1.0` is always added
    pub fn with_base_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.base_capabilities = capabilities;
        self
    }

    /// Additional capabilities advertised as-is
    pub fn with_extension_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.extension_capabilities = capabilities;
        self
    }

    /// Sink told about every session (required)
    pub fn with_monitoring(mut self, monitoring: Arc<dyn MonitoringSink>) -> Self {
        self.monitoring = Some(monitoring);
        self
    }

    /// Share a session ID source with other factories
    pub fn with_id_provider(mut self, provider: Arc<SessionIdProvider>) -> Self {
        self.id_provider = Some(provider);
        self
    }

    /// Bound the size of a single inbound message
    pub fn with_max_message_size(mut self, limit: usize) -> Self {
        self.max_message_size = limit;
        self
    }

    /// Validate and build the factory
    pub fn build(self) -> Result<NegotiatorFactory> {
        if self.connection_timeout.is_zero() {
            return Err(NetconfError::Configuration(
                "connection_timeout must be greater than 0".to_string(),
            ));
        }
        if self.max_message_size == 0 {
            return Err(NetconfError::Configuration(
                "max_message_size must be greater than 0".to_string(),
            ));
        }
        let unknown = self.base_capabilities.difference(&CapabilitySet::known_base());
        if !unknown.is_empty() {
            return Err(NetconfError::Configuration(format!(
                "unknown base capabilities {}",
                unknown
            )));
        }
        let monitoring = self.monitoring.ok_or_else(|| {
            NetconfError::Configuration("a monitoring sink is required".to_string())
        })?;

        let mut capabilities = self.base_capabilities.with(consts::BASE_1_0);
        capabilities.extend(&self.extension_capabilities);

        Ok(NegotiatorFactory {
            capabilities,
            connection_timeout: self.connection_timeout,
            monitoring,
            id_provider: self.id_provider.unwrap_or_default(),
            max_message_size: self.max_message_size,
        })
    }
}

impl Default for NegotiatorFactoryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for NegotiatorFactoryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NegotiatorFactoryBuilder")
            .field("connection_timeout", &self.connection_timeout)
            .field("base_capabilities", &self.base_capabilities)
            .field("extension_capabilities", &self.extension_capabilities)
            .field("has_monitoring", &self.monitoring.is_some())
            .finish()
    }
}

/// Produces one negotiator per accepted connection
pub struct NegotiatorFactory {
    capabilities: CapabilitySet,
    connection_timeout: Duration,
    monitoring: Arc<dyn MonitoringSink>,
    id_provider: Arc<SessionIdProvider>,
    max_message_size: usize,
}

impl NegotiatorFactory {
    /// Capabilities advertised in every server hello
    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    /// Time allowed for the peer hello
    pub fn connection_timeout(&self) -> Duration {
        self.connection_timeout
    }

    /// Session ID source
    pub fn id_provider(&self) -> &Arc<SessionIdProvider> {
        &self.id_provider
    }

    /// Allocate a session ID and build the hello announcing it
    pub fn proposal(&self) -> NegotiationProposal {
        let session_id = self.id_provider.next_id();
        NegotiationProposal {
            hello: HelloMessage::server(self.capabilities.clone(), session_id.as_u64()),
            session_id,
        }
    }

    /// Bind a fresh proposal to an accepted connection
    pub fn negotiator<S>(&self, stream: S, peer: SocketAddr) -> NetconfNegotiator<S>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        NetconfNegotiator::new(
            stream,
            peer,
            self.proposal(),
            self.connection_timeout,
            self.max_message_size,
            self.monitoring.clone(),
        )
    }
}

impl std::fmt::Debug for NegotiatorFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NegotiatorFactory")
            .field("capabilities", &self.capabilities)
            .field("connection_timeout", &self.connection_timeout)
            .field("next_session_id", &self.id_provider.peek())
            .finish()
    }
}
