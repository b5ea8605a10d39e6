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

//! Hello exchange

use crate::session::SessionSetup;
use crate::{
    MonitoringSink, NegotiationProposal, NegotiationState, NetconfError, NetconfServerSession,
    Result, SessionConfig, SessionId,
};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use metrics::counter;
use netconfd_codec::{
    CapabilitySet, CodecError, Framing, HelloMessage, NetconfCodec, NetconfFrame, PeerHeader,
    consts,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, info, instrument, warn};

/// Runs the hello exchange on one connection
pub struct NetconfNegotiator<S> {
    framed: Framed<S, NetconfCodec>,
    peer: SocketAddr,
    proposal: NegotiationProposal,
    connection_timeout: Duration,
    monitoring: Arc<dyn MonitoringSink>,
    session_config: SessionConfig,
    state: Arc<AtomicU8>,
}

impl<S> NetconfNegotiator<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub(crate) fn new(
        stream: S,
        peer: SocketAddr,
        proposal: NegotiationProposal,
        connection_timeout: Duration,
        max_message_size: usize,
        monitoring: Arc<dyn MonitoringSink>,
    ) -> Self {
        let codec = NetconfCodec::new()
            .with_peer_header()
            .with_max_message_size(max_message_size);
        Self {
            framed: Framed::new(stream, codec),
            peer,
            proposal,
            connection_timeout,
            monitoring,
            session_config: SessionConfig::default(),
            state: Arc::new(AtomicU8::new(NegotiationState::AwaitingHello.as_u8())),
        }
    }

    /// Timeouts for the session built on success
    pub fn with_session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// Session ID announced to the peer
    pub fn session_id(&self) -> SessionId {
        self.proposal.session_id()
    }

    /// Current state
    pub fn state(&self) -> NegotiationState {
        NegotiationState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, next: NegotiationState) {
        let current = self.state();
        debug_assert!(current.can_transition_to(next), "{} -> {}", current, next);
        self.state.store(next.as_u8(), Ordering::Release);
    }

    /// Send the local hello, wait for the peer hello and build the session.
    ///
    /// On failure an `<rpc-error>` is written when the connection is still
    /// usable, and the connection is closed.
    #[instrument(skip(self), fields(session_id = %self.proposal.session_id(), peer = %self.peer))]
    pub async fn negotiate(mut self) -> Result<NetconfServerSession<S>> {
        match self.exchange().await {
            Ok((header, capabilities)) => Ok(self.complete(header, capabilities)),
            Err(error) => {
                self.fail(&error).await;
                Err(error)
            }
        }
    }

    /// Returns the peer identity and the agreed capabilities
    async fn exchange(&mut self) -> Result<(PeerHeader, CapabilitySet)> {
        self.framed.send(self.proposal.hello().to_bytes()).await?;
        debug!("Sent server hello");

        let (header, document) = timeout(self.connection_timeout, self.read_hello())
            .await
            .map_err(|_| NetconfError::Timeout)??;

        let hello = HelloMessage::parse(&document).map_err(|e| match e {
            CodecError::UnexpectedDocument { found, .. } => {
                NetconfError::NegotiationFailed(format!("expected hello, received {}", found))
            }
            other => NetconfError::NegotiationFailed(other.to_string()),
        })?;
        if let Some(id) = hello.session_id() {
            return Err(NetconfError::NegotiationFailed(format!(
                "client hello must not carry a session-id (got {})",
                id
            )));
        }

        let capabilities = self.proposal.hello().capabilities().intersection(hello.capabilities());
        if !capabilities.has_base() {
            debug!(remote = %hello.capabilities(), "No common base capability");
            return Err(NetconfError::CapabilityMismatch);
        }

        let header = header.unwrap_or_else(|| PeerHeader::unknown(self.peer));
        Ok((header, capabilities))
    }

    /// Read the optional header frame and the first message
    async fn read_hello(&mut self) -> Result<(Option<PeerHeader>, Bytes)> {
        let mut header = None;
        loop {
            match self.framed.next().await {
                Some(Ok(NetconfFrame::Header(h))) => {
                    debug!(header = %h, "Received peer header");
                    header = Some(h);
                }
                Some(Ok(NetconfFrame::Message(document))) => return Ok((header, document)),
                Some(Err(e)) => return Err(e.into()),
                None => {
                    return Err(NetconfError::NegotiationFailed(
                        "connection closed before hello".to_string(),
                    ));
                }
            }
        }
    }

    fn complete(self, header: PeerHeader, capabilities: CapabilitySet) -> NetconfServerSession<S> {
        let chunked = capabilities.contains(consts::BASE_1_1);
        let exi = capabilities.contains(consts::EXI_1_0);

        let NetconfNegotiator {
            mut framed,
            proposal,
            monitoring,
            session_config,
            state,
            ..
        } = self;

        if chunked {
            framed.codec_mut().set_framing(Framing::Chunked);
        }
        state.store(NegotiationState::Negotiated.as_u8(), Ordering::Release);

        info!(
            user = %header.username(),
            transport = %header.transport(),
            chunked,
            exi,
            "Hello exchange complete"
        );
        counter!("netconfd.negotiations.succeeded").increment(1);

        let setup = SessionSetup {
            id: proposal.session_id(),
            header,
            capabilities,
            exi,
            negotiation: state,
        };
        let session = NetconfServerSession::new(framed, setup, monitoring.clone(), session_config);
        monitoring.on_session_up(&session.handle());
        session
    }

    async fn fail(&mut self, error: &NetconfError) {
        warn!(error = %error, "Negotiation failed");
        counter!("netconfd.negotiations.failed").increment(1);
        self.set_state(NegotiationState::NegotiationFailed);

        if let Some(rpc_error) = error.to_rpc_error() {
            if let Err(e) = self.framed.send(rpc_error.to_reply(None)).await {
                debug!(error = %e, "Could not report negotiation failure");
            }
        }
        let _ = SinkExt::<Bytes>::close(&mut self.framed).await;
        self.set_state(NegotiationState::Closed);
    }
}

impl<S> std::fmt::Debug for NetconfNegotiator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetconfNegotiator")
            .field("session_id", &self.proposal.session_id())
            .field("peer", &self.peer)
            .field(
                "state",
                &NegotiationState::from_u8(self.state.load(Ordering::Acquire)),
            )
            .finish()
    }
}
