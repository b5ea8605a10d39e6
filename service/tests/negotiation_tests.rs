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

//! Hello exchange tests
//!
//! The negotiator runs over an in-memory duplex stream; the test plays the
//! role of the front end (peer header) and the NETCONF client.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use netconfd_codec::{
    CapabilitySet, Framing, HelloMessage, NetconfCodec, NetconfFrame, PeerHeader, TransportKind,
    consts,
};
use netconfd_service::{
    DefaultRpcHandler, MonitoringSink, NegotiationState, NegotiatorFactory,
    NegotiatorFactoryBuilder, NetconfError, SessionHandle, SessionId, SessionIdProvider,
    SessionManager,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio_util::codec::Framed;
use tracing_test::traced_test;

// ============================================================================
// Helper Functions
// ============================================================================

#[derive(Default)]
struct CountingSink {
    up: AtomicUsize,
    down: AtomicUsize,
}

impl MonitoringSink for CountingSink {
    fn on_session_up(&self, _session: &SessionHandle) {
        self.up.fetch_add(1, Ordering::SeqCst);
    }

    fn on_session_down(&self, _session: &SessionHandle) {
        self.down.fetch_add(1, Ordering::SeqCst);
    }
}

fn factory_with(monitoring: Arc<CountingSink>, timeout: Duration) -> NegotiatorFactory {
    NegotiatorFactoryBuilder::new()
        .with_connection_timeout(timeout)
        .with_monitoring(monitoring)
        .build()
        .unwrap()
}

fn peer() -> SocketAddr {
    "198.51.100.7:41000".parse().unwrap()
}

fn client_side(stream: DuplexStream) -> Framed<DuplexStream, NetconfCodec> {
    Framed::new(stream, NetconfCodec::new())
}

async fn read_server_hello(client: &mut Framed<DuplexStream, NetconfCodec>) -> HelloMessage {
    let frame = client.next().await.unwrap().unwrap();
    HelloMessage::parse(&frame.into_message().unwrap()).unwrap()
}

async fn read_text(client: &mut Framed<DuplexStream, NetconfCodec>) -> String {
    let frame = client.next().await.unwrap().unwrap();
    String::from_utf8(frame.into_message().unwrap().to_vec()).unwrap()
}

fn ssh_header() -> PeerHeader {
    PeerHeader::new("operator", peer(), TransportKind::Ssh, "ssh-3")
}

// ============================================================================
// Successful Negotiation
// ============================================================================

#[tokio::test]
#[traced_test]
async fn test_base_1_0_exchange() {
    let monitoring = Arc::new(CountingSink::default());
    let factory = factory_with(monitoring.clone(), Duration::from_secs(5));
    let (server, client) = tokio::io::duplex(16 * 1024);
    let mut client = client_side(client);

    let negotiator = factory.negotiator(server, peer());
    assert_eq!(negotiator.state(), NegotiationState::AwaitingHello);
    let negotiation = tokio::spawn(negotiator.negotiate());

    let hello = read_server_hello(&mut client).await;
    assert_eq!(hello.session_id(), Some(1));
    assert_eq!(hello.capabilities(), &CapabilitySet::known_base());

    client.send(NetconfFrame::Header(ssh_header())).await.unwrap();
    client
        .send(HelloMessage::client(CapabilitySet::new().with(consts::BASE_1_0)).to_bytes())
        .await
        .unwrap();

    let session = negotiation.await.unwrap().unwrap();
    let handle = session.handle();
    assert_eq!(handle.session_id(), SessionId::new(1));
    assert_eq!(
        handle.capabilities(),
        &CapabilitySet::new().with(consts::BASE_1_0)
    );
    assert_eq!(handle.framing(), Framing::EndOfMessage);
    assert_eq!(handle.username(), "operator");
    assert_eq!(handle.header().transport(), TransportKind::Ssh);
    assert_eq!(handle.negotiation_state(), NegotiationState::Negotiated);
    assert_eq!(handle.in_rpc_ok(), 0);
    assert!(!handle.exi_negotiated());
    assert_eq!(monitoring.up.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_base_1_1_switches_to_chunked() {
    let monitoring = Arc::new(CountingSink::default());
    let factory = factory_with(monitoring.clone(), Duration::from_secs(5));
    let manager = Arc::new(SessionManager::new(Duration::from_secs(1)));
    let (server, client) = tokio::io::duplex(16 * 1024);
    let mut client = client_side(client);

    let negotiation = tokio::spawn(factory.negotiator(server, peer()).negotiate());
    read_server_hello(&mut client).await;

    let capabilities = CapabilitySet::new()
        .with(consts::BASE_1_0)
        .with(consts::BASE_1_1)
        .with(consts::EXI_1_0);
    client
        .send(HelloMessage::client(capabilities).to_bytes())
        .await
        .unwrap();
    // Sent before the server finished negotiating; must not be lost.
    client.codec_mut().set_framing(Framing::Chunked);
    client
        .send(Bytes::from(format!(
            "<rpc xmlns=\"{}\" message-id=\"42\"><close-session/></rpc>",
            consts::BASE_NAMESPACE
        )))
        .await
        .unwrap();

    let session = negotiation.await.unwrap().unwrap();
    let handle = session.handle();
    assert_eq!(handle.framing(), Framing::Chunked);
    assert!(handle.exi_negotiated());
    assert_eq!(handle.username(), "unknown");
    assert_eq!(handle.header().transport(), TransportKind::Tcp);

    manager.spawn_session(session, Arc::new(DefaultRpcHandler::new(manager.clone())));

    let reply = read_text(&mut client).await;
    assert!(reply.contains("message-id=\"42\""));
    assert!(reply.contains("<ok/>"));
    assert!(client.next().await.is_none());

    assert_eq!(handle.in_rpc_ok(), 1);
    assert_eq!(monitoring.down.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_ids_are_never_reused() {
    let provider = Arc::new(SessionIdProvider::new());
    let factory = NegotiatorFactoryBuilder::new()
        .with_monitoring(Arc::new(CountingSink::default()))
        .with_id_provider(provider.clone())
        .build()
        .unwrap();

    // A failed negotiation still consumes its ID.
    let (server, client) = tokio::io::duplex(4096);
    drop(client);
    assert!(factory.negotiator(server, peer()).negotiate().await.is_err());

    let (server, client) = tokio::io::duplex(4096);
    let mut client = client_side(client);
    let negotiation = tokio::spawn(factory.negotiator(server, peer()).negotiate());
    assert_eq!(read_server_hello(&mut client).await.session_id(), Some(2));
    drop(client);
    assert!(negotiation.await.unwrap().is_err());
    assert_eq!(provider.peek(), SessionId::new(3));
}

// ============================================================================
// Failed Negotiation
// ============================================================================

async fn expect_failure(client_document: Bytes) -> (NetconfError, String) {
    let monitoring = Arc::new(CountingSink::default());
    let factory = factory_with(monitoring.clone(), Duration::from_secs(5));
    let (server, client) = tokio::io::duplex(16 * 1024);
    let mut client = client_side(client);

    let negotiation = tokio::spawn(factory.negotiator(server, peer()).negotiate());
    read_server_hello(&mut client).await;
    client.send(client_document).await.unwrap();

    let error = negotiation.await.unwrap().unwrap_err();
    let reply = read_text(&mut client).await;
    assert!(client.next().await.is_none());
    assert_eq!(monitoring.up.load(Ordering::SeqCst), 0);
    (error, reply)
}

#[tokio::test]
async fn test_client_hello_with_session_id() {
    let hello = HelloMessage::server(CapabilitySet::new().with(consts::BASE_1_0), 99);
    let (error, reply) = expect_failure(hello.to_bytes()).await;
    assert!(matches!(error, NetconfError::NegotiationFailed(_)));
    assert!(reply.contains("<rpc-error>"));
}

#[tokio::test]
async fn test_rpc_before_hello() {
    let rpc = Bytes::from(format!(
        "<rpc xmlns=\"{}\" message-id=\"1\"><get/></rpc>",
        consts::BASE_NAMESPACE
    ));
    let (error, reply) = expect_failure(rpc).await;
    assert!(matches!(error, NetconfError::NegotiationFailed(_)));
    assert!(reply.contains("malformed-message"));
}

#[tokio::test]
async fn test_malformed_hello() {
    let (error, _) = expect_failure(Bytes::from_static(b"<hello xmlns=")).await;
    assert!(error.is_protocol_error());
}

#[tokio::test]
async fn test_no_common_base_capability() {
    let hello = HelloMessage::client(CapabilitySet::new().with("urn:example:proprietary:1.0"));
    let (error, reply) = expect_failure(hello.to_bytes()).await;
    assert!(matches!(error, NetconfError::CapabilityMismatch));
    assert!(reply.contains("operation-failed"));
}

#[tokio::test(start_paused = true)]
async fn test_hello_timeout() {
    let factory = factory_with(Arc::new(CountingSink::default()), Duration::from_secs(3));
    let (server, client) = tokio::io::duplex(16 * 1024);
    let mut client = client_side(client);

    let negotiation = tokio::spawn(factory.negotiator(server, peer()).negotiate());
    read_server_hello(&mut client).await;

    let error = negotiation.await.unwrap().unwrap_err();
    assert!(matches!(error, NetconfError::Timeout));
    assert!(read_text(&mut client).await.contains("<rpc-error>"));
}

#[tokio::test]
async fn test_peer_closes_before_hello() {
    let factory = factory_with(Arc::new(CountingSink::default()), Duration::from_secs(5));
    let (server, client) = tokio::io::duplex(16 * 1024);
    let mut client = client_side(client);

    let negotiation = tokio::spawn(factory.negotiator(server, peer()).negotiate());
    read_server_hello(&mut client).await;
    drop(client);

    let error = negotiation.await.unwrap().unwrap_err();
    assert!(matches!(error, NetconfError::NegotiationFailed(_)));
}
