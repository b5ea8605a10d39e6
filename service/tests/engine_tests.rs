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

//! Loop-back engine tests over real TCP connections

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use netconfd_codec::{
    CapabilitySet, HelloMessage, NetconfCodec, NetconfFrame, PeerHeader, TransportKind, consts,
    notification,
};
use netconfd_service::{
    DefaultRpcHandler, EngineConfig, NegotiatorFactoryBuilder, NetconfServer, SessionId,
    TracingMonitoringSink,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

type Client = Framed<TcpStream, NetconfCodec>;

async fn start_engine(config: EngineConfig) -> NetconfServer {
    let server = NetconfServer::new(config).await.unwrap();
    let factory = NegotiatorFactoryBuilder::new()
        .with_base_capabilities(CapabilitySet::new().with(consts::BASE_1_0))
        .with_monitoring(Arc::new(TracingMonitoringSink))
        .build()
        .unwrap();
    let handler = DefaultRpcHandler::new(server.manager());
    server
        .start(Arc::new(factory), Arc::new(handler))
        .await
        .unwrap();
    server
}

/// Connect, send a header and hello, and return the session ID from the server hello
async fn connect(server: &NetconfServer, user: &str) -> (Client, u64) {
    let stream = TcpStream::connect(server.bind_address()).await.unwrap();
    let local = stream.local_addr().unwrap();
    let mut client = Framed::new(stream, NetconfCodec::new());

    let frame = client.next().await.unwrap().unwrap();
    let hello = HelloMessage::parse(&frame.into_message().unwrap()).unwrap();

    client
        .send(NetconfFrame::Header(PeerHeader::new(
            user,
            local,
            TransportKind::Ssh,
            "ssh-test",
        )))
        .await
        .unwrap();
    client
        .send(HelloMessage::client(CapabilitySet::known_base()).to_bytes())
        .await
        .unwrap();
    (client, hello.session_id().unwrap())
}

async fn wait_for_sessions(server: &NetconfServer, count: usize) {
    for _ in 0..100 {
        if server.session_count() == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {} sessions, found {}",
        count,
        server.session_count()
    );
}

fn rpc(id: u32, body: &str) -> Bytes {
    Bytes::from(format!(
        "<rpc xmlns=\"{}\" message-id=\"{}\">{}</rpc>",
        consts::BASE_NAMESPACE,
        id,
        body
    ))
}

async fn read_text(client: &mut Client) -> String {
    let frame = client.next().await.unwrap().unwrap();
    String::from_utf8(frame.into_message().unwrap().to_vec()).unwrap()
}

#[tokio::test]
async fn test_session_is_registered_with_identity() {
    let server = start_engine(EngineConfig::default()).await;
    let (_client, id) = connect(&server, "alice").await;
    assert_eq!(id, 1);
    wait_for_sessions(&server, 1).await;

    let sessions = server.manager().sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].session_id, SessionId::new(1));
    assert_eq!(sessions[0].username, "alice");
    assert_eq!(sessions[0].transport, TransportKind::Ssh);
    assert_eq!(
        sessions[0].capabilities,
        CapabilitySet::new().with(consts::BASE_1_0)
    );
    assert_eq!(server.snapshot().total_sessions, 1);

    server.shutdown().await.unwrap();
    assert_eq!(server.session_count(), 0);
}

#[tokio::test]
async fn test_unsupported_operation_is_an_rpc_error() {
    let server = start_engine(EngineConfig::default()).await;
    let (mut client, _) = connect(&server, "alice").await;

    client.send(rpc(5, "<get-config/>")).await.unwrap();
    let reply = read_text(&mut client).await;
    assert!(reply.contains("message-id=\"5\""));
    assert!(reply.contains("operation-not-supported"));

    let sessions = server.manager().sessions();
    assert_eq!(sessions[0].in_rpc_fail, 1);
    assert_eq!(sessions[0].out_rpc_err, 1);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_close_session() {
    let server = start_engine(EngineConfig::default()).await;
    let (mut client, _) = connect(&server, "alice").await;

    client.send(rpc(1, "<close-session/>")).await.unwrap();
    assert!(read_text(&mut client).await.contains("<ok/>"));
    assert!(client.next().await.is_none());

    wait_for_sessions(&server, 0).await;
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_kill_session() {
    let server = start_engine(EngineConfig::default()).await;
    let (mut first, first_id) = connect(&server, "alice").await;
    let (mut second, second_id) = connect(&server, "bob").await;
    assert!(second_id > first_id);
    wait_for_sessions(&server, 2).await;

    second
        .send(rpc(
            2,
            &format!("<kill-session><session-id>{}</session-id></kill-session>", first_id),
        ))
        .await
        .unwrap();
    assert!(read_text(&mut second).await.contains("<ok/>"));
    assert!(first.next().await.is_none());
    wait_for_sessions(&server, 1).await;

    second
        .send(rpc(
            3,
            &format!("<kill-session><session-id>{}</session-id></kill-session>", second_id),
        ))
        .await
        .unwrap();
    assert!(read_text(&mut second).await.contains("invalid-value"));

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_broadcast_notification() {
    let server = start_engine(EngineConfig::default()).await;
    let (mut first, _) = connect(&server, "alice").await;
    let (mut second, _) = connect(&server, "bob").await;
    wait_for_sessions(&server, 2).await;

    let document = notification("2026-01-01T00:00:00Z", "<event/>");
    let result = server
        .manager()
        .broadcast_notification(document.clone())
        .await;
    assert_eq!(result.total, 2);
    assert!(result.all_succeeded());

    for client in [&mut first, &mut second] {
        let frame = client.next().await.unwrap().unwrap();
        assert_eq!(frame.into_message().unwrap(), document);
    }

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_session_limit() {
    let server = start_engine(EngineConfig::default().with_max_sessions(1)).await;
    let (_first, _) = connect(&server, "alice").await;
    wait_for_sessions(&server, 1).await;

    let stream = TcpStream::connect(server.bind_address()).await.unwrap();
    let mut rejected = Framed::new(stream, NetconfCodec::new());
    assert!(rejected.next().await.is_none());

    server.shutdown().await.unwrap();
}
