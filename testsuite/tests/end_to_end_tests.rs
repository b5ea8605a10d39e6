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

//! NETCONF over SSH, client to engine

use netconfd_codec::{CapabilitySet, Framing, TransportKind, consts};
use netconfd_service::SessionId;
use netconfd_testsuite::{
    SshConnection, TEST_PASSWORD, TEST_USER, base_1_0, client_hello, rpc, start_server,
    start_server_with, wait_until,
};
use std::time::Duration;
use tracing_test::traced_test;

#[tokio::test]
#[traced_test]
async fn test_netconf_session_over_ssh() {
    let server = start_server().await.unwrap();
    let ssh = SshConnection::connect_default(server.local_address())
        .await
        .unwrap();
    let mut netconf = ssh.open_netconf().await.unwrap();

    let hello = netconf.recv_hello().await.unwrap();
    assert_eq!(hello.session_id(), Some(1));
    assert!(hello.capabilities().contains(consts::BASE_1_0));

    netconf
        .send(client_hello(&[consts::BASE_1_0]))
        .await
        .unwrap();
    let manager = server.engine().manager();
    assert!(wait_until(|| manager.session_count() == 1).await);

    let sessions = manager.sessions();
    assert_eq!(sessions[0].session_id, SessionId::new(1));
    assert_eq!(sessions[0].username, TEST_USER);
    assert_eq!(sessions[0].transport, TransportKind::Ssh);
    assert_eq!(sessions[0].source_host, "127.0.0.1");
    assert_eq!(sessions[0].capabilities, base_1_0());
    assert_eq!(sessions[0].in_rpc_ok, 0);

    let handle = manager.get(SessionId::new(1)).unwrap();
    assert_eq!(handle.header().session_tag(), "ssh-1");

    netconf
        .send(rpc(101, "<close-session/>"))
        .await
        .unwrap();
    let reply = netconf.recv_text().await.unwrap();
    assert!(reply.contains("message-id=\"101\""));
    assert!(reply.contains("<ok/>"));

    assert!(netconf.recv().await.unwrap().is_none());
    assert_eq!(netconf.wait_exit().await.unwrap(), Some(0));
    assert!(wait_until(|| server.tunnel_count() == 0).await);

    let metrics = server.metrics();
    assert_eq!(metrics.auth_succeeded, 1);
    assert_eq!(metrics.total_tunnels, 1);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_chunked_framing_after_base_1_1() {
    let server = start_server().await.unwrap();
    let ssh = SshConnection::connect_default(server.local_address())
        .await
        .unwrap();
    let mut netconf = ssh.open_netconf().await.unwrap();

    let hello = netconf.recv_hello().await.unwrap();
    assert!(hello.capabilities().contains(consts::BASE_1_1));
    netconf
        .send(client_hello(&[consts::BASE_1_0, consts::BASE_1_1]))
        .await
        .unwrap();
    netconf.set_framing(Framing::Chunked);

    netconf.send(rpc(7, "<get-config/>")).await.unwrap();
    let reply = netconf.recv_text().await.unwrap();
    assert!(reply.contains("message-id=\"7\""));
    assert!(reply.contains("operation-not-supported"));

    netconf.send(rpc(8, "<close-session/>")).await.unwrap();
    let reply = netconf.recv_text().await.unwrap();
    assert!(reply.contains("<ok/>"));

    let manager = server.engine().manager();
    assert!(wait_until(|| manager.session_count() == 0).await);
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_clients_get_distinct_sessions() {
    const CLIENTS: u64 = 4;
    let server = start_server().await.unwrap();
    let address = server.local_address();

    let mut tasks = Vec::new();
    for _ in 0..CLIENTS {
        tasks.push(tokio::spawn(async move {
            let ssh = SshConnection::connect_default(address).await.unwrap();
            let mut netconf = ssh.open_netconf().await.unwrap();
            let hello = netconf.recv_hello().await.unwrap();
            netconf
                .send(client_hello(&[consts::BASE_1_0]))
                .await
                .unwrap();
            (ssh, netconf, hello.session_id().unwrap())
        }));
    }

    let mut ids = Vec::new();
    let mut connections = Vec::new();
    for task in tasks {
        let (ssh, netconf, id) = task.await.unwrap();
        ids.push(id);
        connections.push((ssh, netconf));
    }
    ids.sort_unstable();
    assert_eq!(ids, (1..=CLIENTS).collect::<Vec<_>>());

    let manager = server.engine().manager();
    assert!(wait_until(|| manager.session_count() == CLIENTS as usize).await);
    assert_eq!(server.tunnel_count(), CLIENTS as usize);

    drop(connections);
    assert!(wait_until(|| manager.session_count() == 0).await);
    assert!(wait_until(|| server.tunnel_count() == 0).await);
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_other_subsystems_are_refused() {
    let server = start_server().await.unwrap();
    let ssh = SshConnection::connect_default(server.local_address())
        .await
        .unwrap();

    let error = ssh.open_subsystem("sftp").await.unwrap_err();
    assert!(error.to_string().contains("refused"));
    assert_eq!(server.tunnel_count(), 0);
    assert_eq!(server.metrics().rejected_subsystems, 1);

    // The connection stays usable for NETCONF.
    let mut netconf = ssh.open_netconf().await.unwrap();
    assert!(netconf.recv_hello().await.is_ok());

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_wrong_password_is_rejected() {
    let server = start_server().await.unwrap();
    let result = SshConnection::connect(server.local_address(), TEST_USER, "wrong").await;
    assert!(result.is_err());
    assert!(wait_until(|| server.metrics().auth_rejected >= 1).await);
    assert_eq!(server.metrics().auth_succeeded, 0);

    let ok = SshConnection::connect(server.local_address(), TEST_USER, TEST_PASSWORD).await;
    assert!(ok.is_ok());
    server.shutdown().await.unwrap();
}

#[tokio::test]
#[traced_test]
async fn test_unreachable_engine_reports_failure() {
    let server = start_server().await.unwrap();
    server.engine().shutdown().await.unwrap();

    let ssh = SshConnection::connect_default(server.local_address())
        .await
        .unwrap();
    let mut netconf = ssh.open_netconf().await.unwrap();

    let status = netconf.wait_exit().await.unwrap();
    assert!(matches!(status, Some(code) if code != 0));
    assert!(netconf.stderr().contains("Failed to reach NETCONF service"));
    assert!(wait_until(|| server.metrics().failed_tunnels == 1).await);
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_base_capability_override() {
    let server = start_server_with(|config| {
        config.with_base_capabilities(CapabilitySet::new().with(consts::BASE_1_0))
    })
    .await
    .unwrap();
    let ssh = SshConnection::connect_default(server.local_address())
        .await
        .unwrap();
    let mut netconf = ssh.open_netconf().await.unwrap();

    let hello = netconf.recv_hello().await.unwrap();
    assert!(hello.capabilities().contains(consts::BASE_1_0));
    assert!(!hello.capabilities().contains(consts::BASE_1_1));
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_ends_open_sessions() {
    let server = start_server().await.unwrap();
    let ssh = SshConnection::connect_default(server.local_address())
        .await
        .unwrap();
    let mut netconf = ssh.open_netconf().await.unwrap();
    netconf.recv_hello().await.unwrap();
    netconf
        .send(client_hello(&[consts::BASE_1_0]))
        .await
        .unwrap();
    let manager = server.engine().manager();
    assert!(wait_until(|| manager.session_count() == 1).await);

    server.shutdown().await.unwrap();
    assert!(!server.is_running());
    assert_eq!(server.tunnel_count(), 0);
    assert!(netconf.recv().await.unwrap().is_none());
    assert!(server.shutdown().await.is_err());
}

#[tokio::test]
#[traced_test]
async fn test_unauthenticated_connection_is_dropped_after_auth_timeout() {
    let server = start_server_with(|config| config.with_auth_timeout(Duration::from_millis(200)))
        .await
        .unwrap();
    let mut ssh = SshConnection::connect_unauthenticated(server.local_address())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;

    let accepted = ssh.authenticate(TEST_USER, TEST_PASSWORD).await;
    assert!(!matches!(accepted, Ok(true)));
    assert!(wait_until(|| ssh.is_closed()).await);
    assert_eq!(server.metrics().auth_succeeded, 0);

    // Connections that authenticate in time are unaffected.
    let ssh = SshConnection::connect_default(server.local_address())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    let mut netconf = ssh.open_netconf().await.unwrap();
    assert!(netconf.recv_hello().await.is_ok());
    server.shutdown().await.unwrap();
}
