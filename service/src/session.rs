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

//! Running NETCONF sessions
//!
//! A [`NetconfServerSession`] is created by a successful hello exchange and
//! then owns its connection for the rest of its life:
//! - Request dispatch to an [`RpcHandler`]
//! - Timeout management (read, idle, write)
//! - Control messages from any number of [`SessionHandle`]s
//! - Delayed close after `<close-session>`
//! - Resource cleanup

use crate::{
    ManagementSession, MonitoringSink, NegotiationState, NetconfError, Result, RpcHandler,
    SessionEvent, SessionId, SessionState,
};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use netconfd_codec::{
    CapabilitySet, ErrorTag, ErrorType, Framing, NetconfCodec, NetconfFrame, PeerHeader, RpcError,
    RpcMessage,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_util::codec::Framed;
use tracing::{debug, info, instrument, trace, warn};

const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(10);
const IDLE_MARK: Duration = Duration::from_secs(60);

/// Control messages for a running session
#[derive(Debug)]
pub enum ControlMessage {
    /// Close the session
    Close,
    /// Write a `<notification>` document
    Notification(Bytes),
}

/// Per-session timeouts
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Max time to wait for the next inbound message
    pub read_timeout: Duration,
    /// Max time without activity in either direction
    pub idle_timeout: Duration,
    /// Max time for a single outbound write
    pub write_timeout: Duration,
    /// Control channel buffer size
    pub control_buffer_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(3600),
            idle_timeout: Duration::from_secs(3600),
            write_timeout: Duration::from_secs(30),
            control_buffer_size: 64,
        }
    }
}

/// Everything the hello exchange decided about a session
#[derive(Debug)]
pub(crate) struct SessionSetup {
    pub(crate) id: SessionId,
    pub(crate) header: PeerHeader,
    pub(crate) capabilities: CapabilitySet,
    pub(crate) exi: bool,
    pub(crate) negotiation: Arc<AtomicU8>,
}

#[derive(Debug)]
struct SessionShared {
    id: SessionId,
    header: PeerHeader,
    capabilities: CapabilitySet,
    framing: Framing,
    exi: bool,
    login_time: SystemTime,
    state: AtomicU8,
    negotiation: Arc<AtomicU8>,
    delayed_close: AtomicBool,
    // Written only by the session task.
    in_rpc_ok: AtomicU64,
    in_rpc_fail: AtomicU64,
    out_rpc_err: AtomicU64,
    out_notif: AtomicU64,
}

/// Cheap, cloneable reference to a running session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    shared: Arc<SessionShared>,
    control_tx: mpsc::Sender<ControlMessage>,
}

impl SessionHandle {
    /// Session ID announced in the server hello
    pub fn session_id(&self) -> SessionId {
        self.shared.id
    }

    /// Identity of the physical connection
    pub fn header(&self) -> &PeerHeader {
        &self.shared.header
    }

    /// Authenticated user name
    pub fn username(&self) -> &str {
        self.shared.header.username()
    }

    /// Capabilities both sides advertised
    pub fn capabilities(&self) -> &CapabilitySet {
        &self.shared.capabilities
    }

    /// Framing in use after the hello exchange
    pub fn framing(&self) -> Framing {
        self.shared.framing
    }

    /// Whether both sides advertised the EXI capability
    pub fn exi_negotiated(&self) -> bool {
        self.shared.exi
    }

    /// Wall-clock time the hello exchange completed
    pub fn login_time(&self) -> SystemTime {
        self.shared.login_time
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Negotiation state of the underlying connection
    pub fn negotiation_state(&self) -> NegotiationState {
        NegotiationState::from_u8(self.shared.negotiation.load(Ordering::Acquire))
    }

    /// Requests answered successfully
    pub fn in_rpc_ok(&self) -> u64 {
        self.shared.in_rpc_ok.load(Ordering::Relaxed)
    }

    /// Requests answered with an error
    pub fn in_rpc_fail(&self) -> u64 {
        self.shared.in_rpc_fail.load(Ordering::Relaxed)
    }

    /// `<rpc-error>` replies written
    pub fn out_rpc_err(&self) -> u64 {
        self.shared.out_rpc_err.load(Ordering::Relaxed)
    }

    /// Notifications written
    pub fn out_notif(&self) -> u64 {
        self.shared.out_notif.load(Ordering::Relaxed)
    }

    /// Close the session right after its next outbound write has completed.
    ///
    /// The session never closes before that write, so a reply produced in
    /// the same request still reaches the peer.
    pub fn request_delayed_close(&self) {
        if !self.shared.delayed_close.swap(true, Ordering::AcqRel) {
            debug!(session_id = %self.shared.id, "Delayed close requested");
        }
    }

    /// Whether a delayed close is pending
    pub fn is_delayed_close_requested(&self) -> bool {
        self.shared.delayed_close.load(Ordering::Acquire)
    }

    /// Queue a `<notification>` document for the peer
    pub async fn send_notification(&self, document: Bytes) -> Result<()> {
        self.control_tx
            .send(ControlMessage::Notification(document))
            .await
            .map_err(|_| NetconfError::SessionClosed)
    }

    /// Close the session
    pub async fn close(&self) -> Result<()> {
        self.control_tx
            .send(ControlMessage::Close)
            .await
            .map_err(|_| NetconfError::SessionClosed)
    }

    /// Whether the session task has exited
    pub fn is_closed(&self) -> bool {
        self.control_tx.is_closed()
    }

    /// Snapshot for monitoring
    pub fn to_management_session(&self) -> ManagementSession {
        let header = &self.shared.header;
        ManagementSession {
            session_id: self.shared.id,
            username: header.username().to_string(),
            source_host: header.source_host().to_string(),
            source_port: header.source_port(),
            transport: header.transport(),
            login_time: self.shared.login_time,
            state: self.state(),
            in_rpc_ok: self.in_rpc_ok(),
            in_rpc_fail: self.in_rpc_fail(),
            out_rpc_err: self.out_rpc_err(),
            out_notif: self.out_notif(),
            capabilities: self.shared.capabilities.clone(),
        }
    }
}

/// A negotiated NETCONF session and its connection
pub struct NetconfServerSession<S> {
    handle: SessionHandle,
    framed: Framed<S, NetconfCodec>,
    monitoring: Arc<dyn MonitoringSink>,
    config: SessionConfig,
    control_rx: mpsc::Receiver<ControlMessage>,
    last_activity: Instant,
}

impl<S> NetconfServerSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub(crate) fn new(
        framed: Framed<S, NetconfCodec>,
        setup: SessionSetup,
        monitoring: Arc<dyn MonitoringSink>,
        config: SessionConfig,
    ) -> Self {
        let (control_tx, control_rx) = mpsc::channel(config.control_buffer_size.max(1));
        let shared = SessionShared {
            id: setup.id,
            header: setup.header,
            capabilities: setup.capabilities,
            framing: framed.codec().framing(),
            exi: setup.exi,
            login_time: SystemTime::now(),
            state: AtomicU8::new(SessionState::Active.as_u8()),
            negotiation: setup.negotiation,
            delayed_close: AtomicBool::new(false),
            in_rpc_ok: AtomicU64::new(0),
            in_rpc_fail: AtomicU64::new(0),
            out_rpc_err: AtomicU64::new(0),
            out_notif: AtomicU64::new(0),
        };
        Self {
            handle: SessionHandle {
                shared: Arc::new(shared),
                control_tx,
            },
            framed,
            monitoring,
            config,
            control_rx,
            last_activity: Instant::now(),
        }
    }

    /// Handle for controlling the session from other tasks
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Session ID
    pub fn session_id(&self) -> SessionId {
        self.handle.shared.id
    }

    fn set_state(&self, state: SessionState) {
        self.handle.shared.state.store(state.as_u8(), Ordering::Release);
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
        if self.handle.state() == SessionState::Idle {
            self.set_state(SessionState::Active);
        }
    }

    /// Serve requests until either side closes the session
    #[instrument(skip(self, handler), fields(session_id = %self.handle.shared.id))]
    pub async fn run(mut self, handler: Arc<dyn RpcHandler>) {
        info!(
            user = %self.handle.username(),
            framing = ?self.handle.framing(),
            "Session started"
        );
        gauge!("netconfd.sessions.active").increment(1.0);

        if let Err(e) = self.event_loop(handler.as_ref()).await {
            if e.is_recoverable() {
                debug!(error = %e, "Session ended");
            } else {
                warn!(error = %e, "Session failed");
            }
        }

        self.cleanup().await;
    }

    async fn event_loop(&mut self, handler: &dyn RpcHandler) -> Result<()> {
        loop {
            if self.last_activity.elapsed() > self.config.idle_timeout {
                info!("Idle timeout");
                return Err(NetconfError::Timeout);
            }

            select! {
                result = timeout(self.config.read_timeout, self.framed.next()) => {
                    match result {
                        Ok(Some(Ok(NetconfFrame::Message(document)))) => {
                            self.touch();
                            let reply =
                                Self::dispatch(&self.handle, self.monitoring.as_ref(), document, handler)
                                    .await;
                            if self.write(reply).await? {
                                return Ok(());
                            }
                        }
                        Ok(Some(Ok(NetconfFrame::Header(header)))) => {
                            warn!(header = %header, "Ignoring header after hello");
                        }
                        Ok(Some(Err(e))) => return Err(e.into()),
                        Ok(None) => {
                            debug!("Peer closed the connection");
                            return Ok(());
                        }
                        Err(_) => return Err(NetconfError::Timeout),
                    }
                }

                msg = self.control_rx.recv() => {
                    match msg {
                        Some(ControlMessage::Close) | None => return Ok(()),
                        Some(ControlMessage::Notification(document)) => {
                            let close = self.write(document).await?;
                            self.handle.shared.out_notif.fetch_add(1, Ordering::Relaxed);
                            counter!("netconfd.notifications.sent").increment(1);
                            self.monitoring
                                .on_session_event(self.session_id(), SessionEvent::NotificationSent);
                            if close {
                                return Ok(());
                            }
                        }
                    }
                }

                _ = sleep(IDLE_CHECK_INTERVAL) => {
                    if self.last_activity.elapsed() > IDLE_MARK {
                        self.set_state(SessionState::Idle);
                    }
                }
            }
        }
    }

    /// Answer one inbound document, updating the request counters
    ///
    /// Borrows only `Sync` parts of the session, so the session task stays
    /// `Send` for any stream type.
    async fn dispatch(
        session: &SessionHandle,
        monitoring: &dyn MonitoringSink,
        document: Bytes,
        handler: &dyn RpcHandler,
    ) -> Bytes {
        let shared = &session.shared;
        let rpc = match RpcMessage::parse(document) {
            Ok(rpc) => rpc,
            Err(e) => {
                debug!(error = %e, "Malformed rpc");
                shared.in_rpc_fail.fetch_add(1, Ordering::Relaxed);
                shared.out_rpc_err.fetch_add(1, Ordering::Relaxed);
                counter!("netconfd.rpc.failed").increment(1);
                monitoring.on_session_event(
                    shared.id,
                    SessionEvent::RpcFailed { operation: None },
                );
                return RpcError::new(ErrorType::Rpc, ErrorTag::MalformedMessage)
                    .with_message(e.to_string())
                    .to_reply(None);
            }
        };

        trace!(operation = %rpc.operation(), message_id = ?rpc.message_id(), "Dispatching rpc");
        let start = Instant::now();
        let result = handler.handle_rpc(session, &rpc).await;
        histogram!("netconfd.rpc.duration").record(start.elapsed().as_secs_f64());

        match result {
            Ok(reply) => {
                shared.in_rpc_ok.fetch_add(1, Ordering::Relaxed);
                counter!("netconfd.rpc.ok").increment(1);
                monitoring.on_session_event(
                    shared.id,
                    SessionEvent::RpcSucceeded {
                        operation: rpc.operation().to_string(),
                    },
                );
                reply
            }
            Err(error) => {
                debug!(operation = %rpc.operation(), error = %error, "Rpc failed");
                shared.in_rpc_fail.fetch_add(1, Ordering::Relaxed);
                shared.out_rpc_err.fetch_add(1, Ordering::Relaxed);
                counter!("netconfd.rpc.failed").increment(1);
                monitoring.on_session_event(
                    shared.id,
                    SessionEvent::RpcFailed {
                        operation: Some(rpc.operation().to_string()),
                    },
                );
                error.to_reply(rpc.message_id())
            }
        }
    }

    /// Write one document. Returns true when a pending delayed close is now due.
    async fn write(&mut self, document: Bytes) -> Result<bool> {
        match timeout(self.config.write_timeout, self.framed.send(document)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(NetconfError::Timeout),
        }
        self.touch();
        let close = self.handle.is_delayed_close_requested();
        if close {
            debug!("Closing after delayed close request");
        }
        Ok(close)
    }

    async fn cleanup(&mut self) {
        self.set_state(SessionState::Closing);
        self.monitoring.on_session_down(&self.handle);

        self.control_rx.close();
        while self.control_rx.try_recv().is_ok() {}

        if timeout(
            self.config.write_timeout,
            SinkExt::<Bytes>::close(&mut self.framed),
        )
        .await
        .is_err()
        {
            debug!("Timed out closing the connection");
        }

        self.set_state(SessionState::Closed);
        self.handle
            .shared
            .negotiation
            .store(NegotiationState::Closed.as_u8(), Ordering::Release);
        gauge!("netconfd.sessions.active").decrement(1.0);
        info!("Session closed");
    }
}

impl<S> std::fmt::Debug for NetconfServerSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetconfServerSession")
            .field("id", &self.handle.shared.id)
            .field("state", &self.handle.state())
            .field("last_activity", &self.last_activity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TracingMonitoringSink;
    use async_trait::async_trait;
    use netconfd_codec::{TransportKind, consts, ok_reply};
    use tokio::io::DuplexStream;

    struct EchoOk;

    #[async_trait]
    impl RpcHandler for EchoOk {
        async fn handle_rpc(
            &self,
            session: &SessionHandle,
            rpc: &RpcMessage,
        ) -> std::result::Result<Bytes, RpcError> {
            match rpc.operation() {
                "close-session" => {
                    session.request_delayed_close();
                    Ok(ok_reply(rpc.message_id()))
                }
                "get" => Ok(ok_reply(rpc.message_id())),
                _ => Err(RpcError::new(ErrorType::Protocol, ErrorTag::OperationNotSupported)),
            }
        }
    }

    fn session_pair() -> (
        NetconfServerSession<DuplexStream>,
        Framed<DuplexStream, NetconfCodec>,
    ) {
        let (server, client) = tokio::io::duplex(8192);
        let session = NetconfServerSession::new(
            Framed::new(server, NetconfCodec::new()),
            setup(),
            Arc::new(TracingMonitoringSink),
            SessionConfig::default(),
        );
        (session, Framed::new(client, NetconfCodec::new()))
    }

    fn setup() -> SessionSetup {
        SessionSetup {
            id: SessionId::new(7),
            header: PeerHeader::new(
                "admin",
                "192.0.2.10:50000".parse().unwrap(),
                TransportKind::Ssh,
                "ssh-1",
            ),
            capabilities: CapabilitySet::new().with(consts::BASE_1_0),
            exi: false,
            negotiation: Arc::new(AtomicU8::new(NegotiationState::Negotiated.as_u8())),
        }
    }

    /// Stream that may move between threads but not be shared by them
    struct UnsharedStream {
        inner: DuplexStream,
        _unshared: std::marker::PhantomData<std::cell::Cell<()>>,
    }

    impl AsyncRead for UnsharedStream {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut self.inner).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for UnsharedStream {
        fn poll_write(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            std::pin::Pin::new(&mut self.inner).poll_write(cx, buf)
        }

        fn poll_flush(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut self.inner).poll_flush(cx)
        }

        fn poll_shutdown(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut self.inner).poll_shutdown(cx)
        }
    }

    fn rpc(id: u32, operation: &str) -> Bytes {
        Bytes::from(format!(
            "<rpc xmlns=\"{}\" message-id=\"{}\"><{}/></rpc>",
            consts::BASE_NAMESPACE,
            id,
            operation
        ))
    }

    async fn next_message(client: &mut Framed<DuplexStream, NetconfCodec>) -> String {
        let frame = client.next().await.unwrap().unwrap();
        String::from_utf8(frame.into_message().unwrap().to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_counters_track_replies() {
        let (session, mut client) = session_pair();
        let handle = session.handle();
        let task = tokio::spawn(session.run(Arc::new(EchoOk)));

        client.send(rpc(1, "get")).await.unwrap();
        assert!(next_message(&mut client).await.contains("<ok/>"));

        client.send(rpc(2, "frobnicate")).await.unwrap();
        assert!(next_message(&mut client).await.contains("operation-not-supported"));

        client.send(Bytes::from_static(b"<not-an-rpc/>")).await.unwrap();
        assert!(next_message(&mut client).await.contains("malformed-message"));

        assert_eq!(handle.in_rpc_ok(), 1);
        assert_eq!(handle.in_rpc_fail(), 2);
        assert_eq!(handle.out_rpc_err(), 2);

        handle.close().await.unwrap();
        task.await.unwrap();
        assert_eq!(handle.state(), SessionState::Closed);
        assert_eq!(handle.negotiation_state(), NegotiationState::Closed);
    }

    #[tokio::test]
    async fn test_delayed_close_after_reply() {
        let (session, mut client) = session_pair();
        let handle = session.handle();
        let task = tokio::spawn(session.run(Arc::new(EchoOk)));

        client.send(rpc(9, "close-session")).await.unwrap();
        let reply = next_message(&mut client).await;
        assert!(reply.contains("message-id=\"9\""));
        assert!(reply.contains("<ok/>"));

        task.await.unwrap();
        assert!(client.next().await.is_none());
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_delayed_close_waits_for_next_write() {
        let (session, mut client) = session_pair();
        let handle = session.handle();
        let task = tokio::spawn(session.run(Arc::new(EchoOk)));

        handle.request_delayed_close();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());

        handle
            .send_notification(Bytes::from_static(b"<notification/>"))
            .await
            .unwrap();
        assert_eq!(next_message(&mut client).await, "<notification/>");

        task.await.unwrap();
        assert_eq!(handle.out_notif(), 1);
    }

    #[tokio::test]
    async fn test_management_snapshot() {
        let (session, _client) = session_pair();
        let snapshot = session.handle().to_management_session();

        assert_eq!(snapshot.session_id, SessionId::new(7));
        assert_eq!(snapshot.username, "admin");
        assert_eq!(snapshot.source_host, "192.0.2.10");
        assert_eq!(snapshot.source_port, 50000);
        assert_eq!(snapshot.transport, TransportKind::Ssh);
        assert_eq!(snapshot.in_rpc_ok, 0);
        assert!(snapshot.capabilities.contains(consts::BASE_1_0));
    }

    #[tokio::test]
    async fn test_close_after_exit_fails() {
        let (session, client) = session_pair();
        let handle = session.handle();
        drop(client);
        session.run(Arc::new(EchoOk)).await;

        assert!(matches!(handle.close().await, Err(NetconfError::SessionClosed)));
    }

    #[tokio::test]
    async fn test_session_over_unshared_stream() {
        let (server, client) = tokio::io::duplex(8192);
        let stream = UnsharedStream {
            inner: server,
            _unshared: std::marker::PhantomData,
        };
        let session = NetconfServerSession::new(
            Framed::new(stream, NetconfCodec::new()),
            setup(),
            Arc::new(TracingMonitoringSink),
            SessionConfig::default(),
        );
        let manager = crate::SessionManager::new(Duration::from_secs(1));
        let id = manager.spawn_session(session, Arc::new(EchoOk));
        assert_eq!(id, SessionId::new(7));

        let mut client = Framed::new(client, NetconfCodec::new());
        client.send(rpc(3, "get")).await.unwrap();
        assert!(next_message(&mut client).await.contains("<ok/>"));

        manager.shutdown().await;
        assert_eq!(manager.session_count(), 0);
    }
}
