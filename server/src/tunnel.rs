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

//! SSH proxy tunnel
//!
//! Relays one `netconf` subsystem channel to the internal engine over a
//! loop-back connection. The tunnel never interprets NETCONF; its only
//! addition to the byte stream is the peer header line written before
//! anything the client sends.
//!
//! ```text
//! Opening ──connect ok──► Active ──either leg ends──► Closing ──► Closed
//!    │                                                              ▲
//!    └──────────────connect failed / destroyed──────────────────────┘
//! ```

use crate::adapter::{ChannelExit, ChannelReader, SshChannelAdapter};
use crate::{ProxyError, ProxyResult};
use bytes::BytesMut;
use futures::FutureExt;
use futures::future::BoxFuture;
use metrics::{counter, gauge};
use netconfd_codec::{PeerHeader, TransportKind};
use netconfd_transport::{ClientBootstrap, Executor};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

const RELAY_BUFFER_SIZE: usize = 8 * 1024;

/// Tunnel identifier, also used as the peer header session tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TunnelId(u64);

impl TunnelId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TunnelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ssh-{}", self.0)
    }
}

/// Tunnel lifecycle (stored as atomic u8)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TunnelState {
    /// Connecting to the engine
    Opening = 0,
    /// Relaying in both directions
    Active = 1,
    /// One leg ended, the other is being shut down
    Closing = 2,
    /// Both legs released
    Closed = 3,
}

impl TunnelState {
    /// Convert from u8 (for atomic operations)
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Opening,
            1 => Self::Active,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }

    /// Convert to u8 (for atomic operations)
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Which side ended the tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelSide {
    /// The SSH client (EOF, channel close or failed channel write)
    Ssh,
    /// The engine connection (EOF, I/O failure or failed connect)
    Internal,
    /// The tunnel owner called `destroy`
    Local,
}

/// Outcome reported once when a tunnel ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelExit {
    pub tunnel_id: TunnelId,
    pub side: TunnelSide,
    /// Exit status sent on the SSH channel
    pub status: u32,
    pub message: Option<String>,
}

impl TunnelExit {
    pub fn is_success(&self) -> bool {
        self.status == 0
    }
}

/// Who is on the SSH end of a tunnel
#[derive(Debug, Clone)]
pub struct TunnelContext {
    pub tunnel_id: TunnelId,
    /// Authenticated SSH user
    pub username: String,
    /// SSH client address
    pub peer: SocketAddr,
}

impl TunnelContext {
    /// Peer header announcing this client to the engine
    pub fn peer_header(&self) -> PeerHeader {
        PeerHeader::new(
            &self.username,
            self.peer,
            TransportKind::Ssh,
            self.tunnel_id.to_string(),
        )
    }
}

/// Future producing the loop-back connection
pub type ConnectFuture<S> = BoxFuture<'static, ProxyResult<S>>;

/// Connect to the engine at `address` with `bootstrap`
pub fn loopback_connector(
    bootstrap: ClientBootstrap,
    address: SocketAddr,
) -> ConnectFuture<TcpStream> {
    async move { Ok(bootstrap.connect(address).await?) }.boxed()
}

/// Control handle for a running tunnel
///
/// Dropping the handle destroys the tunnel.
#[derive(Debug)]
pub struct TunnelHandle {
    id: TunnelId,
    state: Arc<AtomicU8>,
    cancel: CancellationToken,
    finished: CancellationToken,
}

impl TunnelHandle {
    pub fn id(&self) -> TunnelId {
        self.id
    }

    pub fn state(&self) -> TunnelState {
        TunnelState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Cancel the tunnel, including a connect still in progress
    pub fn destroy(&self) {
        self.cancel.cancel();
    }

    /// Wait until both legs are released
    pub async fn closed(&self) {
        self.finished.cancelled().await
    }
}

impl Drop for TunnelHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Proxy between one SSH channel and the engine
pub struct SshProxyTunnel<S> {
    context: TunnelContext,
    connect: ConnectFuture<S>,
    adapter: SshChannelAdapter,
    reader: ChannelReader,
    on_exit: Box<dyn FnOnce(TunnelExit) + Send>,
    state: Arc<AtomicU8>,
    cancel: CancellationToken,
    finished: CancellationToken,
}

struct LegEnd {
    side: TunnelSide,
    error: Option<String>,
}

impl LegEnd {
    fn eof(side: TunnelSide) -> Self {
        Self { side, error: None }
    }

    fn failed(side: TunnelSide, error: impl fmt::Display) -> Self {
        Self {
            side,
            error: Some(error.to_string()),
        }
    }
}

impl<S> SshProxyTunnel<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Start a tunnel on `executor`
    ///
    /// `on_exit` runs exactly once, after both legs are released.
    pub fn start<F>(
        context: TunnelContext,
        connect: ConnectFuture<S>,
        adapter: SshChannelAdapter,
        reader: ChannelReader,
        on_exit: F,
        executor: &dyn Executor,
    ) -> ProxyResult<TunnelHandle>
    where
        F: FnOnce(TunnelExit) + Send + 'static,
    {
        let state = Arc::new(AtomicU8::new(TunnelState::Opening.as_u8()));
        let cancel = CancellationToken::new();
        let finished = CancellationToken::new();
        let id = context.tunnel_id;
        let span = info_span!("tunnel", tunnel_id = %id, peer = %context.peer, user = %context.username);

        let tunnel = Self {
            context,
            connect,
            adapter,
            reader,
            on_exit: Box::new(on_exit),
            state: state.clone(),
            cancel: cancel.clone(),
            finished: finished.clone(),
        };
        executor.spawn(tunnel.run().instrument(span).boxed())?;
        counter!("netconfd.tunnels.opened").increment(1);

        Ok(TunnelHandle {
            id,
            state,
            cancel,
            finished,
        })
    }

    fn set_state(&self, state: TunnelState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    async fn run(mut self) {
        let _finished = self.finished.clone().drop_guard();
        let connect = std::mem::replace(&mut self.connect, futures::future::pending().boxed());

        let connected = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = connect => Some(result),
        };

        let stream = match connected {
            Some(Ok(stream)) => stream,
            Some(Err(e)) => {
                warn!(error = %e, "Failed to connect to NETCONF engine");
                counter!("netconfd.tunnels.connect_failed").increment(1);
                let message = format!("Failed to reach NETCONF service: {}", e);
                self.finish(LegEnd::failed(TunnelSide::Internal, message))
                    .await;
                return;
            }
            None => {
                debug!("Tunnel destroyed while connecting");
                self.finish(LegEnd::failed(TunnelSide::Local, "tunnel destroyed"))
                    .await;
                return;
            }
        };

        self.set_state(TunnelState::Active);
        gauge!("netconfd.tunnels.active").increment(1.0);
        info!("Tunnel active");

        let (mut internal_read, mut internal_write) = tokio::io::split(stream);
        let header = self.context.peer_header();
        let end = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => LegEnd::failed(TunnelSide::Local, "tunnel destroyed"),
            end = relay(
                &header,
                &mut internal_read,
                &mut internal_write,
                &self.adapter,
                &mut self.reader,
            ) => end,
        };

        self.set_state(TunnelState::Closing);
        if let Err(e) = internal_write.shutdown().await {
            debug!(error = %e, "Loop-back shutdown failed");
        }
        drop(internal_read);
        gauge!("netconfd.tunnels.active").decrement(1.0);
        self.finish(end).await;
    }

    /// Release the SSH channel and report the exit
    async fn finish(self, end: LegEnd) {
        let exit = match &end.error {
            None => ChannelExit::success(),
            Some(message) => ChannelExit::failure(message.clone()),
        };
        let status = exit.status;
        self.adapter.close_with(exit).await;
        self.set_state(TunnelState::Closed);

        if end.error.is_some() {
            counter!("netconfd.tunnels.failed").increment(1);
        }
        info!(side = ?end.side, status, "Tunnel closed");
        (self.on_exit)(TunnelExit {
            tunnel_id: self.context.tunnel_id,
            side: end.side,
            status,
            message: end.error,
        });
    }
}

/// Run both legs until either ends
async fn relay<S>(
    header: &PeerHeader,
    internal_read: &mut ReadHalf<S>,
    internal_write: &mut WriteHalf<S>,
    adapter: &SshChannelAdapter,
    reader: &mut ChannelReader,
) -> LegEnd
where
    S: AsyncRead + AsyncWrite,
{
    if let Err(e) = internal_write.write_all(header.to_line().as_bytes()).await {
        return LegEnd::failed(TunnelSide::Internal, e);
    }

    let ssh_end = tokio::select! {
        end = internal_to_ssh(internal_read, adapter) => return end,
        end = ssh_to_internal(reader, internal_write) => end,
    };
    if ssh_end.error.is_some() {
        return ssh_end;
    }

    // Client EOF: half-close so the engine can flush its last replies.
    if let Err(e) = internal_write.shutdown().await {
        return LegEnd::failed(TunnelSide::Internal, ProxyError::Io(e));
    }
    let drained = internal_to_ssh(internal_read, adapter).await;
    match drained.error {
        None => ssh_end,
        Some(_) => drained,
    }
}

async fn internal_to_ssh<R>(internal: &mut R, adapter: &SshChannelAdapter) -> LegEnd
where
    R: AsyncRead + Unpin,
{
    let mut buffer = BytesMut::with_capacity(RELAY_BUFFER_SIZE);
    loop {
        buffer.reserve(RELAY_BUFFER_SIZE);
        match internal.read_buf(&mut buffer).await {
            Ok(0) => return LegEnd::eof(TunnelSide::Internal),
            Ok(n) => {
                counter!("netconfd.tunnels.bytes_out").increment(n as u64);
                // Waiting for the completion lets the SSH window throttle this leg.
                if let Err(e) = adapter.write(buffer.split().freeze()).await {
                    return LegEnd::failed(TunnelSide::Ssh, e);
                }
            }
            Err(e) => return LegEnd::failed(TunnelSide::Internal, ProxyError::Io(e)),
        }
    }
}

async fn ssh_to_internal<W>(reader: &mut ChannelReader, internal: &mut W) -> LegEnd
where
    W: AsyncWrite + Unpin,
{
    while let Some(data) = reader.read().await {
        counter!("netconfd.tunnels.bytes_in").increment(data.len() as u64);
        if let Err(e) = internal.write_all(&data).await {
            return LegEnd::failed(TunnelSide::Internal, ProxyError::Io(e));
        }
    }
    LegEnd::eof(TunnelSide::Ssh)
}
