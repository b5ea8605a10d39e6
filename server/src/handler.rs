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

//! russh server and per-connection handler

use crate::adapter::{
    ChannelFeed, FeedStatus, RusshChannelSink, SshChannelAdapter, channel_pipe,
};
use crate::auth::{Authenticator, PublicKeyAuthenticator};
use crate::tunnel::{
    SshProxyTunnel, TunnelContext, TunnelExit, TunnelHandle, TunnelId, TunnelState,
    loopback_connector,
};
use crate::{ProxyError, ProxyResult, ServerMetrics, SshServerConfig};
use bytes::Bytes;
use dashmap::DashMap;
use metrics::counter;
use netconfd_transport::{ClientBootstrap, Executor, keepalive_options};
use russh::keys::ssh_key;
use russh::server::{Auth, Handle, Msg, Session};
use russh::{Channel, ChannelId, MethodKind, MethodSet};
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tracing::{debug, info, warn};

/// SSH subsystem name for NETCONF
pub const NETCONF_SUBSYSTEM: &str = "netconf";

/// State shared by every SSH connection
pub(crate) struct FrontEndShared {
    pub(crate) config: SshServerConfig,
    pub(crate) engine_address: SocketAddr,
    pub(crate) authenticator: Arc<dyn Authenticator>,
    pub(crate) public_keys: Option<Arc<dyn PublicKeyAuthenticator>>,
    /// Wrapped so that SSH components cannot shut it down
    pub(crate) executor: Arc<dyn Executor>,
    pub(crate) bootstrap: ClientBootstrap,
    pub(crate) metrics: Arc<ServerMetrics>,
    pub(crate) tunnels: DashMap<TunnelId, TunnelHandle>,
    next_tunnel: AtomicU64,
}

impl FrontEndShared {
    pub(crate) fn new(
        config: SshServerConfig,
        engine_address: SocketAddr,
        authenticator: Arc<dyn Authenticator>,
        public_keys: Option<Arc<dyn PublicKeyAuthenticator>>,
        executor: Arc<dyn Executor>,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        let bootstrap = ClientBootstrap::new(config.connection_timeout)
            .with_nodelay(true)
            .with_keepalive(keepalive_options());
        Self {
            config,
            engine_address,
            authenticator,
            public_keys,
            executor,
            bootstrap,
            metrics,
            tunnels: DashMap::new(),
            next_tunnel: AtomicU64::new(1),
        }
    }

    /// Destroy every running tunnel
    pub(crate) fn destroy_tunnels(&self) {
        for tunnel in self.tunnels.iter() {
            tunnel.destroy();
        }
        self.tunnels.clear();
    }
}

/// Creates one handler per SSH connection
#[derive(Clone)]
pub(crate) struct SshFrontEnd {
    shared: Arc<FrontEndShared>,
}

impl SshFrontEnd {
    pub(crate) fn new(shared: Arc<FrontEndShared>) -> Self {
        Self { shared }
    }
}

impl russh::server::Server for SshFrontEnd {
    type Handler = NetconfSshHandler;

    fn new_client(&mut self, peer_addr: Option<SocketAddr>) -> Self::Handler {
        info!(peer = ?peer_addr, "New SSH connection");
        self.shared.metrics.connection_opened();
        NetconfSshHandler::new(peer_addr, self.shared.clone())
    }

    fn handle_session_error(&mut self, error: <Self::Handler as russh::server::Handler>::Error) {
        match error.downcast_ref::<ProxyError>() {
            Some(e) if e.is_connection_error() => {
                debug!(error = %e, "SSH connection lost");
            }
            _ => debug!(error = %error, "SSH session ended with error"),
        }
    }
}

struct OpenChannel {
    /// `None` after the client sent EOF
    feed: Option<ChannelFeed>,
    tunnel_id: TunnelId,
}

/// Handler for one SSH connection
pub struct NetconfSshHandler {
    peer: Option<SocketAddr>,
    shared: Arc<FrontEndShared>,
    username: Option<String>,
    authenticated: Arc<AtomicBool>,
    connected_at: Instant,
    channels: HashMap<ChannelId, OpenChannel>,
}

impl NetconfSshHandler {
    pub(crate) fn new(peer: Option<SocketAddr>, shared: Arc<FrontEndShared>) -> Self {
        Self {
            peer,
            shared,
            username: None,
            authenticated: Arc::new(AtomicBool::new(false)),
            connected_at: Instant::now(),
            channels: HashMap::new(),
        }
    }

    /// Set once the connection has authenticated
    pub(crate) fn authenticated_flag(&self) -> Arc<AtomicBool> {
        self.authenticated.clone()
    }

    fn auth_expired(&self) -> bool {
        self.connected_at.elapsed() >= self.shared.config.auth_timeout
    }

    fn allowed_methods(&self) -> MethodSet {
        let mut methods = MethodSet::empty();
        methods.push(MethodKind::Password);
        if self.shared.public_keys.is_some() {
            methods.push(MethodKind::PublicKey);
        }
        methods
    }

    fn auth_result(&mut self, user: &str, accepted: bool) -> Auth {
        if self.auth_expired() {
            warn!(user = %user, peer = ?self.peer, "Authentication attempt after deadline");
            self.shared.metrics.auth_attempt(false);
            return Auth::Reject {
                proceed_with_methods: None,
                partial_success: false,
            };
        }
        self.shared.metrics.auth_attempt(accepted);
        if accepted {
            info!(user = %user, peer = ?self.peer, "SSH user authenticated");
            self.username = Some(user.to_string());
            self.authenticated.store(true, Ordering::Release);
            Auth::Accept
        } else {
            debug!(user = %user, peer = ?self.peer, "SSH authentication rejected");
            Auth::Reject {
                proceed_with_methods: Some(self.allowed_methods()),
                partial_success: false,
            }
        }
    }

    /// Connect a `netconf` subsystem channel to the engine
    fn start_tunnel(
        &mut self,
        channel_id: ChannelId,
        username: String,
        handle: Handle,
    ) -> ProxyResult<TunnelId> {
        let shared = &self.shared;
        let tunnel_id = TunnelId::new(shared.next_tunnel.fetch_add(1, Ordering::SeqCst));
        let adapter = SshChannelAdapter::spawn(
            RusshChannelSink::new(handle, channel_id),
            shared.config.close_timeout,
            shared.executor.as_ref(),
        )?;
        let (feed, reader) = channel_pipe(shared.config.read_buffer);
        let context = TunnelContext {
            tunnel_id,
            username,
            peer: self
                .peer
                .unwrap_or_else(|| SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))),
        };
        let connect = loopback_connector(shared.bootstrap.clone(), shared.engine_address);

        let registry: Weak<FrontEndShared> = Arc::downgrade(shared);
        let opened_at = Instant::now();
        let on_exit = move |exit: TunnelExit| {
            if let Some(shared) = registry.upgrade() {
                shared.tunnels.remove(&exit.tunnel_id);
                shared
                    .metrics
                    .tunnel_closed(opened_at.elapsed(), exit.is_success());
            }
        };

        shared.metrics.tunnel_opened();
        let tunnel = match SshProxyTunnel::start(
            context,
            connect,
            adapter,
            reader,
            on_exit,
            shared.executor.as_ref(),
        ) {
            Ok(tunnel) => tunnel,
            Err(e) => {
                shared.metrics.tunnel_closed(opened_at.elapsed(), false);
                return Err(e);
            }
        };

        shared.tunnels.insert(tunnel_id, tunnel);
        // The tunnel may have ended before it was registered.
        if shared
            .tunnels
            .get(&tunnel_id)
            .is_some_and(|t| t.state() == TunnelState::Closed)
        {
            shared.tunnels.remove(&tunnel_id);
        }

        self.channels.insert(
            channel_id,
            OpenChannel {
                feed: Some(feed),
                tunnel_id,
            },
        );
        Ok(tunnel_id)
    }

    fn refuse(&self, channel_id: ChannelId, session: &mut Session) -> ProxyResult<()> {
        self.shared.metrics.subsystem_rejected();
        session.channel_failure(channel_id)?;
        Ok(())
    }
}

impl russh::server::Handler for NetconfSshHandler {
    type Error = anyhow::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        let accepted = self.shared.authenticator.authenticate(user, password).await;
        Ok(self.auth_result(user, accepted))
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &ssh_key::PublicKey,
    ) -> Result<Auth, Self::Error> {
        let accepted = match &self.shared.public_keys {
            Some(authenticator) => authenticator.authenticate(user, public_key).await,
            None => false,
        };
        Ok(self.auth_result(user, accepted))
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        debug!(peer = ?self.peer, channel = %channel.id(), "Session channel opened");
        Ok(true)
    }

    async fn subsystem_request(
        &mut self,
        channel_id: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if name != NETCONF_SUBSYSTEM {
            warn!(subsystem = %name, peer = ?self.peer, "Refusing subsystem");
            return Ok(self.refuse(channel_id, session)?);
        }
        if self.channels.contains_key(&channel_id) {
            warn!(channel = %channel_id, "Subsystem already started on channel");
            return Ok(self.refuse(channel_id, session)?);
        }
        let Some(username) = self.username.clone() else {
            return Ok(self.refuse(channel_id, session)?);
        };

        match self.start_tunnel(channel_id, username, session.handle()) {
            Ok(tunnel_id) => {
                debug!(tunnel_id = %tunnel_id, channel = %channel_id, "NETCONF subsystem started");
                session
                    .channel_success(channel_id)
                    .map_err(ProxyError::from)?;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Failed to start NETCONF tunnel");
                Ok(self.refuse(channel_id, session)?)
            }
        }
    }

    async fn data(
        &mut self,
        channel_id: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        let status = match self.channels.get(&channel_id).and_then(|open| open.feed.as_ref()) {
            Some(feed) => feed.push(Bytes::copy_from_slice(data)),
            None => {
                debug!(channel = %channel_id, bytes = data.len(), "Data on idle channel");
                return Ok(());
            }
        };
        match status {
            FeedStatus::Queued => {}
            FeedStatus::Closed => {
                debug!(channel = %channel_id, "Tunnel gone, dropping channel data");
                if let Some(open) = self.channels.get_mut(&channel_id) {
                    open.feed = None;
                }
            }
            FeedStatus::Overflow => {
                // Dropping a buffer would corrupt framing, so the tunnel goes.
                warn!(
                    channel = %channel_id,
                    queued = self.shared.config.read_buffer,
                    "Engine is not keeping up with the client, closing tunnel"
                );
                counter!("netconfd.ssh.reads.overflowed").increment(1);
                if let Some(open) = self.channels.remove(&channel_id) {
                    self.shared.tunnels.remove(&open.tunnel_id);
                }
            }
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel_id: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!(channel = %channel_id, "Channel EOF");
        if let Some(open) = self.channels.get_mut(&channel_id) {
            open.feed = None;
        }
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel_id: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!(channel = %channel_id, "Channel closed");
        if let Some(open) = self.channels.remove(&channel_id) {
            // A tunnel still connecting has no reader to notice the close.
            let opening = self
                .shared
                .tunnels
                .get(&open.tunnel_id)
                .is_some_and(|t| t.state() == TunnelState::Opening);
            if opening {
                self.shared.tunnels.remove(&open.tunnel_id);
            }
        }
        Ok(())
    }
}

impl Drop for NetconfSshHandler {
    fn drop(&mut self) {
        for (_, open) in self.channels.drain() {
            self.shared.tunnels.remove(&open.tunnel_id);
        }
        self.shared.metrics.connection_closed();
        debug!(peer = ?self.peer, user = ?self.username, "SSH connection closed");
    }
}
