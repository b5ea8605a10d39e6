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

//! End-to-end test harness
//!
//! Starts a [`NetconfSshServer`] on loop-back ports and drives it with a
//! russh client speaking NETCONF framing over the `netconf` subsystem.

use anyhow::{Context, bail};
use bytes::{Bytes, BytesMut};
use netconfd_codec::{CapabilitySet, Framing, HelloMessage, NetconfCodec, consts};
use netconfd_server::{
    GeneratedKeyPairProvider, NETCONF_SUBSYSTEM, NetconfSshServer, SshServerConfig,
    StaticPasswordAuthenticator,
};
use russh::client::{self, Msg};
use russh::keys::ssh_key;
use russh::{Channel, ChannelMsg};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

pub const TEST_USER: &str = "admin";
pub const TEST_PASSWORD: &str = "netconf";

/// Upper bound for any single step of a test
pub const STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// Start a server on free loop-back ports with the test user
pub async fn start_server() -> anyhow::Result<NetconfSshServer> {
    start_server_with(|config| config).await
}

/// Start a server after adjusting the test configuration
pub async fn start_server_with(
    configure: impl FnOnce(SshServerConfig) -> SshServerConfig,
) -> anyhow::Result<NetconfSshServer> {
    let config = configure(
        SshServerConfig::new("127.0.0.1:0".parse()?)
            .with_auth_rejection_time(Duration::from_millis(10))
            .with_connection_timeout(Duration::from_secs(5)),
    );
    let keys = Arc::new(GeneratedKeyPairProvider::new()?);
    let auth = Arc::new(StaticPasswordAuthenticator::new().with_user(TEST_USER, TEST_PASSWORD));
    Ok(NetconfSshServer::new(config, keys, auth).await?)
}

/// Hello listing `capabilities`
pub fn client_hello(capabilities: &[&str]) -> Bytes {
    HelloMessage::client(capabilities.iter().copied().collect::<CapabilitySet>()).to_bytes()
}

/// `<rpc>` with the given message-id and operation body
pub fn rpc(message_id: u32, body: &str) -> Bytes {
    Bytes::from(format!(
        "<rpc xmlns=\"{}\" message-id=\"{}\">{}</rpc>",
        consts::BASE_NAMESPACE,
        message_id,
        body
    ))
}

struct AcceptAnyHostKey;

impl client::Handler for AcceptAnyHostKey {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// SSH connection authenticated as a test user
pub struct SshConnection {
    session: client::Handle<AcceptAnyHostKey>,
}

impl SshConnection {
    /// Connect and authenticate with a password
    pub async fn connect(addr: SocketAddr, user: &str, password: &str) -> anyhow::Result<Self> {
        let mut connection = Self::connect_unauthenticated(addr).await?;
        if !connection.authenticate(user, password).await? {
            bail!("authentication rejected for {}", user);
        }
        Ok(connection)
    }

    /// Finish the SSH handshake without authenticating
    pub async fn connect_unauthenticated(addr: SocketAddr) -> anyhow::Result<Self> {
        let config = Arc::new(client::Config::default());
        let session = client::connect(config, addr, AcceptAnyHostKey)
            .await
            .context("SSH connect failed")?;
        debug!(%addr, "Test SSH connection established");
        Ok(Self { session })
    }

    /// Try a password; `Ok(false)` when the server rejected it
    pub async fn authenticate(&mut self, user: &str, password: &str) -> anyhow::Result<bool> {
        let auth = self.session.authenticate_password(user, password).await?;
        debug!(user, success = auth.success(), "Test SSH authentication finished");
        Ok(auth.success())
    }

    /// Whether the server has dropped the connection
    pub fn is_closed(&self) -> bool {
        self.session.is_closed()
    }

    /// Connect as the test user
    pub async fn connect_default(addr: SocketAddr) -> anyhow::Result<Self> {
        Self::connect(addr, TEST_USER, TEST_PASSWORD).await
    }

    /// Open a session channel and request `subsystem`
    ///
    /// Returns the channel once the server answered the request.
    pub async fn open_subsystem(&self, subsystem: &str) -> anyhow::Result<Channel<Msg>> {
        let mut channel = self.session.channel_open_session().await?;
        channel.request_subsystem(true, subsystem).await?;
        loop {
            match channel.wait().await {
                Some(ChannelMsg::Success) => return Ok(channel),
                Some(ChannelMsg::Failure) => bail!("subsystem {} refused", subsystem),
                Some(_) => continue,
                None => bail!("channel closed during subsystem request"),
            }
        }
    }

    /// Open the `netconf` subsystem
    pub async fn open_netconf(&self) -> anyhow::Result<NetconfChannel> {
        let channel = self.open_subsystem(NETCONF_SUBSYSTEM).await?;
        Ok(NetconfChannel::new(channel))
    }
}

/// NETCONF messages over an SSH channel
pub struct NetconfChannel {
    channel: Channel<Msg>,
    codec: NetconfCodec,
    buffer: BytesMut,
    stderr: Vec<u8>,
    exit_status: Option<u32>,
    eof: bool,
}

impl NetconfChannel {
    pub fn new(channel: Channel<Msg>) -> Self {
        Self {
            channel,
            codec: NetconfCodec::new(),
            buffer: BytesMut::new(),
            stderr: Vec::new(),
            exit_status: None,
            eof: false,
        }
    }

    /// Switch both directions to the given framing
    pub fn set_framing(&mut self, framing: Framing) {
        self.codec.set_framing(framing);
    }

    /// Send one message
    pub async fn send(&mut self, message: Bytes) -> anyhow::Result<()> {
        let mut encoded = BytesMut::new();
        self.codec.encode(message, &mut encoded)?;
        self.channel.data(&encoded[..]).await?;
        Ok(())
    }

    /// Next complete message, or `None` once the server ended the channel
    pub async fn recv(&mut self) -> anyhow::Result<Option<Bytes>> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.buffer)? {
                match frame.into_message() {
                    Some(message) => return Ok(Some(message)),
                    None => bail!("unexpected peer header from server"),
                }
            }
            if self.eof {
                return Ok(None);
            }
            let message = tokio::time::timeout(STEP_TIMEOUT, self.channel.wait())
                .await
                .context("timed out waiting for the server")?;
            self.absorb(message);
        }
    }

    /// Next message as text; fails at end of channel
    pub async fn recv_text(&mut self) -> anyhow::Result<String> {
        match self.recv().await? {
            Some(message) => Ok(String::from_utf8(message.to_vec())?),
            None => bail!("channel ended"),
        }
    }

    /// Read the server hello
    pub async fn recv_hello(&mut self) -> anyhow::Result<HelloMessage> {
        match self.recv().await? {
            Some(message) => Ok(HelloMessage::parse(&message)?),
            None => bail!("channel ended before the server hello"),
        }
    }

    /// Wait for the channel to end and return its exit status
    pub async fn wait_exit(&mut self) -> anyhow::Result<Option<u32>> {
        while !self.eof || self.exit_status.is_none() {
            let message = tokio::time::timeout(STEP_TIMEOUT, self.channel.wait())
                .await
                .context("timed out waiting for channel end")?;
            if message.is_none() || matches!(message, Some(ChannelMsg::Close)) {
                self.eof = true;
                break;
            }
            self.absorb(message);
        }
        Ok(self.exit_status)
    }

    /// Text the server wrote to stderr
    pub fn stderr(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Send EOF on the channel
    pub async fn send_eof(&self) -> anyhow::Result<()> {
        self.channel.eof().await?;
        Ok(())
    }

    fn absorb(&mut self, message: Option<ChannelMsg>) {
        match message {
            Some(ChannelMsg::Data { ref data }) => self.buffer.extend_from_slice(data),
            Some(ChannelMsg::ExtendedData { ref data, .. }) => self.stderr.extend_from_slice(data),
            Some(ChannelMsg::ExitStatus { exit_status }) => self.exit_status = Some(exit_status),
            Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => self.eof = true,
            Some(_) => {}
        }
    }
}

/// Poll `condition` until it holds or `STEP_TIMEOUT` passes
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + STEP_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Base 1.0 only, as most tests use
pub fn base_1_0() -> CapabilitySet {
    CapabilitySet::new().with(consts::BASE_1_0)
}
