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

//! NETCONF over SSH Front End
//!
//! Terminates SSH, authenticates users and relays every `netconf`
//! subsystem channel to the internal NETCONF engine over a loop-back
//! connection.
//!
//! # Architecture
//!
//! ```text
//! SSH client ──► russh ──► NetconfSshHandler ──► ChannelReader ──┐
//!                                                                 ▼
//!                     SshChannelAdapter ◄──── SshProxyTunnel ◄──► loop-back TCP
//!                                                                 ▼
//!                                                 NetconfServer (netconfd-service)
//! ```
//!
//! Each tunnel first writes a peer header naming the SSH user and client
//! address, so the engine attributes the session to the real peer.

mod adapter;
mod auth;
mod config;
mod error;
mod handler;
mod metrics;
mod server;
mod tunnel;

pub use adapter::{
    ChannelExit, ChannelFeed, ChannelReader, ChannelSink, DEFAULT_CLOSE_TIMEOUT, FeedStatus,
    RusshChannelSink, SshChannelAdapter, WriteCompletion, channel_pipe,
};
pub use auth::{
    AuthorizedKeysAuthenticator, Authenticator, FileKeyPairProvider, GeneratedKeyPairProvider,
    KeyPairProvider, PublicKeyAuthenticator, StaticPasswordAuthenticator,
};
pub use config::{NETCONF_SSH_PORT, SshServerConfig};
pub use error::{ProxyError, ProxyResult};
pub use handler::{NETCONF_SUBSYSTEM, NetconfSshHandler};
pub use self::metrics::{MetricsSnapshot, ServerMetrics};
pub use server::{NetconfSshServer, ServerExtensions};
pub use tunnel::{
    ConnectFuture, SshProxyTunnel, TunnelContext, TunnelExit, TunnelHandle, TunnelId,
    TunnelSide, TunnelState, loopback_connector,
};
