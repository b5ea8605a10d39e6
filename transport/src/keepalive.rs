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

//! TCP keepalive tuning
//!
//! Keepalive count, idle time and probe interval are only tunable on native
//! backends. [`keepalive_options`] returns `None` when they are not, which
//! callers treat as "feature unsupported".

use crate::{TransportResult, select_backend};
use socket2::SockRef;
use std::sync::OnceLock;
use std::time::Duration;

/// Per-socket TCP keepalive settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveOptions {
    /// Unacknowledged probes before the connection is dropped (`TCP_KEEPCNT`)
    pub tcp_keep_cnt: u32,
    /// Idle time before the first probe (`TCP_KEEPIDLE`)
    pub tcp_keep_idle: Duration,
    /// Time between probes (`TCP_KEEPINTVL`)
    pub tcp_keep_intvl: Duration,
}

impl Default for KeepaliveOptions {
    fn default() -> Self {
        Self {
            tcp_keep_cnt: 3,
            tcp_keep_idle: Duration::from_secs(60),
            tcp_keep_intvl: Duration::from_secs(10),
        }
    }
}

impl KeepaliveOptions {
    /// Set the probe count
    pub fn with_keep_cnt(mut self, count: u32) -> Self {
        self.tcp_keep_cnt = count;
        self
    }

    /// Set the idle time
    pub fn with_keep_idle(mut self, idle: Duration) -> Self {
        self.tcp_keep_idle = idle;
        self
    }

    /// Set the probe interval
    pub fn with_keep_intvl(mut self, interval: Duration) -> Self {
        self.tcp_keep_intvl = interval;
        self
    }
}

/// Keepalive defaults of the platform, if the backend can tune them.
///
/// The first call probes a throwaway socket; the result is cached.
pub fn keepalive_options() -> Option<KeepaliveOptions> {
    static OPTIONS: OnceLock<Option<KeepaliveOptions>> = OnceLock::new();
    *OPTIONS.get_or_init(|| {
        if !select_backend().supports_keepalive_options() {
            return None;
        }
        match native::probe() {
            Ok(options) => options,
            Err(e) => {
                tracing::debug!(error = %e, "Keepalive option probe failed");
                None
            }
        }
    })
}

/// Enable keepalive on a socket with the given options
pub fn apply_keepalive(socket: SockRef<'_>, options: &KeepaliveOptions) -> TransportResult<()> {
    native::apply(socket, options)
}

#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "dragonfly"
))]
mod native {
    use super::KeepaliveOptions;
    use crate::TransportResult;
    use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};

    pub(super) fn probe() -> std::io::Result<Option<KeepaliveOptions>> {
        // Dropped on every return path, closing the descriptor.
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        Ok(Some(KeepaliveOptions {
            tcp_keep_cnt: socket.keepalive_retries()?,
            tcp_keep_idle: socket.keepalive_time()?,
            tcp_keep_intvl: socket.keepalive_interval()?,
        }))
    }

    pub(super) fn apply(socket: SockRef<'_>, options: &KeepaliveOptions) -> TransportResult<()> {
        let keepalive = TcpKeepalive::new()
            .with_time(options.tcp_keep_idle)
            .with_interval(options.tcp_keep_intvl)
            .with_retries(options.tcp_keep_cnt);
        socket.set_tcp_keepalive(&keepalive)?;
        Ok(())
    }
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "dragonfly"
)))]
mod native {
    use super::KeepaliveOptions;
    use crate::{TransportError, TransportResult, select_backend};
    use socket2::SockRef;

    pub(super) fn probe() -> std::io::Result<Option<KeepaliveOptions>> {
        Ok(None)
    }

    pub(super) fn apply(_socket: SockRef<'_>, _options: &KeepaliveOptions) -> TransportResult<()> {
        Err(TransportError::UnsupportedConfiguration {
            option: "TCP_KEEPCNT",
            backend: select_backend(),
        })
    }
}
