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

//! Native I/O backend selection

use std::fmt;
use std::sync::OnceLock;

/// Environment variable that forces the portable backend
pub const PORTABLE_TRANSPORT_ENV: &str = "NETCONFD_PORTABLE_TRANSPORT";

/// Native I/O backend available to the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Linux epoll
    Epoll,
    /// BSD and Darwin kqueue
    Kqueue,
    /// Generic poll based fallback
    Portable,
}

impl Backend {
    /// Detect the best backend for this platform.
    ///
    /// `force_portable` skips native detection entirely.
    pub fn detect(force_portable: bool) -> Self {
        if force_portable {
            return Backend::Portable;
        }
        if cfg!(any(target_os = "linux", target_os = "android")) {
            Backend::Epoll
        } else if cfg!(any(
            target_os = "macos",
            target_os = "ios",
            target_os = "freebsd",
            target_os = "netbsd",
            target_os = "openbsd",
            target_os = "dragonfly"
        )) {
            Backend::Kqueue
        } else {
            Backend::Portable
        }
    }

    /// Short lowercase name
    pub fn name(self) -> &'static str {
        match self {
            Backend::Epoll => "epoll",
            Backend::Kqueue => "kqueue",
            Backend::Portable => "portable",
        }
    }

    /// Whether TCP keepalive count/idle/interval can be tuned per socket
    pub fn supports_keepalive_options(self) -> bool {
        !matches!(self, Backend::Portable)
    }

    /// Whether RFC 2385 TCP MD5 signatures can be configured
    pub fn supports_tcp_md5(self) -> bool {
        matches!(self, Backend::Epoll) && cfg!(target_os = "linux")
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Select the backend for this process.
///
/// The choice is made once, on first call, and never changes afterwards.
pub fn select_backend() -> Backend {
    static BACKEND: OnceLock<Backend> = OnceLock::new();
    *BACKEND.get_or_init(|| {
        let force_portable = std::env::var_os(PORTABLE_TRANSPORT_ENV).is_some();
        let backend = Backend::detect(force_portable);
        tracing::debug!(backend = %backend, force_portable, "Selected transport backend");
        backend
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_backend_is_stable() {
        assert_eq!(select_backend(), select_backend());
    }

    #[test]
    fn test_force_portable() {
        let backend = Backend::detect(true);
        assert_eq!(backend, Backend::Portable);
        assert!(!backend.supports_keepalive_options());
        assert!(!backend.supports_tcp_md5());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_linux_uses_epoll() {
        let backend = Backend::detect(false);
        assert_eq!(backend, Backend::Epoll);
        assert!(backend.supports_tcp_md5());
    }

    #[test]
    fn test_display() {
        assert_eq!(Backend::Kqueue.to_string(), "kqueue");
    }
}
