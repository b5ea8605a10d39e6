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

//! RFC 2385 TCP MD5 signature configuration

use crate::{TransportError, TransportResult, select_backend};
use socket2::SockRef;
use std::collections::BTreeMap;
use std::net::IpAddr;

/// Longest key the kernel accepts (`TCP_MD5SIG_MAXKEYLEN`)
pub const TCP_MD5_MAX_KEY_LEN: usize = 80;

/// Shared secrets keyed by peer address
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Md5Secrets {
    keys: BTreeMap<IpAddr, Vec<u8>>,
}

impl Md5Secrets {
    /// Create an empty secret set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the key for a peer
    pub fn with_key(mut self, peer: IpAddr, key: impl Into<Vec<u8>>) -> Self {
        self.keys.insert(peer, key.into());
        self
    }

    /// Number of configured peers
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether no peers are configured
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Iterate over `(peer, key)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&IpAddr, &[u8])> {
        self.keys.iter().map(|(peer, key)| (peer, key.as_slice()))
    }

    fn validate(&self) -> TransportResult<()> {
        for (peer, key) in self.iter() {
            if key.len() > TCP_MD5_MAX_KEY_LEN {
                return Err(TransportError::InvalidConfiguration(format!(
                    "MD5 key for {} is {} bytes, at most {} allowed",
                    peer,
                    key.len(),
                    TCP_MD5_MAX_KEY_LEN
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Md5Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.debug_struct("Md5Secrets")
            .field("peers", &self.keys.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Install MD5 signatures for every configured peer on `socket`.
///
/// Fails with [`TransportError::UnsupportedConfiguration`] when the selected
/// backend has no native signature support.
pub fn set_tcp_md5(socket: SockRef<'_>, secrets: &Md5Secrets) -> TransportResult<()> {
    let backend = select_backend();
    if !backend.supports_tcp_md5() {
        return Err(TransportError::UnsupportedConfiguration {
            option: "TCP_MD5SIG",
            backend,
        });
    }
    secrets.validate()?;
    for (peer, key) in secrets.iter() {
        native::set_key(&socket, *peer, key)?;
        tracing::debug!(peer = %peer, "Installed TCP MD5 signature");
    }
    Ok(())
}

#[cfg(target_os = "linux")]
mod native {
    use super::TCP_MD5_MAX_KEY_LEN;
    use socket2::{SockAddr, SockRef};
    use std::net::{IpAddr, SocketAddr};
    use std::os::fd::AsRawFd;

    /// Mirror of the kernel's `struct tcp_md5sig`
    #[repr(C)]
    struct TcpMd5Sig {
        tcpm_addr: libc::sockaddr_storage,
        tcpm_flags: u8,
        tcpm_prefixlen: u8,
        tcpm_keylen: u16,
        tcpm_ifindex: libc::c_int,
        tcpm_key: [u8; TCP_MD5_MAX_KEY_LEN],
    }

    pub(super) fn set_key(socket: &SockRef<'_>, peer: IpAddr, key: &[u8]) -> std::io::Result<()> {
        let addr = SockAddr::from(SocketAddr::new(peer, 0));
        // SAFETY: all-zero is a valid bit pattern for this plain C struct.
        let mut sig: TcpMd5Sig = unsafe { std::mem::zeroed() };
        // SAFETY: `addr.len()` never exceeds the size of `sockaddr_storage`.
        unsafe {
            std::ptr::copy_nonoverlapping(
                addr.as_ptr() as *const u8,
                &mut sig.tcpm_addr as *mut libc::sockaddr_storage as *mut u8,
                addr.len() as usize,
            );
        }
        sig.tcpm_keylen = key.len() as u16;
        sig.tcpm_key[..key.len()].copy_from_slice(key);

        // SAFETY: the descriptor is borrowed from a live socket for the whole
        // call. `TcpMd5Sig` is `repr(C)` with the kernel's `tcp_md5sig` layout,
        // the pointer is valid for `optlen` bytes of reads, and the kernel
        // copies the value before returning without keeping the pointer.
        let rc = unsafe {
            libc::setsockopt(
                socket.as_raw_fd(),
                libc::IPPROTO_TCP,
                libc::TCP_MD5SIG,
                &sig as *const TcpMd5Sig as *const libc::c_void,
                std::mem::size_of::<TcpMd5Sig>() as libc::socklen_t,
            )
        };
        if rc == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod native {
    use socket2::SockRef;
    use std::net::IpAddr;

    pub(super) fn set_key(_socket: &SockRef<'_>, _peer: IpAddr, _key: &[u8]) -> std::io::Result<()> {
        Err(std::io::Error::from(std::io::ErrorKind::Unsupported))
    }
}
