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

//! Socket constructors bound to the selected backend

use crate::{
    KeepaliveOptions, Md5Secrets, TransportError, TransportResult, apply_keepalive,
    select_backend, set_tcp_md5,
};
use socket2::SockRef;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket, TcpStream, UdpSocket};
use tracing::{debug, instrument};

/// Listen backlog for server sockets
pub const DEFAULT_BACKLOG: u32 = 1024;

/// Create an unconnected TCP socket for the family of `addr`
pub fn tcp_socket(addr: &SocketAddr) -> TransportResult<TcpSocket> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    Ok(socket)
}

/// Bind a listening TCP socket.
///
/// Must be called from within a tokio runtime.
pub fn bind_listener(addr: SocketAddr) -> TransportResult<TcpListener> {
    let socket = tcp_socket(&addr)?;
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    let listener = socket.listen(DEFAULT_BACKLOG)?;
    debug!(addr = %addr, backend = %select_backend(), "Bound server socket");
    Ok(listener)
}

/// Bind a datagram socket
pub async fn bind_datagram(addr: SocketAddr) -> TransportResult<UdpSocket> {
    Ok(UdpSocket::bind(addr).await?)
}

/// Client-side connection factory
///
/// # Example
///
/// ```no_run
/// use netconfd_transport::ClientBootstrap;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), netconfd_transport::TransportError> {
/// let bootstrap = ClientBootstrap::new(Duration::from_secs(5));
/// let stream = bootstrap.connect("127.0.0.1:830".parse().unwrap()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ClientBootstrap {
    connect_timeout: Duration,
    keepalive: Option<KeepaliveOptions>,
    nodelay: bool,
    md5: Option<Md5Secrets>,
}

impl ClientBootstrap {
    /// Create a bootstrap with the given connect timeout
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            keepalive: None,
            nodelay: true,
            md5: None,
        }
    }

    /// Enable keepalive with the given options
    pub fn with_keepalive(mut self, options: Option<KeepaliveOptions>) -> Self {
        self.keepalive = options;
        self
    }

    /// Enable or disable `TCP_NODELAY`
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Sign segments with TCP MD5
    pub fn with_tcp_md5(mut self, secrets: Md5Secrets) -> Self {
        self.md5 = Some(secrets);
        self
    }

    /// Configured connect timeout
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Keepalive applied to new connections, if any
    pub fn keepalive(&self) -> Option<&KeepaliveOptions> {
        self.keepalive.as_ref()
    }

    /// Connect to `addr`
    #[instrument(skip(self), fields(backend = %select_backend()))]
    pub async fn connect(&self, addr: SocketAddr) -> TransportResult<TcpStream> {
        let socket = tcp_socket(&addr)?;
        if let Some(options) = &self.keepalive {
            if select_backend().supports_keepalive_options() {
                apply_keepalive(SockRef::from(&socket), options)?;
            } else {
                socket.set_keepalive(true)?;
            }
        }
        if let Some(secrets) = &self.md5 {
            set_tcp_md5(SockRef::from(&socket), secrets)?;
        }

        let stream = tokio::time::timeout(self.connect_timeout, socket.connect(addr))
            .await
            .map_err(|_| TransportError::ConnectTimeout {
                addr,
                timeout: self.connect_timeout,
            })??;
        stream.set_nodelay(self.nodelay)?;
        debug!(local = ?stream.local_addr().ok(), "Connected");
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_bind_and_connect() {
        let listener = bind_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();

        let accept = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            socket.read_exact(&mut buf).await.unwrap();
            buf
        });

        let bootstrap = ClientBootstrap::new(Duration::from_secs(2))
            .with_keepalive(crate::keepalive_options());
        let mut stream = bootstrap.connect(addr).await.unwrap();
        assert!(stream.nodelay().unwrap());
        if crate::keepalive_options().is_some() {
            assert!(SockRef::from(&stream).keepalive().unwrap());
        }
        stream.write_all(b"hello").await.unwrap();

        assert_eq!(&accept.await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to obtain a port nobody listens on.
        let addr = {
            let listener = bind_listener("127.0.0.1:0".parse().unwrap()).unwrap();
            listener.local_addr().unwrap()
        };
        let result = ClientBootstrap::new(Duration::from_secs(2)).connect(addr).await;
        assert!(result.unwrap_err().is_connection_error());
    }

    #[tokio::test]
    async fn test_bind_datagram() {
        let socket = bind_datagram("127.0.0.1:0".parse().unwrap()).await.unwrap();
        assert!(socket.local_addr().unwrap().port() > 0);
    }
}
