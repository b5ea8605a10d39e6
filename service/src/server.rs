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

//! Loop-back NETCONF engine
//!
//! The NetconfServer accepts connections on a local address, runs the hello
//! exchange on each and hands negotiated sessions to the SessionManager.
//! Front ends (the SSH tunnel) connect here and prefix the stream with a
//! peer header.

use crate::{
    EngineConfig, NegotiatorFactory, NetconfError, Result, RpcHandler, ServerSnapshot,
    SessionManager,
};
use metrics::counter;
use netconfd_transport::bind_listener;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Internal NETCONF server
///
/// # Example
///
/// ```no_run
/// use netconfd_service::{
///     DefaultRpcHandler, EngineConfig, NegotiatorFactoryBuilder, NetconfServer,
///     TracingMonitoringSink,
/// };
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = NetconfServer::new(EngineConfig::default()).await?;
///     let factory = NegotiatorFactoryBuilder::new()
///         .with_monitoring(Arc::new(TracingMonitoringSink))
///         .build()?;
///     let handler = DefaultRpcHandler::new(server.manager());
///
///     server.start(Arc::new(factory), Arc::new(handler)).await?;
///     println!("engine listening on {}", server.bind_address());
///     server.shutdown().await?;
///     Ok(())
/// }
/// ```
pub struct NetconfServer {
    config: EngineConfig,
    manager: Arc<SessionManager>,
    listener: Mutex<Option<TcpListener>>,
    bind_address: SocketAddr,
    started_at: Instant,
    running: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
    accept_handle: Mutex<Option<JoinHandle<()>>>,
}

impl NetconfServer {
    /// Bind the engine's listener.
    ///
    /// Does not accept connections until `start()` is called.
    pub async fn new(config: EngineConfig) -> Result<Self> {
        config.validate().map_err(NetconfError::Configuration)?;

        let listener = bind_listener(config.bind_address)?;
        let bind_address = listener.local_addr()?;
        if !bind_address.ip().is_loopback() {
            warn!(addr = %bind_address, "NETCONF engine bound to a non loop-back address");
        }

        let manager = Arc::new(SessionManager::new(config.shutdown_timeout));
        info!("NETCONF engine bound to {}", bind_address);

        Ok(Self {
            config,
            manager,
            listener: Mutex::new(Some(listener)),
            bind_address,
            started_at: Instant::now(),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_notify: Arc::new(Notify::new()),
            accept_handle: Mutex::new(None),
        })
    }

    /// Start accepting connections
    pub async fn start(
        &self,
        factory: Arc<NegotiatorFactory>,
        handler: Arc<dyn RpcHandler>,
    ) -> Result<()> {
        let Some(listener) = self.listener.lock().await.take() else {
            return Err(NetconfError::Other("Server already started".to_string()));
        };
        self.running.store(true, Ordering::SeqCst);
        info!("Starting NETCONF engine on {}", self.bind_address);

        let handle = self.spawn_accept_loop(listener, factory, handler);
        *self.accept_handle.lock().await = Some(handle);
        Ok(())
    }

    fn spawn_accept_loop(
        &self,
        listener: TcpListener,
        factory: Arc<NegotiatorFactory>,
        handler: Arc<dyn RpcHandler>,
    ) -> JoinHandle<()> {
        let manager = self.manager.clone();
        let running = self.running.clone();
        let shutdown_notify = self.shutdown_notify.clone();
        let max_sessions = self.config.max_sessions;
        let session_config = self.config.session_config();

        tokio::spawn(async move {
            loop {
                if !running.load(Ordering::SeqCst) {
                    break;
                }

                let accept_result = tokio::select! {
                    result = listener.accept() => result,
                    _ = shutdown_notify.notified() => break,
                };

                match accept_result {
                    Ok((socket, peer_addr)) => {
                        debug!("Accepted connection from {}", peer_addr);

                        if manager.session_count() >= max_sessions {
                            warn!(
                                "Session limit reached ({}), rejecting connection from {}",
                                max_sessions, peer_addr
                            );
                            counter!("netconfd.sessions.rejected").increment(1);
                            drop(socket);
                            continue;
                        }
                        if let Err(e) = socket.set_nodelay(true) {
                            debug!(error = %e, "Failed to set TCP_NODELAY");
                        }

                        let negotiator = factory
                            .negotiator(socket, peer_addr)
                            .with_session_config(session_config.clone());
                        let manager = manager.clone();
                        let handler = handler.clone();
                        tokio::spawn(async move {
                            match negotiator.negotiate().await {
                                Ok(session) => {
                                    manager.spawn_session(session, handler);
                                }
                                Err(e) => {
                                    debug!(peer = %peer_addr, error = %e, "Connection not negotiated");
                                }
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        // Back off on errors to avoid tight loop
                        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    }
                }
            }

            info!("Accept loop terminated");
        })
    }

    /// Stop accepting connections and close every session
    pub async fn shutdown(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(NetconfError::ServerNotRunning);
        }

        info!("Shutting down NETCONF engine");
        self.shutdown_notify.notify_waiters();

        if let Some(handle) = self.accept_handle.lock().await.take() {
            let _ = tokio::time::timeout(self.config.shutdown_timeout, handle).await;
        }

        self.manager.shutdown().await;
        info!("NETCONF engine shutdown complete");
        Ok(())
    }

    /// Check if the server is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Address the engine listens on
    pub fn bind_address(&self) -> SocketAddr {
        self.bind_address
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.manager.session_count()
    }

    /// Get a snapshot of the server state
    pub fn snapshot(&self) -> ServerSnapshot {
        ServerSnapshot {
            active_sessions: self.manager.session_count(),
            total_sessions: self.manager.total_sessions(),
            bind_address: self.bind_address,
            uptime: self.started_at.elapsed(),
            started_at: self.started_at,
        }
    }

    /// Get the session manager
    pub fn manager(&self) -> Arc<SessionManager> {
        self.manager.clone()
    }

    /// Get the server configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl std::fmt::Debug for NetconfServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetconfServer")
            .field("bind_address", &self.bind_address)
            .field("running", &self.is_running())
            .field("session_count", &self.session_count())
            .field("uptime", &self.started_at.elapsed())
            .finish()
    }
}

impl Drop for NetconfServer {
    fn drop(&mut self) {
        if self.running.load(Ordering::SeqCst) {
            warn!("NetconfServer dropped while still running");
            self.running.store(false, Ordering::SeqCst);
            self.shutdown_notify.notify_waiters();
        }
    }
}
