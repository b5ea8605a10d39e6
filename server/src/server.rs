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

//! NETCONF over SSH server

use crate::auth::{Authenticator, KeyPairProvider, PublicKeyAuthenticator};
use crate::handler::{FrontEndShared, SshFrontEnd};
use crate::{MetricsSnapshot, ProxyError, ProxyResult, ServerMetrics, SshServerConfig};
use netconfd_codec::CapabilitySet;
use netconfd_service::{
    DefaultRpcHandler, EngineConfig, MonitoringSink, NegotiatorFactoryBuilder, NetconfError,
    NetconfServer, RpcHandler, TracingMonitoringSink,
};
use netconfd_transport::{CurrentRuntime, Executor, NoShutdownExecutor, bind_listener};
use metrics::counter;
use russh::Disconnect;
use russh::server::Server as _;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Optional collaborators of [`NetconfSshServer`]
#[derive(Default, Clone)]
pub struct ServerExtensions {
    public_keys: Option<Arc<dyn PublicKeyAuthenticator>>,
    rpc_handler: Option<Arc<dyn RpcHandler>>,
    monitoring: Option<Arc<dyn MonitoringSink>>,
}

impl ServerExtensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept public key authentication
    pub fn with_public_key_authenticator(mut self, auth: Arc<dyn PublicKeyAuthenticator>) -> Self {
        self.public_keys = Some(auth);
        self
    }

    /// Answer operations beyond `close-session` and `kill-session`
    pub fn with_rpc_handler(mut self, handler: Arc<dyn RpcHandler>) -> Self {
        self.rpc_handler = Some(handler);
        self
    }

    /// Receive session up/down notifications
    pub fn with_monitoring(mut self, monitoring: Arc<dyn MonitoringSink>) -> Self {
        self.monitoring = Some(monitoring);
        self
    }
}

/// NETCONF over SSH server
///
/// Runs the internal engine on a loop-back address and an SSH listener that
/// tunnels each `netconf` subsystem channel into it.
///
/// # Example
///
/// ```no_run
/// use netconfd_server::{
///     GeneratedKeyPairProvider, NetconfSshServer, SshServerConfig, StaticPasswordAuthenticator,
/// };
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = SshServerConfig::new("0.0.0.0:830".parse()?);
///     let keys = Arc::new(GeneratedKeyPairProvider::new()?);
///     let auth = Arc::new(StaticPasswordAuthenticator::new().with_user("admin", "admin"));
///
///     let server = NetconfSshServer::new(config, keys, auth).await?;
///     tokio::signal::ctrl_c().await?;
///     server.shutdown().await?;
///     Ok(())
/// }
/// ```
pub struct NetconfSshServer {
    config: SshServerConfig,
    engine: NetconfServer,
    shared: Arc<FrontEndShared>,
    runtime: Arc<CurrentRuntime>,
    metrics: Arc<ServerMetrics>,
    local_address: SocketAddr,
    running: AtomicBool,
    cancel: CancellationToken,
    accept_handle: Mutex<Option<JoinHandle<()>>>,
}

impl NetconfSshServer {
    /// Start the engine and the SSH listener
    pub async fn new(
        config: SshServerConfig,
        keys: Arc<dyn KeyPairProvider>,
        auth: Arc<dyn Authenticator>,
    ) -> ProxyResult<Self> {
        Self::with_extensions(config, keys, auth, ServerExtensions::default()).await
    }

    /// Start with optional collaborators
    pub async fn with_extensions(
        config: SshServerConfig,
        keys: Arc<dyn KeyPairProvider>,
        auth: Arc<dyn Authenticator>,
        extensions: ServerExtensions,
    ) -> ProxyResult<Self> {
        config.validate().map_err(ProxyError::Configuration)?;

        let host_keys = keys.host_keys();
        if host_keys.is_empty() {
            return Err(ProxyError::KeyMaterial(
                "key pair provider returned no host keys".to_string(),
            ));
        }

        let engine = Self::start_engine(&config, &extensions).await?;
        let engine_address = engine.bind_address();

        let russh_config = Arc::new(russh::server::Config {
            keys: host_keys,
            auth_rejection_time: config.auth_rejection_time,
            auth_rejection_time_initial: Some(Duration::ZERO),
            max_auth_attempts: config.max_auth_attempts,
            inactivity_timeout: Some(config.idle_timeout),
            ..Default::default()
        });

        let listener = match bind_listener(config.bind_address) {
            Ok(listener) => listener,
            Err(e) => {
                let _ = engine.shutdown().await;
                return Err(e.into());
            }
        };
        let local_address = listener.local_addr()?;

        let runtime = Arc::new(CurrentRuntime::try_new()?);
        let executor: Arc<dyn Executor> = Arc::new(NoShutdownExecutor::new(runtime.clone()));
        let metrics = Arc::new(ServerMetrics::new());
        let shared = Arc::new(FrontEndShared::new(
            config.clone(),
            engine_address,
            auth,
            extensions.public_keys.clone(),
            executor,
            metrics.clone(),
        ));

        let cancel = CancellationToken::new();
        let accept = tokio::spawn(accept_loop(
            SshFrontEnd::new(shared.clone()),
            russh_config,
            listener,
            config.auth_timeout,
            cancel.clone(),
        ));

        info!(
            ssh = %local_address,
            engine = %engine_address,
            "NETCONF SSH server listening"
        );

        Ok(Self {
            config,
            engine,
            shared,
            runtime,
            metrics,
            local_address,
            running: AtomicBool::new(true),
            cancel,
            accept_handle: Mutex::new(Some(accept)),
        })
    }

    async fn start_engine(
        config: &SshServerConfig,
        extensions: &ServerExtensions,
    ) -> ProxyResult<NetconfServer> {
        let monitoring = extensions
            .monitoring
            .clone()
            .unwrap_or_else(|| Arc::new(TracingMonitoringSink));
        let base = config
            .base_capabilities
            .clone()
            .unwrap_or_else(CapabilitySet::known_base);
        let factory = NegotiatorFactoryBuilder::new()
            .with_connection_timeout(config.connection_timeout)
            .with_base_capabilities(base)
            .with_extension_capabilities(config.extension_capabilities.clone())
            .with_monitoring(monitoring)
            .build()?;

        let engine = NetconfServer::new(EngineConfig::new(config.internal_address)).await?;
        let mut handler = DefaultRpcHandler::new(engine.manager());
        if let Some(delegate) = &extensions.rpc_handler {
            handler = handler.with_delegate(delegate.clone());
        }
        engine.start(Arc::new(factory), Arc::new(handler)).await?;
        Ok(engine)
    }

    /// Stop the SSH listener, then the engine
    pub async fn shutdown(&self) -> ProxyResult<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(ProxyError::Engine(NetconfError::ServerNotRunning));
        }

        info!("Shutting down NETCONF SSH server");
        self.cancel.cancel();
        if let Some(handle) = self.accept_handle.lock().await.take() {
            let _ = tokio::time::timeout(self.config.close_timeout, handle).await;
        }

        self.shared.destroy_tunnels();
        if self.engine.is_running() {
            self.engine.shutdown().await?;
        }
        self.runtime.shutdown();
        info!("NETCONF SSH server shutdown complete");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Address the SSH listener is bound to
    pub fn local_address(&self) -> SocketAddr {
        self.local_address
    }

    /// Address of the internal engine
    pub fn engine_address(&self) -> SocketAddr {
        self.engine.bind_address()
    }

    /// The internal engine
    pub fn engine(&self) -> &NetconfServer {
        &self.engine
    }

    /// Number of tunnels currently relaying
    pub fn tunnel_count(&self) -> usize {
        self.shared.tunnels.len()
    }

    /// Front end counters
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn config(&self) -> &SshServerConfig {
        &self.config
    }
}

/// Accept SSH connections until `shutdown` fires
async fn accept_loop(
    mut front_end: SshFrontEnd,
    russh_config: Arc<russh::server::Config>,
    listener: TcpListener,
    auth_timeout: Duration,
    shutdown: CancellationToken,
) {
    loop {
        let (stream, peer) = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Failed to accept SSH connection");
                    continue;
                }
            },
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
        }

        let handler = front_end.new_client(Some(peer));
        let authenticated = handler.authenticated_flag();
        let mut errors = front_end.clone();
        let russh_config = russh_config.clone();
        tokio::spawn(async move {
            let deadline = Instant::now() + auth_timeout;
            let session = match timeout_at(
                deadline,
                russh::server::run_stream(russh_config, stream, handler),
            )
            .await
            {
                Ok(Ok(session)) => session,
                Ok(Err(e)) => {
                    errors.handle_session_error(e);
                    return;
                }
                Err(_) => {
                    info!(peer = %peer, "SSH handshake not finished before authentication deadline");
                    return;
                }
            };

            // Drop connections that have not authenticated by the deadline.
            let handle = session.handle();
            let watchdog = tokio::spawn(async move {
                sleep_until(deadline).await;
                if !authenticated.load(Ordering::Acquire) {
                    info!(peer = %peer, timeout = ?auth_timeout, "Authentication timed out");
                    counter!("netconfd.ssh.auth.timed_out").increment(1);
                    let _ = handle
                        .disconnect(
                            Disconnect::ByApplication,
                            "authentication timed out".into(),
                            "en".into(),
                        )
                        .await;
                }
            });

            if let Err(e) = session.await {
                errors.handle_session_error(e);
            }
            watchdog.abort();
        });
    }
    info!("SSH accept loop terminated");
}

impl std::fmt::Debug for NetconfSshServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetconfSshServer")
            .field("local_address", &self.local_address)
            .field("engine", &self.engine)
            .field("running", &self.is_running())
            .field("tunnels", &self.tunnel_count())
            .finish()
    }
}

impl Drop for NetconfSshServer {
    fn drop(&mut self) {
        if self.running.load(Ordering::SeqCst) {
            warn!("NetconfSshServer dropped while still running");
            self.cancel.cancel();
            self.shared.destroy_tunnels();
        }
    }
}
