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

//! Request handler and monitoring traits

use crate::{NetconfError, SessionEvent, SessionHandle, SessionId, SessionManager};
use async_trait::async_trait;
use bytes::Bytes;
use netconfd_codec::{ErrorTag, ErrorType, RpcError, RpcMessage, ok_reply};
use std::sync::Arc;
use tracing::{debug, info};

/// Answers `<rpc>` requests on a session
///
/// The returned bytes are the complete `<rpc-reply>` document. Returning an
/// [`RpcError`] makes the session reply with an `<rpc-error>` and count the
/// request as failed.
///
/// # Example
///
/// ```no_run
/// use netconfd_service::{RpcHandler, SessionHandle};
/// use netconfd_codec::{RpcError, RpcMessage, data_reply};
/// use async_trait::async_trait;
/// use bytes::Bytes;
///
/// struct Running;
///
/// #[async_trait]
/// impl RpcHandler for Running {
///     async fn handle_rpc(
///         &self,
///         _session: &SessionHandle,
///         rpc: &RpcMessage,
///     ) -> Result<Bytes, RpcError> {
///         Ok(data_reply(rpc.message_id(), "<interfaces/>"))
///     }
/// }
/// ```
#[async_trait]
pub trait RpcHandler: Send + Sync + 'static {
    /// Answer one request
    async fn handle_rpc(
        &self,
        _session: &SessionHandle,
        rpc: &RpcMessage,
    ) -> Result<Bytes, RpcError> {
        Err(not_supported(rpc))
    }
}

fn not_supported(rpc: &RpcMessage) -> RpcError {
    RpcError::new(ErrorType::Protocol, ErrorTag::OperationNotSupported)
        .with_message(format!("operation '{}' is not supported", rpc.operation()))
}

/// Built-in session operations.
///
/// Answers `<close-session>` with `<ok/>` followed by a delayed close and
/// `<kill-session>` by closing the target through the session manager.
/// Everything else goes to the delegate, or is refused with
/// `operation-not-supported` when there is none.
pub struct DefaultRpcHandler {
    manager: Arc<SessionManager>,
    delegate: Option<Arc<dyn RpcHandler>>,
}

impl DefaultRpcHandler {
    /// Create a handler that closes sessions through `manager`
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self {
            manager,
            delegate: None,
        }
    }

    /// Forward all other operations to `delegate`
    pub fn with_delegate(mut self, delegate: Arc<dyn RpcHandler>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    async fn kill_session(
        &self,
        session: &SessionHandle,
        rpc: &RpcMessage,
    ) -> Result<Bytes, RpcError> {
        let raw = rpc.operation_parameter("session-id").ok_or_else(|| {
            RpcError::new(ErrorType::Protocol, ErrorTag::MissingElement)
                .with_message("kill-session requires session-id")
        })?;
        let target = raw
            .parse::<u64>()
            .ok()
            .filter(|id| *id > 0)
            .map(SessionId::new)
            .ok_or_else(|| {
                RpcError::new(ErrorType::Protocol, ErrorTag::InvalidValue)
                    .with_message(format!("invalid session-id '{}'", raw))
            })?;

        if target == session.session_id() {
            return Err(RpcError::new(ErrorType::Protocol, ErrorTag::InvalidValue)
                .with_message("a session cannot kill itself"));
        }

        match self.manager.close_session(target).await {
            Ok(()) => {
                info!(session_id = %session.session_id(), target = %target, "Killed session");
                Ok(ok_reply(rpc.message_id()))
            }
            Err(NetconfError::SessionNotFound(_)) | Err(NetconfError::SessionClosed) => {
                Err(RpcError::new(ErrorType::Protocol, ErrorTag::InvalidValue)
                    .with_message(format!("no session {}", target.as_u64())))
            }
            Err(e) => Err(RpcError::new(ErrorType::Application, ErrorTag::OperationFailed)
                .with_message(e.to_string())),
        }
    }
}

#[async_trait]
impl RpcHandler for DefaultRpcHandler {
    async fn handle_rpc(
        &self,
        session: &SessionHandle,
        rpc: &RpcMessage,
    ) -> Result<Bytes, RpcError> {
        match rpc.operation() {
            "close-session" => {
                session.request_delayed_close();
                Ok(ok_reply(rpc.message_id()))
            }
            "kill-session" => self.kill_session(session, rpc).await,
            _ => match &self.delegate {
                Some(delegate) => delegate.handle_rpc(session, rpc).await,
                None => Err(not_supported(rpc)),
            },
        }
    }
}

impl std::fmt::Debug for DefaultRpcHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultRpcHandler")
            .field("has_delegate", &self.delegate.is_some())
            .finish()
    }
}

/// Observer of session lifecycle
///
/// All methods have default implementations that do nothing.
pub trait MonitoringSink: Send + Sync + 'static {
    /// A hello exchange succeeded and the session is about to run
    fn on_session_up(&self, _session: &SessionHandle) {}

    /// A session ended
    fn on_session_down(&self, _session: &SessionHandle) {}

    /// Something happened on a running session
    fn on_session_event(&self, _id: SessionId, _event: SessionEvent) {}
}

/// Monitoring sink that logs through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMonitoringSink;

impl MonitoringSink for TracingMonitoringSink {
    fn on_session_up(&self, session: &SessionHandle) {
        info!(
            session_id = %session.session_id(),
            user = %session.username(),
            capabilities = %session.capabilities(),
            "Session up"
        );
    }

    fn on_session_down(&self, session: &SessionHandle) {
        info!(
            session_id = %session.session_id(),
            in_rpc_ok = session.in_rpc_ok(),
            in_rpc_fail = session.in_rpc_fail(),
            "Session down"
        );
    }

    fn on_session_event(&self, id: SessionId, event: SessionEvent) {
        debug!(session_id = %id, event = ?event, "Session event");
    }
}
