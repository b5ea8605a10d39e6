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

//! Session manager
//!
//! The SessionManager is responsible for:
//! - Spawning and tracking session tasks
//! - Closing sessions by ID (`<kill-session>`)
//! - Broadcasting notifications
//! - Shutdown coordination

use crate::{
    ManagementSession, NetconfError, NetconfServerSession, Result, RpcHandler, SessionHandle,
    SessionId,
};
use bytes::Bytes;
use dashmap::DashMap;
use metrics::counter;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Result of a broadcast operation
#[derive(Debug, Clone, Default)]
pub struct BroadcastResult {
    /// Total number of sessions attempted
    pub total: usize,
    /// Number of successful sends
    pub succeeded: usize,
    /// Number of failed sends
    pub failed: usize,
    /// Sessions that could not be reached
    pub errors: Vec<(SessionId, String)>,
}

impl BroadcastResult {
    /// Check if all broadcasts succeeded
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

struct ManagedSession {
    handle: SessionHandle,
    task: Option<JoinHandle<()>>,
}

/// Registry of live sessions
pub struct SessionManager {
    sessions: Arc<DashMap<SessionId, ManagedSession>>,
    total_sessions: AtomicU64,
    shutdown_timeout: Duration,
}

impl SessionManager {
    /// Create an empty manager
    pub fn new(shutdown_timeout: Duration) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            total_sessions: AtomicU64::new(0),
            shutdown_timeout,
        }
    }

    /// Run `session` on its own task and track it until it exits
    pub fn spawn_session<S>(
        &self,
        session: NetconfServerSession<S>,
        handler: Arc<dyn RpcHandler>,
    ) -> SessionId
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let handle = session.handle();
        let id = handle.session_id();

        // Register before spawning so the exit path always finds the entry.
        self.sessions.insert(id, ManagedSession { handle, task: None });
        self.total_sessions.fetch_add(1, Ordering::Relaxed);
        counter!("netconfd.sessions.total").increment(1);

        let sessions = self.sessions.clone();
        let task = tokio::spawn(async move {
            session.run(handler).await;
            sessions.remove(&id);
        });
        if let Some(mut entry) = self.sessions.get_mut(&id) {
            entry.task = Some(task);
        }
        id
    }

    /// Handle of a live session
    pub fn get(&self, id: SessionId) -> Option<SessionHandle> {
        self.sessions.get(&id).map(|entry| entry.handle.clone())
    }

    /// Management snapshots of every live session, ordered by ID
    pub fn sessions(&self) -> Vec<ManagementSession> {
        let mut sessions: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| entry.handle.to_management_session())
            .collect();
        sessions.sort_by_key(|session| session.session_id);
        sessions
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Sessions started since creation
    pub fn total_sessions(&self) -> u64 {
        self.total_sessions.load(Ordering::Relaxed)
    }

    /// Ask a session to close
    pub async fn close_session(&self, id: SessionId) -> Result<()> {
        let handle = self.get(id).ok_or(NetconfError::SessionNotFound(id))?;
        handle.close().await
    }

    /// Queue a notification on every live session
    pub async fn broadcast_notification(&self, document: Bytes) -> BroadcastResult {
        let handles: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| entry.handle.clone())
            .collect();

        let mut result = BroadcastResult {
            total: handles.len(),
            ..Default::default()
        };

        let sends = handles.iter().map(|handle| {
            let document = document.clone();
            async move { (handle.session_id(), handle.send_notification(document).await) }
        });
        for (id, outcome) in futures_util::future::join_all(sends).await {
            match outcome {
                Ok(()) => result.succeeded += 1,
                Err(e) => {
                    result.failed += 1;
                    result.errors.push((id, e.to_string()));
                }
            }
        }
        result
    }

    /// Close every session, waiting up to the shutdown timeout
    pub async fn shutdown(&self) {
        let handles: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| entry.handle.clone())
            .collect();
        for handle in &handles {
            let _ = handle.close().await;
        }

        let tasks: Vec<_> = self
            .sessions
            .iter_mut()
            .filter_map(|mut entry| entry.task.take())
            .collect();
        for mut task in tasks {
            if tokio::time::timeout(self.shutdown_timeout, &mut task)
                .await
                .is_err()
            {
                warn!("Session did not close in time, aborting");
                task.abort();
            }
        }

        self.sessions.clear();
        debug!(sessions = handles.len(), "Session manager shut down");
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("session_count", &self.session_count())
            .field("total_sessions", &self.total_sessions())
            .finish()
    }
}
