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

//! Event-loop groups and executor guards
//!
//! An [`EventLoopGroup`] is a named multi-threaded runtime that connection
//! tasks are spawned on. Components that must not be able to stop a shared
//! group receive it wrapped in a [`NoShutdownExecutor`], which forwards every
//! call except [`Executor::shutdown`].

use crate::{TransportError, TransportResult};
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;

/// Something that runs connection tasks
pub trait Executor: Send + Sync + std::fmt::Debug {
    /// Spawn a task
    fn spawn(&self, future: BoxFuture<'static, ()>) -> TransportResult<JoinHandle<()>>;

    /// Stop accepting work and stop running tasks
    fn shutdown(&self);

    /// Whether `shutdown` has taken effect
    fn is_shutdown(&self) -> bool;
}

/// A dedicated multi-threaded runtime
pub struct EventLoopGroup {
    name: String,
    threads: usize,
    handle: Handle,
    runtime: Mutex<Option<Runtime>>,
    shutdown: AtomicBool,
}

impl EventLoopGroup {
    /// Build a group with `num_threads` workers named `<thread_name>-<n>`.
    ///
    /// Zero threads selects the runtime default (one per core).
    pub fn new(num_threads: usize, thread_name: impl Into<String>) -> TransportResult<Self> {
        let name = thread_name.into();
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        if num_threads > 0 {
            builder.worker_threads(num_threads);
        }
        let prefix = name.clone();
        let sequence = AtomicU64::new(0);
        let runtime = builder
            .enable_all()
            .thread_name_fn(move || {
                format!("{}-{}", prefix, sequence.fetch_add(1, Ordering::Relaxed))
            })
            .build()?;

        tracing::debug!(
            group = %name,
            threads = num_threads,
            backend = %crate::select_backend(),
            "Created event loop group"
        );

        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Mutex::new(Some(runtime)),
            shutdown: AtomicBool::new(false),
            threads: num_threads,
            name,
        })
    }

    /// Group name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Requested worker count (0 means runtime default)
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Runtime handle for spawning or entering the group
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Run a future to completion on the group.
    ///
    /// Must not be called from within an async context.
    pub fn block_on<F: std::future::Future>(&self, future: F) -> F::Output {
        self.handle.block_on(future)
    }

    /// Authoritative shutdown: wait up to `timeout` for running tasks.
    ///
    /// Must not be called from within an async context.
    pub fn shutdown_gracefully(&self, timeout: Duration) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(runtime) = self.take_runtime() {
            tracing::info!(group = %self.name, "Shutting down event loop group");
            runtime.shutdown_timeout(timeout);
        }
    }

    fn take_runtime(&self) -> Option<Runtime> {
        match self.runtime.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

impl Executor for EventLoopGroup {
    fn spawn(&self, future: BoxFuture<'static, ()>) -> TransportResult<JoinHandle<()>> {
        if self.is_shutdown() {
            return Err(TransportError::ExecutorShutdown);
        }
        Ok(self.handle.spawn(future))
    }

    fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(runtime) = self.take_runtime() {
            tracing::info!(group = %self.name, "Event loop group shut down");
            runtime.shutdown_background();
        }
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for EventLoopGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoopGroup")
            .field("name", &self.name)
            .field("threads", &self.threads)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

impl Drop for EventLoopGroup {
    fn drop(&mut self) {
        // Dropping a runtime inside async code panics; shut it down detached instead.
        if let Some(runtime) = self.take_runtime() {
            runtime.shutdown_background();
        }
    }
}

/// The tokio runtime the caller is already running on
#[derive(Debug)]
pub struct CurrentRuntime {
    handle: Handle,
    shutdown: AtomicBool,
}

impl CurrentRuntime {
    /// Capture the current runtime; fails outside of one
    pub fn try_new() -> TransportResult<Self> {
        let handle = Handle::try_current().map_err(|e| {
            TransportError::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
        })?;
        Ok(Self {
            handle,
            shutdown: AtomicBool::new(false),
        })
    }
}

impl Executor for CurrentRuntime {
    fn spawn(&self, future: BoxFuture<'static, ()>) -> TransportResult<JoinHandle<()>> {
        if self.is_shutdown() {
            return Err(TransportError::ExecutorShutdown);
        }
        Ok(self.handle.spawn(future))
    }

    /// The ambient runtime belongs to the caller; only new spawns are refused.
    fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

/// Executor wrapper that ignores `shutdown` requests.
///
/// The owner keeps its own reference to the wrapped executor and shuts it
/// down through that; holders of the wrapper cannot.
#[derive(Debug)]
pub struct NoShutdownExecutor<E: ?Sized> {
    inner: Arc<E>,
    ignored: AtomicU64,
}

impl<E: Executor + ?Sized> NoShutdownExecutor<E> {
    /// Wrap a shared executor
    pub fn new(inner: Arc<E>) -> Self {
        Self {
            inner,
            ignored: AtomicU64::new(0),
        }
    }

    /// Number of shutdown requests that were swallowed
    pub fn ignored_shutdowns(&self) -> u64 {
        self.ignored.load(Ordering::Relaxed)
    }

    /// The wrapped executor
    pub fn inner(&self) -> &Arc<E> {
        &self.inner
    }
}

impl<E: Executor + ?Sized> Executor for NoShutdownExecutor<E> {
    fn spawn(&self, future: BoxFuture<'static, ()>) -> TransportResult<JoinHandle<()>> {
        self.inner.spawn(future)
    }

    fn shutdown(&self) {
        self.ignored.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Ignoring shutdown request on shared executor");
    }

    fn is_shutdown(&self) -> bool {
        self.inner.is_shutdown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    #[test]
    fn test_event_loop_group_runs_tasks() {
        let group = EventLoopGroup::new(2, "netconf-io").unwrap();
        let handle = group.spawn(async {}.boxed()).unwrap();
        group.block_on(handle).unwrap();

        let name = group.block_on(async {
            tokio::task::spawn_blocking(|| std::thread::current().name().map(str::to_string))
                .await
                .unwrap()
        });
        assert!(name.unwrap().starts_with("netconf-io-"));

        group.shutdown_gracefully(Duration::from_secs(1));
        assert!(group.is_shutdown());
        assert!(matches!(
            group.spawn(async {}.boxed()),
            Err(TransportError::ExecutorShutdown)
        ));
    }

    #[test]
    fn test_guard_ignores_shutdown() {
        let group = Arc::new(EventLoopGroup::new(1, "guarded").unwrap());
        let guard = NoShutdownExecutor::new(group.clone());

        guard.shutdown();
        guard.shutdown();
        assert_eq!(guard.ignored_shutdowns(), 2);
        assert!(!guard.is_shutdown());

        let handle = guard.spawn(async {}.boxed()).unwrap();
        group.block_on(handle).unwrap();

        // The owner's path still works and is visible through the guard.
        group.shutdown();
        assert!(guard.is_shutdown());
        assert!(guard.spawn(async {}.boxed()).is_err());
    }

    #[tokio::test]
    async fn test_current_runtime_through_guard() {
        let runtime: Arc<dyn Executor> = Arc::new(CurrentRuntime::try_new().unwrap());
        let guard = NoShutdownExecutor::new(runtime.clone());
        guard.shutdown();

        let (tx, rx) = tokio::sync::oneshot::channel();
        guard
            .spawn(
                async move {
                    let _ = tx.send(42);
                }
                .boxed(),
            )
            .unwrap();
        assert_eq!(rx.await.unwrap(), 42);
        assert!(!runtime.is_shutdown());
    }

    #[test]
    fn test_current_runtime_outside_runtime() {
        assert!(CurrentRuntime::try_new().is_err());
    }
}
