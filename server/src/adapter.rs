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

//! Asynchronous SSH channel adapter
//!
//! Writes to an SSH channel complete asynchronously, and the SSH library
//! accepts only one outstanding write per channel. The adapter queues writes
//! in call order and feeds them to the channel one at a time from a single
//! writer task. Closing the adapter fails whatever is still queued, waits a
//! bounded time for the write in flight and releases the channel once.
//!
//! ```text
//! write() ──┐
//! write() ──┼─► commands ─► writer task ─► ChannelSink::write (one at a time)
//! close() ──┘                    │
//!                                └────────► ChannelSink::release (once)
//! ```

use crate::{ProxyError, ProxyResult};
use bytes::Bytes;
use futures::FutureExt;
use futures::future::BoxFuture;
use metrics::counter;
use netconfd_transport::Executor;
use russh::server::Handle;
use russh::{ChannelId, CryptoVec};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Default time `close` waits for the write in flight
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// How a channel ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelExit {
    /// Exit status reported to the client
    pub status: u32,
    /// Text written to the client's stderr before the exit status
    pub message: Option<String>,
}

impl ChannelExit {
    /// Orderly end of the channel
    pub fn success() -> Self {
        Self {
            status: 0,
            message: None,
        }
    }

    /// Failure with exit status 1 and a diagnostic
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: 1,
            message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 0
    }
}

/// The write side of an SSH channel
pub trait ChannelSink: Send + Sync + 'static {
    /// Issue one write; resolves when the SSH library has accepted it
    fn write(&self, data: Bytes) -> BoxFuture<'static, ProxyResult<()>>;

    /// Report the exit status and close the channel
    fn release(&self, exit: ChannelExit) -> BoxFuture<'static, ()>;
}

/// Channel sink backed by a russh server session handle
#[derive(Clone)]
pub struct RusshChannelSink {
    handle: Handle,
    channel: ChannelId,
}

impl RusshChannelSink {
    pub fn new(handle: Handle, channel: ChannelId) -> Self {
        Self { handle, channel }
    }
}

impl ChannelSink for RusshChannelSink {
    fn write(&self, data: Bytes) -> BoxFuture<'static, ProxyResult<()>> {
        let handle = self.handle.clone();
        let channel = self.channel;
        async move {
            // A rejected write hands the buffer back; that is a failure.
            handle
                .data(channel, CryptoVec::from_slice(&data))
                .await
                .map_err(|_| ProxyError::NotWritten)
        }
        .boxed()
    }

    fn release(&self, exit: ChannelExit) -> BoxFuture<'static, ()> {
        let handle = self.handle.clone();
        let channel = self.channel;
        async move {
            if let Some(message) = &exit.message {
                let text = format!("{}\n", message);
                let _ = handle
                    .extended_data(channel, 1, CryptoVec::from_slice(text.as_bytes()))
                    .await;
            }
            if handle
                .exit_status_request(channel, exit.status)
                .await
                .is_err()
            {
                debug!(channel = %channel, "Exit status not delivered");
            }
            let _ = handle.eof(channel).await;
            let _ = handle.close(channel).await;
        }
        .boxed()
    }
}

/// Completion of one queued write
///
/// Resolves with the sink's result, `ChannelClosed` if the write was never
/// issued, or `WriteAbandoned` if closing gave up waiting for it.
#[derive(Debug)]
pub struct WriteCompletion {
    receiver: oneshot::Receiver<ProxyResult<()>>,
}

impl Future for WriteCompletion {
    type Output = ProxyResult<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // Dropped unanswered: the writer task is gone.
            Poll::Ready(Err(_)) => Poll::Ready(Err(ProxyError::ChannelClosed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

enum AdapterCommand {
    Write {
        data: Bytes,
        done: oneshot::Sender<ProxyResult<()>>,
    },
    Close(ChannelExit),
}

struct PendingWrite {
    data: Bytes,
    done: oneshot::Sender<ProxyResult<()>>,
}

/// Serializing write adapter over an SSH channel
///
/// Cloning yields another handle to the same writer task.
#[derive(Clone)]
pub struct SshChannelAdapter {
    commands: mpsc::UnboundedSender<AdapterCommand>,
    released: CancellationToken,
}

impl SshChannelAdapter {
    /// Start the writer task for `sink` on `executor`
    pub fn spawn<K: ChannelSink>(
        sink: K,
        close_timeout: Duration,
        executor: &dyn Executor,
    ) -> ProxyResult<Self> {
        let (commands, receiver) = mpsc::unbounded_channel();
        let released = CancellationToken::new();
        let writer = ChannelWriter {
            sink,
            commands: receiver,
            queue: VecDeque::new(),
            close_timeout,
            released: released.clone(),
        };
        executor.spawn(writer.run().boxed())?;
        Ok(Self { commands, released })
    }

    /// Queue `data` behind every earlier write
    ///
    /// The returned completion always resolves, even if the adapter is
    /// closing or already closed.
    pub fn write(&self, data: Bytes) -> WriteCompletion {
        let (done, receiver) = oneshot::channel();
        if let Err(mpsc::error::SendError(command)) =
            self.commands.send(AdapterCommand::Write { data, done })
        {
            if let AdapterCommand::Write { done, .. } = command {
                let _ = done.send(Err(ProxyError::ChannelClosed));
            }
        }
        WriteCompletion { receiver }
    }

    /// Close with exit status 0
    pub async fn close(&self) {
        self.close_with(ChannelExit::success()).await
    }

    /// Close with `exit`; resolves once the channel has been released
    ///
    /// Only the first close's exit is reported.
    pub async fn close_with(&self, exit: ChannelExit) {
        let _ = self.commands.send(AdapterCommand::Close(exit));
        self.released.cancelled().await;
    }

    /// True once the channel has been released
    pub fn is_closed(&self) -> bool {
        self.released.is_cancelled()
    }
}

impl std::fmt::Debug for SshChannelAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshChannelAdapter")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Writer task state; nothing outside the task touches it
struct ChannelWriter<K> {
    sink: K,
    commands: mpsc::UnboundedReceiver<AdapterCommand>,
    queue: VecDeque<PendingWrite>,
    close_timeout: Duration,
    released: CancellationToken,
}

impl<K: ChannelSink> ChannelWriter<K> {
    async fn run(mut self) {
        let _release_guard = self.released.clone().drop_guard();
        let mut in_flight: Option<(BoxFuture<'static, ProxyResult<()>>, oneshot::Sender<_>)> =
            None;

        let exit = loop {
            if in_flight.is_none() {
                if let Some(next) = self.queue.pop_front() {
                    trace!(bytes = next.data.len(), "Issuing channel write");
                    in_flight = Some((self.sink.write(next.data), next.done));
                }
            }

            tokio::select! {
                biased;
                result = poll_in_flight(&mut in_flight) => {
                    if result.is_err() {
                        counter!("netconfd.ssh.writes.failed").increment(1);
                    }
                    if let Some((_, done)) = in_flight.take() {
                        let _ = done.send(result);
                    }
                }
                command = self.commands.recv() => match command {
                    Some(AdapterCommand::Write { data, done }) => {
                        self.queue.push_back(PendingWrite { data, done });
                    }
                    Some(AdapterCommand::Close(exit)) => break exit,
                    None => break ChannelExit::failure("channel adapter dropped"),
                },
            }
        };

        self.shutdown(in_flight, exit).await;
    }

    async fn shutdown(
        mut self,
        in_flight: Option<(BoxFuture<'static, ProxyResult<()>>, oneshot::Sender<ProxyResult<()>>)>,
        exit: ChannelExit,
    ) {
        debug!(status = exit.status, queued = self.queue.len(), "Closing SSH channel");

        for pending in self.queue.drain(..) {
            let _ = pending.done.send(Err(ProxyError::ChannelClosed));
        }

        if let Some((write, done)) = in_flight {
            let result = match tokio::time::timeout(self.close_timeout, write).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(timeout = ?self.close_timeout, "Abandoning in-flight channel write");
                    counter!("netconfd.ssh.writes.abandoned").increment(1);
                    Err(ProxyError::WriteAbandoned(self.close_timeout))
                }
            };
            let _ = done.send(result);
        }

        self.sink.release(exit).await;
        self.released.cancel();

        // Anything submitted while closing
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            if let AdapterCommand::Write { done, .. } = command {
                let _ = done.send(Err(ProxyError::ChannelClosed));
            }
        }
    }
}

async fn poll_in_flight(
    in_flight: &mut Option<(BoxFuture<'static, ProxyResult<()>>, oneshot::Sender<ProxyResult<()>>)>,
) -> ProxyResult<()> {
    match in_flight {
        Some((write, _)) => write.await,
        None => std::future::pending().await,
    }
}

/// Handler side of a channel's read path
#[derive(Debug, Clone)]
pub struct ChannelFeed {
    sender: mpsc::Sender<Bytes>,
}

/// Result of [`ChannelFeed::push`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    Queued,
    /// The reader is `capacity` buffers behind; the buffer was dropped
    Overflow,
    /// The reader is gone
    Closed,
}

impl ChannelFeed {
    /// Forward one SSH data buffer without waiting
    pub fn push(&self, data: Bytes) -> FeedStatus {
        match self.sender.try_send(data) {
            Ok(()) => FeedStatus::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => FeedStatus::Overflow,
            Err(mpsc::error::TrySendError::Closed(_)) => FeedStatus::Closed,
        }
    }
}

/// Buffers received on an SSH channel, in arrival order
///
/// Ends when every [`ChannelFeed`] is dropped (EOF, channel close or
/// connection loss).
#[derive(Debug)]
pub struct ChannelReader {
    receiver: mpsc::Receiver<Bytes>,
}

impl ChannelReader {
    /// Next buffer, or `None` at end of stream
    pub async fn read(&mut self) -> Option<Bytes> {
        self.receiver.recv().await
    }
}

/// Create a connected feed and reader
pub fn channel_pipe(capacity: usize) -> (ChannelFeed, ChannelReader) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (ChannelFeed { sender }, ChannelReader { receiver })
}
