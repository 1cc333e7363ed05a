//! Directory of currently-open client push channels, keyed by request id.
//!
//! The registry is the only state shared between the HTTP layer (which opens
//! connections) and every worker (which looks up, delivers, completes or
//! fails them). The backing map is concurrent with per-key atomicity: `open`
//! goes through the entry API, so two opens for the same id cannot both
//! succeed, and removal never interleaves with an insert for the same key.
//! Entries are independent bounded channels, so a slow client only ever
//! stalls its own worker's sends.
//!
//! An entry lives from `open` until the first of: terminal chunk delivered,
//! write failure, client disconnect, or the connection timeout armed at
//! `open`. All four paths converge on removing the map entry; `complete` and
//! `fail` on an already-removed id are no-ops.

use crate::server::telemetry::{
    decrement_streams_inflight, increment_chunks_delivered, increment_stream_errors,
    increment_streams_inflight,
};
use cascade_core::{ChatChunk, Error, RequestId, Result};
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};
use core::time::Duration;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::Stream;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Instant, Sleep, sleep_until};

type ConnectionMap = DashMap<RequestId, mpsc::Sender<ChatChunk>>;

pub struct ConnectionRegistry {
    connections: Arc<ConnectionMap>,
    buffer_size: usize,
    connection_timeout: Duration,
}

impl ConnectionRegistry {
    pub fn new(buffer_size: usize, connection_timeout: Duration) -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
            buffer_size,
            connection_timeout,
        }
    }

    /// Opens the push channel for `request_id`.
    ///
    /// At most one open connection exists per id: a second open while the
    /// first is live fails with [`Error::Conflict`] and leaves the original
    /// untouched. The returned [`Connection`] owns the receiving half and
    /// the registry entry; dropping it (client disconnect, timeout, stream
    /// end) removes the entry.
    pub fn open(&self, request_id: &RequestId) -> Result<Connection> {
        let (tx, rx) = mpsc::channel(self.buffer_size);

        let connection = match self.connections.entry(request_id.clone()) {
            Entry::Occupied(_) => {
                return Err(Error::Conflict {
                    request_id: request_id.clone(),
                });
            }
            Entry::Vacant(vacant) => {
                vacant.insert(tx);
                Connection {
                    timeout: sleep_until(Instant::now() + self.connection_timeout),
                    rx,
                    _guard: RemoveGuard {
                        connections: Arc::clone(&self.connections),
                        request_id: request_id.clone(),
                    },
                }
            }
        };

        increment_streams_inflight();
        tracing::info!("connection opened: {request_id}, {} now open", self.count());
        Ok(connection)
    }

    /// Non-blocking membership check; workers poll this while waiting for
    /// the client to subscribe.
    pub fn exists(&self, request_id: &RequestId) -> bool {
        self.connections.contains_key(request_id)
    }

    /// Delivers one chunk to the open connection for `request_id`.
    ///
    /// Returns `false` when no connection is open - nobody is listening, the
    /// caller decides whether to drop or escalate. A failed write means the
    /// receiving half is gone; the entry is removed and the failure
    /// propagates no further.
    pub async fn send(&self, request_id: &RequestId, chunk: ChatChunk) -> bool {
        let Some(tx) = self.sender_for(request_id) else {
            return false;
        };

        if tx.send(chunk).await.is_err() {
            tracing::warn!("push channel write failed, removing connection: {request_id}");
            self.remove(request_id);
            return false;
        }

        increment_chunks_delivered(1);
        true
    }

    /// Sends the terminal end-of-stream chunk if the connection is still
    /// open, then closes and removes it regardless of whether the send
    /// succeeded. A no-op once the entry is gone.
    pub async fn complete(&self, request_id: &RequestId) {
        let Some(tx) = self.sender_for(request_id) else {
            return;
        };

        let _ = tx.send(ChatChunk::end(request_id)).await;
        self.remove(request_id);
        tracing::info!("connection completed: {request_id}");
    }

    /// Sends a terminal error chunk if the connection is still open, then
    /// closes and removes it. A no-op once the entry is gone.
    pub async fn fail(&self, request_id: &RequestId, message: impl Into<String>) {
        let Some(tx) = self.sender_for(request_id) else {
            return;
        };

        let message = message.into();
        let _ = tx.send(ChatChunk::error(request_id, message.as_str())).await;
        self.remove(request_id);
        increment_stream_errors();
        tracing::warn!("connection failed: {request_id}: {message}");
    }

    /// Current number of open entries. Observability only.
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    // The clone drops the shard guard before any await point; senders must
    // never be held across the map's own locks.
    fn sender_for(&self, request_id: &RequestId) -> Option<mpsc::Sender<ChatChunk>> {
        self.connections
            .get(request_id)
            .map(|entry| entry.value().clone())
    }

    fn remove(&self, request_id: &RequestId) {
        self.connections.remove(request_id);
    }
}

struct RemoveGuard {
    connections: Arc<ConnectionMap>,
    request_id: RequestId,
}

impl Drop for RemoveGuard {
    fn drop(&mut self) {
        self.connections.remove(&self.request_id);
        decrement_streams_inflight();
    }
}

pin_project_lite::pin_project! {
    /// Live handle for one client's push channel.
    ///
    /// Yields chunks in delivery order and terminates when the pipeline
    /// closes the sending half or the connection timeout elapses. The
    /// registry entry is removed when this handle drops, so an abandoned
    /// response body cleans up the same way a completed one does.
    pub struct Connection {
        #[pin]
        timeout: Sleep,
        rx: mpsc::Receiver<ChatChunk>,
        _guard: RemoveGuard,
    }
}

impl Stream for Connection {
    type Item = ChatChunk;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<ChatChunk>> {
        let this = self.project();

        if this.timeout.poll(cx).is_ready() {
            // Deadline reached: refuse further writes and end the stream.
            this.rx.close();
            return Poll::Ready(None);
        }

        this.rx.poll_recv(cx)
    }
}
