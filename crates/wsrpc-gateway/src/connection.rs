//! Connection state.
//!
//! A [`Connection`] is one live socket peer: its write half, the table of
//! requests it was sent and has not answered yet, and its registered
//! identifier. Write half and table sit behind one async mutex so a frame
//! write and the matching table insert happen in one critical section.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use tokio::sync::{Mutex, MutexGuard};

use wsrpc_core::{ClientId, Message, Response};

use crate::handler::HandlerError;
use crate::sender::SendError;
use crate::transport::FrameSink;

/// Callback invoked once with the response to a request this side sent.
pub type ResponseCallback = Box<dyn FnOnce(Response) -> Result<(), HandlerError> + Send>;

/// A request awaiting its response.
pub struct PendingRequest {
    /// The request as sent, id included.
    pub request: Message,
    /// Completion callback.
    pub callback: ResponseCallback,
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

pub(crate) struct ConnectionInner {
    /// `None` once the connection is closed.
    pub(crate) sink: Option<Box<dyn FrameSink>>,
    pub(crate) pending: HashMap<String, PendingRequest>,
}

/// One live socket peer.
pub struct Connection {
    seq: u64,
    identifier: RwLock<Option<ClientId>>,
    /// Set as soon as teardown begins, before the guard is taken.
    closed: AtomicBool,
    inner: Mutex<ConnectionInner>,
}

impl Connection {
    pub(crate) fn new(seq: u64, sink: Box<dyn FrameSink>) -> Self {
        Self {
            seq,
            identifier: RwLock::new(None),
            closed: AtomicBool::new(false),
            inner: Mutex::new(ConnectionInner {
                sink: Some(sink),
                pending: HashMap::new(),
            }),
        }
    }

    /// Process-local sequence number, for diagnostics.
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Identifier this connection is registered under, if any.
    #[must_use]
    pub fn identifier(&self) -> Option<ClientId> {
        self.identifier
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_identifier(&self, id: ClientId) {
        *self
            .identifier
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(id);
    }

    /// Drop the identifier if it is still `id`.
    pub(crate) fn clear_identifier(&self, id: &ClientId) {
        let mut identifier = self
            .identifier
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if identifier.as_ref() == Some(id) {
            *identifier = None;
        }
    }

    /// Generate a fresh request id.
    #[must_use]
    pub fn generate_request_id() -> String {
        wsrpc_core::new_request_id()
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, ConnectionInner> {
        self.inner.lock().await
    }

    /// Record a pending request.
    ///
    /// The sender inserts while still holding the guard it wrote the frame
    /// under; this entry point is for requests written by other means.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Closed`] once the connection is closed.
    pub async fn record_pending(
        &self,
        id: String,
        request: Message,
        callback: ResponseCallback,
    ) -> Result<(), SendError> {
        let mut inner = self.lock().await;
        if inner.sink.is_none() {
            return Err(SendError::Closed);
        }
        inner.pending.insert(id, PendingRequest { request, callback });
        Ok(())
    }

    /// Remove and return the pending entry for `id`.
    pub async fn take_pending(&self, id: &str) -> Option<PendingRequest> {
        self.lock().await.pending.remove(id)
    }

    /// Number of requests awaiting a response.
    pub async fn pending_count(&self) -> usize {
        self.lock().await.pending.len()
    }

    /// Whether teardown of the connection has begun.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the socket and abandon every pending request.
    ///
    /// Callbacks of abandoned requests are dropped without being invoked.
    /// Returns the number of abandoned requests.
    pub async fn close(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        let mut inner = self.lock().await;
        let abandoned = inner.pending.len();
        inner.pending.clear();
        if let Some(mut sink) = inner.sink.take() {
            if let Err(e) = sink.close().await {
                tracing::debug!(conn = self.seq, "Socket close failed: {}", e);
            }
        }
        abandoned
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("seq", &self.seq)
            .field("identifier", &self.identifier())
            .finish_non_exhaustive()
    }
}
