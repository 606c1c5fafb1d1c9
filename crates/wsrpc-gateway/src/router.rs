//! Connection registry and method-handler table.
//!
//! [`Router`] is a cheaply cloneable handle. It owns the identifier map, the
//! handler map, and the inbound queue consumed by the dispatch engine. There
//! are no process-wide tables: every router is independent.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use futures::Stream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use wsrpc_core::config::RouterConfig;
use wsrpc_core::{ClientId, Message, Response};

use crate::connection::{Connection, ResponseCallback};
use crate::dispatch::{self, Inbound};
use crate::events::{ConnectionEvent, EventBroadcaster, EventEnvelope};
use crate::handler::{self, BoxedHandler, HandlerResult};
use crate::ingest;
use crate::sender::SendError;
use crate::transport::{Frame, FrameSink, TransportError};
use crate::GatewayError;

/// Observer invoked when a registered connection closes:
/// `(identifier, close code, close reason)`.
pub type CloseHandler = Arc<dyn Fn(&ClientId, u16, &str) + Send + Sync>;

struct RouterInner {
    clients: RwLock<HashMap<ClientId, Arc<Connection>>>,
    handlers: RwLock<HashMap<String, BoxedHandler>>,
    on_close: RwLock<Option<CloseHandler>>,
    inbound_tx: mpsc::Sender<Inbound>,
    inbound_rx: Mutex<Option<mpsc::Receiver<Inbound>>>,
    shutdown: watch::Sender<bool>,
    events: EventBroadcaster,
    next_seq: AtomicU64,
}

/// Connection registry, handler table and dispatch engine owner.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

impl Router {
    /// Create a router with the given queue configuration.
    #[must_use]
    pub fn new(config: &RouterConfig) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(RouterInner {
                clients: RwLock::new(HashMap::new()),
                handlers: RwLock::new(HashMap::new()),
                on_close: RwLock::new(None),
                inbound_tx,
                inbound_rx: Mutex::new(Some(inbound_rx)),
                shutdown,
                events: EventBroadcaster::new(),
                next_seq: AtomicU64::new(1),
            }),
        }
    }

    /// Bind a method name to a handler. A second registration of the same
    /// name replaces the first.
    pub fn register_handler<F, Fut>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(Router, Arc<Connection>, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register_boxed_handler(method.into(), handler::boxed(handler));
    }

    pub(crate) fn register_boxed_handler(&self, method: String, handler: BoxedHandler) {
        let previous = self
            .inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(method.clone(), handler);
        if previous.is_some() {
            tracing::debug!("Handler for '{}' replaced", method);
        }
    }

    pub(crate) fn handler(&self, method: &str) -> Option<BoxedHandler> {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(method)
            .cloned()
    }

    /// Set the observer called when a registered connection closes.
    pub fn set_close_handler<F>(&self, handler: F)
    where
        F: Fn(&ClientId, u16, &str) + Send + Sync + 'static,
    {
        *self
            .inner
            .on_close
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(handler));
    }

    /// Bind `identifier` to `connection`, replacing any previous binding of
    /// that identifier. The displaced connection loses its identifier.
    ///
    /// Returns `false`, binding nothing, if the connection is already closed.
    pub fn register(&self, identifier: impl Into<ClientId>, connection: &Arc<Connection>) -> bool {
        let identifier = identifier.into();
        let mut clients = self
            .inner
            .clients
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if connection.is_closed() {
            tracing::debug!(
                conn = connection.seq(),
                client = %identifier,
                "Not registering closed connection"
            );
            return false;
        }

        if let Some(old) = connection.identifier() {
            if old != identifier
                && clients
                    .get(&old)
                    .is_some_and(|bound| Arc::ptr_eq(bound, connection))
            {
                clients.remove(&old);
            }
        }

        if let Some(displaced) = clients.insert(identifier.clone(), connection.clone()) {
            if !Arc::ptr_eq(&displaced, connection) {
                displaced.clear_identifier(&identifier);
                tracing::warn!(
                    client = %identifier,
                    "Identifier rebound from connection {} to {}",
                    displaced.seq(),
                    connection.seq()
                );
            }
        }
        connection.set_identifier(identifier.clone());
        drop(clients);

        tracing::info!(conn = connection.seq(), client = %identifier, "Client registered");
        self.inner.events.broadcast(ConnectionEvent::Registered {
            seq: connection.seq(),
            client_id: identifier.to_string(),
        });
        true
    }

    /// Find the connection registered under `identifier`.
    #[must_use]
    pub fn lookup(&self, identifier: &str) -> Option<Arc<Connection>> {
        self.inner
            .clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identifier)
            .cloned()
    }

    /// Remove the binding of `identifier` if it still points at `connection`.
    pub fn unregister(&self, identifier: &str, connection: &Arc<Connection>) -> bool {
        let mut clients = self
            .inner
            .clients
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if clients
            .get(identifier)
            .is_some_and(|bound| Arc::ptr_eq(bound, connection))
        {
            clients.remove(identifier);
            true
        } else {
            false
        }
    }

    /// Identifiers of all registered connections, sorted.
    #[must_use]
    pub fn clients(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self
            .inner
            .clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Subscribe to connection lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EventEnvelope> {
        self.inner.events.subscribe()
    }

    /// Spawn the dispatch engine.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::AlreadyStarted`] on a second call.
    pub fn start(&self) -> Result<JoinHandle<()>, GatewayError> {
        let inbound = self
            .inner
            .inbound_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(GatewayError::AlreadyStarted)?;
        let shutdown = self.inner.shutdown.subscribe();
        Ok(tokio::spawn(dispatch::run(self.clone(), inbound, shutdown)))
    }

    /// Stop the dispatch engine. Messages still queued are not processed.
    pub fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
    }

    /// Attach a new connection and start its ingestion loop.
    ///
    /// With an identifier the connection is registered before its first
    /// frame is read.
    pub fn attach<S>(
        &self,
        sink: Box<dyn FrameSink>,
        frames: S,
        identifier: Option<ClientId>,
    ) -> Arc<Connection>
    where
        S: Stream<Item = Result<Frame, TransportError>> + Send + Unpin + 'static,
    {
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let connection = Arc::new(Connection::new(seq, sink));
        tracing::info!(conn = seq, "Connection opened");
        self.inner.events.broadcast(ConnectionEvent::Connected { seq });

        if let Some(identifier) = identifier {
            self.register(identifier, &connection);
        }

        tokio::spawn(ingest::run(self.clone(), connection.clone(), frames));
        connection
    }

    /// Hand an inbound message to the dispatch engine, waiting for queue
    /// space. Returns `false` once the engine has stopped.
    pub(crate) async fn enqueue(&self, inbound: Inbound) -> bool {
        if *self.inner.shutdown.borrow() {
            return false;
        }
        self.inner.inbound_tx.send(inbound).await.is_ok()
    }

    /// Tear down a connection whose ingestion loop ended.
    pub(crate) async fn disconnect(&self, connection: &Arc<Connection>, code: u16, reason: &str) {
        let abandoned = connection.close().await;
        let identifier = self.purge(connection);

        if abandoned > 0 {
            tracing::warn!(
                conn = connection.seq(),
                "Abandoned {} pending request(s) on close",
                abandoned
            );
        }
        tracing::info!(conn = connection.seq(), code, reason, "Connection closed");

        if let Some(id) = &identifier {
            let on_close = self
                .inner
                .on_close
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(on_close) = on_close {
                on_close(id, code, reason);
            }
        }

        self.inner.events.broadcast(ConnectionEvent::Closed {
            seq: connection.seq(),
            client_id: identifier.map(|id| id.to_string()),
            code,
            reason: reason.to_string(),
            abandoned,
        });
    }

    /// Remove a closed connection's binding. Returns the identifier it was
    /// still bound under, if any.
    fn purge(&self, connection: &Arc<Connection>) -> Option<ClientId> {
        // Same lock as `register`, so a racing registration is either seen
        // here or refused there.
        let mut clients = self
            .inner
            .clients
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let identifier = connection.identifier()?;
        let bound = clients
            .get(&identifier)
            .is_some_and(|bound| Arc::ptr_eq(bound, connection));
        if bound {
            clients.remove(&identifier);
            Some(identifier)
        } else {
            None
        }
    }

    fn connection_for(&self, identifier: &str) -> Result<Arc<Connection>, SendError> {
        self.lookup(identifier)
            .ok_or_else(|| SendError::ClientNotFound(identifier.to_string()))
    }

    /// Send a request to the client registered under `identifier`.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::ClientNotFound`] if nobody is registered under
    /// the identifier, or any error of [`Connection::send_request`].
    pub async fn send_request(
        &self,
        identifier: &str,
        request: Message,
        callback: ResponseCallback,
    ) -> Result<String, SendError> {
        self.connection_for(identifier)?
            .send_request(request, callback)
            .await
    }

    /// Send a request to a registered client and wait for its response.
    ///
    /// # Errors
    ///
    /// See [`Connection::call`].
    pub async fn call(
        &self,
        identifier: &str,
        method: impl Into<String>,
        params: Option<serde_json::Value>,
    ) -> Result<Response, SendError> {
        self.connection_for(identifier)?.call(method, params).await
    }

    /// Send a notification to a registered client.
    ///
    /// # Errors
    ///
    /// See [`Connection::send_notification`].
    pub async fn notify(&self, identifier: &str, notification: Message) -> Result<(), SendError> {
        self.connection_for(identifier)?
            .send_notification(notification)
            .await
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new(&RouterConfig::default())
    }
}
