//! Outbound sender.
//!
//! Every write to a connection goes through its guard. For requests the id
//! assignment, the frame write and the pending-table insert all happen under
//! that one guard, so a response can never be dispatched before its entry
//! exists and a failed write never leaves an entry behind.

use thiserror::Error;
use tokio::sync::oneshot;

use wsrpc_core::{ErrorCode, JSONRPC_VERSION, Message, MessageError, Response};

use crate::connection::{Connection, ConnectionInner, PendingRequest, ResponseCallback};
use crate::transport::TransportError;

/// Send errors.
#[derive(Error, Debug)]
pub enum SendError {
    /// Writing the frame failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The message could not be encoded.
    #[error("Encode error: {0}")]
    Encode(#[from] MessageError),

    /// Requests may only be sent to registered connections.
    #[error("Connection is not registered")]
    Unregistered,

    /// No connection is registered under the identifier.
    #[error("Client not found: {0}")]
    ClientNotFound(String),

    /// The connection is closed.
    #[error("Connection closed")]
    Closed,

    /// The connection closed before the response arrived.
    #[error("Request abandoned: connection closed before a response arrived")]
    Abandoned,

    /// An explicit request id is already awaiting a response.
    #[error("Request id already pending: {0}")]
    DuplicateId(String),

    /// The message does not have the shape this operation sends.
    #[error("Invalid message: {0}")]
    InvalidMessage(&'static str),
}

async fn write_frame(inner: &mut ConnectionInner, message: &Message) -> Result<(), SendError> {
    let text = message.encode()?;
    let sink = inner.sink.as_mut().ok_or(SendError::Closed)?;
    sink.send_text(text).await?;
    Ok(())
}

impl Connection {
    /// Send a request and record it as pending.
    ///
    /// A request without an id gets a freshly generated one. The callback
    /// runs on the dispatch engine once the matching response arrives, and
    /// never runs if the connection closes first.
    ///
    /// Returns the request id.
    ///
    /// # Errors
    ///
    /// Returns error if the connection is unregistered or closed, the message
    /// is not a request, its explicit id is already pending, or the write
    /// fails. Nothing is recorded on error.
    pub async fn send_request(
        &self,
        mut request: Message,
        callback: ResponseCallback,
    ) -> Result<String, SendError> {
        if request.method.is_none() {
            return Err(SendError::InvalidMessage("request has no method"));
        }
        if self.identifier().is_none() {
            return Err(SendError::Unregistered);
        }

        let mut inner = self.lock().await;
        let id = match &request.id {
            Some(id) if inner.pending.contains_key(id) => {
                return Err(SendError::DuplicateId(id.clone()));
            }
            Some(id) => id.clone(),
            None => {
                let id = Self::generate_request_id();
                request.id = Some(id.clone());
                id
            }
        };
        request.jsonrpc = JSONRPC_VERSION.to_string();

        write_frame(&mut inner, &request).await?;
        tracing::debug!(
            conn = self.seq(),
            id = %id,
            method = request.method.as_deref().unwrap_or_default(),
            "Request sent"
        );
        inner
            .pending
            .insert(id.clone(), PendingRequest { request, callback });
        Ok(id)
    }

    /// Send a request and wait for its response.
    ///
    /// Do not await this from a method handler on the same router: the
    /// response is delivered by the dispatch engine that is running the
    /// handler. Use [`Connection::send_request`] with a callback there.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Abandoned`] if the connection closes before the
    /// response arrives, or any error of [`Connection::send_request`].
    pub async fn call(
        &self,
        method: impl Into<String>,
        params: Option<serde_json::Value>,
    ) -> Result<Response, SendError> {
        let (tx, rx) = oneshot::channel();
        self.send_request(
            Message::request(method, params),
            Box::new(move |response| {
                // Receiver gone means the caller stopped waiting.
                let _ = tx.send(response);
                Ok(())
            }),
        )
        .await?;
        rx.await.map_err(|_| SendError::Abandoned)
    }

    /// Send a response.
    ///
    /// # Errors
    ///
    /// Returns error if the message has a method, or the write fails.
    pub async fn send_response(&self, mut response: Message) -> Result<(), SendError> {
        if response.method.is_some() {
            return Err(SendError::InvalidMessage("response has a method"));
        }
        response.jsonrpc = JSONRPC_VERSION.to_string();
        let mut inner = self.lock().await;
        write_frame(&mut inner, &response).await
    }

    /// Send a success response.
    ///
    /// # Errors
    ///
    /// Returns error if the write fails.
    pub async fn send_result(
        &self,
        id: Option<String>,
        result: serde_json::Value,
    ) -> Result<(), SendError> {
        self.send_response(Message::result(id, result)).await
    }

    /// Send an error response built from a catalog code.
    ///
    /// # Errors
    ///
    /// Returns error if the write fails.
    pub async fn send_error_response(
        &self,
        code: ErrorCode,
        data: Option<serde_json::Value>,
        id: Option<String>,
    ) -> Result<(), SendError> {
        self.send_response(Message::error(id, code.to_error(data)))
            .await
    }

    /// Send a notification. No response is expected and nothing is recorded.
    ///
    /// # Errors
    ///
    /// Returns error if the message is not a notification, or the write fails.
    pub async fn send_notification(&self, mut notification: Message) -> Result<(), SendError> {
        if notification.method.is_none() || notification.id.is_some() {
            return Err(SendError::InvalidMessage(
                "notification needs a method and no id",
            ));
        }
        notification.jsonrpc = JSONRPC_VERSION.to_string();
        let mut inner = self.lock().await;
        write_frame(&mut inner, &notification).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{failing_sink, memory_sink, registered};
    use std::collections::HashSet;
    use std::sync::Arc;
    use wsrpc_core::error_code::CLIENT_NOT_FOUND;

    fn noop() -> ResponseCallback {
        Box::new(|_| Ok(()))
    }

    #[tokio::test]
    async fn test_request_gets_id_and_is_recorded() {
        let (sink, mut frames) = memory_sink();
        let conn = registered(Box::new(sink), "c1");

        let mut request = Message::request("ping", None);
        request.jsonrpc = String::new();
        let id = conn.send_request(request, noop()).await.unwrap();

        let frame: serde_json::Value = serde_json::from_str(&frames.recv().await.unwrap()).unwrap();
        assert_eq!(frame["jsonrpc"], "2.0");
        assert_eq!(frame["method"], "ping");
        assert_eq!(frame["id"], id.as_str());
        assert_eq!(conn.pending_count().await, 1);
        assert!(conn.take_pending(&id).await.is_some());
    }

    #[tokio::test]
    async fn test_explicit_id_is_kept() {
        let (sink, _frames) = memory_sink();
        let conn = registered(Box::new(sink), "c1");

        let id = conn
            .send_request(Message::request("ping", None).with_id("fixed"), noop())
            .await
            .unwrap();
        assert_eq!(id, "fixed");

        let duplicate = conn
            .send_request(Message::request("ping", None).with_id("fixed"), noop())
            .await;
        assert!(matches!(duplicate, Err(SendError::DuplicateId(_))));
        assert_eq!(conn.pending_count().await, 1);
    }

    #[tokio::test]
    async fn test_unregistered_connection_rejects_requests() {
        let (sink, _frames) = memory_sink();
        let conn = Connection::new(1, Box::new(sink));
        let result = conn.send_request(Message::request("ping", None), noop()).await;
        assert!(matches!(result, Err(SendError::Unregistered)));
    }

    #[tokio::test]
    async fn test_failed_write_records_nothing() {
        let conn = registered(Box::new(failing_sink()), "c1");
        let result = conn.send_request(Message::request("ping", None), noop()).await;
        assert!(matches!(result, Err(SendError::Transport(_))));
        assert_eq!(conn.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_closed_connection_rejects_sends() {
        let (sink, _frames) = memory_sink();
        let conn = registered(Box::new(sink), "c1");
        conn.close().await;

        let result = conn.send_request(Message::request("ping", None), noop()).await;
        assert!(matches!(result, Err(SendError::Closed)));
        assert!(matches!(
            conn.send_result(Some("1".into()), serde_json::json!(1)).await,
            Err(SendError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_error_response_frame() {
        let (sink, mut frames) = memory_sink();
        let conn = Connection::new(1, Box::new(sink));
        conn.send_error_response(CLIENT_NOT_FOUND, Some(serde_json::json!("c9")), Some("3".into()))
            .await
            .unwrap();

        let frame: serde_json::Value = serde_json::from_str(&frames.recv().await.unwrap()).unwrap();
        assert_eq!(
            frame,
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": "3",
                "error": {"code": 3, "message": "Client not found", "data": "c9"}
            })
        );
    }

    #[tokio::test]
    async fn test_message_shape_checks() {
        let (sink, _frames) = memory_sink();
        let conn = registered(Box::new(sink), "c1");

        assert!(matches!(
            conn.send_request(Message::result(Some("1".into()), serde_json::json!(1)), noop())
                .await,
            Err(SendError::InvalidMessage(_))
        ));
        assert!(matches!(
            conn.send_response(Message::request("ping", None)).await,
            Err(SendError::InvalidMessage(_))
        ));
        assert!(matches!(
            conn.send_notification(Message::request("ping", None).with_id("1")).await,
            Err(SendError::InvalidMessage(_))
        ));
        conn.send_notification(Message::notification("tick", None))
            .await
            .unwrap();
        assert_eq!(conn.pending_count().await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_get_distinct_ids_and_whole_frames() {
        const N: usize = 64;
        let (sink, mut frames) = memory_sink();
        let conn = Arc::new(registered(Box::new(sink), "c1"));

        let mut tasks = Vec::new();
        for i in 0..N {
            let conn = conn.clone();
            tasks.push(tokio::spawn(async move {
                conn.send_request(
                    Message::request("work", Some(serde_json::json!({"n": i, "pad": "x".repeat(512)}))),
                    Box::new(|_| Ok(())),
                )
                .await
                .unwrap()
            }));
        }

        let mut ids = HashSet::new();
        for task in tasks {
            ids.insert(task.await.unwrap());
        }
        assert_eq!(ids.len(), N);
        assert_eq!(conn.pending_count().await, N);

        let mut seen = HashSet::new();
        for _ in 0..N {
            let frame: serde_json::Value =
                serde_json::from_str(&frames.recv().await.unwrap()).unwrap();
            seen.insert(frame["id"].as_str().unwrap().to_string());
        }
        assert_eq!(seen, ids);
    }
}
