//! Per-connection ingestion loop.
//!
//! Reads frames, decodes them, and queues them for the dispatch engine. The
//! loop never handles a message itself. It ends on the first close frame,
//! read error, end of stream or undecodable frame, and then tears the
//! connection down.

use std::sync::Arc;

use futures::{Stream, StreamExt};

use wsrpc_core::Message;
use wsrpc_core::error_code::PARSE_ERROR;

use crate::connection::Connection;
use crate::dispatch::Inbound;
use crate::router::Router;
use crate::transport::{CLOSE_ABNORMAL, Frame, TransportError};

/// Close code for a frame that is not valid JSON-RPC.
pub const CLOSE_INVALID_PAYLOAD: u16 = 1007;
/// Close code used when the dispatch engine has stopped.
pub const CLOSE_GOING_AWAY: u16 = 1001;

pub(crate) async fn run<S>(router: Router, connection: Arc<Connection>, mut frames: S)
where
    S: Stream<Item = Result<Frame, TransportError>> + Send + Unpin,
{
    let (code, reason) = loop {
        let bytes = match frames.next().await {
            Some(Ok(Frame::Text(text))) => text.into_bytes(),
            Some(Ok(Frame::Binary(bytes))) => bytes,
            Some(Ok(Frame::Control)) => continue,
            Some(Ok(Frame::Close { code, reason })) => break (code, reason),
            Some(Err(e)) => {
                tracing::warn!(conn = connection.seq(), "Read failed: {}", e);
                break (CLOSE_ABNORMAL, e.to_string());
            }
            None => break (CLOSE_ABNORMAL, "stream ended".to_string()),
        };

        let message = match Message::decode(&bytes) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(conn = connection.seq(), "Undecodable frame: {}", e);
                let data = serde_json::Value::String(e.to_string());
                if let Err(e) = connection
                    .send_error_response(PARSE_ERROR, Some(data), None)
                    .await
                {
                    tracing::debug!(conn = connection.seq(), "Failed to report parse error: {}", e);
                }
                break (CLOSE_INVALID_PAYLOAD, e.to_string());
            }
        };

        tracing::trace!(
            conn = connection.seq(),
            method = ?message.method,
            id = ?message.id,
            "Frame received"
        );

        let queued = router
            .enqueue(Inbound {
                connection: connection.clone(),
                message,
            })
            .await;
        if !queued {
            break (CLOSE_GOING_AWAY, "dispatch engine stopped".to_string());
        }
    };

    router.disconnect(&connection, code, &reason).await;
}
