//! Frame transport.
//!
//! The router only sees [`Frame`]s coming in and text going out, so the
//! engine can run over an axum WebSocket or an in-memory pair alike.

use async_trait::async_trait;
use axum::extract::ws::{self, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, Stream, StreamExt};
use thiserror::Error;

/// Close code used when the socket ended without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Close code reported for a close frame without a status.
pub const CLOSE_NO_STATUS: u16 = 1005;

/// Transport errors.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// Writing a frame failed.
    #[error("Send error: {0}")]
    Send(String),

    /// Reading a frame failed.
    #[error("Receive error: {0}")]
    Receive(String),

    /// The socket is already closed.
    #[error("Connection closed")]
    Closed,
}

/// One inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Close frame.
    Close {
        /// Close status code.
        code: u16,
        /// Close reason.
        reason: String,
    },
    /// Ping/pong; answered by the WebSocket layer.
    Control,
}

/// Write half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Write one text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Close the write half.
    async fn close(&mut self) -> Result<(), TransportError>;
}

impl From<ws::Message> for Frame {
    fn from(message: ws::Message) -> Self {
        match message {
            ws::Message::Text(text) => Self::Text(text.as_str().to_owned()),
            ws::Message::Binary(bytes) => Self::Binary(bytes.to_vec()),
            ws::Message::Close(Some(frame)) => Self::Close {
                code: frame.code,
                reason: frame.reason.as_str().to_owned(),
            },
            ws::Message::Close(None) => Self::Close {
                code: CLOSE_NO_STATUS,
                reason: String::new(),
            },
            ws::Message::Ping(_) | ws::Message::Pong(_) => Self::Control,
        }
    }
}

/// Write half of an axum WebSocket.
pub struct WsSink(SplitSink<WebSocket, ws::Message>);

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.0
            .send(ws::Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.0
            .close()
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

/// Split an upgraded socket into a sink and a frame stream.
pub fn split_socket(
    socket: WebSocket,
) -> (
    WsSink,
    impl Stream<Item = Result<Frame, TransportError>> + Send + Unpin + 'static,
) {
    let (sink, stream): (SplitSink<WebSocket, ws::Message>, SplitStream<WebSocket>) =
        socket.split();
    let frames = stream.map(|message| {
        message
            .map(Frame::from)
            .map_err(|e| TransportError::Receive(e.to_string()))
    });
    (WsSink(sink), frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_from_ws_message() {
        assert_eq!(
            Frame::from(ws::Message::Text("{}".into())),
            Frame::Text("{}".to_string())
        );
        assert_eq!(
            Frame::from(ws::Message::Close(None)),
            Frame::Close {
                code: CLOSE_NO_STATUS,
                reason: String::new()
            }
        );
        assert_eq!(
            Frame::from(ws::Message::Close(Some(ws::CloseFrame {
                code: 4000,
                reason: "bye".into(),
            }))),
            Frame::Close {
                code: 4000,
                reason: "bye".to_string()
            }
        );
        assert_eq!(Frame::from(ws::Message::Ping(Vec::new().into())), Frame::Control);
    }
}
