//! In-memory transport for unit tests.

use async_trait::async_trait;
use futures::channel::mpsc as stream_channel;
use tokio::sync::mpsc;

use wsrpc_core::ClientId;

use crate::connection::Connection;
use crate::transport::{Frame, FrameSink, TransportError};

/// Receiving end of a [`MemorySink`].
pub(crate) type FrameReceiver = mpsc::UnboundedReceiver<String>;

/// Sink that forwards every written frame to a channel.
pub(crate) struct MemorySink {
    tx: Option<mpsc::UnboundedSender<String>>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(text).map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        Ok(())
    }
}

pub(crate) fn memory_sink() -> (MemorySink, FrameReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MemorySink { tx: Some(tx) }, rx)
}

/// Sink whose every write fails.
pub(crate) struct FailingSink;

#[async_trait]
impl FrameSink for FailingSink {
    async fn send_text(&mut self, _text: String) -> Result<(), TransportError> {
        Err(TransportError::Send("broken pipe".to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

pub(crate) fn failing_sink() -> FailingSink {
    FailingSink
}

/// A connection that already carries an identifier, without a router.
pub(crate) fn registered(sink: Box<dyn FrameSink>, id: &str) -> Connection {
    let conn = Connection::new(1, sink);
    conn.set_identifier(ClientId::new(id));
    conn
}

type FrameItem = Result<Frame, TransportError>;

/// A hand-fed frame stream for the ingestion loop.
pub(crate) fn frame_source() -> (
    stream_channel::UnboundedSender<FrameItem>,
    stream_channel::UnboundedReceiver<FrameItem>,
) {
    stream_channel::unbounded()
}
