//! Method handlers.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use thiserror::Error;

use wsrpc_core::Message;

use crate::connection::Connection;
use crate::router::Router;
use crate::sender::SendError;

/// Handler errors. All of them reach the peer as `Internal error`.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// Params did not decode.
    #[error("Invalid params: {0}")]
    InvalidParams(#[from] serde_json::Error),

    /// A send issued by the handler failed.
    #[error("Send failed: {0}")]
    Send(#[from] SendError),

    /// Any other failure.
    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    /// Create a generic failure.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// `Some(result)` is sent back as the response; `None` sends nothing.
pub type HandlerResult = Result<Option<serde_json::Value>, HandlerError>;

/// Type-erased method handler.
pub type BoxedHandler =
    Arc<dyn Fn(Router, Arc<Connection>, Message) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Erase a handler function.
pub(crate) fn boxed<F, Fut>(handler: F) -> BoxedHandler
where
    F: Fn(Router, Arc<Connection>, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |router, connection, message| Box::pin(handler(router, connection, message)))
}
