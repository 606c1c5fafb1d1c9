//! Gateway server.
//!
//! Serves the WebSocket upgrade route and a health check, and hands every
//! upgraded socket to the [`Router`].

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router as HttpRouter,
    extract::{
        Query, State,
        ws::{WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use wsrpc_core::config::RouterConfig;
use wsrpc_core::{ClientId, Config, Message};

use crate::GatewayError;
use crate::connection::Connection;
use crate::handler::{self, BoxedHandler, HandlerResult};
use crate::router::{CloseHandler, Router};
use crate::transport::split_socket;

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Bind address.
    pub bind_address: String,
    /// Port to listen on.
    pub port: u16,
    /// Path of the WebSocket upgrade route.
    pub path: String,
    /// Capacity of the inbound queue.
    pub queue_capacity: usize,
}

impl GatewayConfig {
    /// Socket address to listen on.
    ///
    /// # Errors
    ///
    /// Returns error if the bind address and port do not form an address.
    pub fn socket_addr(&self) -> Result<SocketAddr, GatewayError> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .map_err(|e| GatewayError::Config(format!("Invalid address: {e}")))
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for GatewayConfig {
    fn from(config: &Config) -> Self {
        Self {
            bind_address: config.server.bind_address.clone(),
            port: config.server.port,
            path: config.server.path.clone(),
            queue_capacity: config.router.queue_capacity,
        }
    }
}

/// Gateway server.
pub struct Gateway {
    config: GatewayConfig,
    router: Router,
}

/// Builder for constructing a Gateway with its handlers.
pub struct GatewayBuilder {
    config: GatewayConfig,
    handlers: Vec<(String, BoxedHandler)>,
    on_close: Option<CloseHandler>,
}

impl GatewayBuilder {
    /// Create a new builder with default config.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: GatewayConfig::default(),
            handlers: Vec::new(),
            on_close: None,
        }
    }

    /// Set gateway configuration.
    #[must_use]
    pub fn with_config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a method handler.
    #[must_use]
    pub fn with_handler<F, Fut>(mut self, method: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Router, Arc<Connection>, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.handlers.push((method.into(), handler::boxed(handler)));
        self
    }

    /// Set the observer called when a registered connection closes.
    #[must_use]
    pub fn with_close_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ClientId, u16, &str) + Send + Sync + 'static,
    {
        self.on_close = Some(Arc::new(handler));
        self
    }

    /// Build the gateway.
    ///
    /// # Errors
    ///
    /// Returns error if the upgrade path or queue capacity is invalid.
    pub fn build(self) -> Result<Gateway, GatewayError> {
        if !self.config.path.starts_with('/') {
            return Err(GatewayError::Config(format!(
                "Path must start with '/': {}",
                self.config.path
            )));
        }
        if self.config.queue_capacity == 0 {
            return Err(GatewayError::Config(
                "Queue capacity must be at least 1".to_string(),
            ));
        }

        let router = Router::new(&RouterConfig {
            queue_capacity: self.config.queue_capacity,
        });
        for (method, handler) in self.handlers {
            router.register_boxed_handler(method, handler);
        }
        if let Some(on_close) = self.on_close {
            router.set_close_handler(move |id, code, reason| on_close(id, code, reason));
        }

        Ok(Gateway {
            config: self.config,
            router,
        })
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Gateway {
    /// Create a gateway with no handlers.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid.
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        GatewayBuilder::new().with_config(config).build()
    }

    /// Gateway configuration.
    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// The router behind this gateway.
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Build the HTTP routes.
    pub fn app(&self) -> HttpRouter {
        HttpRouter::new()
            .route("/health", get(health_handler))
            .route(&self.config.path, get(ws_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.router.clone())
    }

    /// Bind the configured address and serve until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns error if the address is invalid, binding fails, or the server
    /// fails.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<(), GatewayError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.config.socket_addr()?;
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve until the process is interrupted.
    ///
    /// # Errors
    ///
    /// See [`Gateway::run_until`].
    pub async fn run(&self) -> Result<(), GatewayError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for interrupt: {}", e);
            }
        })
        .await
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    ///
    /// Starts the dispatch engine first and stops it once the listener is
    /// closed.
    ///
    /// # Errors
    ///
    /// Returns error if the engine was already started or the server fails.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<(), GatewayError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let engine = self.router.start()?;

        match listener.local_addr() {
            Ok(addr) => tracing::info!("Gateway listening on ws://{}{}", addr, self.config.path),
            Err(e) => tracing::warn!("Listener has no local address: {}", e),
        }

        let served = axum::serve(listener, self.app())
            .with_graceful_shutdown(shutdown)
            .await;

        tracing::info!("Gateway shutting down");
        self.router.shutdown();
        engine
            .await
            .map_err(|e| GatewayError::Server(format!("Dispatch engine panic: {e}")))?;
        served.map_err(|e| GatewayError::Server(e.to_string()))
    }
}

async fn health_handler() -> &'static str {
    "OK"
}

/// WebSocket query parameters.
#[derive(Debug, Deserialize)]
struct WsParams {
    /// Identifier to register the connection under.
    client_id: Option<String>,
}

async fn ws_handler(
    State(router): State<Router>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, router, params.client_id))
}

async fn handle_socket(socket: WebSocket, router: Router, client_id: Option<String>) {
    let (sink, frames) = split_socket(socket);
    router.attach(Box::new(sink), frames, client_id.map(ClientId::from));
}
