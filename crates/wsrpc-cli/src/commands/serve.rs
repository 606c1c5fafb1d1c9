//! Serve command - run the gateway with the built-in methods.

use std::sync::Arc;

use anyhow::Result;
use serde::Deserialize;
use serde_json::{Value, json};

use wsrpc_core::error_code::{CLIENT_NOT_FOUND, DUPLICATE_ENTRY, PARAMETER_NOT_FOUND};
use wsrpc_core::{Config, Message};
use wsrpc_gateway::{Connection, Gateway, GatewayBuilder, GatewayConfig, HandlerResult, Router};

use crate::ui;

/// Serve command arguments.
#[derive(Debug, Clone)]
pub struct ServeArgs {
    /// Loaded configuration.
    pub config: Config,
    /// Port override.
    pub port: Option<u16>,
    /// Bind address override.
    pub bind: Option<String>,
}

/// Run the serve command.
pub async fn run_serve(args: ServeArgs) -> Result<()> {
    let mut config = args.config;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(bind) = args.bind {
        config.server.bind_address = bind;
    }
    config.validate()?;

    let gateway = build_gateway(GatewayConfig::from(&config))?;

    ui::header("Starting wsrpc gateway");
    ui::kv(
        "Endpoint",
        &format!(
            "ws://{}:{}{}",
            config.server.bind_address, config.server.port, config.server.path
        ),
    );
    ui::kv("Queue capacity", &config.router.queue_capacity.to_string());
    ui::kv("Methods", "ping, echo, client.register, client.list, client.call");
    println!();

    gateway.run().await?;
    ui::info("Gateway stopped");
    Ok(())
}

/// Build a gateway with the built-in methods registered.
pub fn build_gateway(config: GatewayConfig) -> Result<Gateway> {
    let gateway = GatewayBuilder::new()
        .with_config(config)
        .with_handler("ping", ping)
        .with_handler("echo", echo)
        .with_handler("client.register", register)
        .with_handler("client.list", list)
        .with_handler("client.call", forward)
        .with_close_handler(|id, code, reason| {
            tracing::info!(client = %id, code, reason, "Client disconnected");
        })
        .build()?;
    Ok(gateway)
}

async fn ping(_router: Router, _conn: Arc<Connection>, _message: Message) -> HandlerResult {
    Ok(Some(json!("pong")))
}

async fn echo(_router: Router, _conn: Arc<Connection>, message: Message) -> HandlerResult {
    Ok(Some(message.params.unwrap_or(Value::Null)))
}

#[derive(Debug, Default, Deserialize)]
struct RegisterParams {
    id: Option<String>,
}

async fn register(router: Router, conn: Arc<Connection>, message: Message) -> HandlerResult {
    let params = message
        .params_as::<Option<RegisterParams>>()?
        .unwrap_or_default();
    let Some(id) = params.id.filter(|id| !id.is_empty()) else {
        conn.send_error_response(PARAMETER_NOT_FOUND, Some(json!("id")), message.id)
            .await?;
        return Ok(None);
    };

    if router
        .lookup(&id)
        .is_some_and(|bound| !Arc::ptr_eq(&bound, &conn))
    {
        conn.send_error_response(DUPLICATE_ENTRY, Some(json!(id)), message.id)
            .await?;
        return Ok(None);
    }

    if !router.register(id.as_str(), &conn) {
        // Closed while the request was queued; nobody to answer.
        return Ok(None);
    }
    Ok(Some(json!({ "id": id })))
}

async fn list(router: Router, _conn: Arc<Connection>, _message: Message) -> HandlerResult {
    Ok(Some(json!(router.clients())))
}

#[derive(Debug, Default, Deserialize)]
struct ForwardParams {
    target: Option<String>,
    method: Option<String>,
    params: Option<Value>,
}

/// Forward a request to another client and relay its answer to the caller.
async fn forward(router: Router, conn: Arc<Connection>, message: Message) -> HandlerResult {
    let params = message
        .params_as::<Option<ForwardParams>>()?
        .unwrap_or_default();
    let (Some(target), Some(method)) = (params.target, params.method) else {
        conn.send_error_response(PARAMETER_NOT_FOUND, Some(json!("target, method")), message.id)
            .await?;
        return Ok(None);
    };

    if router.lookup(&target).is_none() {
        conn.send_error_response(CLIENT_NOT_FOUND, Some(json!(target)), message.id)
            .await?;
        return Ok(None);
    }

    let caller_id = message.id;
    router
        .send_request(
            &target,
            Message::request(method, params.params),
            Box::new(move |response| {
                let Some(caller_id) = caller_id else {
                    return Ok(());
                };
                let reply = match response.outcome {
                    Ok(result) => Message::result(Some(caller_id), result),
                    Err(error) => Message::error(Some(caller_id), error),
                };
                tokio::spawn(async move {
                    if let Err(e) = conn.send_response(reply).await {
                        tracing::warn!(conn = conn.seq(), "Failed to relay response: {}", e);
                    }
                });
                Ok(())
            }),
        )
        .await?;

    // The caller is answered once the target responds.
    Ok(None)
}
