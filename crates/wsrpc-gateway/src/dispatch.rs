//! Dispatch engine.
//!
//! One task drains the inbound queue fed by every connection's ingestion
//! loop. Messages are processed strictly one at a time, in queue order:
//! requests go to their method handler, responses to the completion callback
//! recorded when the matching request was sent. No failure ends the loop.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{mpsc, watch};

use wsrpc_core::error_code::{INTERNAL_ERROR, INVALID_REQUEST, METHOD_NOT_FOUND};
use wsrpc_core::{ErrorCode, Message, MessageKind};

use crate::connection::Connection;
use crate::router::Router;

/// A decoded message tagged with the connection it arrived on.
pub struct Inbound {
    /// Originating connection.
    pub connection: Arc<Connection>,
    /// The message.
    pub message: Message,
}

pub(crate) async fn run(
    router: Router,
    mut inbound: mpsc::Receiver<Inbound>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!("Dispatch engine started");
    if *shutdown.borrow_and_update() {
        return;
    }

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            next = inbound.recv() => match next {
                Some(message) => dispatch(&router, message).await,
                None => break,
            },
        }
    }

    tracing::info!("Dispatch engine stopped");
}

/// Route one inbound message.
pub(crate) async fn dispatch(router: &Router, inbound: Inbound) {
    let Inbound {
        connection,
        message,
    } = inbound;

    if !message.has_valid_version() {
        tracing::debug!(conn = connection.seq(), version = %message.jsonrpc, "Unsupported version");
        reply_error(&connection, INVALID_REQUEST, message.id).await;
        return;
    }

    match message.kind() {
        Some(MessageKind::Request | MessageKind::Notification) => {
            dispatch_request(router, connection, message).await;
        }
        Some(MessageKind::Response) => dispatch_response(&connection, message).await,
        None if message.result.is_some() || message.error.is_some() => {
            // An answer to something we could not identify; replying would
            // only produce another unidentifiable answer.
            tracing::debug!(conn = connection.seq(), error = ?message.error, "Dropping response without id");
        }
        None => {
            tracing::debug!(conn = connection.seq(), "Message has neither method nor id");
            reply_error(&connection, INVALID_REQUEST, None).await;
        }
    }
}

async fn dispatch_request(router: &Router, connection: Arc<Connection>, message: Message) {
    let method = message.method.clone().unwrap_or_default();
    let id = message.id.clone();

    let Some(handler) = router.handler(&method) else {
        tracing::debug!(conn = connection.seq(), method = %method, "Method not found");
        if id.is_some() {
            reply_error(&connection, METHOD_NOT_FOUND, id).await;
        }
        return;
    };

    tracing::debug!(conn = connection.seq(), method = %method, id = ?id, "Dispatching request");
    let call = {
        let router = router.clone();
        let connection = connection.clone();
        async move { handler(router, connection, message).await }
    };

    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(Ok(Some(result))) => match id {
            Some(id) => {
                if let Err(e) = connection.send_result(Some(id), result).await {
                    tracing::warn!(conn = connection.seq(), method = %method, "Failed to send result: {}", e);
                }
            }
            None => {
                tracing::debug!(method = %method, "Discarding result of notification");
            }
        },
        Ok(Ok(None)) => {}
        Ok(Err(e)) => {
            tracing::warn!(conn = connection.seq(), method = %method, "Handler failed: {}", e);
            if id.is_some() {
                reply_error(&connection, INTERNAL_ERROR, id).await;
            }
        }
        Err(_) => {
            tracing::error!(conn = connection.seq(), method = %method, "Handler panicked");
            if id.is_some() {
                reply_error(&connection, INTERNAL_ERROR, id).await;
            }
        }
    }
}

async fn dispatch_response(connection: &Arc<Connection>, message: Message) {
    let Some(id) = message.id.clone() else {
        return;
    };

    let Some(pending) = connection.take_pending(&id).await else {
        tracing::debug!(conn = connection.seq(), id = %id, "Response matches no pending request");
        reply_error(connection, INVALID_REQUEST, Some(id)).await;
        return;
    };

    let response = match message.into_response() {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(conn = connection.seq(), id = %id, "Malformed response: {}", e);
            reply_error(connection, INTERNAL_ERROR, Some(id)).await;
            return;
        }
    };

    let callback = pending.callback;
    match std::panic::catch_unwind(AssertUnwindSafe(move || callback(response))) {
        Ok(Ok(())) => {
            tracing::debug!(conn = connection.seq(), id = %id, "Response delivered");
        }
        Ok(Err(e)) => {
            tracing::warn!(conn = connection.seq(), id = %id, "Completion callback failed: {}", e);
            reply_error(connection, INTERNAL_ERROR, Some(id)).await;
        }
        Err(_) => {
            tracing::error!(conn = connection.seq(), id = %id, "Completion callback panicked");
            reply_error(connection, INTERNAL_ERROR, Some(id)).await;
        }
    }
}

async fn reply_error(connection: &Connection, code: ErrorCode, id: Option<String>) {
    if let Err(e) = connection.send_error_response(code, None, id).await {
        tracing::warn!(conn = connection.seq(), "Failed to send {}: {}", code, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ResponseCallback;
    use crate::handler::{HandlerError, HandlerResult};
    use crate::test_support::{memory_sink, registered, FrameReceiver};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn setup() -> (Router, Arc<Connection>, FrameReceiver) {
        let router = Router::default();
        let (sink, frames) = memory_sink();
        let conn = Arc::new(registered(Box::new(sink), "c1"));
        (router, conn, frames)
    }

    async fn deliver(router: &Router, conn: &Arc<Connection>, frame: &str) {
        let message = Message::decode(frame.as_bytes()).unwrap();
        dispatch(
            router,
            Inbound {
                connection: conn.clone(),
                message,
            },
        )
        .await;
    }

    async fn next_frame(frames: &mut FrameReceiver) -> Value {
        serde_json::from_str(&frames.recv().await.unwrap()).unwrap()
    }

    async fn add(_: Router, _: Arc<Connection>, message: Message) -> HandlerResult {
        let [a, b]: [i64; 2] = message.params_as()?;
        Ok(Some(json!(a + b)))
    }

    async fn typed(_: Router, _: Arc<Connection>, message: Message) -> HandlerResult {
        let n: u32 = message.params_as()?;
        Ok(Some(json!(n)))
    }

    async fn panicking(_: Router, _: Arc<Connection>, _: Message) -> HandlerResult {
        panic!("handler bug")
    }

    async fn manual(_: Router, conn: Arc<Connection>, message: Message) -> HandlerResult {
        conn.send_result(message.id.clone(), json!("manual")).await?;
        Ok(None)
    }

    #[tokio::test]
    async fn test_registered_method_gets_one_result() {
        let (router, conn, mut frames) = setup();
        router.register_handler("add", add);

        deliver(&router, &conn, r#"{"jsonrpc":"2.0","method":"add","id":"9","params":[2,3]}"#).await;

        assert_eq!(next_frame(&mut frames).await, json!({"jsonrpc": "2.0", "id": "9", "result": 5}));
        assert!(frames.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let (router, conn, mut frames) = setup();
        deliver(&router, &conn, r#"{"jsonrpc":"2.0","method":"unknown","id":"5"}"#).await;

        assert_eq!(
            next_frame(&mut frames).await,
            json!({"jsonrpc": "2.0", "id": "5", "error": {"code": -32601, "message": "Method not found"}})
        );
    }

    #[tokio::test]
    async fn test_unknown_notification_is_dropped() {
        let (router, conn, mut frames) = setup();
        deliver(&router, &conn, r#"{"jsonrpc":"2.0","method":"unknown"}"#).await;
        assert!(frames.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_error_response_without_id_is_not_answered() {
        let (router, conn, mut frames) = setup();
        deliver(
            &router,
            &conn,
            r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32700,"message":"Parse error"}}"#,
        )
        .await;
        deliver(&router, &conn, r#"{"jsonrpc":"2.0","result":1}"#).await;
        assert!(frames.try_recv().is_err());

        deliver(&router, &conn, r#"{"jsonrpc":"2.0"}"#).await;
        assert_eq!(next_frame(&mut frames).await["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn test_handler_error_becomes_internal_error() {
        let (router, conn, mut frames) = setup();
        router.register_handler("fail", |_, _, _| async { Err(HandlerError::failed("boom")) });
        router.register_handler("typed", typed);

        deliver(&router, &conn, r#"{"jsonrpc":"2.0","method":"fail","id":"1"}"#).await;
        let frame = next_frame(&mut frames).await;
        assert_eq!(frame["id"], "1");
        assert_eq!(frame["error"]["code"], -32603);
        assert!(frame.get("result").is_none());

        deliver(&router, &conn, r#"{"jsonrpc":"2.0","method":"typed","id":"2","params":"x"}"#).await;
        let frame = next_frame(&mut frames).await;
        assert_eq!(frame["id"], "2");
        assert_eq!(frame["error"]["code"], -32603);
    }

    #[tokio::test]
    async fn test_handler_panic_is_contained() {
        let (router, conn, mut frames) = setup();
        router.register_handler("panic", panicking);
        router.register_handler("ping", |_, _, _| async { Ok(Some(json!("pong"))) });

        deliver(&router, &conn, r#"{"jsonrpc":"2.0","method":"panic","id":"1"}"#).await;
        assert_eq!(next_frame(&mut frames).await["error"]["code"], -32603);

        deliver(&router, &conn, r#"{"jsonrpc":"2.0","method":"ping","id":"2"}"#).await;
        assert_eq!(next_frame(&mut frames).await["result"], "pong");
    }

    #[tokio::test]
    async fn test_notification_is_never_answered() {
        let (router, conn, mut frames) = setup();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        router.register_handler("tick", move |_, _, _| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Some(json!("ignored")))
            }
        });
        router.register_handler("fail", |_, _, _| async { Err(HandlerError::failed("boom")) });

        deliver(&router, &conn, r#"{"jsonrpc":"2.0","method":"tick"}"#).await;
        deliver(&router, &conn, r#"{"jsonrpc":"2.0","method":"fail"}"#).await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(frames.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_handler_can_reply_itself() {
        let (router, conn, mut frames) = setup();
        router.register_handler("manual", manual);

        deliver(&router, &conn, r#"{"jsonrpc":"2.0","method":"manual","id":"1"}"#).await;
        assert_eq!(next_frame(&mut frames).await["result"], "manual");
        assert!(frames.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_envelopes() {
        let (router, conn, mut frames) = setup();

        deliver(&router, &conn, r#"{"jsonrpc":"2.0","params":[]}"#).await;
        assert_eq!(
            next_frame(&mut frames).await,
            json!({"jsonrpc": "2.0", "id": null, "error": {"code": -32600, "message": "Invalid request"}})
        );

        deliver(&router, &conn, r#"{"jsonrpc":"1.0","method":"ping","id":"4"}"#).await;
        let frame = next_frame(&mut frames).await;
        assert_eq!(frame["id"], "4");
        assert_eq!(frame["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn test_unmatched_response_is_invalid_request() {
        let (router, conn, mut frames) = setup();
        deliver(&router, &conn, r#"{"jsonrpc":"2.0","id":"nobody-asked","result":1}"#).await;

        let frame = next_frame(&mut frames).await;
        assert_eq!(frame["id"], "nobody-asked");
        assert_eq!(frame["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn test_response_fires_callback_exactly_once() {
        let (router, conn, mut frames) = setup();
        let received: Arc<Mutex<Vec<wsrpc_core::Response>>> = Arc::default();
        let sink = received.clone();
        let callback: ResponseCallback = Box::new(move |response| {
            sink.lock().unwrap().push(response);
            Ok(())
        });

        let id = conn
            .send_request(Message::request("ping", None), callback)
            .await
            .unwrap();
        let _request = next_frame(&mut frames).await;

        let reply = format!(r#"{{"jsonrpc":"2.0","id":"{id}","result":"pong"}}"#);
        deliver(&router, &conn, &reply).await;
        assert!(frames.try_recv().is_err());

        // A duplicate must not reach the callback again.
        deliver(&router, &conn, &reply).await;
        assert_eq!(next_frame(&mut frames).await["error"]["code"], -32600);

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].id, id);
        assert_eq!(received[0].outcome, Ok(json!("pong")));
    }

    #[tokio::test]
    async fn test_error_response_reaches_callback() {
        let (router, conn, mut frames) = setup();
        let received: Arc<Mutex<Option<wsrpc_core::Response>>> = Arc::default();
        let slot = received.clone();

        let id = conn
            .send_request(
                Message::request("ping", None),
                Box::new(move |response| {
                    *slot.lock().unwrap() = Some(response);
                    Ok(())
                }),
            )
            .await
            .unwrap();
        let _request = next_frame(&mut frames).await;

        let reply = format!(
            r#"{{"jsonrpc":"2.0","id":"{id}","error":{{"code":-32601,"message":"Method not found"}}}}"#
        );
        deliver(&router, &conn, &reply).await;

        let response = received.lock().unwrap().clone().unwrap();
        assert!(response.outcome.unwrap_err().is(METHOD_NOT_FOUND));
    }

    #[tokio::test]
    async fn test_callback_failure_reported_to_peer() {
        let (router, conn, mut frames) = setup();
        let id = conn
            .send_request(
                Message::request("ping", None),
                Box::new(|_| Err(HandlerError::failed("rejected"))),
            )
            .await
            .unwrap();
        let _request = next_frame(&mut frames).await;

        deliver(&router, &conn, &format!(r#"{{"jsonrpc":"2.0","id":"{id}","result":1}}"#)).await;
        let frame = next_frame(&mut frames).await;
        assert_eq!(frame["id"], id.as_str());
        assert_eq!(frame["error"]["code"], -32603);
    }

    #[tokio::test]
    async fn test_response_without_outcome_is_internal_error() {
        let (router, conn, mut frames) = setup();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let id = conn
            .send_request(
                Message::request("ping", None),
                Box::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .await
            .unwrap();
        let _request = next_frame(&mut frames).await;

        deliver(&router, &conn, &format!(r#"{{"jsonrpc":"2.0","id":"{id}"}}"#)).await;
        assert_eq!(next_frame(&mut frames).await["error"]["code"], -32603);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(conn.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_engine_processes_queue_in_order() {
        let router = Router::default();
        let order: Arc<Mutex<Vec<i64>>> = Arc::default();
        let seen = order.clone();
        router.register_handler("record", move |_, _, message: Message| {
            let seen = seen.clone();
            async move {
                let n: i64 = message.params_as().map_err(HandlerError::from)?;
                // Yield so an overlapping dispatch would interleave.
                tokio::task::yield_now().await;
                seen.lock().unwrap().push(n);
                Ok::<_, HandlerError>(None)
            }
        });
        let engine = router.start().unwrap();

        let (sink, _frames) = memory_sink();
        let conn = Arc::new(registered(Box::new(sink), "c1"));
        for n in 0..50 {
            let message = Message::notification("record", Some(json!(n)));
            assert!(
                router
                    .enqueue(Inbound {
                        connection: conn.clone(),
                        message,
                    })
                    .await
            );
        }

        while order.lock().unwrap().len() < 50 {
            tokio::task::yield_now().await;
        }
        assert_eq!(*order.lock().unwrap(), (0..50).collect::<Vec<_>>());

        router.shutdown();
        engine.await.unwrap();
        assert!(
            !router
                .enqueue(Inbound {
                    connection: conn,
                    message: Message::notification("record", Some(json!(0))),
                })
                .await
        );
    }
}
