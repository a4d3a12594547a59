//! Shared test utilities: a scripted in-process websocket server.
//!
//! Each accepted connection is handed to a test-supplied script together
//! with its zero-based connection index, so tests can behave differently
//! on reconnects.

#![allow(dead_code, clippy::panic)]

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use maas_ws_client::{ClientConfig, WsClient};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

/// Server side of one test connection.
pub type ServerSocket = WebSocketStream<TcpStream>;

/// In-process websocket server driven by a per-connection script.
#[derive(Debug)]
pub struct MockServer {
    /// Endpoint clients should dial.
    pub url: String,
    /// Number of TCP connections accepted so far.
    pub connections: Arc<AtomicUsize>,
}

impl MockServer {
    /// Binds an ephemeral port and serves every connection with `script`.
    pub async fn start<F, Fut>(script: F) -> Self
    where
        F: Fn(ServerSocket, usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Ok(listener) = TcpListener::bind("127.0.0.1:0").await else {
            panic!("cannot bind test listener");
        };
        let Ok(addr) = listener.local_addr() else {
            panic!("listener has no address");
        };
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&connections);

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let index = counter.fetch_add(1, Ordering::SeqCst);
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                tokio::spawn(script(ws, index));
            }
        });

        Self {
            url: format!("ws://{addr}/MAAS/ws"),
            connections,
        }
    }

    /// Client configuration pointing at this server.
    pub fn config(&self) -> ClientConfig {
        let Ok(config) = ClientConfig::for_url(&self.url) else {
            panic!("mock url is valid");
        };
        config.with_connect_timeout(Duration::from_secs(5))
    }

    /// A client for this server, already connected.
    pub async fn connected_client(&self) -> WsClient {
        let client = WsClient::new(self.config());
        if let Err(err) = client.connect().await {
            panic!("connect failed: {err}");
        }
        client
    }
}

/// Reads the next text frame as JSON. `None` once the client is gone.
pub async fn read_request(ws: &mut ServerSocket) -> Option<Value> {
    while let Some(Ok(msg)) = ws.next().await {
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).ok(),
            Message::Close(_) => return None,
            _ => {}
        }
    }
    None
}

/// Writes `frame` as a text message.
pub async fn send_json(ws: &mut ServerSocket, frame: Value) -> bool {
    ws.send(Message::text(frame.to_string())).await.is_ok()
}

/// Success RESPONSE frame for `id`.
pub fn response(id: &Value, result: Value) -> Value {
    json!({"id": id, "type": "response", "result": result})
}

/// Error RESPONSE frame for `id`.
pub fn error_response(id: &Value, error: Value) -> Value {
    json!({"id": id, "type": "response", "error": error})
}

/// NOTIFY frame.
pub fn notify(event: &str, payload: Value) -> Value {
    json!({"type": "notify", "event": event, "payload": payload})
}

/// Answers every request with `{"id", "method", "params"}` as its result.
pub async fn echo(mut ws: ServerSocket) {
    while let Some(request) = read_request(&mut ws).await {
        let id = request.get("id").cloned().unwrap_or(Value::Null);
        let result = json!({
            "id": id,
            "method": request.get("method").cloned().unwrap_or(Value::Null),
            "params": request.get("params").cloned().unwrap_or(Value::Null),
        });
        if !send_json(&mut ws, response(&id, result)).await {
            break;
        }
    }
}

/// Reads requests forever without answering any of them.
pub async fn silent(mut ws: ServerSocket) {
    while read_request(&mut ws).await.is_some() {}
}

/// Address nobody is listening on.
pub async fn dead_endpoint() -> String {
    let Ok(listener) = TcpListener::bind("127.0.0.1:0").await else {
        panic!("cannot bind probe listener");
    };
    let Ok(addr) = listener.local_addr() else {
        panic!("listener has no address");
    };
    drop(listener);
    format!("ws://{addr}/MAAS/ws")
}

/// Polls until the client reports `expected` pending requests.
pub async fn wait_for_pending(client: &WsClient, expected: usize) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if matches!(client.pending_count().await, Ok(n) if n == expected) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    if waited.is_err() {
        panic!("pending count never reached {expected}");
    }
}

/// Address that accepts TCP but never answers the websocket upgrade, so
/// clients stay in `Connecting` until they give up.
pub async fn stalled_endpoint() -> String {
    let Ok(listener) = TcpListener::bind("127.0.0.1:0").await else {
        panic!("cannot bind stalled listener");
    };
    let Ok(addr) = listener.local_addr() else {
        panic!("listener has no address");
    };
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    format!("ws://{addr}/MAAS/ws")
}

/// Server that upgrades exactly one connection, closes it, and then stops
/// listening so every later dial is refused.
pub async fn one_shot_endpoint() -> String {
    let Ok(listener) = TcpListener::bind("127.0.0.1:0").await else {
        panic!("cannot bind one-shot listener");
    };
    let Ok(addr) = listener.local_addr() else {
        panic!("listener has no address");
    };
    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        drop(listener);
        if let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await {
            let _ = ws.close(None).await;
        }
    });
    format!("ws://{addr}/MAAS/ws")
}
