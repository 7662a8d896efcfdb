//! In-process transport pair for session tests
//!
//! [`FakeTransport::new`] returns the transport handed to the code under test
//! and a [`FakeTransportHandle`] that plays the server:
//!
//! ```text
//! transport.send() ---> handle.outbound_rx
//! handle.inbound_tx --> transport.receive()
//! ```
//!
//! [`FakeTransportHandle::serve`] turns the handle into a scripted server
//! that answers every request with whatever the responder returns.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::Stream;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};

use crate::error::{ConductorError, Result};
use crate::mcp::transport::Transport;

/// Channel-backed [`Transport`] with no process or socket behind it.
#[derive(Debug)]
pub struct FakeTransport {
    outbound_tx: mpsc::UnboundedSender<String>,
    inbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    closes: Arc<AtomicUsize>,
    fail_close: AtomicBool,
}

/// Server side of a [`FakeTransport`].
#[derive(Debug)]
pub struct FakeTransportHandle {
    /// Messages the client sent.
    pub outbound_rx: mpsc::UnboundedReceiver<String>,
    /// Messages the client will receive.
    pub inbound_tx: mpsc::UnboundedSender<String>,
    /// Number of times [`Transport::close`] ran on the paired transport.
    pub closes: Arc<AtomicUsize>,
}

impl FakeTransport {
    /// Create a connected transport/handle pair.
    pub fn new() -> (Self, FakeTransportHandle) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
        let closes = Arc::new(AtomicUsize::new(0));

        let transport = Self {
            outbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            closes: Arc::clone(&closes),
            fail_close: AtomicBool::new(false),
        };
        let handle = FakeTransportHandle {
            outbound_rx,
            inbound_tx,
            closes,
        };
        (transport, handle)
    }

    /// Make every subsequent [`Transport::close`] return an error.
    pub fn fail_on_close(&self) {
        self.fail_close.store(true, Ordering::SeqCst);
    }
}

impl FakeTransportHandle {
    /// Answer requests in the background until the client goes away.
    ///
    /// `respond` receives each request's method and params and returns either
    /// `Ok(result)` or `Err((code, message))`. Notifications are recorded in
    /// the returned list but never answered.
    pub fn serve<F>(self, respond: F) -> (tokio::task::JoinHandle<()>, Arc<Mutex<Vec<String>>>)
    where
        F: Fn(&str, &Value) -> std::result::Result<Value, (i64, String)> + Send + 'static,
    {
        let notifications = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&notifications);
        let FakeTransportHandle {
            mut outbound_rx,
            inbound_tx,
            ..
        } = self;

        let task = tokio::spawn(async move {
            while let Some(raw) = outbound_rx.recv().await {
                let Ok(msg) = serde_json::from_str::<Value>(&raw) else {
                    continue;
                };
                let method = msg["method"].as_str().unwrap_or_default().to_string();
                let id = match msg.get("id") {
                    Some(id) if !id.is_null() => id.clone(),
                    _ => {
                        seen.lock().await.push(method);
                        continue;
                    }
                };
                let params = msg.get("params").cloned().unwrap_or(Value::Null);
                let reply = match respond(&method, &params) {
                    Ok(result) => serde_json::json!({"jsonrpc": "2.0", "id": id, "result": result}),
                    Err((code, message)) => serde_json::json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": {"code": code, "message": message}
                    }),
                };
                if inbound_tx.send(reply.to_string()).is_err() {
                    break;
                }
            }
        });

        (task, notifications)
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn send(&self, message: String) -> Result<()> {
        self.outbound_tx.send(message).map_err(|_| {
            ConductorError::McpTransport("fake transport peer dropped".to_string()).into()
        })
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        let rx = Arc::clone(&self.inbound_rx);
        Box::pin(futures::stream::unfold(rx, |rx| async move {
            let mut guard = rx.lock().await;
            let item = guard.recv().await?;
            drop(guard);
            Some((item, rx))
        }))
    }

    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        Box::pin(futures::stream::empty())
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(ConductorError::McpTransport("fake close failure".to_string()).into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    #[tokio::test]
    async fn test_send_and_receive_cross_over() {
        let (transport, mut handle) = FakeTransport::new();

        transport.send("hello".to_string()).await.unwrap();
        assert_eq!(handle.outbound_rx.recv().await.unwrap(), "hello");

        handle.inbound_tx.send("world".to_string()).unwrap();
        let got = tokio::time::timeout(Duration::from_secs(2), transport.receive().next())
            .await
            .unwrap();
        assert_eq!(got.as_deref(), Some("world"));
    }

    #[tokio::test]
    async fn test_send_fails_after_handle_dropped() {
        let (transport, handle) = FakeTransport::new();
        drop(handle);
        assert!(transport.send("x".to_string()).await.is_err());
    }

    #[tokio::test]
    async fn test_close_counts_and_can_fail() {
        let (transport, handle) = FakeTransport::new();
        transport.close().await.unwrap();
        transport.fail_on_close();
        assert!(transport.close().await.is_err());
        assert_eq!(handle.closes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_serve_answers_requests_and_records_notifications() {
        let (transport, handle) = FakeTransport::new();
        let (_task, notifications) = handle.serve(|method, _| match method {
            "ping" => Ok(serde_json::json!({})),
            _ => Err((-32601, "nope".to_string())),
        });

        transport
            .send(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#.to_string())
            .await
            .unwrap();
        transport
            .send(r#"{"jsonrpc":"2.0","id":1,"method":"ping","params":{}}"#.to_string())
            .await
            .unwrap();
        transport
            .send(r#"{"jsonrpc":"2.0","id":2,"method":"other","params":{}}"#.to_string())
            .await
            .unwrap();

        let mut stream = transport.receive();
        let first: Value = serde_json::from_str(&stream.next().await.unwrap()).unwrap();
        let second: Value = serde_json::from_str(&stream.next().await.unwrap()).unwrap();
        assert_eq!(first["id"], 1);
        assert!(first.get("result").is_some());
        assert_eq!(second["error"]["code"], -32601);
        assert_eq!(
            *notifications.lock().await,
            vec!["notifications/initialized".to_string()]
        );
    }
}
