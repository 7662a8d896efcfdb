//! Transport-agnostic async JSON-RPC 2.0 client
//!
//! [`JsonRpcClient`] writes serialized requests to an outbound channel and
//! resolves them from an inbound channel serviced by [`start_read_loop`].
//! The transport bridge (see [`crate::mcp::session`]) is responsible for
//! moving strings between these channels and the wire.
//!
//! In-flight requests are tracked in a `pending` map keyed by request id;
//! each entry is a `oneshot::Sender` completed by the read loop. Cancelling
//! the loop's [`CancellationToken`] drops every pending sender so that
//! waiting callers fail instead of hanging. Once the loop has exited the
//! client is marked closed and every later request fails immediately.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{ConductorError, Result};
use crate::mcp::types::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, INTERNAL_ERROR, METHOD_NOT_FOUND, METHOD_PING,
};

/// Default timeout applied to every request when the caller does not specify one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type NotificationHandler = Box<dyn Fn(serde_json::Value) + Send + Sync + 'static>;

type PendingMap =
    HashMap<u64, oneshot::Sender<std::result::Result<serde_json::Value, JsonRpcError>>>;

/// Channel-backed JSON-RPC 2.0 client.
///
/// Cloning is cheap and yields a handle sharing the same id counter, pending
/// map and handlers, so one clone can be given to the read loop while
/// another issues requests.
///
/// # Examples
///
/// ```no_run
/// use tokio::sync::mpsc;
/// use tokio_util::sync::CancellationToken;
/// use conductor::mcp::client::{start_read_loop, JsonRpcClient};
///
/// #[tokio::main]
/// async fn main() {
///     let (out_tx, _out_rx) = mpsc::unbounded_channel::<String>();
///     let (_in_tx, in_rx) = mpsc::unbounded_channel::<String>();
///     let client = JsonRpcClient::new(out_tx);
///     let _handle = start_read_loop(in_rx, CancellationToken::new(), client.clone());
/// }
/// ```
#[derive(Clone)]
pub struct JsonRpcClient {
    next_id: Arc<AtomicU64>,
    pending: Arc<Mutex<PendingMap>>,
    outbound_tx: mpsc::UnboundedSender<String>,
    notification_handlers: Arc<StdMutex<HashMap<String, NotificationHandler>>>,
    /// Cancelled when the read loop exits.
    closed: CancellationToken,
}

impl std::fmt::Debug for JsonRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcClient")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl JsonRpcClient {
    /// Create a client writing to `outbound_tx`.
    pub fn new(outbound_tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            next_id: Arc::new(AtomicU64::new(1)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            outbound_tx,
            notification_handlers: Arc::new(StdMutex::new(HashMap::new())),
            closed: CancellationToken::new(),
        }
    }

    /// Whether the read loop has exited. A closed client never resolves
    /// another request.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    fn closed_error() -> anyhow::Error {
        ConductorError::McpTransport("read loop exited".to_string()).into()
    }

    /// Send a request and await its typed result.
    ///
    /// # Errors
    ///
    /// - [`ConductorError::McpTransport`] if the outbound channel is closed or
    ///   the read loop has exited (before or during the request).
    /// - [`ConductorError::RequestTimeout`] if no response arrives in time
    ///   (default [`DEFAULT_REQUEST_TIMEOUT`]).
    /// - [`ConductorError::Rpc`] if the server answers with an error object.
    /// - [`ConductorError::Serialization`] if (de)serialization fails.
    pub async fn request<P, R>(
        &self,
        method: &str,
        params: P,
        timeout: Option<Duration>,
    ) -> Result<R>
    where
        P: serde::Serialize + Send,
        R: serde::de::DeserializeOwned,
    {
        if self.is_closed() {
            return Err(Self::closed_error());
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        // Register before sending so a fast response cannot be missed.
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        // The loop may have exited and cleared `pending` before the insert.
        if self.is_closed() {
            self.pending.lock().await.remove(&id);
            return Err(Self::closed_error());
        }

        let message = serde_json::to_string(&JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(serde_json::json!(id)),
            method: method.to_string(),
            params: Some(serde_json::to_value(params).map_err(ConductorError::from)?),
        })
        .map_err(ConductorError::from)?;

        if self.outbound_tx.send(message).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(ConductorError::McpTransport("outbound channel closed".to_string()).into());
        }

        let deadline = timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        let outcome = match tokio::time::timeout(deadline, rx).await {
            Ok(outcome) => outcome,
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(ConductorError::RequestTimeout {
                    method: method.to_string(),
                }
                .into());
            }
        };

        let rpc_result = outcome.map_err(|_| {
            ConductorError::McpTransport("read loop exited before response arrived".to_string())
        })?;

        let value = rpc_result.map_err(|e| ConductorError::Rpc {
            code: e.code,
            message: e.message,
        })?;

        serde_json::from_value(value).map_err(|e| ConductorError::Serialization(e).into())
    }

    /// Send a notification (no response expected).
    ///
    /// # Errors
    ///
    /// Returns [`ConductorError::McpTransport`] if the outbound channel is closed.
    pub fn notify<P: serde::Serialize>(&self, method: &str, params: P) -> Result<()> {
        let message = serde_json::to_string(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": serde_json::to_value(params).map_err(ConductorError::from)?
        }))
        .map_err(ConductorError::from)?;

        self.outbound_tx
            .send(message)
            .map_err(|_| ConductorError::McpTransport("outbound channel closed".to_string()))?;

        Ok(())
    }

    /// Register a handler for a server notification. A second registration
    /// for the same method replaces the first.
    pub fn on_notification(
        &self,
        method: impl Into<String>,
        f: impl Fn(serde_json::Value) + Send + Sync + 'static,
    ) {
        self.notification_handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(method.into(), Box::new(f));
    }

    /// Number of requests still waiting for a response.
    #[cfg(test)]
    pub(crate) async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

/// Start the read loop as a background task.
///
/// Each inbound string is classified as a response (resolves the pending
/// request), a server-initiated request (answered: `ping` with an empty
/// result, anything else with `-32601`), or a notification (passed to the
/// registered handler, if any). The loop ends when `cancellation` fires or
/// the inbound channel closes; either way the client is marked closed and
/// all pending requests are failed.
pub fn start_read_loop(
    mut inbound_rx: mpsc::UnboundedReceiver<String>,
    cancellation: CancellationToken,
    client: JsonRpcClient,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                _ = cancellation.cancelled() => break,

                maybe_msg = inbound_rx.recv() => match maybe_msg {
                    Some(raw) => dispatch_message(&raw, &client).await,
                    None => break,
                },
            }
        }
        client.closed.cancel();
        client.pending.lock().await.clear();
        tracing::debug!("MCP read loop exited");
    })
}

async fn dispatch_message(raw: &str, client: &JsonRpcClient) {
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("MCP read loop: failed to parse inbound JSON: {e}");
            return;
        }
    };

    let has_id = value.get("id").is_some_and(|id| !id.is_null());
    let has_method = value.get("method").is_some();
    let is_response = value.get("result").is_some() || value.get("error").is_some();

    if has_id && is_response && !has_method {
        handle_response(value, client).await;
    } else if has_id && has_method {
        handle_server_request(value, client);
    } else if has_method {
        handle_notification(value, client);
    } else {
        tracing::debug!("MCP read loop: ignoring unclassifiable message");
    }
}

async fn handle_response(value: serde_json::Value, client: &JsonRpcClient) {
    let id_val = &value["id"];
    let Some(id) = id_val
        .as_u64()
        .or_else(|| id_val.as_str().and_then(|s| s.parse().ok()))
    else {
        tracing::warn!("MCP read loop: response has non-integer id: {id_val}");
        return;
    };

    let Some(tx) = client.pending.lock().await.remove(&id) else {
        tracing::debug!("MCP read loop: response for unknown id {id}; ignoring");
        return;
    };

    let outcome = match value.get("error") {
        Some(error_val) => Err(serde_json::from_value::<JsonRpcError>(error_val.clone())
            .unwrap_or_else(|_| JsonRpcError {
                code: INTERNAL_ERROR,
                message: format!("malformed error object: {error_val}"),
                data: None,
            })),
        None => Ok(value
            .get("result")
            .cloned()
            .unwrap_or(serde_json::Value::Null)),
    };

    // The caller may already have timed out.
    let _ = tx.send(outcome);
}

fn handle_server_request(value: serde_json::Value, client: &JsonRpcClient) {
    let method = value.get("method").and_then(|m| m.as_str()).unwrap_or("");
    let id = value.get("id").cloned();

    let response = if method == METHOD_PING {
        JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(serde_json::json!({})),
            error: None,
        }
    } else {
        tracing::debug!("MCP read loop: rejecting server request '{method}'");
        JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code: METHOD_NOT_FOUND,
                message: format!("Method not found: {method}"),
                data: None,
            }),
        }
    };

    if let Ok(serialized) = serde_json::to_string(&response) {
        let _ = client.outbound_tx.send(serialized);
    }
}

fn handle_notification(value: serde_json::Value, client: &JsonRpcClient) {
    let Some(method) = value.get("method").and_then(|m| m.as_str()) else {
        return;
    };
    let params = value
        .get("params")
        .cloned()
        .unwrap_or(serde_json::Value::Null);

    let handlers = client
        .notification_handlers
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    match handlers.get(method) {
        Some(handler) => handler(params),
        None => tracing::debug!("MCP read loop: no handler for notification '{method}'"),
    }
}
