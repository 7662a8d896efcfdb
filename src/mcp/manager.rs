//! Connection table and connection manager
//!
//! [`ConnectionTable`] maps server ids to live [`Connection`]s. Each key
//! moves through `Absent -> Connecting -> Connected -> Absent`; a key that
//! fails to connect returns to `Absent`. All membership checks and
//! mutations happen under one table-wide lock that is never held across a
//! handshake:
//!
//! - The first caller to find a key absent claims it with a `Connecting`
//!   marker and runs the handshake outside the lock.
//! - Later callers for the same key wait for the marker to clear, then
//!   re-check. They never see a half-built connection and never start a
//!   second one.
//! - The marker is removed when the claim is dropped, so a cancelled or
//!   failed connect cannot leave a key stuck in `Connecting`.
//!
//! [`ConnectionManager`] layers descriptor lookup, transport creation,
//! retry, liveness probing and structured logging on top of the table.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::Span;

use crate::error::{ConductorError, Result};
use crate::mcp::config::{ServerDescriptor, TransportKind};
use crate::mcp::metrics;
use crate::mcp::retry::RetryPolicy;
use crate::mcp::session::{Connector, Session};
use crate::mcp::transport::factory::{PendingTransport, TransportFactory};
use crate::mcp::types::Implementation;

/// A live session with one server.
///
/// The table owns every `Connection`; callers hold an `Arc` only while an
/// operation on it is in flight.
pub struct Connection {
    server_id: String,
    session: Box<dyn Session>,
    server_info: Implementation,
    connected_at: DateTime<Utc>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("server_id", &self.server_id)
            .field("server_info", &self.server_info)
            .field("connected_at", &self.connected_at)
            .finish_non_exhaustive()
    }
}

impl Connection {
    fn new(server_id: &str, session: Box<dyn Session>) -> Self {
        let server_info = session.server_info();
        Self {
            server_id: server_id.to_string(),
            session,
            server_info,
            connected_at: Utc::now(),
        }
    }

    /// Id of the server this connection talks to.
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Identity the server reported during the handshake.
    pub fn server_info(&self) -> &Implementation {
        &self.server_info
    }

    /// When the handshake completed.
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Negotiated session.
    pub fn session(&self) -> &dyn Session {
        self.session.as_ref()
    }
}

enum Slot {
    Connecting {
        done: watch::Receiver<()>,
        epoch: u64,
    },
    Connected(Arc<Connection>),
}

#[derive(Default)]
struct TableState {
    slots: HashMap<String, Slot>,
    /// Bumped by [`ConnectionTable::drain`]; claims from an older epoch
    /// cannot insert.
    epoch: u64,
}

/// Thread-safe map from server id to live connection.
#[derive(Default)]
pub struct ConnectionTable {
    state: Mutex<TableState>,
}

/// Result of [`ConnectionTable::claim`].
enum Claim<'a> {
    /// Already connected.
    Connected(Arc<Connection>),
    /// Another caller is connecting; resolves when it finishes.
    Wait(watch::Receiver<()>),
    /// The caller must connect and then call [`ConnectingGuard::complete`].
    Owner(ConnectingGuard<'a>),
}

/// Exclusive right to connect one key.
struct ConnectingGuard<'a> {
    table: &'a ConnectionTable,
    id: String,
    epoch: u64,
    completed: bool,
    // Dropping the sender wakes every waiter.
    _done: watch::Sender<()>,
}

impl ConnectingGuard<'_> {
    /// Publish `conn`. Returns it back if the table was drained since the
    /// claim was taken.
    fn complete(mut self, conn: Arc<Connection>) -> std::result::Result<(), Arc<Connection>> {
        let mut state = self.table.lock();
        if state.epoch != self.epoch {
            return Err(conn);
        }
        state.slots.insert(self.id.clone(), Slot::Connected(conn));
        self.completed = true;
        Ok(())
    }
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        let mut state = self.table.lock();
        if matches!(
            state.slots.get(&self.id),
            Some(Slot::Connecting { epoch, .. }) if *epoch == self.epoch
        ) {
            state.slots.remove(&self.id);
        }
    }
}

impl ConnectionTable {
    fn lock(&self) -> std::sync::MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn claim(&self, id: &str) -> Claim<'_> {
        let mut state = self.lock();
        match state.slots.get(id) {
            Some(Slot::Connected(conn)) => Claim::Connected(Arc::clone(conn)),
            Some(Slot::Connecting { done, .. }) => Claim::Wait(done.clone()),
            None => {
                let (tx, rx) = watch::channel(());
                let epoch = state.epoch;
                state
                    .slots
                    .insert(id.to_string(), Slot::Connecting { done: rx, epoch });
                Claim::Owner(ConnectingGuard {
                    table: self,
                    id: id.to_string(),
                    epoch,
                    completed: false,
                    _done: tx,
                })
            }
        }
    }

    /// Live connection for `id`, if any.
    pub fn get(&self, id: &str) -> Option<Arc<Connection>> {
        match self.lock().slots.get(id) {
            Some(Slot::Connected(conn)) => Some(Arc::clone(conn)),
            _ => None,
        }
    }

    /// Whether a connect for `id` is in flight.
    pub fn is_connecting(&self, id: &str) -> bool {
        matches!(self.lock().slots.get(id), Some(Slot::Connecting { .. }))
    }

    /// Remove and return the live connection for `id`.
    pub fn remove(&self, id: &str) -> Option<Arc<Connection>> {
        let mut state = self.lock();
        if !matches!(state.slots.get(id), Some(Slot::Connected(_))) {
            return None;
        }
        match state.slots.remove(id) {
            Some(Slot::Connected(conn)) => Some(conn),
            _ => None,
        }
    }

    /// Remove `conn` if it is still the live entry for its server id.
    ///
    /// Returns `false` when the entry was already removed or replaced by a
    /// newer connection.
    pub fn remove_if_current(&self, conn: &Arc<Connection>) -> bool {
        let mut state = self.lock();
        let current = matches!(
            state.slots.get(conn.server_id()),
            Some(Slot::Connected(live)) if Arc::ptr_eq(live, conn)
        );
        if current {
            state.slots.remove(conn.server_id());
        }
        current
    }

    /// Remove every live connection and invalidate in-flight connects.
    pub fn drain(&self) -> Vec<Arc<Connection>> {
        let mut state = self.lock();
        state.epoch += 1;
        let ids: Vec<String> = state
            .slots
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Connected(_)))
            .map(|(id, _)| id.clone())
            .collect();
        let conns = ids
            .iter()
            .filter_map(|id| match state.slots.remove(id) {
                Some(Slot::Connected(conn)) => Some(conn),
                _ => None,
            })
            .collect();
        conns
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.lock()
            .slots
            .values()
            .filter(|slot| matches!(slot, Slot::Connected(_)))
            .count()
    }

    /// Whether no connection is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Connection state of one server, as reported by [`ConnectionManager::status`].
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// No live connection.
    Disconnected,
    /// A connect is in flight.
    Connecting,
    /// Connected since the given time to the given server implementation.
    Connected {
        /// Handshake completion time.
        since: DateTime<Utc>,
        /// Server-reported implementation name.
        server_name: String,
    },
}

/// Status row for one configured server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerStatus {
    /// Server id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Configured transport.
    pub transport: TransportKind,
    /// Whether the descriptor is enabled.
    pub enabled: bool,
    /// Current state.
    pub state: ConnectionState,
}

/// Owns the connection table and every connect/disconnect transition.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
/// use conductor::mcp::config::ServerDescriptor;
/// use conductor::mcp::manager::ConnectionManager;
/// use conductor::mcp::session::StdioConnector;
/// use conductor::mcp::types::Implementation;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let connector = StdioConnector::new(Implementation {
///     name: "conductor".into(),
///     version: "0.1.0".into(),
///     description: None,
/// });
/// let manager = ConnectionManager::new(
///     vec![ServerDescriptor::stdio("calc", "calc-server", vec![])],
///     Arc::new(connector),
/// );
/// manager.connect("calc", &CancellationToken::new()).await?;
/// manager.disconnect_all().await;
/// # Ok(())
/// # }
/// ```
pub struct ConnectionManager {
    descriptors: Vec<ServerDescriptor>,
    index: HashMap<String, usize>,
    factory: TransportFactory,
    connector: Arc<dyn Connector>,
    retry: RetryPolicy,
    table: ConnectionTable,
    span: Span,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("servers", &self.index.keys().collect::<Vec<_>>())
            .field("connected", &self.table.len())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Manager over `descriptors`, establishing sessions with `connector`.
    ///
    /// Uses the discovered workspace root, the default retry policy and no
    /// parent span; see the `with_*` builders.
    pub fn new(descriptors: Vec<ServerDescriptor>, connector: Arc<dyn Connector>) -> Self {
        let index = descriptors
            .iter()
            .enumerate()
            .map(|(i, d)| (d.id.clone(), i))
            .collect();
        Self {
            descriptors,
            index,
            factory: TransportFactory::discover(),
            connector,
            retry: RetryPolicy::default(),
            table: ConnectionTable::default(),
            span: Span::none(),
        }
    }

    /// Resolve relative command paths with `factory`.
    pub fn with_factory(mut self, factory: TransportFactory) -> Self {
        self.factory = factory;
        self
    }

    /// Back off between attempts according to `retry`.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Emit every log event as a child of `span`.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Configured descriptors in declaration order.
    pub fn descriptors(&self) -> &[ServerDescriptor] {
        &self.descriptors
    }

    /// Span log events are attached to.
    pub(crate) fn span(&self) -> &Span {
        &self.span
    }

    fn descriptor(&self, id: &str) -> Result<&ServerDescriptor> {
        let descriptor = self
            .index
            .get(id)
            .map(|&i| &self.descriptors[i])
            .ok_or_else(|| ConductorError::UnknownServer(id.to_string()))?;
        if !descriptor.enabled {
            return Err(ConductorError::ServerDisabled(id.to_string()).into());
        }
        Ok(descriptor)
    }

    /// Whether `id` has a live connection.
    pub fn is_connected(&self, id: &str) -> bool {
        self.table.get(id).is_some()
    }

    /// Ensure `id` is connected.
    ///
    /// Returns immediately if a connection is already live.
    ///
    /// # Errors
    ///
    /// - [`ConductorError::UnknownServer`] / [`ConductorError::ServerDisabled`]
    ///   before anything is attempted.
    /// - [`ConductorError::UnsupportedTransport`] /
    ///   [`ConductorError::InvalidDescriptor`] from the transport factory.
    /// - [`ConductorError::Cancelled`] if `cancel` fires.
    /// - [`ConductorError::ConnectExhausted`] once every attempt failed; the
    ///   last attempt's error is the root cause.
    pub async fn connect(&self, id: &str, cancel: &CancellationToken) -> Result<()> {
        self.connection(id, cancel).await.map(|_| ())
    }

    /// Live connection for `id`, connecting first if needed.
    pub async fn connection(&self, id: &str, cancel: &CancellationToken) -> Result<Arc<Connection>> {
        let descriptor = self.descriptor(id)?;

        loop {
            match self.table.claim(id) {
                Claim::Connected(conn) => return Ok(conn),
                Claim::Wait(mut done) => {
                    tracing::debug!(parent: &self.span, server = %id, "Waiting for in-flight connect");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(ConductorError::Cancelled.into()),
                        // Errors once the connecting caller drops its guard.
                        _ = done.changed() => {}
                    }
                }
                Claim::Owner(guard) => {
                    let conn = Arc::new(self.establish(descriptor, cancel).await?);
                    return match guard.complete(Arc::clone(&conn)) {
                        Ok(()) => {
                            tracing::info!(
                                parent: &self.span,
                                server = %id,
                                server_name = %conn.server_info().name,
                                server_version = %conn.server_info().version,
                                "Connected to MCP server"
                            );
                            Ok(conn)
                        }
                        Err(conn) => {
                            tracing::info!(
                                parent: &self.span,
                                server = %id,
                                "Connection completed after disconnect-all; discarding"
                            );
                            self.close(conn).await;
                            metrics::record_disconnected();
                            Err(ConductorError::Cancelled.into())
                        }
                    };
                }
            }
        }
    }

    async fn establish(
        &self,
        descriptor: &ServerDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Connection> {
        let id = descriptor.id.as_str();
        let pending = self.factory.create(descriptor)?;
        let timeout = descriptor.timeout();
        let started = Instant::now();

        tracing::info!(
            parent: &self.span,
            server = %id,
            transport = %descriptor.transport,
            max_retries = descriptor.max_retries,
            "Connecting to MCP server"
        );

        let outcome = self
            .retry
            .run(id, descriptor.max_retries, cancel, |attempt| {
                let pending = pending.clone();
                async move {
                    metrics::record_connect_attempt(id);
                    tracing::debug!(parent: &self.span, server = %id, attempt, "Connection attempt");
                    match tokio::time::timeout(timeout, self.attempt(id, pending, timeout)).await {
                        Ok(result) => result,
                        Err(_) => Err(ConductorError::ConnectTimeout {
                            server: id.to_string(),
                            timeout_secs: descriptor.timeout_seconds,
                        }
                        .into()),
                    }
                }
            })
            .await;

        match outcome {
            Ok(conn) => {
                metrics::record_connected(id, started.elapsed());
                Ok(conn)
            }
            Err(err) if matches!(
                err.downcast_ref::<ConductorError>(),
                Some(ConductorError::Cancelled)
            ) =>
            {
                tracing::info!(parent: &self.span, server = %id, "Connect cancelled");
                Err(err)
            }
            Err(err) => {
                metrics::record_connect_failure(id);
                let attempts = descriptor.max_retries.saturating_add(1);
                tracing::error!(
                    parent: &self.span,
                    server = %id,
                    attempts,
                    error = %err,
                    "Failed to connect to MCP server"
                );
                Err(err.context(ConductorError::ConnectExhausted {
                    server: id.to_string(),
                    attempts,
                }))
            }
        }
    }

    /// One handshake plus a `tools/list` liveness check.
    async fn attempt(
        &self,
        id: &str,
        pending: PendingTransport,
        timeout: std::time::Duration,
    ) -> Result<Connection> {
        let session = self.connector.handshake(pending, timeout).await?;
        match session.list_tools().await {
            Ok(tools) => {
                tracing::debug!(parent: &self.span, server = %id, tools = tools.len(), "Liveness check ok");
                Ok(Connection::new(id, session))
            }
            Err(err) => {
                if let Err(close_err) = session.close().await {
                    tracing::debug!(parent: &self.span, server = %id, error = %close_err, "Failed to close unchecked session");
                }
                Err(err)
            }
        }
    }

    async fn close(&self, conn: Arc<Connection>) {
        let id = conn.server_id().to_string();
        if let Err(err) = conn.session().close().await {
            tracing::warn!(parent: &self.span, server = %id, error = %err, "Error while disconnecting; ignored");
        }
    }

    /// Release the connection for `id`. Returns whether one was live.
    ///
    /// Never fails: release errors are logged and swallowed.
    pub async fn disconnect(&self, id: &str) -> bool {
        match self.table.remove(id) {
            Some(conn) => {
                self.close(conn).await;
                metrics::record_disconnected();
                tracing::info!(parent: &self.span, server = %id, "Disconnected from MCP server");
                true
            }
            None => {
                tracing::debug!(parent: &self.span, server = %id, "Disconnect ignored; not connected");
                false
            }
        }
    }

    /// Drop `conn` after its session failed at the transport level, so the
    /// next operation on the server connects afresh.
    ///
    /// Does nothing if `conn` is no longer the live entry. Returns whether
    /// it was evicted.
    pub async fn evict(&self, conn: &Arc<Connection>, cause: &anyhow::Error) -> bool {
        if !self.table.remove_if_current(conn) {
            return false;
        }
        tracing::warn!(
            parent: &self.span,
            server = %conn.server_id(),
            error = %cause,
            "MCP connection lost; evicting"
        );
        self.close(Arc::clone(conn)).await;
        metrics::record_disconnected();
        true
    }

    /// Release every connection concurrently.
    ///
    /// The table holds no live connection on return, whatever the individual
    /// close outcomes. Connects still in flight are discarded when they
    /// finish.
    pub async fn disconnect_all(&self) {
        let conns = self.table.drain();
        if conns.is_empty() {
            return;
        }
        let count = conns.len();
        futures::future::join_all(conns.into_iter().map(|conn| async move {
            self.close(conn).await;
            metrics::record_disconnected();
        }))
        .await;
        tracing::info!(parent: &self.span, count, "Disconnected all MCP servers");
    }

    /// Connect every enabled server concurrently.
    ///
    /// Returns one result per enabled server in declaration order; a failure
    /// on one server does not affect the others.
    pub async fn connect_all(&self, cancel: &CancellationToken) -> Vec<(String, Result<()>)> {
        let ids: Vec<&str> = self
            .descriptors
            .iter()
            .filter(|d| d.enabled)
            .map(|d| d.id.as_str())
            .collect();
        let results =
            futures::future::join_all(ids.iter().map(|id| self.connect(id, cancel))).await;
        ids.into_iter()
            .map(str::to_string)
            .zip(results)
            .collect()
    }

    /// Status of every configured server in declaration order.
    pub fn status(&self) -> Vec<ServerStatus> {
        self.descriptors
            .iter()
            .map(|d| {
                let state = match self.table.get(&d.id) {
                    Some(conn) => ConnectionState::Connected {
                        since: conn.connected_at(),
                        server_name: conn.server_info().name.clone(),
                    },
                    None if self.table.is_connecting(&d.id) => ConnectionState::Connecting,
                    None => ConnectionState::Disconnected,
                };
                ServerStatus {
                    id: d.id.clone(),
                    name: d.display_name().to_string(),
                    transport: d.transport,
                    enabled: d.enabled,
                    state,
                }
            })
            .collect()
    }
}
