//! MCP transport abstraction and implementations
//!
//! - [`stdio::StdioTransport`] spawns a child process and speaks
//!   newline-delimited JSON over its stdin/stdout.
//! - [`factory`] turns a server descriptor into an unstarted
//!   [`factory::PendingTransport`].
//! - `fake::FakeTransport` is an in-process pair used by tests.
//!
//! Callers `send` one serialized JSON-RPC message at a time and `receive` a
//! stream of inbound messages. Framing and process management belong to the
//! concrete implementation.

use std::pin::Pin;

use futures::Stream;

use crate::error::Result;

/// Abstraction over MCP transport implementations.
///
/// Used polymorphically through `Arc<dyn Transport>`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Send one complete JSON-RPC message.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ConductorError::McpTransport`] if the peer is
    /// gone.
    async fn send(&self, message: String) -> Result<()>;

    /// Stream of inbound messages; ends when the peer disconnects.
    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>>;

    /// Stream of diagnostic lines (child stderr). Never an error condition.
    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>>;

    /// Release the underlying resource (terminate the child process).
    ///
    /// Calling `close` more than once is allowed.
    async fn close(&self) -> Result<()>;
}

pub mod factory;
pub mod stdio;

#[cfg(test)]
pub mod fake;
