//! Connection and invocation metrics
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! embedding process installs a recorder.
//!
//! # Metrics
//!
//! - `conductor_connect_attempts_total{server}`: every handshake attempt
//! - `conductor_connect_failures_total{server}`: connects that gave up
//! - `conductor_active_connections`: gauge of live table entries
//! - `conductor_connect_duration_seconds{server}`: successful connect latency
//! - `conductor_tool_calls_total{server,status}`: tool calls by outcome

use std::time::Duration;

use metrics::{decrement_gauge, histogram, increment_counter, increment_gauge};

/// Outcome label for `conductor_tool_calls_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    /// The server returned a result (possibly flagged `isError`).
    Ok,
    /// The tool does not exist on the server.
    UnknownTool,
    /// Any other failure.
    Error,
}

impl CallStatus {
    fn as_label(self) -> &'static str {
        match self {
            CallStatus::Ok => "ok",
            CallStatus::UnknownTool => "unknown_tool",
            CallStatus::Error => "error",
        }
    }
}

pub(crate) fn record_connect_attempt(server: &str) {
    increment_counter!("conductor_connect_attempts_total", "server" => server.to_string());
}

pub(crate) fn record_connect_failure(server: &str) {
    increment_counter!("conductor_connect_failures_total", "server" => server.to_string());
}

pub(crate) fn record_connected(server: &str, elapsed: Duration) {
    increment_gauge!("conductor_active_connections", 1.0);
    histogram!(
        "conductor_connect_duration_seconds",
        elapsed.as_secs_f64(),
        "server" => server.to_string()
    );
}

pub(crate) fn record_disconnected() {
    decrement_gauge!("conductor_active_connections", 1.0);
}

pub(crate) fn record_tool_call(server: &str, status: CallStatus) {
    increment_counter!(
        "conductor_tool_calls_total",
        "server" => server.to_string(),
        "status" => status.as_label()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_labels() {
        assert_eq!(CallStatus::Ok.as_label(), "ok");
        assert_eq!(CallStatus::UnknownTool.as_label(), "unknown_tool");
        assert_eq!(CallStatus::Error.as_label(), "error");
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_connect_attempt("calc");
        record_connect_failure("calc");
        record_connected("calc", Duration::from_millis(5));
        record_disconnected();
        record_tool_call("calc", CallStatus::Ok);
    }
}
