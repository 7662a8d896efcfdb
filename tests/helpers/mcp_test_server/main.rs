//! MCP test server binary for integration tests
//!
//! A minimal calculator server speaking newline-delimited JSON-RPC over
//! stdin/stdout. Integration tests launch it through the stdio transport.
//!
//! # Handled Methods
//!
//! - `initialize` -- protocol version `2025-11-25`, `tools` capability.
//! - `notifications/initialized` -- swallowed.
//! - `tools/list` -- `Add`, `Subtract`, `AddMany`, `Echo`, filtered by the
//!   tools file when one is configured.
//! - `tools/call` -- runs the tool, or answers `-32602` for a name that is
//!   not currently offered.
//! - `ping` -- empty result.
//!
//! # Environment
//!
//! - `MCP_TEST_SERVER_TOOLS_FILE`: file with one tool name per line. It is
//!   re-read on every request, so tests can change the offered tools while
//!   the server is running.
//! - `MCP_TEST_SERVER_FAIL`: when set, exit with status 1 before reading
//!   anything.
//! - `MCP_TEST_SERVER_EXIT_FILE`: when this file exists as a request
//!   arrives, exit without answering.
//! - `MCP_TEST_SERVER_SILENT`: when set, read requests but never answer.
//! - `MCP_TEST_SERVER_PID_FILE`: write the process id here at startup.

use std::io::{self, BufRead, Write};

use serde_json::{json, Value};

const ALL_TOOLS: &[&str] = &["Add", "Subtract", "AddMany", "Echo"];

fn main() {
    if std::env::var_os("MCP_TEST_SERVER_FAIL").is_some() {
        eprintln!("mcp_test_server: failing on request");
        std::process::exit(1);
    }

    if let Some(path) = std::env::var_os("MCP_TEST_SERVER_PID_FILE") {
        if let Err(e) = std::fs::write(path, std::process::id().to_string()) {
            eprintln!("mcp_test_server: cannot write pid file: {}", e);
        }
    }
    let silent = std::env::var_os("MCP_TEST_SERVER_SILENT").is_some();
    let exit_file = std::env::var_os("MCP_TEST_SERVER_EXIT_FILE");

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let trimmed = line.trim();
        if trimmed.is_empty() || silent {
            continue;
        }
        if exit_file
            .as_ref()
            .is_some_and(|path| std::path::Path::new(path).exists())
        {
            eprintln!("mcp_test_server: exit file present; exiting");
            std::process::exit(0);
        }

        let request: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(_) => {
                if send(&mut out, &make_error(&Value::Null, -32700, "Parse error")).is_err() {
                    break;
                }
                continue;
            }
        };

        let method = request.get("method").and_then(Value::as_str).unwrap_or("");
        let Some(id) = request.get("id").cloned() else {
            // Notifications get no response.
            continue;
        };

        let response = match method {
            "initialize" => handle_initialize(&id),
            "tools/list" => handle_tools_list(&id),
            "tools/call" => handle_tools_call(&id, &request),
            "ping" => json!({ "jsonrpc": "2.0", "id": id, "result": {} }),
            _ => make_error(&id, -32601, &format!("Method not found: {}", method)),
        };

        if send(&mut out, &response).is_err() {
            break;
        }
    }
}

fn send(out: &mut impl Write, response: &Value) -> io::Result<()> {
    writeln!(out, "{}", response)?;
    out.flush()
}

/// Names of the tools currently offered.
fn offered_tools() -> Vec<String> {
    match std::env::var_os("MCP_TEST_SERVER_TOOLS_FILE") {
        Some(path) => std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect(),
        None => ALL_TOOLS.iter().map(|name| name.to_string()).collect(),
    }
}

fn handle_initialize(id: &Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "protocolVersion": "2025-11-25",
            "capabilities": { "tools": { "listChanged": true } },
            "serverInfo": { "name": "mcp-test-server", "version": "0.1.0" }
        }
    })
}

fn tool_definition(name: &str) -> Value {
    let number = json!({ "type": "number" });
    let (description, properties, required) = match name {
        "Add" => (
            "Add two numbers",
            json!({ "a": number, "b": number }),
            json!(["a", "b"]),
        ),
        "Subtract" => (
            "Subtract b from a",
            json!({ "a": number, "b": number }),
            json!(["a", "b"]),
        ),
        "AddMany" => (
            "Sum a list of numbers",
            json!({ "values": { "type": "array", "items": number } }),
            json!(["values"]),
        ),
        "Echo" => (
            "Echo a message",
            json!({ "message": { "type": "string" } }),
            json!(["message"]),
        ),
        _ => ("Custom tool", json!({}), json!([])),
    };
    json!({
        "name": name,
        "description": description,
        "inputSchema": {
            "type": "object",
            "properties": properties,
            "required": required
        }
    })
}

fn handle_tools_list(id: &Value) -> Value {
    let tools: Vec<Value> = offered_tools().iter().map(|n| tool_definition(n)).collect();
    json!({ "jsonrpc": "2.0", "id": id, "result": { "tools": tools } })
}

fn number(args: &Value, key: &str) -> Option<f64> {
    args.get(key).and_then(Value::as_f64)
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

fn handle_tools_call(id: &Value, request: &Value) -> Value {
    let params = request.get("params").unwrap_or(&Value::Null);
    let name = params.get("name").and_then(Value::as_str).unwrap_or("");
    let args = params.get("arguments").cloned().unwrap_or(Value::Null);

    if !offered_tools().iter().any(|t| t == name) {
        return make_error(id, -32602, &format!("Unknown tool: {}", name));
    }

    let text = match name {
        "Add" | "Subtract" => match (number(&args, "a"), number(&args, "b")) {
            (Some(a), Some(b)) if name == "Add" => format_number(a + b),
            (Some(a), Some(b)) => format_number(a - b),
            _ => return tool_error(id, "arguments a and b must be numbers"),
        },
        "AddMany" => {
            let values = args.get("values").and_then(Value::as_array);
            match values.map(|v| v.iter().map(Value::as_f64).collect::<Option<Vec<_>>>()) {
                Some(Some(values)) => format_number(values.iter().sum()),
                _ => return tool_error(id, "argument values must be a list of numbers"),
            }
        }
        "Echo" => args
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
        other => format!("{} called", other),
    };

    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": { "content": [{ "type": "text", "text": text }], "isError": false }
    })
}

fn tool_error(id: &Value, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": { "content": [{ "type": "text", "text": message }], "isError": true }
    })
}

fn make_error(id: &Value, code: i32, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
}
