//! Stdio JSON-RPC 2.0 server exposing the speak tools.
//!
//! The transport is the Model Context Protocol's stdio shape: one JSON-RPC
//! message per line on stdin, one response per line on stdout, logs on
//! stderr.  Stdout carries nothing but protocol frames.
//!
//! Supported methods: `initialize`, `tools/list`, `tools/call`, plus
//! `notifications/*` (accepted and ignored).  Tool results are always
//! text content — tool-level failures travel inside the text, never as
//! JSON-RPC errors.

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::speak::SpeakService;

const PROTOCOL_VERSION: &str = "2024-11-05";
const SERVER_NAME: &str = "Kokoro TTS";

const PARSE_ERROR: i64 = -32700;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct SpeakArgs {
    text: String,
    #[serde(default)]
    voice: Option<String>,
    #[serde(default)]
    speed: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ApprovalArgs {
    text: String,
}

fn default_status() -> String {
    "completed".to_string()
}

#[derive(Debug, Deserialize)]
struct AnnounceArgs {
    task_name: String,
    #[serde(default = "default_status")]
    status: String,
}

/// Serve requests from stdin until EOF.
pub async fn serve(service: SpeakService) -> anyhow::Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut lines = stdin.lines();

    tracing::info!("serving on stdio");
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        if let Some(response) = handle_line(&service, &line).await {
            let mut frame = serde_json::to_vec(&response)?;
            frame.push(b'\n');
            stdout.write_all(&frame).await?;
            stdout.flush().await?;
        }
    }
    tracing::info!("stdin closed, shutting down");
    Ok(())
}

/// Process one frame.  `None` means no response is owed (notification).
pub async fn handle_line(service: &SpeakService, line: &str) -> Option<Value> {
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(error = %e, "unparseable frame");
            return Some(error_response(Value::Null, PARSE_ERROR, "Parse error"));
        }
    };

    let id = request.id.clone();
    let is_notification = id.is_none() || request.method.starts_with("notifications/");

    let result = dispatch(service, &request).await;
    if is_notification {
        return None;
    }

    Some(match result {
        Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
        Err((code, message)) => error_response(id.unwrap_or(Value::Null), code, &message),
    })
}

async fn dispatch(service: &SpeakService, request: &Request) -> Result<Value, (i64, String)> {
    match request.method.as_str() {
        "initialize" => Ok(json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            },
        })),
        "tools/list" => Ok(json!({ "tools": tool_catalog() })),
        "tools/call" => {
            let params = request.params.clone().unwrap_or(Value::Null);
            let call: ToolCall = serde_json::from_value(params)
                .map_err(|e| (INVALID_PARAMS, format!("Invalid params: {}", e)))?;
            let text = call_tool(service, &call).await?;
            Ok(json!({ "content": [{ "type": "text", "text": text }] }))
        }
        method if method.starts_with("notifications/") => Ok(Value::Null),
        other => Err((METHOD_NOT_FOUND, format!("Method not found: {}", other))),
    }
}

async fn call_tool(service: &SpeakService, call: &ToolCall) -> Result<String, (i64, String)> {
    fn args<T: serde::de::DeserializeOwned>(arguments: &Value) -> Result<T, (i64, String)> {
        serde_json::from_value(arguments.clone())
            .map_err(|e| (INVALID_PARAMS, format!("Invalid params: {}", e)))
    }

    match call.name.as_str() {
        "speak" => {
            let a: SpeakArgs = args(&call.arguments)?;
            Ok(service.speak(&a.text, a.voice, a.speed).await)
        }
        "ask_approval" => {
            let a: ApprovalArgs = args(&call.arguments)?;
            Ok(service.ask_approval(&a.text).await)
        }
        "announce_task" => {
            let a: AnnounceArgs = args(&call.arguments)?;
            Ok(service.announce_task(&a.task_name, &a.status).await)
        }
        other => Err((INVALID_PARAMS, format!("Unknown tool: {}", other))),
    }
}

fn tool_catalog() -> Value {
    json!([
        {
            "name": "speak",
            "description": "Speak the given text aloud through the system audio device.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "text": { "type": "string", "description": "Text to speak." },
                    "voice": {
                        "type": "string",
                        "description": "Kokoro voice id (default af_heart)."
                    },
                    "speed": {
                        "type": "number",
                        "description": "Playback speed multiplier (default 1.0)."
                    },
                },
                "required": ["text"],
            },
        },
        {
            "name": "ask_approval",
            "description": "Speak an approval request for a pending action.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "text": { "type": "string", "description": "Action needing approval." },
                },
                "required": ["text"],
            },
        },
        {
            "name": "announce_task",
            "description": "Announce that a task changed status.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "task_name": { "type": "string", "description": "Task name." },
                    "status": {
                        "type": "string",
                        "description": "New status (default completed)."
                    },
                },
                "required": ["task_name"],
            },
        },
    ])
}

fn error_response(id: Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message },
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
