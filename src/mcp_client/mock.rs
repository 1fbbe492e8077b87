//! In-process MCP server for session and client tests.
//!
//! Speaks line-delimited JSON-RPC over a `tokio::io::duplex` pipe and
//! records what it receives. Tool names select behaviour:
//! - `crash`: the server drops the connection without answering.
//! - `slow`: answers after [`SLOW_DELAY`].
//! - `fail`: answers with a JSON-RPC error.
//! - anything else listed: echoes the arguments back as `{"echo": args}`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, WriteHalf};

use super::session::{Connection, Connector};
use crate::errors::ClientError;

pub(crate) const SLOW_DELAY: Duration = Duration::from_millis(300);

#[derive(Debug, Clone)]
pub(crate) struct MockOptions {
    pub tools: Vec<Value>,
    pub page_size: usize,
    pub init_delay: Duration,
    pub fail_initialize: bool,
}

impl Default for MockOptions {
    fn default() -> Self {
        Self {
            tools: sample_tools(),
            page_size: 2,
            init_delay: Duration::ZERO,
            fail_initialize: false,
        }
    }
}

/// Counters and logs shared between a connector and its servers.
#[derive(Debug, Default)]
pub(crate) struct MockStats {
    pub connects: AtomicUsize,
    pub handshakes: AtomicUsize,
    pub initialized_notes: AtomicUsize,
    pub list_pages: AtomicUsize,
    /// Every `tools/call` params object, in arrival order.
    pub calls: Mutex<Vec<Value>>,
}

impl MockStats {
    pub fn handshakes(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Value> {
        self.calls.lock().unwrap().clone()
    }
}

pub(crate) struct MockConnector {
    pub options: MockOptions,
    pub stats: Arc<MockStats>,
}

impl MockConnector {
    pub fn new(options: MockOptions) -> Self {
        Self {
            options,
            stats: Arc::default(),
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _server: &str) -> Result<Connection, ClientError> {
        self.stats.connects.fetch_add(1, Ordering::SeqCst);
        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(serve(server, self.options.clone(), self.stats.clone()));
        let (read, write) = tokio::io::split(client);
        Ok(Connection {
            reader: Box::new(BufReader::new(read)),
            writer: Box::new(write),
            process: None,
        })
    }
}

pub(crate) fn sample_tools() -> Vec<Value> {
    vec![
        json!({
            "name": "create_item",
            "description": "Create a work item",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "title": {"type": "string"},
                    "system.assignedTo": {"type": "string"}
                },
                "required": ["title"]
            }
        }),
        json!({
            "name": "echo",
            "inputSchema": {"type": "object", "properties": {"text": {"type": "string"}}}
        }),
        json!({
            "name": "linked",
            "inputSchema": {"type": "object", "properties": {"parent": {"$ref": "#/defs/item"}}}
        }),
        json!({"name": "slow", "inputSchema": {"type": "object"}}),
        json!({"name": "crash", "inputSchema": {"type": "object"}}),
        json!({"name": "fail", "inputSchema": {"type": "object"}}),
    ]
}

type Writer = Arc<tokio::sync::Mutex<WriteHalf<tokio::io::DuplexStream>>>;

async fn reply(writer: &Writer, frame: Value) {
    let mut line = frame.to_string();
    line.push('\n');
    let mut w = writer.lock().await;
    let _ = w.write_all(line.as_bytes()).await;
    let _ = w.flush().await;
}

async fn serve(stream: tokio::io::DuplexStream, options: MockOptions, stats: Arc<MockStats>) {
    let (read, write) = tokio::io::split(stream);
    let writer: Writer = Arc::new(tokio::sync::Mutex::new(write));
    let mut lines = BufReader::new(read).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(msg) = serde_json::from_str::<Value>(&line) else {
            continue;
        };
        let id = msg["id"].clone();
        let method = msg["method"].as_str().unwrap_or_default().to_string();
        match method.as_str() {
            "initialize" => {
                stats.handshakes.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(options.init_delay).await;
                if options.fail_initialize {
                    reply(&writer, json!({"jsonrpc": "2.0", "id": id, "error": {"code": -32603, "message": "boot failed"}})).await;
                } else {
                    reply(&writer, json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "result": {
                            "protocolVersion": "2024-11-05",
                            "capabilities": {"tools": {}},
                            "serverInfo": {"name": "mock", "version": "1.0.0"}
                        }
                    }))
                    .await;
                }
            }
            "notifications/initialized" => {
                stats.initialized_notes.fetch_add(1, Ordering::SeqCst);
            }
            "tools/list" => {
                stats.list_pages.fetch_add(1, Ordering::SeqCst);
                let start: usize = msg["params"]["cursor"]
                    .as_str()
                    .and_then(|c| c.parse().ok())
                    .unwrap_or(0);
                let end = (start + options.page_size).min(options.tools.len());
                let mut result = json!({"tools": options.tools[start..end].to_vec()});
                if end < options.tools.len() {
                    result["nextCursor"] = json!(end.to_string());
                }
                reply(&writer, json!({"jsonrpc": "2.0", "id": id, "result": result})).await;
            }
            "tools/call" => {
                let params = msg["params"].clone();
                stats.calls.lock().unwrap().push(params.clone());
                match params["name"].as_str().unwrap_or_default() {
                    "crash" => return,
                    "slow" => {
                        let writer = writer.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(SLOW_DELAY).await;
                            reply(&writer, json!({"jsonrpc": "2.0", "id": id, "result": {"slow": true}})).await;
                        });
                    }
                    "fail" => {
                        reply(&writer, json!({"jsonrpc": "2.0", "id": id, "error": {"code": -32000, "message": "tool blew up"}})).await;
                    }
                    _ => {
                        reply(&writer, json!({"jsonrpc": "2.0", "id": id, "result": {"echo": params["arguments"]}})).await;
                    }
                }
            }
            _ => {
                if !id.is_null() {
                    reply(&writer, json!({"jsonrpc": "2.0", "id": id, "error": {"code": -32601, "message": "Method not found"}})).await;
                }
            }
        }
    }
}
