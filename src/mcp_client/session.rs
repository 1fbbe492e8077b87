//! Server connections and the MCP session handshake.
//!
//! A [`Connector`] produces a raw [`Connection`] (spawned process or, in
//! tests, an in-memory pipe). [`Session::establish`] runs the `initialize`
//! handshake and paginated `tools/list` discovery over it.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use uuid::Uuid;

use super::transport::{BoxedReader, BoxedWriter, StdioTransport};
use super::types::{
    InitializeResult, ListToolsResult, ServerConfig, ServerInfo, ToolListing, PROTOCOL_VERSION,
};
use crate::errors::ClientError;

// ─── Connectors ──────────────────────────────────────────────────────────────

/// A freshly opened, not yet initialised server connection.
pub struct Connection {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
    /// The server process, when the connection owns one.
    pub process: Option<Child>,
}

/// Opens connections to one kind of server. Injected into the client so
/// tests can substitute an in-process server.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, server: &str) -> Result<Connection, ClientError>;
}

/// Spawns the server as a child process and talks over its stdio.
#[derive(Debug, Clone)]
pub struct ProcessConnector {
    config: ServerConfig,
}

impl ProcessConnector {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

#[async_trait]
impl Connector for ProcessConnector {
    async fn connect(&self, server: &str) -> Result<Connection, ClientError> {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args);
        for (key, value) in &self.config.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &self.config.cwd {
            cmd.current_dir(dir);
        }

        #[cfg(target_os = "windows")]
        {
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        cmd.stdin(std::process::Stdio::piped());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);

        let spawn_error = |reason: String| ClientError::Transport {
            server: server.to_string(),
            reason,
        };

        let mut child = cmd
            .spawn()
            .map_err(|e| spawn_error(format!("failed to spawn '{}': {e}", self.config.command)))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_error("failed to capture stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error("failed to capture stdout".into()))?;

        if let Some(stderr) = child.stderr.take() {
            let server = server.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(server = %server, line = %line, "server stderr");
                }
            });
        }

        tracing::debug!(
            server,
            command = %self.config.command,
            pid = ?child.id(),
            "spawned server process"
        );

        Ok(Connection {
            reader: Box::new(BufReader::new(stdout)),
            writer: Box::new(stdin),
            process: Some(child),
        })
    }
}

// ─── Session ─────────────────────────────────────────────────────────────────

/// One initialised connection. Owns its transport and process exclusively.
pub struct Session {
    id: Uuid,
    server: String,
    connected_at: DateTime<Utc>,
    transport: StdioTransport,
    process: tokio::sync::Mutex<Option<Child>>,
    server_info: ServerInfo,
    protocol_version: Option<String>,
}

impl Session {
    /// Handshake and discover tools, all within `init_timeout`. On failure
    /// the connection is torn down before the error is returned.
    pub async fn establish(
        server: &str,
        connection: Connection,
        init_timeout: Duration,
    ) -> Result<(Self, ToolListing), ClientError> {
        let Connection {
            reader,
            writer,
            mut process,
        } = connection;
        let transport = StdioTransport::new(server, reader, writer);

        let setup = async {
            let init = handshake(&transport, init_timeout).await?;
            let tools = discover(&transport, init_timeout).await?;
            Ok::<_, ClientError>((init, tools))
        };

        let outcome = match tokio::time::timeout(init_timeout, setup).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout {
                server: server.to_string(),
                method: "initialize".into(),
                timeout_ms: init_timeout.as_millis() as u64,
            }),
        };

        let (init, tools) = match outcome {
            Ok(ok) => ok,
            Err(e) => {
                tracing::warn!(server, error = %e, "session setup failed");
                transport.close().await;
                if let Some(child) = process.as_mut() {
                    let _ = child.kill().await;
                }
                return Err(e);
            }
        };

        let session = Self {
            id: Uuid::new_v4(),
            server: server.to_string(),
            connected_at: Utc::now(),
            transport,
            process: tokio::sync::Mutex::new(process),
            server_info: init.server_info.unwrap_or_default(),
            protocol_version: init.protocol_version,
        };
        tracing::info!(
            server,
            session = %session.id,
            server_name = session.server_info.name.as_deref().unwrap_or("unknown"),
            server_version = session.server_info.version.as_deref().unwrap_or("unknown"),
            tools = tools.len(),
            "session established"
        );
        Ok((session, tools))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    pub fn protocol_version(&self) -> Option<&str> {
        self.protocol_version.as_deref()
    }

    /// Whether the underlying connection has been lost or closed.
    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<serde_json::Value, ClientError> {
        self.transport.request(method, params, timeout).await
    }

    /// Close the transport, then give the process `timeout` to exit before
    /// killing it. Safe to call more than once.
    pub async fn shutdown(&self, timeout: Duration) {
        self.transport.close().await;

        let child = self.process.lock().await.take();
        if let Some(mut child) = child {
            match tokio::time::timeout(timeout, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!(server = %self.server, %status, "server process exited");
                }
                _ => {
                    tracing::warn!(server = %self.server, "server did not exit in time, killing");
                    let _ = child.kill().await;
                }
            }
        }
        tracing::debug!(server = %self.server, session = %self.id, "session shut down");
    }
}

async fn handshake(
    transport: &StdioTransport,
    timeout: Duration,
) -> Result<InitializeResult, ClientError> {
    let params = json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        },
    });
    let result = transport.request("initialize", Some(params), timeout).await?;
    let init: InitializeResult =
        serde_json::from_value(result).map_err(|e| ClientError::Transport {
            server: transport.server_name().to_string(),
            reason: format!("failed to parse initialize response: {e}"),
        })?;

    if let Some(version) = init.protocol_version.as_deref() {
        if version != PROTOCOL_VERSION {
            tracing::warn!(
                server = transport.server_name(),
                requested = PROTOCOL_VERSION,
                negotiated = version,
                "server negotiated a different protocol version"
            );
        }
    }

    transport.notify("notifications/initialized", None).await?;
    Ok(init)
}

/// Fetch every `tools/list` page. Entries are read one by one; a
/// malformed entry is listed as such and the rest still count.
async fn discover(
    transport: &StdioTransport,
    timeout: Duration,
) -> Result<ToolListing, ClientError> {
    let mut tools = ToolListing::default();
    let mut cursor: Option<String> = None;
    let mut seen = HashSet::new();

    loop {
        let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
        let result = transport.request("tools/list", params, timeout).await?;
        let page: ListToolsResult =
            serde_json::from_value(result).map_err(|e| ClientError::Transport {
                server: transport.server_name().to_string(),
                reason: format!("failed to parse tools/list response: {e}"),
            })?;
        for entry in page.tools {
            tools.push_entry(entry);
        }

        match page.next_cursor.filter(|c| !c.is_empty()) {
            Some(next) => {
                if !seen.insert(next.clone()) {
                    return Err(ClientError::Transport {
                        server: transport.server_name().to_string(),
                        reason: format!("tools/list repeated pagination cursor '{next}'"),
                    });
                }
                cursor = Some(next);
            }
            None => break,
        }
    }
    Ok(tools)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
