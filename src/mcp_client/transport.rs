//! JSON-RPC over stdio transport.
//!
//! Line-delimited JSON-RPC 2.0 (one object per line). A background reader
//! task routes each response to its waiting caller by request `id`, so
//! concurrent calls may be answered in any order:
//! - Writes are serialised by an async mutex and bounded by the request
//!   deadline. A frame interrupted part-way closes the transport.
//! - Responses for unknown or abandoned ids are discarded.
//! - EOF fails every pending caller and closes the transport.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::types::{IncomingFrame, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::errors::ClientError;

/// Read half of a server connection.
pub type BoxedReader = Box<dyn AsyncBufRead + Send + Unpin>;
/// Write half of a server connection.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

type Waiter = oneshot::Sender<Result<JsonRpcResponse, ClientError>>;

// ─── Pending Table ───────────────────────────────────────────────────────────

#[derive(Default)]
struct PendingTable {
    waiters: HashMap<u64, Waiter>,
    /// Set once the connection is gone; later requests fail fast.
    closed: Option<String>,
}

#[derive(Clone)]
struct Shared {
    server: Arc<str>,
    table: Arc<Mutex<PendingTable>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PendingTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transport_error(&self, reason: impl Into<String>) -> ClientError {
        ClientError::Transport {
            server: self.server.to_string(),
            reason: reason.into(),
        }
    }

    /// Mark the connection closed and fail every waiter. Only the first
    /// reason is kept.
    fn fail_all(&self, reason: &str) {
        let drained: Vec<Waiter> = {
            let mut table = self.lock();
            if table.closed.is_none() {
                table.closed = Some(reason.to_string());
            }
            table.waiters.drain().map(|(_, tx)| tx).collect()
        };
        if !drained.is_empty() {
            tracing::warn!(
                server = %self.server,
                pending = drained.len(),
                reason,
                "failing in-flight requests"
            );
        }
        for tx in drained {
            let _ = tx.send(Err(self.transport_error(reason)));
        }
    }

    fn route(&self, response: JsonRpcResponse) {
        let id = response.id;
        let waiter = self.lock().waiters.remove(&id);
        match waiter {
            Some(tx) => {
                if tx.send(Ok(response)).is_err() {
                    tracing::debug!(server = %self.server, id, "caller went away, response dropped");
                }
            }
            None => {
                tracing::debug!(server = %self.server, id, "discarding response with unknown or abandoned id");
            }
        }
    }
}

/// Removes a pending entry when its caller stops waiting, for any reason.
struct PendingGuard {
    shared: Shared,
    id: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.shared.lock().waiters.remove(&self.id).is_some() {
            tracing::debug!(server = %self.shared.server, id = self.id, "request abandoned");
        }
    }
}

/// Holds the writer while one frame is in flight. Dropped before the frame
/// completes, it discards the writer and closes the transport: the server
/// has seen a partial line.
struct FrameWrite<'a> {
    slot: tokio::sync::MutexGuard<'a, Option<BoxedWriter>>,
    shared: &'a Shared,
    complete: bool,
}

impl Drop for FrameWrite<'_> {
    fn drop(&mut self) {
        if !self.complete {
            self.slot.take();
            self.shared
                .fail_all("write interrupted mid-frame, connection framing lost");
        }
    }
}

// ─── Transport ───────────────────────────────────────────────────────────────

/// Bi-directional JSON-RPC transport over one server connection.
pub struct StdioTransport {
    shared: Shared,
    next_id: AtomicU64,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

impl StdioTransport {
    /// Wrap a connection and start the reader task. Must be called inside a
    /// tokio runtime.
    pub fn new(server_name: &str, reader: BoxedReader, writer: BoxedWriter) -> Self {
        let shared = Shared {
            server: Arc::from(server_name),
            table: Arc::default(),
        };
        let reader_task = tokio::spawn(read_loop(shared.clone(), reader));
        Self {
            shared,
            next_id: AtomicU64::new(1),
            writer: tokio::sync::Mutex::new(Some(writer)),
            reader_task: Mutex::new(Some(reader_task)),
        }
    }

    pub fn server_name(&self) -> &str {
        &self.shared.server
    }

    /// Whether the connection has been lost or closed.
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed.is_some()
    }

    /// Why the connection closed, if it has.
    pub fn closed_reason(&self) -> Option<String> {
        self.shared.lock().closed.clone()
    }

    /// Send a request and wait up to `timeout` for its response. The
    /// deadline covers the write as well as the wait.
    ///
    /// Dropping the returned future abandons the request: its eventual
    /// response is discarded and nothing else blocks on it.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<serde_json::Value, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut table = self.shared.lock();
            if let Some(reason) = &table.closed {
                return Err(self.shared.transport_error(reason.clone()));
            }
            table.waiters.insert(id, tx);
        }
        let _guard = PendingGuard {
            shared: self.shared.clone(),
            id,
        };

        let deadline = tokio::time::Instant::now() + timeout;
        let frame = JsonRpcRequest::new(id, method, params);
        match tokio::time::timeout_at(deadline, self.write_frame(&frame)).await {
            Ok(written) => written?,
            // A stall mid-frame has already closed the transport; a stall
            // waiting for the writer has not.
            Err(_) => {
                return Err(match self.closed_reason() {
                    Some(reason) => self.shared.transport_error(reason),
                    None => self.timeout_error(method, timeout),
                })
            }
        }
        tracing::trace!(server = %self.shared.server, id, method, "request sent");

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(Ok(response))) => extract_result(&self.shared.server, method, response),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(self.shared.transport_error("connection dropped before response")),
            Err(_) => Err(self.timeout_error(method, timeout)),
        }
    }

    fn timeout_error(&self, method: &str, timeout: Duration) -> ClientError {
        ClientError::Timeout {
            server: self.shared.server.to_string(),
            method: method.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Send a notification (no response expected).
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), ClientError> {
        if let Some(reason) = self.closed_reason() {
            return Err(self.shared.transport_error(reason));
        }
        self.write_frame(&JsonRpcNotification::new(method, params)).await
    }

    /// Close the connection: fail pending callers, shut the write half, and
    /// stop the reader. Idempotent.
    pub async fn close(&self) {
        self.shared.fail_all("transport closed");
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        let task = self
            .reader_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }

    async fn write_frame<T: Serialize>(&self, frame: &T) -> Result<(), ClientError> {
        let mut line = serde_json::to_string(frame)
            .map_err(|e| self.shared.transport_error(format!("failed to serialize frame: {e}")))?;
        line.push('\n');

        let slot = self.writer.lock().await;
        if slot.is_none() {
            return Err(self.shared.transport_error("transport closed"));
        }
        let mut in_flight = FrameWrite {
            slot,
            shared: &self.shared,
            complete: false,
        };

        let written = match in_flight.slot.as_mut() {
            Some(writer) => match writer.write_all(line.as_bytes()).await {
                Ok(()) => writer.flush().await,
                Err(e) => Err(e),
            },
            None => Ok(()),
        };
        in_flight.complete = true;
        if let Err(e) = written {
            let reason = format!("failed to write to server stdin: {e}");
            in_flight.slot.take();
            drop(in_flight);
            self.shared.fail_all(&reason);
            return Err(self.shared.transport_error(reason));
        }
        Ok(())
    }

    #[cfg(test)]
    fn pending_count(&self) -> usize {
        self.shared.lock().waiters.len()
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        let task = self
            .reader_task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

async fn read_loop(shared: Shared, mut reader: BoxedReader) {
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                shared.fail_all("server stdout closed (process may have exited)");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                shared.fail_all(&format!("failed to read from server stdout: {e}"));
                return;
            }
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let frame: IncomingFrame = match serde_json::from_str(trimmed) {
            Ok(frame) => frame,
            Err(_) => {
                // Servers sometimes print log output on stdout.
                tracing::debug!(server = %shared.server, line = trimmed, "skipping non-JSON-RPC line");
                continue;
            }
        };
        let method = frame.method.clone();
        match frame.into_response() {
            Some(response) => shared.route(response),
            None => {
                tracing::debug!(
                    server = %shared.server,
                    method = method.as_deref().unwrap_or("<none>"),
                    "ignoring server-initiated message"
                );
            }
        }
    }
}

// ─── Response Helpers ────────────────────────────────────────────────────────

/// Extract the result from a response, converting error objects to
/// `ClientError::ServerError`.
pub fn extract_result(
    server: &str,
    method: &str,
    response: JsonRpcResponse,
) -> Result<serde_json::Value, ClientError> {
    if let Some(err) = response.error {
        return Err(ClientError::ServerError {
            server: server.to_string(),
            method: method.to_string(),
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }

    response.result.ok_or_else(|| ClientError::ServerError {
        server: server.to_string(),
        method: method.to_string(),
        code: super::types::error_codes::INTERNAL_ERROR,
        message: "response missing both result and error".into(),
        data: None,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
