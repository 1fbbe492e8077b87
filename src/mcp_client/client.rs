//! Tool clients: the lifecycle state machine over one server session, and
//! the multi-server host built on top of it.
//!
//! A [`ToolClient`] connects lazily: nothing is spawned until the first
//! operation that needs the server. Concurrent first callers share a single
//! connection attempt and all observe its outcome.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use uuid::Uuid;

use super::cache::ToolCache;
use super::session::{Connector, ProcessConnector, Session};
use super::types::ToolDescriptor;
use crate::codegen::{generate_wrapper, CallingConvention, GeneratedWrapper, TestParameterSet};
use crate::config::ClientConfig;
use crate::errors::{ClientError, ErrorKind};
use crate::schema::validate::validate_arguments;
use crate::schema::NormalizationTable;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Default handshake + discovery deadline (ms).
pub const DEFAULT_INIT_TIMEOUT_MS: u64 = 30_000;

/// Default tool call timeout (ms).
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;

/// Default grace period for a server to exit on close (ms).
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 5_000;

// ─── Options ─────────────────────────────────────────────────────────────────

/// Per-client settings.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub init_timeout: Duration,
    pub call_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub normalization: Arc<NormalizationTable>,
    pub calling_convention: CallingConvention,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            init_timeout: Duration::from_millis(DEFAULT_INIT_TIMEOUT_MS),
            call_timeout: Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS),
            shutdown_timeout: Duration::from_millis(DEFAULT_SHUTDOWN_TIMEOUT_MS),
            normalization: Arc::new(NormalizationTable::standard()),
            calling_convention: CallingConvention::default(),
        }
    }
}

// ─── State ───────────────────────────────────────────────────────────────────

/// Lifecycle of a [`ToolClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Uninitialized,
    Connecting,
    Ready,
    Closing,
    Closed,
    Errored,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClientState::Uninitialized => "uninitialized",
            ClientState::Connecting => "connecting",
            ClientState::Ready => "ready",
            ClientState::Closing => "closing",
            ClientState::Closed => "closed",
            ClientState::Errored => "errored",
        };
        f.write_str(s)
    }
}

struct Inner {
    state: ClientState,
    session: Option<Arc<Session>>,
    cache: Arc<ToolCache>,
    last_error: Option<ClientError>,
}

// ─── ToolClient ──────────────────────────────────────────────────────────────

/// Lazily connected client for one tool server.
pub struct ToolClient {
    server: String,
    connector: Arc<dyn Connector>,
    options: ClientOptions,
    /// Serialises connect, close and reconnect.
    connect_gate: tokio::sync::Mutex<()>,
    inner: RwLock<Inner>,
}

impl ToolClient {
    /// Create a client. No connection is opened until it is needed.
    pub fn new(server: &str, connector: Arc<dyn Connector>, options: ClientOptions) -> Self {
        Self {
            server: server.to_string(),
            connector,
            options,
            connect_gate: tokio::sync::Mutex::new(()),
            inner: RwLock::new(Inner {
                state: ClientState::Uninitialized,
                session: None,
                cache: Arc::new(ToolCache::empty()),
                last_error: None,
            }),
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn state(&self) -> ClientState {
        self.read().state
    }

    /// Id of the live session, if any.
    pub fn session_id(&self) -> Option<Uuid> {
        self.read().session.as_ref().map(|s| s.id())
    }

    /// The error that moved the client to `Errored`.
    pub fn last_error(&self) -> Option<ClientError> {
        self.read().last_error.clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, inner: &mut Inner, to: ClientState) {
        tracing::debug!(server = %self.server, from = %inner.state, to = %to, "state transition");
        inner.state = to;
    }

    /// Outcome for states that can be answered without connecting.
    fn settled(&self, inner: &Inner) -> Option<Result<(), ClientError>> {
        match inner.state {
            ClientState::Ready => Some(Ok(())),
            ClientState::Closing | ClientState::Closed => Some(Err(ClientError::Closed {
                server: self.server.clone(),
            })),
            ClientState::Errored => Some(Err(inner.last_error.clone().unwrap_or_else(|| {
                ClientError::Transport {
                    server: self.server.clone(),
                    reason: "client is in an error state".into(),
                }
            }))),
            ClientState::Uninitialized | ClientState::Connecting => None,
        }
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Connect, handshake and discover tools if not done yet.
    ///
    /// Runs at most once per connection: concurrent callers wait for the
    /// single attempt in flight and share its result. A failed attempt is
    /// recorded and returned again until [`reconnect`](Self::reconnect).
    pub async fn ensure_ready(&self) -> Result<(), ClientError> {
        let settled = self.settled(&self.read());
        if let Some(outcome) = settled {
            return outcome;
        }

        let _gate = self.connect_gate.lock().await;
        {
            let mut inner = self.write();
            if let Some(outcome) = self.settled(&inner) {
                return outcome;
            }
            // Connecting here means an earlier attempt was cancelled.
            self.set_state(&mut inner, ClientState::Connecting);
        }

        match self.connect().await {
            Ok((session, cache)) => {
                let mut inner = self.write();
                inner.session = Some(Arc::new(session));
                inner.cache = Arc::new(cache);
                inner.last_error = None;
                self.set_state(&mut inner, ClientState::Ready);
                Ok(())
            }
            Err(e) => {
                let mut inner = self.write();
                inner.last_error = Some(e.clone());
                self.set_state(&mut inner, ClientState::Errored);
                Err(e)
            }
        }
    }

    async fn connect(&self) -> Result<(Session, ToolCache), ClientError> {
        let connection = self.connector.connect(&self.server).await?;
        let (session, listing) =
            Session::establish(&self.server, connection, self.options.init_timeout).await?;
        let cache = ToolCache::populate(&self.server, listing, &self.options.normalization);
        Ok((session, cache))
    }

    /// Shut down. Idempotent and valid from any state; a client that never
    /// connected closes without I/O.
    pub async fn close(&self) {
        let _gate = self.connect_gate.lock().await;
        let session = {
            let mut inner = self.write();
            match inner.state {
                ClientState::Closed => return,
                ClientState::Uninitialized => {
                    self.set_state(&mut inner, ClientState::Closed);
                    return;
                }
                _ => {}
            }
            self.set_state(&mut inner, ClientState::Closing);
            inner.cache = Arc::new(ToolCache::empty());
            inner.session.take()
        };

        if let Some(session) = session {
            session.shutdown(self.options.shutdown_timeout).await;
        }
        let mut inner = self.write();
        self.set_state(&mut inner, ClientState::Closed);
    }

    /// Drop whatever connection exists and connect afresh, with a new
    /// discovery. This is the only way out of `Errored` or `Closed`.
    pub async fn reconnect(&self) -> Result<(), ClientError> {
        let old = {
            let _gate = self.connect_gate.lock().await;
            let mut inner = self.write();
            inner.cache = Arc::new(ToolCache::empty());
            inner.last_error = None;
            self.set_state(&mut inner, ClientState::Uninitialized);
            inner.session.take()
        };
        if let Some(session) = old {
            session.shutdown(self.options.shutdown_timeout).await;
        }
        self.ensure_ready().await
    }

    /// Mark the session failed after a transport fault. Only the session
    /// that faulted is torn down; a newer one is left alone.
    async fn fault(&self, session: &Arc<Session>, error: &ClientError) {
        let faulted = {
            let mut inner = self.write();
            let current = inner
                .session
                .as_ref()
                .is_some_and(|live| Arc::ptr_eq(live, session));
            if !current || inner.state != ClientState::Ready {
                return;
            }
            tracing::warn!(server = %self.server, error = %error, "transport fault, session dropped");
            inner.last_error = Some(error.clone());
            inner.cache = Arc::new(ToolCache::empty());
            self.set_state(&mut inner, ClientState::Errored);
            inner.session.take()
        };
        if let Some(session) = faulted {
            session.shutdown(self.options.shutdown_timeout).await;
        }
    }

    /// The live session and cache, once `Ready`.
    fn live(&self) -> Result<(Arc<Session>, Arc<ToolCache>), ClientError> {
        let inner = self.read();
        if let Some(Err(e)) = self.settled(&inner) {
            return Err(e);
        }
        match (&inner.session, inner.state) {
            (Some(session), ClientState::Ready) => Ok((session.clone(), inner.cache.clone())),
            _ => Err(ClientError::Closed {
                server: self.server.clone(),
            }),
        }
    }

    // ─── Tools ───────────────────────────────────────────────────────────

    /// Discovered tools in server order. Served from the cache; the server
    /// is not asked again until the next connection.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ClientError> {
        self.ensure_ready().await?;
        let (_, cache) = self.live()?;
        Ok(cache.list())
    }

    /// Descriptor for one tool.
    pub async fn descriptor(&self, name: &str) -> Result<ToolDescriptor, ClientError> {
        self.ensure_ready().await?;
        let (_, cache) = self.live()?;
        Ok(cache.lookup(name)?.descriptor.clone())
    }

    /// Tools the server advertised that could not be modelled.
    pub async fn rejected_tools(&self) -> Result<Vec<(String, ClientError)>, ClientError> {
        self.ensure_ready().await?;
        let (_, cache) = self.live()?;
        Ok(cache
            .rejected()
            .into_iter()
            .map(|(name, e)| (name.to_string(), e.clone()))
            .collect())
    }

    /// Call a tool.
    ///
    /// Arguments are normalised, checked against the cached parameter type,
    /// and dispatched. Field names in the result are denormalised.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, ClientError> {
        self.ensure_ready().await?;
        let (session, cache) = self.live()?;
        let tool = cache.lookup(name)?;

        let arguments = if arguments.is_null() { json!({}) } else { arguments };
        let table = &self.options.normalization;
        let normalized = table.normalize_value(name, &arguments)?;
        validate_arguments(name, &tool.wire_params, &normalized)?;

        let start = Instant::now();
        let params = json!({ "name": name, "arguments": normalized });
        let outcome = session
            .request("tools/call", Some(params), self.options.call_timeout)
            .await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => {
                tracing::debug!(server = %self.server, tool = name, elapsed_ms, "tool call completed");
                Ok(table.denormalize_value(&result))
            }
            Err(e) => {
                tracing::warn!(server = %self.server, tool = name, elapsed_ms, error = %e, "tool call failed");
                if matches!(e, ClientError::Transport { .. }) {
                    self.fault(&session, &e).await;
                }
                Err(e)
            }
        }
    }

    /// Wrapper for a cached tool, using the configured calling convention.
    pub async fn wrapper(&self, name: &str) -> Result<GeneratedWrapper, ClientError> {
        let descriptor = self.descriptor(name).await?;
        generate_wrapper(&descriptor, self.options.calling_convention)
    }

    /// Synthesised test parameters for a cached tool.
    pub async fn test_parameters(&self, name: &str) -> Result<TestParameterSet, ClientError> {
        let wrapper = self.wrapper(name).await?;
        TestParameterSet::for_wrapper(&wrapper)
    }
}

// ─── McpClient ───────────────────────────────────────────────────────────────

/// One [`ToolClient`] per configured server.
pub struct McpClient {
    clients: BTreeMap<String, Arc<ToolClient>>,
}

impl McpClient {
    /// Build process-backed clients for every configured server. Nothing is
    /// spawned until a client is used.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let options = config.client_options()?;
        let clients = config
            .servers
            .iter()
            .map(|(name, server)| {
                let connector: Arc<dyn Connector> = Arc::new(ProcessConnector::new(server.clone()));
                (name.clone(), Arc::new(ToolClient::new(name, connector, options.clone())))
            })
            .collect();
        Ok(Self { clients })
    }

    /// Build from explicit connectors.
    pub fn with_connectors(
        connectors: impl IntoIterator<Item = (String, Arc<dyn Connector>)>,
        options: ClientOptions,
    ) -> Self {
        let clients = connectors
            .into_iter()
            .map(|(name, connector)| {
                let client = ToolClient::new(&name, connector, options.clone());
                (name, Arc::new(client))
            })
            .collect();
        Self { clients }
    }

    /// Server names, sorted.
    pub fn server_names(&self) -> Vec<String> {
        self.clients.keys().cloned().collect()
    }

    pub fn client(&self, server: &str) -> Result<Arc<ToolClient>, ClientError> {
        self.clients
            .get(server)
            .cloned()
            .ok_or_else(|| ClientError::Config {
                reason: format!("no configuration for server '{server}'"),
            })
    }

    /// Discover tools on every server concurrently. A failing server does
    /// not hide the others' tools.
    pub async fn list_all_tools(
        &self,
    ) -> BTreeMap<String, Result<Vec<ToolDescriptor>, ClientError>> {
        let pending = self.clients.iter().map(|(name, client)| async move {
            (name.clone(), client.list_tools().await)
        });
        let results: BTreeMap<_, _> = futures::future::join_all(pending).await.into_iter().collect();

        let failed = results.values().filter(|r| r.is_err()).count();
        if failed > 0 {
            tracing::warn!(servers = results.len(), failed, "tool discovery incomplete");
        }
        results
    }

    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<Value, ClientError> {
        self.client(server)?.call_tool(tool, arguments).await
    }

    /// Close every client.
    pub async fn close_all(&self) {
        futures::future::join_all(self.clients.values().map(|c| c.close())).await;
    }

    /// Servers whose last failure a reconnect may fix.
    pub fn retryable_servers(&self) -> Vec<String> {
        self.clients
            .iter()
            .filter(|(_, c)| {
                c.state() == ClientState::Errored
                    && c.last_error().is_some_and(|e| e.kind() == ErrorKind::Transport)
            })
            .map(|(name, _)| name.clone())
            .collect()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_client::mock::{sample_tools, MockConnector, MockOptions, SLOW_DELAY};
    use std::sync::atomic::Ordering;

    fn client_with(options: MockOptions) -> (Arc<ToolClient>, Arc<MockConnector>) {
        let connector = Arc::new(MockConnector::new(options));
        let client = ToolClient::new("mock", connector.clone(), ClientOptions::default());
        (Arc::new(client), connector)
    }

    fn client() -> (Arc<ToolClient>, Arc<MockConnector>) {
        client_with(MockOptions::default())
    }

    #[tokio::test]
    async fn test_construction_is_lazy() {
        let (client, connector) = client();
        assert_eq!(client.state(), ClientState::Uninitialized);
        assert!(client.session_id().is_none());
        assert_eq!(connector.stats.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrent_first_callers_share_one_handshake() {
        let (client, connector) = client_with(MockOptions {
            init_delay: Duration::from_millis(50),
            ..MockOptions::default()
        });
        let callers: Vec<_> = (0..16)
            .map(|_| {
                let c = client.clone();
                tokio::spawn(async move { c.ensure_ready().await })
            })
            .collect();
        for caller in futures::future::join_all(callers).await {
            caller.unwrap().unwrap();
        }
        assert_eq!(connector.stats.handshakes(), 1);
        assert_eq!(connector.stats.connects.load(Ordering::SeqCst), 1);
        assert_eq!(client.state(), ClientState::Ready);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_failure() {
        let (client, connector) = client_with(MockOptions {
            fail_initialize: true,
            init_delay: Duration::from_millis(20),
            ..MockOptions::default()
        });
        let callers: Vec<_> = (0..8)
            .map(|_| {
                let c = client.clone();
                tokio::spawn(async move { c.ensure_ready().await })
            })
            .collect();
        for caller in futures::future::join_all(callers).await {
            let err = caller.unwrap().unwrap_err();
            assert!(matches!(err, ClientError::ServerError { .. }), "{err:?}");
        }
        assert_eq!(connector.stats.handshakes(), 1);
        assert_eq!(client.state(), ClientState::Errored);
        assert!(client.last_error().is_some());

        // No silent retry.
        assert!(client.ensure_ready().await.is_err());
        assert_eq!(connector.stats.handshakes(), 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_from_every_state() {
        let (never, connector) = client();
        never.close().await;
        never.close().await;
        assert_eq!(never.state(), ClientState::Closed);
        assert_eq!(connector.stats.connects.load(Ordering::SeqCst), 0);

        let (ready, _) = client();
        ready.ensure_ready().await.unwrap();
        ready.close().await;
        assert_eq!(ready.state(), ClientState::Closed);
        assert!(ready.session_id().is_none());
        ready.close().await;

        let (errored, _) = client_with(MockOptions {
            fail_initialize: true,
            ..MockOptions::default()
        });
        assert!(errored.ensure_ready().await.is_err());
        errored.close().await;
        errored.close().await;
        assert_eq!(errored.state(), ClientState::Closed);
    }

    #[tokio::test]
    async fn test_cancelled_connect_lets_next_caller_connect() {
        let (client, connector) = client_with(MockOptions {
            init_delay: Duration::from_millis(200),
            ..MockOptions::default()
        });
        let abandoned = tokio::time::timeout(Duration::from_millis(30), client.ensure_ready()).await;
        assert!(abandoned.is_err());
        assert_eq!(client.state(), ClientState::Connecting);
        assert!(client.session_id().is_none());

        client.ensure_ready().await.unwrap();
        assert_eq!(client.state(), ClientState::Ready);
        assert_eq!(connector.stats.connects.load(Ordering::SeqCst), 2);
        assert!(client.call_tool("echo", json!({})).await.is_ok());

        client.close().await;
        assert_eq!(client.state(), ClientState::Closed);
    }

    #[tokio::test]
    async fn test_close_after_cancelled_connect() {
        let (client, _) = client_with(MockOptions {
            init_delay: Duration::from_millis(200),
            ..MockOptions::default()
        });
        let abandoned = tokio::time::timeout(Duration::from_millis(30), client.ensure_ready()).await;
        assert!(abandoned.is_err());

        client.close().await;
        assert_eq!(client.state(), ClientState::Closed);
        assert!(matches!(client.ensure_ready().await, Err(ClientError::Closed { .. })));
    }

    #[tokio::test]
    async fn test_close_waits_for_connect_in_flight() {
        let (client, _) = client_with(MockOptions {
            init_delay: Duration::from_millis(100),
            ..MockOptions::default()
        });
        let c = client.clone();
        let connecting = tokio::spawn(async move { c.ensure_ready().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(client.state(), ClientState::Connecting);

        client.close().await;
        assert_eq!(client.state(), ClientState::Closed);
        assert!(client.session_id().is_none());
        // The attempt finished before close took over.
        assert!(connecting.await.unwrap().is_ok());
        assert!(matches!(client.ensure_ready().await, Err(ClientError::Closed { .. })));
    }

    #[tokio::test]
    async fn test_closed_client_refuses_work() {
        let (client, connector) = client();
        client.close().await;
        let err = client.call_tool("echo", json!({})).await.unwrap_err();
        assert!(matches!(err, ClientError::Closed { .. }));
        assert_eq!(err.kind(), ErrorKind::Lifecycle);
        assert_eq!(connector.stats.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cache_is_stable_across_calls() {
        let (client, connector) = client();
        let before = client.list_tools().await.unwrap();
        let pages = connector.stats.list_pages.load(Ordering::SeqCst);

        client.call_tool("echo", json!({"text": "hi"})).await.unwrap();
        let _ = client.call_tool("fail", json!({})).await;
        let _ = client.call_tool("echo", json!({"text": 5})).await;

        assert_eq!(client.list_tools().await.unwrap(), before);
        assert_eq!(connector.stats.list_pages.load(Ordering::SeqCst), pages);
    }

    #[tokio::test]
    async fn test_unknown_tool_leaves_state_and_cache_alone() {
        let (client, _) = client();
        let before = client.list_tools().await.unwrap();
        let session = client.session_id();

        let err = client.call_tool("nonexistent", json!({})).await.unwrap_err();
        assert!(matches!(err, ClientError::ToolNotFound { ref tool, .. } if tool == "nonexistent"));
        assert_eq!(client.state(), ClientState::Ready);
        assert_eq!(client.session_id(), session);
        assert_eq!(client.list_tools().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_create_item_scenario() {
        let (client, connector) = client();

        let err = client
            .call_tool("create_item", json!({"system.assignedTo": "dana"}))
            .await
            .unwrap_err();
        match &err {
            ClientError::SchemaValidation { tool, path, .. } => {
                assert_eq!(tool, "create_item");
                assert_eq!(path, "title");
            }
            other => panic!("expected SchemaValidation, got {other:?}"),
        }
        assert!(connector.stats.calls().is_empty());

        let result = client
            .call_tool("create_item", json!({"title": "Fix login", "system.assignedTo": "dana"}))
            .await
            .unwrap();

        let sent = connector.stats.calls();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0]["arguments"],
            json!({"title": "Fix login", "System.AssignedTo": "dana"})
        );
        // The echoed response comes back in the caller's convention.
        assert_eq!(
            result,
            json!({"echo": {"title": "Fix login", "system.assignedTo": "dana"}})
        );
    }

    #[tokio::test]
    async fn test_validation_error_names_nested_path() {
        let (client, _) = client();
        let err = client.call_tool("echo", json!({"text": 5})).await.unwrap_err();
        assert_eq!(err.field_path(), Some("text"));
        assert_eq!(client.state(), ClientState::Ready);
    }

    #[tokio::test]
    async fn test_null_arguments_are_empty_object() {
        let (client, connector) = client();
        client.call_tool("echo", Value::Null).await.unwrap();
        assert_eq!(connector.stats.calls()[0]["arguments"], json!({}));
    }

    #[tokio::test]
    async fn test_rejected_tool_does_not_block_others() {
        let (client, _) = client();
        let err = client.call_tool("linked", json!({})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedSchema);
        assert!(client.call_tool("echo", json!({})).await.is_ok());

        let rejected = client.rejected_tools().await.unwrap();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].0, "linked");
    }

    #[tokio::test]
    async fn test_malformed_tool_entry_does_not_fail_discovery() {
        let mut tools = sample_tools();
        tools.push(json!({"name": "nullable", "description": null, "inputSchema": {"type": "object"}}));
        tools.push(json!({"name": "broken", "description": 42, "inputSchema": {"type": "object"}}));
        let (client, _) = client_with(MockOptions {
            tools,
            ..MockOptions::default()
        });

        assert!(client.call_tool("echo", json!({"text": "hi"})).await.is_ok());
        assert!(client.call_tool("nullable", json!({})).await.is_ok());
        let err = client.call_tool("broken", json!({})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedSchema);
        assert_eq!(client.state(), ClientState::Ready);

        let rejected: Vec<_> = client
            .rejected_tools()
            .await
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(rejected, vec!["broken", "linked"]);
    }

    #[tokio::test]
    async fn test_merging_argument_keys_fail_before_dispatch() {
        let (client, connector) = client();
        let err = client
            .call_tool(
                "create_item",
                json!({"title": "t", "system.assignedTo": "a", "System.AssignedTo": "b"}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::SchemaValidation { .. }), "{err:?}");
        assert_eq!(err.field_path(), Some("System.AssignedTo"));
        assert!(connector.stats.calls().is_empty());
        assert_eq!(client.state(), ClientState::Ready);
    }

    #[tokio::test]
    async fn test_server_error_keeps_session() {
        let (client, _) = client();
        let err = client.call_tool("fail", json!({})).await.unwrap_err();
        assert!(matches!(err, ClientError::ServerError { code: -32000, .. }));
        assert_eq!(client.state(), ClientState::Ready);
    }

    #[tokio::test]
    async fn test_timeout_keeps_session() {
        let connector = Arc::new(MockConnector::new(MockOptions::default()));
        let options = ClientOptions {
            call_timeout: SLOW_DELAY / 6,
            ..ClientOptions::default()
        };
        let client = ToolClient::new("mock", connector, options);
        let err = client.call_tool("slow", json!({})).await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout { .. }));
        assert!(err.is_retryable());
        assert_eq!(client.state(), ClientState::Ready);
        assert!(client.call_tool("echo", json!({})).await.is_ok());
    }

    #[tokio::test]
    async fn test_process_exit_moves_to_errored() {
        let (client, _) = client();
        client.ensure_ready().await.unwrap();

        let err = client.call_tool("crash", json!({})).await.unwrap_err();
        assert!(matches!(err, ClientError::Transport { .. }), "{err:?}");
        assert_eq!(client.state(), ClientState::Errored);
        assert!(client.session_id().is_none());
        assert!(matches!(client.last_error(), Some(ClientError::Transport { .. })));

        // Recorded error until the host reconnects.
        let again = client.call_tool("echo", json!({})).await.unwrap_err();
        assert!(matches!(again, ClientError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_reconnect_runs_fresh_discovery() {
        let (client, connector) = client();
        client.ensure_ready().await.unwrap();
        let first = client.session_id();
        let _ = client.call_tool("crash", json!({})).await;
        assert_eq!(client.state(), ClientState::Errored);

        client.reconnect().await.unwrap();
        assert_eq!(client.state(), ClientState::Ready);
        assert_ne!(client.session_id(), first);
        assert_eq!(connector.stats.handshakes(), 2);
        assert!(client.call_tool("echo", json!({})).await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_calls_get_their_own_results() {
        let (client, _) = client();
        let calls: Vec<_> = (0..10)
            .map(|i| {
                let c = client.clone();
                tokio::spawn(async move { (i, c.call_tool("echo", json!({"text": i.to_string()})).await) })
            })
            .collect();
        for call in futures::future::join_all(calls).await {
            let (i, result) = call.unwrap();
            assert_eq!(result.unwrap()["echo"]["text"], json!(i.to_string()));
        }
    }

    #[tokio::test]
    async fn test_cancelled_call_does_not_block_later_calls() {
        let (client, _) = client();
        client.ensure_ready().await.unwrap();
        let cancelled =
            tokio::time::timeout(Duration::from_millis(20), client.call_tool("slow", json!({}))).await;
        assert!(cancelled.is_err());
        assert_eq!(client.state(), ClientState::Ready);
        assert!(client.call_tool("echo", json!({})).await.is_ok());
    }

    #[tokio::test]
    async fn test_wrapper_and_test_parameters_from_cache() {
        let (client, _) = client();
        let wrapper = client.wrapper("create_item").await.unwrap();
        assert_eq!(wrapper.function_name, "create_item");
        assert_eq!(wrapper.params[1].ident, "system_assigned_to");

        let set = client.test_parameters("create_item").await.unwrap();
        for case in set.valid_cases() {
            assert!(client.call_tool("create_item", case.arguments.clone()).await.is_ok(), "{}", case.label);
        }
        for case in set.invalid_cases() {
            let err = client.call_tool("create_item", case.arguments.clone()).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::SchemaValidation, "{}", case.label);
        }
    }

    #[tokio::test]
    async fn test_multi_server_host() {
        let good: Arc<dyn Connector> = Arc::new(MockConnector::new(MockOptions::default()));
        let bad: Arc<dyn Connector> = Arc::new(MockConnector::new(MockOptions {
            fail_initialize: true,
            ..MockOptions::default()
        }));
        let host = McpClient::with_connectors(
            vec![("work".to_string(), good), ("broken".to_string(), bad)],
            ClientOptions::default(),
        );
        assert_eq!(host.server_names(), vec!["broken", "work"]);

        let all = host.list_all_tools().await;
        assert!(all["broken"].is_err());
        assert_eq!(all["work"].as_ref().unwrap().len(), 5);

        let out = host.call_tool("work", "echo", json!({"text": "x"})).await.unwrap();
        assert_eq!(out["echo"]["text"], "x");
        assert!(matches!(
            host.call_tool("nowhere", "echo", json!({})).await,
            Err(ClientError::Config { .. })
        ));
        // A JSON-RPC error is a protocol failure, not a transport one.
        assert!(host.retryable_servers().is_empty());

        host.close_all().await;
        assert_eq!(host.client("work").unwrap().state(), ClientState::Closed);
        assert_eq!(host.client("broken").unwrap().state(), ClientState::Closed);
    }
}
