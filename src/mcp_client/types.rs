//! Shared types for the MCP client.
//!
//! JSON-RPC 2.0 message types, MCP protocol structures, and the cached
//! per-tool descriptor.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::ClientError;
use crate::schema::inference::{infer_parameters, infer_returns};
use crate::schema::TypeNode;

/// MCP protocol revision sent in `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: u64, method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 notification (no `id`, no response).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    pub fn new(method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        }
    }
}

/// Any inbound frame. Responses carry an `id`; server notifications and
/// requests carry a `method`.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingFrame {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl IncomingFrame {
    /// A response is a frame with an `id` and no `method`.
    pub fn into_response(self) -> Option<JsonRpcResponse> {
        match (self.id, self.method) {
            (Some(id), None) => Some(JsonRpcResponse {
                id,
                result: self.result,
                error: self.error,
            }),
            _ => None,
        }
    }
}

/// JSON-RPC 2.0 response message (success or error).
#[derive(Debug, Clone)]
pub struct JsonRpcResponse {
    pub id: u64,
    pub result: Option<serde_json::Value>,
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

// ─── MCP Protocol Types ──────────────────────────────────────────────────────

/// MCP tool definition as returned by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolDefinition {
    pub name: String,
    /// Missing and `null` both read as empty.
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, rename = "inputSchema", alias = "input_schema")]
    pub input_schema: serde_json::Value,
    #[serde(default, rename = "outputSchema", alias = "output_schema")]
    pub output_schema: serde_json::Value,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// `tools/list` result page. Entries stay raw so one malformed tool does
/// not spoil the page.
#[derive(Debug, Clone, Deserialize)]
pub struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<serde_json::Value>,
    #[serde(default, rename = "nextCursor")]
    pub next_cursor: Option<String>,
}

/// Every tool a discovery pass returned.
#[derive(Debug, Clone, Default)]
pub struct ToolListing {
    pub tools: Vec<McpToolDefinition>,
    /// Entries that are not readable tool definitions, keyed by their
    /// `name` or, when that is unusable, by `#<position>`.
    pub malformed: Vec<(String, ClientError)>,
}

impl ToolListing {
    /// Read one raw `tools/list` entry.
    pub fn push_entry(&mut self, entry: serde_json::Value) {
        let position = self.tools.len() + self.malformed.len();
        let label = entry
            .get("name")
            .and_then(serde_json::Value::as_str)
            .filter(|name| !name.is_empty())
            .map_or_else(|| format!("#{position}"), str::to_string);

        match serde_json::from_value::<McpToolDefinition>(entry) {
            Ok(def) if !def.name.is_empty() => self.tools.push(def),
            Ok(_) => self.malformed.push((
                label.clone(),
                malformed_tool(label, "tool name is empty".into()),
            )),
            Err(e) => self.malformed.push((
                label.clone(),
                malformed_tool(label, format!("malformed tool definition: {e}")),
            )),
        }
    }

    pub fn len(&self) -> usize {
        self.tools.len() + self.malformed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<McpToolDefinition>> for ToolListing {
    fn from(tools: Vec<McpToolDefinition>) -> Self {
        Self {
            tools,
            malformed: Vec::new(),
        }
    }
}

fn malformed_tool(tool: String, reason: String) -> ClientError {
    ClientError::UnsupportedSchema {
        tool,
        path: String::new(),
        reason,
    }
}

/// MCP initialize response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    #[serde(default, rename = "protocolVersion")]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: serde_json::Value,
    #[serde(default, rename = "serverInfo")]
    pub server_info: Option<ServerInfo>,
}

/// Server info returned in the initialize response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerInfo {
    pub name: Option<String>,
    pub version: Option<String>,
}

/// How to launch one tool server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory for the child process.
    #[serde(default)]
    pub cwd: Option<String>,
}

// ─── ToolDescriptor ──────────────────────────────────────────────────────────

/// Discovered schema metadata for one tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// Inferred parameter object, field names as the server declares them.
    pub params: TypeNode,
    /// Inferred return type, when the server publishes an output schema.
    pub returns: Option<TypeNode>,
    /// Raw schemas as received.
    pub input_schema: serde_json::Value,
    pub output_schema: serde_json::Value,
    /// Hex SHA-256 over the tool name and raw schemas.
    pub fingerprint: String,
}

impl ToolDescriptor {
    /// Infer types for a raw tool definition.
    pub fn from_definition(def: McpToolDefinition) -> Result<Self, ClientError> {
        let params = infer_parameters(&def.name, &def.input_schema)?;
        let returns = infer_returns(&def.name, &def.output_schema)?;
        let fingerprint = fingerprint(&def);
        Ok(Self {
            name: def.name,
            description: def.description,
            params,
            returns,
            input_schema: def.input_schema,
            output_schema: def.output_schema,
            fingerprint,
        })
    }

    /// Raw property schema for a top-level parameter.
    pub fn property_schema(&self, name: &str) -> Option<&serde_json::Value> {
        self.input_schema.get("properties")?.get(name)
    }
}

fn fingerprint(def: &McpToolDefinition) -> String {
    let mut hasher = Sha256::new();
    hasher.update(def.name.as_bytes());
    hasher.update([0u8]);
    hasher.update(def.input_schema.to_string().as_bytes());
    hasher.update([0u8]);
    hasher.update(def.output_schema.to_string().as_bytes());
    let hash = hasher.finalize();
    format!("{hash:x}")
}

// ─── Standard MCP Error Codes ────────────────────────────────────────────────

/// Well-known JSON-RPC error codes.
pub mod error_codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i32 = -32700;
    /// The JSON sent is not a valid Request object.
    pub const INVALID_REQUEST: i32 = -32600;
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_rpc_request_serialization() {
        let req = JsonRpcRequest::new(1, "initialize", None);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"id\":1"));
        assert!(json.contains("\"method\":\"initialize\""));
        // params should be omitted when None
        assert!(!json.contains("params"));
    }

    #[test]
    fn test_notification_has_no_id() {
        let note = JsonRpcNotification::new("notifications/initialized", None);
        let json = serde_json::to_string(&note).unwrap();
        assert!(!json.contains("\"id\""));
    }

    #[test]
    fn test_incoming_response_frame() {
        let json = r#"{"jsonrpc": "2.0", "id": 7, "result": {"tools": []}}"#;
        let frame: IncomingFrame = serde_json::from_str(json).unwrap();
        let resp = frame.into_response().unwrap();
        assert_eq!(resp.id, 7);
        assert!(resp.result.is_some());
        assert!(resp.error.is_none());
    }

    #[test]
    fn test_incoming_error_frame() {
        let json = r#"{
            "jsonrpc": "2.0",
            "id": 2,
            "error": {"code": -32601, "message": "Method not found"}
        }"#;
        let frame: IncomingFrame = serde_json::from_str(json).unwrap();
        let err = frame.into_response().unwrap().error.unwrap();
        assert_eq!(err.code, error_codes::METHOD_NOT_FOUND);
    }

    #[test]
    fn test_server_notification_is_not_a_response() {
        let json = r#"{"jsonrpc":"2.0","method":"notifications/tools/list_changed"}"#;
        let frame: IncomingFrame = serde_json::from_str(json).unwrap();
        assert!(frame.into_response().is_none());
    }

    #[test]
    fn test_tool_definition_camel_case_schemas() {
        let json = r#"{
            "name": "create_item",
            "inputSchema": {"type": "object", "properties": {"title": {"type": "string"}}, "required": ["title"]}
        }"#;
        let def: McpToolDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(def.description, "");
        assert!(def.output_schema.is_null());

        let desc = ToolDescriptor::from_definition(def).unwrap();
        assert!(desc.returns.is_none());
        assert!(desc.property_schema("title").is_some());
        assert_eq!(desc.fingerprint.len(), 64);
    }

    #[test]
    fn test_null_description_reads_as_empty() {
        let def: McpToolDefinition = serde_json::from_value(serde_json::json!({
            "name": "weird",
            "description": null,
            "inputSchema": {"type": "object"}
        }))
        .unwrap();
        assert_eq!(def.description, "");
    }

    #[test]
    fn test_listing_keeps_malformed_entries_apart() {
        let mut listing = ToolListing::default();
        listing.push_entry(serde_json::json!({"name": "ok", "inputSchema": {"type": "object"}}));
        listing.push_entry(serde_json::json!({"name": "bad", "inputSchema": {}, "description": 7}));
        listing.push_entry(serde_json::json!({"description": "no name"}));
        listing.push_entry(serde_json::json!({"name": "", "inputSchema": {}}));

        assert_eq!(listing.len(), 4);
        assert_eq!(listing.tools.len(), 1);
        assert_eq!(listing.tools[0].name, "ok");
        let labels: Vec<_> = listing.malformed.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(labels, vec!["bad", "#2", "#3"]);
        assert!(listing
            .malformed
            .iter()
            .all(|(_, e)| matches!(e, ClientError::UnsupportedSchema { .. })));
    }

    #[test]
    fn test_fingerprint_tracks_schema_changes() {
        let a = McpToolDefinition {
            name: "t".into(),
            description: String::new(),
            input_schema: serde_json::json!({"type": "object"}),
            output_schema: serde_json::Value::Null,
        };
        let mut b = a.clone();
        b.input_schema = serde_json::json!({"type": "object", "properties": {"x": {"type": "string"}}});

        let fa = ToolDescriptor::from_definition(a.clone()).unwrap().fingerprint;
        let fa2 = ToolDescriptor::from_definition(a).unwrap().fingerprint;
        let fb = ToolDescriptor::from_definition(b).unwrap().fingerprint;
        assert_eq!(fa, fa2);
        assert_ne!(fa, fb);
    }
}
