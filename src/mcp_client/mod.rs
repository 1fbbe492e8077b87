//! MCP client: stdio transport, session handshake, tool cache, and the
//! lifecycle state machine hosts call tools through.
//!
//! Layering, leaves first:
//! - `transport`: line-delimited JSON-RPC with request/response correlation
//! - `session`: connectors, `initialize` handshake, paginated discovery
//! - `cache`: per-session tool descriptors
//! - `client`: `ToolClient` state machine and the multi-server `McpClient`

pub mod cache;
pub mod client;
pub mod session;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod mock;

pub use cache::{CachedTool, ToolCache};
pub use client::{ClientOptions, ClientState, McpClient, ToolClient};
pub use session::{Connection, Connector, ProcessConnector, Session};
pub use types::{McpToolDefinition, ServerConfig, ToolDescriptor, ToolListing};
