//! toolbridge: typed, cached access to MCP tool servers.
//!
//! Connects to tool servers over stdio, discovers their tools, infers a
//! type model from each tool's JSON Schema, and exposes validated calls,
//! generated wrappers and synthesised test parameters.

pub mod codegen;
pub mod config;
pub mod errors;
pub mod logging;
pub mod mcp_client;
pub mod schema;

pub use codegen::{CallingConvention, GeneratedWrapper, TestParameterSet};
pub use config::{find_config_path, load_config, ClientConfig, LoggingConfig};
pub use errors::{ClientError, ErrorKind};
pub use mcp_client::{
    ClientOptions, ClientState, Connection, Connector, McpClient, ProcessConnector, ToolClient,
    ToolDescriptor,
};
pub use schema::{NormalizationRule, NormalizationTable, TypeNode};
