//! MCP protocol layer: JSON-RPC types, message shapes, stdio transport.

pub mod messages;
pub mod stdio;
pub mod types;
