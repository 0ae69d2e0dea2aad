//! Model Context Protocol surface
//!
//! Exposes the prompt registry to MCP clients over a line-delimited
//! JSON-RPC stream, normally the process's stdin and stdout.

mod messages;
mod server;

pub use messages::*;
pub use server::{McpServer, ServerOptions};
