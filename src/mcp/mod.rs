//! Model Context Protocol (MCP) server over SSE.
//!
//! Each streaming connection speaks JSON-RPC 2.0: on attach the handler
//! announces the message endpoint with an `endpoint` event, and every routed
//! request is answered with a `message` event on the same stream.
//!
//! ```text
//! event: endpoint
//! data: /messages?sessionId=2f1c…
//!
//! event: message
//! data: {"jsonrpc":"2.0","id":1,"result":{…}}
//! ```
//!
//! Wire types come from [`rmcp::model`].

pub mod handler;
pub mod registry;

pub use handler::McpHandler;
pub use registry::{NativeTool, ToolRegistry};
