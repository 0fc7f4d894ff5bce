//! Session registry and message routing.
//!
//! This module is the relay core: it owns streaming connections, maps session
//! ids to them, keeps them alive and routes out-of-band messages onto them.
//!
//! # Architecture
//!
//! - [`StreamingConnection`]: one open server-to-client channel
//! - [`SessionRegistry`]: id → connection mapping with an explicit fallback lookup
//! - [`LifecycleManager`]: establishment, keepalive timer and exactly-once teardown
//! - [`MessageRouter`]: resolves a message to a connection and delivers it
//! - [`ProtocolHandler`]: the protocol spoken over a connection
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mcp_sse_relay::mcp::{McpHandler, ToolRegistry};
//! use mcp_sse_relay::session::{LifecycleManager, MessageRouter, SessionRegistry};
//!
//! # async fn run() -> Result<(), mcp_sse_relay::error::RelayError> {
//! let registry = SessionRegistry::new();
//! let handler = Arc::new(McpHandler::new(ToolRegistry::new(), "/messages"));
//! let lifecycle = LifecycleManager::new(registry.clone(), handler.clone());
//! let router = MessageRouter::new(registry, lifecycle.clone(), handler);
//!
//! let stream = lifecycle.establish()?;
//! let ping = serde_json::json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" });
//! router.route(Some(stream.session_id().as_str()), ping).await?;
//! # Ok(())
//! # }
//! ```

mod connection;
mod handler;
mod lifecycle;
mod registry;
mod router;

pub use connection::{
    CloseReason, ConnectionClosed, ConnectionState, Frame, SessionId, StreamingConnection,
};
pub use handler::ProtocolHandler;
pub use lifecycle::{
    DEFAULT_CHANNEL_CAPACITY, DEFAULT_KEEPALIVE_INTERVAL, LifecycleManager, SessionStream,
};
pub use registry::SessionRegistry;
pub use router::MessageRouter;
