//! MCP SSE Session Relay
//!
//! A session-oriented message relay: clients open a long-lived Server-Sent
//! Events stream, receive a session id, and POST JSON-RPC messages that are
//! routed back onto their own stream.
//!
//! # Architecture
//!
//! - **Server**: Axum-based HTTP server exposing the SSE and message endpoints
//! - **Session core**: registry, lifecycle manager and message router
//! - **MCP**: JSON-RPC protocol handler serving tools over each session
//! - **Tools**: arithmetic and web search
//!
//! # Modules
//!
//! - [`session`]: Session registry, connection lifecycle and routing
//! - [`mcp`]: MCP protocol handler and tool registry
//! - [`tools`]: Built-in tools
//! - [`config`]: Layered configuration
//! - [`error`]: Relay error taxonomy

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::unused_async)]

pub mod config;
pub mod error;
pub mod mcp;
pub mod server;
pub mod session;
pub mod telemetry;
pub mod tools;

use crate::config::AppConfig;

use mcp::{McpHandler, ToolRegistry};
use session::{LifecycleManager, MessageRouter, ProtocolHandler, SessionRegistry};
use std::sync::Arc;

/// Application state shared across all handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Open sessions.
    pub sessions: SessionRegistry,
    /// Opens and tears down streaming connections.
    pub lifecycle: LifecycleManager,
    /// Routes posted messages onto sessions.
    pub router: MessageRouter,
    /// Global Configuration
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Wire a fresh registry, lifecycle manager and router around `tools`.
    pub fn new(config: Arc<AppConfig>, tools: ToolRegistry) -> Self {
        let sessions = SessionRegistry::new();
        let handler: Arc<dyn ProtocolHandler> =
            Arc::new(McpHandler::new(tools, config.relay.messages_path.clone()));

        let lifecycle = LifecycleManager::new(sessions.clone(), Arc::clone(&handler))
            .with_keepalive_interval(config.relay.keepalive_interval())
            .with_channel_capacity(config.relay.channel_capacity);

        let router = MessageRouter::new(sessions.clone(), lifecycle.clone(), handler)
            .with_delivery_timeout(config.relay.delivery_timeout());

        Self {
            sessions,
            lifecycle,
            router,
            config,
        }
    }
}
