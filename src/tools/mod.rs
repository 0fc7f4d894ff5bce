//! Tools exposed over MCP.

mod add;
mod web_search;

pub use add::AddTool;
pub use web_search::WebSearchTool;

use crate::config::SearchConfig;
use crate::mcp::registry::ToolRegistry;
use std::sync::Arc;

/// Registry with every built-in tool.
pub fn default_registry(search: &SearchConfig) -> anyhow::Result<ToolRegistry> {
    Ok(ToolRegistry::new()
        .with_native_tool(Arc::new(AddTool))
        .with_native_tool(Arc::new(WebSearchTool::from_config(search)?)))
}
