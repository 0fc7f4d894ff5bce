use anyhow::anyhow;
use async_trait::async_trait;
use rmcp::model::{CallToolResult, Tool};
use std::{collections::BTreeMap, sync::Arc};

/// A tool served by this process.
#[async_trait]
pub trait NativeTool: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON schema of the tool's arguments.
    fn schema(&self) -> serde_json::Value;
    async fn call(&self, args: serde_json::Value) -> anyhow::Result<CallToolResult>;
}

/// Immutable set of tools, keyed by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Arc<BTreeMap<String, Arc<dyn NativeTool>>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_native_tool(self, tool: Arc<dyn NativeTool>) -> Self {
        let mut tools = (*self.tools).clone();
        tools.insert(tool.name().to_string(), tool);
        Self {
            tools: Arc::new(tools),
        }
    }

    /// Tool descriptors for `tools/list`, in name order.
    pub fn list(&self) -> Vec<Tool> {
        self.tools
            .values()
            .map(|t| Tool {
                name: t.name().to_string().into(),
                description: Some(t.description().to_string().into()),
                input_schema: Arc::new(t.schema().as_object().cloned().unwrap_or_default()),
                title: None,
                output_schema: None,
                annotations: None,
                icons: None,
                meta: None,
            })
            .collect()
    }

    /// Execute a tool by name.
    pub async fn call(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> anyhow::Result<CallToolResult> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| anyhow!("unknown tool: {name}"))?;
        tool.call(arguments).await
    }
}
