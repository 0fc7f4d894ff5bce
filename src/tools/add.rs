use crate::mcp::registry::NativeTool;
use async_trait::async_trait;
use rmcp::model::{CallToolResult, Content};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
struct AddArgs {
    a: f64,
    b: f64,
}

/// Adds two numbers.
#[derive(Debug, Default)]
pub struct AddTool;

#[async_trait]
impl NativeTool for AddTool {
    fn name(&self) -> &str {
        "add"
    }

    fn description(&self) -> &str {
        "Add two numbers and return the sum."
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "a": { "type": "number", "description": "First addend." },
                "b": { "type": "number", "description": "Second addend." }
            },
            "required": ["a", "b"]
        })
    }

    async fn call(&self, args: serde_json::Value) -> anyhow::Result<CallToolResult> {
        let AddArgs { a, b } = serde_json::from_value(args)?;
        Ok(CallToolResult::success(vec![Content::text(
            (a + b).to_string(),
        )]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add() {
        let result = AddTool.call(json!({ "a": 1.5, "b": 2 })).await.unwrap();
        let result = serde_json::to_value(result).unwrap();
        assert_eq!(result["isError"], false);
        assert_eq!(result["content"][0]["text"], "3.5");
    }

    #[tokio::test]
    async fn test_add_rejects_wrong_shape() {
        assert!(AddTool.call(json!({ "a": "one", "b": 2 })).await.is_err());
        assert!(AddTool.call(json!({ "a": 1 })).await.is_err());
    }
}
