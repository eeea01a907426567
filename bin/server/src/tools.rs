//! Tools the relay answers itself instead of waiting on a dashboard.

use async_trait::async_trait;
use callrelay_core::CustomerId;
use callrelay_relay::{ToolDefinition, ToolError, ToolExecutor, ToolRegistry};
use callrelay_store::ContextAssembler;
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;

const CUSTOMER_CONTEXT_TOOL: &str = "get_customer_context";

/// Looks up a caller's profile, recent interactions, and business facts.
pub struct CustomerContextTool {
    assembler: ContextAssembler,
}

impl CustomerContextTool {
    #[must_use]
    pub fn new(assembler: ContextAssembler) -> Self {
        Self { assembler }
    }

    fn invalid(reason: impl Into<String>) -> ToolError {
        ToolError::InvalidInput {
            name: CUSTOMER_CONTEXT_TOOL.to_string(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ToolExecutor for CustomerContextTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            CUSTOMER_CONTEXT_TOOL,
            "Look up what we know about the caller: profile, recent interactions, and store facts.",
        )
        .with_input_schema(json!({
            "type": "object",
            "properties": {
                "customer_id": { "type": "string", "description": "The caller's customer id" }
            },
            "required": ["customer_id"]
        }))
    }

    async fn execute(&self, arguments: JsonValue) -> Result<JsonValue, ToolError> {
        let raw = arguments
            .get("customer_id")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| Self::invalid("customer_id is required"))?;
        let customer_id = CustomerId::new(raw).map_err(|e| Self::invalid(e.to_string()))?;

        let (context, _) = self
            .assembler
            .assemble(&customer_id)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                name: CUSTOMER_CONTEXT_TOOL.to_string(),
                reason: e.to_string(),
            })?;

        serde_json::to_value(context).map_err(|e| ToolError::ExecutionFailed {
            name: CUSTOMER_CONTEXT_TOOL.to_string(),
            reason: e.to_string(),
        })
    }
}

/// The tools registered on every hub.
#[must_use]
pub fn default_registry(assembler: ContextAssembler) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(CustomerContextTool::new(assembler)));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{StaticSource, assembler};

    #[tokio::test]
    async fn returns_assembled_context() {
        let tool = CustomerContextTool::new(assembler(StaticSource::known()));
        let value = tool.execute(json!({"customer_id": "cust-1"})).await.unwrap();

        assert_eq!(value["profile"]["first_name"], "Dana");
        assert_eq!(value["business_facts"]["business_name"], "Acme Outfitters");
    }

    #[tokio::test]
    async fn missing_customer_id_is_invalid_input() {
        let tool = CustomerContextTool::new(assembler(StaticSource::known()));
        let err = tool.execute(json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn registry_exposes_the_tool() {
        let registry = default_registry(assembler(StaticSource::known()));
        assert!(registry.get(CUSTOMER_CONTEXT_TOOL).is_some());

        let result = registry
            .invoke(CUSTOMER_CONTEXT_TOOL, json!({"customer_id": "cust-1"}))
            .await;
        assert!(result.success);
    }
}
