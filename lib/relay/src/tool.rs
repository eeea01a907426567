//! Locally executed tools.
//!
//! The upstream agent may ask for a tool by name. If an executor is
//! registered here the hub runs it; otherwise an operator answers from a
//! dashboard. Either way the answer goes through the correlator.

use crate::error::ToolError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Definition of a tool advertised to the upstream agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema for the arguments.
    pub input_schema: JsonValue,
}

impl ToolDefinition {
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: serde_json::json!({"type": "object"}),
        }
    }

    #[must_use]
    pub fn with_input_schema(mut self, schema: JsonValue) -> Self {
        self.input_schema = schema;
        self
    }
}

/// Outcome of one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub data: Option<JsonValue>,
    pub error: Option<String>,
    pub metadata: ToolResultMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResultMetadata {
    pub execution_time_ms: u64,
}

impl ToolResult {
    #[must_use]
    pub fn success(data: JsonValue) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            metadata: ToolResultMetadata::default(),
        }
    }

    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            metadata: ToolResultMetadata::default(),
        }
    }

    /// A failure carrying structured detail, as submitted by an operator.
    #[must_use]
    pub fn failure_with(data: JsonValue) -> Self {
        let error = data
            .get("message")
            .and_then(JsonValue::as_str)
            .unwrap_or("tool call failed")
            .to_string();
        Self {
            success: false,
            data: Some(data),
            error: Some(error),
            metadata: ToolResultMetadata::default(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: ToolResultMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Splits the result into the upstream `payload` and `is_error` flag.
    #[must_use]
    pub fn into_payload(self) -> (JsonValue, bool) {
        if self.success {
            (self.data.unwrap_or(JsonValue::Null), false)
        } else {
            let payload = self.data.unwrap_or_else(|| {
                serde_json::json!({ "message": self.error.unwrap_or_default() })
            });
            (payload, true)
        }
    }
}

/// A tool the relay can run itself.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn execute(&self, arguments: JsonValue) -> Result<JsonValue, ToolError>;
}

/// Executors by tool name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    executors: HashMap<String, Arc<dyn ToolExecutor>>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an executor under its definition's name, replacing any
    /// previous one.
    pub fn register(&mut self, executor: Arc<dyn ToolExecutor>) {
        self.executors.insert(executor.definition().name, executor);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolExecutor>> {
        self.executors.get(name).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.executors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    /// Runs a tool and wraps the outcome, timing it.
    pub async fn invoke(&self, name: &str, arguments: JsonValue) -> ToolResult {
        let Some(executor) = self.get(name) else {
            return ToolResult::failure(ToolError::NotFound { name: name.to_string() }.to_string());
        };

        let started = Instant::now();
        let result = match executor.execute(arguments).await {
            Ok(data) => ToolResult::success(data),
            Err(e) => ToolResult::failure(e.to_string()),
        };
        result.with_metadata(ToolResultMetadata {
            execution_time_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }

    /// Tool list in the shape the upstream agent config expects.
    #[must_use]
    pub fn to_agent_format(&self) -> Vec<JsonValue> {
        let mut definitions: Vec<_> = self.executors.values().map(|e| e.definition()).collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
            .into_iter()
            .map(|def| {
                serde_json::json!({
                    "name": def.name,
                    "description": def.description,
                    "parameters": def.input_schema
                })
            })
            .collect()
    }
}
