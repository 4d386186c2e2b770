//! Tool invocation registry.
//!
//! Phase-level declarative actions (snapshot a database, drain a load
//! balancer, file a change ticket) run through a name-keyed registry of
//! `ToolInvoker` implementations supplied by the embedding application.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::error::{EngineError, Result};

/// An executable capability taking a parameter map and returning a result.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, params: &HashMap<String, Value>) -> Result<Value>;
}

/// Name-keyed lookup of tool invokers.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn ToolInvoker>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, tool: Arc<dyn ToolInvoker>) {
        self.tools.write().insert(name.into(), tool);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    pub async fn invoke(&self, name: &str, params: &HashMap<String, Value>) -> Result<Value> {
        let tool = self
            .tools
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::ToolNotFound(name.to_string()))?;

        debug!(tool = name, "Invoking tool");
        tool.invoke(params)
            .await
            .map_err(|e| match e {
                EngineError::Tool(_) | EngineError::ToolNotFound(_) => e,
                other => EngineError::Tool(format!("{}: {}", name, other)),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl ToolInvoker for EchoTool {
        async fn invoke(&self, params: &HashMap<String, Value>) -> Result<Value> {
            Ok(json!({ "echo": params.get("message").cloned().unwrap_or(Value::Null) }))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl ToolInvoker for FailingTool {
        async fn invoke(&self, _: &HashMap<String, Value>) -> Result<Value> {
            Err(EngineError::Other("boom".into()))
        }
    }

    #[tokio::test]
    async fn test_invoke_registered_tool() {
        let registry = ToolRegistry::new();
        registry.register("echo", Arc::new(EchoTool));

        let mut params = HashMap::new();
        params.insert("message".to_string(), json!("hi"));

        let result = registry.invoke("echo", &params).await.unwrap();
        assert_eq!(result["echo"], json!("hi"));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error() {
        let registry = ToolRegistry::new();
        let err = registry.invoke("missing", &HashMap::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::ToolNotFound(_)));
    }

    #[tokio::test]
    async fn test_tool_failure_is_wrapped() {
        let registry = ToolRegistry::new();
        registry.register("flaky", Arc::new(FailingTool));

        let err = registry.invoke("flaky", &HashMap::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::Tool(_)));
        assert!(err.to_string().contains("flaky"));
    }
}
