//! FunctionTool：闭包实现的能力（同步回调）

use async_trait::async_trait;
use serde_json::Value;

use crate::core::AgentError;
use crate::tools::Tool;

type Callback = dyn Fn(Value) -> Result<Value, AgentError> + Send + Sync;

/// 把一个同步函数包装成工具
pub struct FunctionTool {
    name: String,
    description: String,
    parameters: Value,
    callback: Box<Callback>,
}

impl FunctionTool {
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, parameters: Value, callback: F) -> Self
    where
        F: Fn(Value) -> Result<Value, AgentError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            callback: Box::new(callback),
        }
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.parameters.clone()
    }

    async fn execute(&self, args: Value) -> Result<Value, AgentError> {
        (self.callback)(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolRegistry;
    use serde_json::json;

    #[tokio::test]
    async fn test_closure_dispatch() {
        let add = FunctionTool::new(
            "add",
            "Add two numbers",
            json!({"type": "object", "properties": {"a": {"type": "number"}, "b": {"type": "number"}}, "required": ["a", "b"]}),
            |args| {
                let a = args["a"].as_f64().unwrap_or_default();
                let b = args["b"].as_f64().unwrap_or_default();
                Ok(json!({"sum": a + b}))
            },
        );
        let mut reg = ToolRegistry::new();
        reg.register(add).unwrap();
        let r = reg.dispatch("add", json!({"a": 2, "b": 3.5})).await;
        assert!(r.success);
        assert_eq!(r.to_value()["payload"]["sum"], 5.5);

        let r = reg.dispatch("add", json!({"a": 2})).await;
        assert!(matches!(r.error, Some(AgentError::ParamValidation(_))));
    }
}
