//! echo：原样返回文本，用于联调工具循环

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::AgentError;
use crate::tools::Tool;

pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Return the given text unchanged. Args: {\"text\": \"message\"}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"text": {"type": "string"}},
            "required": ["text"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, AgentError> {
        Ok(args.get("text").cloned().unwrap_or(Value::Null))
    }
}
