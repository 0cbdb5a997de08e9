//! summarize：调用模型对给定文本做摘要（不读写任何对话历史）

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::tools::Tool;

const DEFAULT_MAX_WORDS: u64 = 120;

pub struct SummarizeTool {
    llm: Arc<dyn LlmClient>,
}

impl SummarizeTool {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Tool for SummarizeTool {
    fn name(&self) -> &str {
        "summarize"
    }

    fn description(&self) -> &str {
        "Summarize a piece of text. Args: {\"text\": \"...\", \"max_words\": optional integer}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "text": {"type": "string", "description": "Text to summarize"},
                "max_words": {"type": "integer", "description": "Upper bound on summary length"}
            },
            "required": ["text"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, AgentError> {
        let text = args.get("text").and_then(Value::as_str).unwrap_or("");
        if text.trim().is_empty() {
            return Ok(Value::String(String::new()));
        }
        let max_words = args
            .get("max_words")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_MAX_WORDS);
        let messages = [
            Message::system(format!(
                "Summarize the user's text in at most {max_words} words. Reply with the summary only."
            )),
            Message::user(text),
        ];
        let resp = self.llm.chat(&messages).await?;
        Ok(Value::String(resp.content.trim().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use serde_json::json;

    #[tokio::test]
    async fn test_summarize_uses_model() {
        let tool = SummarizeTool::new(Arc::new(MockLlmClient::new()));
        let out = tool.execute(json!({"text": "long text here"})).await.unwrap();
        assert_eq!(out, json!("Echo: long text here"));
        let out = tool.execute(json!({"text": "  "})).await.unwrap();
        assert_eq!(out, json!(""));
    }
}
