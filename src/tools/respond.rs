//! Respond 工具：模型通过它给出最终回答（可附带媒体）

use async_trait::async_trait;
use serde_json::Value;

use crate::core::AgentError;
use crate::media::{normalize, MediaEnvelope};
use crate::tools::Tool;

pub struct RespondTool;

#[async_trait]
impl Tool for RespondTool {
    fn name(&self) -> &str {
        "respond"
    }

    fn description(&self) -> &str {
        "Give the final answer to the user. Args: {\"text\": \"answer\", \"media\": [optional envelopes]}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "text": {"type": "string", "description": "Final answer text"},
                "media": {"type": "array", "description": "Optional media envelopes to attach"}
            },
            "required": ["text"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, AgentError> {
        let text = args.get("text").and_then(Value::as_str).unwrap_or_default();
        let media = match args.get("media").and_then(Value::as_array) {
            Some(items) if !items.is_empty() => items
                .iter()
                .map(|v| normalize(v).map(|e| e.to_value()))
                .collect::<Result<Vec<_>, _>>()?,
            _ => return Ok(MediaEnvelope::text(text).to_value()),
        };
        Ok(serde_json::json!({"text": text, "media": media}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ToolPayload, ToolResult};
    use serde_json::json;

    #[tokio::test]
    async fn test_plain_answer_is_text_envelope() {
        let out = RespondTool.execute(json!({"text": "42"})).await.unwrap();
        let r = ToolResult::from_output(out);
        assert_eq!(r.payload, ToolPayload::Media(MediaEnvelope::text("42")));
    }

    #[tokio::test]
    async fn test_media_attachments_normalized_or_rejected() {
        let out = RespondTool
            .execute(json!({"text": "see", "media": [{"type": "IMAGE", "mime": "image/png", "uri": "https://x.test/a.png"}]}))
            .await
            .unwrap();
        assert_eq!(out["media"][0]["type"], "image");
        assert_eq!(ToolResult::from_output(out).to_parts().len(), 2);

        let err = RespondTool
            .execute(json!({"text": "x", "media": [{"type": "image"}]}))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidEnvelope(_)));
    }
}
