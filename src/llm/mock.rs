//! Mock LLM 客户端（用于测试与离线运行，无需 API）
//!
//! 取最后一条 User 消息回显为 `Echo: ...`；流式按单词切块。

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures_util::stream;

use crate::llm::{LlmClient, LlmError, LlmResponse, TokenStream};
use crate::memory::{Message, Role};

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient {
    calls: AtomicU64,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已处理的调用次数
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn reply(&self, messages: &[Message]) -> String {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(Message::render_text)
            .unwrap_or_else(|| "(no input)".to_string());
        format!("Echo: {}", last_user)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn model(&self) -> &str {
        "mock"
    }

    async fn chat(&self, messages: &[Message]) -> Result<LlmResponse, LlmError> {
        Ok(LlmResponse::text(self.reply(messages)))
    }

    async fn stream_chat(&self, messages: &[Message]) -> Result<TokenStream, LlmError> {
        let content = self.reply(messages);
        let mut chunks = Vec::new();
        let mut rest = content.as_str();
        while !rest.is_empty() {
            let cut = rest
                .char_indices()
                .skip(1)
                .find(|(_, c)| *c == ' ')
                .map(|(i, _)| i)
                .unwrap_or(rest.len());
            chunks.push(Ok(rest[..cut].to_string()));
            rest = &rest[cut..];
        }
        Ok(Box::pin(stream::iter(chunks)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn test_echoes_last_user_message() {
        let llm = MockLlmClient::new();
        let msgs = vec![
            Message::system("sys"),
            Message::user("first"),
            Message::assistant("x"),
            Message::user("second"),
        ];
        let resp = llm.chat(&msgs).await.unwrap();
        assert_eq!(resp.content, "Echo: second");
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_stream_chunks_reassemble() {
        let llm = MockLlmClient::new();
        let chunks: Vec<String> = llm
            .stream_chat(&[Message::user("a b c")])
            .await
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks, vec!["Echo:", " a", " b", " c"]);
        assert_eq!(chunks.concat(), "Echo: a b c");
    }
}
