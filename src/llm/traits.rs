//! 模型端点抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 LlmClient：chat、chat_with_tools、stream_chat、upload_media。
//! 核心只依赖此 trait，从不接触任何厂商的请求/响应格式。

use std::collections::HashMap;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{stream, Stream};
use serde::Serialize;
use thiserror::Error;

use crate::core::AgentError;
use crate::llm::tool_protocol;
use crate::media::MediaEnvelope;
use crate::memory::{Message, ToolCall};
use crate::tools::ToolDescriptor;

/// 模型调用错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    /// 传输层失败（连接、超时、HTTP 状态）
    #[error("transport: {0}")]
    Transport(String),

    /// 端点返回了错误或无法理解的响应
    #[error("provider: {0}")]
    Provider(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl From<LlmError> for AgentError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Transport(msg) => AgentError::Transport(msg),
            other => AgentError::LlmError(other.to_string()),
        }
    }
}

/// 模型响应：文本内容、请求的工具调用、用量统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LlmResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: HashMap<String, f64>,
}

impl LlmResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = calls;
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// 调用参数
#[derive(Debug, Clone, PartialEq)]
pub struct LlmOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub timeout: Duration,
    pub stop_sequences: Vec<String>,
}

impl Default for LlmOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1024,
            top_p: 1.0,
            timeout: Duration::from_secs(30),
            stop_sequences: Vec::new(),
        }
    }
}

/// 流式文本块
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// LLM 客户端 trait
///
/// 实现方只需提供 chat；chat_with_tools 默认走文本协议（工具目录与调用格式写入 system，
/// 回复中的 `{"tool": ..., "args": ...}` 解析为工具调用），支持原生工具调用的端点可覆盖。
/// 同一个客户端可被多个 Context 共享（Arc），因此实现必须可重入。
#[async_trait]
pub trait LlmClient: Send + Sync {
    fn model(&self) -> &str {
        "unknown"
    }

    /// 非流式完成
    async fn chat(&self, messages: &[Message]) -> Result<LlmResponse, LlmError>;

    /// 带工具目录的完成；响应可能携带 tool_calls
    async fn chat_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<LlmResponse, LlmError> {
        if tools.is_empty() {
            return self.chat(messages).await;
        }
        let request = tool_protocol::with_tool_prompt(messages, tools);
        let response = self.chat(&request).await?;
        Ok(tool_protocol::extract_tool_calls(response))
    }

    /// 流式完成；默认把完整回复作为单个块返回
    async fn stream_chat(&self, messages: &[Message]) -> Result<TokenStream, LlmError> {
        let response = self.chat(messages).await?;
        Ok(Box::pin(stream::iter(vec![Ok(response.content)])))
    }

    /// 将本地媒体上传到端点自己的文件存储，返回引用它的信封；默认不支持
    async fn upload_media(
        &self,
        _local_path: &Path,
        _mime: &str,
        _bytes: Option<&[u8]>,
    ) -> Result<Option<MediaEnvelope>, LlmError> {
        Ok(None)
    }

    /// 累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
