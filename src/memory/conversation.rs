//! 短期记忆：对话历史
//!
//! 每条消息由若干信封片段组成（文本、图片等）；历史只追加，不原地修改。
//! Context 独占持有，调用失败时可截断回调用前的长度。

use serde::{Deserialize, Serialize};

use crate::media::MediaEnvelope;

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// 模型请求的一次工具调用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

impl ToolCall {
    /// 无 id 的调用（如文本协议解析得到的）生成 `call_<uuid>`
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            name: name.into(),
            arguments,
        }
    }
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<MediaEnvelope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Tool 消息对应的调用 id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Assistant 消息发起的工具调用
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl Message {
    pub fn new(role: Role, parts: Vec<MediaEnvelope>) -> Self {
        Self {
            role,
            parts,
            name: None,
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, vec![MediaEnvelope::text(content)])
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![MediaEnvelope::text(content)])
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, vec![MediaEnvelope::text(content)])
    }

    pub fn tool(name: impl Into<String>, call_id: impl Into<String>, parts: Vec<MediaEnvelope>) -> Self {
        Self {
            name: Some(name.into()),
            tool_call_id: Some(call_id.into()),
            ..Self::new(Role::Tool, parts)
        }
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = calls;
        self
    }

    /// 所有文本片段拼接
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| p.text_content().filter(|_| p.is_text()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// 全部片段的纯文本渲染（非文本片段用简短描述代替）
    pub fn render_text(&self) -> String {
        self.parts
            .iter()
            .map(MediaEnvelope::describe)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn has_media(&self) -> bool {
        self.parts.iter().any(|p| !p.is_text())
    }
}

/// 对话历史：只追加；truncate 仅用于失败回滚
#[derive(Clone, Debug, Default)]
pub struct ConversationMemory {
    messages: Vec<Message>,
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// 回滚到指定长度（调用前记录的 len）
    pub fn truncate(&mut self, len: usize) {
        self.messages.truncate(len);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
