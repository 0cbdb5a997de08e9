//! 文本协议工具调用
//!
//! 不支持原生工具调用的端点：把工具目录与调用格式（schemars 生成的 JSON Schema）写入 system，
//! 再从回复中解析 `{"tool": "...", "args": {...}}`。解析失败视为普通回答，不报错。

use serde::Deserialize;
use serde_json::Value;

use crate::llm::LlmResponse;
use crate::memory::{Message, Role, ToolCall};
use crate::tools::{tool_call_schema_json, ToolDescriptor};

#[derive(Debug, Deserialize)]
struct TextToolCall {
    #[serde(default)]
    tool: String,
    #[serde(default)]
    args: Value,
}

/// 工具目录与调用格式说明
pub fn build_tool_prompt(tools: &[ToolDescriptor]) -> String {
    let mut prompt = String::from("Available tools:\n");
    for t in tools {
        prompt.push_str(&format!(
            "- {}: {}\n  parameters: {}\n",
            t.name, t.description, t.parameters
        ));
    }
    prompt.push_str(
        "\nTo call a tool, reply with ONLY a JSON object matching this schema:\n",
    );
    prompt.push_str(&tool_call_schema_json());
    prompt.push_str("\nOtherwise reply with the final answer as plain text.");
    prompt
}

/// 在已有 system 消息后追加工具说明；没有 system 消息则在最前插入一条
pub fn with_tool_prompt(messages: &[Message], tools: &[ToolDescriptor]) -> Vec<Message> {
    let tool_prompt = build_tool_prompt(tools);
    let mut out: Vec<Message> = messages.iter().map(render_for_text_endpoint).collect();
    match out.iter_mut().find(|m| m.role == Role::System) {
        Some(system) => {
            let merged = format!("{}\n\n{}", system.text(), tool_prompt);
            *system = Message::system(merged);
        }
        None => out.insert(0, Message::system(tool_prompt)),
    }
    out
}

/// 文本端点看不到 tool_calls 字段：assistant 的调用请求渲染回 JSON，tool 结果渲染为 Observation
pub fn render_for_text_endpoint(msg: &Message) -> Message {
    match msg.role {
        Role::Assistant if !msg.tool_calls.is_empty() => {
            let calls: Vec<String> = msg
                .tool_calls
                .iter()
                .map(|c| serde_json::json!({"tool": c.name, "args": c.arguments}).to_string())
                .collect();
            Message::assistant(calls.join("\n"))
        }
        Role::Tool => Message::user(format!(
            "Observation (tool `{}`): {}",
            msg.name.as_deref().unwrap_or("unknown"),
            msg.render_text()
        )),
        _ => msg.clone(),
    }
}

/// 提取 JSON 块（```json ... ``` 或首个 `{` 到最后一个 `}`）
pub fn extract_json_block(output: &str) -> Option<&str> {
    let trimmed = output.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// 解析单个工具调用；不是调用格式则返回 None
pub fn parse_tool_call(output: &str) -> Option<ToolCall> {
    let json = extract_json_block(output)?;
    let parsed: TextToolCall = serde_json::from_str(json).ok()?;
    if parsed.tool.trim().is_empty() {
        return None;
    }
    let args = match parsed.args {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    Some(ToolCall::new(parsed.tool.trim(), args))
}

/// 把文本回复中的调用请求移入 tool_calls
pub fn extract_tool_calls(mut response: LlmResponse) -> LlmResponse {
    if response.has_tool_calls() {
        return response;
    }
    if let Some(call) = parse_tool_call(&response.content) {
        response.tool_calls.push(call);
    }
    response
}
