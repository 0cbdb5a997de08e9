//! 工具调用 JSON Schema 生成（schemars）
//!
//! 文本协议端点把「合法 tool call」的 JSON 结构写入 system prompt，减少模型输出格式错误。

use schemars::{schema_for, JsonSchema};
use serde_json::{Map, Value};

/// 工具调用请求格式：`{"tool": "...", "args": {...}}`（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// 工具名，必须是 Available tools 中列出的名称
    tool: String,
    /// 工具参数对象，需满足该工具的 parameters schema
    args: Map<String, Value>,
}

/// 返回工具调用的 JSON Schema 字符串，可拼入 system prompt
pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ToolCallFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}
