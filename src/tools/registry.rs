//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute），由 ToolRegistry 按名注册与查找。
//! 同名重复注册直接拒绝（DuplicateTool），不会静默覆盖。
//! dispatch 返回 Task<ToolResult>：未注册、参数校验失败、能力拒绝或失败都被吸收进 ToolResult，不向上抛错。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::core::{AgentError, Task};
use crate::media::{normalize, probe, try_parse_envelope_from_string, MediaEnvelope};
use crate::tools::executor;
use crate::tools::validate::ParamValidator;

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON）
///
/// execute 可返回任意 JSON：字符串、信封对象或结构化数据，由注册表统一归一化为 ToolResult。
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（用于 JSON 中的 "tool" 字段）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认不限参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, AgentError>;
}

/// 工具描述：名称（唯一键）、说明、参数 schema
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    pub fn of(tool: &dyn Tool) -> Self {
        Self::new(tool.name(), tool.description(), tool.parameters_schema())
    }
}

/// 工具结果载荷
#[derive(Debug, Clone, PartialEq)]
pub enum ToolPayload {
    Media(MediaEnvelope),
    Data(Value),
    Empty,
}

/// 一次工具调用的归一化结果
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub success: bool,
    pub payload: ToolPayload,
    pub error: Option<AgentError>,
}

impl ToolResult {
    pub fn ok(payload: ToolPayload) -> Self {
        Self {
            success: true,
            payload,
            error: None,
        }
    }

    pub fn failure(error: AgentError) -> Self {
        Self {
            success: false,
            payload: ToolPayload::Empty,
            error: Some(error),
        }
    }

    /// 把能力的原始输出归一化：字符串（可能是信封 JSON）、信封对象、结构化数据、空
    pub fn from_output(output: Value) -> Self {
        match output {
            Value::Null => Self::ok(ToolPayload::Empty),
            Value::String(s) => {
                let env = try_parse_envelope_from_string(&s).unwrap_or_else(|| MediaEnvelope::text(s));
                Self::ok(ToolPayload::Media(env))
            }
            v if probe(&v) => match normalize(&v) {
                Ok(env) => Self::ok(ToolPayload::Media(env)),
                Err(e) => Self::failure(e),
            },
            v => Self::ok(ToolPayload::Data(v)),
        }
    }

    /// 作为 Tool 消息的片段：失败为错误文本；结构化数据为 JSON 文本加其中内嵌的信封
    pub fn to_parts(&self) -> Vec<MediaEnvelope> {
        if let Some(err) = &self.error {
            return vec![MediaEnvelope::text(format!("Error: {err}"))];
        }
        match &self.payload {
            ToolPayload::Media(env) => vec![env.clone()],
            ToolPayload::Data(v) => {
                let mut parts = vec![MediaEnvelope::text(v.to_string())];
                parts.extend(embedded_media(v));
                parts
            }
            ToolPayload::Empty => vec![MediaEnvelope::text("(no output)")],
        }
    }

    /// 文本渲染（用于日志与纯文本消费者）
    pub fn text(&self) -> String {
        self.to_parts()
            .iter()
            .map(MediaEnvelope::describe)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn to_value(&self) -> Value {
        let payload = match &self.payload {
            ToolPayload::Media(env) => env.to_value(),
            ToolPayload::Data(v) => v.clone(),
            ToolPayload::Empty => Value::Null,
        };
        serde_json::json!({
            "success": self.success,
            "payload": payload,
            "error": self.error.as_ref().map(|e| e.to_string()),
        })
    }
}

/// 结构化数据顶层（对象的值、数组元素）中内嵌的信封
fn embedded_media(v: &Value) -> Vec<MediaEnvelope> {
    let candidates: Vec<&Value> = match v {
        Value::Object(map) => map
            .values()
            .flat_map(|x| match x {
                Value::Array(items) => items.iter().collect::<Vec<_>>(),
                other => vec![other],
            })
            .collect(),
        Value::Array(items) => items.iter().collect(),
        _ => Vec::new(),
    };
    candidates
        .into_iter()
        .filter(|c| probe(c))
        .filter_map(|c| normalize(c).ok())
        .collect()
}

/// 已注册的工具及其编译好的参数校验器
#[derive(Clone)]
pub(crate) struct RegisteredTool {
    pub(crate) tool: Arc<dyn Tool>,
    pub(crate) validator: Arc<ParamValidator>,
}

impl RegisteredTool {
    pub(crate) fn new(tool: Arc<dyn Tool>) -> Result<Self, AgentError> {
        let validator = ParamValidator::compile(&tool.parameters_schema()).map_err(|e| match e {
            AgentError::ParamValidation(msg) => AgentError::ParamValidation(format!("tool '{}': {}", tool.name(), msg)),
            other => other,
        })?;
        Ok(Self {
            tool,
            validator: Arc::new(validator),
        })
    }
}

/// 工具注册表：按名称存储工具与校验器（BTreeMap，描述列表顺序稳定）
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工具；同名已存在时返回 DuplicateTool，参数 schema 无法编译时返回 ParamValidation
    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), AgentError> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<(), AgentError> {
        let name = tool.name().to_string();
        if name.trim().is_empty() {
            return Err(AgentError::ParamValidation("tool name must not be empty".to_string()));
        }
        if self.tools.contains_key(&name) {
            return Err(AgentError::DuplicateTool(name));
        }
        self.tools.insert(name, RegisteredTool::new(tool)?);
        Ok(())
    }

    /// 合并另一个注册表；任一重名则整体拒绝，本表不变
    pub fn merge(&mut self, other: &ToolRegistry) -> Result<(), AgentError> {
        if let Some(dup) = other.tools.keys().find(|k| self.tools.contains_key(*k)) {
            return Err(AgentError::DuplicateTool(dup.clone()));
        }
        for (name, entry) in &other.tools {
            self.tools.insert(name.clone(), entry.clone());
        }
        Ok(())
    }

    /// 查找；不存在不是错误，由调用方判断
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|entry| entry.tool.clone())
    }

    pub fn remove(&mut self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.remove(name).map(|entry| entry.tool)
    }

    pub fn clear(&mut self) {
        self.tools.clear();
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.values().map(|entry| ToolDescriptor::of(entry.tool.as_ref())).collect()
    }

    /// 工具目录 JSON（name / description / parameters）
    pub fn to_schema_json(&self) -> String {
        serde_json::to_string_pretty(&self.descriptors()).unwrap_or_else(|_| "[]".to_string())
    }

    /// 调度：查找 -> 参数校验 -> 执行 -> 归一化；注册表本身不保留任何调用状态
    pub fn dispatch(&self, name: &str, params: Value) -> Task<'static, ToolResult> {
        let entry = self.tools.get(name).cloned();
        let name = name.to_string();
        Task::new(executor::execute(name, entry, params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::EchoTool;
    use serde_json::json;

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool).unwrap();
        let err = reg.register(EchoTool).unwrap_err();
        assert_eq!(err, AgentError::DuplicateTool("echo".to_string()));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_lookup_remove_clear() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool).unwrap();
        assert!(reg.lookup("echo").is_some());
        assert!(reg.lookup("nope").is_none());
        assert!(reg.remove("echo").is_some());
        assert!(reg.is_empty());
        reg.register(EchoTool).unwrap();
        reg.clear();
        assert!(!reg.contains("echo"));
    }

    #[test]
    fn test_merge_is_all_or_nothing() {
        let mut a = ToolRegistry::new();
        a.register(EchoTool).unwrap();
        let mut b = ToolRegistry::new();
        b.register(EchoTool).unwrap();
        assert!(matches!(a.merge(&b), Err(AgentError::DuplicateTool(_))));
        assert_eq!(a.len(), 1);
        let mut c = ToolRegistry::new();
        c.merge(&a).unwrap();
        assert!(c.contains("echo"));
    }

    struct Bounded;

    #[async_trait]
    impl Tool for Bounded {
        fn name(&self) -> &str {
            "bounded"
        }

        fn description(&self) -> &str {
            "accepts a positive count and string tags"
        }

        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {
                    "n": {"type": "integer", "minimum": 1},
                    "opts": {"type": "object", "required": ["k"]},
                    "tags": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["n"]
            })
        }

        async fn execute(&self, args: Value) -> Result<Value, AgentError> {
            Ok(args)
        }
    }

    struct BadSchema;

    #[async_trait]
    impl Tool for BadSchema {
        fn name(&self) -> &str {
            "bad_schema"
        }

        fn description(&self) -> &str {
            "declares an uncompilable schema"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": 42})
        }

        async fn execute(&self, _args: Value) -> Result<Value, AgentError> {
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn test_dispatch_enforces_declared_schema() {
        let mut reg = ToolRegistry::new();
        reg.register(Bounded).unwrap();
        assert!(reg.dispatch("bounded", json!({"n": 2, "tags": ["a"]})).await.success);
        for bad in [
            json!({"n": -5}),
            json!({"n": 1, "opts": {}}),
            json!({"n": 1, "tags": [1, 2]}),
        ] {
            let r = reg.dispatch("bounded", bad.clone()).await;
            assert!(matches!(r.error, Some(AgentError::ParamValidation(_))), "{bad}");
        }
    }

    #[test]
    fn test_uncompilable_schema_rejected_at_registration() {
        let mut reg = ToolRegistry::new();
        let err = reg.register(BadSchema).unwrap_err();
        assert!(matches!(err, AgentError::ParamValidation(ref m) if m.contains("bad_schema")));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_schema_json_lists_descriptors() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool).unwrap();
        let v: Value = serde_json::from_str(&reg.to_schema_json()).unwrap();
        assert_eq!(v[0]["name"], "echo");
        assert_eq!(v[0]["parameters"]["required"][0], "text");
    }

    #[test]
    fn test_output_normalization() {
        let r = ToolResult::from_output(json!("plain"));
        assert_eq!(r.payload, ToolPayload::Media(MediaEnvelope::text("plain")));

        let r = ToolResult::from_output(json!({"type": "image", "mime": "image/png", "uri": "https://x.test/a.png"}));
        assert!(matches!(r.payload, ToolPayload::Media(ref e) if !e.is_text()));

        let r = ToolResult::from_output(json!({"type": "image", "uri": "https://x.test/a.png"}));
        assert!(!r.success);
        assert!(matches!(r.error, Some(AgentError::InvalidEnvelope(_))));

        let r = ToolResult::from_output(Value::Null);
        assert_eq!(r.payload, ToolPayload::Empty);

        let r = ToolResult::from_output(json!({
            "caption": "chart",
            "media": [{"type": "image", "mime": "image/png", "data": "aGVsbG8="}]
        }));
        assert!(matches!(r.payload, ToolPayload::Data(_)));
        let parts = r.to_parts();
        assert_eq!(parts.len(), 2);
        assert!(!parts[1].is_text());
    }

    #[test]
    fn test_failure_parts_and_value() {
        let r = ToolResult::failure(AgentError::Rejected("rm".into()));
        assert_eq!(r.to_parts()[0].text_content(), Some("Error: Rejected: rm"));
        let v = r.to_value();
        assert_eq!(v["success"], false);
        assert_eq!(v["error"], "Rejected: rm");
    }
}
