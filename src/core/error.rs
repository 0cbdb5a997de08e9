//! 错误类型
//!
//! 信封校验、工具调度、工具循环、模型传输等错误统一为 AgentError；
//! 调度类错误（ToolNotFound / ParamValidation / Rejected）由注册表吸收进 ToolResult，不会中断对话。

use thiserror::Error;

/// 编排核心中可能出现的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    /// 多模态信封格式不合法（拒绝输入，绝不部分归一化）
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// 重复注册同名工具
    #[error("Duplicate tool: {0}")]
    DuplicateTool(String),

    #[error("Parameter validation failed: {0}")]
    ParamValidation(String),

    /// 能力自身的安全校验拒绝执行（如 Shell 拒绝规则命中）
    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    /// chat_with_tools 超过工具调用深度上限
    #[error("Tool loop exceeded: more than {limit} tool rounds")]
    ToolLoopExceeded { limit: usize },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Path escape attempt: {0}")]
    PathEscape(String),

    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::JsonParseError(e.to_string())
    }
}

impl From<config::ConfigError> for AgentError {
    fn from(e: config::ConfigError) -> Self {
        AgentError::ConfigError(e.to_string())
    }
}
