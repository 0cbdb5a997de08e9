//! Hive - Rust 智能体编排核心
//!
//! 模块划分：
//! - **agent**: 按配置装配上下文与内置工具
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **context**: 会话上下文（模型句柄 + 工具注册表 + 对话历史）
//! - **core**: 错误类型、Task、AsyncGenerator
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）、HTTP 传输
//! - **media**: 多模态信封与归一化
//! - **memory**: 对话消息与短期记忆
//! - **observability**: tracing 初始化
//! - **tools**: 能力 trait、注册表、参数校验与内置工具
//! - **workflow**: 评估-优化、链式提示、并行工作流

pub mod agent;
pub mod config;
pub mod context;
pub mod core;
pub mod llm;
pub mod media;
pub mod memory;
pub mod observability;
pub mod tools;
pub mod workflow;

pub use context::Context;
pub use core::{AgentError, AsyncGenerator, Task};
pub use media::MediaEnvelope;
