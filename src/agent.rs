//! 无界面运行时装配
//!
//! build_context 按配置创建模型句柄、准备工作目录并注册内置工具，
//! process_message 对单条用户输入跑一次带工具的对话并返回最终回复。

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::AppConfig;
use crate::context::Context;
use crate::core::AgentError;
use crate::llm::{create_llm_from_config, ReqwestTransport};
use crate::tools::{
    EchoTool, FileReadTool, FileWriteTool, MediaLoaderTool, RespondTool, SafeFs, ShellTool, SummarizeTool,
};

/// 从配置构建会话上下文：respond / echo / shell / file_read / file_write / media_loader / summarize
pub fn build_context(cfg: &AppConfig) -> Result<Context, AgentError> {
    let llm = create_llm_from_config(&cfg.llm);

    let root = cfg.tools.workspace_root();
    std::fs::create_dir_all(&root)
        .map_err(|e| AgentError::ConfigError(format!("cannot create workspace {}: {}", root.display(), e)))?;
    let fs = SafeFs::new(&root, cfg.tools.max_file_bytes);

    let mut ctx = Context::new(llm.clone())
        .with_system_prompt(cfg.context.system_prompt.clone())
        .with_max_tool_depth(cfg.context.max_tool_depth);

    ctx.register_tool(RespondTool)?;
    ctx.register_tool(EchoTool)?;
    ctx.register_tool(ShellTool::new(
        cfg.tools.shell.allowed_commands.clone(),
        cfg.tools.shell.timeout_secs,
    ))?;
    ctx.register_tool(FileReadTool::new(fs.clone()))?;
    ctx.register_tool(FileWriteTool::new(fs.clone()))?;
    ctx.register_tool(
        MediaLoaderTool::new(
            fs,
            Arc::new(ReqwestTransport::new()),
            cfg.tools.media.max_bytes,
            Duration::from_secs(cfg.tools.media.fetch_timeout_secs),
        )
        .with_uploader(llm.clone()),
    )?;
    ctx.register_tool(SummarizeTool::new(llm))?;

    info!(
        model = %ctx.llm().model(),
        tools = ?ctx.registry().tool_names(),
        workspace = %root.display(),
        "context ready"
    );
    Ok(ctx)
}

/// 单轮处理：带工具对话，返回最终文本
pub async fn process_message(ctx: &mut Context, input: &str) -> Result<String, AgentError> {
    let response = ctx.chat_with_tools(input, Vec::new()).await?;
    Ok(response.content)
}

/// 附带媒体的单轮处理；media_refs 为 '|' 分隔的 URI 或 data URL，任何一个无法识别则整轮不发送
pub async fn process_message_with_media(
    ctx: &mut Context,
    input: &str,
    media_refs: &str,
) -> Result<String, AgentError> {
    let refs: Vec<&str> = media_refs
        .split('|')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    let media = Context::parse_media(&refs)?;
    let response = ctx.chat_with_tools(input, media).await?;
    Ok(response.content)
}
