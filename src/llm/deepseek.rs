//! DeepSeek 预设：OpenAI 兼容端点 + 默认模型 + 环境变量回退
//!
//! 模型：deepseek-chat（常规对话）、deepseek-reasoner（思考模式）

use crate::llm::{LlmOptions, OpenAiClient};

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";
pub const DEEPSEEK_REASONER: &str = "deepseek-reasoner";

/// 显式值优先，其次依次尝试环境变量
fn first_of(explicit: Option<&str>, env_keys: &[&str]) -> Option<String> {
    explicit
        .filter(|s| !s.trim().is_empty())
        .map(String::from)
        .or_else(|| env_keys.iter().find_map(|k| std::env::var(k).ok()))
}

/// 创建 DeepSeek 客户端
///
/// - api_key：参数 > `DEEPSEEK_API_KEY` > `OPENAI_API_KEY`
/// - model：参数 > `DEEPSEEK_MODEL` > `deepseek-chat`
/// - base_url：参数 > 官方地址（便于走代理）
pub fn create_deepseek_client(
    model: Option<&str>,
    api_key: Option<&str>,
    base_url: Option<&str>,
    options: LlmOptions,
) -> OpenAiClient {
    let api_key = first_of(api_key, &["DEEPSEEK_API_KEY", "OPENAI_API_KEY"]);
    let model = first_of(model, &["DEEPSEEK_MODEL"]).unwrap_or_else(|| DEEPSEEK_CHAT.to_string());
    let base_url = base_url.unwrap_or(DEEPSEEK_BASE_URL);
    if api_key.is_none() {
        tracing::warn!("no DeepSeek API key configured, requests will be rejected by the endpoint");
    }
    OpenAiClient::new(Some(base_url), &model, api_key.as_deref()).with_options(options)
}
