//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）、HTTP 传输、文本协议工具调用

pub mod deepseek;
pub mod mock;
pub mod openai;
pub mod tool_protocol;
pub mod traits;
pub mod transport;

use std::sync::Arc;

pub use deepseek::{create_deepseek_client, DEEPSEEK_CHAT, DEEPSEEK_REASONER};
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{LlmClient, LlmError, LlmOptions, LlmResponse, TokenStream};
pub use transport::{HttpMethod, HttpRequest, HttpResponse, ReqwestTransport, StreamingResponse, Transport};

use crate::config::LlmSection;

/// 按 [llm] 段创建客户端；缺少 API Key 或 provider 未知时退回 Mock
pub fn create_llm_from_config(cfg: &LlmSection) -> Arc<dyn LlmClient> {
    let options = cfg.options();
    match cfg.provider.to_lowercase().as_str() {
        "deepseek" => {
            let client = create_deepseek_client(
                cfg.model.as_deref(),
                cfg.api_key.as_deref(),
                cfg.base_url.as_deref(),
                options,
            );
            tracing::info!("Using DeepSeek LLM ({})", client.model());
            Arc::new(client)
        }
        "openai" => {
            let api_key = cfg
                .api_key
                .clone()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
            let Some(api_key) = api_key else {
                tracing::warn!("provider=openai but no API key set, using Mock LLM");
                return Arc::new(MockLlmClient::new());
            };
            let model = cfg.model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string());
            tracing::info!("Using OpenAI LLM ({})", model);
            Arc::new(
                OpenAiClient::new(cfg.base_url.as_deref(), &model, Some(api_key.as_str()))
                    .with_options(options),
            )
        }
        "mock" => Arc::new(MockLlmClient::new()),
        other => {
            tracing::warn!(provider = other, "unknown LLM provider, using Mock LLM");
            Arc::new(MockLlmClient::new())
        }
    }
}
