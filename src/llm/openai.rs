//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；支持 DeepSeek、OpenAI、自建代理等。
//! 用户侧的图片以 image_url 片段发送（uri 或 data URL），wav / mp3 内联音频以 input_audio 发送，
//! 其余媒体以文本描述代替；工具调用走 LlmClient 默认的文本协议。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestMessageContentPartAudio, ChatCompletionRequestMessageContentPartImage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionRequestUserMessageContent, ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequest,
    CreateChatCompletionRequestArgs, InputAudio, InputAudioFormat,
};
use async_openai::Client;
use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::debug;

use crate::llm::tool_protocol::render_for_text_endpoint;
use crate::llm::{LlmClient, LlmError, LlmOptions, LlmResponse, TokenStream};
use crate::media::{MediaEnvelope, MediaKind};
use crate::memory::{Message, Role};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

fn map_openai_error(e: OpenAIError) -> LlmError {
    match e {
        OpenAIError::Reqwest(inner) => LlmError::Transport(inner.to_string()),
        other => LlmError::Provider(other.to_string()),
    }
}

/// 在首个停止序列处截断
fn apply_stop_sequences(mut content: String, stops: &[String]) -> String {
    let cut = stops
        .iter()
        .filter(|s| !s.is_empty())
        .filter_map(|s| content.find(s.as_str()))
        .min();
    if let Some(idx) = cut {
        content.truncate(idx);
    }
    content
}

fn text_part(text: String) -> ChatCompletionRequestUserMessageContentPart {
    ChatCompletionRequestUserMessageContentPart::Text(text.into())
}

fn audio_format(mime: Option<&str>) -> Option<InputAudioFormat> {
    match mime? {
        "audio/wav" | "audio/x-wav" | "audio/wave" => Some(InputAudioFormat::Wav),
        "audio/mpeg" | "audio/mp3" => Some(InputAudioFormat::Mp3),
        _ => None,
    }
}

/// 单个信封对应的 content parts；带说明文字的媒体先给出说明
fn content_parts(env: &MediaEnvelope) -> Vec<ChatCompletionRequestUserMessageContentPart> {
    let media = match env.kind() {
        MediaKind::Image => {
            let url = match (env.uri(), env.data()) {
                (Some(uri), _) => Some(uri.to_string()),
                (None, Some(data)) => Some(format!("data:{};base64,{}", env.mime().unwrap_or_default(), data)),
                (None, None) => None,
            };
            url.map(|url| {
                ChatCompletionRequestUserMessageContentPart::ImageUrl(ChatCompletionRequestMessageContentPartImage {
                    image_url: url.into(),
                })
            })
        }
        MediaKind::Audio => match (env.data(), audio_format(env.mime())) {
            (Some(data), Some(format)) => Some(ChatCompletionRequestUserMessageContentPart::InputAudio(
                ChatCompletionRequestMessageContentPartAudio {
                    input_audio: InputAudio {
                        data: data.to_string(),
                        format,
                    },
                },
            )),
            _ => None,
        },
        _ => None,
    };
    match media {
        Some(part) => {
            let mut parts: Vec<_> = env.text_content().map(|t| text_part(t.to_string())).into_iter().collect();
            parts.push(part);
            parts
        }
        None => vec![text_part(env.describe())],
    }
}

/// 用户侧内容：全是文本时为字符串，含媒体时为 content parts 数组
fn user_content(parts: &[MediaEnvelope]) -> ChatCompletionRequestUserMessageContent {
    if parts.iter().all(MediaEnvelope::is_text) {
        let text = parts.iter().map(MediaEnvelope::describe).collect::<Vec<_>>().join("\n");
        return ChatCompletionRequestUserMessageContent::Text(text);
    }
    ChatCompletionRequestUserMessageContent::Array(parts.iter().flat_map(content_parts).collect())
}

/// OpenAI 兼容客户端：持有 Client、model 名与调用参数
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    options: LlmOptions,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = match base_url {
            Some(url) => OpenAIConfig::new().with_api_base(url).with_api_key(api_key),
            None => OpenAIConfig::new().with_api_key(api_key),
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            options: LlmOptions::default(),
            usage: TokenUsage::new(),
        }
    }

    pub fn with_options(mut self, options: LlmOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &LlmOptions {
        &self.options
    }

    fn to_openai_messages(
        &self,
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        messages
            .iter()
            .map(|original| {
                let m = render_for_text_endpoint(original);
                let content = m.render_text();
                let msg = match m.role {
                    Role::System => ChatCompletionRequestMessage::System(
                        ChatCompletionRequestSystemMessageArgs::default()
                            .content(content)
                            .build()
                            .map_err(map_openai_error)?,
                    ),
                    Role::User | Role::Tool => {
                        // 工具结果渲染成 Observation 文本后，原结果中的媒体片段接在其后
                        let parts = if original.role == Role::Tool {
                            let mut parts = m.parts.clone();
                            parts.extend(original.parts.iter().filter(|p| !p.is_text()).cloned());
                            parts
                        } else {
                            m.parts.clone()
                        };
                        ChatCompletionRequestMessage::User(
                            ChatCompletionRequestUserMessageArgs::default()
                                .content(user_content(&parts))
                                .build()
                                .map_err(map_openai_error)?,
                        )
                    }
                    Role::Assistant => ChatCompletionRequestMessage::Assistant(
                        ChatCompletionRequestAssistantMessageArgs::default()
                            .content(content)
                            .build()
                            .map_err(map_openai_error)?,
                    ),
                };
                Ok(msg)
            })
            .collect()
    }

    fn build_request(&self, messages: &[Message]) -> Result<CreateChatCompletionRequest, LlmError> {
        CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(self.to_openai_messages(messages)?)
            .temperature(self.options.temperature)
            .top_p(self.options.top_p)
            .max_completion_tokens(self.options.max_tokens)
            .build()
            .map_err(map_openai_error)
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn model(&self) -> &str {
        &self.model
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn chat(&self, messages: &[Message]) -> Result<LlmResponse, LlmError> {
        let request = self.build_request(messages)?;
        debug!(model = %self.model, messages = messages.len(), "chat request");

        let response = tokio::time::timeout(self.options.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| {
                LlmError::Transport(format!("request timed out after {:?}", self.options.timeout))
            })?
            .map_err(map_openai_error)?;

        let mut usage = HashMap::new();
        if let Some(u) = &response.usage {
            self.usage.add(u.prompt_tokens as u64, u.completion_tokens as u64);
            usage.insert("prompt_tokens".to_string(), u.prompt_tokens as f64);
            usage.insert("completion_tokens".to_string(), u.completion_tokens as f64);
            usage.insert("total_tokens".to_string(), u.total_tokens as f64);
        }

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| LlmError::Provider("response has no message content".to_string()))?;

        Ok(LlmResponse {
            content: apply_stop_sequences(content, &self.options.stop_sequences),
            tool_calls: Vec::new(),
            usage,
        })
    }

    async fn stream_chat(&self, messages: &[Message]) -> Result<TokenStream, LlmError> {
        let request = self.build_request(messages)?;
        debug!(model = %self.model, messages = messages.len(), "stream request");

        let stream = tokio::time::timeout(self.options.timeout, self.client.chat().create_stream(request))
            .await
            .map_err(|_| {
                LlmError::Transport(format!("request timed out after {:?}", self.options.timeout))
            })?
            .map_err(map_openai_error)?;

        let chunks = stream.filter_map(|item| async move {
            match item {
                Ok(resp) => resp
                    .choices
                    .first()
                    .and_then(|c| c.delta.content.clone())
                    .filter(|s| !s.is_empty())
                    .map(Ok),
                Err(e) => Some(Err(map_openai_error(e))),
            }
        });
        Ok(Box::pin(chunks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_sequences_truncate_at_earliest() {
        let stops = vec!["END".to_string(), "##".to_string()];
        assert_eq!(apply_stop_sequences("abc ## def END".into(), &stops), "abc ");
        assert_eq!(apply_stop_sequences("no stop".into(), &stops), "no stop");
        assert_eq!(apply_stop_sequences("x".into(), &[String::new()]), "x");
    }

    #[test]
    fn test_message_conversion_covers_all_roles() {
        let client = OpenAiClient::new(Some("http://127.0.0.1:9"), "test-model", Some("sk-test"));
        let msgs = vec![
            Message::system("sys"),
            Message::new(
                Role::User,
                vec![
                    MediaEnvelope::text("see"),
                    MediaEnvelope::image_uri("https://x.test/a.png", "image/png").unwrap(),
                ],
            ),
            Message::assistant("ok"),
            Message::tool("echo", "call_1", vec![MediaEnvelope::text("done")]),
        ];
        let converted = client.to_openai_messages(&msgs).unwrap();
        assert_eq!(converted.len(), 4);
        assert!(matches!(converted[0], ChatCompletionRequestMessage::System(_)));
        assert!(matches!(converted[3], ChatCompletionRequestMessage::User(_)));
        assert_eq!(client.model(), "test-model");
    }

    #[test]
    fn test_media_parts_reach_the_request() {
        let client = OpenAiClient::new(Some("http://127.0.0.1:9"), "test-model", Some("sk-test"));
        let msgs = vec![
            Message::new(
                Role::User,
                vec![
                    MediaEnvelope::text("what is in these?"),
                    MediaEnvelope::image_uri("https://x.test/a.png", "image/png").unwrap(),
                    MediaEnvelope::image_data("aGVsbG8=", "image/png").unwrap(),
                    MediaEnvelope::audio_data("UklGRg==", "audio/wav").unwrap(),
                    MediaEnvelope::video_uri("https://x.test/v.mp4", "video/mp4").unwrap(),
                ],
            ),
            Message::tool(
                "media_loader",
                "call_1",
                vec![MediaEnvelope::image_data("aGVsbG8=", "image/jpeg").unwrap()],
            ),
            Message::user("plain"),
        ];
        let request = serde_json::to_value(client.build_request(&msgs).unwrap()).unwrap();

        let content = &request["messages"][0]["content"];
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[0]["text"], "what is in these?");
        assert_eq!(content[1]["type"], "image_url");
        assert_eq!(content[1]["image_url"]["url"], "https://x.test/a.png");
        assert_eq!(content[2]["image_url"]["url"], "data:image/png;base64,aGVsbG8=");
        assert_eq!(content[3]["type"], "input_audio");
        assert_eq!(content[3]["input_audio"]["format"], "wav");
        assert_eq!(content[3]["input_audio"]["data"], "UklGRg==");
        assert_eq!(content[4]["type"], "text");

        let observation = &request["messages"][1]["content"];
        assert!(observation[0]["text"].as_str().unwrap().starts_with("Observation (tool `media_loader`)"));
        assert_eq!(observation[1]["image_url"]["url"], "data:image/jpeg;base64,aGVsbG8=");

        assert_eq!(request["messages"][2]["content"], "plain");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let client = OpenAiClient::new(Some("http://127.0.0.1:9"), "m", Some("sk-test")).with_options(
            LlmOptions {
                timeout: std::time::Duration::from_secs(5),
                ..LlmOptions::default()
            },
        );
        let err = client.chat(&[Message::user("hi")]).await.unwrap_err();
        assert!(matches!(err, LlmError::Transport(_) | LlmError::Provider(_)));
    }
}
