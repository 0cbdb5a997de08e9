//! 多模态信封：规范化后的单段内容（文本 / 图片 / 音频 / 视频 / 文档）
//!
//! 规范 JSON 形状：`{"type", "text"?, "mime"?, "uri"?, "data"?, "meta"?}`。
//! 字段私有，只能通过构造器或 normalize 得到：媒体构造器本身也经过 normalize，参数非法（空 uri、
//! 空 mime、data 不是 base64）时返回 InvalidEnvelope，因此拿到的信封总是满足不变量且不可变。

use std::collections::BTreeMap;
use std::fmt;

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::core::AgentError;
use crate::media::normalize;

/// 内容类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Text,
    Image,
    Audio,
    Video,
    Document,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Text => "text",
            MediaKind::Image => "image",
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
            MediaKind::Document => "document",
        }
    }

    /// 不区分大小写解析；未知类别返回 None
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Some(MediaKind::Text),
            "image" => Some(MediaKind::Image),
            "audio" => Some(MediaKind::Audio),
            "video" => Some(MediaKind::Video),
            "document" => Some(MediaKind::Document),
            _ => None,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 规范化信封。序列化 / 反序列化都经过 normalize，反序列化非法输入直接失败
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct MediaEnvelope {
    pub(crate) kind: MediaKind,
    pub(crate) text: Option<String>,
    pub(crate) mime: Option<String>,
    pub(crate) uri: Option<String>,
    pub(crate) data: Option<String>,
    pub(crate) meta: BTreeMap<String, Number>,
}

impl MediaEnvelope {
    pub fn text(s: impl Into<String>) -> Self {
        Self {
            kind: MediaKind::Text,
            text: Some(s.into()),
            mime: None,
            uri: None,
            data: None,
            meta: BTreeMap::new(),
        }
    }

    fn media(kind: MediaKind, mime: &str, uri: Option<String>, data: Option<String>) -> Result<Self, AgentError> {
        let raw = Self {
            kind,
            text: None,
            mime: Some(mime.to_string()),
            uri,
            data,
            meta: BTreeMap::new(),
        };
        normalize::normalize(&raw.to_value())
    }

    pub fn image_uri(uri: impl Into<String>, mime: &str) -> Result<Self, AgentError> {
        Self::media(MediaKind::Image, mime, Some(uri.into()), None)
    }

    pub fn image_data(base64: impl Into<String>, mime: &str) -> Result<Self, AgentError> {
        Self::media(MediaKind::Image, mime, None, Some(base64.into()))
    }

    pub fn audio_uri(uri: impl Into<String>, mime: &str) -> Result<Self, AgentError> {
        Self::media(MediaKind::Audio, mime, Some(uri.into()), None)
    }

    pub fn audio_data(base64: impl Into<String>, mime: &str) -> Result<Self, AgentError> {
        Self::media(MediaKind::Audio, mime, None, Some(base64.into()))
    }

    pub fn video_uri(uri: impl Into<String>, mime: &str) -> Result<Self, AgentError> {
        Self::media(MediaKind::Video, mime, Some(uri.into()), None)
    }

    pub fn video_data(base64: impl Into<String>, mime: &str) -> Result<Self, AgentError> {
        Self::media(MediaKind::Video, mime, None, Some(base64.into()))
    }

    pub fn document_uri(uri: impl Into<String>, mime: &str) -> Result<Self, AgentError> {
        Self::media(MediaKind::Document, mime, Some(uri.into()), None)
    }

    pub fn document_data(base64: impl Into<String>, mime: &str) -> Result<Self, AgentError> {
        Self::media(MediaKind::Document, mime, None, Some(base64.into()))
    }

    /// 按 MIME 推断类别，再以 uri 形式构造；MIME 无法映射到类别或 uri 为空时返回 None
    pub fn from_mime_uri(uri: impl Into<String>, mime: &str) -> Option<Self> {
        let kind = normalize::infer_kind_from_mime(mime)?;
        Self::media(kind, mime, Some(uri.into()), None).ok()
    }

    /// 按 MIME 推断类别，以原始字节构造 data 信封
    pub fn from_mime_bytes(bytes: &[u8], mime: &str) -> Option<Self> {
        let kind = normalize::infer_kind_from_mime(mime)?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        Self::media(kind, mime, None, Some(encoded)).ok()
    }

    /// 附加数值提示（宽高、时长、采样率等）
    pub fn with_meta(mut self, key: impl Into<String>, value: Number) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn is_text(&self) -> bool {
        self.kind == MediaKind::Text
    }

    pub fn text_content(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn mime(&self) -> Option<&str> {
        self.mime.as_deref()
    }

    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    pub fn data(&self) -> Option<&str> {
        self.data.as_deref()
    }

    pub fn meta(&self) -> &BTreeMap<String, Number> {
        &self.meta
    }

    /// 解码 data 字段；uri 形式返回 None
    pub fn decoded_data(&self) -> Option<Result<Vec<u8>, AgentError>> {
        self.data.as_ref().map(|d| {
            base64::engine::general_purpose::STANDARD
                .decode(d)
                .map_err(|e| AgentError::InvalidEnvelope(format!("data is not base64: {e}")))
        })
    }

    /// 规范 JSON 形状
    pub fn to_value(&self) -> Value {
        let mut obj = serde_json::Map::new();
        obj.insert("type".into(), Value::String(self.kind.as_str().to_string()));
        if let Some(t) = &self.text {
            obj.insert("text".into(), Value::String(t.clone()));
        }
        if let Some(m) = &self.mime {
            obj.insert("mime".into(), Value::String(m.clone()));
        }
        if let Some(u) = &self.uri {
            obj.insert("uri".into(), Value::String(u.clone()));
        }
        if let Some(d) = &self.data {
            obj.insert("data".into(), Value::String(d.clone()));
        }
        if !self.meta.is_empty() {
            let meta = self
                .meta
                .iter()
                .map(|(k, v)| (k.clone(), Value::Number(v.clone())))
                .collect();
            obj.insert("meta".into(), Value::Object(meta));
        }
        Value::Object(obj)
    }

    /// 纯文本渲染，供只接受文本的模型端点使用
    pub fn describe(&self) -> String {
        if let (MediaKind::Text, Some(t)) = (self.kind, &self.text) {
            return t.clone();
        }
        let mime = self.mime.as_deref().unwrap_or("application/octet-stream");
        let source = match (&self.uri, &self.data) {
            (Some(uri), _) if uri.starts_with("data:") => "inline data URL".to_string(),
            (Some(uri), _) => uri.clone(),
            (None, Some(data)) => format!("{} base64 chars", data.len()),
            (None, None) => "no source".to_string(),
        };
        match &self.text {
            Some(caption) => format!("[{} {}: {}] {}", self.kind, mime, source, caption),
            None => format!("[{} {}: {}]", self.kind, mime, source),
        }
    }
}

impl TryFrom<Value> for MediaEnvelope {
    type Error = AgentError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        normalize::normalize(&value)
    }
}

impl From<MediaEnvelope> for Value {
    fn from(env: MediaEnvelope) -> Self {
        env.to_value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse_is_case_insensitive() {
        assert_eq!(MediaKind::parse("Image"), Some(MediaKind::Image));
        assert_eq!(MediaKind::parse(" document "), Some(MediaKind::Document));
        assert_eq!(MediaKind::parse("hologram"), None);
    }

    #[test]
    fn test_to_value_shape() {
        let env = MediaEnvelope::image_uri("https://x.test/a.png", "IMAGE/PNG")
            .unwrap()
            .with_meta("width", 1024.into())
            .with_meta("height", 768.into());
        let v = env.to_value();
        assert_eq!(v["type"], "image");
        assert_eq!(v["mime"], "image/png");
        assert_eq!(v["uri"], "https://x.test/a.png");
        assert!(v.get("data").is_none());
        assert_eq!(v["meta"]["width"], 1024);
    }

    #[test]
    fn test_serde_goes_through_normalize() {
        let env = MediaEnvelope::text("hello");
        let s = serde_json::to_string(&env).unwrap();
        let raw: Value = serde_json::from_str(&s).unwrap();
        assert_eq!(raw, serde_json::json!({"type": "text", "text": "hello"}));
        let back: MediaEnvelope = serde_json::from_str(&s).unwrap();
        assert_eq!(back, env);

        let bad: Result<MediaEnvelope, _> = serde_json::from_str(r#"{"type":"image","mime":"image/png"}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_from_mime_bytes_and_decode() {
        let env = MediaEnvelope::from_mime_bytes(b"\x89PNG", "image/png").unwrap();
        assert_eq!(env.kind(), MediaKind::Image);
        assert_eq!(env.decoded_data().unwrap().unwrap(), b"\x89PNG".to_vec());
        assert!(MediaEnvelope::from_mime_bytes(b"x", "text/plain").is_none());
    }

    #[test]
    fn test_describe() {
        assert_eq!(MediaEnvelope::text("hi").describe(), "hi");
        let d = MediaEnvelope::audio_uri("file:///tmp/a.wav", "audio/wav").unwrap().describe();
        assert!(d.contains("audio"));
        assert!(d.contains("file:///tmp/a.wav"));
    }
}
