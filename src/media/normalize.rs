//! 信封归一化与探测
//!
//! normalize 严格校验（失败即 InvalidEnvelope，绝不部分归一化），且幂等；
//! probe / mime_from_data_url / try_parse_envelope_from_string 均为尽力而为，永不报错。

use std::collections::BTreeMap;

use base64::Engine;
use serde_json::{Map, Value};

use crate::core::AgentError;
use crate::media::{MediaEnvelope, MediaKind};

/// 扩展名 -> MIME
const MIME_BY_EXTENSION: &[(&str, &str)] = &[
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("bmp", "image/bmp"),
    ("wav", "audio/wav"),
    ("mp3", "audio/mpeg"),
    ("ogg", "audio/ogg"),
    ("flac", "audio/flac"),
    ("m4a", "audio/mp4"),
    ("mp4", "video/mp4"),
    ("mov", "video/quicktime"),
    ("webm", "video/webm"),
    ("avi", "video/x-msvideo"),
    ("mkv", "video/x-matroska"),
    ("pdf", "application/pdf"),
    ("json", "application/json"),
    ("doc", "application/msword"),
    ("docx", "application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
];

fn invalid(msg: impl Into<String>) -> AgentError {
    AgentError::InvalidEnvelope(msg.into())
}

fn non_empty_str<'a>(obj: &'a Map<String, Value>, key: &str) -> Result<Option<&'a str>, AgentError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(invalid(format!("'{key}' must be a string, got {other}"))),
    }
}

/// 将松散输入归一化为规范信封
///
/// 失败条件：非对象、类别未知、文本缺 text 或带 mime/uri/data、
/// 非文本缺 mime、uri 与 data 不是恰好一个、data 不是合法 base64、meta 不是对象。
pub fn normalize(input: &Value) -> Result<MediaEnvelope, AgentError> {
    let obj = input
        .as_object()
        .ok_or_else(|| invalid("envelope must be a JSON object"))?;

    let kind_raw = non_empty_str(obj, "type")?.ok_or_else(|| invalid("missing 'type'"))?;
    let kind =
        MediaKind::parse(kind_raw).ok_or_else(|| invalid(format!("unknown type '{kind_raw}'")))?;

    let text = match obj.get("text") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => return Err(invalid(format!("'text' must be a string, got {other}"))),
    };
    let mime = non_empty_str(obj, "mime")?;
    let uri = non_empty_str(obj, "uri")?;
    let data = non_empty_str(obj, "data")?;
    let meta = normalize_meta(obj.get("meta"))?;

    if kind == MediaKind::Text {
        let text = text.ok_or_else(|| invalid("text envelope requires 'text'"))?;
        if mime.is_some() || uri.is_some() || data.is_some() {
            return Err(invalid("text envelope must not carry mime, uri or data"));
        }
        return Ok(MediaEnvelope {
            kind,
            text: Some(text),
            mime: None,
            uri: None,
            data: None,
            meta,
        });
    }

    let mime = mime.ok_or_else(|| invalid(format!("{kind} envelope requires 'mime'")))?;
    match (uri, data) {
        (Some(_), Some(_)) => return Err(invalid("exactly one of 'uri' or 'data' allowed, got both")),
        (None, None) => return Err(invalid("exactly one of 'uri' or 'data' required, got neither")),
        _ => {}
    }
    if let Some(d) = data {
        base64::engine::general_purpose::STANDARD
            .decode(d)
            .map_err(|e| invalid(format!("'data' is not valid base64: {e}")))?;
    }

    Ok(MediaEnvelope {
        kind,
        text,
        mime: Some(mime.trim().to_ascii_lowercase()),
        uri: uri.map(str::to_string),
        data: data.map(str::to_string),
        meta,
    })
}

/// meta 只保留数值项；非对象视为格式错误
fn normalize_meta(meta: Option<&Value>) -> Result<BTreeMap<String, serde_json::Number>, AgentError> {
    match meta {
        None | Some(Value::Null) => Ok(BTreeMap::new()),
        Some(Value::Object(m)) => Ok(m
            .iter()
            .filter_map(|(k, v)| match v {
                Value::Number(n) => Some((k.clone(), n.clone())),
                _ => {
                    tracing::debug!(key = %k, "dropping non-numeric meta entry");
                    None
                }
            })
            .collect()),
        Some(other) => Err(invalid(format!("'meta' must be an object, got {other}"))),
    }
}

/// 快速探测：是否像一个信封（已知 type，且文本有 text / 非文本有 uri 或 data）；永不报错
pub fn probe(input: &Value) -> bool {
    let Some(obj) = input.as_object() else {
        return false;
    };
    let Some(kind) = obj.get("type").and_then(Value::as_str).and_then(MediaKind::parse) else {
        return false;
    };
    let has = |key: &str| obj.get(key).map(Value::is_string).unwrap_or(false);
    match kind {
        MediaKind::Text => has("text"),
        _ => has("uri") || has("data"),
    }
}

/// 从 `data:<mime>[;param...],<payload>` 中取出 MIME；结构不符返回空串
pub fn mime_from_data_url(data_url: &str) -> String {
    let Some(rest) = data_url.strip_prefix("data:") else {
        return String::new();
    };
    let Some(comma) = rest.find(',') else {
        return String::new();
    };
    let header = &rest[..comma];
    let mime = header.split(';').next().unwrap_or("").trim();
    if mime.is_empty() || !mime.contains('/') {
        return String::new();
    }
    mime.to_ascii_lowercase()
}

/// 将字符串尽力解析为信封；普通文本返回 None（它本就是合法的非信封消息片段）
pub fn try_parse_envelope_from_string(content: &str) -> Option<MediaEnvelope> {
    let trimmed = content.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    let value: Value = serde_json::from_str(trimmed).ok()?;
    if !probe(&value) {
        return None;
    }
    normalize(&value).ok()
}

/// MIME 前缀 -> 类别（application/* 视为文档）
pub fn infer_kind_from_mime(mime: &str) -> Option<MediaKind> {
    let mime = mime.trim().to_ascii_lowercase();
    if mime.starts_with("image/") {
        Some(MediaKind::Image)
    } else if mime.starts_with("audio/") {
        Some(MediaKind::Audio)
    } else if mime.starts_with("video/") {
        Some(MediaKind::Video)
    } else if mime.starts_with("application/") {
        Some(MediaKind::Document)
    } else {
        None
    }
}

/// 按扩展名猜测 MIME（忽略查询串与片段）
pub fn mime_from_path(path: &str) -> Option<&'static str> {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    let file = path.rsplit('/').next().unwrap_or(path);
    let ext = file.rsplit_once('.')?.1.to_ascii_lowercase();
    MIME_BY_EXTENSION
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, mime)| *mime)
}

impl MediaEnvelope {
    /// 由 URI 或 data URL 字符串构造信封（用户消息附件）；无法识别时返回 None
    ///
    /// - `data:<mime>;base64,<payload>` -> data 信封
    /// - 其它 `data:` URL -> 以 URL 本身作为 uri
    /// - `http(s)://`、`file://` -> 按扩展名推断 MIME 的 uri 信封
    /// - JSON 信封文本 -> 归一化结果
    pub fn from_uri_or_data(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.starts_with("data:") {
            let mime = mime_from_data_url(s);
            let kind = infer_kind_from_mime(&mime)?;
            let (header, payload) = s.split_once(',')?;
            let env = if header.ends_with(";base64") {
                Self::media_parts(kind, &mime, None, Some(payload.to_string()))
            } else {
                Self::media_parts(kind, &mime, Some(s.to_string()), None)
            };
            return normalize(&env.to_value()).ok();
        }
        if s.starts_with("http://") || s.starts_with("https://") || s.starts_with("file://") {
            let mime = mime_from_path(s)?;
            return Self::from_mime_uri(s, mime);
        }
        try_parse_envelope_from_string(s)
    }

    fn media_parts(kind: MediaKind, mime: &str, uri: Option<String>, data: Option<String>) -> Self {
        Self {
            kind,
            text: None,
            mime: Some(mime.to_string()),
            uri,
            data,
            meta: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn builders() -> Vec<MediaEnvelope> {
        vec![
            MediaEnvelope::text("hello"),
            MediaEnvelope::image_uri("https://x.test/cat.png", "image/png").unwrap(),
            MediaEnvelope::image_data("aGVsbG8=", "image/jpeg").unwrap().with_meta("width", 640.into()),
            MediaEnvelope::audio_uri("file:///a.wav", "audio/wav").unwrap().with_meta("sample_rate_hz", 16000.into()),
            MediaEnvelope::audio_data("aGVsbG8=", "audio/wav").unwrap(),
            MediaEnvelope::video_uri("https://x.test/v.mp4", "video/mp4").unwrap(),
            MediaEnvelope::video_data("aGVsbG8=", "video/mp4").unwrap(),
            MediaEnvelope::document_uri("https://x.test/d.pdf", "application/pdf").unwrap(),
            MediaEnvelope::document_data("aGVsbG8=", "application/pdf").unwrap(),
        ]
    }

    #[test]
    fn test_builders_survive_normalize_unchanged() {
        for env in builders() {
            let once = normalize(&env.to_value()).unwrap();
            assert_eq!(once, env);
            let twice = normalize(&once.to_value()).unwrap();
            assert_eq!(twice, once);
        }

        let rejected = [
            MediaEnvelope::image_uri("", "image/png"),
            MediaEnvelope::image_uri("   ", "image/png"),
            MediaEnvelope::image_data("not base64!!", "image/png"),
            MediaEnvelope::audio_data("", "audio/wav"),
            MediaEnvelope::video_uri("https://x.test/v.mp4", ""),
            MediaEnvelope::document_data("aGVsbG8=", "  "),
        ];
        for built in rejected {
            assert!(matches!(built, Err(AgentError::InvalidEnvelope(_))), "{built:?}");
        }
        assert!(MediaEnvelope::from_mime_uri("", "image/png").is_none());
    }

    #[test]
    fn test_non_text_requires_exactly_one_source_and_mime() {
        let both = json!({"type": "image", "mime": "image/png", "uri": "https://x", "data": "aGk="});
        let neither = json!({"type": "image", "mime": "image/png"});
        let no_mime = json!({"type": "video", "uri": "https://x/v.mp4"});
        for bad in [both, neither, no_mime] {
            assert!(matches!(normalize(&bad), Err(AgentError::InvalidEnvelope(_))), "{bad}");
        }
        assert!(normalize(&json!({"type": "audio", "mime": "audio/wav", "uri": "file:///a.wav"})).is_ok());
    }

    #[test]
    fn test_rejects_unknown_kind_and_bad_shapes() {
        assert!(normalize(&json!({"type": "hologram", "uri": "x", "mime": "a/b"})).is_err());
        assert!(normalize(&json!("just text")).is_err());
        assert!(normalize(&json!({"type": "text"})).is_err());
        assert!(normalize(&json!({"type": "text", "text": "hi", "mime": "text/plain"})).is_err());
        assert!(normalize(&json!({"type": "image", "mime": "image/png", "data": "***"})).is_err());
        assert!(normalize(&json!({"type": "image", "mime": "image/png", "uri": "x", "meta": 3})).is_err());
    }

    #[test]
    fn test_normalize_canonicalizes_loose_input() {
        let loose = json!({
            "type": "IMAGE",
            "mime": " Image/PNG ",
            "uri": "https://x.test/a.png",
            "data": "",
            "meta": {"width": 10, "label": "drop me"}
        });
        let env = normalize(&loose).unwrap();
        assert_eq!(env.kind(), MediaKind::Image);
        assert_eq!(env.mime(), Some("image/png"));
        assert_eq!(env.data(), None);
        assert_eq!(env.meta().len(), 1);
    }

    #[test]
    fn test_probe_never_fails() {
        assert!(probe(&json!({"type": "text", "text": "x"})));
        assert!(probe(&json!({"type": "image", "uri": "https://x"})));
        assert!(!probe(&json!({"type": "image"})));
        assert!(!probe(&json!([1, 2, 3])));
        assert!(!probe(&json!(null)));
        assert!(!probe(&json!({"type": 7})));
    }

    #[test]
    fn test_mime_from_data_url() {
        assert_eq!(mime_from_data_url("data:image/png;base64,AAAA"), "image/png");
        assert_eq!(mime_from_data_url("data:Audio/WAV,raw"), "audio/wav");
        assert_eq!(mime_from_data_url("data:;base64,AAAA"), "");
        assert_eq!(mime_from_data_url("data:image/png"), "");
        assert_eq!(mime_from_data_url("https://x/a.png"), "");
        assert_eq!(mime_from_data_url(""), "");
    }

    #[test]
    fn test_try_parse_envelope_from_string() {
        let env = try_parse_envelope_from_string(r#" {"type":"image","mime":"image/png","uri":"https://x/a.png"} "#);
        assert_eq!(env.unwrap().kind(), MediaKind::Image);
        assert!(try_parse_envelope_from_string("plain words").is_none());
        assert!(try_parse_envelope_from_string("{not json").is_none());
        assert!(try_parse_envelope_from_string(r#"{"type":"image"}"#).is_none());
    }

    #[test]
    fn test_from_uri_or_data() {
        let d = MediaEnvelope::from_uri_or_data("data:image/png;base64,aGVsbG8=").unwrap();
        assert_eq!(d.kind(), MediaKind::Image);
        assert_eq!(d.data(), Some("aGVsbG8="));

        let u = MediaEnvelope::from_uri_or_data("https://x.test/clip.MP4?sig=1").unwrap();
        assert_eq!(u.kind(), MediaKind::Video);
        assert_eq!(u.mime(), Some("video/mp4"));

        let f = MediaEnvelope::from_uri_or_data("file:///docs/report.pdf").unwrap();
        assert_eq!(f.kind(), MediaKind::Document);

        assert!(MediaEnvelope::from_uri_or_data("https://x.test/page").is_none());
        assert!(MediaEnvelope::from_uri_or_data("hello world").is_none());
    }

    #[test]
    fn test_infer_kind_and_mime_from_path() {
        assert_eq!(infer_kind_from_mime("application/pdf"), Some(MediaKind::Document));
        assert_eq!(infer_kind_from_mime("text/plain"), None);
        assert_eq!(mime_from_path("/tmp/photo.JPG"), Some("image/jpeg"));
        assert_eq!(mime_from_path("noext"), None);
    }
}
