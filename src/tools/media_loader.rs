//! media_loader：把工作区文件或 http(s) URL 载入为 data 信封
//!
//! MIME 依次取自参数、响应 Content-Type、扩展名；upload=true 时先尝试模型端点的 upload_media，
//! 端点不支持（返回 None）则退回 base64 data 信封。
//! 读取过程受 max_bytes 约束：本地文件先看 metadata 再限长读取，HTTP 先看 Content-Length 再按块累计，
//! 超限立即失败，内存占用不超过上限。

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::AsyncReadExt;

use crate::core::AgentError;
use crate::llm::{HttpRequest, LlmClient, Transport};
use crate::media::{mime_from_path, MediaEnvelope};
use crate::tools::{SafeFs, Tool};

pub struct MediaLoaderTool {
    fs: SafeFs,
    transport: Arc<dyn Transport>,
    llm: Option<Arc<dyn LlmClient>>,
    max_bytes: usize,
    fetch_timeout: Duration,
}

impl MediaLoaderTool {
    pub fn new(fs: SafeFs, transport: Arc<dyn Transport>, max_bytes: usize, fetch_timeout: Duration) -> Self {
        Self {
            fs,
            transport,
            llm: None,
            max_bytes,
            fetch_timeout,
        }
    }

    /// 允许通过该端点上传
    pub fn with_uploader(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    fn too_large(&self, source: &str, size: impl std::fmt::Display) -> AgentError {
        AgentError::ToolExecutionFailed(format!("{} is {} bytes, limit is {}", source, size, self.max_bytes))
    }

    async fn fetch(&self, source: &str) -> Result<(Vec<u8>, Option<String>), AgentError> {
        if source.starts_with("http://") || source.starts_with("https://") {
            let resp = self
                .transport
                .send_streaming(HttpRequest::get(source).timeout(self.fetch_timeout))
                .await?;
            if !resp.is_success() {
                return Err(AgentError::ToolExecutionFailed(format!(
                    "fetch {} returned HTTP {}",
                    source, resp.status
                )));
            }
            if let Some(declared) = resp.header("content-length").and_then(|v| v.trim().parse::<u64>().ok()) {
                if declared > self.max_bytes as u64 {
                    return Err(self.too_large(source, declared));
                }
            }
            let mime = resp
                .header("content-type")
                .map(|ct| ct.split(';').next().unwrap_or(ct).trim().to_string());

            let mut body = Vec::new();
            let mut chunks = resp.body;
            while let Some(chunk) = chunks.next().await {
                let chunk = chunk?;
                if body.len() + chunk.len() > self.max_bytes {
                    return Err(self.too_large(source, format!("more than {}", body.len() + chunk.len())));
                }
                body.extend_from_slice(&chunk);
            }
            Ok((body, mime))
        } else {
            let path = self.fs.resolve(source)?;
            let read_err = |e: std::io::Error| AgentError::ToolExecutionFailed(format!("read {}: {}", source, e));
            let file = tokio::fs::File::open(&path).await.map_err(read_err)?;
            let len = file.metadata().await.map_err(read_err)?.len();
            if len > self.max_bytes as u64 {
                return Err(self.too_large(source, len));
            }
            // 文件可能在检查后变大，读取本身也限长
            let mut bytes = Vec::with_capacity(len as usize);
            file.take(self.max_bytes as u64 + 1)
                .read_to_end(&mut bytes)
                .await
                .map_err(read_err)?;
            if bytes.len() > self.max_bytes {
                return Err(self.too_large(source, format!("more than {}", self.max_bytes)));
            }
            Ok((bytes, None))
        }
    }
}

#[async_trait]
impl Tool for MediaLoaderTool {
    fn name(&self) -> &str {
        "media_loader"
    }

    fn description(&self) -> &str {
        "Load an image/audio/video/document from a workspace path or http(s) URL. Args: {\"source\": \"...\", \"mime\": optional, \"upload\": optional bool}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "source": {"type": "string", "description": "Workspace-relative path or http(s) URL"},
                "mime": {"type": "string", "description": "MIME type override"},
                "upload": {"type": "boolean", "description": "Upload to the model endpoint's file store when supported"}
            },
            "required": ["source"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, AgentError> {
        let source = args.get("source").and_then(Value::as_str).unwrap_or("").trim();
        let upload = args.get("upload").and_then(Value::as_bool).unwrap_or(false);
        tracing::info!(source = %source, upload, "media_loader tool execute");

        let (bytes, header_mime) = self.fetch(source).await?;

        let mime = args
            .get("mime")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or(header_mime)
            .or_else(|| mime_from_path(source).map(str::to_string))
            .ok_or_else(|| AgentError::ToolExecutionFailed(format!("cannot determine MIME type of {source}")))?;

        if upload {
            if let Some(llm) = &self.llm {
                if let Some(env) = llm.upload_media(Path::new(source), &mime, Some(&bytes)).await? {
                    return Ok(env.to_value());
                }
                tracing::debug!("endpoint does not support uploads, inlining media");
            }
        }

        let env = MediaEnvelope::from_mime_bytes(&bytes, &mime)
            .ok_or_else(|| AgentError::ToolExecutionFailed(format!("unsupported media type {mime}")))?
            .with_meta("bytes", (bytes.len() as u64).into());
        Ok(env.to_value())
    }
}
