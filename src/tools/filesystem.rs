//! 沙箱文件系统工具
//!
//! SafeFs 绑定 root_dir，所有路径经 resolve 校验必须在 root 下（禁止 ../ 与绝对路径逃逸）；
//! FileReadTool / FileWriteTool 基于 SafeFs 提供 file_read / file_write，读写都有大小上限。

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

use crate::core::AgentError;
use crate::tools::Tool;

/// 沙箱文件系统：绑定根目录，resolve 校验路径在根下，防止路径逃逸
#[derive(Debug, Clone)]
pub struct SafeFs {
    root_dir: PathBuf,
    max_bytes: usize,
}

impl SafeFs {
    pub fn new(root_dir: impl AsRef<Path>, max_bytes: usize) -> Self {
        let root = root_dir.as_ref().to_path_buf();
        let root_dir = root.canonicalize().unwrap_or(root);
        Self { root_dir, max_bytes }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// 解析相对路径；目标可以尚不存在（写入），但已存在的最长前缀规范化后必须在根下
    pub fn resolve(&self, path: &str) -> Result<PathBuf, AgentError> {
        let rel = Path::new(path.trim());
        if rel.as_os_str().is_empty() {
            return Err(AgentError::ParamValidation("path must not be empty".to_string()));
        }
        if rel
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
        {
            return Err(AgentError::PathEscape(path.to_string()));
        }
        let full = self.root_dir.join(rel);

        let mut existing = full.as_path();
        while !existing.exists() {
            existing = existing
                .parent()
                .ok_or_else(|| AgentError::PathEscape(path.to_string()))?;
        }
        let canonical = existing
            .canonicalize()
            .map_err(|e| AgentError::ToolExecutionFailed(format!("resolve failed: {e}")))?;
        let root_canon = self
            .root_dir
            .canonicalize()
            .unwrap_or_else(|_| self.root_dir.clone());
        if !canonical.starts_with(&root_canon) {
            return Err(AgentError::PathEscape(path.to_string())); // 如指向根外的符号链接
        }
        Ok(full)
    }

    pub async fn read_file(&self, path: &str) -> Result<String, AgentError> {
        let resolved = self.resolve(path)?;
        let meta = tokio::fs::metadata(&resolved)
            .await
            .map_err(|e| AgentError::ToolExecutionFailed(format!("read failed: {e}")))?;
        if meta.len() as usize > self.max_bytes {
            return Err(AgentError::ToolExecutionFailed(format!(
                "file is {} bytes, limit is {}",
                meta.len(),
                self.max_bytes
            )));
        }
        tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| AgentError::ToolExecutionFailed(format!("read failed: {e}")))
    }

    pub async fn write_file(&self, path: &str, content: &str) -> Result<usize, AgentError> {
        if content.len() > self.max_bytes {
            return Err(AgentError::ParamValidation(format!(
                "content is {} bytes, limit is {}",
                content.len(),
                self.max_bytes
            )));
        }
        let resolved = self.resolve(path)?;
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AgentError::ToolExecutionFailed(format!("mkdir failed: {e}")))?;
        }
        tokio::fs::write(&resolved, content)
            .await
            .map_err(|e| AgentError::ToolExecutionFailed(format!("write failed: {e}")))?;
        Ok(content.len())
    }
}

fn path_arg(args: &Value) -> &str {
    args.get("path").and_then(Value::as_str).unwrap_or("")
}

/// file_read：读取沙箱内文本文件
pub struct FileReadTool {
    fs: SafeFs,
}

impl FileReadTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "Read a text file inside the workspace. Args: {\"path\": \"relative/path.txt\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File path relative to the workspace root"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, AgentError> {
        let path = path_arg(&args);
        tracing::info!(path = %path, "file_read tool execute");
        self.fs.read_file(path).await.map(Value::String)
    }
}

/// file_write：写入（覆盖）沙箱内文本文件，自动创建父目录
pub struct FileWriteTool {
    fs: SafeFs,
}

impl FileWriteTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "file_write"
    }

    fn description(&self) -> &str {
        "Write a text file inside the workspace (overwrites). Args: {\"path\": \"relative/path.txt\", \"content\": \"...\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File path relative to the workspace root"},
                "content": {"type": "string", "description": "Full file content"}
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, AgentError> {
        let path = path_arg(&args);
        let content = args.get("content").and_then(Value::as_str).unwrap_or("");
        tracing::info!(path = %path, bytes = content.len(), "file_write tool execute");
        let written = self.fs.write_file(path, content).await?;
        Ok(serde_json::json!({"path": path, "bytes_written": written}))
    }
}
