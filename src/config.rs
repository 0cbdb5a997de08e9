//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__LLM__PROVIDER=mock`）。
//! 每个字段都有默认值，缺少配置文件不是错误。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::llm::LlmOptions;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmSection,
    pub context: ContextSection,
    pub tools: ToolsSection,
    pub workflow: WorkflowSection,
}

/// [llm] 段：后端选择、调用参数与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai / deepseek / mock
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    /// 未设置时读取 OPENAI_API_KEY / DEEPSEEK_API_KEY
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            model: None,
            base_url: None,
            api_key: None,
            temperature: 0.7,
            max_tokens: 1024,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

impl LlmSection {
    pub fn options(&self) -> LlmOptions {
        LlmOptions {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            timeout: Duration::from_secs(self.timeouts.request),
            ..LlmOptions::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 60 }
    }
}

/// [context] 段：system prompt 与工具调用深度上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContextSection {
    pub system_prompt: String,
    pub max_tool_depth: usize,
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            system_prompt: "You are a helpful assistant. Use tools when they help answer the request."
                .to_string(),
            max_tool_depth: 5,
        }
    }
}

/// [tools] 段：文件系统根、读写上限、Shell 与媒体加载参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 沙箱根目录，未设置时用 ./workspace
    pub filesystem_root: Option<PathBuf>,
    pub max_file_bytes: usize,
    pub shell: ShellSection,
    pub media: MediaSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            filesystem_root: None,
            max_file_bytes: 256 * 1024,
            shell: ShellSection::default(),
            media: MediaSection::default(),
        }
    }
}

impl ToolsSection {
    pub fn workspace_root(&self) -> PathBuf {
        self.filesystem_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("./workspace"))
    }
}

/// [tools.shell] 段：允许执行的命令名（仅首词，如 ls、grep、cargo）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShellSection {
    pub allowed_commands: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for ShellSection {
    fn default() -> Self {
        Self {
            allowed_commands: ["ls", "grep", "cat", "head", "tail", "wc", "find", "echo", "date"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            timeout_secs: 30,
        }
    }
}

/// [tools.media] 段：媒体加载大小上限与抓取超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MediaSection {
    pub max_bytes: usize,
    pub fetch_timeout_secs: u64,
}

impl Default for MediaSection {
    fn default() -> Self {
        Self {
            max_bytes: 20 * 1024 * 1024,
            fetch_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct WorkflowSection {
    pub evaluator: EvaluatorSection,
}

/// [workflow.evaluator] 段：迭代上限、接受阈值、评估标准与提示词模板
///
/// 模板占位符：`{input}`、`{output}`、`{feedback}`、`{criteria}`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EvaluatorSection {
    pub max_iterations: usize,
    pub improvement_threshold: f64,
    pub criteria: Vec<String>,
    pub optimizer_prompt: String,
    pub evaluator_prompt: String,
}

impl Default for EvaluatorSection {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            improvement_threshold: 0.8,
            criteria: vec![
                "accuracy".to_string(),
                "completeness".to_string(),
                "clarity".to_string(),
            ],
            optimizer_prompt: "Task:\n{input}\n\nPrevious feedback (may be empty):\n{feedback}\n\n\
                Write the best possible answer to the task, addressing the feedback."
                .to_string(),
            evaluator_prompt: "Task:\n{input}\n\nCandidate answer:\n{output}\n\n\
                Evaluate the answer against these criteria: {criteria}.\n\
                Reply with ONLY a JSON object: {\"score\": <number between 0.0 and 1.0>, \"feedback\": \"<how to improve>\"}"
                .to_string(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default", "default"] {
        if std::path::Path::new(&format!("{}.toml", name)).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path.filter(|p| p.exists()) {
        builder = builder.add_source(config::File::from(path).required(false));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
