//! Shell 执行器：白名单命令 + 正则拒绝规则
//!
//! 仅允许配置中的命令名（首词，如 ls、grep）；命中拒绝规则（rm -rf、管道到 sh、任何 < / > 重定向、
//! find 的 -exec / -delete 等）或命令不在白名单时返回 Rejected，此时不会启动任何进程。
//! 执行通过 sh -c / cmd /C，带超时与 tracing 审计。

use std::collections::HashSet;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tokio::process::Command;

use crate::core::AgentError;
use crate::tools::Tool;

/// 拒绝规则（不区分大小写）；即使白名单中有同名命令，命中也不允许
const DENY_PATTERNS: &[&str] = &[
    r"\brm\s+-[a-z]*[rf]",
    r"\bmkfs(\.\w+)?\b",
    r"\bdd\s+if=",
    r">\s*/dev/(sd|nvme|hd)",
    r"\b(curl|wget)\b[^|]*\|\s*(ba|z)?sh\b",
    r"\bchmod\s+(777|\+s)",
    r"\b(shutdown|reboot|halt)\b",
    r":\(\)\s*\{\s*:\|:&\s*\};:",
    r"\bsudo\b",
];

fn deny_rules() -> &'static [Regex] {
    static RULES: OnceLock<Vec<Regex>> = OnceLock::new();
    RULES.get_or_init(|| {
        DENY_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(&format!("(?i){p}")).ok())
            .collect()
    })
}

/// find 的这些动作会执行任意程序或删除文件
const FIND_ACTIONS: &[&str] = &["-exec", "-execdir", "-ok", "-okdir", "-delete", "-fprint", "-fprintf", "-fls"];

/// 子命令分隔符：每一段的首词都必须在白名单内
fn segments(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(['|', ';', '&', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Shell 工具：仅允许白名单内命令
pub struct ShellTool {
    allowed_commands: HashSet<String>,
    timeout_secs: u64,
}

impl ShellTool {
    pub fn new(allowed_commands: Vec<String>, timeout_secs: u64) -> Self {
        let allowed_commands = allowed_commands
            .into_iter()
            .map(|s| s.to_lowercase())
            .collect();
        Self {
            allowed_commands,
            timeout_secs,
        }
    }

    /// 执行前校验；失败即 Rejected
    pub fn check(&self, raw: &str) -> Result<(), AgentError> {
        if raw.trim().is_empty() {
            return Err(AgentError::Rejected("empty command".to_string()));
        }
        if let Some(rule) = deny_rules().iter().find(|r| r.is_match(raw)) {
            return Err(AgentError::Rejected(format!(
                "command matches deny rule '{}'",
                rule.as_str().trim_start_matches("(?i)")
            )));
        }
        if raw.contains('`') || raw.contains("$(") {
            return Err(AgentError::Rejected("command substitution is not allowed".to_string()));
        }
        if raw.contains(['<', '>']) {
            return Err(AgentError::Rejected("redirection is not allowed".to_string()));
        }
        // 按 ';' 切段会把 `-exec … \;` 的后半截切走，因此对整条命令逐词检查
        let invokes_find = segments(raw).any(|seg| {
            seg.split_whitespace()
                .next()
                .is_some_and(|w| w.eq_ignore_ascii_case("find"))
        });
        if invokes_find {
            if let Some(action) = raw
                .split(|c: char| c.is_whitespace() || matches!(c, '|' | ';' | '&'))
                .find(|w| FIND_ACTIONS.iter().any(|a| w.eq_ignore_ascii_case(a)))
            {
                return Err(AgentError::Rejected(format!("find action '{}' is not allowed", action)));
            }
        }
        for seg in segments(raw) {
            let name = seg.split_whitespace().next().unwrap_or("").to_lowercase();
            if !self.allowed_commands.contains(&name) {
                return Err(AgentError::Rejected(format!("command '{}' not in allowlist", name)));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Run an allowlisted shell command and return stdout/stderr. Args: {\"command\": \"ls -la\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute (must be in allowlist)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, AgentError> {
        let command = args.get("command").and_then(Value::as_str).unwrap_or("").trim();
        self.check(command)?;

        tracing::info!(command = %command, "shell tool execute");

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        cmd.kill_on_drop(true);

        let output = tokio::time::timeout(std::time::Duration::from_secs(self.timeout_secs), cmd.output())
            .await
            .map_err(|_| {
                AgentError::ToolExecutionFailed(format!("command timed out after {}s", self.timeout_secs))
            })?
            .map_err(|e| AgentError::ToolExecutionFailed(format!("spawn failed: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(AgentError::ToolExecutionFailed(format!(
                "exit {:?}\nstderr: {}",
                output.status.code(),
                stderr.trim()
            )));
        }
        Ok(serde_json::json!({
            "stdout": stdout,
            "stderr": stderr,
            "exit_code": output.status.code(),
        }))
    }
}
