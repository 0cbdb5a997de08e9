//! 工具执行
//!
//! 查找结果、参数校验、能力调用、输出归一化串成一次调度；每次调度输出结构化审计日志（JSON）。
//! 不施加超时，传输层超时即为实际上限。

use std::time::Instant;

use serde_json::Value;

use crate::core::AgentError;
use crate::tools::registry::RegisteredTool;
use crate::tools::ToolResult;

/// 执行一次调度；所有失败都吸收进 ToolResult
pub(crate) async fn execute(name: String, entry: Option<RegisteredTool>, params: Value) -> ToolResult {
    let start = Instant::now();
    let preview = args_preview(&params);

    let result = match entry {
        None => ToolResult::failure(AgentError::ToolNotFound(name.clone())),
        Some(RegisteredTool { tool, validator }) => {
            let params = if params.is_null() {
                Value::Object(Default::default())
            } else {
                params
            };
            match validator.validate(&params) {
                Err(e) => ToolResult::failure(e),
                Ok(()) => match tool.execute(params).await {
                    Ok(output) => ToolResult::from_output(output),
                    Err(e) => ToolResult::failure(e),
                },
            }
        }
    };

    let outcome = match &result.error {
        None => "ok",
        Some(AgentError::ToolNotFound(_)) => "not_found",
        Some(AgentError::ParamValidation(_)) => "invalid_params",
        Some(AgentError::Rejected(_)) => "rejected",
        Some(_) => "error",
    };
    let audit = serde_json::json!({
        "event": "tool_audit",
        "tool": name,
        "ok": result.success,
        "outcome": outcome,
        "duration_ms": start.elapsed().as_millis() as u64,
        "args_preview": preview,
    });
    tracing::info!(audit = %audit.to_string(), "tool");

    result
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Tool;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn entry(tool: Counting) -> Option<RegisteredTool> {
        Some(RegisteredTool::new(Arc::new(tool)).unwrap())
    }

    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl Tool for Counting {
        fn name(&self) -> &str {
            "count"
        }

        fn description(&self) -> &str {
            "counts calls"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {"n": {"type": "integer"}}, "required": ["n"]})
        }

        async fn execute(&self, args: Value) -> Result<Value, AgentError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"n": args["n"]}))
        }
    }

    #[tokio::test]
    async fn test_invalid_params_never_invoke_capability() {
        let calls = Arc::new(AtomicUsize::new(0));
        let r = execute("count".into(), entry(Counting(calls.clone())), json!({"n": "seven"})).await;
        assert!(matches!(r.error, Some(AgentError::ParamValidation(_))));
        let r = execute("count".into(), entry(Counting(calls.clone())), Value::Null).await;
        assert!(matches!(r.error, Some(AgentError::ParamValidation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_valid_call_returns_data() {
        let calls = Arc::new(AtomicUsize::new(0));
        let r = execute("count".into(), entry(Counting(calls.clone())), json!({"n": 7})).await;
        assert!(r.success);
        assert_eq!(r.to_value()["payload"]["n"], 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_args_preview_truncates() {
        let long = json!({"text": "x".repeat(500)});
        let p = args_preview(&long);
        assert_eq!(p.chars().count(), 203);
        assert!(p.ends_with("..."));
        assert_eq!(args_preview(&json!({"a": 1})), r#"{"a":1}"#);
    }
}
