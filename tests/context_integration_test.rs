//! 会话上下文集成测试：注册、调度、工具循环上限、流式提交与信封归一化

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use hive::context::Context;
use hive::core::AgentError;
use hive::llm::{LlmClient, LlmError, LlmResponse, MockLlmClient};
use hive::media::{normalize, MediaEnvelope};
use hive::memory::{Message, ToolCall};
use hive::tools::{EchoTool, Tool, ToolDescriptor};
use serde_json::{json, Value};

/// 记录调用次数的工具
struct Counting {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Tool for Counting {
    fn name(&self) -> &str {
        "counting"
    }

    fn description(&self) -> &str {
        "counts invocations"
    }

    async fn execute(&self, _args: Value) -> Result<Value, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Value::String("counted".into()))
    }
}

/// 永远请求工具的模型
struct AlwaysTool;

#[async_trait]
impl LlmClient for AlwaysTool {
    async fn chat(&self, _messages: &[Message]) -> Result<LlmResponse, LlmError> {
        Ok(LlmResponse::text(""))
    }

    async fn chat_with_tools(&self, _messages: &[Message], _tools: &[ToolDescriptor]) -> Result<LlmResponse, LlmError> {
        Ok(LlmResponse::text("").with_tool_calls(vec![ToolCall::new("counting", json!({}))]))
    }
}

#[tokio::test]
async fn test_duplicate_registration_rejected() {
    let mut ctx = Context::new(Arc::new(MockLlmClient::new()));
    ctx.register_tool(EchoTool).unwrap();
    let err = ctx.register_tool(EchoTool).unwrap_err();
    assert_eq!(err, AgentError::DuplicateTool("echo".into()));
    assert_eq!(ctx.registry().len(), 1);
}

#[tokio::test]
async fn test_unknown_tool_is_not_found_and_nothing_runs() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut ctx = Context::new(Arc::new(MockLlmClient::new()));
    ctx.register_tool(Counting { calls: calls.clone() }).unwrap();

    let result = ctx.execute_tool("missing", json!({})).await;
    assert!(!result.success);
    assert!(matches!(result.error, Some(AgentError::ToolNotFound(ref n)) if n == "missing"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_tool_loop_cap_rolls_back_history() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut ctx = Context::new(Arc::new(AlwaysTool)).with_max_tool_depth(3);
    ctx.register_tool(Counting { calls: calls.clone() }).unwrap();
    ctx.add_message(Message::user("earlier"));

    let err = ctx.chat_with_tools("go", Vec::new()).await.unwrap_err();
    assert_eq!(err, AgentError::ToolLoopExceeded { limit: 3 });
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(ctx.messages().len(), 1);
    assert_eq!(ctx.messages()[0].text(), "earlier");
}

#[tokio::test]
async fn test_abandoned_stream_leaves_history_unmodified() {
    let mut ctx = Context::new(Arc::new(MockLlmClient::new()));
    {
        let mut stream = ctx.stream_chat("one two three four", Vec::new());
        let first = stream.next().await.unwrap().unwrap();
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(first, "Echo:");
        assert_eq!(second, " one");
    }
    assert!(ctx.messages().is_empty());

    let chunks: Vec<String> = ctx
        .stream_chat("hi there", Vec::new())
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(chunks.concat(), "Echo: hi there");
    assert_eq!(ctx.messages().len(), 2);
}

#[test]
fn test_envelope_normalization_is_idempotent() {
    let inputs = vec![
        json!({"type": "image", "mime": "image/png", "uri": "https://example.com/cat.png"}),
        json!({"type": "text", "text": "hello"}),
    ];
    for input in inputs {
        let once = normalize(&input).unwrap();
        let twice = normalize(&once.to_value()).unwrap();
        assert_eq!(once, twice);
    }
    assert!(normalize(&json!({"type": "image"})).is_err());
    assert!(normalize(&json!("plain text")).is_err());
    let env = MediaEnvelope::text("x");
    assert_eq!(MediaEnvelope::try_from(env.to_value()).unwrap(), env);
}
