//! 路由工作流：先让模型把输入归入某条路由，再交给该路由处理
//!
//! 分类回复优先按 JSON `{"route": "...", "reasoning": "..."}` 解析；解析不到时在回复文本中查找路由名
//! （取最长的命中）。未知路由交给默认路由，没有默认路由则报错。
//! 路由处理方式二选一：同步 handler（拿到输入与分类信息），或一次性模型调用（prompt 模板 + 可选 system）。

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::context::Context;
use crate::core::{AgentError, Task};
use crate::llm::tool_protocol::extract_json_block;
use crate::workflow::types::RoutingResult;
use crate::workflow::{fill_template, log_step, StepCallback};

/// 路由处理函数：(输入, 分类信息) -> 输出
pub type RouteFn = Arc<dyn Fn(&str, &Value) -> Result<Value, AgentError> + Send + Sync>;

const DEFAULT_ROUTER_PROMPT: &str =
    "You are a routing assistant. Classify the user's input into the single most suitable route.";

#[derive(Clone)]
pub struct Route {
    pub name: String,
    pub description: String,
    /// `{input}` 为原始输入；为空时直接使用输入
    pub prompt_template: String,
    pub system: Option<String>,
    handler: Option<RouteFn>,
}

impl Route {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            prompt_template: String::new(),
            system: None,
            handler: None,
        }
    }

    pub fn with_prompt_template(mut self, template: impl Into<String>) -> Self {
        self.prompt_template = template.into();
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_handler(
        mut self,
        f: impl Fn(&str, &Value) -> Result<Value, AgentError> + Send + Sync + 'static,
    ) -> Self {
        self.handler = Some(Arc::new(f));
        self
    }

    async fn handle(&self, ctx: &Context, input: &str, routing: &Value) -> Result<Value, AgentError> {
        if let Some(handler) = &self.handler {
            return handler(input, routing);
        }
        let prompt = if self.prompt_template.is_empty() {
            input.to_string()
        } else {
            fill_template(&self.prompt_template, &[("input", input)])
        };
        let system = self.system.clone().unwrap_or_else(|| ctx.system_prompt().to_string());
        Ok(Value::String(ctx.complete_oneshot(&system, &prompt).await?))
    }
}

pub struct RoutingWorkflow {
    router_prompt: String,
    routes: BTreeMap<String, Route>,
    default_route: Option<Route>,
    step_callback: Option<StepCallback>,
}

impl Default for RoutingWorkflow {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingWorkflow {
    pub fn new() -> Self {
        Self {
            router_prompt: DEFAULT_ROUTER_PROMPT.to_string(),
            routes: BTreeMap::new(),
            default_route: None,
            step_callback: None,
        }
    }

    pub fn with_router_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.router_prompt = prompt.into();
        self
    }

    /// 同名路由后加的覆盖先加的
    pub fn with_route(mut self, route: Route) -> Self {
        self.routes.insert(route.name.clone(), route);
        self
    }

    pub fn with_default_route(mut self, route: Route) -> Self {
        self.default_route = Some(route);
        self
    }

    pub fn with_step_callback(mut self, callback: StepCallback) -> Self {
        self.step_callback = Some(callback);
        self
    }

    pub fn route_names(&self) -> Vec<String> {
        self.routes.keys().cloned().collect()
    }

    /// 分类回复的 JSON Schema
    pub fn routes_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "route": {"type": "string", "enum": self.route_names()},
                "reasoning": {"type": "string"}
            },
            "required": ["route"]
        })
    }

    fn router_system_prompt(&self) -> String {
        let routes: Vec<String> = self
            .routes
            .values()
            .map(|r| format!("- {}: {}", r.name, r.description))
            .collect();
        format!(
            "{}\n\nAvailable routes:\n{}\n\nRespond with JSON only: {{\"route\": \"<route name>\", \"reasoning\": \"<one sentence>\"}}",
            self.router_prompt,
            routes.join("\n")
        )
    }

    /// 从分类回复中取出路由名与分类信息
    fn classify(&self, reply: &str) -> (Option<String>, Value) {
        let parsed = extract_json_block(reply).and_then(|block| serde_json::from_str::<Value>(block).ok());
        if let Some(info) = parsed {
            if let Some(route) = info.get("route").and_then(Value::as_str) {
                return (Some(route.trim().to_string()), info);
            }
        }
        let lower = reply.to_lowercase();
        let mentioned = self
            .routes
            .keys()
            .filter(|name| lower.contains(&name.to_lowercase()))
            .max_by_key(|name| name.len())
            .cloned();
        let info = json!({"route": mentioned, "reasoning": reply.trim()});
        (mentioned, info)
    }

    pub fn run<'a>(&'a self, ctx: &'a Context, input: &'a str) -> Task<'a, Result<RoutingResult, AgentError>> {
        Task::new(async move {
            if self.routes.is_empty() && self.default_route.is_none() {
                return Err(AgentError::Runtime("routing workflow has no routes".to_string()));
            }

            let reply = ctx.complete_oneshot(&self.router_system_prompt(), input).await?;
            let (chosen, routing) = self.classify(&reply);
            log_step(self.step_callback.as_ref(), "routing", "classify", routing.clone());

            let (route, used_default) = match chosen.as_deref().and_then(|name| self.routes.get(name)) {
                Some(route) => (route, false),
                None => match &self.default_route {
                    Some(route) => (route, true),
                    None => {
                        return Err(AgentError::Runtime(format!(
                            "no route matches '{}' and no default route is set",
                            chosen.as_deref().unwrap_or_default()
                        )))
                    }
                },
            };
            log_step(
                self.step_callback.as_ref(),
                "routing",
                "dispatch",
                json!({"route": route.name, "default": used_default}),
            );

            let output = route.handle(ctx, input, &routing).await?;
            Ok(RoutingResult {
                route: route.name.clone(),
                used_default,
                routing,
                output,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmClient, LlmError, LlmResponse};
    use crate::memory::{Message, Role};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// 分类请求（system 中列出路由）返回固定回复，其余请求回显 system 与 user
    struct Classifier(&'static str);

    #[async_trait]
    impl LlmClient for Classifier {
        async fn chat(&self, messages: &[Message]) -> Result<LlmResponse, LlmError> {
            let system = messages
                .iter()
                .find(|m| m.role == Role::System)
                .map(Message::text)
                .unwrap_or_default();
            if system.contains("Available routes:") {
                return Ok(LlmResponse::text(self.0));
            }
            let user = messages.last().map(Message::text).unwrap_or_default();
            Ok(LlmResponse::text(format!("[{}] {}", system, user)))
        }
    }

    fn ctx(reply: &'static str) -> Context {
        Context::new(Arc::new(Classifier(reply)))
    }

    fn workflow() -> RoutingWorkflow {
        RoutingWorkflow::new()
            .with_route(
                Route::new("math", "Arithmetic and algebra")
                    .with_system("math tutor")
                    .with_prompt_template("Solve: {input}"),
            )
            .with_route(Route::new("math_proof", "Formal proofs").with_handler(|input: &str, _: &Value| {
                Ok(json!({"proof_of": input}))
            }))
    }

    #[tokio::test]
    async fn test_json_classification_runs_llm_route() {
        let ctx = ctx(r#"```json
{"route": "math", "reasoning": "numbers"}
```"#);
        let result = workflow().run(&ctx, "2+2").await.unwrap();
        assert_eq!(result.route, "math");
        assert!(!result.used_default);
        assert_eq!(result.routing["reasoning"], "numbers");
        assert_eq!(result.output, json!("[math tutor] Solve: 2+2"));
    }

    #[tokio::test]
    async fn test_plain_text_reply_prefers_longest_route_name() {
        let ctx = ctx("I would send this to math_proof.");
        let result = workflow().run(&ctx, "prove it").await.unwrap();
        assert_eq!(result.route, "math_proof");
        assert_eq!(result.output["proof_of"], "prove it");
    }

    #[tokio::test]
    async fn test_unknown_route_uses_default_or_fails() {
        let ctx = ctx(r#"{"route": "poetry"}"#);
        assert!(matches!(workflow().run(&ctx, "a haiku").await, Err(AgentError::Runtime(_))));

        let wf = workflow().with_default_route(Route::new("general", "Anything else"));
        let result = wf.run(&ctx, "a haiku").await.unwrap();
        assert_eq!(result.route, "general");
        assert!(result.used_default);
        assert_eq!(result.output, json!("[] a haiku"));
        assert!(ctx.messages().is_empty());
    }

    #[tokio::test]
    async fn test_steps_reported_and_schema_lists_routes() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let wf = workflow().with_step_callback(Arc::new(move |step: &str, _: &Value| {
            s.lock().unwrap().push(step.to_string())
        }));
        wf.run(&ctx(r#"{"route": "math"}"#), "1+1").await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["classify", "dispatch"]);

        let schema = wf.routes_schema();
        assert_eq!(schema["properties"]["route"]["enum"], json!(["math", "math_proof"]));
        assert!(RoutingWorkflow::new().run(&ctx("x"), "x").await.is_err());
    }
}
