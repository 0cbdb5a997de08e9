//! 链式提示工作流：按顺序执行若干步，上一步输出作为下一步输入
//!
//! 模板占位符：`{input}`（原始输入）、`{previous}`（上一步输出，第一步等于 input）。
//! 每步可选 validator（失败即终止整条链）与 transformer；use_tools 的步骤走 chat_with_tools 并写入对话历史，
//! 其余步骤走 complete_oneshot，不触碰历史。

use std::sync::Arc;

use serde_json::json;

use crate::context::Context;
use crate::core::{AgentError, Task};
use crate::workflow::types::{ChainResult, ChainStepRecord};
use crate::workflow::{fill_template, log_step, StepCallback, DEFAULT_MAX_STEPS};

type Validator = Arc<dyn Fn(&str) -> Result<(), String> + Send + Sync>;
type Transformer = Arc<dyn Fn(String) -> String + Send + Sync>;

/// 单个步骤
#[derive(Clone)]
pub struct ChainStep {
    pub name: String,
    pub prompt_template: String,
    pub system: Option<String>,
    pub use_tools: bool,
    validator: Option<Validator>,
    transformer: Option<Transformer>,
}

impl ChainStep {
    pub fn new(name: impl Into<String>, prompt_template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt_template: prompt_template.into(),
            system: None,
            use_tools: false,
            validator: None,
            transformer: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_tools(mut self) -> Self {
        self.use_tools = true;
        self
    }

    pub fn with_validator(mut self, f: impl Fn(&str) -> Result<(), String> + Send + Sync + 'static) -> Self {
        self.validator = Some(Arc::new(f));
        self
    }

    pub fn with_transformer(mut self, f: impl Fn(String) -> String + Send + Sync + 'static) -> Self {
        self.transformer = Some(Arc::new(f));
        self
    }
}

pub struct PromptChainWorkflow {
    steps: Vec<ChainStep>,
    max_steps: usize,
    step_callback: Option<StepCallback>,
}

impl PromptChainWorkflow {
    pub fn new(steps: Vec<ChainStep>) -> Self {
        Self {
            steps,
            max_steps: DEFAULT_MAX_STEPS,
            step_callback: None,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_step_callback(mut self, callback: StepCallback) -> Self {
        self.step_callback = Some(callback);
        self
    }

    pub fn run<'a>(&'a self, ctx: &'a mut Context, input: &'a str) -> Task<'a, Result<ChainResult, AgentError>> {
        Task::new(async move {
            if self.steps.len() > self.max_steps {
                return Err(AgentError::Runtime(format!(
                    "prompt chain has {} steps, limit is {}",
                    self.steps.len(),
                    self.max_steps
                )));
            }

            let mut previous = input.to_string();
            let mut records = Vec::with_capacity(self.steps.len());
            for (idx, step) in self.steps.iter().enumerate() {
                let prompt = fill_template(&step.prompt_template, &[("input", input), ("previous", &previous)]);
                log_step(
                    self.step_callback.as_ref(),
                    "prompt_chain",
                    &step.name,
                    json!({"index": idx, "use_tools": step.use_tools}),
                );

                let mut output = if step.use_tools {
                    ctx.chat_with_tools(&prompt, Vec::new()).await?.content
                } else {
                    let system = step.system.clone().unwrap_or_else(|| ctx.system_prompt().to_string());
                    ctx.complete_oneshot(&system, &prompt).await?
                };

                if let Some(validate) = &step.validator {
                    validate(&output).map_err(|reason| {
                        AgentError::Runtime(format!("step '{}' failed validation: {}", step.name, reason))
                    })?;
                }
                if let Some(transform) = &step.transformer {
                    output = transform(output);
                }

                records.push(ChainStepRecord {
                    name: step.name.clone(),
                    output: output.clone(),
                });
                previous = output;
            }

            Ok(ChainResult {
                final_output: previous,
                steps: records,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    fn ctx() -> Context {
        Context::new(Arc::new(MockLlmClient::new()))
    }

    #[tokio::test]
    async fn test_previous_output_flows_forward() {
        let wf = PromptChainWorkflow::new(vec![
            ChainStep::new("outline", "outline: {input}"),
            ChainStep::new("expand", "expand: {previous}").with_transformer(|s| s.to_uppercase()),
        ]);
        let mut ctx = ctx();
        let result = wf.run(&mut ctx, "rust").await.unwrap();
        assert_eq!(result.steps[0].output, "Echo: outline: rust");
        assert_eq!(result.final_output, "ECHO: EXPAND: ECHO: OUTLINE: RUST");
        assert!(ctx.messages().is_empty());
    }

    #[tokio::test]
    async fn test_validator_stops_chain() {
        let wf = PromptChainWorkflow::new(vec![
            ChainStep::new("first", "{input}").with_validator(|out| {
                if out.contains("forbidden") {
                    Err("contains forbidden word".into())
                } else {
                    Ok(())
                }
            }),
            ChainStep::new("never", "{previous}"),
        ]);
        let mut ctx = ctx();
        let err = wf.run(&mut ctx, "forbidden").await.unwrap_err();
        assert!(matches!(err, AgentError::Runtime(ref m) if m.contains("first")));
    }

    #[tokio::test]
    async fn test_tool_step_writes_history_and_limit() {
        let wf = PromptChainWorkflow::new(vec![ChainStep::new("ask", "{input}").with_tools()]);
        let mut ctx = ctx();
        wf.run(&mut ctx, "hello").await.unwrap();
        assert_eq!(ctx.messages().len(), 2);

        let wf = PromptChainWorkflow::new(vec![ChainStep::new("a", "x"), ChainStep::new("b", "y")]).with_max_steps(1);
        assert!(wf.run(&mut ctx, "z").await.is_err());
    }
}
