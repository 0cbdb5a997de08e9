//! 评估-优化工作流（Evaluator / Optimizer）
//!
//! 状态机：Generating -> Evaluating -> { Accepted | Generating（带反馈重试）| Exhausted }
//! - 分数 >= improvement_threshold：Accepted，立即结束
//! - 未达阈值且 iteration < max_iterations：反馈带入下一轮
//! - 否则 Exhausted：返回得分最高的候选（同分取最早一轮），accepted=false
//!
//! 各轮严格顺序执行：下一轮的输入依赖上一轮的反馈。
//! 生成与评估都是可替换的策略；默认实现通过 Context::complete_oneshot 调用模型，不写入对话历史。

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::warn;

use crate::config::EvaluatorSection;
use crate::context::Context;
use crate::core::{AgentError, Task};
use crate::llm::tool_protocol::extract_json_block;
use crate::workflow::types::{EvaluatorResult, Evaluation, IterationRecord, WorkflowPhase, WorkflowState};
use crate::workflow::{fill_template, log_step, StepCallback};

/// 生成策略：根据任务与上一轮评估产出候选
#[async_trait]
pub trait Optimizer: Send + Sync {
    async fn optimize(&self, ctx: &Context, input: &str, feedback: Option<&Evaluation>) -> Result<String, AgentError>;
}

/// 评估策略：给候选打分并给出改进意见
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, ctx: &Context, input: &str, output: &str) -> Result<Evaluation, AgentError>;
}

/// 默认生成：optimizer_prompt 模板（`{input}`、`{feedback}`）+ 一次模型调用
pub struct LlmOptimizer {
    prompt_template: String,
}

impl LlmOptimizer {
    pub fn new(prompt_template: impl Into<String>) -> Self {
        Self {
            prompt_template: prompt_template.into(),
        }
    }
}

#[async_trait]
impl Optimizer for LlmOptimizer {
    async fn optimize(&self, ctx: &Context, input: &str, feedback: Option<&Evaluation>) -> Result<String, AgentError> {
        let feedback = feedback.map(|f| f.feedback.as_str()).unwrap_or("");
        let prompt = fill_template(&self.prompt_template, &[("input", input), ("feedback", feedback)]);
        ctx.complete_oneshot(ctx.system_prompt(), &prompt).await
    }
}

/// 默认评估：evaluator_prompt 模板（`{input}`、`{output}`、`{criteria}`），期望回复 `{"score", "feedback"}`
pub struct LlmEvaluator {
    prompt_template: String,
    criteria: Vec<String>,
}

impl LlmEvaluator {
    pub fn new(prompt_template: impl Into<String>, criteria: Vec<String>) -> Self {
        Self {
            prompt_template: prompt_template.into(),
            criteria,
        }
    }
}

/// 解析评估回复；格式不符时记 0 分并把原文作为反馈
pub fn parse_evaluation(reply: &str) -> Evaluation {
    let parsed = extract_json_block(reply)
        .and_then(|json| serde_json::from_str::<serde_json::Value>(json).ok())
        .and_then(|v| {
            let score = v.get("score")?.as_f64()?;
            let feedback = v.get("feedback").and_then(|f| f.as_str()).unwrap_or("");
            Some(Evaluation::new(score, feedback))
        });
    parsed.unwrap_or_else(|| {
        warn!(reply = %reply, "evaluator reply is not a score object, treating as 0");
        Evaluation::new(0.0, reply.trim())
    })
}

#[async_trait]
impl Evaluator for LlmEvaluator {
    async fn evaluate(&self, ctx: &Context, input: &str, output: &str) -> Result<Evaluation, AgentError> {
        let criteria = self.criteria.join(", ");
        let prompt = fill_template(
            &self.prompt_template,
            &[("input", input), ("output", output), ("criteria", &criteria)],
        );
        let reply = ctx
            .complete_oneshot("You are a strict reviewer. Reply with JSON only.", &prompt)
            .await?;
        Ok(parse_evaluation(&reply))
    }
}

/// 同步闭包生成策略（确定性测试用）
pub struct FnOptimizer<F>(pub F);

#[async_trait]
impl<F> Optimizer for FnOptimizer<F>
where
    F: Fn(&str, Option<&Evaluation>) -> Result<String, AgentError> + Send + Sync,
{
    async fn optimize(&self, _ctx: &Context, input: &str, feedback: Option<&Evaluation>) -> Result<String, AgentError> {
        (self.0)(input, feedback)
    }
}

/// 同步闭包评估策略
pub struct FnEvaluator<F>(pub F);

#[async_trait]
impl<F> Evaluator for FnEvaluator<F>
where
    F: Fn(&str, &str) -> Result<Evaluation, AgentError> + Send + Sync,
{
    async fn evaluate(&self, _ctx: &Context, input: &str, output: &str) -> Result<Evaluation, AgentError> {
        (self.0)(input, output)
    }
}

pub struct EvaluatorWorkflow {
    max_iterations: usize,
    improvement_threshold: f64,
    optimizer: Box<dyn Optimizer>,
    evaluator: Box<dyn Evaluator>,
    step_callback: Option<StepCallback>,
}

impl EvaluatorWorkflow {
    /// 从 [workflow.evaluator] 段创建，使用模型驱动的默认策略
    pub fn from_config(cfg: &EvaluatorSection) -> Self {
        Self {
            max_iterations: cfg.max_iterations.max(1),
            improvement_threshold: cfg.improvement_threshold,
            optimizer: Box::new(LlmOptimizer::new(cfg.optimizer_prompt.clone())),
            evaluator: Box::new(LlmEvaluator::new(cfg.evaluator_prompt.clone(), cfg.criteria.clone())),
            step_callback: None,
        }
    }

    pub fn with_limits(mut self, max_iterations: usize, improvement_threshold: f64) -> Self {
        self.max_iterations = max_iterations.max(1);
        self.improvement_threshold = improvement_threshold;
        self
    }

    pub fn with_optimizer(mut self, optimizer: impl Optimizer + 'static) -> Self {
        self.optimizer = Box::new(optimizer);
        self
    }

    pub fn with_evaluator(mut self, evaluator: impl Evaluator + 'static) -> Self {
        self.evaluator = Box::new(evaluator);
        self
    }

    pub fn with_step_callback(mut self, callback: StepCallback) -> Self {
        self.step_callback = Some(callback);
        self
    }

    fn step(&self, name: &str, data: serde_json::Value) {
        log_step(self.step_callback.as_ref(), "evaluator", name, data);
    }

    /// 运行收敛循环；生成或评估策略报错时整体失败
    pub fn run<'a>(&'a self, ctx: &'a Context, input: &'a str) -> Task<'a, Result<EvaluatorResult, AgentError>> {
        Task::new(async move {
            let started_at = Utc::now();
            let mut state = WorkflowState::new();
            let mut records: Vec<IterationRecord> = Vec::new();
            // (score, 记录下标)
            let mut best: Option<(f64, usize)> = None;

            loop {
                state.phase = WorkflowPhase::Generating;
                self.step("generate", json!({"iteration": state.iteration}));
                state.current_output = self
                    .optimizer
                    .optimize(ctx, input, state.feedback.as_ref())
                    .await?;

                state.phase = WorkflowPhase::Evaluating;
                let eval = self.evaluator.evaluate(ctx, input, &state.current_output).await?;
                self.step(
                    "evaluate",
                    json!({"iteration": state.iteration, "score": eval.score, "feedback": eval.feedback}),
                );

                records.push(IterationRecord {
                    iteration: state.iteration,
                    score: eval.score,
                    feedback: eval.feedback.clone(),
                    output: state.current_output.clone(),
                });
                if best.map(|(s, _)| eval.score > s).unwrap_or(true) {
                    best = Some((eval.score, records.len() - 1));
                }

                if eval.score >= self.improvement_threshold {
                    state.accepted = true;
                    state.phase = WorkflowPhase::Accepted;
                    break;
                }
                if state.iteration < self.max_iterations {
                    state.iteration += 1;
                    state.feedback = Some(eval);
                    continue;
                }
                state.phase = WorkflowPhase::Exhausted;
                break;
            }

            let chosen = match state.phase {
                WorkflowPhase::Accepted => records.len() - 1,
                _ => best.map(|(_, idx)| idx).unwrap_or(records.len() - 1),
            };
            let final_response = records[chosen].output.clone();
            let final_score = records[chosen].score;
            self.step(
                "finish",
                json!({"phase": state.phase, "iterations": state.iteration, "chosen_iteration": records[chosen].iteration}),
            );

            Ok(EvaluatorResult {
                final_response,
                iterations: state.iteration,
                final_score,
                accepted: state.accepted,
                phase: state.phase,
                evaluations: records,
                started_at,
                finished_at: Utc::now(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn ctx() -> Context {
        Context::new(Arc::new(MockLlmClient::new()))
    }

    #[test]
    fn test_parse_evaluation() {
        let e = parse_evaluation("```json\n{\"score\": 0.75, \"feedback\": \"add detail\"}\n```");
        assert_eq!(e, Evaluation::new(0.75, "add detail"));
        let e = parse_evaluation("looks fine to me");
        assert_eq!(e.score, 0.0);
        assert_eq!(e.feedback, "looks fine to me");
        assert_eq!(parse_evaluation(r#"{"score": 3}"#).score, 1.0);
    }

    #[tokio::test]
    async fn test_feedback_is_carried_forward() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let s = seen.clone();
        let wf = EvaluatorWorkflow::from_config(&EvaluatorSection::default())
            .with_limits(3, 0.8)
            .with_optimizer(FnOptimizer(move |_input: &str, fb: Option<&Evaluation>| {
                s.lock().unwrap().push(fb.map(|f| f.feedback.clone()));
                Ok("draft".to_string())
            }))
            .with_evaluator(FnEvaluator(|_: &str, _: &str| Ok(Evaluation::new(0.1, "more"))));
        let ctx = ctx();
        let result = wf.run(&ctx, "task").await.unwrap();
        assert_eq!(result.phase, WorkflowPhase::Exhausted);
        assert_eq!(*seen.lock().unwrap(), vec![None, Some("more".to_string()), Some("more".to_string())]);
    }

    #[tokio::test]
    async fn test_strategy_error_aborts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let wf = EvaluatorWorkflow::from_config(&EvaluatorSection::default())
            .with_optimizer(FnOptimizer(move |_: &str, _: Option<&Evaluation>| {
                c.fetch_add(1, Ordering::SeqCst);
                Err(AgentError::Transport("down".into()))
            }));
        let ctx = ctx();
        let err = wf.run(&ctx, "task").await.unwrap_err();
        assert_eq!(err, AgentError::Transport("down".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_default_strategies_with_mock_model() {
        // Mock 回显无法解析为分数 -> 每轮 0 分，最终 Exhausted，且不写历史
        let wf = EvaluatorWorkflow::from_config(&EvaluatorSection::default()).with_limits(2, 0.8);
        let ctx = ctx();
        let result = wf.run(&ctx, "write a haiku").await.unwrap();
        assert!(!result.accepted);
        assert_eq!(result.iterations, 2);
        assert_eq!(result.evaluations.len(), 2);
        assert!(result.final_response.starts_with("Echo: "));
        assert!(ctx.messages().is_empty());
        let v = result.to_value();
        assert_eq!(v["phase"], "exhausted");
        assert_eq!(v["evaluations"][1]["iteration"], 2);
    }
}
