//! 工作流层：评估-优化循环、链式提示、并行分段 / 投票、路由分发、编排者-工作者
//!
//! 所有工作流都以 Context 为模型调用底座；每一步通过 tracing 记录，并可回调 StepCallback。

pub mod evaluator;
pub mod orchestrator;
pub mod parallel;
pub mod prompt_chain;
pub mod routing;
pub mod types;

use std::sync::Arc;

use serde_json::Value;

pub use evaluator::{
    Evaluator, EvaluatorWorkflow, FnEvaluator, FnOptimizer, LlmEvaluator, LlmOptimizer, Optimizer,
};
pub use orchestrator::{OrchestratorWorkflow, Synthesizer, Worker, WorkerFn, DEFAULT_MAX_ITERATIONS};
pub use parallel::ParallelWorkflow;
pub use prompt_chain::{ChainStep, PromptChainWorkflow};
pub use routing::{Route, RouteFn, RoutingWorkflow};
pub use types::*;

/// 步骤回调：(步骤名, 步骤数据)
pub type StepCallback = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// 链式 / 并行工作流默认的步骤上限（编排工作流用作单轮子任务上限）
pub const DEFAULT_MAX_STEPS: usize = 10;

pub(crate) fn log_step(callback: Option<&StepCallback>, workflow: &str, step: &str, data: Value) {
    tracing::info!(workflow, step, data = %data, "workflow step");
    if let Some(cb) = callback {
        cb(step, &data);
    }
}

/// 模板占位符替换：`{key}` -> value
pub(crate) fn fill_template(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{key}}}"), value)
    })
}
