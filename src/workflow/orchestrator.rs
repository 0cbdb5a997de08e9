//! 编排者-工作者工作流：编排模型把任务拆给若干专职 worker，worker 并发执行，最后合成总回答
//!
//! 每一轮编排模型看到原始任务与此前全部 worker 产出，回复
//! `{"subtasks": [{"worker": "...", "task": "..."}], "done": false}`；
//! 没有新子任务或 done=true 即结束，轮数受 max_iterations 约束，单轮子任务数受 max_steps 约束。
//! 分配给未注册 worker、计划无法解析、任一 worker 失败都使整个运行失败。
//! 未设置 synthesizer 时由模型合成最终回答。

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::context::Context;
use crate::core::{AgentError, Task};
use crate::llm::tool_protocol::extract_json_block;
use crate::workflow::types::{OrchestratorResult, WorkerOutput};
use crate::workflow::{log_step, StepCallback, DEFAULT_MAX_STEPS};

/// 编排轮数默认上限
pub const DEFAULT_MAX_ITERATIONS: usize = 5;

/// worker 处理函数：(子任务, 原始输入) -> 输出
pub type WorkerFn = Arc<dyn Fn(&str, &str) -> Result<String, AgentError> + Send + Sync>;

/// 合成函数：(原始输入, 全部 worker 产出) -> 最终回答
pub type Synthesizer = Arc<dyn Fn(&str, &[WorkerOutput]) -> Result<String, AgentError> + Send + Sync>;

const DEFAULT_ORCHESTRATOR_PROMPT: &str =
    "You are an orchestrator. Break the user's task into subtasks and assign each to the most suitable worker.";

const SYNTHESIZER_SYSTEM: &str =
    "Combine the specialists' contributions into one coherent, complete answer to the original task.";

#[derive(Clone)]
pub struct Worker {
    pub name: String,
    pub description: String,
    /// worker 的 system prompt
    pub system: String,
    handler: Option<WorkerFn>,
}

impl Worker {
    pub fn new(name: impl Into<String>, description: impl Into<String>, system: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            system: system.into(),
            handler: None,
        }
    }

    pub fn with_handler(mut self, f: impl Fn(&str, &str) -> Result<String, AgentError> + Send + Sync + 'static) -> Self {
        self.handler = Some(Arc::new(f));
        self
    }

    fn execute<'a>(&'a self, ctx: &'a Context, task: &'a str, input: &'a str) -> Task<'a, Result<String, AgentError>> {
        Task::new(async move {
            if let Some(handler) = &self.handler {
                return handler(task, input);
            }
            let prompt = format!("Task: {}\n\nOverall request: {}", task, input);
            ctx.complete_oneshot(&self.system, &prompt).await
        })
    }
}

#[derive(Debug, Deserialize)]
struct Assignment {
    worker: String,
    task: String,
}

#[derive(Debug, Deserialize)]
struct Plan {
    #[serde(default)]
    subtasks: Vec<Assignment>,
    #[serde(default)]
    done: bool,
}

fn parse_plan(reply: &str) -> Result<Plan, AgentError> {
    let block = extract_json_block(reply)
        .ok_or_else(|| AgentError::JsonParseError(format!("orchestrator reply has no JSON plan: {}", reply.trim())))?;
    Ok(serde_json::from_str(block)?)
}

pub struct OrchestratorWorkflow {
    orchestrator_prompt: String,
    workers: BTreeMap<String, Worker>,
    synthesizer: Option<Synthesizer>,
    max_iterations: usize,
    max_steps: usize,
    step_callback: Option<StepCallback>,
}

impl Default for OrchestratorWorkflow {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestratorWorkflow {
    pub fn new() -> Self {
        Self {
            orchestrator_prompt: DEFAULT_ORCHESTRATOR_PROMPT.to_string(),
            workers: BTreeMap::new(),
            synthesizer: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_steps: DEFAULT_MAX_STEPS,
            step_callback: None,
        }
    }

    pub fn with_orchestrator_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.orchestrator_prompt = prompt.into();
        self
    }

    pub fn with_worker(mut self, worker: Worker) -> Self {
        self.workers.insert(worker.name.clone(), worker);
        self
    }

    pub fn with_synthesizer(
        mut self,
        f: impl Fn(&str, &[WorkerOutput]) -> Result<String, AgentError> + Send + Sync + 'static,
    ) -> Self {
        self.synthesizer = Some(Arc::new(f));
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_step_callback(mut self, callback: StepCallback) -> Self {
        self.step_callback = Some(callback);
        self
    }

    /// worker 目录：[{name, description}]
    pub fn workers_schema(&self) -> Value {
        Value::Array(
            self.workers
                .values()
                .map(|w| json!({"name": w.name, "description": w.description}))
                .collect(),
        )
    }

    fn orchestrator_system_prompt(&self) -> String {
        format!(
            "{}\n\nAvailable workers:\n{}\n\nRespond with JSON only: \
             {{\"subtasks\": [{{\"worker\": \"<worker name>\", \"task\": \"<instructions>\"}}], \"done\": false}}. \
             Set \"done\" to true with no subtasks once the collected results are sufficient.",
            self.orchestrator_prompt,
            serde_json::to_string_pretty(&self.workers_schema()).unwrap_or_default()
        )
    }

    fn planning_prompt(input: &str, outputs: &[WorkerOutput]) -> String {
        if outputs.is_empty() {
            return format!("Task: {}", input);
        }
        let done: Vec<String> = outputs
            .iter()
            .map(|o| format!("- {} (round {}) on \"{}\":\n{}", o.worker, o.iteration, o.task, o.output))
            .collect();
        format!("Task: {}\n\nResults so far:\n{}", input, done.join("\n"))
    }

    async fn synthesize(&self, ctx: &Context, input: &str, outputs: &[WorkerOutput]) -> Result<String, AgentError> {
        if let Some(synthesizer) = &self.synthesizer {
            return synthesizer(input, outputs);
        }
        let sections: Vec<String> = outputs
            .iter()
            .map(|o| format!("## {}\n{}", o.worker, o.output))
            .collect();
        let prompt = format!("Original task: {}\n\n{}", input, sections.join("\n\n"));
        ctx.complete_oneshot(SYNTHESIZER_SYSTEM, &prompt).await
    }

    pub fn run<'a>(&'a self, ctx: &'a Context, input: &'a str) -> Task<'a, Result<OrchestratorResult, AgentError>> {
        Task::new(async move {
            if self.workers.is_empty() {
                return Err(AgentError::Runtime("orchestrator has no workers".to_string()));
            }
            let system = self.orchestrator_system_prompt();
            let mut outputs: Vec<WorkerOutput> = Vec::new();
            let mut iterations = 0;

            while iterations < self.max_iterations {
                let reply = ctx
                    .complete_oneshot(&system, &Self::planning_prompt(input, &outputs))
                    .await?;
                let plan = parse_plan(&reply)?;
                if plan.done || plan.subtasks.is_empty() {
                    log_step(self.step_callback.as_ref(), "orchestrator", "done", json!({"iteration": iterations}));
                    break;
                }
                if plan.subtasks.len() > self.max_steps {
                    return Err(AgentError::Runtime(format!(
                        "orchestrator planned {} subtasks, limit is {}",
                        plan.subtasks.len(),
                        self.max_steps
                    )));
                }
                iterations += 1;

                let mut assigned = Vec::with_capacity(plan.subtasks.len());
                for a in &plan.subtasks {
                    let worker = self.workers.get(&a.worker).ok_or_else(|| {
                        AgentError::Runtime(format!("orchestrator assigned unknown worker '{}'", a.worker))
                    })?;
                    assigned.push((worker, a));
                }
                log_step(
                    self.step_callback.as_ref(),
                    "orchestrator",
                    "plan",
                    json!({
                        "iteration": iterations,
                        "subtasks": plan.subtasks.iter().map(|a| json!({"worker": a.worker, "task": a.task})).collect::<Vec<_>>(),
                    }),
                );

                let results = Task::join_all(
                    assigned
                        .iter()
                        .map(|(worker, a)| worker.execute(ctx, &a.task, input))
                        .collect(),
                )
                .await;
                for ((worker, a), result) in assigned.iter().zip(results) {
                    let output = result?;
                    log_step(
                        self.step_callback.as_ref(),
                        "orchestrator",
                        "worker",
                        json!({"iteration": iterations, "worker": worker.name}),
                    );
                    outputs.push(WorkerOutput {
                        worker: worker.name.clone(),
                        task: a.task.clone(),
                        output,
                        iteration: iterations,
                    });
                }
            }

            let answer = self.synthesize(ctx, input, &outputs).await?;
            log_step(
                self.step_callback.as_ref(),
                "orchestrator",
                "synthesize",
                json!({"contributions": outputs.len()}),
            );
            Ok(OrchestratorResult {
                answer,
                iterations,
                outputs,
            })
        })
    }
}
