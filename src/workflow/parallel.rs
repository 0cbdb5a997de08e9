//! 并行工作流：多个一次性模型调用同时推进（Task::join_all），共享同一个模型句柄
//!
//! - Sectioning：各子任务结果按传入顺序拼接；任一失败则整体失败
//! - Voting：同一问题多次作答，归一化后计票；失败的作答不计票，全部失败才报错；
//!   多数答案的一致率 >= threshold 时给出结论，否则 combined 为 None

use std::collections::HashMap;

use serde_json::json;

use crate::context::Context;
use crate::core::{AgentError, Task};
use crate::workflow::types::{ParallelMode, ParallelResult};
use crate::workflow::{log_step, StepCallback, DEFAULT_MAX_STEPS};

pub struct ParallelWorkflow {
    tasks: Vec<String>,
    system: String,
    mode: ParallelMode,
    max_steps: usize,
    step_callback: Option<StepCallback>,
}

impl ParallelWorkflow {
    /// 分段：每个 prompt 是一个独立子任务
    pub fn sectioning(tasks: Vec<String>) -> Self {
        Self {
            tasks,
            system: String::new(),
            mode: ParallelMode::Sectioning,
            max_steps: DEFAULT_MAX_STEPS,
            step_callback: None,
        }
    }

    /// 投票：同一 prompt 作答 voters 次
    pub fn voting(prompt: impl Into<String>, voters: usize, threshold: f64) -> Self {
        let prompt = prompt.into();
        Self {
            tasks: vec![prompt; voters],
            mode: ParallelMode::Voting { threshold },
            ..Self::sectioning(Vec::new())
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = system.into();
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

    pub fn run<'a>(&'a self, ctx: &'a Context) -> Task<'a, Result<ParallelResult, AgentError>> {
        Task::new(async move {
            if self.tasks.is_empty() {
                return Err(AgentError::ParamValidation("parallel workflow has no tasks".to_string()));
            }
            if self.tasks.len() > self.max_steps {
                return Err(AgentError::Runtime(format!(
                    "parallel workflow has {} tasks, limit is {}",
                    self.tasks.len(),
                    self.max_steps
                )));
            }
            log_step(
                self.step_callback.as_ref(),
                "parallel",
                "dispatch",
                json!({"tasks": self.tasks.len(), "mode": self.mode}),
            );

            let units: Vec<_> = self
                .tasks
                .iter()
                .map(|prompt| ctx.complete_oneshot(&self.system, prompt))
                .collect();
            let results = Task::join_all(units).await;

            let result = match self.mode {
                ParallelMode::Sectioning => {
                    let outputs = results.into_iter().collect::<Result<Vec<_>, _>>()?;
                    ParallelResult {
                        mode: self.mode,
                        combined: Some(outputs.join("\n\n")),
                        outputs: outputs.into_iter().map(Some).collect(),
                        agreement: None,
                    }
                }
                ParallelMode::Voting { threshold } => {
                    let outputs: Vec<Option<String>> = results.into_iter().map(Result::ok).collect();
                    let (combined, agreement) = tally(&outputs, threshold)?;
                    ParallelResult {
                        mode: self.mode,
                        outputs,
                        combined,
                        agreement: Some(agreement),
                    }
                }
            };

            log_step(
                self.step_callback.as_ref(),
                "parallel",
                "combine",
                json!({"combined": result.combined.is_some(), "agreement": result.agreement}),
            );
            Ok(result)
        })
    }
}

/// 计票：返回（达到阈值的多数答案, 一致率）；同票取最先出现的答案
fn tally(outputs: &[Option<String>], threshold: f64) -> Result<(Option<String>, f64), AgentError> {
    let votes: Vec<&str> = outputs.iter().flatten().map(|s| s.trim()).collect();
    if votes.is_empty() {
        return Err(AgentError::Runtime("all voters failed".to_string()));
    }
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for (order, v) in votes.iter().enumerate() {
        let entry = counts.entry(v.to_lowercase()).or_insert((0, order));
        entry.0 += 1;
    }
    let (winner_count, first_idx) = counts
        .values()
        .copied()
        .max_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)))
        .unwrap_or((0, 0));
    let agreement = winner_count as f64 / votes.len() as f64;
    let combined = (agreement >= threshold).then(|| votes[first_idx].to_string());
    Ok((combined, agreement))
}
