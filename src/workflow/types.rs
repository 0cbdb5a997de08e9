//! 工作流类型定义
//!
//! 评估-优化循环的阶段、单次评估、运行状态与最终结果，以及链式 / 并行 / 路由 / 编排工作流的结果

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 评估-优化循环的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    /// 生成候选输出
    Generating,
    /// 评估候选输出
    Evaluating,
    /// 分数达到阈值
    Accepted,
    /// 迭代用尽仍未达到阈值
    Exhausted,
}

/// 一次评估：分数（0.0–1.0）与改进意见
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub score: f64,
    #[serde(default)]
    pub feedback: String,
}

impl Evaluation {
    /// 分数被限制在 [0, 1]；NaN 视为 0
    pub fn new(score: f64, feedback: impl Into<String>) -> Self {
        let score = if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) };
        Self {
            score,
            feedback: feedback.into(),
        }
    }
}

/// 单轮记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationRecord {
    pub iteration: usize,
    pub score: f64,
    pub feedback: String,
    pub output: String,
}

/// 运行状态：仅由引擎在循环内修改，循环结束即丢弃
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowState {
    pub iteration: usize,
    pub current_output: String,
    pub feedback: Option<Evaluation>,
    pub accepted: bool,
    pub phase: WorkflowPhase,
}

impl WorkflowState {
    pub fn new() -> Self {
        Self {
            iteration: 1,
            current_output: String::new(),
            feedback: None,
            accepted: false,
            phase: WorkflowPhase::Generating,
        }
    }
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self::new()
    }
}

/// 评估-优化工作流结果；accepted=false 表示迭代用尽，final_response 为得分最高的候选
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluatorResult {
    pub final_response: String,
    pub iterations: usize,
    pub final_score: f64,
    pub accepted: bool,
    pub phase: WorkflowPhase,
    pub evaluations: Vec<IterationRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl EvaluatorResult {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// 链式工作流单步记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainStepRecord {
    pub name: String,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainResult {
    pub final_output: String,
    pub steps: Vec<ChainStepRecord>,
}

/// 并行工作流模式
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum ParallelMode {
    /// 拆分子任务，结果按顺序拼接
    Sectioning,
    /// 同一问题多次作答，多数一致且一致率达到阈值才给出结论
    Voting { threshold: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParallelResult {
    pub mode: ParallelMode,
    /// 每个子任务的输出；失败项为 None
    pub outputs: Vec<Option<String>>,
    /// 拼接结果或投票结论；投票未达阈值时为 None
    pub combined: Option<String>,
    /// 投票一致率（仅 Voting）
    pub agreement: Option<f64>,
}

/// 路由工作流结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingResult {
    pub route: String,
    /// 分类结果不在路由表中，交给了默认路由
    pub used_default: bool,
    /// 分类信息（模型回复的 JSON，或由文本回复推断）
    pub routing: Value,
    pub output: Value,
}

/// 单个 worker 的产出
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerOutput {
    pub worker: String,
    pub task: String,
    pub output: String,
    /// 所在的编排轮次（从 1 开始）
    pub iteration: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrchestratorResult {
    pub answer: String,
    pub iterations: usize,
    pub outputs: Vec<WorkerOutput>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluation_score_clamped() {
        assert_eq!(Evaluation::new(1.7, "").score, 1.0);
        assert_eq!(Evaluation::new(-0.2, "").score, 0.0);
        assert_eq!(Evaluation::new(f64::NAN, "").score, 0.0);
    }

    #[test]
    fn test_phase_serializes_snake_case() {
        assert_eq!(serde_json::to_value(WorkflowPhase::Exhausted).unwrap(), "exhausted");
        let v = serde_json::to_value(ParallelMode::Voting { threshold: 0.5 }).unwrap();
        assert_eq!(v["mode"], "voting");
        assert_eq!(v["threshold"], 0.5);
    }
}
