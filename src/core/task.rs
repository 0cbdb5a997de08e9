//! Task：可挂起的单结果工作单元
//!
//! 对 `Pin<Box<dyn Future>>` 的薄封装，惰性执行：未被 await 的 Task 不会开始，丢弃即取消；
//! 一旦开始执行，不提供中途取消。多个 Task 只有在调用方显式 join 时才并发推进。

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::core::AgentError;

/// 单结果工作单元；生命周期 'a 允许借用调用方状态（如 `&mut Context`）
#[must_use = "tasks do nothing unless awaited"]
pub struct Task<'a, T> {
    fut: Pin<Box<dyn Future<Output = T> + Send + 'a>>,
}

impl<'a, T> Task<'a, T> {
    pub fn new<F>(fut: F) -> Self
    where
        F: Future<Output = T> + Send + 'a,
    {
        Self { fut: Box::pin(fut) }
    }

    /// 已完成的 Task，直接产出 value
    pub fn ready(value: T) -> Self
    where
        T: Send + 'a,
    {
        Self::new(std::future::ready(value))
    }

    pub fn map<U, F>(self, f: F) -> Task<'a, U>
    where
        T: 'a,
        F: FnOnce(T) -> U + Send + 'a,
    {
        Task::new(async move { f(self.await) })
    }

    /// 同时推进多个 Task，按传入顺序返回结果（调用方显式组合的唯一并发方式）
    pub fn join_all(tasks: Vec<Task<'a, T>>) -> Task<'a, Vec<T>>
    where
        T: Send + 'a,
    {
        Task::new(futures_util::future::join_all(tasks))
    }

    /// 在当前线程上阻塞等待结果（供同步调用方使用）；已处于异步运行时内部时返回 Runtime 错误
    pub fn blocking_wait(self) -> Result<T, AgentError> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(AgentError::Runtime(
                "blocking_wait called from inside an async runtime".to_string(),
            ));
        }
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| AgentError::Runtime(e.to_string()))?;
        Ok(rt.block_on(self))
    }
}

impl<T> Future for Task<'_, T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        self.fut.as_mut().poll(cx)
    }
}
