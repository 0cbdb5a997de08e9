//! 核心原语：错误类型、惰性异步任务与异步生成器

pub mod error;
pub mod generator;
pub mod task;

pub use error::AgentError;
pub use generator::{AsyncGenerator, Yielder};
pub use task::Task;
