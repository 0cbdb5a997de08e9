//! 工具层：能力 trait、注册表与调度、参数校验、内置工具

pub mod echo;
pub mod executor;
pub mod filesystem;
pub mod function;
pub mod media_loader;
pub mod registry;
pub mod respond;
pub mod schema;
pub mod shell;
pub mod summarize;
pub mod validate;

pub use echo::EchoTool;
pub use filesystem::{FileReadTool, FileWriteTool, SafeFs};
pub use function::FunctionTool;
pub use media_loader::MediaLoaderTool;
pub use registry::{Tool, ToolDescriptor, ToolPayload, ToolRegistry, ToolResult};
pub use respond::RespondTool;
pub use schema::tool_call_schema_json;
pub use shell::ShellTool;
pub use summarize::SummarizeTool;
pub use validate::{validate_params, ParamValidator};
