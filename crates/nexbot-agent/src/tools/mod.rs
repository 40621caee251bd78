//! Tool system: trait, registry, executor, and the built-in tools.

pub mod base;
pub mod executor;
pub mod message;
pub mod registry;
pub mod spawn;

pub use base::{ExecConfig, SecretsResolver, Tool, ToolError, DEFAULT_TOOL_TIMEOUT};
pub use executor::{ToolCallOutcome, ToolExecutor, ToolFailure};
pub use message::MessageTool;
pub use registry::ToolRegistry;
pub use spawn::{SpawnTool, SUBAGENT_TASK_TYPE};
