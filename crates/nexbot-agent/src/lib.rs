//! Agent core for Nexbot: the reasoning loop, tool system, context
//! builder, subagent manager, command handling, and the orchestrator that
//! wires everything to the bus.

pub mod agent_loop;
pub mod commands;
pub mod context;
pub mod orchestrator;
pub mod reasoning;
pub mod subagent;
pub mod tools;

pub use agent_loop::{AgentError, AgentLoop};
pub use commands::{CommandHandler, RESTARTING_REPLY, SESSION_CLEARED_REPLY};
pub use context::ContextBuilder;
pub use orchestrator::{Orchestrator, ITERATION_LIMIT_APOLOGY};
pub use reasoning::strip_reasoning_tags;
pub use subagent::{Subagent, SubagentManager};
pub use tools::{ToolExecutor, ToolRegistry};
