//! Spawn tool — delegate a task to a background subagent.
//!
//! The tool enqueues a `subagent` task on the worker pool and returns an
//! immediate confirmation to the model; a pool worker hands the task to
//! the subagent manager, which runs it in an isolated loop instance.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use nexbot_core::pool::{Task, WorkerPool};

use super::base::{require_string, ExecConfig, Tool};

/// Task type tag consumed by the subagent pool executor.
pub const SUBAGENT_TASK_TYPE: &str = "subagent";

/// Payload carried by a `subagent` pool task.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct SpawnPayload {
    pub task: String,
    pub parent_session: String,
}

/// Tool that lets the agent spawn background subagent tasks.
pub struct SpawnTool {
    pool: Arc<WorkerPool>,
}

impl SpawnTool {
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Tool for SpawnTool {
    fn name(&self) -> &str {
        "spawn"
    }

    fn description(&self) -> &str {
        "Spawn a subagent to handle a task in the background. Use this for complex \
         or time-consuming tasks that can run independently. The subagent will \
         complete the task and report back when done."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "The task for the subagent to complete"
                }
            },
            "required": ["task"]
        })
    }

    async fn execute(
        &self,
        params: HashMap<String, Value>,
        cfg: ExecConfig,
    ) -> anyhow::Result<String> {
        let task = require_string(&params, "task")?;

        let payload = SpawnPayload {
            task,
            parent_session: cfg.session_id.clone(),
        };
        let task_id = Uuid::new_v4().to_string();
        self.pool
            .submit(Task::new(
                task_id.clone(),
                SUBAGENT_TASK_TYPE,
                serde_json::to_string(&payload)?,
            ))
            .await
            .map_err(|e| anyhow::anyhow!("failed to enqueue subagent task: {e}"))?;

        Ok(format!(
            "Subagent task {task_id} queued. I'll have the result shortly."
        ))
    }
}
