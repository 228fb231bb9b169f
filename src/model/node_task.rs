//! Per-node task record (§3 `NodeTask`) — the leaf unit the Node-Action
//! Coordinator (C4) drives through its readiness/dispatch/progress state
//! machine for a single node.

use super::status::NodeTaskStatus;
use chrono::{DateTime, Utc};
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct NodeTask {
    pub task_id: String,
    pub node_name: String,
    pub status: NodeTaskStatus,
    /// Opaque task-type-specific payload handed to the agent verbatim.
    pub payload: Value,
    /// Per-task timeout handed to the agent in `AssignSlaveTask` (§6
    /// `timeout-sec?`). `None` means no agent-enforced deadline.
    pub timeout_seconds: Option<u64>,
    /// 0-100, only meaningful while `status == InProgress`.
    pub progress_percent: u8,
    pub result: Option<Value>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NodeTask {
    pub fn new(task_id: impl Into<String>, node_name: impl Into<String>, payload: Value) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            node_name: node_name.into(),
            status: NodeTaskStatus::ReadinessCheckSent,
            payload,
            timeout_seconds: None,
            progress_percent: 0,
            result: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach a per-task timeout, carried through to `AssignSlaveTask`.
    pub fn with_timeout_seconds(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = Some(timeout_seconds);
        self
    }

    /// Apply a new status, honoring the sticky-terminal invariant (§8
    /// property 4): once terminal, later non-terminal transitions are
    /// silently dropped. Returns whether the status actually changed.
    pub fn apply_status(&mut self, new_status: NodeTaskStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        if self.status == new_status {
            return false;
        }
        self.status = new_status;
        self.updated_at = Utc::now();
        true
    }
}
