//! Node-action record (§3 `NodeAction`) — one fan-out unit of a Stage,
//! holding a `NodeTask` per targeted node and the aggregate verdict the
//! Node-Action Coordinator (C4) computes from them.

use super::node_task::NodeTask;
use super::status::NodeActionStatus;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct NodeAction {
    pub action_id: Uuid,
    pub task_type: String,
    pub status: NodeActionStatus,
    pub tasks: HashMap<String, NodeTask>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NodeAction {
    pub fn new(action_id: Uuid, task_type: impl Into<String>, tasks: HashMap<String, NodeTask>) -> Self {
        let now = Utc::now();
        Self {
            action_id,
            task_type: task_type.into(),
            status: NodeActionStatus::AwaitingReadiness,
            tasks,
            created_at: now,
            updated_at: now,
        }
    }

    /// Average of all per-node task progress percentages, floored (§4.4.4).
    pub fn aggregate_progress_percent(&self) -> u8 {
        if self.tasks.is_empty() {
            return 0;
        }
        let sum: u32 = self.tasks.values().map(|t| t.progress_percent as u32).sum();
        (sum / self.tasks.len() as u32) as u8
    }

    /// True once every tracked node task has reached a terminal sub-status.
    pub fn all_tasks_terminal(&self) -> bool {
        self.tasks.values().all(|t| t.status.is_terminal())
    }

    /// Success requires every node task to have reached `Succeeded` (§4.4.6).
    pub fn all_tasks_succeeded(&self) -> bool {
        self.tasks.values().all(|t| t.status.is_success())
    }

    pub fn apply_status(&mut self, new_status: NodeActionStatus) -> bool {
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
