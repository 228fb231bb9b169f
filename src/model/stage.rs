//! A single step of a MasterAction's workflow (§3 `Stage`).
//!
//! Stages are sequential within a MasterAction; each stage may drive zero or
//! more NodeActions (via the Stage Context, C5) before completing.

use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl StageStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct Stage {
    pub stage_id: Uuid,
    pub name: String,
    pub status: StageStatus,
    /// NodeActions spawned by this stage, in spawn order.
    pub node_action_ids: Vec<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Stage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            stage_id: Uuid::now_v7(),
            name: name.into(),
            status: StageStatus::Pending,
            node_action_ids: Vec::new(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn start(&mut self) {
        if self.status == StageStatus::Pending {
            self.status = StageStatus::Running;
            self.started_at = Some(Utc::now());
        }
    }

    pub fn finish(&mut self, succeeded: bool) {
        if self.status.is_terminal() {
            return;
        }
        self.status = if succeeded { StageStatus::Succeeded } else { StageStatus::Failed };
        self.finished_at = Some(Utc::now());
    }
}
