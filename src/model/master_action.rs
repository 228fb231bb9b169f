//! Top-level workflow record (§3 `MasterAction`) — the unit a client submits
//! and polls. Owns a sequence of Stages and rolls their outcome up into an
//! overall status and percent complete.

use super::status::MasterActionStatus;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct MasterAction {
    pub action_id: Uuid,
    pub operation_type: String,
    pub status: MasterActionStatus,
    pub request_payload: Value,
    /// Names of the stages this workflow is made of, in execution order.
    /// Populated by the `WorkflowHandler` at construction time.
    pub stage_names: Vec<String>,
    /// Index (0-based) of the stage currently running, or `stage_names.len()`
    /// once all stages have completed.
    pub current_stage_index: usize,
    /// Cached overall percent, last computed by [`MasterAction::overall_progress_percent`]
    /// and pinned to 100 on terminal entry (§8 property 2).
    pub progress_percent: u8,
    pub result: Option<Value>,
    /// Terminal summary message, set by whichever of `SetCompleted`/`SetFailed`/
    /// `SetCancelled` first wins the race to a terminal status (§4.6).
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MasterAction {
    pub fn new(operation_type: impl Into<String>, request_payload: Value, stage_names: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            action_id: Uuid::now_v7(),
            operation_type: operation_type.into(),
            status: MasterActionStatus::Pending,
            request_payload,
            stage_names,
            current_stage_index: 0,
            progress_percent: 0,
            result: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Overall percent complete per §4.6:
    /// `floor(((n - 1) / N) * 100 + p / N)` where `n` is the 1-based index of
    /// the current stage, `N` the total stage count, and `p` the current
    /// stage's own 0-100 percent.
    pub fn overall_progress_percent(&self, current_stage_percent: u8) -> u8 {
        let total = self.stage_names.len();
        if total == 0 {
            return 100;
        }
        if self.current_stage_index >= total {
            return 100;
        }
        let n = (self.current_stage_index + 1) as f64;
        let big_n = total as f64;
        let p = current_stage_percent as f64;
        let percent = ((n - 1.0) / big_n) * 100.0 + p / big_n;
        percent.floor() as u8
    }

    pub fn apply_status(&mut self, new_status: MasterActionStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        if self.status == new_status {
            return false;
        }
        self.status = new_status;
        self.updated_at = Utc::now();
        if new_status.is_terminal() {
            self.progress_percent = 100;
        }
        true
    }
}
