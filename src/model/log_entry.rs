//! Log line shape crossing the agent→master wire and retained in the
//! bounded per-MasterAction buffer (§4.3, §9).

use super::status::LogLevel;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LogEntry {
    pub action_id: Uuid,
    pub task_id: String,
    pub node_name: String,
    pub level: LogLevel,
    pub message: String,
    pub emitted_at: DateTime<Utc>,
}
