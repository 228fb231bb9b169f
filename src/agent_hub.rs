//! Agent-Hub Facade (C8): the inbound endpoint surface the master exposes
//! to agents (§4.8, §6 "Agent→Master calls"). A thin adapter — every
//! inbound call is validated, correlated (action-id + task-id where
//! applicable), and forwarded to the registry (C1), coordinator (C4), or
//! log router (C3). No transport (gRPC/REST/WebSocket) is implemented
//! here, per §1's scope; this is the seam an external transport adapter
//! calls into once it has deserialized a wire message.

use crate::error::{CoordinatorError, RegistryError};
use crate::log_router::LogRouter;
use crate::model::{LogEntry, LogLevel};
use crate::registry::AgentRegistry;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::coordinator::NodeActionCoordinator;

/// Inbound surface agents call into (§6 "Agent→Master calls").
#[derive(Debug)]
pub struct AgentHubFacade {
    registry: Arc<AgentRegistry>,
    coordinator: Arc<NodeActionCoordinator>,
    log_router: Arc<LogRouter>,
}

impl AgentHubFacade {
    pub fn new(registry: Arc<AgentRegistry>, coordinator: Arc<NodeActionCoordinator>, log_router: Arc<LogRouter>) -> Self {
        Self { registry, coordinator, log_router }
    }

    /// `RegisterSlave` — C1 upsert. `os`/`max_concurrent_tasks`/`hostname`
    /// are accepted but not modeled by this core's `AgentState` (§3 scope).
    #[instrument(skip(self))]
    pub fn register_slave(&self, node_name: &str, version: &str, _os: &str, _max_concurrent_tasks: u32, _hostname: &str) {
        self.registry.register(node_name, version);
    }

    /// `SendHeartbeat` — C1 refresh.
    #[instrument(skip(self))]
    pub fn send_heartbeat(&self, node_name: &str) -> Result<(), RegistryError> {
        self.registry.heartbeat(node_name)
    }

    /// `ReportResourceUsage` — accepted for C1 but this core does not
    /// retain per-resource history (§9 out of scope for the distilled
    /// AgentState); treated as a liveness signal equivalent to a heartbeat.
    #[instrument(skip(self))]
    pub fn report_resource_usage(&self, node_name: &str, _cpu_percent: f64, _mem_bytes: u64, _disk_mb: u64) -> Result<(), RegistryError> {
        self.registry.heartbeat(node_name)
    }

    /// `ReportTaskReadiness` — C4 §4.4.3.
    #[instrument(skip(self, reason))]
    pub fn report_task_readiness(
        &self,
        action_id: Uuid,
        task_id: String,
        ready: bool,
        reason: Option<String>,
    ) -> Result<(), CoordinatorError> {
        self.coordinator.report_readiness(action_id, task_id, ready, reason)
    }

    /// `ReportTaskProgress` — C4 §4.4.4.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, message, result))]
    pub fn report_task_progress(
        &self,
        action_id: Uuid,
        task_id: String,
        status: String,
        percent: Option<u8>,
        message: String,
        timestamp_utc: DateTime<Utc>,
        result: Option<Value>,
    ) -> Result<(), CoordinatorError> {
        self.coordinator
            .report_progress(action_id, task_id, status, percent, message, timestamp_utc, result)
    }

    /// `ReportSlaveTaskLog` — C3 append.
    #[instrument(skip(self, message))]
    pub fn report_slave_task_log(
        &self,
        action_id: Uuid,
        task_id: String,
        node_name: String,
        level: LogLevel,
        message: String,
        timestamp_utc: DateTime<Utc>,
    ) {
        self.log_router.ingest(LogEntry {
            action_id,
            task_id,
            node_name,
            level,
            message,
            emitted_at: timestamp_utc,
        });
    }

    /// `ConfirmLogFlushForTask` — C3 satisfies the flush barrier for
    /// `node_name` under `action_id` (keyed by node, not task — §6).
    #[instrument(skip(self))]
    pub fn confirm_log_flush_for_task(&self, action_id: Uuid, node_name: &str) {
        self.log_router.confirm_flush(action_id, node_name);
    }
}
