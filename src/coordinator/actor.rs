//! The per-NodeAction actor: owns one [`NodeAction`] exclusively and drives
//! it through readiness → dispatch → execution → terminal (§4.4), serviced
//! by a single `tokio::select!` loop over its mailbox and the watchdogs it
//! starts. This is the "one per-action serialization primitive" §5 calls
//! for — no shared mutex, just a task that owns its state outright.

use super::events::{CoordinatorEvent, NodeActionResult};
use crate::config::CoordinatorTimeouts;
use crate::journal::{JournalRecord, JournalRecordKind, JournalService};
use crate::log_router::LogRouter;
use crate::model::{NodeAction, NodeActionStatus, NodeTaskStatus};
use crate::registry::AgentRegistry;
use crate::transport::{AgentTransport, MasterToAgentMessage};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Reports `(percent, message)` up to the owning Stage Context (§9:
/// "progress reporter as a function-typed seam").
pub type ProgressReporter = Box<dyn Fn(u8, String) + Send + Sync>;

pub struct NodeActionActor {
    pub(super) node_action: NodeAction,
    pub(super) mailbox: mpsc::Receiver<CoordinatorEvent>,
    pub(super) transport: Arc<dyn AgentTransport>,
    #[allow(dead_code)]
    pub(super) registry: Arc<AgentRegistry>,
    pub(super) log_router: Arc<LogRouter>,
    pub(super) journal: Arc<dyn JournalService>,
    pub(super) timeouts: CoordinatorTimeouts,
    pub(super) progress_reporter: ProgressReporter,
    pub(super) result_tx: Option<oneshot::Sender<NodeActionResult>>,
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(60 * 60 * 24 * 365)
}

impl NodeActionActor {
    #[instrument(skip(self), fields(action_id = %self.node_action.action_id))]
    pub async fn run(mut self) {
        let action_id = self.node_action.action_id;

        if self.node_action.tasks.is_empty() {
            self.resolve_immediately_successful().await;
            return;
        }

        self.begin_readiness_phase().await;
        let mut readiness_deadline = Some(Instant::now() + self.timeouts.readiness_timeout());
        let mut grace_deadline: Option<Instant> = None;

        loop {
            if self.node_action.all_tasks_terminal() {
                break;
            }

            tokio::select! {
                biased;

                _ = tokio::time::sleep_until(readiness_deadline.unwrap_or_else(far_future)), if readiness_deadline.is_some() => {
                    self.on_readiness_timeout().await;
                    readiness_deadline = None;
                }

                _ = tokio::time::sleep_until(grace_deadline.unwrap_or_else(far_future)), if grace_deadline.is_some() => {
                    self.on_cancellation_grace_expired().await;
                    grace_deadline = None;
                }

                maybe_event = self.mailbox.recv() => {
                    match maybe_event {
                        Some(event) => {
                            let was_cancelling = self.node_action.status == NodeActionStatus::Cancelling;
                            self.handle_event(event).await;
                            if !was_cancelling && self.node_action.status == NodeActionStatus::Cancelling {
                                grace_deadline = Some(Instant::now() + self.timeouts.cancellation_grace());
                            }
                        }
                        None => break,
                    }
                }
            }

            if readiness_deadline.is_some() && !self.any_task_awaiting_readiness() {
                readiness_deadline = None;
            }
        }

        self.finalize(action_id).await;
    }

    fn any_task_awaiting_readiness(&self) -> bool {
        self.node_action
            .tasks
            .values()
            .any(|t| t.status == NodeTaskStatus::ReadinessCheckSent)
    }

    async fn resolve_immediately_successful(mut self) {
        self.node_action.status = NodeActionStatus::Succeeded;
        if let Some(tx) = self.result_tx.take() {
            let _ = tx.send(NodeActionResult {
                action_id: self.node_action.action_id,
                success: true,
                final_state: self.node_action,
            });
        }
    }

    #[instrument(skip(self))]
    async fn begin_readiness_phase(&mut self) {
        let action_id = self.node_action.action_id;
        let task_ids: Vec<String> = self.node_action.tasks.keys().cloned().collect();
        for task_id in task_ids {
            let (node_name, task_type) = {
                let task = &self.node_action.tasks[&task_id];
                (task.node_name.clone(), self.node_action.task_type.clone())
            };
            let send_result = self
                .transport
                .send(
                    &node_name,
                    MasterToAgentMessage::PrepareForTask {
                        action_id,
                        task_id: task_id.clone(),
                        task_type,
                    },
                )
                .await;
            if let Err(err) = send_result {
                warn!(%action_id, task_id, error = %err, "PrepareForTask send failed");
                if let Some(task) = self.node_action.tasks.get_mut(&task_id) {
                    task.error_message = Some(err.to_string());
                    task.apply_status(NodeTaskStatus::NotReadyForTask);
                }
            }
        }
        self.recompute_aggregate();
    }

    async fn handle_event(&mut self, event: CoordinatorEvent) {
        match event {
            CoordinatorEvent::ReadinessReport { task_id, ready, reason } => {
                self.on_readiness_report(task_id, ready, reason).await;
            }
            CoordinatorEvent::ProgressUpdate {
                task_id,
                status,
                percent,
                message,
                timestamp,
                result,
            } => {
                self.on_progress_update(task_id, status, percent, message, timestamp, result)
                    .await;
            }
            CoordinatorEvent::NodeConnectivityChanged { node_name, connectivity } => {
                self.on_node_connectivity_changed(node_name, connectivity);
            }
            CoordinatorEvent::ReadinessTimeout => self.on_readiness_timeout().await,
            CoordinatorEvent::Cancel { reason } => {
                self.on_cancel(reason).await;
            }
            CoordinatorEvent::CancellationGraceExpired => self.on_cancellation_grace_expired().await,
            CoordinatorEvent::FlushConfirmed { task_id } => {
                // Informational only: the actual barrier wait happens in
                // `finalize` against the Log Router directly.
                tracing::debug!(task_id, "flush confirmed for task");
            }
        }
    }

    #[instrument(skip(self, reason))]
    async fn on_readiness_report(&mut self, task_id: String, ready: bool, reason: Option<String>) {
        let action_id = self.node_action.action_id;
        let Some(task) = self.node_action.tasks.get_mut(&task_id) else {
            warn!(%action_id, task_id, "ReadinessReport for unknown task");
            return;
        };
        if task.status.is_terminal() {
            return;
        }
        if task.status != NodeTaskStatus::ReadinessCheckSent {
            // Duplicate/late report past the readiness phase; ignore.
            return;
        }

        if !ready {
            task.error_message = reason;
            task.apply_status(NodeTaskStatus::NotReadyForTask);
            self.recompute_aggregate();
            return;
        }

        task.apply_status(NodeTaskStatus::ReadyToExecute);
        let node_name = task.node_name.clone();
        let task_type = self.node_action.task_type.clone();
        let payload = task.payload.clone();
        let timeout_seconds = task.timeout_seconds;

        let send_result = self
            .transport
            .send(
                &node_name,
                MasterToAgentMessage::AssignSlaveTask {
                    action_id,
                    task_id: task_id.clone(),
                    task_type,
                    payload,
                    timeout_seconds,
                },
            )
            .await;

        if let Some(task) = self.node_action.tasks.get_mut(&task_id) {
            match send_result {
                Ok(()) => {
                    task.apply_status(NodeTaskStatus::TaskDispatched);
                }
                Err(err) => {
                    task.error_message = Some(err.to_string());
                    task.apply_status(NodeTaskStatus::Failed);
                }
            }
        }
        self.recompute_aggregate();
    }

    #[instrument(skip(self, message, result))]
    async fn on_progress_update(
        &mut self,
        task_id: String,
        status: String,
        percent: Option<u8>,
        message: String,
        timestamp: chrono::DateTime<Utc>,
        result: Option<serde_json::Value>,
    ) {
        let action_id = self.node_action.action_id;
        let Ok(new_status) = status.parse::<NodeTaskStatus>() else {
            warn!(%action_id, task_id, status, "ProgressUpdate with unrecognized status, dropped");
            return;
        };

        let Some(task) = self.node_action.tasks.get_mut(&task_id) else {
            warn!(%action_id, task_id, "ProgressUpdate for unknown task");
            return;
        };

        if task.status.is_terminal() {
            // Sticky terminal sub-status: later updates dropped (§4.4.4, §8 property 4).
            return;
        }

        if let Some(p) = percent {
            task.progress_percent = p.min(100);
        }
        task.error_message = Some(message);

        let became_terminal = new_status.is_terminal();
        task.apply_status(new_status);

        if became_terminal {
            task.updated_at = timestamp;
            if let Some(result_json) = result {
                task.result = Some(result_json);
            }
            let record = JournalRecord {
                action_id,
                recorded_at: Utc::now(),
                kind: JournalRecordKind::NodeTaskResult,
                detail: serde_json::json!({
                    "task_id": task_id,
                    "status": new_status.to_string(),
                }),
            };
            crate::journal::append_or_log(self.journal.as_ref(), record).await;
        }

        self.recompute_aggregate();
    }

    #[instrument(skip(self))]
    fn on_node_connectivity_changed(&mut self, node_name: String, connectivity: crate::model::Connectivity) {
        if !connectivity.is_disconnected() {
            return;
        }
        let mut any_changed = false;
        for task in self.node_action.tasks.values_mut() {
            if task.node_name == node_name && !task.status.is_terminal() {
                task.error_message = Some(format!("node '{node_name}' became {connectivity}"));
                if task.apply_status(NodeTaskStatus::NodeOfflineDuringTask) {
                    any_changed = true;
                }
            }
        }
        if any_changed {
            info!(node_name, %connectivity, "tasks forced terminal by node-health observer");
            self.recompute_aggregate();
        }
    }

    #[instrument(skip(self))]
    async fn on_readiness_timeout(&mut self) {
        let mut any_changed = false;
        for task in self.node_action.tasks.values_mut() {
            if task.status == NodeTaskStatus::ReadinessCheckSent {
                task.error_message = Some("readiness check timed out".to_string());
                if task.apply_status(NodeTaskStatus::ReadinessCheckTimedOut) {
                    any_changed = true;
                }
            }
        }
        if any_changed {
            warn!(action_id = %self.node_action.action_id, "readiness timeout elapsed for one or more tasks");
            self.recompute_aggregate();
        }
    }

    #[instrument(skip(self, reason))]
    async fn on_cancel(&mut self, reason: String) {
        if self.node_action.status.is_terminal() {
            return;
        }
        self.node_action.apply_status(NodeActionStatus::Cancelling);

        let action_id = self.node_action.action_id;
        let task_ids: Vec<String> = self
            .node_action
            .tasks
            .iter()
            .filter(|(_, t)| !t.status.is_terminal())
            .map(|(id, _)| id.clone())
            .collect();

        for task_id in task_ids {
            let node_name = self.node_action.tasks[&task_id].node_name.clone();
            if let Some(task) = self.node_action.tasks.get_mut(&task_id) {
                task.apply_status(NodeTaskStatus::Cancelling);
            }
            if let Err(err) = self
                .transport
                .send(
                    &node_name,
                    MasterToAgentMessage::CancelTask {
                        action_id,
                        task_id: task_id.clone(),
                    },
                )
                .await
            {
                warn!(%action_id, task_id, error = %err, "CancelTask send failed");
            }
        }
        info!(%action_id, reason, "node-action cancellation initiated");
        self.recompute_aggregate();
    }

    #[instrument(skip(self))]
    async fn on_cancellation_grace_expired(&mut self) {
        let mut any_changed = false;
        for task in self.node_action.tasks.values_mut() {
            if !task.status.is_terminal() {
                task.error_message = Some("cancellation grace period expired".to_string());
                if task.apply_status(NodeTaskStatus::Cancelled) {
                    any_changed = true;
                }
            }
        }
        if any_changed {
            warn!(action_id = %self.node_action.action_id, "cancellation grace expired, forcing remaining tasks cancelled");
        }
        self.recompute_aggregate();
    }

    fn recompute_aggregate(&self) {
        let percent = self.node_action.aggregate_progress_percent();
        let message = self.status_message();
        (self.progress_reporter)(percent, message);
    }

    fn status_message(&self) -> String {
        let mut in_progress = 0u32;
        let mut succeeded = 0u32;
        let mut failed_or_cancelled = 0u32;
        for task in self.node_action.tasks.values() {
            if task.status.is_success() {
                succeeded += 1;
            } else if task.status.is_terminal() {
                failed_or_cancelled += 1;
            } else {
                in_progress += 1;
            }
        }
        format!("In progress: {in_progress}, Succeeded: {succeeded}, Failed/Cancelled: {failed_or_cancelled}")
    }

    /// §4.4.6 / §4.4.7 tail: compute the verdict, flush logs, journal, and
    /// resolve the caller's future.
    #[instrument(skip(self))]
    async fn finalize(mut self, action_id: Uuid) {
        let verdict = if self
            .node_action
            .tasks
            .values()
            .any(|t| t.status == NodeTaskStatus::Cancelled || t.status == NodeTaskStatus::Cancelling)
        {
            NodeActionStatus::Cancelled
        } else if !self.node_action.all_tasks_succeeded() {
            NodeActionStatus::Failed
        } else {
            NodeActionStatus::Succeeded
        };
        self.node_action.apply_status(verdict);
        self.recompute_aggregate();

        let participating_nodes: HashSet<String> = self.node_action.tasks.values().map(|t| t.node_name.clone()).collect();
        for node_name in &participating_nodes {
            let _ = self
                .transport
                .send(node_name, MasterToAgentMessage::RequestLogFlush { action_id })
                .await;
        }
        let node_list: Vec<String> = participating_nodes.into_iter().collect();
        let flushed = self
            .log_router
            .wait_for_flush_all(action_id, &node_list, self.timeouts.flush_timeout())
            .await;
        if !flushed {
            warn!(%action_id, "log flush barrier timed out for one or more nodes; proceeding to journal-complete");
        }

        let record = JournalRecord {
            action_id,
            recorded_at: Utc::now(),
            kind: JournalRecordKind::NodeActionFinished,
            detail: serde_json::json!({ "verdict": verdict.to_string() }),
        };
        crate::journal::append_or_log(self.journal.as_ref(), record).await;

        info!(%action_id, verdict = %verdict, "node-action resolved");

        if let Some(tx) = self.result_tx.take() {
            let success = verdict == NodeActionStatus::Succeeded;
            let _ = tx.send(NodeActionResult {
                action_id,
                success,
                final_state: self.node_action,
            });
        }
    }
}
