//! Node-Action Coordinator (C4): the facade that submits NodeActions,
//! routes ingress events from the Agent-Hub Facade (C8) to the right
//! per-action actor, and cascades registry connectivity events (C1) into
//! every active action so §4.4.5's node-health interleaving can run
//! concurrently with readiness/progress handling.

mod actor;
mod events;
mod handle;

pub use actor::ProgressReporter;
pub use events::{CoordinatorEvent, NodeActionResult};

use crate::config::CoordinatorTimeouts;
use crate::error::CoordinatorError;
use crate::journal::JournalService;
use crate::log_router::LogRouter;
use crate::model::NodeAction;
use crate::registry::AgentRegistry;
use crate::transport::AgentTransport;
use dashmap::DashMap;
use handle::NodeActionHandle;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug)]
pub struct NodeActionCoordinator {
    active: Arc<DashMap<Uuid, NodeActionHandle>>,
    transport: Arc<dyn AgentTransport>,
    registry: Arc<AgentRegistry>,
    log_router: Arc<LogRouter>,
    journal: Arc<dyn JournalService>,
    timeouts: CoordinatorTimeouts,
}

impl NodeActionCoordinator {
    pub fn new(
        transport: Arc<dyn AgentTransport>,
        registry: Arc<AgentRegistry>,
        log_router: Arc<LogRouter>,
        journal: Arc<dyn JournalService>,
        timeouts: CoordinatorTimeouts,
    ) -> Arc<Self> {
        let active = Arc::new(DashMap::new());
        let coordinator = Arc::new(Self {
            active: Arc::clone(&active),
            transport,
            registry: Arc::clone(&registry),
            log_router,
            journal,
            timeouts,
        });
        coordinator.spawn_connectivity_forwarder(registry, active);
        coordinator
    }

    /// Forward every Agent Registry connectivity transition (§4.1) to all
    /// currently-active actors; each actor ignores nodes it doesn't own
    /// (§4.4.5).
    fn spawn_connectivity_forwarder(self: &Arc<Self>, registry: Arc<AgentRegistry>, active: Arc<DashMap<Uuid, NodeActionHandle>>) {
        let mut events = registry.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                for entry in active.iter() {
                    let _ = entry.value().dispatch(CoordinatorEvent::NodeConnectivityChanged {
                        node_name: event.node_name.clone(),
                        connectivity: event.connectivity,
                    });
                }
            }
        });
    }

    /// `Submit(nodeAction, progressReporter, parentContext)` (§4.4.1).
    #[instrument(skip(self, node_action, progress_reporter))]
    pub async fn submit(
        &self,
        node_action: NodeAction,
        progress_reporter: ProgressReporter,
    ) -> Result<NodeActionResult, CoordinatorError> {
        let action_id = node_action.action_id;
        if self.active.contains_key(&action_id) {
            return Err(CoordinatorError::DuplicateActionId(action_id));
        }

        let (h, result_rx) = handle::spawn(
            node_action,
            Arc::clone(&self.transport),
            Arc::clone(&self.registry),
            Arc::clone(&self.log_router),
            Arc::clone(&self.journal),
            self.timeouts.clone(),
            progress_reporter,
        );
        self.active.insert(action_id, h);

        let result = result_rx.await.map_err(|_| CoordinatorError::UnknownAction(action_id))?;
        self.active.remove(&action_id);
        Ok(result)
    }

    /// `SubmitParallel(list) -> future<list<NodeActionResult>>` (§4.4.8).
    /// Progress reported up to the stage is the arithmetic mean of each
    /// child action's own progress.
    pub async fn submit_parallel(
        &self,
        actions: Vec<(NodeAction, ProgressReporter)>,
    ) -> Vec<Result<NodeActionResult, CoordinatorError>> {
        let futures = actions.into_iter().map(|(action, reporter)| self.submit(action, reporter));
        futures::future::join_all(futures).await
    }

    /// Route a `ReportTaskReadiness` ingress call (§4.4.3) to the owning actor.
    pub fn report_readiness(
        &self,
        action_id: Uuid,
        task_id: String,
        ready: bool,
        reason: Option<String>,
    ) -> Result<(), CoordinatorError> {
        self.dispatch(action_id, CoordinatorEvent::ReadinessReport { task_id, ready, reason })
    }

    /// Route a `ReportTaskProgress` ingress call (§4.4.4) to the owning actor.
    #[allow(clippy::too_many_arguments)]
    pub fn report_progress(
        &self,
        action_id: Uuid,
        task_id: String,
        status: String,
        percent: Option<u8>,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
        result: Option<serde_json::Value>,
    ) -> Result<(), CoordinatorError> {
        self.dispatch(
            action_id,
            CoordinatorEvent::ProgressUpdate {
                task_id,
                status,
                percent,
                message,
                timestamp,
                result,
            },
        )
    }

    /// Cancel a running action (§4.4.7). No-op (returns `UnknownAction`) if
    /// the action has already resolved.
    pub fn cancel_action(&self, action_id: Uuid, reason: impl Into<String>) -> Result<(), CoordinatorError> {
        self.dispatch(action_id, CoordinatorEvent::Cancel { reason: reason.into() })
    }

    fn dispatch(&self, action_id: Uuid, event: CoordinatorEvent) -> Result<(), CoordinatorError> {
        self.active
            .get(&action_id)
            .ok_or(CoordinatorError::UnknownAction(action_id))?
            .dispatch(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::InMemoryJournal;
    use crate::model::{NodeAction, NodeTask};
    use crate::registry::AgentRegistry;
    use crate::testing::FakeTransport;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;

    fn quick_timeouts() -> CoordinatorTimeouts {
        CoordinatorTimeouts {
            readiness_timeout_seconds: 5,
            cancellation_grace_seconds: 1,
            flush_timeout_seconds: 1,
        }
    }

    fn test_coordinator(transport: Arc<FakeTransport>) -> Arc<NodeActionCoordinator> {
        let registry = AgentRegistry::new(Duration::from_secs(60));
        let log_router = LogRouter::new(100);
        let journal = InMemoryJournal::new();
        NodeActionCoordinator::new(transport, registry, log_router, journal, quick_timeouts())
    }

    fn single_task_action(action_id: Uuid, task_id: &str, node_name: &str) -> NodeAction {
        let mut tasks = HashMap::new();
        tasks.insert(task_id.to_string(), NodeTask::new(task_id, node_name, json!({})));
        NodeAction::new(action_id, "VerifyConfiguration", tasks)
    }

    fn noop_reporter() -> ProgressReporter {
        Box::new(|_, _| {})
    }

    #[tokio::test]
    async fn submit_with_no_tasks_resolves_successful_immediately() {
        let transport = Arc::new(FakeTransport::new());
        let coordinator = test_coordinator(transport);
        let action = NodeAction::new(Uuid::now_v7(), "NoOp", HashMap::new());
        let result = coordinator.submit(action, noop_reporter()).await.unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn happy_path_readiness_then_progress_resolves_succeeded() {
        let transport = Arc::new(FakeTransport::new());
        let coordinator = test_coordinator(Arc::clone(&transport));
        let action_id = Uuid::now_v7();
        let action = single_task_action(action_id, "t1", "node-1");

        let coordinator2 = Arc::clone(&coordinator);
        let join = tokio::spawn(async move { coordinator2.submit(action, noop_reporter()).await });

        // Let the actor send PrepareForTask before we reply.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(transport.sent_to("node-1").len(), 1);

        coordinator
            .report_readiness(action_id, "t1".to_string(), true, None)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(transport.sent_to("node-1").len(), 2);

        coordinator
            .report_progress(
                action_id,
                "t1".to_string(),
                "Succeeded".to_string(),
                Some(100),
                "done".to_string(),
                Utc::now(),
                Some(json!({"filesChecked": 1250})),
            )
            .unwrap();

        let result = join.await.unwrap().unwrap();
        assert!(result.success);
        assert_eq!(result.final_state.tasks["t1"].progress_percent, 100);
    }

    #[tokio::test]
    async fn duplicate_submit_is_rejected_while_first_still_active() {
        let transport = Arc::new(FakeTransport::new());
        let coordinator = test_coordinator(transport);
        let action_id = Uuid::now_v7();
        let action = single_task_action(action_id, "t1", "node-1");

        let coordinator2 = Arc::clone(&coordinator);
        let _join = tokio::spawn(async move { coordinator2.submit(action, noop_reporter()).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let duplicate = single_task_action(action_id, "t1", "node-1");
        let err = coordinator.submit(duplicate, noop_reporter()).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::DuplicateActionId(id) if id == action_id));
    }

    #[tokio::test]
    async fn readiness_failure_marks_task_not_ready_and_fails_action() {
        let transport = Arc::new(FakeTransport::new());
        let coordinator = test_coordinator(Arc::clone(&transport));
        let action_id = Uuid::now_v7();
        let action = single_task_action(action_id, "t1", "node-1");

        let coordinator2 = Arc::clone(&coordinator);
        let join = tokio::spawn(async move { coordinator2.submit(action, noop_reporter()).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        coordinator
            .report_readiness(action_id, "t1".to_string(), false, Some("disk full".to_string()))
            .unwrap();

        let result = join.await.unwrap().unwrap();
        assert!(!result.success);
        assert_eq!(
            result.final_state.tasks["t1"].status,
            crate::model::NodeTaskStatus::NotReadyForTask
        );
    }

    #[tokio::test]
    async fn cancel_forces_remaining_tasks_cancelled_after_grace() {
        let transport = Arc::new(FakeTransport::new());
        let coordinator = test_coordinator(Arc::clone(&transport));
        let action_id = Uuid::now_v7();
        let action = single_task_action(action_id, "t1", "node-1");

        let coordinator2 = Arc::clone(&coordinator);
        let join = tokio::spawn(async move { coordinator2.submit(action, noop_reporter()).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        coordinator.cancel_action(action_id, "operator requested").unwrap();

        let result = join.await.unwrap().unwrap();
        assert!(!result.success);
        assert_eq!(result.final_state.tasks["t1"].status, crate::model::NodeTaskStatus::Cancelled);
    }
}
