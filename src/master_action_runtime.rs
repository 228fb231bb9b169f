//! Master-Action Runtime (C6): drives a registered [`WorkflowHandler`]
//! through its stages, aggregates overall progress via the §4.6 formula,
//! and publishes the terminal status.
//!
//! `MasterActionContext`'s scoped logger is a `tracing::Span` entered for
//! the duration of each stage body (`action_id`, `stage_index`, `stage_name`
//! fields) — the manually-entered equivalent of the `#[instrument]` +
//! structured-field idiom used elsewhere in this crate, generalized here
//! because stage boundaries are runtime data rather than lexical function
//! calls.

use crate::coordinator::NodeActionCoordinator;
use crate::error::RuntimeError;
use crate::journal::{self, JournalRecord, JournalRecordKind, JournalService};
use crate::log_router::LogRouter;
use crate::model::{LogEntry, LogLevel, MasterAction, MasterActionStatus};
use crate::registry::AgentRegistry;
use crate::stage_context::{self, StageContext, StageProgressReporter};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// A registered workflow: declares its stage names up front and drives them
/// through a [`MasterActionContext`] (§4.6 step 4, §4.7).
#[async_trait]
pub trait WorkflowHandler: Send + Sync {
    /// Stage names in execution order, known before the handler runs a
    /// single one — lets the runtime call `InitializeProgress` up front.
    fn stage_names(&self) -> Vec<String>;

    /// Drive the workflow to one of the terminal setters on `ctx`. A
    /// returned `Err` is folded into `SetFailed` by the runtime; the `Ok`
    /// payload becomes the MasterAction's result if the handler itself
    /// never called a terminal setter.
    async fn execute(&self, ctx: Arc<MasterActionContext>) -> Result<Value, String>;
}

/// Tracks node-action ids a MasterAction currently has in flight (across
/// however many stages/parallel children), so a cancellation of the parent
/// context can cascade into every one of them without the coordinator or
/// stage context needing to know about each other's internals (§5
/// "cascading through the parent context").
#[derive(Debug, Clone, Default)]
pub(crate) struct ActiveNodeActions {
    ids: Arc<Mutex<HashSet<Uuid>>>,
}

impl ActiveNodeActions {
    pub(crate) fn register(&self, id: Uuid) {
        self.ids.lock().unwrap().insert(id);
    }

    pub(crate) fn deregister(&self, id: Uuid) {
        self.ids.lock().unwrap().remove(&id);
    }

    fn snapshot(&self) -> Vec<Uuid> {
        self.ids.lock().unwrap().iter().copied().collect()
    }
}

/// Carries the MasterAction, a cancellation channel, the journal service,
/// and the log-flush function a `WorkflowHandler` drives its stages
/// through (§4.6 step 3).
pub struct MasterActionContext {
    action: Mutex<MasterAction>,
    coordinator: Arc<NodeActionCoordinator>,
    registry: Arc<AgentRegistry>,
    journal: Arc<dyn JournalService>,
    log_router: Arc<LogRouter>,
    cancel_tx: watch::Sender<bool>,
    active_node_actions: ActiveNodeActions,
    total_stages: AtomicUsize,
}

impl MasterActionContext {
    fn new(
        action: MasterAction,
        coordinator: Arc<NodeActionCoordinator>,
        registry: Arc<AgentRegistry>,
        journal: Arc<dyn JournalService>,
        log_router: Arc<LogRouter>,
    ) -> Arc<Self> {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let active_node_actions = ActiveNodeActions::default();
        let context = Arc::new(Self {
            action: Mutex::new(action),
            coordinator: Arc::clone(&coordinator),
            registry,
            journal,
            log_router,
            cancel_tx,
            active_node_actions: active_node_actions.clone(),
            total_stages: AtomicUsize::new(0),
        });
        spawn_cancellation_forwarder(cancel_rx, coordinator, active_node_actions);
        context
    }

    pub fn action_id(&self) -> Uuid {
        self.action.lock().unwrap().action_id
    }

    pub fn operation_type(&self) -> String {
        self.action.lock().unwrap().operation_type.clone()
    }

    /// A snapshot of the current MasterAction, suitable for polling/status
    /// APIs. Cloned out from behind the lock so callers never hold it.
    pub fn snapshot(&self) -> MasterAction {
        self.action.lock().unwrap().clone()
    }

    /// `InitializeProgress(totalStages)` (§4.6 step 4) — called once by the
    /// handler before its first `BeginStage`.
    pub fn initialize_progress(&self, total_stages: usize) {
        self.total_stages.store(total_stages, Ordering::SeqCst);
    }

    /// Signal cancellation; cascades into every node-action currently
    /// tracked as in flight. Idempotent.
    pub fn cancel(&self, reason: impl Into<String>) {
        let reason = reason.into();
        info!(action_id = %self.action_id(), reason, "master action cancellation requested");
        let _ = self.cancel_tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    pub fn cancellation_signal(&self) -> watch::Receiver<bool> {
        self.cancel_tx.subscribe()
    }

    /// `BeginStage(name, input?)` (§4.5/§4.6): builds a StageContext scoped
    /// inside a tracing span stamped `(action_id, stage_index, stage_name)`,
    /// runs `body`, and guarantees `StageContext::finish` runs on every exit
    /// path via [`stage_context::run_stage`].
    pub async fn run_stage<F, Fut, T>(self: &Arc<Self>, stage_name: impl Into<String>, body: F) -> T
    where
        F: FnOnce(Arc<StageContext>) -> Fut,
        Fut: Future<Output = (T, bool)>,
    {
        let stage_name = stage_name.into();
        let stage_index = self.action.lock().unwrap().current_stage_index;
        let action_id = self.action_id();

        let span = info_span!("stage", %action_id, stage_index, stage_name = %stage_name);

        let started = JournalRecord {
            action_id,
            recorded_at: Utc::now(),
            kind: JournalRecordKind::StageStarted,
            detail: serde_json::json!({ "stage_name": stage_name, "stage_index": stage_index }),
        };
        journal::append_or_log(self.journal.as_ref(), started).await;

        let reporter = self.stage_progress_reporter(stage_index);
        let stage_context = StageContext::new(
            action_id,
            stage_name,
            Arc::clone(&self.coordinator),
            Arc::clone(&self.registry),
            Arc::clone(&self.journal),
            Arc::clone(&self.log_router),
            reporter,
            self.active_node_actions.clone(),
        );

        let output = stage_context::run_stage(stage_context, body).instrument(span).await;
        self.action.lock().unwrap().current_stage_index = stage_index + 1;
        output
    }

    /// Builds the stage-local-percent -> overall-percent seam (§9 "progress
    /// reporter as a function-typed seam", §4.6 overall progress math).
    fn stage_progress_reporter(self: &Arc<Self>, stage_index: usize) -> StageProgressReporter {
        let context = Arc::clone(self);
        Arc::new(move |percent, message| {
            let overall = {
                let mut action = context.action.lock().unwrap();
                if action.status.is_terminal() {
                    return;
                }
                action.current_stage_index = stage_index;
                let overall = action.overall_progress_percent(percent);
                action.progress_percent = overall;
                overall
            };
            tracing::info!(action_id = %context.action_id(), stage_index, percent, overall, message, "stage progress");
        })
    }

    /// `Log(level, message, error?)` at the MasterAction scope (outside any
    /// particular stage) — pushed to the bounded log buffer and journal.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let entry = LogEntry {
            action_id: self.action_id(),
            task_id: String::new(),
            node_name: String::new(),
            level,
            message: message.into(),
            emitted_at: Utc::now(),
        };
        self.log_router.ingest(entry);
    }

    /// `SetCompleted(msg)` (§4.6).
    pub async fn set_completed(self: &Arc<Self>, message: impl Into<String>) {
        self.terminal(MasterActionStatus::Succeeded, message).await;
    }

    /// `SetFailed(msg)` (§4.6).
    pub async fn set_failed(self: &Arc<Self>, message: impl Into<String>) {
        self.terminal(MasterActionStatus::Failed, message).await;
    }

    /// `SetCancelled(msg)` (§4.6).
    pub async fn set_cancelled(self: &Arc<Self>, message: impl Into<String>) {
        self.terminal(MasterActionStatus::Cancelled, message).await;
    }

    async fn terminal(self: &Arc<Self>, status: MasterActionStatus, message: impl Into<String>) {
        let message = message.into();
        let changed = {
            let mut action = self.action.lock().unwrap();
            let changed = action.apply_status(status);
            if changed {
                action.error_message = Some(message.clone());
            }
            changed
        };
        if !changed {
            return;
        }
        self.log(
            if status == MasterActionStatus::Succeeded { LogLevel::Information } else { LogLevel::Error },
            message.clone(),
        );
        let record = JournalRecord {
            action_id: self.action_id(),
            recorded_at: Utc::now(),
            kind: JournalRecordKind::MasterActionFinished,
            detail: serde_json::json!({ "status": status.to_string(), "message": message }),
        };
        journal::append_or_log(self.journal.as_ref(), record).await;
        info!(action_id = %self.action_id(), status = %status, "master action resolved");
    }
}

impl std::fmt::Debug for MasterActionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let action = self.action.lock().unwrap();
        f.debug_struct("MasterActionContext")
            .field("action_id", &action.action_id)
            .field("status", &action.status)
            .field("current_stage_index", &action.current_stage_index)
            .finish()
    }
}

fn spawn_cancellation_forwarder(
    mut cancel_rx: watch::Receiver<bool>,
    coordinator: Arc<NodeActionCoordinator>,
    active: ActiveNodeActions,
) {
    tokio::spawn(async move {
        if cancel_rx.changed().await.is_err() {
            return;
        }
        if !*cancel_rx.borrow() {
            return;
        }
        for id in active.snapshot() {
            let _ = coordinator.cancel_action(id, "master action cancelled");
        }
    });
}

/// Drives an incoming operation request through a registered handler
/// (§4.6): resolves the handler, constructs the MasterAction and its
/// context, runs `handler.execute`, and folds an escaping `Err` (or a
/// handler that returns without reaching a terminal setter) into
/// `SetFailed`.
pub struct MasterActionRuntime {
    coordinator: Arc<NodeActionCoordinator>,
    registry: Arc<AgentRegistry>,
    journal: Arc<dyn JournalService>,
    log_router: Arc<LogRouter>,
}

impl MasterActionRuntime {
    pub fn new(
        coordinator: Arc<NodeActionCoordinator>,
        registry: Arc<AgentRegistry>,
        journal: Arc<dyn JournalService>,
        log_router: Arc<LogRouter>,
    ) -> Self {
        Self { coordinator, registry, journal, log_router }
    }

    /// §4.6 steps 1-4, run to completion.
    pub async fn run(
        &self,
        operation_type: impl Into<String>,
        request_payload: Value,
        handler: Box<dyn WorkflowHandler>,
    ) -> Result<MasterAction, RuntimeError> {
        let operation_type = operation_type.into();
        let stage_names = handler.stage_names();
        let mut action = MasterAction::new(operation_type, request_payload, stage_names.clone());
        action.apply_status(MasterActionStatus::Running);
        let action_id = action.action_id;

        let started = JournalRecord {
            action_id,
            recorded_at: Utc::now(),
            kind: JournalRecordKind::MasterActionStarted,
            detail: serde_json::json!({ "operation_type": action.operation_type, "stage_names": stage_names }),
        };
        journal::append_or_log(self.journal.as_ref(), started).await;

        let context = MasterActionContext::new(
            action,
            Arc::clone(&self.coordinator),
            Arc::clone(&self.registry),
            Arc::clone(&self.journal),
            Arc::clone(&self.log_router),
        );
        context.initialize_progress(stage_names.len());

        let outcome = handler.execute(Arc::clone(&context)).await;

        let already_terminal = context.action.lock().unwrap().status.is_terminal();
        if !already_terminal {
            match outcome {
                Ok(result) => {
                    context.action.lock().unwrap().result = Some(result);
                    context.set_completed("workflow completed").await;
                }
                Err(message) => {
                    warn!(%action_id, message, "workflow handler returned an error");
                    context.set_failed(message).await;
                }
            }
        } else if let Ok(result) = outcome {
            let mut locked = context.action.lock().unwrap();
            if locked.result.is_none() {
                locked.result = Some(result);
            }
        }

        Ok(context.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::InMemoryJournal;
    use crate::registry::AgentRegistry;
    use crate::testing::FakeTransport;
    use std::time::Duration;

    fn test_runtime() -> (MasterActionRuntime, Arc<InMemoryJournal>) {
        let transport = Arc::new(FakeTransport::new());
        let registry = AgentRegistry::new(Duration::from_secs(60));
        let log_router = LogRouter::new(100);
        let journal = InMemoryJournal::new();
        let coordinator = NodeActionCoordinator::new(
            transport,
            Arc::clone(&registry),
            log_router.clone(),
            journal.clone(),
            crate::config::CoordinatorTimeouts {
                readiness_timeout_seconds: 5,
                cancellation_grace_seconds: 1,
                flush_timeout_seconds: 1,
            },
        );
        (MasterActionRuntime::new(coordinator, registry, journal.clone(), log_router), journal)
    }

    struct SingleStageHandler;

    #[async_trait]
    impl WorkflowHandler for SingleStageHandler {
        fn stage_names(&self) -> Vec<String> {
            vec!["only-stage".to_string()]
        }

        async fn execute(&self, ctx: Arc<MasterActionContext>) -> Result<Value, String> {
            ctx.run_stage("only-stage", |stage| async move {
                let result = stage.run_node_action("VerifyConfiguration", vec![], |_| serde_json::json!({})).await;
                (result, true)
            })
            .await
            .map_err(|e| e.to_string())?;
            Ok(serde_json::json!({ "ok": true }))
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl WorkflowHandler for FailingHandler {
        fn stage_names(&self) -> Vec<String> {
            vec!["only-stage".to_string()]
        }

        async fn execute(&self, _ctx: Arc<MasterActionContext>) -> Result<Value, String> {
            Err("disk check failed".to_string())
        }
    }

    struct SelfTerminatingHandler;

    #[async_trait]
    impl WorkflowHandler for SelfTerminatingHandler {
        fn stage_names(&self) -> Vec<String> {
            vec![]
        }

        async fn execute(&self, ctx: Arc<MasterActionContext>) -> Result<Value, String> {
            ctx.set_cancelled("operator requested").await;
            Ok(serde_json::json!({}))
        }
    }

    #[tokio::test]
    async fn successful_handler_reaches_succeeded_with_full_progress() {
        let (runtime, _journal) = test_runtime();
        let action = runtime
            .run("VerifyConfiguration", serde_json::json!({}), Box::new(SingleStageHandler))
            .await
            .unwrap();
        assert_eq!(action.status, MasterActionStatus::Succeeded);
        assert_eq!(action.progress_percent, 100);
        assert_eq!(action.result, Some(serde_json::json!({ "ok": true })));
    }

    #[tokio::test]
    async fn handler_error_is_folded_into_set_failed() {
        let (runtime, _journal) = test_runtime();
        let action = runtime
            .run("VerifyConfiguration", serde_json::json!({}), Box::new(FailingHandler))
            .await
            .unwrap();
        assert_eq!(action.status, MasterActionStatus::Failed);
        assert_eq!(action.error_message.as_deref(), Some("disk check failed"));
    }

    #[tokio::test]
    async fn handler_calling_set_cancelled_itself_wins_over_ok_return() {
        let (runtime, _journal) = test_runtime();
        let action = runtime
            .run("Decommission", serde_json::json!({}), Box::new(SelfTerminatingHandler))
            .await
            .unwrap();
        assert_eq!(action.status, MasterActionStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_observable() {
        let (runtime, _journal) = test_runtime();
        let transport = Arc::new(FakeTransport::new());
        let registry = AgentRegistry::new(Duration::from_secs(60));
        let log_router = LogRouter::new(100);
        let journal = InMemoryJournal::new();
        let coordinator = NodeActionCoordinator::new(
            transport,
            Arc::clone(&registry),
            log_router.clone(),
            journal.clone(),
            crate::config::CoordinatorTimeouts {
                readiness_timeout_seconds: 5,
                cancellation_grace_seconds: 1,
                flush_timeout_seconds: 1,
            },
        );
        let action = MasterAction::new("VerifyConfiguration", serde_json::json!({}), vec!["stage".to_string()]);
        let context = MasterActionContext::new(action, coordinator, registry, journal, log_router);
        assert!(!context.is_cancelled());
        context.cancel("test");
        context.cancel("test again");
        assert!(context.is_cancelled());
        let _ = runtime;
    }
}
