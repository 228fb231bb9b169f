//! Inbound events the Node-Action Coordinator actor processes, one at a
//! time, off its mailbox (§5: "one per-action serialization primitive,
//! conceptually a mailbox").

use crate::model::Connectivity;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

/// Everything that can nudge a single NodeAction's state machine forward.
/// Ingress from the Agent-Hub Facade (C8) and the Agent Registry's
/// connectivity feed (C1) both funnel into this enum so the actor has a
/// single serialization point.
#[derive(Debug)]
pub enum CoordinatorEvent {
    /// `ReportTaskReadiness` ingress (§4.4.3).
    ReadinessReport {
        task_id: String,
        ready: bool,
        reason: Option<String>,
    },
    /// `ReportTaskProgress` ingress (§4.4.4).
    ProgressUpdate {
        task_id: String,
        status: String,
        percent: Option<u8>,
        message: String,
        timestamp: DateTime<Utc>,
        result: Option<Value>,
    },
    /// A participating node's connectivity changed, forwarded from the
    /// Agent Registry's broadcast feed (§4.4.5).
    NodeConnectivityChanged { node_name: String, connectivity: Connectivity },
    /// The readiness watchdog fired; any task still `ReadinessCheckSent`
    /// times out (§4.4.2). Internal, not agent-originated.
    ReadinessTimeout,
    /// Cancellation signalled through the parent context (§4.4.7).
    Cancel { reason: String },
    /// The cancellation-grace watchdog fired.
    CancellationGraceExpired,
    /// `ConfirmLogFlushForTask` for one of this action's tasks resolved the
    /// barrier; purely informational, used only for tests/observability.
    FlushConfirmed { task_id: String },
}

/// Outcome of a resolved NodeAction (§4.4.1, §9 open question 1: this plays
/// the role of both the source's `NodeActionResult` and
/// `MultiNodeOperationResult`, treated here as a single type).
#[derive(Debug, Clone)]
pub struct NodeActionResult {
    pub action_id: Uuid,
    pub success: bool,
    pub final_state: crate::model::NodeAction,
}
