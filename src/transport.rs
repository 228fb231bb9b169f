//! Agent-hub wire contract (§6): the messages the master sends to a slave
//! agent, and the [`AgentTransport`] seam the Node-Action Coordinator (C4)
//! sends them through.
//!
//! `AgentTransport` is the boundary that lets the coordinator stay ignorant
//! of whatever real transport (WebSocket, gRPC stream, ...) carries these
//! messages; tests exercise it against [`crate::testing::FakeTransport`]
//! instead of a live socket.

use crate::error::TransportError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// A message the master sends down to an agent (§6 "Master→Agent calls").
/// One variant per row of the table: the first four are issued by this
/// crate's own state machines (two-phase dispatch, cancellation, the log
/// flush barrier); the last three are out-of-band control-plane messages
/// (time sync, ad-hoc commands, context push) that this core models as part
/// of the wire contract but never issues itself — sending them is left to
/// whatever external surface owns fleet-wide housekeeping (§1 scope).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum MasterToAgentMessage {
    /// Phase 1 of the two-phase dispatch protocol (§4.4.2): ask the agent
    /// whether it can currently accept this task.
    PrepareForTask {
        action_id: Uuid,
        task_id: String,
        task_type: String,
    },
    /// Phase 2: the agent reported ready, so actually hand it the task.
    AssignSlaveTask {
        action_id: Uuid,
        task_id: String,
        task_type: String,
        payload: Value,
        timeout_seconds: Option<u64>,
    },
    /// Ask the agent to abort an in-flight task (§4.4.5).
    CancelTask { action_id: Uuid, task_id: String },
    /// Flush-barrier request (§4.3): ask the node to confirm all buffered
    /// log lines for this action have been forwarded.
    RequestLogFlush { action_id: Uuid },
    /// Time sync: tells the agent what the master considers authoritative
    /// UTC, optionally forcing the agent to adjust its own clock to match.
    AdjustSystemTime {
        authoritative_utc: DateTime<Utc>,
        force_adjustment: bool,
    },
    /// An out-of-band command outside the task-dispatch protocol (e.g. a
    /// fleet maintenance op not modeled as a NodeTask).
    GeneralCommand {
        command_type: String,
        payload: Option<Value>,
        timeout_seconds: Option<u64>,
    },
    /// Context push: tells the agent what the master currently believes
    /// about it, and what it should be doing, independent of any single
    /// in-flight task.
    UpdateMasterState {
        master_timestamp: DateTime<Utc>,
        expected_agent_status: String,
        active_manifest: Option<Value>,
        assigned_operations: Vec<Uuid>,
        master_version: String,
        force_reregister: bool,
    },
}

/// Transport-agnostic send seam the coordinator depends on.
///
/// Implementations own whatever wire protocol actually reaches the agent;
/// they report only whether the send was accepted, never whether the agent
/// acted on it (that comes back asynchronously as a `ProgressUpdate` through
/// the Agent Hub, C8).
#[async_trait]
pub trait AgentTransport: fmt::Debug + Send + Sync {
    async fn send(&self, node_name: &str, message: MasterToAgentMessage) -> Result<(), TransportError>;
}
