//! Wire-facing enumerations (§6 "Enumerations that cross the wire").
//!
//! These are string-serialized with the exact casing the wire protocol
//! mandates. No `strum` dependency here — each enum gets a hand-written
//! `Display`/`FromStr` pair instead of a derive macro.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Overall status of a [`crate::model::MasterAction`].
///
/// Per §3, this is a strict subset of the wire `OperationOverallStatus`
/// enumeration: a MasterAction never observes `AwaitingNodeReadiness` or
/// `Cancelling` at its own scope (those are NodeAction-level states; see
/// [`NodeActionStatus`]). Terminal set: `{Succeeded, Failed, Cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MasterActionStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl MasterActionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for MasterActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
        };
        f.write_str(s)
    }
}

/// Overall status of a [`crate::model::NodeAction`] (§3, §6
/// `OperationOverallStatus`). `AwaitingReadiness` serializes to the wire
/// value `AwaitingNodeReadiness` — kept as a distinct variant from `Running`
/// per §9 open question 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeActionStatus {
    AwaitingReadiness,
    Running,
    Cancelling,
    Succeeded,
    Failed,
    Cancelled,
}

impl NodeActionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for NodeActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AwaitingReadiness => "AwaitingNodeReadiness",
            Self::Running => "Running",
            Self::Cancelling => "Cancelling",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
        };
        f.write_str(s)
    }
}

/// Parse error for the hand-written `FromStr` impls in this module.
#[derive(Debug, thiserror::Error)]
#[error("unrecognized wire value '{0}'")]
pub struct UnknownWireValue(pub String);

impl FromStr for NodeActionStatus {
    type Err = UnknownWireValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AwaitingNodeReadiness" => Ok(Self::AwaitingReadiness),
            "Running" => Ok(Self::Running),
            "Cancelling" => Ok(Self::Cancelling),
            "Succeeded" => Ok(Self::Succeeded),
            "Failed" => Ok(Self::Failed),
            "Cancelled" => Ok(Self::Cancelled),
            other => Err(UnknownWireValue(other.to_string())),
        }
    }
}

/// Per-node sub-status of a [`crate::model::NodeTask`] (§3).
///
/// Terminal set: `{NotReadyForTask, ReadinessCheckTimedOut, Succeeded,
/// Failed, Cancelled, NodeOfflineDuringTask}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeTaskStatus {
    ReadinessCheckSent,
    ReadyToExecute,
    NotReadyForTask,
    ReadinessCheckTimedOut,
    TaskDispatched,
    InProgress,
    Succeeded,
    Failed,
    Cancelling,
    Cancelled,
    NodeOfflineDuringTask,
}

impl NodeTaskStatus {
    /// Invariant 1 / property 4 of §8: once terminal, a task's sub-status is
    /// sticky and later non-terminal updates are dropped.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::NotReadyForTask
                | Self::ReadinessCheckTimedOut
                | Self::Succeeded
                | Self::Failed
                | Self::Cancelled
                | Self::NodeOfflineDuringTask
        )
    }

    /// True for the success terminal state only — used by §4.4.6's verdict.
    pub fn is_success(self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

impl fmt::Display for NodeTaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ReadinessCheckSent => "ReadinessCheckSent",
            Self::ReadyToExecute => "ReadyToExecute",
            Self::NotReadyForTask => "NotReadyForTask",
            Self::ReadinessCheckTimedOut => "ReadinessCheckTimedOut",
            Self::TaskDispatched => "TaskDispatched",
            Self::InProgress => "InProgress",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Cancelling => "Cancelling",
            Self::Cancelled => "Cancelled",
            Self::NodeOfflineDuringTask => "NodeOfflineDuringTask",
        };
        f.write_str(s)
    }
}

impl FromStr for NodeTaskStatus {
    type Err = UnknownWireValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ReadinessCheckSent" => Ok(Self::ReadinessCheckSent),
            "ReadyToExecute" => Ok(Self::ReadyToExecute),
            "NotReadyForTask" => Ok(Self::NotReadyForTask),
            "ReadinessCheckTimedOut" => Ok(Self::ReadinessCheckTimedOut),
            "TaskDispatched" => Ok(Self::TaskDispatched),
            "InProgress" => Ok(Self::InProgress),
            "Succeeded" => Ok(Self::Succeeded),
            "Failed" => Ok(Self::Failed),
            "Cancelling" => Ok(Self::Cancelling),
            "Cancelled" => Ok(Self::Cancelled),
            "NodeOfflineDuringTask" => Ok(Self::NodeOfflineDuringTask),
            other => Err(UnknownWireValue(other.to_string())),
        }
    }
}

/// Log severity crossing the agent→master wire (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Information,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Trace => "Trace",
            Self::Debug => "Debug",
            Self::Information => "Information",
            Self::Warning => "Warning",
            Self::Error => "Error",
            Self::Critical => "Critical",
        };
        f.write_str(s)
    }
}

impl FromStr for LogLevel {
    type Err = UnknownWireValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Trace" => Ok(Self::Trace),
            "Debug" => Ok(Self::Debug),
            "Information" => Ok(Self::Information),
            "Warning" => Ok(Self::Warning),
            "Error" => Ok(Self::Error),
            "Critical" => Ok(Self::Critical),
            other => Err(UnknownWireValue(other.to_string())),
        }
    }
}

/// Connectivity of a registered agent (§3 `AgentState`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Connectivity {
    Online,
    Offline,
    Unreachable,
}

impl Connectivity {
    /// Whether the node-health observer (§4.4.5) should treat this as a
    /// reason to force a task to `NodeOfflineDuringTask`.
    pub fn is_disconnected(self) -> bool {
        matches!(self, Self::Offline | Self::Unreachable)
    }
}

impl fmt::Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Online => "Online",
            Self::Offline => "Offline",
            Self::Unreachable => "Unreachable",
        };
        f.write_str(s)
    }
}
