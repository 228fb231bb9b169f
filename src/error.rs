//! Crate-wide error types.
//!
//! Each subsystem gets its own `thiserror` enum; they fold into
//! [`SiteKeeperError`] at the boundaries callers actually cross.

use uuid::Uuid;

/// Errors from the Agent Registry (C1).
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("node '{0}' is not connected")]
    NotConnected(String),
}

/// Errors surfaced while sending to, or hearing from, an agent transport.
#[derive(Debug, thiserror::Error, Clone)]
pub enum TransportError {
    #[error("node '{node}' is not connected")]
    NotConnected { node: String },
    #[error("send to '{node}' failed: {reason}")]
    SendFailed { node: String, reason: String },
}

/// Errors from the Node-Action Coordinator (C4).
///
/// Per the error-handling design, none of these are meant to abort the owning
/// master action outright: callers fold them into task/action state and keep
/// going. They exist so the fold site has a typed reason to log.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("node-action '{0}' is already active")]
    DuplicateActionId(Uuid),
    #[error("transport error for action '{action_id}' task '{task_id}': {reason}")]
    Transport {
        action_id: Uuid,
        task_id: String,
        reason: String,
    },
    #[error("unknown task '{task_id}' for action '{action_id}'")]
    UnknownTask { action_id: Uuid, task_id: String },
    #[error("unknown node-action '{0}'")]
    UnknownAction(Uuid),
}

/// Errors from the Journal Service (C2).
///
/// Per §7, journal errors are logged only and never propagated to the
/// workflow — this type exists for the logging call site, not for `?`.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("failed to append journal record for action '{action_id}': {reason}")]
    AppendFailed { action_id: Uuid, reason: String },
}

/// Errors from Stage Context (C5) usage.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("a RunNodeAction* call is already in flight on this stage")]
    ConcurrentStageUse,
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
}

/// Errors from the Master-Action Runtime (C6).
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("no workflow handler registered for operation type '{0}'")]
    NoHandlerForOperationType(String),
    #[error(transparent)]
    Stage(#[from] StageError),
}

/// Crate-level aggregate error, analogous to `tasker_shared::TaskerError`.
#[derive(Debug, thiserror::Error)]
pub enum SiteKeeperError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
    #[error(transparent)]
    Journal(#[from] JournalError),
    #[error(transparent)]
    Stage(#[from] StageError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("configuration error: {0}")]
    Config(String),
}

pub type SiteKeeperResult<T> = Result<T, SiteKeeperError>;
