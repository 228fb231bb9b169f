//! Handle to a running NodeAction actor: the sender half of its mailbox,
//! plus the bits needed to route ingress events and cascade cancellation.

use super::actor::{NodeActionActor, ProgressReporter};
use super::events::{CoordinatorEvent, NodeActionResult};
use crate::config::CoordinatorTimeouts;
use crate::error::CoordinatorError;
use crate::journal::JournalService;
use crate::log_router::LogRouter;
use crate::model::NodeAction;
use crate::registry::AgentRegistry;
use crate::transport::AgentTransport;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

const MAILBOX_CAPACITY: usize = 256;

#[derive(Debug)]
pub struct NodeActionHandle {
    pub action_id: Uuid,
    events_tx: mpsc::Sender<CoordinatorEvent>,
}

impl NodeActionHandle {
    pub fn dispatch(&self, event: CoordinatorEvent) -> Result<(), CoordinatorError> {
        self.events_tx.try_send(event).map_err(|_| CoordinatorError::UnknownAction(self.action_id))
    }
}

/// Spawn a new actor for `node_action`, returning the handle callers use to
/// route ingress events plus the future its result resolves on.
#[allow(clippy::too_many_arguments)]
pub fn spawn(
    node_action: NodeAction,
    transport: Arc<dyn AgentTransport>,
    registry: Arc<AgentRegistry>,
    log_router: Arc<LogRouter>,
    journal: Arc<dyn JournalService>,
    timeouts: CoordinatorTimeouts,
    progress_reporter: ProgressReporter,
) -> (NodeActionHandle, oneshot::Receiver<NodeActionResult>) {
    let action_id = node_action.action_id;
    let (events_tx, events_rx) = mpsc::channel(MAILBOX_CAPACITY);
    let (result_tx, result_rx) = oneshot::channel();

    let actor = NodeActionActor {
        node_action,
        mailbox: events_rx,
        transport,
        registry,
        log_router,
        journal,
        timeouts,
        progress_reporter,
        result_tx: Some(result_tx),
    };
    tokio::spawn(actor.run());

    (NodeActionHandle { action_id, events_tx }, result_rx)
}
