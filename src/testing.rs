//! Test doubles. Exercising the coordinator against a fake transport
//! instead of a live socket keeps these tests fast and deterministic.

use crate::error::TransportError;
use crate::transport::{AgentTransport, MasterToAgentMessage};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;

/// Records every message sent through it; can be configured to fail sends
/// to specific nodes (simulating `NotConnected`/transport failure).
#[derive(Debug, Default)]
pub struct FakeTransport {
    sent: Mutex<Vec<(String, MasterToAgentMessage)>>,
    unreachable_nodes: Mutex<HashSet<String>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent sends to `node_name` fail with `SendFailed`.
    pub fn mark_unreachable(&self, node_name: &str) {
        self.unreachable_nodes.lock().unwrap().insert(node_name.to_string());
    }

    pub fn sent_messages(&self) -> Vec<(String, MasterToAgentMessage)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, node_name: &str) -> Vec<MasterToAgentMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == node_name)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

#[async_trait]
impl AgentTransport for FakeTransport {
    async fn send(&self, node_name: &str, message: MasterToAgentMessage) -> Result<(), TransportError> {
        if self.unreachable_nodes.lock().unwrap().contains(node_name) {
            return Err(TransportError::SendFailed {
                node: node_name.to_string(),
                reason: "simulated unreachable node".to_string(),
            });
        }
        self.sent.lock().unwrap().push((node_name.to_string(), message));
        Ok(())
    }
}
