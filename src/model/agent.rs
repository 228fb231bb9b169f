//! Agent/slave state (§3 `AgentState`).

use super::status::Connectivity;
use chrono::{DateTime, Utc};

/// Snapshot of a registered agent as the Agent Registry (C1) tracks it.
#[derive(Debug, Clone)]
pub struct AgentState {
    pub node_name: String,
    pub connectivity: Connectivity,
    pub last_heartbeat_at: DateTime<Utc>,
    /// Protocol/capability version reported at registration. Opaque to the
    /// core; carried through for handlers that care about agent capability.
    pub agent_version: String,
}

impl AgentState {
    pub fn new(node_name: impl Into<String>, agent_version: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            connectivity: Connectivity::Online,
            last_heartbeat_at: Utc::now(),
            agent_version: agent_version.into(),
        }
    }
}
