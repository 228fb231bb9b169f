//! Agent Registry (C1): tracks which agents are connected, routes
//! heartbeats, and sweeps stale entries to `Offline`.
//!
//! A concurrent map instead of a `Mutex<HashMap<_>>`, plus a
//! `tokio::sync::broadcast` channel so callers can subscribe to
//! connectivity transitions instead of polling.

use crate::error::RegistryError;
use crate::model::{AgentState, Connectivity};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

/// A connectivity transition published to [`AgentRegistry::subscribe`].
#[derive(Debug, Clone)]
pub struct ConnectivityEvent {
    pub node_name: String,
    pub connectivity: Connectivity,
}

#[derive(Debug)]
pub struct AgentRegistry {
    agents: DashMap<String, AgentState>,
    events: broadcast::Sender<ConnectivityEvent>,
    offline_threshold: Duration,
}

impl AgentRegistry {
    pub fn new(offline_threshold: Duration) -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(256);
        Arc::new(Self {
            agents: DashMap::new(),
            events: tx,
            offline_threshold,
        })
    }

    /// Register a previously-unknown agent, or re-mark a known one Online.
    #[instrument(skip(self))]
    pub fn register(&self, node_name: &str, agent_version: &str) {
        let was_present = self.agents.contains_key(node_name);
        self.agents
            .insert(node_name.to_string(), AgentState::new(node_name, agent_version));
        if was_present {
            info!(node_name, "agent re-registered");
        } else {
            info!(node_name, "agent registered");
        }
        self.publish(node_name, Connectivity::Online);
    }

    /// Record a heartbeat, flipping the agent back to Online if it had
    /// drifted to Unreachable.
    #[instrument(skip(self))]
    pub fn heartbeat(&self, node_name: &str) -> Result<(), RegistryError> {
        let mut entry = self
            .agents
            .get_mut(node_name)
            .ok_or_else(|| RegistryError::NotConnected(node_name.to_string()))?;
        entry.last_heartbeat_at = chrono::Utc::now();
        let was_disconnected = entry.connectivity.is_disconnected();
        entry.connectivity = Connectivity::Online;
        drop(entry);
        if was_disconnected {
            self.publish(node_name, Connectivity::Online);
        }
        Ok(())
    }

    pub fn lookup(&self, node_name: &str) -> Option<AgentState> {
        self.agents.get(node_name).map(|e| e.clone())
    }

    pub fn list_online(&self) -> Vec<String> {
        self.agents
            .iter()
            .filter(|e| e.connectivity == Connectivity::Online)
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.events.subscribe()
    }

    fn publish(&self, node_name: &str, connectivity: Connectivity) {
        let _ = self.events.send(ConnectivityEvent {
            node_name: node_name.to_string(),
            connectivity,
        });
    }

    /// One sweep pass: mark any agent whose last heartbeat predates the
    /// offline threshold as `Offline`. Called on an interval by
    /// [`AgentRegistry::spawn_sweeper`].
    #[instrument(skip(self))]
    fn sweep(&self) {
        let now = chrono::Utc::now();
        let mut newly_offline = Vec::new();
        for mut entry in self.agents.iter_mut() {
            if entry.connectivity == Connectivity::Online {
                let elapsed = now.signed_duration_since(entry.last_heartbeat_at);
                if elapsed.to_std().unwrap_or(Duration::ZERO) > self.offline_threshold {
                    entry.connectivity = Connectivity::Offline;
                    newly_offline.push(entry.key().clone());
                }
            }
        }
        for node_name in newly_offline {
            warn!(node_name, "agent marked offline: heartbeat timeout");
            self.publish(&node_name, Connectivity::Offline);
        }
    }

    /// Spawn the background sweeper task: a `tokio::spawn` +
    /// `tokio::time::interval` loop owned by the component that needs
    /// periodic upkeep rather than a shared scheduler.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                registry.sweep();
            }
        })
    }
}
