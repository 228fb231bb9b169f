//! Journal Service (C2): persists MasterAction/NodeAction lifecycle events
//! so an operator can reconstruct history after a crash.
//!
//! An `async_trait` object-safe seam so the orchestration core never
//! depends on a concrete storage engine. Per §7, journal failures are
//! logged and swallowed — they must never abort a running workflow.

use crate::error::JournalError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// One append-only journal record (§4.2).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct JournalRecord {
    pub action_id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub kind: JournalRecordKind,
    pub detail: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum JournalRecordKind {
    MasterActionStarted,
    StageStarted,
    StageFinished,
    NodeActionStarted,
    NodeActionFinished,
    /// Per-node-task terminal result, appended as each task in a NodeAction
    /// reaches a terminal sub-status (§4.2, §4.4.4).
    NodeTaskResult,
    MasterActionFinished,
}

/// Storage seam for journal records.
#[async_trait]
pub trait JournalService: std::fmt::Debug + Send + Sync {
    async fn append(&self, record: JournalRecord) -> Result<(), JournalError>;

    /// All records recorded for a given action, in append order.
    async fn records_for(&self, action_id: Uuid) -> Result<Vec<JournalRecord>, JournalError>;
}

/// In-memory reference implementation, useful for the demo binary and
/// tests. A real deployment would back this with the filesystem path
/// carried in [`crate::config::SiteKeeperConfig::journal_root_path`].
#[derive(Debug, Default)]
pub struct InMemoryJournal {
    records: dashmap::DashMap<Uuid, Vec<JournalRecord>>,
}

impl InMemoryJournal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl JournalService for InMemoryJournal {
    async fn append(&self, record: JournalRecord) -> Result<(), JournalError> {
        self.records.entry(record.action_id).or_default().push(record);
        Ok(())
    }

    async fn records_for(&self, action_id: Uuid) -> Result<Vec<JournalRecord>, JournalError> {
        Ok(self.records.get(&action_id).map(|r| r.clone()).unwrap_or_default())
    }
}

/// Append a record, logging (not propagating) any failure. Every call site
/// in the orchestration core should go through this rather than calling
/// `JournalService::append` directly (§7: journal errors never abort a
/// workflow).
pub async fn append_or_log(journal: &dyn JournalService, record: JournalRecord) {
    let action_id = record.action_id;
    if let Err(err) = journal.append(record).await {
        tracing::error!(%action_id, error = %err, "failed to append journal record");
    }
}
