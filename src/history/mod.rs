pub mod duckdb_store;
pub mod filter;
pub mod memory_store;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::HistoryConfig;
use crate::db::registry::UserId;

pub use duckdb_store::DuckDbHistoryStore;
pub use filter::{HistoryFilter, HistoryQuery, Pagination};
pub use memory_store::MemoryHistoryStore;

/// Origin of an attempt, decided by the endpoint that handled it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryKind {
    #[serde(rename = "Natural Language")]
    NaturalLanguage,
    #[serde(rename = "SQL")]
    RawSql,
}

impl QueryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::NaturalLanguage => "Natural Language",
            QueryKind::RawSql => "SQL",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Natural Language" => Some(QueryKind::NaturalLanguage),
            "SQL" => Some(QueryKind::RawSql),
            _ => None,
        }
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HistoryError {
    #[error("history storage unavailable: {0}")]
    Unavailable(String),
    #[error("history record is unreadable: {0}")]
    Corrupt(String),
    #[error("history store misconfigured: {0}")]
    Config(String),
}

impl From<duckdb::Error> for HistoryError {
    fn from(err: duckdb::Error) -> Self {
        HistoryError::Unavailable(err.to_string())
    }
}

impl From<r2d2::Error> for HistoryError {
    fn from(err: r2d2::Error) -> Self {
        HistoryError::Unavailable(err.to_string())
    }
}

/// What a handler knows about a finished attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntryDraft {
    pub user_id: UserId,
    pub database_ref: String,
    pub query_kind: QueryKind,
    pub query_text: String,
    pub result: serde_json::Value,
    pub succeeded: bool,
}

/// One durable audit record. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub user_id: UserId,
    pub database_ref: String,
    #[serde(rename = "query_type")]
    pub query_kind: QueryKind,
    #[serde(rename = "query")]
    pub query_text: String,
    pub result: serde_json::Value,
    #[serde(rename = "success")]
    pub succeeded: bool,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    /// Stamps a draft with a fresh id and the current time, truncated to
    /// microseconds so every store round-trips it exactly.
    fn from_draft(draft: HistoryEntryDraft) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: draft.user_id,
            database_ref: draft.database_ref,
            query_kind: draft.query_kind,
            query_text: draft.query_text,
            result: draft.result,
            succeeded: draft.succeeded,
            timestamp: Utc::now().trunc_subsecs(6),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryPage {
    pub data: Vec<HistoryEntry>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
    pub last_page: u64,
}

/// Durable storage behind the recorder. Each `append` is atomic with
/// respect to concurrent appends.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, entry: &HistoryEntry) -> Result<(), HistoryError>;

    /// Returns the requested page of matching entries and the total number of
    /// matches.
    async fn query(
        &self,
        user: &UserId,
        filter: &HistoryFilter,
        pagination: Pagination,
    ) -> Result<(Vec<HistoryEntry>, u64), HistoryError>;

    async fn clear(&self, user: &UserId) -> Result<u64, HistoryError>;
}

pub struct HistoryRecorder {
    store: Arc<dyn HistoryStore>,
}

impl HistoryRecorder {
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self { store }
    }

    pub fn from_config(config: &HistoryConfig) -> Result<Self, HistoryError> {
        let store: Arc<dyn HistoryStore> = match config.backend.as_str() {
            "duckdb" if config.path == ":memory:" => {
                warn!("History database is in memory; entries are lost on restart");
                Arc::new(DuckDbHistoryStore::in_memory()?)
            }
            "duckdb" => {
                info!("Opening history store at {}", config.path);
                Arc::new(DuckDbHistoryStore::open(
                    Path::new(&config.path),
                    config.pool_size,
                )?)
            }
            "memory" => {
                warn!("Using in-memory history store; entries are lost on restart");
                Arc::new(MemoryHistoryStore::default())
            }
            other => {
                return Err(HistoryError::Config(format!(
                    "unknown history backend '{}'",
                    other
                )));
            }
        };
        Ok(Self::new(store))
    }

    /// Appends one entry. Every call appends; callers decide what counts as
    /// one attempt.
    pub async fn record(&self, draft: HistoryEntryDraft) -> Result<HistoryEntry, HistoryError> {
        let entry = HistoryEntry::from_draft(draft);
        self.store.append(&entry).await?;
        debug!(
            "Recorded {} attempt {} for {} (success: {})",
            entry.query_kind, entry.id, entry.user_id, entry.succeeded
        );
        Ok(entry)
    }

    /// Like [`record`](Self::record) but logs and swallows storage failures.
    pub async fn record_best_effort(&self, draft: HistoryEntryDraft) -> Option<HistoryEntry> {
        let user = draft.user_id.clone();
        let kind = draft.query_kind;
        match self.record(draft).await {
            Ok(entry) => Some(entry),
            Err(e) => {
                error!("Failed to record {} attempt for {}: {}", kind, user, e);
                None
            }
        }
    }

    pub async fn list(
        &self,
        user: &UserId,
        pagination: Pagination,
        filter: &HistoryFilter,
    ) -> Result<HistoryPage, HistoryError> {
        let (data, total) = self.store.query(user, filter, pagination).await?;
        Ok(HistoryPage {
            data,
            page: pagination.page,
            per_page: pagination.per_page,
            total,
            last_page: pagination.last_page(total),
        })
    }

    /// Deletes every entry owned by `user`. Irreversible.
    pub async fn clear(&self, user: &UserId) -> Result<u64, HistoryError> {
        let deleted = self.store.clear(user).await?;
        info!("Cleared {} history entries for {}", deleted, user);
        Ok(deleted)
    }

    /// Starts tracking one attempt. The returned guard writes exactly one
    /// terminal entry: whichever of `succeed`/`fail` is called, or `Failed`
    /// when it is dropped unfinished.
    pub fn begin(
        self: &Arc<Self>,
        user_id: UserId,
        database_ref: impl Into<String>,
        query_kind: QueryKind,
        query_text: impl Into<String>,
    ) -> AttemptGuard {
        AttemptGuard {
            recorder: Arc::clone(self),
            pending: Some(PendingAttempt {
                user_id,
                database_ref: database_ref.into(),
                query_kind,
                query_text: query_text.into(),
            }),
        }
    }
}

struct PendingAttempt {
    user_id: UserId,
    database_ref: String,
    query_kind: QueryKind,
    query_text: String,
}

impl PendingAttempt {
    fn finish(self, succeeded: bool, result: serde_json::Value) -> HistoryEntryDraft {
        HistoryEntryDraft {
            user_id: self.user_id,
            database_ref: self.database_ref,
            query_kind: self.query_kind,
            query_text: self.query_text,
            result,
            succeeded,
        }
    }
}

/// An attempt in the `Started` state.
pub struct AttemptGuard {
    recorder: Arc<HistoryRecorder>,
    pending: Option<PendingAttempt>,
}

impl AttemptGuard {
    pub async fn succeed(mut self, result: serde_json::Value) -> Option<HistoryEntry> {
        let pending = self.pending.take()?;
        self.recorder
            .record_best_effort(pending.finish(true, result))
            .await
    }

    pub async fn fail(mut self, error: &(dyn fmt::Display + Sync)) -> Option<HistoryEntry> {
        let pending = self.pending.take()?;
        let result = serde_json::json!({ "error": error.to_string() });
        self.recorder
            .record_best_effort(pending.finish(false, result))
            .await
    }
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };

        warn!(
            "{} attempt for {} abandoned before completion",
            pending.query_kind, pending.user_id
        );
        let draft = pending.finish(
            false,
            serde_json::json!({ "error": "request abandoned before completion" }),
        );
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let recorder = Arc::clone(&self.recorder);
                handle.spawn(async move {
                    recorder.record_best_effort(draft).await;
                });
            }
            Err(_) => error!("No runtime available to record abandoned attempt"),
        }
    }
}
