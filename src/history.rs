use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::NlqError;

pub const DEFAULT_HISTORY_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    Success,
    Clarify,
    Error,
}

impl QueryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStatus::Success => "success",
            QueryStatus::Clarify => "clarify",
            QueryStatus::Error => "error",
        }
    }
}

/// One pipeline run against a table. `sql_query` is empty when the run
/// never reached a validated statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryHistoryRecord {
    pub id: Uuid,
    pub table_name: String,
    pub natural_query: String,
    pub sql_query: String,
    pub status: QueryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl QueryHistoryRecord {
    pub fn new(
        table_name: impl Into<String>,
        natural_query: impl Into<String>,
        sql_query: impl Into<String>,
        status: QueryStatus,
        error: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            table_name: table_name.into(),
            natural_query: natural_query.into(),
            sql_query: sql_query.into(),
            status,
            error,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn log(&self, record: QueryHistoryRecord) -> Result<(), NlqError>;

    /// Most recent records first.
    async fn recent(&self, limit: usize) -> Result<Vec<QueryHistoryRecord>, NlqError>;
}

/// In-process store backing the REPL and tests.
#[derive(Default)]
pub struct MemoryHistoryStore {
    records: RwLock<Vec<QueryHistoryRecord>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn log(&self, record: QueryHistoryRecord) -> Result<(), NlqError> {
        let mut records = self.records.write().await;
        records.push(record);
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<QueryHistoryRecord>, NlqError> {
        let records = self.records.read().await;
        Ok(records.iter().rev().take(limit).cloned().collect())
    }
}
