//! Change history entries and the task deltas they summarise.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A finalized change summary. Immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DaoHistoryEntry {
    pub id: String,
    pub dao_id: String,
    pub numero_liste: String,
    pub created_at: DateTime<Utc>,
    pub summary: String,
    pub lines: Vec<String>,
}

/// Field values touched on a task since the last flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskChange {
    pub task_id: u32,
    pub task_name: String,
    pub is_applicable: Option<bool>,
    pub progress: Option<u8>,
    pub comment: Option<String>,
}

/// Filter accepted by the history store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryQuery {
    /// A single UTC day, returned in bucket order.
    Day(NaiveDate),
    /// Inclusive day range; a missing bound is open.
    Range {
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    },
}

impl HistoryQuery {
    /// No filter at all: every stored entry.
    pub fn all() -> Self {
        HistoryQuery::Range {
            from: None,
            to: None,
        }
    }
}
