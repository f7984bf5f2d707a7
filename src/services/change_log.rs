//! Pending task changes per DAO, flushed into the history on validation.
//!
//! A DAO is idle until its first recorded task change; from then on the
//! latest value of every touched field is kept per task. Validation drains
//! the DAO's pending changes into one summary and one history entry.
//! Leader changes only touch the timestamp: they are broadcast right away
//! by the caller and never batched.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::history::HistoryStore;
use crate::models::{Dao, DaoHistoryEntry, TaskChange};

/// Appended as the last line when more tasks were pending than the cap.
pub const TRUNCATION_MARKER: &str = "(...)";

#[derive(Debug, Clone, Default)]
struct TaskSnapshot {
    name: String,
    is_applicable: Option<bool>,
    progress: Option<u8>,
    comment: Option<String>,
}

impl TaskSnapshot {
    fn merge(&mut self, change: TaskChange) {
        if !change.task_name.is_empty() {
            self.name = change.task_name;
        }
        if change.is_applicable.is_some() {
            self.is_applicable = change.is_applicable;
        }
        if change.progress.is_some() {
            self.progress = change.progress;
        }
        // A task leaving applicability drops its progress.
        if change.is_applicable == Some(false) {
            self.progress = None;
        }
        if change.comment.is_some() {
            self.comment = change.comment;
        }
    }

    /// Only touched fields are rendered. A touched task always yields one line.
    fn render(&self, task_id: u32) -> String {
        let mut parts = Vec::new();
        if let Some(applicable) = self.is_applicable {
            let text = if applicable { "applicable" } else { "not applicable" };
            parts.push(text.to_string());
        }
        if let Some(progress) = self.progress {
            if self.is_applicable != Some(false) {
                parts.push(format!("progress {}%", progress));
            }
        }
        if let Some(comment) = self.comment.as_deref().map(str::trim) {
            if comment.is_empty() {
                parts.push("comment cleared".to_string());
            } else {
                parts.push(format!("comment \"{}\"", comment));
            }
        }
        if parts.is_empty() {
            parts.push("updated".to_string());
        }

        let label = if self.name.is_empty() {
            format!("Task {}", task_id)
        } else {
            format!("Task {} ({})", task_id, self.name)
        };
        format!("{}: {}", label, parts.join("; "))
    }
}

#[derive(Debug)]
struct PendingByDao {
    tasks: BTreeMap<u32, TaskSnapshot>,
    last_touched: DateTime<Utc>,
}

impl PendingByDao {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            tasks: BTreeMap::new(),
            last_touched: now,
        }
    }
}

/// Text produced by a flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSummary {
    pub title: String,
    pub lines: Vec<String>,
    /// Number of tasks that had pending changes.
    pub task_count: usize,
    pub truncated: bool,
}

impl ChangeSummary {
    /// Title and lines as one notification body.
    pub fn to_message(&self) -> String {
        if self.lines.is_empty() {
            return self.title.clone();
        }
        format!("{}\n{}", self.title, self.lines.join("\n"))
    }
}

#[derive(Debug, Clone)]
pub struct FlushOutcome {
    pub summary: ChangeSummary,
    pub entry: DaoHistoryEntry,
}

pub struct ChangeAggregator {
    pending: Mutex<HashMap<String, PendingByDao>>,
    history: Arc<HistoryStore>,
}

impl ChangeAggregator {
    pub fn new(history: Arc<HistoryStore>) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            history,
        }
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    /// Upsert the task's touched fields into the DAO's pending set.
    pub async fn record_task_change(&self, dao: &Dao, change: TaskChange) {
        let now = Utc::now();
        let mut pending = self.pending.lock().await;
        let entry = pending
            .entry(dao.id.clone())
            .or_insert_with(|| PendingByDao::new(now));
        entry.tasks.entry(change.task_id).or_default().merge(change);
        entry.last_touched = now;
    }

    /// Refresh the DAO's timestamp without adding a line.
    pub async fn record_leader_change(&self, dao: &Dao) {
        let now = Utc::now();
        let mut pending = self.pending.lock().await;
        pending
            .entry(dao.id.clone())
            .or_insert_with(|| PendingByDao::new(now))
            .last_touched = now;
    }

    /// Drop everything pending for a DAO.
    pub async fn reset(&self, dao_id: &str) {
        self.pending.lock().await.remove(dao_id);
    }

    pub async fn pending_task_count(&self, dao_id: &str) -> usize {
        self.pending
            .lock()
            .await
            .get(dao_id)
            .map_or(0, |p| p.tasks.len())
    }

    pub async fn last_touched(&self, dao_id: &str) -> Option<DateTime<Utc>> {
        self.pending.lock().await.get(dao_id).map(|p| p.last_touched)
    }

    pub async fn aggregate_and_clear(&self, dao: &Dao, max_lines: usize) -> Option<FlushOutcome> {
        self.aggregate_and_clear_at(dao, max_lines, Utc::now()).await
    }

    /// Flush the DAO's pending changes as of `now`. Returns `None` when
    /// there was nothing to flush; callers must then skip broadcasting.
    pub async fn aggregate_and_clear_at(
        &self,
        dao: &Dao,
        max_lines: usize,
        now: DateTime<Utc>,
    ) -> Option<FlushOutcome> {
        let pending = self.pending.lock().await.remove(&dao.id)?;
        if pending.tasks.is_empty() {
            return None;
        }

        let task_count = pending.tasks.len();
        let truncated = task_count > max_lines;
        let mut lines: Vec<String> = pending
            .tasks
            .iter()
            .take(max_lines)
            .map(|(task_id, snapshot)| snapshot.render(*task_id))
            .collect();
        if truncated {
            lines.push(TRUNCATION_MARKER.to_string());
        }

        let summary = ChangeSummary {
            title: format!("Updates on {}", dao.numero_liste),
            lines,
            task_count,
            truncated,
        };

        let entry = DaoHistoryEntry {
            id: uuid::Uuid::new_v4().to_string(),
            dao_id: dao.id.clone(),
            numero_liste: dao.numero_liste.clone(),
            created_at: now,
            summary: summary.title.clone(),
            lines: summary.lines.clone(),
        };
        self.history.record(entry.clone()).await;

        tracing::debug!(
            "Flushed {} task change(s) for {} into history",
            task_count,
            dao.numero_liste
        );

        Some(FlushOutcome { summary, entry })
    }
}
