//! Day-bucketed change history.
//!
//! Entries are keyed by the UTC date of their flush. Each bucket keeps the
//! newest entry first and holds at most `day_capacity` entries; the oldest
//! entry of a full bucket is evicted. The store lives for the process only.

use std::collections::{BTreeMap, VecDeque};

use chrono::NaiveDate;
use tokio::sync::RwLock;

use crate::models::{DaoHistoryEntry, HistoryQuery};

pub const DEFAULT_DAY_CAPACITY: usize = 1000;

#[derive(Debug)]
pub struct HistoryStore {
    days: RwLock<BTreeMap<NaiveDate, VecDeque<DaoHistoryEntry>>>,
    day_capacity: usize,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_DAY_CAPACITY)
    }
}

impl HistoryStore {
    pub fn new(day_capacity: usize) -> Self {
        Self {
            days: RwLock::new(BTreeMap::new()),
            day_capacity: day_capacity.max(1),
        }
    }

    pub async fn record(&self, entry: DaoHistoryEntry) {
        let day = entry.created_at.date_naive();
        let mut days = self.days.write().await;
        let bucket = days.entry(day).or_default();
        bucket.push_front(entry);
        while bucket.len() > self.day_capacity {
            bucket.pop_back();
        }
    }

    /// `Day` returns the bucket as stored (newest flush first). `Range`
    /// gathers every bucket inside the inclusive bounds and sorts the result
    /// by creation time, newest first. An unbounded range returns everything.
    pub async fn list(&self, query: HistoryQuery) -> Vec<DaoHistoryEntry> {
        let days = self.days.read().await;
        match query {
            HistoryQuery::Day(day) => days
                .get(&day)
                .map(|bucket| bucket.iter().cloned().collect())
                .unwrap_or_default(),
            HistoryQuery::Range { from, to } => {
                if let (Some(from), Some(to)) = (from, to) {
                    if from > to {
                        return Vec::new();
                    }
                }
                let mut entries: Vec<DaoHistoryEntry> = days
                    .iter()
                    .filter(|(day, _)| from.map_or(true, |f| **day >= f))
                    .filter(|(day, _)| to.map_or(true, |t| **day <= t))
                    .flat_map(|(_, bucket)| bucket.iter().cloned())
                    .collect();
                entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                entries
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.days.read().await.values().map(VecDeque::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
