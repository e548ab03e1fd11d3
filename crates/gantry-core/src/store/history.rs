//! Finished-job history.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::models::Job;

/// How many finished jobs the history keeps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryRetention {
    /// Keep every finished job for the lifetime of the process.
    #[default]
    Unbounded,
    /// Keep at most this many entries, evicting the oldest first.
    Bounded(usize),
}

/// Append-only record of finished jobs with optional ring-buffer eviction.
#[derive(Debug, Default)]
pub struct HistoryLog {
    entries: HashMap<String, Job>,
    order: VecDeque<String>,
    retention: HistoryRetention,
}

impl HistoryLog {
    /// Creates an empty history with the given retention.
    pub fn new(retention: HistoryRetention) -> Self {
        Self { entries: HashMap::new(), order: VecDeque::new(), retention }
    }

    /// Records a finished job and returns the entry evicted to make room, if any.
    pub fn record(&mut self, job: Job) -> Option<Job> {
        if self.entries.contains_key(&job.id) {
            self.order.retain(|id| id != &job.id);
        }
        self.order.push_back(job.id.clone());
        self.entries.insert(job.id.clone(), job);

        match self.retention {
            HistoryRetention::Bounded(limit) if self.order.len() > limit => {
                let oldest = self.order.pop_front()?;
                self.entries.remove(&oldest)
            }
            _ => None,
        }
    }

    /// Looks up a finished job.
    pub fn get(&self, id: &str) -> Option<&Job> {
        self.entries.get(id)
    }

    /// Whether `id` is recorded.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Finished jobs, oldest first.
    pub fn jobs(&self) -> Vec<Job> {
        self.order.iter().filter_map(|id| self.entries.get(id)).cloned().collect()
    }

    /// Number of recorded jobs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the history is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finished(id: &str) -> Job {
        Job::with_id(id, "job").finished()
    }

    #[test]
    fn test_unbounded_keeps_everything() {
        let mut history = HistoryLog::new(HistoryRetention::Unbounded);
        for i in 0..100 {
            assert!(history.record(finished(&format!("j{i}"))).is_none());
        }
        assert_eq!(history.len(), 100);
        assert_eq!(history.jobs().first().map(|j| j.id.as_str()), Some("j0"));
    }

    #[test]
    fn test_bounded_evicts_oldest() {
        let mut history = HistoryLog::new(HistoryRetention::Bounded(2));
        history.record(finished("a"));
        history.record(finished("b"));
        let evicted = history.record(finished("c"));

        assert_eq!(evicted.map(|j| j.id), Some("a".to_string()));
        assert!(!history.contains("a"));
        let ids: Vec<String> = history.jobs().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn test_rerecord_moves_to_back() {
        let mut history = HistoryLog::new(HistoryRetention::Bounded(2));
        history.record(finished("a"));
        history.record(finished("b"));
        history.record(finished("a"));
        let evicted = history.record(finished("c"));

        assert_eq!(evicted.map(|j| j.id), Some("b".to_string()));
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_retention_deserializes() {
        #[derive(Deserialize)]
        struct Wrapper {
            history: HistoryRetention,
        }
        let w: Wrapper = toml::from_str("history = \"unbounded\"").unwrap();
        assert_eq!(w.history, HistoryRetention::Unbounded);
        let w: Wrapper = toml::from_str("history = { bounded = 10 }").unwrap();
        assert_eq!(w.history, HistoryRetention::Bounded(10));
    }
}
