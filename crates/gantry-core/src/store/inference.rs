//! Inference job store: a single active partition, no history.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::error::{JobError, Result};
use crate::models::{InferenceJob, Job};

/// In-memory registry of inference jobs.
#[derive(Debug, Default)]
pub struct InferenceJobStore {
    jobs: Mutex<HashMap<String, InferenceJob>>,
}

impl InferenceJobStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<String, InferenceJob>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts an inference job.
    ///
    /// # Errors
    /// [`JobError::AlreadyExists`] if the id is already active.
    pub fn admit(&self, record: InferenceJob) -> Result<()> {
        let mut jobs = self.jobs();
        if jobs.contains_key(&record.job.id) {
            return Err(JobError::AlreadyExists(record.job.id));
        }
        debug!(job_id = %record.job.id, env_id = %record.env_id, "Admitted inference job");
        jobs.insert(record.job.id.clone(), record);
        Ok(())
    }

    /// Returns the job part of an entry.
    pub fn get(&self, id: &str) -> Result<Job> {
        self.get_record(id).map(|record| record.job)
    }

    /// Returns the full entry, including environment and endpoint.
    pub fn get_record(&self, id: &str) -> Result<InferenceJob> {
        self.jobs().get(id).cloned().ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    /// Snapshot of every entry, in no particular order.
    pub fn list(&self) -> Vec<InferenceJob> {
        self.jobs().values().cloned().collect()
    }

    /// Snapshot of the job part of every entry.
    pub fn list_jobs(&self) -> Vec<Job> {
        self.jobs().values().map(|record| record.job.clone()).collect()
    }

    /// Permanently removes an entry and returns it.
    ///
    /// # Errors
    /// [`JobError::NotFound`] if the id is not active.
    pub fn remove(&self, id: &str) -> Result<InferenceJob> {
        let removed = self.jobs().remove(id).ok_or_else(|| JobError::NotFound(id.to_string()))?;
        debug!(job_id = %id, "Removed inference job");
        Ok(removed)
    }

    /// Whether `id` is active.
    pub fn contains(&self, id: &str) -> bool {
        self.jobs().contains_key(id)
    }

    /// Number of active entries.
    pub fn len(&self) -> usize {
        self.jobs().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.jobs().is_empty()
    }
}
