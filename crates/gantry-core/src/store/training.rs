//! Training job store: active-on-container, active-on-remote and history.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::history::{HistoryLog, HistoryRetention};
use crate::error::{JobError, Result};
use crate::models::{ContainerJob, Job, Placement, RemoteBatchJob};

/// An active entry tagged with its admission sequence number.
#[derive(Debug)]
struct Admitted<T> {
    seq: u64,
    record: T,
}

#[derive(Debug)]
struct Partitions {
    containers: HashMap<String, Admitted<ContainerJob>>,
    remotes: HashMap<String, Admitted<RemoteBatchJob>>,
    history: HistoryLog,
    next_seq: u64,
}

impl Partitions {
    fn contains(&self, id: &str) -> bool {
        self.containers.contains_key(id) || self.remotes.contains_key(id) || self.history.contains(id)
    }

    fn ensure_absent(&self, id: &str) -> Result<()> {
        if self.contains(id) {
            return Err(JobError::AlreadyExists(id.to_string()));
        }
        Ok(())
    }

    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn insert_container(&mut self, job: Job, image_ref: String) {
        let seq = self.next_seq();
        self.containers
            .insert(job.id.clone(), Admitted { seq, record: ContainerJob { job, image_ref } });
    }

    fn insert_remote(&mut self, job: Job, remote_job_id: String) {
        let seq = self.next_seq();
        self.remotes
            .insert(job.id.clone(), Admitted { seq, record: RemoteBatchJob { job, remote_job_id } });
    }

    fn finish(&mut self, job: Job) -> Job {
        let snapshot = job.finished();
        if let Some(evicted) = self.history.record(snapshot.clone()) {
            debug!(job_id = %evicted.id, "Evicted job from history");
        }
        snapshot
    }
}

/// Snapshot an active partition in admission order.
fn snapshot<T: Clone>(partition: &HashMap<String, Admitted<T>>) -> Vec<T> {
    let mut entries: Vec<&Admitted<T>> = partition.values().collect();
    entries.sort_by_key(|entry| entry.seq);
    entries.into_iter().map(|entry| entry.record.clone()).collect()
}

/// In-memory registry of training jobs.
///
/// Every operation takes the single store lock for its whole duration and
/// never performs I/O while holding it.
#[derive(Debug)]
pub struct TrainingJobStore {
    inner: Mutex<Partitions>,
}

impl Default for TrainingJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainingJobStore {
    /// Creates an empty store with unbounded history.
    #[must_use]
    pub fn new() -> Self {
        Self::with_retention(HistoryRetention::Unbounded)
    }

    /// Creates an empty store with the given history retention.
    #[must_use]
    pub fn with_retention(retention: HistoryRetention) -> Self {
        Self {
            inner: Mutex::new(Partitions {
                containers: HashMap::new(),
                remotes: HashMap::new(),
                history: HistoryLog::new(retention),
                next_seq: 0,
            }),
        }
    }

    fn partitions(&self) -> MutexGuard<'_, Partitions> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts a job into the active-container partition.
    ///
    /// # Errors
    /// [`JobError::AlreadyExists`] if the id is present in any partition.
    pub fn admit_container_job(&self, job: Job, image_ref: impl Into<String>) -> Result<()> {
        let mut partitions = self.partitions();
        partitions.ensure_absent(&job.id)?;
        debug!(job_id = %job.id, "Admitted container job");
        partitions.insert_container(job, image_ref.into());
        Ok(())
    }

    /// Inserts a job into the active-remote partition.
    ///
    /// # Errors
    /// [`JobError::AlreadyExists`] if the id is present in any partition.
    pub fn admit_remote_job(&self, job: Job, remote_job_id: impl Into<String>) -> Result<()> {
        let mut partitions = self.partitions();
        partitions.ensure_absent(&job.id)?;
        debug!(job_id = %job.id, "Admitted remote job");
        partitions.insert_remote(job, remote_job_id.into());
        Ok(())
    }

    /// Places and admits a job in one step.
    ///
    /// The job goes to the container partition while it holds fewer than
    /// `capacity` entries and to the remote partition otherwise. Its status is
    /// set to the placement's running label. Returns the placement together
    /// with the admitted record.
    ///
    /// # Errors
    /// [`JobError::AlreadyExists`] if the id is present in any partition.
    pub fn admit_with_capacity(
        &self,
        mut job: Job,
        image_ref: &str,
        remote_job_id: &str,
        capacity: usize,
    ) -> Result<(Placement, Job)> {
        let mut partitions = self.partitions();
        partitions.ensure_absent(&job.id)?;

        let placement = if partitions.containers.len() < capacity {
            Placement::Container
        } else {
            Placement::Remote
        };
        job.status = placement.running_status();
        let admitted = job.clone();

        match placement {
            Placement::Container => partitions.insert_container(job, image_ref.to_string()),
            Placement::Remote => partitions.insert_remote(job, remote_job_id.to_string()),
        }
        debug!(job_id = %admitted.id, %placement, "Admitted job");
        Ok((placement, admitted))
    }

    /// Looks a job up across active-container, active-remote and history, in
    /// that order.
    ///
    /// # Errors
    /// [`JobError::NotFound`] if no partition holds the id.
    pub fn get(&self, id: &str) -> Result<Job> {
        let partitions = self.partitions();
        partitions
            .containers
            .get(id)
            .map(|entry| entry.record.job.clone())
            .or_else(|| partitions.remotes.get(id).map(|entry| entry.record.job.clone()))
            .or_else(|| partitions.history.get(id).cloned())
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    /// Returns an active container job.
    pub fn container_job(&self, id: &str) -> Result<ContainerJob> {
        self.partitions()
            .containers
            .get(id)
            .map(|entry| entry.record.clone())
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    /// Returns an active remote job.
    pub fn remote_job(&self, id: &str) -> Result<RemoteBatchJob> {
        self.partitions()
            .remotes
            .get(id)
            .map(|entry| entry.record.clone())
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    /// Snapshot of active container jobs.
    pub fn list_container_jobs(&self) -> Vec<ContainerJob> {
        snapshot(&self.partitions().containers)
    }

    /// Snapshot of active remote jobs.
    pub fn list_remote_jobs(&self) -> Vec<RemoteBatchJob> {
        snapshot(&self.partitions().remotes)
    }

    /// Snapshot of finished jobs.
    pub fn list_history_jobs(&self) -> Vec<Job> {
        self.partitions().history.jobs()
    }

    /// Every job in the store: container, then remote, then history.
    pub fn list_all_jobs(&self) -> Vec<Job> {
        let partitions = self.partitions();
        snapshot(&partitions.containers)
            .into_iter()
            .map(|c| c.job)
            .chain(snapshot(&partitions.remotes).into_iter().map(|r| r.job))
            .chain(partitions.history.jobs())
            .collect()
    }

    /// Container occupancy.
    pub fn container_count(&self) -> usize {
        self.partitions().containers.len()
    }

    /// Number of active remote jobs.
    pub fn remote_count(&self) -> usize {
        self.partitions().remotes.len()
    }

    /// Number of history entries.
    pub fn history_count(&self) -> usize {
        self.partitions().history.len()
    }

    /// Id of the earliest-admitted active container job.
    pub fn first_container_job_id(&self) -> Option<String> {
        self.partitions()
            .containers
            .iter()
            .min_by_key(|(_, entry)| entry.seq)
            .map(|(id, _)| id.clone())
    }

    /// Moves an active container job to history and returns the snapshot.
    ///
    /// # Errors
    /// [`JobError::NotFound`] if the container partition does not hold the id.
    pub fn remove_container_job(&self, id: &str) -> Result<Job> {
        let mut partitions = self.partitions();
        let entry =
            partitions.containers.remove(id).ok_or_else(|| JobError::NotFound(id.to_string()))?;
        debug!(job_id = %id, "Container job moved to history");
        Ok(partitions.finish(entry.record.job))
    }

    /// Moves an active remote job to history and returns the snapshot.
    ///
    /// # Errors
    /// [`JobError::NotFound`] if the remote partition does not hold the id.
    pub fn remove_remote_job(&self, id: &str) -> Result<Job> {
        let mut partitions = self.partitions();
        let entry =
            partitions.remotes.remove(id).ok_or_else(|| JobError::NotFound(id.to_string()))?;
        debug!(job_id = %id, "Remote job moved to history");
        Ok(partitions.finish(entry.record.job))
    }

    /// Drops a container admission without recording history.
    pub fn rollback_container_job(&self, id: &str) -> Result<()> {
        self.partitions()
            .containers
            .remove(id)
            .map(|_| debug!(job_id = %id, "Container admission rolled back"))
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    /// Drops a remote admission without recording history.
    pub fn rollback_remote_job(&self, id: &str) -> Result<()> {
        self.partitions()
            .remotes
            .remove(id)
            .map(|_| debug!(job_id = %id, "Remote admission rolled back"))
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }
}
