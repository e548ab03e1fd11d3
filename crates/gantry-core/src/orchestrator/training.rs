use std::sync::Arc;

use tracing::{info, warn};

use super::DeletePolicy;
use crate::backend::{ContainerBackend, RemoteBatchBackend};
use crate::config::TrainingConfig;
use crate::error::{BackendOperation, JobError, Result};
use crate::models::{Job, Placement};
use crate::store::TrainingJobStore;
use crate::tracker::{
    self, PollSettings, TrackerEvent, TrackerOutcome, TrackerReporter, TrackerSet,
};

/// Places training jobs and tracks them until they finish.
pub struct TrainingJobOrchestrator {
    store: Arc<TrainingJobStore>,
    container: Arc<dyn ContainerBackend>,
    batch: Arc<dyn RemoteBatchBackend>,
    config: TrainingConfig,
    reporter: TrackerReporter,
    trackers: TrackerSet,
}

impl TrainingJobOrchestrator {
    /// Creates an orchestrator over `store` using the given backends.
    pub fn new(
        store: Arc<TrainingJobStore>,
        container: Arc<dyn ContainerBackend>,
        batch: Arc<dyn RemoteBatchBackend>,
        config: TrainingConfig,
    ) -> Self {
        Self {
            store,
            container,
            batch,
            config,
            reporter: TrackerReporter::new(),
            trackers: TrackerSet::new(),
        }
    }

    /// Forwards tracker events to `events` in addition to logging them.
    #[must_use]
    pub fn with_events(mut self, events: tokio::sync::mpsc::UnboundedSender<TrackerEvent>) -> Self {
        self.reporter = TrackerReporter::with_channel(events);
        self
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<TrainingJobStore> {
        &self.store
    }

    /// Active configuration.
    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Places, admits and launches a training job.
    ///
    /// The job runs on the container backend while fewer than
    /// `container_capacity` container jobs are active and is submitted to the
    /// remote backend as `remote_job_id` otherwise. A tracker is started on
    /// success. If the backend call fails the admission is rolled back.
    ///
    /// # Errors
    /// [`JobError::AlreadyExists`] for a known id, [`JobError::Backend`] when
    /// container creation or remote submission fails.
    pub async fn create_job(
        &self,
        job: Job,
        image_ref: &str,
        remote_job_id: &str,
    ) -> Result<Placement> {
        let job_id = job.id.clone();
        let (placement, _) = self.store.admit_with_capacity(
            job,
            image_ref,
            remote_job_id,
            self.config.container_capacity,
        )?;
        info!(job_id = %job_id, %placement, image = image_ref, remote_job_id, "Placed training job");

        match placement {
            Placement::Container => {
                let handle = match self.container.create(image_ref).await {
                    Ok(handle) => handle,
                    Err(source) => {
                        self.rollback(&job_id, placement);
                        return Err(JobError::backend(BackendOperation::CreateContainer, source));
                    }
                };

                let store = Arc::clone(&self.store);
                let backend = Arc::clone(&self.container);
                let reporter = self.reporter.clone();
                let tracked_id = job_id.clone();
                self.trackers.spawn(&job_id, move |token| {
                    tracker::watch_container(store, backend, tracked_id, handle, reporter, token)
                });
            }
            Placement::Remote => {
                if let Err(source) = self.batch.submit(remote_job_id).await {
                    self.rollback(&job_id, placement);
                    return Err(JobError::backend(BackendOperation::SubmitBatchJob, source));
                }

                let store = Arc::clone(&self.store);
                let backend = Arc::clone(&self.batch);
                let reporter = self.reporter.clone();
                let tracked_id = job_id.clone();
                let remote_job_id = remote_job_id.to_string();
                let settings = self.poll_settings();
                self.trackers.spawn(&job_id, move |token| {
                    tracker::poll_remote(
                        store,
                        backend,
                        tracked_id,
                        remote_job_id,
                        settings,
                        reporter,
                        token,
                    )
                });
            }
        }

        Ok(placement)
    }

    fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: self.config.poll_interval(),
            max_attempts: self.config.poll_max_attempts,
            terminal_status: self.config.terminal_status.clone(),
        }
    }

    fn rollback(&self, job_id: &str, placement: Placement) {
        let rolled_back = match placement {
            Placement::Container => self.store.rollback_container_job(job_id),
            Placement::Remote => self.store.rollback_remote_job(job_id),
        };
        match rolled_back {
            Ok(()) => warn!(job_id, %placement, "Rolled back admission"),
            // A delete landed while the backend call was in flight. History
            // keeps the snapshot it wrote even though the job never ran.
            Err(e) => warn!(
                job_id,
                %placement,
                error = %e,
                "Admission already deleted on rollback, history entry kept"
            ),
        }
    }

    /// Looks a job up in any partition.
    pub fn get_job(&self, id: &str) -> Result<Job> {
        self.store.get(id)
    }

    /// Active container jobs, then active remote jobs, then history.
    pub fn list_all_jobs(&self) -> Vec<Job> {
        self.store.list_all_jobs()
    }

    /// Deletes an active job according to the configured [`DeletePolicy`] and
    /// returns its history snapshot.
    ///
    /// The job's tracker keeps running; its own removal later fails and is
    /// reported as [`TrackerEvent::FinalizeFailed`].
    ///
    /// # Errors
    /// [`JobError::NotFound`] if the targeted partition does not hold the job.
    pub fn delete_job(&self, id: &str) -> Result<Job> {
        let removed = match self.config.delete_policy {
            DeletePolicy::ContainerFirst => {
                if self.store.container_count() > 0 {
                    self.store.remove_container_job(id)
                } else {
                    self.store.remove_remote_job(id)
                }
            }
            DeletePolicy::OldestContainer => match self.store.first_container_job_id() {
                Some(oldest) => self.store.remove_container_job(&oldest),
                None => self.store.remove_remote_job(id),
            },
            DeletePolicy::ById => match self.store.remove_container_job(id) {
                Err(JobError::NotFound(_)) => self.store.remove_remote_job(id),
                other => other,
            },
        }?;
        info!(requested = id, job_id = %removed.id, "Deleted training job");
        Ok(removed)
    }

    /// Cancels the tracker of `job_id`. Returns `false` if none is held.
    pub fn cancel_tracker(&self, job_id: &str) -> bool {
        self.trackers.cancel(job_id)
    }

    /// Waits for the tracker of `job_id` to end and returns how it ended.
    pub async fn join_tracker(&self, job_id: &str) -> Option<TrackerOutcome> {
        let handle = self.trackers.take(job_id)?;
        Some(handle.join().await)
    }

    /// Cancels every tracker and waits for them to end.
    pub async fn shutdown(&self) {
        info!(trackers = self.trackers.len(), "Stopping training trackers");
        self.trackers.shutdown().await;
    }
}
