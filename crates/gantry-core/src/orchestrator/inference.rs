use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{info, warn};

use crate::backend::{BackendError, RemoteEnvironmentBackend};
use crate::config::InferenceConfig;
use crate::error::{BackendOperation, JobError, Result};
use crate::models::{InferenceJob, Job, JobStatus};
use crate::store::InferenceJobStore;

/// Serves inference jobs from remote service environments.
pub struct InferenceJobOrchestrator {
    store: Arc<InferenceJobStore>,
    environments: Arc<dyn RemoteEnvironmentBackend>,
    config: InferenceConfig,
    deleting: Mutex<HashSet<String>>,
}

/// Marks a job as being deleted for as long as it is alive.
struct DeleteClaim<'a> {
    deleting: &'a Mutex<HashSet<String>>,
    job_id: String,
}

impl Drop for DeleteClaim<'_> {
    fn drop(&mut self) {
        self.deleting.lock().unwrap_or_else(PoisonError::into_inner).remove(&self.job_id);
    }
}

impl InferenceJobOrchestrator {
    /// Creates an orchestrator over `store` using the given environment backend.
    pub fn new(
        store: Arc<InferenceJobStore>,
        environments: Arc<dyn RemoteEnvironmentBackend>,
        config: InferenceConfig,
    ) -> Self {
        Self { store, environments, config, deleting: Mutex::default() }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<InferenceJobStore> {
        &self.store
    }

    fn deleting(&self) -> MutexGuard<'_, HashSet<String>> {
        self.deleting.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Provisions an environment for `job`, exposes it and returns its
    /// `host:port` endpoint.
    ///
    /// # Errors
    /// - [`JobError::AlreadyExists`] if the id is active, checked before
    ///   anything is provisioned.
    /// - [`JobError::Backend`] if provisioning fails.
    /// - [`JobError::PartialFailure`] if exposing the environment fails after
    ///   it was provisioned. The environment is torn down best-effort.
    /// - [`JobError::AlreadyExists`] if a concurrent create of the same id
    ///   was admitted first. The environment is torn down, and a failed
    ///   teardown is reported as [`JobError::AlreadyExistsUnrolled`].
    pub async fn create_job(&self, mut job: Job) -> Result<String> {
        if self.store.contains(&job.id) {
            return Err(JobError::AlreadyExists(job.id));
        }

        let env_id = self
            .environments
            .provision()
            .await
            .map_err(|e| JobError::backend(BackendOperation::ProvisionEnvironment, e))?;
        info!(job_id = %job.id, env_id = %env_id, "Provisioned inference environment");

        let settle_delay = self.config.settle_delay();
        if !settle_delay.is_zero() {
            tokio::time::sleep(settle_delay).await;
        }

        let endpoint = match self.expose(&env_id).await {
            Ok(endpoint) => endpoint,
            Err((operation, source)) => {
                let rollback = self.teardown_quietly(&job.id, &env_id).await;
                return Err(JobError::partial(operation, source, rollback));
            }
        };

        job.status = JobStatus::InferenceRunningOnTwcc;
        let job_id = job.id.clone();
        let record = InferenceJob { job, env_id: env_id.clone(), endpoint: endpoint.clone() };
        if let Err(err) = self.store.admit(record) {
            return Err(match self.teardown_quietly(&job_id, &env_id).await {
                Some(rollback) => {
                    JobError::AlreadyExistsUnrolled { id: job_id, rollback: Box::new(rollback) }
                }
                None => err,
            });
        }

        info!(job_id = %job_id, env_id = %env_id, endpoint = %endpoint, "Inference job running");
        Ok(endpoint)
    }

    async fn expose(
        &self,
        env_id: &str,
    ) -> std::result::Result<String, (BackendOperation, BackendError)> {
        self.environments
            .associate_endpoint(env_id)
            .await
            .map_err(|e| (BackendOperation::AssociateEndpoint, e))?;
        self.environments
            .resolve_endpoint(env_id)
            .await
            .map_err(|e| (BackendOperation::ResolveEndpoint, e))
    }

    /// Tears an abandoned environment down, returning the failure if any.
    async fn teardown_quietly(&self, job_id: &str, env_id: &str) -> Option<JobError> {
        match self.environments.teardown(env_id).await {
            Ok(()) => {
                warn!(job_id, env_id, "Tore down abandoned environment");
                None
            }
            Err(e) => {
                warn!(job_id, env_id, error = %e, "Failed to tear down abandoned environment");
                Some(JobError::backend(BackendOperation::TeardownEnvironment, e))
            }
        }
    }

    /// Looks up an inference job.
    pub fn get_job(&self, id: &str) -> Result<Job> {
        self.store.get(id)
    }

    /// Full record of an inference job.
    pub fn get_record(&self, id: &str) -> Result<InferenceJob> {
        self.store.get_record(id)
    }

    /// Every active inference job.
    pub fn list_all_jobs(&self) -> Vec<Job> {
        self.store.list_jobs()
    }

    /// Tears the job's environment down and removes the job.
    ///
    /// Concurrent deletes of the same id are serialised: only one reaches the
    /// backend and the others see [`JobError::NotFound`].
    ///
    /// # Errors
    /// [`JobError::NotFound`] for an unknown id or a delete already in
    /// progress, [`JobError::Backend`] if teardown fails. On teardown failure
    /// the job stays in the store.
    pub async fn delete_job(&self, id: &str) -> Result<InferenceJob> {
        let _claim = {
            let mut deleting = self.deleting();
            if !deleting.insert(id.to_string()) {
                return Err(JobError::NotFound(id.to_string()));
            }
            DeleteClaim { deleting: &self.deleting, job_id: id.to_string() }
        };
        // Read under the claim so a delete that just finished is observed.
        let record = self.store.get_record(id)?;

        self.environments
            .teardown(&record.env_id)
            .await
            .map_err(|e| JobError::backend(BackendOperation::TeardownEnvironment, e))?;
        let removed = self.store.remove(id)?;
        info!(job_id = %id, env_id = %removed.env_id, "Deleted inference job");
        Ok(removed)
    }
}
