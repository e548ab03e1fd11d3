//! Shared request-handler state and backend wiring.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use gantry_core::backend::{DockerBackend, MockContainerBackend, MockRemoteBackend, TwccClient};
use gantry_core::config::BackendKind;
use gantry_core::{
    Config, ContainerBackend, InferenceJobOrchestrator, InferenceJobStore, RemoteBatchBackend,
    RemoteEnvironmentBackend, TrainingJobOrchestrator, TrainingJobStore,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// How long a mock container runs before exiting.
const MOCK_RUN_TIME: Duration = Duration::from_secs(30);
/// Polls after which a mock remote job reports completion.
const MOCK_REMOTE_POLLS: usize = 3;

/// State shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    /// Training job orchestrator.
    pub training: Arc<TrainingJobOrchestrator>,
    /// Inference job orchestrator.
    pub inference: Arc<InferenceJobOrchestrator>,
    /// Delay after which an inference job is deleted.
    pub inference_ttl: Duration,
    /// Cancelled on process shutdown.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Builds the orchestrators over explicit backends.
    pub fn new(
        config: &Config,
        container: Arc<dyn ContainerBackend>,
        batch: Arc<dyn RemoteBatchBackend>,
        environments: Arc<dyn RemoteEnvironmentBackend>,
        shutdown: CancellationToken,
    ) -> Self {
        let training = TrainingJobOrchestrator::new(
            Arc::new(TrainingJobStore::with_retention(config.training.history)),
            container,
            batch,
            config.training.clone(),
        );
        let inference = InferenceJobOrchestrator::new(
            Arc::new(InferenceJobStore::new()),
            environments,
            config.inference.clone(),
        );

        Self {
            training: Arc::new(training),
            inference: Arc::new(inference),
            inference_ttl: config.server.inference_ttl(),
            shutdown,
        }
    }

    /// Builds the orchestrators over the backends selected by `config`.
    pub fn from_config(config: &Config, shutdown: CancellationToken) -> anyhow::Result<Self> {
        match config.backend.kind {
            BackendKind::Live => {
                let docker = Arc::new(DockerBackend::new(config.backend.docker_binary.clone()));
                let twcc = Arc::new(
                    TwccClient::new(config.twcc.clone())
                        .context("Failed to build the TWCC client")?,
                );
                info!(
                    docker = %config.backend.docker_binary,
                    api_base = %config.twcc.api_base,
                    "Using live backends"
                );
                Ok(Self::new(config, docker, twcc.clone(), twcc, shutdown))
            }
            BackendKind::Mock => {
                let container = Arc::new(MockContainerBackend::with_run_time(MOCK_RUN_TIME));
                let remote =
                    Arc::new(MockRemoteBackend::default().finishing_after(MOCK_REMOTE_POLLS));
                info!("Using in-process mock backends");
                Ok(Self::new(config, container, remote.clone(), remote, shutdown))
            }
        }
    }

    /// Deletes the inference job once the TTL elapses, unless the server is
    /// shutting down first.
    pub fn schedule_inference_expiry(&self, job_id: String) {
        let inference = Arc::clone(&self.inference);
        let ttl = self.inference_ttl;
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            tokio::select! {
                () = shutdown.cancelled() => {}
                () = tokio::time::sleep(ttl) => {
                    match inference.delete_job(&job_id).await {
                        Ok(_) => info!(job_id = %job_id, "Inference job expired"),
                        Err(e) => {
                            error!(job_id = %job_id, error = %e, "Failed to expire inference job");
                        }
                    }
                }
            }
        });
    }
}
