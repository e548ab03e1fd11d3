//! Execution backend interfaces consumed by the orchestrators.
//!
//! Three capability sets are defined here:
//! - [`ContainerBackend`]: local container execution with an exit callback
//! - [`RemoteBatchBackend`]: remote batch submission and status polling
//! - [`RemoteEnvironmentBackend`]: remote service environment provisioning
//!
//! Concrete implementations live in the submodules: [`DockerBackend`] drives
//! the docker CLI, [`TwccClient`] talks to the remote cloud API, and the
//! [`mock`] backends run in-process for tests and local development.

mod docker;
pub mod mock;
mod twcc;

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

pub use docker::DockerBackend;
pub use mock::{MockContainerBackend, MockRemoteBackend};
pub use twcc::TwccClient;

/// Errors reported by backend collaborators.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend could not be reached or refused to serve.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// The backend answered with an unexpected status.
    #[error("Unexpected response status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },

    /// The backend answered with something we cannot use.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A backend command exited unsuccessfully.
    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for backend calls.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Opaque handle of a created container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerHandle(String);

impl ContainerHandle {
    /// Wraps a backend-assigned container id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the container id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Callback invoked once when a container exits normally.
pub type ExitCallback = Box<dyn FnOnce() + Send + 'static>;

/// Local container execution.
#[async_trait]
pub trait ContainerBackend: Send + Sync {
    /// Creates (but does not start) a container for `image_ref`.
    async fn create(&self, image_ref: &str) -> BackendResult<ContainerHandle>;

    /// Starts the container and waits for it to exit.
    ///
    /// `on_exit` is invoked exactly once, and only on a normal exit. Failures
    /// to start or wait are returned through the result instead.
    async fn start_and_await(
        &self,
        container: &ContainerHandle,
        on_exit: ExitCallback,
    ) -> BackendResult<()>;
}

/// Remote batch job execution.
#[async_trait]
pub trait RemoteBatchBackend: Send + Sync {
    /// Submits a prepared remote job for execution.
    async fn submit(&self, remote_job_id: &str) -> BackendResult<()>;

    /// Returns the remote status label of a job.
    async fn poll_status(&self, remote_job_id: &str) -> BackendResult<String>;
}

/// Remote service environment lifecycle.
#[async_trait]
pub trait RemoteEnvironmentBackend: Send + Sync {
    /// Provisions a new environment and returns its id.
    async fn provision(&self) -> BackendResult<String>;

    /// Makes the environment reachable from the network.
    async fn associate_endpoint(&self, env_id: &str) -> BackendResult<()>;

    /// Returns the `host:port` endpoint of the environment.
    async fn resolve_endpoint(&self, env_id: &str) -> BackendResult<String>;

    /// Destroys the environment.
    async fn teardown(&self, env_id: &str) -> BackendResult<()>;
}
