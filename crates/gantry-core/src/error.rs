//! Error types for job orchestration.

use std::fmt;

use thiserror::Error;

use crate::backend::BackendError;

/// Result type alias for orchestration and store operations.
pub type Result<T> = std::result::Result<T, JobError>;

/// Collaborator call that failed, carried by [`JobError::Backend`] and
/// [`JobError::PartialFailure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendOperation {
    /// Creating a container on the container backend.
    CreateContainer,
    /// Submitting a batch job to the remote backend.
    SubmitBatchJob,
    /// Provisioning a remote service environment.
    ProvisionEnvironment,
    /// Associating a network endpoint with an environment.
    AssociateEndpoint,
    /// Resolving the `host:port` endpoint of an environment.
    ResolveEndpoint,
    /// Tearing down a remote service environment.
    TeardownEnvironment,
}

impl fmt::Display for BackendOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CreateContainer => "create container",
            Self::SubmitBatchJob => "submit batch job",
            Self::ProvisionEnvironment => "provision environment",
            Self::AssociateEndpoint => "associate endpoint",
            Self::ResolveEndpoint => "resolve endpoint",
            Self::TeardownEnvironment => "teardown environment",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by the job stores and orchestrators.
#[derive(Error, Debug)]
pub enum JobError {
    /// Lookup or deletion of an unknown job id.
    #[error("Job not found: {0}")]
    NotFound(String),

    /// Admission of an id that is already present in the store.
    #[error("Job already exists: {0}")]
    AlreadyExists(String),

    /// Admission lost to a concurrent creation of the same id, and tearing
    /// down the resource provisioned for the losing request failed.
    #[error("Job already exists: {id} (rollback failed: {rollback})")]
    AlreadyExistsUnrolled {
        /// The contested job id.
        id: String,
        /// Error raised by the rollback.
        rollback: Box<JobError>,
    },

    /// A collaborator call failed before anything needed undoing.
    #[error("Backend error during {operation}: {source}")]
    Backend {
        /// The failing call.
        operation: BackendOperation,
        /// The collaborator's own error.
        #[source]
        source: BackendError,
    },

    /// A multi-step creation failed after a partial success and was rolled
    /// back best-effort.
    #[error("Backend error during {operation} (rolled back{}): {source}", rollback_suffix(.rollback.as_deref()))]
    PartialFailure {
        /// The failing call.
        operation: BackendOperation,
        /// The collaborator's own error.
        #[source]
        source: BackendError,
        /// Error raised by the rollback itself, if it did not succeed.
        rollback: Option<Box<JobError>>,
    },
}

fn rollback_suffix(rollback: Option<&JobError>) -> String {
    rollback.map_or_else(String::new, |e| format!(", rollback failed: {e}"))
}

/// Discriminant of [`JobError`] for programmatic dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`JobError::NotFound`].
    NotFound,
    /// See [`JobError::AlreadyExists`].
    AlreadyExists,
    /// See [`JobError::Backend`].
    Backend,
    /// See [`JobError::PartialFailure`].
    PartialFailure,
}

impl JobError {
    /// Wraps a collaborator failure.
    pub fn backend(operation: BackendOperation, source: BackendError) -> Self {
        Self::Backend { operation, source }
    }

    /// Wraps a collaborator failure that required a rollback.
    pub fn partial(
        operation: BackendOperation,
        source: BackendError,
        rollback: Option<JobError>,
    ) -> Self {
        Self::PartialFailure { operation, source, rollback: rollback.map(Box::new) }
    }

    /// Returns the error kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyExists(_) | Self::AlreadyExistsUnrolled { .. } => {
                ErrorKind::AlreadyExists
            }
            Self::Backend { .. } => ErrorKind::Backend,
            Self::PartialFailure { .. } => ErrorKind::PartialFailure,
        }
    }

    /// True for both plain and rolled-back collaborator failures.
    pub fn is_backend_failure(&self) -> bool {
        matches!(self.kind(), ErrorKind::Backend | ErrorKind::PartialFailure)
    }

    /// The failing collaborator call, if any.
    pub fn operation(&self) -> Option<BackendOperation> {
        match self {
            Self::Backend { operation, .. } | Self::PartialFailure { operation, .. } => {
                Some(*operation)
            }
            _ => None,
        }
    }

    /// Error raised while undoing a partial creation, if any.
    pub fn rollback_error(&self) -> Option<&JobError> {
        match self {
            Self::PartialFailure { rollback, .. } => rollback.as_deref(),
            Self::AlreadyExistsUnrolled { rollback, .. } => Some(rollback),
            _ => None,
        }
    }
}
