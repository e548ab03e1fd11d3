//! Job data model.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle label of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    /// Accepted but not yet placed on a backend.
    #[serde(rename = "created")]
    Created,
    /// Training job running on the local container backend.
    #[serde(rename = "running on docker")]
    RunningOnDocker,
    /// Training job running on the remote batch backend.
    #[serde(rename = "running on twcc")]
    RunningOnTwcc,
    /// Inference environment serving on the remote backend.
    #[serde(rename = "inference running on twcc")]
    InferenceRunningOnTwcc,
    /// Terminal state, only held by history entries.
    #[serde(rename = "finished")]
    Finished,
}

impl JobStatus {
    /// Returns the wire label of the status.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::RunningOnDocker => "running on docker",
            Self::RunningOnTwcc => "running on twcc",
            Self::InferenceRunningOnTwcc => "inference running on twcc",
            Self::Finished => "finished",
        }
    }

    /// True for the backend-specific running labels.
    pub const fn is_running(self) -> bool {
        matches!(self, Self::RunningOnDocker | Self::RunningOnTwcc | Self::InferenceRunningOnTwcc)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend a training job was placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    /// Local container backend.
    Container,
    /// Remote batch backend.
    Remote,
}

impl Placement {
    /// Status a job carries while active on this backend.
    pub const fn running_status(self) -> JobStatus {
        match self {
            Self::Container => JobStatus::RunningOnDocker,
            Self::Remote => JobStatus::RunningOnTwcc,
        }
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Container => f.write_str("container"),
            Self::Remote => f.write_str("remote"),
        }
    }
}

/// Generic job record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Current lifecycle label.
    pub status: JobStatus,
    /// When the job was accepted.
    pub created_at: DateTime<Utc>,
    /// When the job entered history.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Creates a job with a fresh UUID v4 identifier.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), name)
    }

    /// Creates a job with a caller-supplied identifier.
    #[must_use]
    pub fn with_id(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: JobStatus::Created,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Returns the history snapshot of this job.
    #[must_use]
    pub fn finished(mut self) -> Self {
        self.status = JobStatus::Finished;
        self.finished_at = Some(Utc::now());
        self
    }
}

/// Training job running on the container backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerJob {
    /// The job record.
    pub job: Job,
    /// Container image the job runs.
    pub image_ref: String,
}

/// Training job submitted to the remote batch backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteBatchJob {
    /// The job record.
    pub job: Job,
    /// Backend-assigned handle used for polling.
    pub remote_job_id: String,
}

/// Inference job served from a remote environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceJob {
    /// The job record.
    pub job: Job,
    /// Remote environment identifier.
    pub env_id: String,
    /// Resolved `host:port` endpoint.
    pub endpoint: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_job_is_created_with_uuid() {
        let job = Job::new("train");
        assert_eq!(job.status, JobStatus::Created);
        assert!(Uuid::parse_str(&job.id).is_ok());
        assert!(job.finished_at.is_none());
    }

    #[test]
    fn test_finished_snapshot() {
        let mut job = Job::with_id("j1", "train");
        job.status = JobStatus::RunningOnDocker;
        let snapshot = job.finished();
        assert_eq!(snapshot.status, JobStatus::Finished);
        assert!(snapshot.finished_at.is_some());
        assert_eq!(snapshot.id, "j1");
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(JobStatus::RunningOnDocker.to_string(), "running on docker");
        assert_eq!(JobStatus::InferenceRunningOnTwcc.as_str(), "inference running on twcc");
        assert!(JobStatus::RunningOnTwcc.is_running());
        assert!(!JobStatus::Created.is_running());
        assert!(!JobStatus::Finished.is_running());
    }

    #[test]
    fn test_status_serializes_as_label() {
        let json = serde_json::to_string(&JobStatus::RunningOnTwcc).unwrap();
        assert_eq!(json, "\"running on twcc\"");
        let back: JobStatus = serde_json::from_str("\"finished\"").unwrap();
        assert_eq!(back, JobStatus::Finished);
    }

    #[test]
    fn test_placement_running_status() {
        assert_eq!(Placement::Container.running_status(), JobStatus::RunningOnDocker);
        assert_eq!(Placement::Remote.running_status(), JobStatus::RunningOnTwcc);
    }
}
