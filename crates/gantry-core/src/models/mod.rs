//! Job records shared by the stores and orchestrators.

pub mod job;

pub use job::{ContainerJob, InferenceJob, Job, JobStatus, Placement, RemoteBatchJob};
