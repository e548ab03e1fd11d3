//! Gantry Core - hybrid training and inference job orchestration.
//!
//! This crate provides:
//! - In-memory job stores with a finished-job history
//! - A training orchestrator that fills a local container backend up to a
//!   fixed capacity and overflows onto a remote batch backend
//! - An inference orchestrator that provisions remote service environments
//! - Background trackers that move finished training jobs into history
//! - Docker, TWCC and in-process mock backends
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use gantry_core::backend::{MockContainerBackend, MockRemoteBackend};
//! use gantry_core::config::TrainingConfig;
//! use gantry_core::{Job, TrainingJobOrchestrator, TrainingJobStore};
//!
//! #[tokio::main]
//! async fn main() -> gantry_core::Result<()> {
//!     let orchestrator = TrainingJobOrchestrator::new(
//!         Arc::new(TrainingJobStore::new()),
//!         Arc::new(MockContainerBackend::new()),
//!         Arc::new(MockRemoteBackend::default()),
//!         TrainingConfig::default(),
//!     );
//!     let placement = orchestrator.create_job(Job::new("resnet"), "trainer:v1", "237139").await?;
//!     println!("placed on {placement}");
//!     orchestrator.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod store;
pub mod tracker;

pub use backend::{
    BackendError, ContainerBackend, ContainerHandle, RemoteBatchBackend, RemoteEnvironmentBackend,
};
pub use config::{Config, ConfigError};
pub use error::{BackendOperation, ErrorKind, JobError, Result};
pub use models::{ContainerJob, InferenceJob, Job, JobStatus, Placement, RemoteBatchJob};
pub use orchestrator::{DeletePolicy, InferenceJobOrchestrator, TrainingJobOrchestrator};
pub use store::{HistoryRetention, InferenceJobStore, TrainingJobStore};
pub use tracker::{TrackerEvent, TrackerOutcome, TrackerReporter};
