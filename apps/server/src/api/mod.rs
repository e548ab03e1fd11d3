//! REST API for training and inference jobs.

mod error;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use gantry_core::{Job, Placement};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::info;

pub use error::{ApiError, ErrorBody};

use crate::state::AppState;

/// Name given to every inference job.
const INFERENCE_JOB_NAME: &str = "inference job";

/// Builds the API router over `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/v1/training-jobs", get(list_training_jobs).post(create_training_job))
        .route("/v1/training-jobs/:id", get(get_training_job).delete(delete_training_job))
        .route("/v1/inference-jobs", get(list_inference_jobs).post(create_inference_job))
        .route("/v1/inference-jobs/:id", get(get_inference_job).delete(delete_inference_job))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `POST /v1/training-jobs` body.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTrainingJobRequest {
    /// Image run on the container backend.
    pub docker_image_name: String,
    /// Prepared remote job used when the container backend is full.
    pub twcc_job_id: String,
}

/// `POST /v1/training-jobs` response.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTrainingJobResponse {
    /// Generated job id.
    pub job_id: String,
    /// Backend the job was placed on.
    pub placement: Placement,
}

/// `POST /v1/inference-jobs` response.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInferenceJobResponse {
    /// Generated job id.
    pub job_id: String,
    /// `host:port` the inference service listens on.
    pub entry_point: String,
}

/// Single job response.
#[derive(Debug, Deserialize, Serialize)]
pub struct JobResponse {
    /// The job.
    pub job: Job,
}

/// Job listing response.
#[derive(Debug, Deserialize, Serialize)]
pub struct JobListResponse {
    /// Every known job.
    pub jobs: Vec<Job>,
}

/// Acknowledgement body.
#[derive(Debug, Deserialize, Serialize)]
pub struct MessageResponse {
    /// What happened.
    pub message: String,
}

async fn health_check() -> StatusCode {
    StatusCode::OK
}

async fn create_training_job(
    State(state): State<AppState>,
    Json(request): Json<CreateTrainingJobRequest>,
) -> Result<Json<CreateTrainingJobResponse>, ApiError> {
    let job = Job::new(format!("{}-{}", request.docker_image_name, request.twcc_job_id));
    let job_id = job.id.clone();
    let placement = state
        .training
        .create_job(job, &request.docker_image_name, &request.twcc_job_id)
        .await?;
    Ok(Json(CreateTrainingJobResponse { job_id, placement }))
}

async fn list_training_jobs(State(state): State<AppState>) -> Json<JobListResponse> {
    Json(JobListResponse { jobs: state.training.list_all_jobs() })
}

async fn get_training_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = state.training.get_job(&id)?;
    Ok(Json(JobResponse { job }))
}

async fn delete_training_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = state.training.delete_job(&id)?;
    Ok(Json(JobResponse { job }))
}

async fn create_inference_job(
    State(state): State<AppState>,
) -> Result<Json<CreateInferenceJobResponse>, ApiError> {
    let job = Job::new(INFERENCE_JOB_NAME);
    let job_id = job.id.clone();
    let entry_point = state.inference.create_job(job).await?;

    state.schedule_inference_expiry(job_id.clone());
    info!(job_id = %job_id, ttl_secs = state.inference_ttl.as_secs(), "Scheduled inference expiry");
    Ok(Json(CreateInferenceJobResponse { job_id, entry_point }))
}

async fn list_inference_jobs(State(state): State<AppState>) -> Json<JobListResponse> {
    Json(JobListResponse { jobs: state.inference.list_all_jobs() })
}

async fn get_inference_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = state.inference.get_job(&id)?;
    Ok(Json(JobResponse { job }))
}

async fn delete_inference_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.inference.delete_job(&id).await?;
    Ok(Json(MessageResponse { message: "job deleted".to_string() }))
}
