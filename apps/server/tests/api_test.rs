//! Router tests against in-process mock backends.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use gantry_core::backend::mock::RemoteCall;
use gantry_core::backend::{MockContainerBackend, MockRemoteBackend};
use gantry_core::{Config, JobStatus, Placement};
use gantry_server::api::{
    CreateInferenceJobResponse, CreateTrainingJobResponse, ErrorBody, JobListResponse, JobResponse,
};
use gantry_server::{AppState, router};
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

struct TestApp {
    state: AppState,
    remote: Arc<MockRemoteBackend>,
}

impl TestApp {
    fn new() -> Self {
        let mut config = Config::default();
        config.inference.settle_delay_ms = 0;
        config.training.poll_interval_ms = 5;

        let container = Arc::new(MockContainerBackend::new());
        let remote = Arc::new(MockRemoteBackend::new("203.0.113.5:5000"));
        let state = AppState::new(
            &config,
            container,
            remote.clone(),
            remote.clone(),
            CancellationToken::new(),
        );
        Self { state, remote }
    }

    fn router(&self) -> Router {
        router(self.state.clone())
    }

    async fn send(
        &self,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, Vec<u8>) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    async fn json<T: DeserializeOwned>(
        &self,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, T) {
        let (status, bytes) = self.send(method, uri, body).await;
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn create_training(&self, twcc_job_id: &str) -> CreateTrainingJobResponse {
        let body = json!({ "dockerImageName": "trainer:v1", "twccJobId": twcc_job_id });
        let (status, created) = self.json("POST", "/v1/training-jobs", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        created
    }
}

#[tokio::test]
async fn test_healthz() {
    let app = TestApp::new();
    let (status, _) = app.send("GET", "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_training_placement_over_http() {
    let app = TestApp::new();

    let first = app.create_training("237139").await;
    let second = app.create_training("237140").await;
    let third = app.create_training("237141").await;
    assert_eq!(first.placement, Placement::Container);
    assert_eq!(second.placement, Placement::Container);
    assert_eq!(third.placement, Placement::Remote);

    let (status, got): (_, JobResponse) =
        app.json("GET", &format!("/v1/training-jobs/{}", third.job_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(got.job.status, JobStatus::RunningOnTwcc);
    assert_eq!(got.job.name, "trainer:v1-237141");

    let (_, listed): (_, JobListResponse) = app.json("GET", "/v1/training-jobs", None).await;
    assert_eq!(listed.jobs.len(), 3);
    assert_eq!(app.remote.submitted(), vec!["237141".to_string()]);
    app.state.training.shutdown().await;
}

#[tokio::test]
async fn test_training_delete_and_not_found() {
    let app = TestApp::new();
    let created = app.create_training("1").await;
    let uri = format!("/v1/training-jobs/{}", created.job_id);

    let (status, deleted): (_, JobResponse) = app.json("DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted.job.status, JobStatus::Finished);

    let (status, error): (_, ErrorBody) = app.json("DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(error.error.contains(&created.job_id));

    let (status, _) = app.send("GET", "/v1/training-jobs/unknown", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    app.state.training.shutdown().await;
}

#[tokio::test]
async fn test_training_rejects_malformed_body() {
    let app = TestApp::new();
    let (status, _) =
        app.send("POST", "/v1/training-jobs", Some(json!({ "dockerImageName": "x" }))).await;
    assert!(status.is_client_error());
    assert!(app.state.training.list_all_jobs().is_empty());
}

#[tokio::test]
async fn test_backend_failure_maps_to_bad_gateway() {
    let app = TestApp::new();
    app.remote.fail(RemoteCall::Provision);

    let (status, error): (_, ErrorBody) = app.json("POST", "/v1/inference-jobs", None).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(error.error.contains("provision environment"));
}

#[tokio::test]
async fn test_inference_lifecycle_over_http() {
    let app = TestApp::new();

    let (status, created): (_, CreateInferenceJobResponse) =
        app.json("POST", "/v1/inference-jobs", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created.entry_point, "203.0.113.5:5000");

    let uri = format!("/v1/inference-jobs/{}", created.job_id);
    let (_, got): (_, JobResponse) = app.json("GET", &uri, None).await;
    assert_eq!(got.job.status, JobStatus::InferenceRunningOnTwcc);

    let (status, _) = app.send("DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.send("DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, listed): (_, JobListResponse) = app.json("GET", "/v1/inference-jobs", None).await;
    assert!(listed.jobs.is_empty());
}

#[tokio::test]
async fn test_inference_job_expires_after_ttl() {
    let mut app = TestApp::new();
    app.state.inference_ttl = Duration::from_millis(20);

    let (_, created): (_, CreateInferenceJobResponse) =
        app.json("POST", "/v1/inference-jobs", None).await;

    let expired = async {
        while app.state.inference.get_job(&created.job_id).is_ok() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), expired).await.unwrap();
    assert_eq!(app.remote.torn_down().len(), 1);
}

#[tokio::test]
async fn test_shutdown_cancels_pending_expiry() {
    let mut app = TestApp::new();
    app.state.inference_ttl = Duration::from_millis(50);

    let (_, created): (_, CreateInferenceJobResponse) =
        app.json("POST", "/v1/inference-jobs", None).await;
    app.state.shutdown.cancel();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(app.state.inference.get_job(&created.job_id).is_ok());
    assert!(app.remote.torn_down().is_empty());
}

#[tokio::test]
async fn test_state_from_mock_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[backend]\nkind = \"mock\"\n\n[training]\ncontainer_capacity = 1").unwrap();

    let config = Config::load(Some(file.path())).unwrap();
    let state = AppState::from_config(&config, CancellationToken::new()).unwrap();
    assert_eq!(state.training.config().container_capacity, 1);
    assert_eq!(state.inference_ttl, Duration::from_secs(1800));
}
