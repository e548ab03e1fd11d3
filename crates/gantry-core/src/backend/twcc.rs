//! Remote cloud backend speaking the TWCC API gateway.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::{BackendError, BackendResult, RemoteBatchBackend, RemoteEnvironmentBackend};
use crate::config::TwccConfig;

/// HTTP client for batch jobs and service environments on TWCC.
#[derive(Debug, Clone)]
pub struct TwccClient {
    http: Client,
    config: TwccConfig,
}

#[derive(Debug, Deserialize)]
struct JobStatusResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
struct CreateSiteResponse {
    id: u64,
}

#[derive(Debug, Default, Deserialize)]
struct SiteContainerResponse {
    #[serde(rename = "Service", default)]
    services: Vec<SiteService>,
    #[serde(rename = "Pod", default)]
    pods: Vec<SitePod>,
}

#[derive(Debug, Deserialize)]
struct SiteService {
    #[serde(default)]
    public_ip: Vec<String>,
    #[serde(default)]
    ports: Vec<SitePort>,
}

#[derive(Debug, Deserialize)]
struct SitePort {
    port: u16,
}

#[derive(Debug, Deserialize)]
struct SitePod {
    name: String,
}

impl SiteContainerResponse {
    /// Public `ip:port` of the first service, using the port at `port_index`.
    fn entry_point(&self, port_index: usize) -> BackendResult<String> {
        let service = self
            .services
            .first()
            .ok_or_else(|| BackendError::Protocol("site has no service".to_string()))?;
        let ip = service
            .public_ip
            .first()
            .ok_or_else(|| BackendError::Protocol("site service has no public ip".to_string()))?;
        let port = service.ports.get(port_index).ok_or_else(|| {
            BackendError::Protocol(format!("site service has no port at index {port_index}"))
        })?;
        Ok(format!("{}:{}", ip, port.port))
    }

    fn pod_name(&self) -> BackendResult<&str> {
        self.pods
            .first()
            .map(|pod| pod.name.as_str())
            .ok_or_else(|| BackendError::Protocol("site has no pod".to_string()))
    }
}

impl TwccClient {
    /// Builds a client from configuration.
    pub fn new(config: TwccConfig) -> BackendResult<Self> {
        let http = Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self { http, config })
    }

    fn url(&self, version: &str, path: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.config.api_base.trim_end_matches('/'),
            version,
            self.config.api_host,
            path
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        debug!(%method, url, "TWCC request");
        self.http
            .request(method, url)
            .header("user-agent", "TWCC-CLI")
            .header("x-api-host", &self.config.api_host)
            .header("x-api-key", &self.config.api_key)
    }

    /// Fails unless the response carries `expected`.
    async fn expect_status(response: Response, expected: StatusCode) -> BackendResult<String> {
        let status = response.status();
        let body = response.text().await?;
        if status != expected {
            return Err(BackendError::Status { status: status.as_u16(), body });
        }
        Ok(body)
    }

    async fn site_container(&self, env_id: &str) -> BackendResult<SiteContainerResponse> {
        let url = self.url("v3", &format!("sites/{env_id}/container/"));
        let response = self.request(Method::GET, &url).send().await?;
        let body = Self::expect_status(response, StatusCode::OK).await?;
        if body.is_empty() {
            return Err(BackendError::Protocol("empty site container response".to_string()));
        }
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl RemoteBatchBackend for TwccClient {
    async fn submit(&self, remote_job_id: &str) -> BackendResult<()> {
        let url = self.url("v3", &format!("jobs/{remote_job_id}/submit/"));
        let response = self.request(Method::POST, &url).send().await?;
        Self::expect_status(response, StatusCode::CREATED).await?;
        info!(remote_job_id, "Remote job submitted");
        Ok(())
    }

    async fn poll_status(&self, remote_job_id: &str) -> BackendResult<String> {
        let url = self.url("v3", &format!("jobs/{remote_job_id}/"));
        let response = self.request(Method::GET, &url).send().await?;
        let body = Self::expect_status(response, StatusCode::OK).await?;
        let job: JobStatusResponse = serde_json::from_str(&body)?;
        Ok(job.status)
    }
}

#[async_trait]
impl RemoteEnvironmentBackend for TwccClient {
    async fn provision(&self) -> BackendResult<String> {
        let url = self.url("v2", "sites/");
        let body = json!({
            "name": self.config.site_name,
            "desc": format!("{} created GPU container", self.config.site_name),
            "project": self.config.project,
            "solution": self.config.solution,
        });

        let mut request = self
            .request(Method::POST, &url)
            .header("x-extra-property-flavor", &self.config.flavor)
            .header("x-extra-property-image", &self.config.image)
            .header("x-extra-property-replica", self.config.replica.to_string());
        if let Some(ref path) = self.config.gpfs01_mount_path {
            request = request.header("x-extra-property-gpfs01-mount-path", path);
        }
        if let Some(ref path) = self.config.gpfs02_mount_path {
            request = request.header("x-extra-property-gpfs02-mount-path", path);
        }

        let response = request.json(&body).send().await?;
        let body = Self::expect_status(response, StatusCode::CREATED).await?;
        let site: CreateSiteResponse = serde_json::from_str(&body)?;
        info!(env_id = site.id, "Environment provisioned");
        Ok(site.id.to_string())
    }

    async fn associate_endpoint(&self, env_id: &str) -> BackendResult<()> {
        let site = self.site_container(env_id).await?;
        let pod_name = site.pod_name()?;

        let url = self.url("v3", &format!("sites/{env_id}/container/action/"));
        let body = json!({
            "pod_name": pod_name,
            "action": "associateIP",
            "ports": [{ "targetPort": self.config.target_port }],
        });
        let response = self.request(Method::PUT, &url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            return Err(BackendError::Status { status: status.as_u16(), body });
        }
        info!(env_id, pod_name, "Public endpoint associated");
        Ok(())
    }

    async fn resolve_endpoint(&self, env_id: &str) -> BackendResult<String> {
        let site = self.site_container(env_id).await?;
        site.entry_point(self.config.endpoint_port_index)
    }

    async fn teardown(&self, env_id: &str) -> BackendResult<()> {
        let url = self.url("v3", &format!("sites/{env_id}/"));
        let response = self.request(Method::DELETE, &url).send().await?;
        Self::expect_status(response, StatusCode::NO_CONTENT).await?;
        info!(env_id, "Environment torn down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> TwccClient {
        TwccClient::new(TwccConfig::default()).unwrap()
    }

    #[test]
    fn test_url_layout() {
        let client = client();
        assert_eq!(
            client.url("v3", "jobs/237139/submit/"),
            "https://apigateway.twcc.ai/api/v3/k8s-D-twcc/jobs/237139/submit/"
        );

        let config = TwccConfig {
            api_base: "http://localhost:9000/api/".to_string(),
            ..TwccConfig::default()
        };
        let client = TwccClient::new(config).unwrap();
        assert_eq!(client.url("v2", "sites/"), "http://localhost:9000/api/v2/k8s-D-twcc/sites/");
    }

    #[test]
    fn test_entry_point_uses_configured_port_index() {
        let body = r#"{
            "Service": [{
                "name": "svc",
                "net_type": "NodePort",
                "public_ip": ["203.0.113.5"],
                "ports": [
                    {"name": "ssh", "port": 22},
                    {"name": "jupyter", "port": 8888},
                    {"name": "infer", "port": 5000}
                ]
            }],
            "Pod": [{"name": "inference-pod-0"}]
        }"#;
        let site: SiteContainerResponse = serde_json::from_str(body).unwrap();
        assert_eq!(site.entry_point(2).unwrap(), "203.0.113.5:5000");
        assert_eq!(site.entry_point(0).unwrap(), "203.0.113.5:22");
        assert_eq!(site.pod_name().unwrap(), "inference-pod-0");
    }

    #[test]
    fn test_entry_point_missing_parts() {
        let empty: SiteContainerResponse = serde_json::from_str("{}").unwrap();
        assert!(matches!(empty.entry_point(2), Err(BackendError::Protocol(_))));
        assert!(matches!(empty.pod_name(), Err(BackendError::Protocol(_))));

        let no_ip: SiteContainerResponse =
            serde_json::from_str(r#"{"Service": [{"public_ip": [], "ports": []}]}"#).unwrap();
        assert!(no_ip.entry_point(0).is_err());

        let few_ports: SiteContainerResponse = serde_json::from_str(
            r#"{"Service": [{"public_ip": ["10.0.0.1"], "ports": [{"port": 22}]}]}"#,
        )
        .unwrap();
        assert!(few_ports.entry_point(2).is_err());
    }

    #[test]
    fn test_job_status_response() {
        let body = r#"{"id": 1, "type": "job", "project": 2, "status": "Inactive", "name": "x"}"#;
        let job: JobStatusResponse = serde_json::from_str(body).unwrap();
        assert_eq!(job.status, "Inactive");
    }

    #[tokio::test]
    async fn test_unreachable_gateway_is_http_error() {
        let config = TwccConfig {
            api_base: "http://127.0.0.1:9/api".to_string(),
            request_timeout_secs: 1,
            ..TwccConfig::default()
        };
        let client = TwccClient::new(config).unwrap();
        let result = client.poll_status("1").await;
        assert!(matches!(result, Err(BackendError::Http(_))));
    }
}
