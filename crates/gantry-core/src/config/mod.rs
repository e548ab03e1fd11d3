//! Configuration for Gantry.
//!
//! Configuration is resolved in layers:
//! 1. Built-in defaults
//! 2. TOML file (explicit path, or `./gantry.toml` when present)
//! 3. Environment variables (`GANTRY_*`)

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::orchestrator::DeletePolicy;
use crate::store::HistoryRetention;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found.
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    /// Failed to read configuration file.
    #[error("Failed to read configuration file: {0}")]
    ReadError(String),

    /// Failed to parse configuration file.
    #[error("Failed to parse configuration file: {0}")]
    ParseError(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// HTTP server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The address to bind the HTTP server to.
    #[serde(default = "default_address")]
    pub address: SocketAddr,
    /// Lifetime of an inference job before the server deletes it.
    #[serde(default = "default_inference_ttl_secs")]
    pub inference_ttl_secs: u64,
}

fn default_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

const fn default_inference_ttl_secs() -> u64 {
    30 * 60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { address: default_address(), inference_ttl_secs: default_inference_ttl_secs() }
    }
}

impl ServerConfig {
    /// Inference job lifetime as a [`Duration`].
    pub fn inference_ttl(&self) -> Duration {
        Duration::from_secs(self.inference_ttl_secs)
    }
}

/// Training orchestration settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Maximum number of concurrently active container jobs.
    #[serde(default = "default_container_capacity")]
    pub container_capacity: usize,
    /// Delay before each remote status poll.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Number of polls before the tracker gives up.
    #[serde(default = "default_poll_max_attempts")]
    pub poll_max_attempts: u32,
    /// Remote status label that marks a batch job as done.
    #[serde(default = "default_terminal_status")]
    pub terminal_status: String,
    /// Which job a delete request removes.
    #[serde(default)]
    pub delete_policy: DeletePolicy,
    /// Retention of finished jobs.
    #[serde(default)]
    pub history: HistoryRetention,
}

const fn default_container_capacity() -> usize {
    2
}

const fn default_poll_interval_ms() -> u64 {
    3_000
}

const fn default_poll_max_attempts() -> u32 {
    10
}

fn default_terminal_status() -> String {
    "Inactive".to_string()
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            container_capacity: default_container_capacity(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_max_attempts: default_poll_max_attempts(),
            terminal_status: default_terminal_status(),
            delete_policy: DeletePolicy::default(),
            history: HistoryRetention::default(),
        }
    }
}

impl TrainingConfig {
    /// Delay before each remote status poll.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Inference orchestration settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Pause between provisioning and endpoint association.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

const fn default_settle_delay_ms() -> u64 {
    500
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self { settle_delay_ms: default_settle_delay_ms() }
    }
}

impl InferenceConfig {
    /// Pause between provisioning and endpoint association.
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Which backend implementations the server wires in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Docker CLI and the remote cloud API.
    #[default]
    Live,
    /// In-process mock backends.
    Mock,
}

/// Backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend implementations to use.
    #[serde(default)]
    pub kind: BackendKind,
    /// Docker binary used by the container backend.
    #[serde(default = "default_docker_binary")]
    pub docker_binary: String,
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self { kind: BackendKind::default(), docker_binary: default_docker_binary() }
    }
}

/// Remote cloud API settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwccConfig {
    /// API gateway base URL, without the version segment.
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// API key sent with every request.
    #[serde(default)]
    pub api_key: String,
    /// Value of the `X-API-HOST` header and path segment.
    #[serde(default = "default_api_host")]
    pub api_host: String,
    /// Project that owns provisioned environments.
    #[serde(default = "default_project")]
    pub project: u64,
    /// Solution template used for provisioned environments.
    #[serde(default = "default_solution")]
    pub solution: u64,
    /// Name given to provisioned environments.
    #[serde(default = "default_site_name")]
    pub site_name: String,
    /// Hardware flavor of provisioned environments.
    #[serde(default = "default_flavor")]
    pub flavor: String,
    /// Image of provisioned environments.
    #[serde(default = "default_site_image")]
    pub image: String,
    /// Replica count of provisioned environments.
    #[serde(default = "default_replica")]
    pub replica: u32,
    /// Optional `gpfs01` mount path.
    #[serde(default)]
    pub gpfs01_mount_path: Option<String>,
    /// Optional `gpfs02` mount path.
    #[serde(default)]
    pub gpfs02_mount_path: Option<String>,
    /// Container port exposed when associating a public IP.
    #[serde(default = "default_target_port")]
    pub target_port: u16,
    /// Index of the service port that maps to the inference server.
    #[serde(default = "default_endpoint_port_index")]
    pub endpoint_port_index: usize,
    /// Per-request timeout.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_api_base() -> String {
    "https://apigateway.twcc.ai/api".to_string()
}

fn default_api_host() -> String {
    "k8s-D-twcc".to_string()
}

const fn default_project() -> u64 {
    65_662
}

const fn default_solution() -> u64 {
    4
}

fn default_site_name() -> String {
    "inference-service".to_string()
}

fn default_flavor() -> String {
    "1 GPU + 04 cores + 090GB memory".to_string()
}

fn default_site_image() -> String {
    "tensorflow-23.08-tf2-py3:latest".to_string()
}

const fn default_replica() -> u32 {
    1
}

const fn default_target_port() -> u16 {
    5000
}

const fn default_endpoint_port_index() -> usize {
    2
}

const fn default_request_timeout_secs() -> u64 {
    5
}

impl Default for TwccConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key: String::new(),
            api_host: default_api_host(),
            project: default_project(),
            solution: default_solution(),
            site_name: default_site_name(),
            flavor: default_flavor(),
            image: default_site_image(),
            replica: default_replica(),
            gpfs01_mount_path: None,
            gpfs02_mount_path: None,
            target_port: default_target_port(),
            endpoint_port_index: default_endpoint_port_index(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl TwccConfig {
    /// Per-request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Training orchestration.
    #[serde(default)]
    pub training: TrainingConfig,
    /// Inference orchestration.
    #[serde(default)]
    pub inference: InferenceConfig,
    /// Backend selection.
    #[serde(default)]
    pub backend: BackendConfig,
    /// Remote cloud API.
    #[serde(default)]
    pub twcc: TwccConfig,
}

impl Config {
    /// Default local configuration file path.
    pub fn default_local_path() -> PathBuf {
        PathBuf::from("gantry.toml")
    }

    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;

        toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))
    }

    /// Resolve configuration from defaults, file and process environment.
    ///
    /// An explicit `path` must exist; otherwise `./gantry.toml` is used when
    /// present.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => {
                let local = Self::default_local_path();
                if local.exists() { Self::load_from_file(&local)? } else { Self::default() }
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `GANTRY_*` overrides resolved through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("GANTRY_TWCC_API_KEY") {
            self.twcc.api_key = key;
        }
        if let Some(address) = lookup("GANTRY_SERVER_ADDRESS") {
            self.server.address = address.parse().map_err(|e| {
                ConfigError::InvalidValue(format!("GANTRY_SERVER_ADDRESS={address}: {e}"))
            })?;
        }
        if let Some(kind) = lookup("GANTRY_BACKEND") {
            self.backend.kind = match kind.to_ascii_lowercase().as_str() {
                "live" => BackendKind::Live,
                "mock" => BackendKind::Mock,
                other => {
                    return Err(ConfigError::InvalidValue(format!("GANTRY_BACKEND={other}")));
                }
            };
        }
        Ok(())
    }

    /// Reject values the orchestrators cannot work with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.training.container_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "training.container_capacity must be at least 1".to_string(),
            ));
        }
        if self.training.poll_max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "training.poll_max_attempts must be at least 1".to_string(),
            ));
        }
        if self.training.history == HistoryRetention::Bounded(0) {
            return Err(ConfigError::InvalidValue(
                "training.history bound must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
