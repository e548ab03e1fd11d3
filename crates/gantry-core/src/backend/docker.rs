//! Container backend driving the docker CLI.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::{BackendError, BackendResult, ContainerBackend, ContainerHandle, ExitCallback};

/// Docker-based container backend.
#[derive(Debug, Clone)]
pub struct DockerBackend {
    /// Path or name of the docker binary.
    binary: String,
}

impl Default for DockerBackend {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerBackend {
    /// Creates a backend that invokes `binary` for every docker call.
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    /// Runs one docker subcommand and returns its trimmed stdout.
    async fn run(&self, args: &[&str]) -> BackendResult<String> {
        debug!(binary = %self.binary, ?args, "Running docker command");

        let output = Command::new(&self.binary).args(args).kill_on_drop(true).output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BackendError::CommandFailed(format!(
                "docker {}: {}",
                args.first().copied().unwrap_or_default(),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Extracts the container id from `docker create` output.
///
/// Pull progress may precede the id when the image is fetched implicitly,
/// so the last non-empty line wins.
fn parse_container_id(stdout: &str) -> BackendResult<ContainerHandle> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .map(ContainerHandle::new)
        .ok_or_else(|| BackendError::Protocol("docker create printed no container id".to_string()))
}

/// Parses the exit code printed by `docker wait`.
fn parse_exit_code(stdout: &str) -> BackendResult<i64> {
    stdout
        .trim()
        .parse()
        .map_err(|_| BackendError::Protocol(format!("unexpected docker wait output: {stdout:?}")))
}

#[async_trait]
impl ContainerBackend for DockerBackend {
    async fn create(&self, image_ref: &str) -> BackendResult<ContainerHandle> {
        self.run(&["pull", image_ref]).await?;
        let stdout = self.run(&["create", image_ref]).await?;
        let handle = parse_container_id(&stdout)?;
        info!(image = %image_ref, container = %handle, "Container created");
        Ok(handle)
    }

    async fn start_and_await(
        &self,
        container: &ContainerHandle,
        on_exit: ExitCallback,
    ) -> BackendResult<()> {
        self.run(&["start", container.as_str()]).await?;
        let stdout = self.run(&["wait", container.as_str()]).await?;
        let exit_code = parse_exit_code(&stdout)?;
        info!(container = %container, exit_code, "Container exited");
        on_exit();
        Ok(())
    }
}
