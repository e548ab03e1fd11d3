//! In-process backends for tests and local development.
//!
//! [`MockContainerBackend`] simulates container runs either for a fixed
//! duration or until released by the caller. [`MockRemoteBackend`] implements
//! both remote capability groups with scripted poll results and injectable
//! failures.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore};

use super::{
    BackendError, BackendResult, ContainerBackend, ContainerHandle, ExitCallback,
    RemoteBatchBackend, RemoteEnvironmentBackend,
};

/// How a mock container decides when to exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitMode {
    /// Exit after running for the given duration.
    After(Duration),
    /// Run until [`MockContainerBackend::exit`] is called.
    Manual,
}

/// Snapshot of a container created by [`MockContainerBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockContainer {
    /// Handle returned by `create`.
    pub handle: ContainerHandle,
    /// Image the container was created from.
    pub image_ref: String,
    /// Whether `start_and_await` was called.
    pub started: bool,
    /// Whether the container exited normally.
    pub exited: bool,
}

#[derive(Debug, Default)]
struct ContainerState {
    containers: Vec<MockContainer>,
    releases: HashMap<ContainerHandle, Arc<Notify>>,
    fail_create: bool,
    fail_start: bool,
}

/// Container backend that never leaves the process.
#[derive(Debug)]
pub struct MockContainerBackend {
    state: Mutex<ContainerState>,
    exit_mode: ExitMode,
    next_id: AtomicU64,
}

impl Default for MockContainerBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockContainerBackend {
    /// Containers run until released with [`exit`](Self::exit).
    #[must_use]
    pub fn new() -> Self {
        Self::with_exit_mode(ExitMode::Manual)
    }

    /// Containers exit on their own after `run_time`.
    #[must_use]
    pub fn with_run_time(run_time: Duration) -> Self {
        Self::with_exit_mode(ExitMode::After(run_time))
    }

    /// Creates a backend with an explicit exit mode.
    #[must_use]
    pub fn with_exit_mode(exit_mode: ExitMode) -> Self {
        Self { state: Mutex::default(), exit_mode, next_id: AtomicU64::new(1) }
    }

    fn state(&self) -> MutexGuard<'_, ContainerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes subsequent `create` calls fail.
    pub fn set_fail_create(&self, fail: bool) {
        self.state().fail_create = fail;
    }

    /// Makes subsequent `start_and_await` calls fail.
    pub fn set_fail_start(&self, fail: bool) {
        self.state().fail_start = fail;
    }

    /// All containers created so far, in creation order.
    pub fn containers(&self) -> Vec<MockContainer> {
        self.state().containers.clone()
    }

    /// Releases a manually held container. Returns `false` for unknown handles.
    ///
    /// A release issued before the container starts is remembered.
    pub fn exit(&self, handle: &ContainerHandle) -> bool {
        let release = self.state().releases.get(handle).cloned();
        release.map(|notify| notify.notify_one()).is_some()
    }

    /// Releases the first not-yet-exited container created from `image_ref`.
    pub fn exit_image(&self, image_ref: &str) -> bool {
        let handle = self
            .state()
            .containers
            .iter()
            .find(|c| c.image_ref == image_ref && !c.exited)
            .map(|c| c.handle.clone());
        handle.is_some_and(|h| self.exit(&h))
    }

    fn update(&self, handle: &ContainerHandle, f: impl FnOnce(&mut MockContainer)) {
        if let Some(container) = self.state().containers.iter_mut().find(|c| &c.handle == handle) {
            f(container);
        }
    }
}

#[async_trait]
impl ContainerBackend for MockContainerBackend {
    async fn create(&self, image_ref: &str) -> BackendResult<ContainerHandle> {
        let mut state = self.state();
        if state.fail_create {
            return Err(BackendError::Unavailable(format!("cannot create {image_ref}")));
        }

        let handle = ContainerHandle::new(format!(
            "mock-{}",
            self.next_id.fetch_add(1, Ordering::SeqCst)
        ));
        state.containers.push(MockContainer {
            handle: handle.clone(),
            image_ref: image_ref.to_string(),
            started: false,
            exited: false,
        });
        state.releases.insert(handle.clone(), Arc::new(Notify::new()));
        Ok(handle)
    }

    async fn start_and_await(
        &self,
        container: &ContainerHandle,
        on_exit: ExitCallback,
    ) -> BackendResult<()> {
        let release = {
            let state = self.state();
            if state.fail_start {
                return Err(BackendError::Unavailable(format!("cannot start {container}")));
            }
            state
                .releases
                .get(container)
                .cloned()
                .ok_or_else(|| BackendError::Protocol(format!("unknown container {container}")))?
        };
        self.update(container, |c| c.started = true);

        match self.exit_mode {
            ExitMode::After(run_time) => tokio::time::sleep(run_time).await,
            ExitMode::Manual => release.notified().await,
        }

        self.update(container, |c| c.exited = true);
        on_exit();
        Ok(())
    }
}

/// Remote backend call, used to inject failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteCall {
    /// [`RemoteBatchBackend::submit`].
    Submit,
    /// [`RemoteBatchBackend::poll_status`].
    PollStatus,
    /// [`RemoteEnvironmentBackend::provision`].
    Provision,
    /// [`RemoteEnvironmentBackend::associate_endpoint`].
    AssociateEndpoint,
    /// [`RemoteEnvironmentBackend::resolve_endpoint`].
    ResolveEndpoint,
    /// [`RemoteEnvironmentBackend::teardown`].
    Teardown,
}

#[derive(Debug, Default)]
struct RemoteState {
    submitted: Vec<String>,
    scripts: HashMap<String, VecDeque<Option<String>>>,
    polls: HashMap<String, usize>,
    environments: Vec<String>,
    associated: HashSet<String>,
    torn_down: Vec<String>,
    failures: HashSet<RemoteCall>,
    next_env: u64,
}

/// Remote batch and environment backend that never leaves the process.
#[derive(Debug)]
pub struct MockRemoteBackend {
    state: Mutex<RemoteState>,
    endpoint: String,
    finish_after: Option<usize>,
    poll_gate: Mutex<Option<Arc<Semaphore>>>,
}

/// Status reported for unscripted jobs that are still running.
pub const ACTIVE_STATUS: &str = "Active";
/// Status reported for unscripted jobs that are done.
pub const INACTIVE_STATUS: &str = "Inactive";

impl Default for MockRemoteBackend {
    fn default() -> Self {
        Self::new("127.0.0.1:5000")
    }
}

impl MockRemoteBackend {
    /// Environments resolve to `endpoint`; unscripted jobs stay active.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            state: Mutex::default(),
            endpoint: endpoint.into(),
            finish_after: None,
            poll_gate: Mutex::new(None),
        }
    }

    /// Unscripted jobs report inactive from their `polls`-th poll on.
    #[must_use]
    pub fn finishing_after(mut self, polls: usize) -> Self {
        self.finish_after = Some(polls);
        self
    }

    fn state(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Scripts the statuses returned by successive polls of one job.
    pub fn script_statuses(&self, remote_job_id: &str, statuses: &[&str]) {
        self.script_poll_results(
            remote_job_id,
            statuses.iter().map(|s| Some(*s)).collect::<Vec<_>>(),
        );
    }

    /// Scripts successive poll results; `None` entries fail the poll.
    pub fn script_poll_results(&self, remote_job_id: &str, results: Vec<Option<&str>>) {
        self.state().scripts.insert(
            remote_job_id.to_string(),
            results.into_iter().map(|r| r.map(ToString::to_string)).collect(),
        );
    }

    /// Makes every call of `call` fail until cleared.
    pub fn fail(&self, call: RemoteCall) {
        self.state().failures.insert(call);
    }

    /// Clears an injected failure.
    pub fn clear_failure(&self, call: RemoteCall) {
        self.state().failures.remove(&call);
    }

    /// Each poll consumes one permit from `gate` before answering.
    pub fn set_poll_gate(&self, gate: Arc<Semaphore>) {
        *self.poll_gate.lock().unwrap_or_else(PoisonError::into_inner) = Some(gate);
    }

    /// Remote job ids submitted so far.
    pub fn submitted(&self) -> Vec<String> {
        self.state().submitted.clone()
    }

    /// Number of polls answered for a job.
    pub fn poll_count(&self, remote_job_id: &str) -> usize {
        self.state().polls.get(remote_job_id).copied().unwrap_or(0)
    }

    /// Environments provisioned and not yet torn down.
    pub fn environments(&self) -> Vec<String> {
        self.state().environments.clone()
    }

    /// Environments torn down so far.
    pub fn torn_down(&self) -> Vec<String> {
        self.state().torn_down.clone()
    }

    fn check(&self, call: RemoteCall) -> BackendResult<()> {
        if self.state().failures.contains(&call) {
            return Err(BackendError::Unavailable(format!("injected {call:?} failure")));
        }
        Ok(())
    }

    fn known_environment(state: &RemoteState, env_id: &str) -> BackendResult<()> {
        if state.environments.iter().any(|e| e == env_id) {
            Ok(())
        } else {
            Err(BackendError::Status { status: 404, body: format!("no site {env_id}") })
        }
    }
}

#[async_trait]
impl RemoteBatchBackend for MockRemoteBackend {
    async fn submit(&self, remote_job_id: &str) -> BackendResult<()> {
        self.check(RemoteCall::Submit)?;
        self.state().submitted.push(remote_job_id.to_string());
        Ok(())
    }

    async fn poll_status(&self, remote_job_id: &str) -> BackendResult<String> {
        let gate = self.poll_gate.lock().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(gate) = gate {
            gate.acquire()
                .await
                .map_err(|_| BackendError::Unavailable("poll gate closed".to_string()))?
                .forget();
        }

        let mut state = self.state();
        let polls = {
            let count = state.polls.entry(remote_job_id.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        if state.failures.contains(&RemoteCall::PollStatus) {
            return Err(BackendError::Unavailable("injected PollStatus failure".to_string()));
        }

        if let Some(script) = state.scripts.get_mut(remote_job_id) {
            if let Some(next) = script.pop_front() {
                return next.ok_or_else(|| {
                    BackendError::Unavailable(format!("scripted poll failure for {remote_job_id}"))
                });
            }
        }

        let done = self.finish_after.is_some_and(|after| polls >= after);
        Ok(if done { INACTIVE_STATUS } else { ACTIVE_STATUS }.to_string())
    }
}

#[async_trait]
impl RemoteEnvironmentBackend for MockRemoteBackend {
    async fn provision(&self) -> BackendResult<String> {
        self.check(RemoteCall::Provision)?;
        let mut state = self.state();
        state.next_env += 1;
        let env_id = format!("env-{}", state.next_env);
        state.environments.push(env_id.clone());
        Ok(env_id)
    }

    async fn associate_endpoint(&self, env_id: &str) -> BackendResult<()> {
        self.check(RemoteCall::AssociateEndpoint)?;
        let mut state = self.state();
        Self::known_environment(&state, env_id)?;
        state.associated.insert(env_id.to_string());
        Ok(())
    }

    async fn resolve_endpoint(&self, env_id: &str) -> BackendResult<String> {
        self.check(RemoteCall::ResolveEndpoint)?;
        let state = self.state();
        Self::known_environment(&state, env_id)?;
        if !state.associated.contains(env_id) {
            return Err(BackendError::Protocol(format!("{env_id} has no public endpoint")));
        }
        Ok(self.endpoint.clone())
    }

    async fn teardown(&self, env_id: &str) -> BackendResult<()> {
        self.check(RemoteCall::Teardown)?;
        let mut state = self.state();
        Self::known_environment(&state, env_id)?;
        state.environments.retain(|e| e != env_id);
        state.associated.remove(env_id);
        state.torn_down.push(env_id.to_string());
        Ok(())
    }
}
