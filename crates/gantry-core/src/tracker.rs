//! Background completion trackers for training jobs.
//!
//! A tracker is a tokio task that observes one job until it completes and
//! then moves the job into history. Container jobs are tracked through the
//! backend's exit callback; remote jobs are polled on a fixed interval with a
//! bounded number of attempts.
//!
//! Trackers never return errors to a caller. Everything they observe is
//! logged and, when a channel is attached, forwarded as a [`TrackerEvent`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::{
    BackendError, ContainerBackend, ContainerHandle, ExitCallback, RemoteBatchBackend,
};
use crate::error::JobError;
use crate::models::Placement;
use crate::store::TrainingJobStore;

/// Something a tracker observed.
#[derive(Debug)]
pub enum TrackerEvent {
    /// A remote status poll completed. `status` is `None` when the poll failed.
    Polled {
        /// Tracked job.
        job_id: String,
        /// 1-based poll attempt.
        attempt: u32,
        /// Reported status label.
        status: Option<String>,
    },
    /// The job was moved into history.
    Finalized {
        /// Tracked job.
        job_id: String,
        /// Backend the job ran on.
        placement: Placement,
    },
    /// The poll bound was reached without a terminal status. The job stays active.
    PollExhausted {
        /// Tracked job.
        job_id: String,
        /// Number of polls made.
        attempts: u32,
    },
    /// Moving the job into history failed, typically because it was deleted.
    FinalizeFailed {
        /// Tracked job.
        job_id: String,
        /// Store error.
        error: JobError,
    },
    /// The container backend failed to start or await the container.
    ContainerFailed {
        /// Tracked job.
        job_id: String,
        /// Backend error.
        error: BackendError,
    },
    /// The tracker was cancelled before the job completed.
    Cancelled {
        /// Tracked job.
        job_id: String,
    },
}

impl TrackerEvent {
    /// Id of the job the event is about.
    pub fn job_id(&self) -> &str {
        match self {
            Self::Polled { job_id, .. }
            | Self::Finalized { job_id, .. }
            | Self::PollExhausted { job_id, .. }
            | Self::FinalizeFailed { job_id, .. }
            | Self::ContainerFailed { job_id, .. }
            | Self::Cancelled { job_id } => job_id,
        }
    }
}

/// How a tracker task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerOutcome {
    /// The job reached history.
    Finalized,
    /// The job completed but could not be moved into history.
    FinalizeFailed,
    /// The poll bound was reached; the job is still active.
    Exhausted,
    /// The tracker was cancelled.
    Cancelled,
}

/// Logs tracker events and forwards them to an optional channel.
#[derive(Debug, Clone, Default)]
pub struct TrackerReporter {
    events: Option<mpsc::UnboundedSender<TrackerEvent>>,
}

impl TrackerReporter {
    /// Reporter that only logs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reporter that also forwards every event to `events`.
    pub fn with_channel(events: mpsc::UnboundedSender<TrackerEvent>) -> Self {
        Self { events: Some(events) }
    }

    /// Logs `event` and forwards it. A closed channel is ignored.
    pub fn report(&self, event: TrackerEvent) {
        match &event {
            TrackerEvent::Polled { job_id, attempt, status } => {
                debug!(job_id = %job_id, attempt, status = ?status, "Polled remote job");
            }
            TrackerEvent::Finalized { job_id, placement } => {
                info!(job_id = %job_id, %placement, "Job finished");
            }
            TrackerEvent::PollExhausted { job_id, attempts } => {
                warn!(job_id = %job_id, attempts, "Gave up polling remote job");
            }
            TrackerEvent::FinalizeFailed { job_id, error } => {
                error!(job_id = %job_id, error = %error, "Failed to move job into history");
            }
            TrackerEvent::ContainerFailed { job_id, error } => {
                error!(job_id = %job_id, error = %error, "Container run failed");
            }
            TrackerEvent::Cancelled { job_id } => {
                info!(job_id = %job_id, "Tracker cancelled");
            }
        }

        if let Some(ref events) = self.events {
            if let Err(mpsc::error::SendError(event)) = events.send(event) {
                debug!(job_id = event.job_id(), "Tracker event channel closed");
            }
        }
    }
}

/// Handle of a running tracker task.
#[derive(Debug)]
pub struct TrackerHandle {
    token: CancellationToken,
    task: JoinHandle<TrackerOutcome>,
}

impl TrackerHandle {
    /// Spawns `tracker` with a fresh cancellation token derived from `parent`.
    pub(crate) fn spawn<F, Fut>(parent: &CancellationToken, tracker: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: std::future::Future<Output = TrackerOutcome> + Send + 'static,
    {
        let token = parent.child_token();
        let task = tokio::spawn(tracker(token.clone()));
        Self { token, task }
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the task has ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the task. A panicked or aborted task counts as cancelled.
    pub async fn join(self) -> TrackerOutcome {
        self.task.await.unwrap_or(TrackerOutcome::Cancelled)
    }
}

/// Tracker handles keyed by job id.
#[derive(Debug, Default)]
pub struct TrackerSet {
    root: CancellationToken,
    handles: Mutex<HashMap<String, TrackerHandle>>,
}

impl TrackerSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    fn handles(&self) -> MutexGuard<'_, HashMap<String, TrackerHandle>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawns a tracker for `job_id` and keeps its handle.
    ///
    /// Handles of trackers that already ended are dropped on each insert.
    pub(crate) fn spawn<F, Fut>(&self, job_id: &str, tracker: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: std::future::Future<Output = TrackerOutcome> + Send + 'static,
    {
        let handle = TrackerHandle::spawn(&self.root, tracker);
        let mut handles = self.handles();
        handles.retain(|_, h| !h.is_finished());
        handles.insert(job_id.to_string(), handle);
    }

    /// Cancels the tracker of `job_id`. Returns `false` if none is held.
    pub fn cancel(&self, job_id: &str) -> bool {
        self.handles().get(job_id).map(TrackerHandle::cancel).is_some()
    }

    /// Removes and returns the handle of `job_id`.
    pub fn take(&self, job_id: &str) -> Option<TrackerHandle> {
        self.handles().remove(job_id)
    }

    /// Number of handles held, finished or not.
    pub fn len(&self) -> usize {
        self.handles().len()
    }

    /// Whether no handle is held.
    pub fn is_empty(&self) -> bool {
        self.handles().is_empty()
    }

    /// Cancels every tracker and waits for all of them to end.
    pub async fn shutdown(&self) {
        self.root.cancel();
        let handles: Vec<TrackerHandle> = self.handles().drain().map(|(_, h)| h).collect();
        for handle in handles {
            handle.join().await;
        }
    }
}

/// Polling parameters of the remote tracker.
#[derive(Debug, Clone)]
pub struct PollSettings {
    /// Delay before each poll.
    pub interval: Duration,
    /// Maximum number of polls.
    pub max_attempts: u32,
    /// Status label that marks completion.
    pub terminal_status: String,
}

fn finalize(
    store: &TrainingJobStore,
    reporter: &TrackerReporter,
    job_id: &str,
    placement: Placement,
) -> TrackerOutcome {
    let removed = match placement {
        Placement::Container => store.remove_container_job(job_id),
        Placement::Remote => store.remove_remote_job(job_id),
    };
    match removed {
        Ok(_) => {
            reporter.report(TrackerEvent::Finalized { job_id: job_id.to_string(), placement });
            TrackerOutcome::Finalized
        }
        Err(error) => {
            reporter.report(TrackerEvent::FinalizeFailed { job_id: job_id.to_string(), error });
            TrackerOutcome::FinalizeFailed
        }
    }
}

/// Starts the container and moves the job into history once it exits.
///
/// If the backend fails to run the container the failure is reported and the
/// job is still moved into history, since it is no longer running.
pub(crate) async fn watch_container(
    store: Arc<TrainingJobStore>,
    backend: Arc<dyn ContainerBackend>,
    job_id: String,
    container: ContainerHandle,
    reporter: TrackerReporter,
    token: CancellationToken,
) -> TrackerOutcome {
    let (exited_tx, exited_rx) = oneshot::channel::<TrackerOutcome>();
    let on_exit: ExitCallback = {
        let store = Arc::clone(&store);
        let reporter = reporter.clone();
        let job_id = job_id.clone();
        Box::new(move || {
            let outcome = finalize(&store, &reporter, &job_id, Placement::Container);
            let _ = exited_tx.send(outcome);
        })
    };

    let run = tokio::select! {
        () = token.cancelled() => {
            reporter.report(TrackerEvent::Cancelled { job_id });
            return TrackerOutcome::Cancelled;
        }
        run = backend.start_and_await(&container, on_exit) => run,
    };

    match run {
        Ok(()) => match exited_rx.await {
            Ok(outcome) => outcome,
            Err(_) => {
                let error = BackendError::Protocol(format!(
                    "container {container} finished without signalling exit"
                ));
                reporter.report(TrackerEvent::ContainerFailed { job_id: job_id.clone(), error });
                finalize(&store, &reporter, &job_id, Placement::Container)
            }
        },
        Err(error) => {
            reporter.report(TrackerEvent::ContainerFailed { job_id: job_id.clone(), error });
            finalize(&store, &reporter, &job_id, Placement::Container)
        }
    }
}

/// Polls the remote job until it reports the terminal status or the attempt
/// bound is reached.
///
/// Poll errors count as "not yet terminal".
pub(crate) async fn poll_remote(
    store: Arc<TrainingJobStore>,
    backend: Arc<dyn RemoteBatchBackend>,
    job_id: String,
    remote_job_id: String,
    settings: PollSettings,
    reporter: TrackerReporter,
    token: CancellationToken,
) -> TrackerOutcome {
    for attempt in 1..=settings.max_attempts {
        let polled = tokio::select! {
            () = token.cancelled() => {
                reporter.report(TrackerEvent::Cancelled { job_id });
                return TrackerOutcome::Cancelled;
            }
            polled = async {
                tokio::time::sleep(settings.interval).await;
                backend.poll_status(&remote_job_id).await
            } => polled,
        };

        let status = match polled {
            Ok(status) => Some(status),
            Err(error) => {
                debug!(job_id = %job_id, %remote_job_id, attempt, error = %error, "Poll failed");
                None
            }
        };
        let terminal = status.as_deref() == Some(settings.terminal_status.as_str());
        reporter.report(TrackerEvent::Polled { job_id: job_id.clone(), attempt, status });

        if terminal {
            return finalize(&store, &reporter, &job_id, Placement::Remote);
        }
    }

    reporter.report(TrackerEvent::PollExhausted { job_id, attempts: settings.max_attempts });
    TrackerOutcome::Exhausted
}
