//! Integration tests for training job placement, deletion and tracking.
//!
//! Covers:
//! - Placement against container capacity, sequential and concurrent
//! - Concurrent creates of one id
//! - History bookkeeping on delete
//! - Remote poll tracking through to history
//! - NotFound handling for unknown ids under every delete policy

use std::sync::Arc;
use std::time::Duration;

use gantry_core::backend::{MockContainerBackend, MockRemoteBackend};
use gantry_core::config::TrainingConfig;
use gantry_core::{
    DeletePolicy, ErrorKind, Job, JobStatus, Placement, TrackerEvent, TrackerOutcome,
    TrainingJobOrchestrator, TrainingJobStore,
};
use tokio::sync::{Semaphore, mpsc};

struct Harness {
    orchestrator: Arc<TrainingJobOrchestrator>,
    container: Arc<MockContainerBackend>,
    remote: Arc<MockRemoteBackend>,
    events: mpsc::UnboundedReceiver<TrackerEvent>,
}

fn harness(policy: DeletePolicy) -> Harness {
    let container = Arc::new(MockContainerBackend::new());
    let remote = Arc::new(MockRemoteBackend::default());
    let (tx, events) = mpsc::unbounded_channel();
    let config = TrainingConfig {
        poll_interval_ms: 5,
        delete_policy: policy,
        ..TrainingConfig::default()
    };
    let orchestrator = TrainingJobOrchestrator::new(
        Arc::new(TrainingJobStore::new()),
        container.clone(),
        remote.clone(),
        config,
    )
    .with_events(tx);
    Harness { orchestrator: Arc::new(orchestrator), container, remote, events }
}

async fn create(orchestrator: &TrainingJobOrchestrator, id: &str) -> Placement {
    orchestrator
        .create_job(Job::with_id(id, format!("trainer-{id}")), "trainer:v1", &format!("r-{id}"))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_created_job_reports_running_label() {
    let h = harness(DeletePolicy::default());
    for id in ["a", "b", "c"] {
        create(&h.orchestrator, id).await;
        let status = h.orchestrator.get_job(id).unwrap().status;
        assert!(status.is_running(), "{id} has status {status}");
        assert_ne!(status, JobStatus::Created);
    }
    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_two_on_container_third_on_remote() {
    let h = harness(DeletePolicy::default());

    assert_eq!(create(&h.orchestrator, "a").await, Placement::Container);
    assert_eq!(create(&h.orchestrator, "b").await, Placement::Container);
    assert_eq!(create(&h.orchestrator, "c").await, Placement::Remote);

    assert_eq!(h.orchestrator.get_job("c").unwrap().status, JobStatus::RunningOnTwcc);
    assert_eq!(h.container.containers().len(), 2);
    assert_eq!(h.remote.submitted(), vec!["r-c".to_string()]);
    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_sequential_creates_fill_capacity_first() {
    let h = harness(DeletePolicy::default());
    let mut placements = Vec::new();
    for i in 0..6 {
        placements.push(create(&h.orchestrator, &format!("job-{i}")).await);
    }

    let on_container = placements.iter().filter(|p| **p == Placement::Container).count();
    assert_eq!(on_container, 2);
    assert_eq!(&placements[..2], &[Placement::Container, Placement::Container]);
    assert!(placements[2..].iter().all(|p| *p == Placement::Remote));
    h.orchestrator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_never_exceed_capacity() {
    let h = harness(DeletePolicy::default());

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let orchestrator = Arc::clone(&h.orchestrator);
            tokio::spawn(async move { create(&orchestrator, &format!("job-{i}")).await })
        })
        .collect();

    let mut on_container = 0;
    for task in tasks {
        if task.await.unwrap() == Placement::Container {
            on_container += 1;
        }
    }

    assert_eq!(on_container, 2);
    assert_eq!(h.orchestrator.store().container_count(), 2);
    assert_eq!(h.orchestrator.store().remote_count(), 14);
    h.orchestrator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_creates_of_one_id_admit_once() {
    let h = harness(DeletePolicy::default());

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let orchestrator = Arc::clone(&h.orchestrator);
            tokio::spawn(async move {
                orchestrator.create_job(Job::with_id("dup", "trainer"), "trainer:v1", "r-dup").await
            })
        })
        .collect();

    let mut wins = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(placement) => {
                assert_eq!(placement, Placement::Container);
                wins += 1;
            }
            Err(e) => assert_eq!(e.kind(), ErrorKind::AlreadyExists),
        }
    }

    assert_eq!(wins, 1);
    assert_eq!(h.orchestrator.store().container_count(), 1);
    assert_eq!(h.orchestrator.store().remote_count(), 0);
    assert_eq!(h.container.containers().len(), 1);
    assert!(h.remote.submitted().is_empty());
    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_delete_leaves_exactly_one_history_entry() {
    let h = harness(DeletePolicy::default());
    create(&h.orchestrator, "a").await;

    let snapshot = h.orchestrator.delete_job("a").unwrap();
    assert_eq!(snapshot.status, JobStatus::Finished);

    let store = h.orchestrator.store();
    let history: Vec<_> = store.list_history_jobs().into_iter().filter(|j| j.id == "a").collect();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, JobStatus::Finished);
    assert!(store.container_job("a").is_err());
    assert!(store.remote_job("a").is_err());
    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_list_all_after_delete() {
    let h = harness(DeletePolicy::default());
    for id in ["A", "B", "C"] {
        create(&h.orchestrator, id).await;
    }
    h.orchestrator.delete_job("B").unwrap();

    let mut listed: Vec<(String, JobStatus)> =
        h.orchestrator.list_all_jobs().into_iter().map(|j| (j.id, j.status)).collect();
    listed.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        listed,
        vec![
            ("A".to_string(), JobStatus::RunningOnDocker),
            ("B".to_string(), JobStatus::Finished),
            ("C".to_string(), JobStatus::RunningOnTwcc),
        ]
    );
    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_remote_job_finishes_after_third_poll_not_before() {
    let mut h = harness(DeletePolicy::default());
    let gate = Arc::new(Semaphore::new(2));
    h.remote.set_poll_gate(Arc::clone(&gate));
    h.remote.script_statuses("r-c", &["Active", "Active", "Inactive"]);

    create(&h.orchestrator, "a").await;
    create(&h.orchestrator, "b").await;
    assert_eq!(create(&h.orchestrator, "c").await, Placement::Remote);

    for expected in 1..=2 {
        match h.events.recv().await {
            Some(TrackerEvent::Polled { job_id, attempt, status }) => {
                assert_eq!(job_id, "c");
                assert_eq!(attempt, expected);
                assert_eq!(status.as_deref(), Some("Active"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_eq!(h.orchestrator.get_job("c").unwrap().status, JobStatus::RunningOnTwcc);
    assert_eq!(h.orchestrator.store().history_count(), 0);

    gate.add_permits(1);
    assert_eq!(h.orchestrator.join_tracker("c").await, Some(TrackerOutcome::Finalized));
    assert_eq!(h.remote.poll_count("r-c"), 3);
    assert_eq!(h.orchestrator.get_job("c").unwrap().status, JobStatus::Finished);
    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_poll_bound_leaves_remote_job_active() {
    let container = Arc::new(MockContainerBackend::new());
    let remote = Arc::new(MockRemoteBackend::default());
    let config = TrainingConfig {
        container_capacity: 1,
        poll_interval_ms: 1,
        poll_max_attempts: 4,
        ..TrainingConfig::default()
    };
    let orchestrator = TrainingJobOrchestrator::new(
        Arc::new(TrainingJobStore::new()),
        container,
        remote.clone(),
        config,
    );

    create(&orchestrator, "a").await;
    assert_eq!(create(&orchestrator, "b").await, Placement::Remote);

    assert_eq!(orchestrator.join_tracker("b").await, Some(TrackerOutcome::Exhausted));
    assert_eq!(remote.poll_count("r-b"), 4);
    assert_eq!(orchestrator.get_job("b").unwrap().status, JobStatus::RunningOnTwcc);
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_container_exit_frees_capacity() {
    let h = harness(DeletePolicy::default());
    create(&h.orchestrator, "a").await;
    create(&h.orchestrator, "b").await;

    let first = h.container.containers()[0].handle.clone();
    assert!(h.container.exit(&first));
    assert_eq!(h.orchestrator.join_tracker("a").await, Some(TrackerOutcome::Finalized));

    assert_eq!(create(&h.orchestrator, "c").await, Placement::Container);
    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_explicit_delete_then_exit_reports_failed_finalize() {
    let mut h = harness(DeletePolicy::default());
    create(&h.orchestrator, "a").await;
    h.orchestrator.delete_job("a").unwrap();

    assert!(h.container.exit_image("trainer:v1"));
    assert_eq!(h.orchestrator.join_tracker("a").await, Some(TrackerOutcome::FinalizeFailed));
    match h.events.recv().await {
        Some(TrackerEvent::FinalizeFailed { job_id, error }) => {
            assert_eq!(job_id, "a");
            assert_eq!(error.kind(), ErrorKind::NotFound);
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(h.orchestrator.store().history_count(), 1);
}

#[tokio::test]
async fn test_unknown_id_is_not_found_for_every_policy() {
    for policy in [DeletePolicy::ContainerFirst, DeletePolicy::ById] {
        let h = harness(policy);
        assert_eq!(h.orchestrator.delete_job("nope").unwrap_err().kind(), ErrorKind::NotFound);
        create(&h.orchestrator, "a").await;
        assert_eq!(h.orchestrator.delete_job("nope").unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(h.orchestrator.get_job("nope").unwrap_err().kind(), ErrorKind::NotFound);
        h.orchestrator.shutdown().await;
    }

    let h = harness(DeletePolicy::OldestContainer);
    assert_eq!(h.orchestrator.delete_job("nope").unwrap_err().kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_duplicate_id_rejected() {
    let h = harness(DeletePolicy::default());
    create(&h.orchestrator, "a").await;

    let err = h
        .orchestrator
        .create_job(Job::with_id("a", "again"), "trainer:v1", "r-x")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    assert_eq!(h.container.containers().len(), 1);
    h.orchestrator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_deletes_have_one_winner() {
    let h = harness(DeletePolicy::ById);
    create(&h.orchestrator, "a").await;

    let deletes: Vec<_> = (0..8)
        .map(|_| {
            let orchestrator = Arc::clone(&h.orchestrator);
            tokio::spawn(async move { orchestrator.delete_job("a") })
        })
        .collect();

    let mut wins = 0;
    for delete in deletes {
        match delete.await.unwrap() {
            Ok(_) => wins += 1,
            Err(e) => assert_eq!(e.kind(), ErrorKind::NotFound),
        }
    }
    assert_eq!(wins, 1);
    assert_eq!(h.orchestrator.store().history_count(), 1);
    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_all_trackers() {
    let h = harness(DeletePolicy::default());
    for id in ["a", "b", "c"] {
        create(&h.orchestrator, id).await;
    }

    tokio::time::timeout(Duration::from_secs(5), h.orchestrator.shutdown()).await.unwrap();
    assert!(h.orchestrator.join_tracker("a").await.is_none());
    assert_eq!(h.orchestrator.store().container_count(), 2);
}
