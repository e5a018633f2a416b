//! End-to-end coordinator scenarios with in-memory worker connections.

use std::sync::Arc;

use elytra_catalog::{DatasetCatalog, RegisterDataset, RowGroupMeta};
use elytra_common::{ChunkId, ConnectionId, ElytraError, JobId};
use elytra_control::{
    ConnectionRegistry, CoordinatorConfig, JobCoordinator, MessageRouter, OpDescriptor, Outbound,
    PeerRole,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;

struct Harness {
    catalog: Arc<DatasetCatalog>,
    registry: Arc<ConnectionRegistry>,
    coordinator: Arc<JobCoordinator>,
    _root: tempfile::TempDir,
}

fn harness(config: CoordinatorConfig) -> Harness {
    let root = tempfile::tempdir().expect("tempdir");
    let catalog = Arc::new(DatasetCatalog::new(root.path()));
    let registry = Arc::new(ConnectionRegistry::new());
    let coordinator = Arc::new(JobCoordinator::new(
        config,
        Arc::clone(&catalog),
        Arc::clone(&registry),
    ));
    Harness {
        catalog,
        registry,
        coordinator,
        _root: root,
    }
}

fn register_dataset(catalog: &DatasetCatalog, row_group_count: usize) -> String {
    let row_groups = (0..row_group_count)
        .map(|i| RowGroupMeta {
            group_id: i as u32,
            row_count: 10,
        })
        .collect();
    catalog
        .register(RegisterDataset {
            name: "numbers".to_string(),
            storage_key: "numbers.parquet".to_string(),
            storage_bucket: "elytra-data".to_string(),
            public_url: "https://cdn.example.com/numbers.parquet".to_string(),
            row_groups,
        })
        .expect("register")
        .id
}

fn connect_worker(
    registry: &ConnectionRegistry,
) -> (ConnectionId, mpsc::UnboundedReceiver<Outbound>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = registry.accept(tx, PeerRole::Worker, false);
    (handle.id, rx)
}

fn drain_task_frames(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Ok(out) = rx.try_recv() {
        if let Outbound::Frame(json) = out {
            frames.push(serde_json::from_str(&json).expect("frame json"));
        }
    }
    frames
}

fn chunk_id(frame: &Value) -> u32 {
    frame["chunkId"].as_u64().expect("chunkId") as u32
}

fn job_id(frame: &Value) -> JobId {
    JobId(frame["jobId"].as_u64().expect("jobId"))
}

#[tokio::test]
async fn count_pipeline_sums_partials_across_three_workers() {
    let h = harness(CoordinatorConfig::default());
    let dataset = register_dataset(&h.catalog, 3);
    let mut workers: Vec<_> = (0..3).map(|_| connect_worker(&h.registry)).collect();

    let ticket = h
        .coordinator
        .submit(&dataset, vec![OpDescriptor::Count])
        .expect("submit");

    let partials = [json!(3), json!(7), json!(5)];
    for (_, rx) in workers.iter_mut() {
        for frame in drain_task_frames(rx) {
            assert_eq!(frame["type"], "execute_parquet_chunk");
            assert_eq!(
                frame["publicUrl"],
                "https://cdn.example.com/numbers.parquet"
            );
            let chunk = chunk_id(&frame);
            h.coordinator.ingest_result(
                job_id(&frame),
                ChunkId(chunk),
                partials[chunk as usize].clone(),
            );
        }
    }

    let result = ticket.await.expect("resolved").expect("merged");
    assert_eq!(result, json!(15));
    assert_eq!(h.coordinator.pending_jobs(), 0);
}

#[tokio::test]
async fn reduce_pipeline_folds_by_chunk_order_not_arrival_order() {
    let h = harness(CoordinatorConfig::default());
    let dataset = register_dataset(&h.catalog, 3);
    let (_, mut rx) = connect_worker(&h.registry);

    let ops = vec![OpDescriptor::Reduce {
        body: "(a,b)=>a-b".to_string(),
        initial_value: json!(100),
    }];
    let ticket = h.coordinator.submit(&dataset, ops).expect("submit");
    let frames = drain_task_frames(&mut rx);
    assert_eq!(frames.len(), 3);
    let job = job_id(&frames[0]);

    // Arrival order 2, 0, 1; the fold must still run 0, 1, 2.
    h.coordinator.ingest_result(job, ChunkId(2), json!(5));
    h.coordinator.ingest_result(job, ChunkId(0), json!(10));
    h.coordinator.ingest_result(job, ChunkId(1), json!(20));

    let result = ticket.await.expect("resolved").expect("merged");
    assert_eq!(result, json!(65));
}

#[tokio::test]
async fn map_pipeline_concatenates_partials_in_chunk_order() {
    let h = harness(CoordinatorConfig::default());
    let dataset = register_dataset(&h.catalog, 3);
    let (_, mut rx) = connect_worker(&h.registry);

    let ops = vec![OpDescriptor::Map {
        body: "(x) => x + 1".to_string(),
    }];
    let ticket = h.coordinator.submit(&dataset, ops).expect("submit");
    let job = job_id(&drain_task_frames(&mut rx)[0]);

    h.coordinator.ingest_result(job, ChunkId(1), json!([3]));
    h.coordinator.ingest_result(job, ChunkId(2), json!([4, 5]));
    h.coordinator.ingest_result(job, ChunkId(0), json!([1, 2]));

    let result = ticket.await.expect("resolved").expect("merged");
    assert_eq!(result, json!([1, 2, 3, 4, 5]));
}

#[tokio::test]
async fn tasks_assign_round_robin_over_the_dispatch_snapshot() {
    let h = harness(CoordinatorConfig::default());
    let dataset = register_dataset(&h.catalog, 5);
    let mut workers: Vec<_> = (0..3).map(|_| connect_worker(&h.registry)).collect();

    let _ticket = h
        .coordinator
        .submit(&dataset, vec![OpDescriptor::Count])
        .expect("submit");

    let per_worker: Vec<Vec<u32>> = workers
        .iter_mut()
        .map(|(_, rx)| drain_task_frames(rx).iter().map(chunk_id).collect())
        .collect();
    let mut all: Vec<u32> = per_worker.iter().flatten().copied().collect();
    all.sort_unstable();
    assert_eq!(all, vec![0, 1, 2, 3, 4]);
    // chunk % workers: snapshot order decides which worker is slot 0, but
    // chunks 0 and 3 (and 1 and 4) must land together.
    for chunks in &per_worker {
        match chunks.len() {
            2 => assert_eq!(chunks[1] - chunks[0], 3),
            1 => {}
            n => panic!("worker got {n} chunks"),
        }
    }
}

#[tokio::test]
async fn first_chunk_error_terminates_the_job_and_drops_late_results() {
    let h = harness(CoordinatorConfig::default());
    let dataset = register_dataset(&h.catalog, 3);
    let (_, mut rx) = connect_worker(&h.registry);

    let ticket = h
        .coordinator
        .submit(&dataset, vec![OpDescriptor::Count])
        .expect("submit");
    let job = job_id(&drain_task_frames(&mut rx)[0]);

    h.coordinator.ingest_result(job, ChunkId(0), json!(3));
    h.coordinator
        .ingest_error(job, ChunkId(1), "row group decode failed".to_string());

    let err = ticket.await.expect("resolved").expect_err("job failed");
    assert!(matches!(err, ElytraError::Worker(_)));
    assert_eq!(h.coordinator.pending_jobs(), 0);

    // Late results after termination are silently ignored.
    h.coordinator.ingest_result(job, ChunkId(2), json!(5));
    assert_eq!(h.coordinator.pending_jobs(), 0);
}

#[tokio::test]
async fn duplicate_slot_writes_are_dropped() {
    let h = harness(CoordinatorConfig::default());
    let dataset = register_dataset(&h.catalog, 2);
    let (_, mut rx) = connect_worker(&h.registry);

    let ticket = h
        .coordinator
        .submit(&dataset, vec![OpDescriptor::Count])
        .expect("submit");
    let job = job_id(&drain_task_frames(&mut rx)[0]);

    h.coordinator.ingest_result(job, ChunkId(0), json!(1));
    h.coordinator.ingest_result(job, ChunkId(0), json!(100));
    h.coordinator.ingest_result(job, ChunkId(1), json!(2));

    let result = ticket.await.expect("resolved").expect("merged");
    assert_eq!(result, json!(3));
}

#[tokio::test]
async fn submit_without_workers_is_a_capacity_error() {
    let h = harness(CoordinatorConfig::default());
    let dataset = register_dataset(&h.catalog, 3);

    let err = h
        .coordinator
        .submit(&dataset, vec![OpDescriptor::Count])
        .expect_err("no workers");
    assert!(matches!(err, ElytraError::NoWorkers));
    assert_eq!(err.to_string(), "No workers available");
}

#[tokio::test]
async fn submit_against_unknown_dataset_fails_before_worker_lookup() {
    let h = harness(CoordinatorConfig::default());
    let err = h
        .coordinator
        .submit("missing", vec![OpDescriptor::Count])
        .expect_err("unknown dataset");
    assert!(matches!(err, ElytraError::DatasetNotFound(_)));
}

#[tokio::test]
async fn dispatch_to_a_closed_connection_fails_the_job() {
    let h = harness(CoordinatorConfig::default());
    let dataset = register_dataset(&h.catalog, 2);
    let (_, rx) = connect_worker(&h.registry);
    drop(rx);

    let ticket = h
        .coordinator
        .submit(&dataset, vec![OpDescriptor::Count])
        .expect("submit");
    let err = ticket.await.expect("resolved").expect_err("transport");
    assert!(matches!(err, ElytraError::Transport(_)));
    assert_eq!(h.coordinator.pending_jobs(), 0);
}

#[tokio::test(start_paused = true)]
async fn guardian_deadline_resolves_stalled_jobs() {
    let h = harness(CoordinatorConfig {
        job_deadline: Some(std::time::Duration::from_secs(60)),
    });
    let dataset = register_dataset(&h.catalog, 2);
    let (_, mut rx) = connect_worker(&h.registry);

    let ticket = h
        .coordinator
        .submit(&dataset, vec![OpDescriptor::Count])
        .expect("submit");
    let job = job_id(&drain_task_frames(&mut rx)[0]);
    h.coordinator.ingest_result(job, ChunkId(0), json!(1));
    // Chunk 1 never arrives; the guardian fires instead.
    let err = ticket.await.expect("resolved").expect_err("timeout");
    assert!(matches!(err, ElytraError::Timeout(_)));
    assert_eq!(h.coordinator.pending_jobs(), 0);
}

#[tokio::test]
async fn progress_frames_reach_observers_verbatim_and_in_order() {
    let h = harness(CoordinatorConfig::default());
    let router = MessageRouter::new(Arc::clone(&h.registry), Arc::clone(&h.coordinator));

    let (observer_tx, mut observer_rx) = mpsc::unbounded_channel();
    h.registry
        .accept(observer_tx, PeerRole::Observer, false);
    let (worker_id, _worker_rx) = connect_worker(&h.registry);

    let frames = [
        r#"{"type":"worker_progress","jobId":1,"chunkId":0,"threadId":0,"status":"A"}"#,
        r#"{"type":"worker_progress","jobId":1,"chunkId":0,"threadId":0,"status":"B"}"#,
        r#"{"type":"worker_progress","jobId":1,"chunkId":0,"threadId":0,"status":"C"}"#,
    ];
    for frame in frames {
        router.dispatch(worker_id, frame);
    }

    for expected in frames {
        match observer_rx.try_recv() {
            Ok(Outbound::Frame(got)) => assert_eq!(got, expected),
            other => panic!("expected frame, got {other:?}"),
        }
    }
    assert!(observer_rx.try_recv().is_err());
}

#[tokio::test]
async fn malformed_and_unknown_frames_are_dropped_quietly() {
    let h = harness(CoordinatorConfig::default());
    let router = MessageRouter::new(Arc::clone(&h.registry), Arc::clone(&h.coordinator));
    let (worker_id, _rx) = connect_worker(&h.registry);

    router.dispatch(worker_id, "not json at all");
    router.dispatch(worker_id, r#"{"no":"type"}"#);
    router.dispatch(worker_id, r#"{"type":"mystery_kind"}"#);
    router.dispatch(worker_id, r#"{"type":"chunk_result","jobId":"strings"}"#);
    assert_eq!(h.coordinator.pending_jobs(), 0);
    assert_eq!(h.registry.len(), 1);
}

#[tokio::test]
async fn chunk_results_flow_through_the_router() {
    let h = harness(CoordinatorConfig::default());
    let router = MessageRouter::new(Arc::clone(&h.registry), Arc::clone(&h.coordinator));
    let dataset = register_dataset(&h.catalog, 1);
    let (worker_id, mut rx) = connect_worker(&h.registry);

    let ticket = h
        .coordinator
        .submit(&dataset, vec![OpDescriptor::Count])
        .expect("submit");
    let job = job_id(&drain_task_frames(&mut rx)[0]);

    router.dispatch(
        worker_id,
        &format!(r#"{{"type":"chunk_result","jobId":{},"chunkId":0,"result":42}}"#, job.0),
    );
    let result = ticket.await.expect("resolved").expect("merged");
    assert_eq!(result, json!(42));
}
