//! Job coordinator: fan-out, fan-in, and resolution.
//!
//! Responsibilities:
//! - accept submitted pipelines and cut one task per dataset row group;
//! - assign tasks round-robin over a worker snapshot frozen at dispatch;
//! - collect per-chunk partials, each written to its slot at most once;
//! - merge on completion, or terminate on the first per-task error;
//! - resolve the submitter through a one-shot ticket and drop the entry.
//!
//! Jobs and connections are peers coordinated by identifiers: a job holds
//! the dispatch-time snapshot of send handles, never the registry, and a
//! worker that disconnects mid-job simply stops producing messages for it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use elytra_catalog::DatasetCatalog;
use elytra_common::{global_metrics, ChunkId, ElytraError, JobId, Result};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::merge::merge_partials;
use crate::protocol::{OpDescriptor, ServerFrame};
use crate::registry::ConnectionRegistry;

/// Coordinator behavior knobs.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorConfig {
    /// Optional guardian deadline: an unfinished job resolves with a timeout
    /// error once this elapses. `None` leaves stalled jobs pending forever.
    pub job_deadline: Option<Duration>,
}

/// One-shot future delivering the merged result or the terminal error.
pub type JobTicket = oneshot::Receiver<Result<Value>>;

#[derive(Debug)]
struct JobRuntime {
    ops: Vec<OpDescriptor>,
    partials: Vec<Option<Value>>,
    expected: usize,
    completed: usize,
    resolver: oneshot::Sender<Result<Value>>,
}

/// In-memory job registry and dispatch logic.
#[derive(Debug)]
pub struct JobCoordinator {
    config: CoordinatorConfig,
    catalog: Arc<DatasetCatalog>,
    registry: Arc<ConnectionRegistry>,
    next_job_id: AtomicU64,
    jobs: Mutex<HashMap<JobId, JobRuntime>>,
}

impl JobCoordinator {
    /// Build a coordinator over the injected catalog and connection registry.
    pub fn new(
        config: CoordinatorConfig,
        catalog: Arc<DatasetCatalog>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            config,
            catalog,
            registry,
            next_job_id: AtomicU64::new(0),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Create a job for `dataset_id`, fan its tasks out, and return the
    /// resolution ticket.
    ///
    /// The worker snapshot is frozen here: workers joining later receive
    /// nothing for this job, and a worker leaving mid-job stalls the tasks
    /// it held. An enqueue failure terminates the job with a transport
    /// error delivered through the ticket.
    pub fn submit(self: &Arc<Self>, dataset_id: &str, ops: Vec<OpDescriptor>) -> Result<JobTicket> {
        if ops.is_empty() {
            return Err(ElytraError::InvalidRequest(
                "ops must be a non-empty pipeline".to_string(),
            ));
        }
        let dataset = self
            .catalog
            .get(dataset_id)
            .ok_or_else(|| ElytraError::DatasetNotFound(dataset_id.to_string()))?;
        let workers = self.registry.workers();
        if workers.is_empty() {
            return Err(ElytraError::NoWorkers);
        }

        let job_id = JobId(self.next_job_id.fetch_add(1, Ordering::Relaxed) + 1);
        let expected = dataset.row_groups.len();
        let (resolver, ticket) = oneshot::channel();
        {
            let mut jobs = self.jobs.lock().expect("job registry lock poisoned");
            jobs.insert(
                job_id,
                JobRuntime {
                    ops: ops.clone(),
                    partials: vec![None; expected],
                    expected,
                    completed: 0,
                    resolver,
                },
            );
        }
        info!(
            job_id = %job_id,
            dataset_id = %dataset.id,
            tasks = expected,
            workers = workers.len(),
            "job submitted"
        );

        for (index, row_group) in dataset.row_groups.iter().enumerate() {
            let frame = ServerFrame::ExecuteParquetChunk {
                job_id,
                chunk_id: ChunkId(index as u32),
                row_group_id: row_group.group_id,
                public_url: dataset.public_url.clone(),
                ops: ops.clone(),
            };
            let json = match serde_json::to_string(&frame) {
                Ok(json) => json,
                Err(e) => {
                    self.fail_job(
                        job_id,
                        ElytraError::Internal(format!("task frame encode failed: {e}")),
                    );
                    return Ok(ticket);
                }
            };
            let worker = &workers[index % workers.len()];
            if let Err(e) = worker.send_frame(json) {
                warn!(
                    job_id = %job_id,
                    chunk_id = index,
                    connection_id = %worker.id,
                    error = %e,
                    "task dispatch failed; terminating job"
                );
                self.fail_job(job_id, e);
                return Ok(ticket);
            }
            debug!(
                job_id = %job_id,
                chunk_id = index,
                row_group_id = row_group.group_id,
                connection_id = %worker.id,
                "task dispatched"
            );
        }
        global_metrics().record_job_submitted(expected as u64);

        if let Some(deadline) = self.config.job_deadline {
            let coordinator = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                coordinator.expire(job_id);
            });
        }
        Ok(ticket)
    }

    /// Record one partial result. Unknown jobs (already resolved) and
    /// duplicate slots are dropped; the final slot triggers merge and
    /// resolution.
    pub fn ingest_result(&self, job_id: JobId, chunk_id: ChunkId, value: Value) {
        let finished = {
            let mut jobs = self.jobs.lock().expect("job registry lock poisoned");
            let Some(job) = jobs.get_mut(&job_id) else {
                debug!(job_id = %job_id, chunk_id = %chunk_id, "dropping result for unknown job");
                return;
            };
            let index = chunk_id.index();
            if index >= job.expected {
                warn!(job_id = %job_id, chunk_id = %chunk_id, "dropping result with out-of-range chunk id");
                return;
            }
            if job.partials[index].is_some() {
                warn!(job_id = %job_id, chunk_id = %chunk_id, "dropping duplicate result for filled slot");
                return;
            }
            job.partials[index] = Some(value);
            job.completed += 1;
            global_metrics().inc_chunk_results();
            debug!(
                job_id = %job_id,
                chunk_id = %chunk_id,
                completed = job.completed,
                expected = job.expected,
                "partial recorded"
            );
            if job.completed < job.expected {
                return;
            }
            jobs.remove(&job_id).expect("job present while resolving")
        };

        // Merge outside the lock; it is pure computation.
        let partials: Vec<Value> = finished
            .partials
            .into_iter()
            .map(|slot| slot.expect("all slots filled at completion"))
            .collect();
        let merged = merge_partials(&finished.ops, partials);
        match &merged {
            Ok(_) => {
                global_metrics().inc_jobs_completed();
                info!(job_id = %job_id, tasks = finished.expected, "job resolved");
            }
            Err(e) => {
                global_metrics().inc_jobs_failed();
                warn!(job_id = %job_id, error = %e, "merge failed; job resolved with error");
            }
        }
        let _ = finished.resolver.send(merged);
    }

    /// Record one per-task error: the job terminates immediately and later
    /// results for it are silently dropped. No cancellation reaches workers
    /// still computing.
    pub fn ingest_error(&self, job_id: JobId, chunk_id: ChunkId, error: String) {
        global_metrics().inc_chunk_errors();
        let Some(job) = self
            .jobs
            .lock()
            .expect("job registry lock poisoned")
            .remove(&job_id)
        else {
            debug!(job_id = %job_id, chunk_id = %chunk_id, "dropping error for unknown job");
            return;
        };
        warn!(job_id = %job_id, chunk_id = %chunk_id, error = %error, "job terminated by worker error");
        global_metrics().inc_jobs_failed();
        let _ = job.resolver.send(Err(ElytraError::Worker(error)));
    }

    /// Guardian path: resolve a still-pending job with a timeout error.
    pub fn expire(&self, job_id: JobId) {
        let Some(job) = self
            .jobs
            .lock()
            .expect("job registry lock poisoned")
            .remove(&job_id)
        else {
            return;
        };
        warn!(
            job_id = %job_id,
            completed = job.completed,
            expected = job.expected,
            "job deadline elapsed; resolving with timeout"
        );
        global_metrics().inc_jobs_failed();
        let _ = job.resolver.send(Err(ElytraError::Timeout(format!(
            "job {job_id} collected {} of {} partials before its deadline",
            job.completed, job.expected
        ))));
    }

    fn fail_job(&self, job_id: JobId, error: ElytraError) {
        let Some(job) = self
            .jobs
            .lock()
            .expect("job registry lock poisoned")
            .remove(&job_id)
        else {
            return;
        };
        global_metrics().inc_jobs_failed();
        let _ = job.resolver.send(Err(error));
    }

    /// Number of jobs currently pending resolution.
    pub fn pending_jobs(&self) -> usize {
        self.jobs.lock().expect("job registry lock poisoned").len()
    }
}
