//! Inbound message dispatch for one channel connection.
//!
//! Every received frame lands here as raw text. Progress telemetry is
//! rebroadcast to observers verbatim; results and errors are decoded and
//! handed to the coordinator. Malformed frames and unknown kinds are dropped
//! with a log line and never terminate the connection.

use std::sync::Arc;

use elytra_common::{global_metrics, ConnectionId};
use serde_json::Value;
use tracing::{debug, warn};

use crate::coordinator::JobCoordinator;
use crate::protocol::{frame_type, WorkerFrame};
use crate::registry::ConnectionRegistry;

const PROGRESS_FRAME: &str = "worker_progress";

/// Per-frame dispatcher shared by all connection pumps.
#[derive(Debug)]
pub struct MessageRouter {
    registry: Arc<ConnectionRegistry>,
    coordinator: Arc<JobCoordinator>,
}

impl MessageRouter {
    /// Build a router over the injected registry and coordinator.
    pub fn new(registry: Arc<ConnectionRegistry>, coordinator: Arc<JobCoordinator>) -> Self {
        Self {
            registry,
            coordinator,
        }
    }

    /// Dispatch one inbound frame by its `type` tag.
    ///
    /// Never suspends: coordinator ingestion and observer fan-out are both
    /// non-blocking, so a pump can call this inline between socket reads
    /// and preserve per-sender ordering.
    pub fn dispatch(&self, origin: ConnectionId, raw: &str) {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(connection_id = %origin, error = %e, "dropping malformed frame");
                return;
            }
        };
        match frame_type(&value) {
            Some(PROGRESS_FRAME) => {
                let observers = self.registry.observers();
                let delivered = self.registry.broadcast(&observers, raw);
                global_metrics().inc_progress_broadcasts();
                debug!(connection_id = %origin, observers = delivered, "progress rebroadcast");
            }
            Some("chunk_result") | Some("chunk_error") => {
                match serde_json::from_value::<WorkerFrame>(value) {
                    Ok(WorkerFrame::ChunkResult {
                        job_id,
                        chunk_id,
                        result,
                    }) => self.coordinator.ingest_result(job_id, chunk_id, result),
                    Ok(WorkerFrame::ChunkError {
                        job_id,
                        chunk_id,
                        error,
                    }) => self.coordinator.ingest_error(job_id, chunk_id, error),
                    Err(e) => {
                        warn!(connection_id = %origin, error = %e, "dropping frame with bad fields");
                    }
                }
            }
            Some(other) => {
                debug!(connection_id = %origin, kind = other, "dropping frame of unknown kind");
            }
            None => {
                warn!(connection_id = %origin, "dropping frame without a type tag");
            }
        }
    }
}
