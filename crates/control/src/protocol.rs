//! Wire protocol for the bidirectional worker/observer channel.
//!
//! Each channel frame carries exactly one JSON message with a `type` tag.
//! Task assignments flow server to worker; results, errors, and free-form
//! progress telemetry flow worker to server. Progress frames are rebroadcast
//! to observers verbatim, so only their tag is ever inspected here.

use elytra_common::{ChunkId, JobId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One step of a submitted pipeline.
///
/// Function bodies are opaque serialized strings executed by workers; the
/// control plane examines only the tag, and only for the terminal operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OpDescriptor {
    /// Element-wise transform.
    Map {
        /// Serialized function body, applied by workers.
        #[serde(rename = "fn")]
        body: String,
    },
    /// Element-wise predicate.
    Filter {
        /// Serialized predicate body, applied by workers.
        #[serde(rename = "fn")]
        body: String,
    },
    /// Count matching rows; partials merge by numeric sum.
    Count,
    /// Fold with a caller-supplied reducer; partials merge by the same fold.
    Reduce {
        /// Serialized reducer body, also evaluated by the merge.
        #[serde(rename = "fn")]
        body: String,
        /// Initial accumulator value for the fold.
        #[serde(rename = "initialValue")]
        initial_value: Value,
    },
}

/// Frames sent by the control plane to workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// One task: apply `ops` to one row group of the dataset at `public_url`.
    #[serde(rename = "execute_parquet_chunk", rename_all = "camelCase")]
    ExecuteParquetChunk {
        /// Owning job.
        job_id: JobId,
        /// Task index within the job; also the partials slot.
        chunk_id: ChunkId,
        /// Row group the worker must read.
        row_group_id: u32,
        /// Location of the columnar artifact.
        public_url: String,
        /// The full pipeline, forwarded opaquely.
        ops: Vec<OpDescriptor>,
    },
}

/// Typed worker-to-server frames the scheduler consumes.
///
/// `worker_progress` is deliberately absent: the router forwards it from the
/// raw frame text without decoding past the tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerFrame {
    /// Partial result for one task.
    #[serde(rename = "chunk_result", rename_all = "camelCase")]
    ChunkResult {
        /// Owning job.
        job_id: JobId,
        /// Task index within the job.
        chunk_id: ChunkId,
        /// The partial, opaque to the scheduler until merge.
        result: Value,
    },
    /// Per-task failure report; terminates the owning job.
    #[serde(rename = "chunk_error", rename_all = "camelCase")]
    ChunkError {
        /// Owning job.
        job_id: JobId,
        /// Task index within the job.
        chunk_id: ChunkId,
        /// Worker-supplied failure description.
        error: String,
    },
}

/// Commands consumed by a connection's writer task.
///
/// Dispatch enqueues these through an unbounded channel so no send ever
/// suspends on a slow peer; the writer owns the socket sink.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// One JSON message, already serialized.
    Frame(String),
    /// Liveness probe at the channel framing layer.
    Ping,
    /// Tear the connection down after flushing queued frames.
    Close,
}

/// Message tag of a raw inbound frame, if it parses far enough to have one.
pub fn frame_type(value: &Value) -> Option<&str> {
    value.get("type").and_then(Value::as_str)
}
