//! Control-plane building blocks: protocol, registry, routing, coordination.
//!
//! Architecture role:
//! - wire frames and operation descriptors for the worker/observer channel
//! - connection registry with role partitioning and liveness sweeps
//! - per-connection message routing with observer fan-out
//! - job coordinator: task fan-out, partial fan-in, terminal-op merge
//!
//! Key modules:
//! - [`protocol`]
//! - [`registry`]
//! - [`router`]
//! - [`coordinator`]
//! - [`merge`]

pub mod coordinator;
pub mod merge;
pub mod protocol;
pub mod registry;
pub mod router;

pub use coordinator::{CoordinatorConfig, JobCoordinator, JobTicket};
pub use merge::merge_partials;
pub use protocol::{frame_type, OpDescriptor, Outbound, ServerFrame, WorkerFrame};
pub use registry::{ConnectionRegistry, PeerHandle, PeerRole};
pub use router::MessageRouter;
