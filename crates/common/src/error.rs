use thiserror::Error;

/// Canonical Elytra error taxonomy used across crates.
///
/// Classification guidance:
/// - [`ElytraError::InvalidRequest`]: malformed request bodies and shape violations caught before any work starts
/// - [`ElytraError::MissingApiKey`]: submit requests without the pre-shared token
/// - [`ElytraError::DatasetNotFound`]: unknown dataset id at submit or delete time
/// - [`ElytraError::NoWorkers`]: zero workers connected at submit time
/// - [`ElytraError::Worker`]: a worker reported per-task failure
/// - [`ElytraError::Transport`]: a task frame could not be enqueued to a worker connection
/// - [`ElytraError::Timeout`]: guardian job deadline elapsed before all partials arrived
/// - [`ElytraError::Io`]: raw filesystem failures from std APIs
/// - [`ElytraError::Internal`]: catalog encode failures, merge evaluation failures, clock errors
#[derive(Debug, Error)]
pub enum ElytraError {
    /// Malformed request body or invariant-violating input shape.
    ///
    /// Examples:
    /// - empty or non-contiguous row-group list at registration
    /// - non-positive row count
    /// - empty operation pipeline
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Job submission without the required opaque token.
    #[error("missing api key")]
    MissingApiKey,

    /// Lookup miss against the dataset catalog.
    #[error("dataset not found: {0}")]
    DatasetNotFound(String),

    /// No worker connections registered at submit time.
    #[error("No workers available")]
    NoWorkers,

    /// Per-task failure reported by a worker over the channel.
    #[error("worker failure: {0}")]
    Worker(String),

    /// A task frame could not be delivered to its assigned connection.
    #[error("transport error: {0}")]
    Transport(String),

    /// Guardian deadline fired before the job collected every partial.
    #[error("job timed out: {0}")]
    Timeout(String),

    /// Transparent std IO failures.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Unexpected internal failures surfaced as opaque 500s.
    ///
    /// Examples:
    /// - metadata JSON encode failure
    /// - reducer body outside the evaluable subset
    /// - system clock before epoch
    #[error("internal error: {0}")]
    Internal(String),
}

/// Standard Elytra result alias.
pub type Result<T> = std::result::Result<T, ElytraError>;
