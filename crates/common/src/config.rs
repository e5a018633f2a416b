use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Server/runtime configuration resolved from environment variables.
///
/// Every field has a hardcoded default so a bare `elytra-server` start works
/// out of the box. The object-storage credentials are passed through to the
/// dataset conversion collaborator and never read by the control plane.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP/channel listen address.
    pub bind: String,
    /// Root directory for the dataset catalog's on-disk mirror.
    pub data_root: PathBuf,
    /// Datasets older than this are evicted by the reaper.
    pub dataset_max_age: Duration,
    /// Reaper sweep period.
    pub reaper_period: Duration,
    /// Ping/pong liveness sweep period.
    pub liveness_period: Duration,
    /// Optional guardian deadline after which an unfinished job resolves
    /// with a timeout error. `None` disables the guardian.
    pub job_deadline: Option<Duration>,
    /// Object-storage access key, forwarded to the conversion collaborator.
    pub storage_access_key_id: Option<String>,
    /// Object-storage secret key, forwarded to the conversion collaborator.
    pub storage_secret_access_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            data_root: PathBuf::from("./datasets"),
            dataset_max_age: Duration::from_secs(2 * 60 * 60),
            reaper_period: Duration::from_secs(30 * 60),
            liveness_period: Duration::from_secs(30),
            job_deadline: None,
            storage_access_key_id: None,
            storage_secret_access_key: None,
        }
    }
}

impl ServerConfig {
    /// Resolve configuration from `ELYTRA_*` environment variables,
    /// falling back to defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let job_deadline_secs = env_u64_or_default("ELYTRA_JOB_DEADLINE_SECS", 0);
        Self {
            bind: env_or_default("ELYTRA_BIND", &defaults.bind),
            data_root: PathBuf::from(env_or_default(
                "ELYTRA_DATA_ROOT",
                &defaults.data_root.to_string_lossy(),
            )),
            dataset_max_age: Duration::from_secs(env_u64_or_default(
                "ELYTRA_DATASET_MAX_AGE_SECS",
                defaults.dataset_max_age.as_secs(),
            )),
            reaper_period: Duration::from_secs(env_u64_or_default(
                "ELYTRA_REAPER_PERIOD_SECS",
                defaults.reaper_period.as_secs(),
            )),
            liveness_period: Duration::from_secs(env_u64_or_default(
                "ELYTRA_LIVENESS_PERIOD_SECS",
                defaults.liveness_period.as_secs(),
            )),
            job_deadline: (job_deadline_secs > 0).then(|| Duration::from_secs(job_deadline_secs)),
            storage_access_key_id: env::var("ELYTRA_STORAGE_ACCESS_KEY_ID").ok(),
            storage_secret_access_key: env::var("ELYTRA_STORAGE_SECRET_ACCESS_KEY").ok(),
        }
    }
}

/// Read a string env var, falling back to `default` when unset.
pub fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read a u64 env var, falling back to `default` when unset or unparseable.
pub fn env_u64_or_default(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}
