use std::sync::{Arc, OnceLock};

use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};

/// Process-wide control-plane metrics backed by a Prometheus registry.
#[derive(Clone, Debug)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    registry: Registry,
    datasets_registered: IntCounter,
    datasets_evicted: IntCounter,
    datasets_reclaimed_bytes: IntCounter,
    jobs_submitted: IntCounter,
    jobs_completed: IntCounter,
    jobs_failed: IntCounter,
    tasks_dispatched: IntCounter,
    chunk_results: IntCounter,
    chunk_errors: IntCounter,
    progress_broadcasts: IntCounter,
    connected_workers: IntGauge,
    connected_observers: IntGauge,
}

impl MetricsRegistry {
    /// Build an empty registry with all collectors installed.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::new()),
        }
    }

    /// Record a successful dataset registration.
    pub fn inc_datasets_registered(&self) {
        self.inner.datasets_registered.inc();
    }

    /// Record reaper evictions and the bytes they reclaimed.
    pub fn record_eviction(&self, evicted: u64, reclaimed_bytes: u64) {
        self.inner.datasets_evicted.inc_by(evicted);
        self.inner.datasets_reclaimed_bytes.inc_by(reclaimed_bytes);
    }

    /// Record a job submission and the number of tasks fanned out.
    pub fn record_job_submitted(&self, tasks: u64) {
        self.inner.jobs_submitted.inc();
        self.inner.tasks_dispatched.inc_by(tasks);
    }

    /// Record a job resolving successfully.
    pub fn inc_jobs_completed(&self) {
        self.inner.jobs_completed.inc();
    }

    /// Record a job resolving with an error.
    pub fn inc_jobs_failed(&self) {
        self.inner.jobs_failed.inc();
    }

    /// Record one ingested partial result.
    pub fn inc_chunk_results(&self) {
        self.inner.chunk_results.inc();
    }

    /// Record one ingested per-task error.
    pub fn inc_chunk_errors(&self) {
        self.inner.chunk_errors.inc();
    }

    /// Record one progress frame fanned out to observers.
    pub fn inc_progress_broadcasts(&self) {
        self.inner.progress_broadcasts.inc();
    }

    /// Update the live worker-connection gauge.
    pub fn set_connected_workers(&self, n: i64) {
        self.inner.connected_workers.set(n);
    }

    /// Update the live observer-connection gauge.
    pub fn set_connected_observers(&self, n: i64) {
        self.inner.connected_observers.set(n);
    }

    /// Render all collectors in the Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let metric_families = self.inner.registry.gather();
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&metric_families, &mut buf).is_err() {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsInner {
    fn new() -> Self {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| {
            IntCounter::with_opts(Opts::new(name, help)).expect("valid counter opts")
        };
        let gauge = |name: &str, help: &str| {
            IntGauge::with_opts(Opts::new(name, help)).expect("valid gauge opts")
        };

        let datasets_registered = counter(
            "elytra_datasets_registered_total",
            "Datasets registered in the catalog",
        );
        let datasets_evicted = counter(
            "elytra_datasets_evicted_total",
            "Datasets removed by age-based eviction",
        );
        let datasets_reclaimed_bytes = counter(
            "elytra_datasets_reclaimed_bytes_total",
            "Bytes reclaimed by age-based eviction",
        );
        let jobs_submitted = counter("elytra_jobs_submitted_total", "Jobs accepted for dispatch");
        let jobs_completed = counter(
            "elytra_jobs_completed_total",
            "Jobs resolved with a merged result",
        );
        let jobs_failed = counter("elytra_jobs_failed_total", "Jobs resolved with an error");
        let tasks_dispatched = counter(
            "elytra_tasks_dispatched_total",
            "Task frames enqueued to workers",
        );
        let chunk_results = counter(
            "elytra_chunk_results_total",
            "Partial results ingested from workers",
        );
        let chunk_errors = counter(
            "elytra_chunk_errors_total",
            "Per-task errors ingested from workers",
        );
        let progress_broadcasts = counter(
            "elytra_progress_broadcasts_total",
            "Progress frames rebroadcast to observers",
        );
        let connected_workers = gauge("elytra_connected_workers", "Live worker connections");
        let connected_observers = gauge("elytra_connected_observers", "Live observer connections");

        for collector in [
            &datasets_registered,
            &datasets_evicted,
            &datasets_reclaimed_bytes,
            &jobs_submitted,
            &jobs_completed,
            &jobs_failed,
            &tasks_dispatched,
            &chunk_results,
            &chunk_errors,
            &progress_broadcasts,
        ] {
            registry
                .register(Box::new(collector.clone()))
                .expect("unique collector");
        }
        registry
            .register(Box::new(connected_workers.clone()))
            .expect("unique collector");
        registry
            .register(Box::new(connected_observers.clone()))
            .expect("unique collector");

        Self {
            registry,
            datasets_registered,
            datasets_evicted,
            datasets_reclaimed_bytes,
            jobs_submitted,
            jobs_completed,
            jobs_failed,
            tasks_dispatched,
            chunk_results,
            chunk_errors,
            progress_broadcasts,
            connected_workers,
            connected_observers,
        }
    }
}

static GLOBAL_METRICS: OnceLock<MetricsRegistry> = OnceLock::new();

/// Process-global metrics registry.
pub fn global_metrics() -> &'static MetricsRegistry {
    GLOBAL_METRICS.get_or_init(MetricsRegistry::new)
}
