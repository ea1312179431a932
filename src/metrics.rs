use std::time::Duration;

use metrics::{register_counter, register_gauge, register_histogram, Counter, Gauge, Histogram};
use tracing::info;

use crate::error::CaptureError;

/// Handles for the pipeline's metrics. With no recorder installed the
/// handles are no-ops, so instrumentation is free in tests.
pub struct Metrics {
    pub jobs_completed: Counter,
    pub jobs_failed: Counter,
    pub job_duration: Histogram,
    pub pool_utilization: Gauge,
    pub queue_depth: Gauge,
    pub browser_launches: Counter,
    pub browser_recycles: Counter,
    pub webhook_failures: Counter,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            jobs_completed: register_counter!("capture_jobs_completed_total"),
            jobs_failed: register_counter!("capture_jobs_failed_total"),
            job_duration: register_histogram!("capture_job_duration_seconds"),
            pool_utilization: register_gauge!("capture_pool_utilization_ratio"),
            queue_depth: register_gauge!("capture_queue_depth"),
            browser_launches: register_counter!("capture_browser_launches_total"),
            browser_recycles: register_counter!("capture_browser_recycles_total"),
            webhook_failures: register_counter!("capture_webhook_failures_total"),
        }
    }

    /// Detached handles for tests that want zero recorder interaction.
    pub fn noop() -> Self {
        Self {
            jobs_completed: Counter::noop(),
            jobs_failed: Counter::noop(),
            job_duration: Histogram::noop(),
            pool_utilization: Gauge::noop(),
            queue_depth: Gauge::noop(),
            browser_launches: Counter::noop(),
            browser_recycles: Counter::noop(),
            webhook_failures: Counter::noop(),
        }
    }

    pub fn record_job(&self, duration: Duration, success: bool) {
        if success {
            self.jobs_completed.increment(1);
        } else {
            self.jobs_failed.increment(1);
        }
        self.job_duration.record(duration.as_secs_f64());
    }

    pub fn record_pool_utilization(&self, active: usize, capacity: usize) {
        if capacity > 0 {
            self.pool_utilization
                .set(active as f64 / capacity as f64);
        }
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.set(depth as f64);
    }

    pub fn record_browser_launch(&self) {
        self.browser_launches.increment(1);
    }

    pub fn record_browser_recycle(&self) {
        self.browser_recycles.increment(1);
    }

    pub fn record_webhook_failure(&self) {
        self.webhook_failures.increment(1);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs the global Prometheus recorder with an HTTP scrape endpoint.
pub struct PrometheusExporter {
    port: u16,
}

impl PrometheusExporter {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub fn install(&self) -> Result<(), CaptureError> {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], self.port))
            .install()
            .map_err(|e| CaptureError::Io(e.to_string()))?;
        info!("prometheus metrics exposed on port {}", self.port);
        Ok(())
    }
}
