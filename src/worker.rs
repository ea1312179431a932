//! Workers that turn dequeued jobs into terminal states
//!
//! Each worker processes one job at a time: mark PROCESSING, lease a context,
//! drive the executor, upload the artifact, finalize COMPLETED or FAILED, and
//! release the lease on every exit path, always after the terminal status
//! write. A worker task never propagates a per-job error.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::artifact::ArtifactStore;
use crate::browser_pool::{BrowserPool, ContextOptions};
use crate::config::Config;
use crate::error::CaptureError;
use crate::executor::{CaptureExecutor, CaptureOutput};
use crate::job::{ArtifactRef, CaptureMeta, Job, JobStatus, JobStore};
use crate::metrics::Metrics;
use crate::queue::JobQueue;
use crate::utils::artifact_key;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-job pipeline shared by the worker pool and the synchronous intake
/// path, so both submission modes run the identical state machine.
pub struct JobRunner {
    config: Config,
    pool: BrowserPool,
    executor: Arc<CaptureExecutor>,
    store: Arc<dyn JobStore>,
    artifacts: Arc<dyn ArtifactStore>,
    queue: Arc<JobQueue>,
    metrics: Arc<Metrics>,
    http: reqwest::Client,
}

impl JobRunner {
    pub fn new(
        config: Config,
        pool: BrowserPool,
        store: Arc<dyn JobStore>,
        artifacts: Arc<dyn ArtifactStore>,
        queue: Arc<JobQueue>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            executor: Arc::new(CaptureExecutor::new(config.clone())),
            config,
            pool,
            store,
            artifacts,
            queue,
            metrics,
            http: reqwest::Client::new(),
        }
    }

    /// Drive one job to a terminal state. Returns whether it completed.
    pub async fn run_job(&self, job_id: Uuid, attempt: u32) -> bool {
        let job = match self.store.find_by_id(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(%job_id, "dequeued job no longer exists");
                return false;
            }
            Err(e) => {
                warn!(%job_id, "job lookup failed: {e}");
                return false;
            }
        };
        if job.status != JobStatus::Pending {
            debug!(%job_id, status = ?job.status, "skipping non-pending job");
            return false;
        }

        if let Err(e) = self.store.mark_processing(job_id).await {
            return match e {
                CaptureError::NotFound(_) | CaptureError::InvalidTransition { .. } => {
                    debug!(%job_id, "job left pending state before dispatch: {e}");
                    false
                }
                // The job is still PENDING, so the backoff retry never moves
                // a status backwards.
                other => self.retry_dispatch(job_id, attempt, other).await,
            };
        }

        self.queue.job_started();
        let success = self.process_owned(job).await;
        self.queue.job_finished(job_id, success).await;
        success
    }

    async fn retry_dispatch(&self, job_id: Uuid, attempt: u32, error: CaptureError) -> bool {
        let policy = &self.config.dispatch_retry;
        let next = attempt + 1;
        if error.is_retryable() && next < policy.max_attempts {
            let delay = policy.delay_for(attempt);
            warn!(%job_id, attempt, "dispatch failed ({error}), retrying in {delay:?}");
            self.queue.requeue_with_backoff(job_id, next, delay).await;
        } else {
            warn!(%job_id, attempts = next, "dispatch abandoned: {error}");
            if let Err(e) = self.store.mark_failed(job_id, &error.to_string()).await {
                warn!(%job_id, "failure write after abandoned dispatch: {e}");
            }
            self.notify_webhook(job_id).await;
        }
        false
    }

    /// The job is PROCESSING and owned by this call.
    async fn process_owned(&self, job: Job) -> bool {
        let job_id = job.id;

        let options = ContextOptions {
            viewport: job.request.viewport.clone(),
            user_agent: job.request.user_agent.clone(),
        };
        let handle = match self.pool.acquire(options).await {
            Ok(handle) => handle,
            Err(e) => {
                // No lease was ever taken; finalize without attempting capture.
                self.finalize_failure(job_id, &e).await;
                self.notify_webhook(job_id).await;
                return false;
            }
        };
        debug!(%job_id, context_id = %handle.context_id(), "lease acquired");

        let outcome = self.executor.capture(&handle, &job.request).await;

        let success = match outcome {
            Ok(output) => {
                debug!(%job_id, size = output.bytes.len(), "uploading artifact");
                let duration = output.duration;
                match self.store_artifact(&job, output).await {
                    Ok((artifact, meta)) => {
                        debug!(%job_id, "finalizing");
                        match self.store.mark_completed(job_id, artifact, meta).await {
                            Ok(()) => {
                                self.metrics.record_job(duration, true);
                                true
                            }
                            Err(e) => {
                                warn!(%job_id, "completion write failed: {e}");
                                self.finalize_failure(job_id, &e).await;
                                false
                            }
                        }
                    }
                    Err(e) => {
                        self.finalize_failure(job_id, &e).await;
                        false
                    }
                }
            }
            Err(e) => {
                self.finalize_failure(job_id, &e).await;
                false
            }
        };

        // Release after the terminal status write, on success and failure
        // alike, so a lease is never dropped while the record is ambiguous.
        handle.release().await;

        self.notify_webhook(job_id).await;
        success
    }

    async fn store_artifact(
        &self,
        job: &Job,
        output: CaptureOutput,
    ) -> Result<(ArtifactRef, CaptureMeta), CaptureError> {
        let key = artifact_key(&job.account_id, job.id, output.format.extension());
        let metadata = serde_json::json!({
            "accountId": job.account_id,
            "jobId": job.id,
            "format": output.format,
        });
        let size_bytes = output.bytes.len();
        self.artifacts
            .upload(
                &key,
                output.bytes,
                output.format.content_type(),
                Some(metadata),
            )
            .await?;
        let url = self
            .artifacts
            .signed_url(&key, self.config.signed_url_ttl)
            .await?;
        Ok((
            ArtifactRef {
                key,
                url,
                size_bytes,
                page_count: output.page_count,
            },
            CaptureMeta {
                format: output.format,
                duration_ms: output.duration.as_millis() as u64,
                captured_at: Utc::now(),
            },
        ))
    }

    async fn finalize_failure(&self, job_id: Uuid, error: &CaptureError) {
        warn!(%job_id, code = error.code(), "job failed: {error}");
        self.metrics.record_job(Duration::ZERO, false);
        if let Err(e) = self.store.mark_failed(job_id, &error.to_string()).await {
            warn!(%job_id, "failure write failed: {e}");
        }
    }

    /// Best-effort terminal-state webhook; failures are logged, never fatal.
    async fn notify_webhook(&self, job_id: Uuid) {
        let Ok(Some(job)) = self.store.find_by_id(job_id).await else {
            return;
        };
        let Some(url) = job.request.webhook_url.clone() else {
            return;
        };
        if !job.status.is_terminal() {
            return;
        }
        debug!(%job_id, "delivering webhook");
        let result = self
            .http
            .post(&url)
            .json(&job)
            .timeout(WEBHOOK_TIMEOUT)
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {
                debug!(%job_id, "webhook delivered");
            }
            Ok(response) => {
                warn!(%job_id, status = %response.status(), "webhook rejected");
                self.metrics.record_webhook_failure();
            }
            Err(e) => {
                warn!(%job_id, "webhook delivery failed: {e}");
                self.metrics.record_webhook_failure();
            }
        }
    }
}

impl Clone for JobRunner {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            pool: self.pool.clone(),
            executor: self.executor.clone(),
            store: self.store.clone(),
            artifacts: self.artifacts.clone(),
            queue: self.queue.clone(),
            metrics: self.metrics.clone(),
            http: self.http.clone(),
        }
    }
}

pub struct Worker {
    id: usize,
    runner: JobRunner,
    queue: Arc<JobQueue>,
    is_running: Arc<AtomicBool>,
    processed_count: Arc<AtomicUsize>,
    error_count: Arc<AtomicUsize>,
}

impl Worker {
    pub fn new(id: usize, runner: JobRunner, queue: Arc<JobQueue>) -> Self {
        Self {
            id,
            runner,
            queue,
            is_running: Arc::new(AtomicBool::new(false)),
            processed_count: Arc::new(AtomicUsize::new(0)),
            error_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub async fn run(&self) {
        info!("starting capture worker {}", self.id);
        self.is_running.store(true, Ordering::Relaxed);

        while let Some(lease) = self.queue.dequeue().await {
            let completed = self.runner.run_job(lease.job_id, lease.attempt).await;
            if completed {
                self.processed_count.fetch_add(1, Ordering::Relaxed);
                debug!("worker {} completed job {}", self.id, lease.job_id);
            } else {
                self.error_count.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.is_running.store(false, Ordering::Relaxed);
        info!("capture worker {} stopped", self.id);
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            id: self.id,
            is_running: self.is_running.load(Ordering::Relaxed),
            processed_count: self.processed_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }
}

impl Clone for Worker {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            runner: self.runner.clone(),
            queue: self.queue.clone(),
            is_running: self.is_running.clone(),
            processed_count: self.processed_count.clone(),
            error_count: self.error_count.clone(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkerStats {
    pub id: usize,
    pub is_running: bool,
    pub processed_count: usize,
    pub error_count: usize,
}

/// Fixed-size pool of worker tasks sharing the queue. In-flight jobs are
/// bounded by the worker count, which transitively bounds contexts in use.
pub struct WorkerPool {
    workers: Vec<Worker>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn start(count: usize, runner: JobRunner, queue: Arc<JobQueue>) -> Self {
        let mut workers = Vec::with_capacity(count);
        let mut handles = Vec::with_capacity(count);

        for id in 0..count {
            let worker = Worker::new(id, runner.clone(), queue.clone());
            let task = worker.clone();
            handles.push(tokio::spawn(async move {
                task.run().await;
            }));
            workers.push(worker);
        }

        Self {
            workers,
            handles: Mutex::new(handles),
        }
    }

    pub fn stats(&self) -> Vec<WorkerStats> {
        self.workers.iter().map(|w| w.stats()).collect()
    }

    pub fn active_workers(&self) -> usize {
        self.workers.iter().filter(|w| w.is_running()).count()
    }

    /// Wait for workers to drain after the queue closes; abort stragglers
    /// once the grace period elapses.
    pub async fn join(&self, grace: Duration) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock().await);
        let deadline = tokio::time::Instant::now() + grace;
        for handle in handles {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match timeout(remaining, handle).await {
                Ok(_) => {}
                Err(_) => warn!("worker did not stop within the grace period"),
            }
        }
    }
}
