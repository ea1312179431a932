//! Intake and orchestration for the capture pipeline
//!
//! `CaptureService` wires the browser pool, queue, executor, and workers
//! together, and is the only entry point intake code needs: validate and
//! submit, read status, cancel, retry, clean up, shut down.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::artifact::ArtifactStore;
use crate::browser_pool::{BrowserPool, PoolHealth, PoolStats};
use crate::config::{CaptureRequest, Config};
use crate::error::CaptureError;
use crate::job::{Job, JobStatus, JobStore};
use crate::metrics::Metrics;
use crate::queue::{EnqueueOptions, JobQueue, QueueStats};
use crate::worker::{JobRunner, WorkerPool, WorkerStats};

/// Result of a submission call.
#[derive(Debug)]
pub enum Submission {
    /// Asynchronous mode: the job id, retrievable via `get_job`.
    Queued(Uuid),
    /// Synchronous mode: the terminal job record, COMPLETED or FAILED.
    Finished(Box<Job>),
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub pool: PoolStats,
    pub queue: QueueStats,
    pub workers: Vec<WorkerStats>,
}

pub struct CaptureService {
    config: Config,
    pool: BrowserPool,
    queue: Arc<JobQueue>,
    store: Arc<dyn JobStore>,
    artifacts: Arc<dyn ArtifactStore>,
    runner: JobRunner,
    workers: WorkerPool,
    metrics: Arc<Metrics>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl CaptureService {
    /// Build the pipeline. Browsers launch lazily on first demand, so
    /// construction is cheap and never touches Chrome.
    pub async fn new(
        config: Config,
        store: Arc<dyn JobStore>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Result<Self, CaptureError> {
        let pool = BrowserPool::new(config.clone());
        let queue = Arc::new(JobQueue::new());
        let metrics = Arc::new(Metrics::new());
        let runner = JobRunner::new(
            config.clone(),
            pool.clone(),
            store.clone(),
            artifacts.clone(),
            queue.clone(),
            metrics.clone(),
        );
        let workers = WorkerPool::start(config.worker_count, runner.clone(), queue.clone());

        let sweeper = {
            let store = store.clone();
            let retention = config.retention;
            let every = config.cleanup_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(every);
                ticker.tick().await; // immediate first tick
                loop {
                    ticker.tick().await;
                    match store.cleanup_old(retention).await {
                        Ok(0) => {}
                        Ok(removed) => info!(removed, "retention sweep removed terminal jobs"),
                        Err(e) => warn!("retention sweep failed: {e}"),
                    }
                }
            })
        };

        Ok(Self {
            config,
            pool,
            queue,
            store,
            artifacts,
            runner,
            workers,
            metrics,
            sweeper: Mutex::new(Some(sweeper)),
        })
    }

    /// Validate and submit one capture request.
    ///
    /// Validation failures reject the request before any job record exists.
    /// In synchronous mode the call drives the full pipeline inline and
    /// returns the terminal record; in asynchronous mode it enqueues and
    /// returns the job id immediately.
    pub async fn submit(
        &self,
        account_id: &str,
        request: CaptureRequest,
    ) -> Result<Submission, CaptureError> {
        self.submit_with_options(account_id, request, EnqueueOptions::default())
            .await
    }

    /// Like [`submit`](Self::submit), with queue priority and delay for the
    /// asynchronous path.
    pub async fn submit_with_options(
        &self,
        account_id: &str,
        request: CaptureRequest,
        options: EnqueueOptions,
    ) -> Result<Submission, CaptureError> {
        request.validate()?;
        if self.pool.is_shutting_down() {
            return Err(CaptureError::ShuttingDown);
        }

        let job = self.store.create(Job::new(account_id, request)).await?;
        let job_id = job.id;
        debug!(%job_id, account_id, "job created");

        if job.request.asynchronous {
            self.queue.enqueue(job_id, options).await;
            self.metrics
                .set_queue_depth(self.queue.stats().await.waiting);
            Ok(Submission::Queued(job_id))
        } else {
            self.runner.run_job(job_id, 0).await;
            let job = self
                .store
                .find_by_id(job_id)
                .await?
                .ok_or_else(|| CaptureError::NotFound(format!("job {job_id}")))?;
            Ok(Submission::Finished(Box::new(job)))
        }
    }

    pub async fn get_job(&self, id: Uuid) -> Result<Job, CaptureError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| CaptureError::NotFound(format!("job {id}")))
    }

    /// Best-effort cancel. A still-queued job is removed and finalized
    /// FAILED; a job already leased by a worker only has future requeues
    /// suppressed, and the in-flight browser operation is not interrupted.
    pub async fn cancel_job(&self, id: Uuid) -> Result<Job, CaptureError> {
        let job = self.get_job(id).await?;
        match job.status {
            JobStatus::Pending => {
                let removed = self.queue.cancel(id).await;
                if !removed {
                    debug!(%id, "cancel raced the queue; job was not waiting");
                }
                self.store.mark_failed(id, "canceled before execution").await?;
                self.get_job(id).await
            }
            JobStatus::Processing => {
                self.queue.cancel(id).await;
                self.get_job(id).await
            }
            status => Err(CaptureError::InvalidTransition {
                from: status,
                to: JobStatus::Failed,
            }),
        }
    }

    /// Administrative retry: only valid against a FAILED job. Resets the
    /// record to PENDING with cleared error/result fields and re-enqueues.
    pub async fn retry_job(&self, id: Uuid) -> Result<Job, CaptureError> {
        let job = self.get_job(id).await?;
        if job.status != JobStatus::Failed {
            return Err(CaptureError::InvalidTransition {
                from: job.status,
                to: JobStatus::Pending,
            });
        }
        self.store.reset_for_retry(id).await?;
        self.queue.enqueue(id, EnqueueOptions::default()).await;
        info!(%id, "job reset for retry and re-enqueued");
        self.get_job(id).await
    }

    /// Explicit delete: removes the record and, best-effort, the artifact.
    pub async fn delete_job(&self, id: Uuid) -> Result<(), CaptureError> {
        let job = self.get_job(id).await?;
        if let Some(artifact) = &job.artifact {
            if let Err(e) = self.artifacts.delete(&artifact.key).await {
                debug!(%id, "artifact delete during job delete: {e}");
            }
        }
        self.store.delete(id).await
    }

    /// Run the retention sweep now; returns the number of jobs removed.
    pub async fn cleanup_old(&self) -> Result<usize, CaptureError> {
        self.store.cleanup_old(self.config.retention).await
    }

    /// Re-enqueue PENDING jobs from the record store, used once at startup
    /// to recover work that was queued when the previous process stopped.
    pub async fn reseed_pending(&self) -> Result<usize, CaptureError> {
        let pending = self.store.find_pending(1000).await?;
        let count = pending.len();
        for job in pending {
            self.queue.enqueue(job.id, EnqueueOptions::default()).await;
        }
        if count > 0 {
            info!(count, "re-seeded pending jobs into the queue");
        }
        Ok(count)
    }

    pub async fn stats(&self) -> ServiceStats {
        let pool = self.pool.stats().await;
        let queue = self.queue.stats().await;
        self.metrics
            .record_pool_utilization(pool.active_contexts, self.config.pool_capacity());
        self.metrics.set_queue_depth(queue.waiting);
        ServiceStats {
            pool,
            queue,
            workers: self.workers.stats(),
        }
    }

    pub async fn check_health(&self) -> PoolHealth {
        self.pool.check_health().await
    }

    pub fn pool(&self) -> &BrowserPool {
        &self.pool
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn artifacts(&self) -> &Arc<dyn ArtifactStore> {
        &self.artifacts
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Drain: close the queue, join workers, stop the sweeper, then drain
    /// the browser pool.
    pub async fn shutdown(&self) {
        info!("shutting down capture service");
        self.queue.close().await;
        self.workers
            .join(self.config.shutdown_grace + Duration::from_secs(1))
            .await;
        if let Some(handle) = self.sweeper.lock().await.take() {
            handle.abort();
        }
        self.pool.shutdown().await;
        info!("capture service shutdown complete");
    }
}
