//! Job records and the job record store
//!
//! A job is one capture request plus its lifecycle record. Statuses only move
//! forward (`PENDING → PROCESSING → COMPLETED | FAILED`); the sole backward
//! transition is the administrative retry, which resets a FAILED job to
//! PENDING with cleared error and result fields.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{CaptureRequest, OutputFormat};
use crate::error::CaptureError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Reference to a stored artifact, populated on COMPLETED only.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRef {
    /// Key in the artifact store
    pub key: String,
    /// Time-limited retrieval URL
    pub url: String,
    pub size_bytes: usize,
    /// Documents only
    pub page_count: Option<u32>,
}

/// Capture metadata echoed alongside the result.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureMeta {
    pub format: OutputFormat,
    pub duration_ms: u64,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    pub account_id: String,
    pub request: CaptureRequest,
    pub status: JobStatus,
    pub artifact: Option<ArtifactRef>,
    pub capture_meta: Option<CaptureMeta>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(account_id: impl Into<String>, request: CaptureRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id: account_id.into(),
            request,
            status: JobStatus::Pending,
            artifact: None,
            capture_meta: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Job record store consumed by the pipeline.
///
/// Only the worker that owns a job mutates it, so implementations need no
/// cross-writer conflict handling beyond the status transition guards.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: Job) -> Result<Job, CaptureError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Job>, CaptureError>;

    /// `PENDING → PROCESSING`. Rejects any other source state.
    async fn mark_processing(&self, id: Uuid) -> Result<(), CaptureError>;

    /// `PROCESSING → COMPLETED`, recording the artifact and capture metadata.
    async fn mark_completed(
        &self,
        id: Uuid,
        artifact: ArtifactRef,
        meta: CaptureMeta,
    ) -> Result<(), CaptureError>;

    /// `PENDING | PROCESSING → FAILED`. PENDING is allowed so a queued job
    /// can be finalized by an explicit cancel.
    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), CaptureError>;

    /// `FAILED → PENDING`, clearing error and result fields. The only
    /// backward transition, reserved for the administrative retry.
    async fn reset_for_retry(&self, id: Uuid) -> Result<(), CaptureError>;

    async fn find_pending(&self, limit: usize) -> Result<Vec<Job>, CaptureError>;

    async fn delete(&self, id: Uuid) -> Result<(), CaptureError>;

    /// Remove terminal jobs older than the retention window; returns the
    /// number deleted.
    async fn cleanup_old(&self, retention: Duration) -> Result<usize, CaptureError>;
}

/// In-memory store used by tests and single-node deployments.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: DashMap<Uuid, Job>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            jobs: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: Job) -> Result<Job, CaptureError> {
        self.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Job>, CaptureError> {
        Ok(self.jobs.get(&id).map(|j| j.value().clone()))
    }

    async fn mark_processing(&self, id: Uuid) -> Result<(), CaptureError> {
        let mut job = self
            .jobs
            .get_mut(&id)
            .ok_or_else(|| CaptureError::NotFound(format!("job {id}")))?;
        if job.status != JobStatus::Pending {
            return Err(CaptureError::InvalidTransition {
                from: job.status,
                to: JobStatus::Processing,
            });
        }
        job.status = JobStatus::Processing;
        Ok(())
    }

    async fn mark_completed(
        &self,
        id: Uuid,
        artifact: ArtifactRef,
        meta: CaptureMeta,
    ) -> Result<(), CaptureError> {
        let mut job = self
            .jobs
            .get_mut(&id)
            .ok_or_else(|| CaptureError::NotFound(format!("job {id}")))?;
        if job.status != JobStatus::Processing {
            return Err(CaptureError::InvalidTransition {
                from: job.status,
                to: JobStatus::Completed,
            });
        }
        job.status = JobStatus::Completed;
        job.artifact = Some(artifact);
        job.capture_meta = Some(meta);
        job.error = None;
        job.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), CaptureError> {
        let mut job = self
            .jobs
            .get_mut(&id)
            .ok_or_else(|| CaptureError::NotFound(format!("job {id}")))?;
        if job.status.is_terminal() {
            return Err(CaptureError::InvalidTransition {
                from: job.status,
                to: JobStatus::Failed,
            });
        }
        job.status = JobStatus::Failed;
        job.error = Some(error.to_string());
        job.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn reset_for_retry(&self, id: Uuid) -> Result<(), CaptureError> {
        let mut job = self
            .jobs
            .get_mut(&id)
            .ok_or_else(|| CaptureError::NotFound(format!("job {id}")))?;
        if job.status != JobStatus::Failed {
            return Err(CaptureError::InvalidTransition {
                from: job.status,
                to: JobStatus::Pending,
            });
        }
        job.status = JobStatus::Pending;
        job.error = None;
        job.artifact = None;
        job.capture_meta = None;
        job.completed_at = None;
        Ok(())
    }

    async fn find_pending(&self, limit: usize) -> Result<Vec<Job>, CaptureError> {
        let mut pending: Vec<Job> = self
            .jobs
            .iter()
            .filter(|entry| entry.value().status == JobStatus::Pending)
            .map(|entry| entry.value().clone())
            .collect();
        pending.sort_by_key(|j| j.created_at);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn delete(&self, id: Uuid) -> Result<(), CaptureError> {
        self.jobs
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| CaptureError::NotFound(format!("job {id}")))
    }

    async fn cleanup_old(&self, retention: Duration) -> Result<usize, CaptureError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(retention)
                .map_err(|e| CaptureError::Io(e.to_string()))?;
        let stale: Vec<Uuid> = self
            .jobs
            .iter()
            .filter(|entry| {
                let job = entry.value();
                job.status.is_terminal() && job.completed_at.map(|t| t < cutoff).unwrap_or(false)
            })
            .map(|entry| entry.value().id)
            .collect();
        let count = stale.len();
        for id in stale {
            self.jobs.remove(&id);
        }
        Ok(count)
    }
}
