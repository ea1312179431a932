use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::AcquireError;

use crate::job::JobStatus;

#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    #[error("invalid request: {message}")]
    Validation { code: &'static str, message: String },

    #[error("no browser context became available within {0:?}")]
    PoolExhausted(Duration),

    #[error("browser launch failed: {0}")]
    LaunchFailed(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("capture failed: {0}")]
    Capture(String),

    #[error("artifact upload failed: {0}")]
    Upload(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid status transition from {from:?} to {to:?}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("pipeline is shutting down")]
    ShuttingDown,

    #[error("IO error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl CaptureError {
    /// Retryable errors are eligible for the queue's dispatch backoff only;
    /// a job that already reached PROCESSING finalizes on first failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CaptureError::PoolExhausted(_)
                | CaptureError::Navigation(_)
                | CaptureError::Io(_)
                | CaptureError::ShuttingDown
        )
    }

    /// Machine-readable code for the wire error body.
    pub fn code(&self) -> &'static str {
        match self {
            CaptureError::Validation { code, .. } => code,
            CaptureError::PoolExhausted(_) => "pool_exhausted",
            CaptureError::LaunchFailed(_) => "launch_failed",
            CaptureError::Navigation(_) => "navigation_error",
            CaptureError::Capture(_) => "capture_error",
            CaptureError::Upload(_) => "upload_error",
            CaptureError::NotFound(_) => "not_found",
            CaptureError::InvalidTransition { .. } => "invalid_state",
            CaptureError::ShuttingDown => "shutting_down",
            CaptureError::Io(_) => "io_error",
            CaptureError::Serialization(_) => "serialization_error",
        }
    }

    /// Status code an HTTP embedder should answer with. Validation failures
    /// are client errors, unknown ids are 404, exhaustion is 503; everything
    /// else surfaces as a plain 500 carrying the stored error string.
    pub fn http_status(&self) -> u16 {
        match self {
            CaptureError::Validation { .. } => 400,
            CaptureError::NotFound(_) => 404,
            CaptureError::InvalidTransition { .. } => 409,
            CaptureError::PoolExhausted(_) | CaptureError::ShuttingDown => 503,
            _ => 500,
        }
    }

    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        CaptureError::Validation {
            code,
            message: message.into(),
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            success: false,
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.to_string(),
            },
        }
    }
}

/// Wire shape for failed responses: `{success: false, error: {code, message}}`.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl From<AcquireError> for CaptureError {
    fn from(_: AcquireError) -> Self {
        CaptureError::ShuttingDown
    }
}

impl From<std::io::Error> for CaptureError {
    fn from(err: std::io::Error) -> Self {
        CaptureError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for CaptureError {
    fn from(err: serde_json::Error) -> Self {
        CaptureError::Serialization(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failures: usize,
    last_failure: Option<Instant>,
}

/// Circuit breaker around browser launches. A storm of `LaunchFailed`
/// (missing binary, fd exhaustion) opens the breaker so acquires fail fast
/// instead of stacking launch attempts that cannot succeed.
#[derive(Debug)]
pub struct LaunchBreaker {
    inner: std::sync::Mutex<BreakerInner>,
    failure_threshold: usize,
    cooldown: Duration,
}

impl LaunchBreaker {
    pub fn new(failure_threshold: usize, cooldown: Duration) -> Self {
        Self {
            inner: std::sync::Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failures: 0,
                last_failure: None,
            }),
            failure_threshold,
            cooldown,
        }
    }

    pub fn can_launch(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => match inner.last_failure {
                Some(at) if at.elapsed() > self.cooldown => {
                    inner.state = BreakerState::HalfOpen;
                    true
                }
                _ => false,
            },
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = BreakerState::Closed;
        inner.failures = 0;
        inner.last_failure = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.failures += 1;
        inner.last_failure = Some(Instant::now());
        if inner.failures >= self.failure_threshold {
            inner.state = BreakerState::Open;
        }
    }

    pub fn failure_count(&self) -> usize {
        self.inner.lock().unwrap().failures
    }
}
