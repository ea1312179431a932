//! # Capture Pipeline
//!
//! The capture subsystem of a screenshot/PDF rendering service: a bounded
//! pool of headless Chrome processes with reusable execution contexts, and
//! asynchronous workers that lease those contexts to satisfy capture jobs
//! with strict lifecycle, failure, and resource-release guarantees.
//!
//! ## Architecture
//!
//! - [`BrowserPool`] owns the browser processes and arbitrates context
//!   leases under a capacity ceiling of `max_browsers * max_contexts_per_browser`.
//! - [`CaptureExecutor`] drives a leased context through navigation, wait
//!   strategies, resource blocking, and rendering.
//! - [`JobQueue`] decouples intake from execution with priority and delayed
//!   entries; [`WorkerPool`] consumers turn each job into exactly one
//!   terminal state.
//! - [`CaptureService`] is the facade intake code talks to: validate and
//!   submit, read status, cancel, retry, clean up, shut down.
//!
//! Job records and rendered bytes live behind the [`JobStore`] and
//! [`ArtifactStore`] traits; in-memory and filesystem implementations ship
//! with the crate.
//!
//! ## Guarantees
//!
//! - Statuses move forward only: `PENDING → PROCESSING → COMPLETED | FAILED`,
//!   with `FAILED → PENDING` reserved for the administrative retry.
//! - Every lease is released exactly once, after the terminal status write,
//!   on success and failure paths alike; double release is a guarded no-op.
//! - At every instant, leased contexts never exceed the configured capacity.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use capture_pipeline::{
//!     CaptureRequest, CaptureService, Config, InMemoryArtifactStore, InMemoryJobStore,
//!     Submission,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = CaptureService::new(
//!         Config::default(),
//!         Arc::new(InMemoryJobStore::new()),
//!         Arc::new(InMemoryArtifactStore::new()),
//!     )
//!     .await?;
//!
//!     let request = CaptureRequest::for_url("https://example.com");
//!     match service.submit("account-1", request).await? {
//!         Submission::Finished(job) => println!("terminal status: {:?}", job.status),
//!         Submission::Queued(id) => println!("queued as {id}"),
//!     }
//!
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```

/// Pipeline configuration and capture request types
pub mod config;

/// Error taxonomy and launch circuit breaker
pub mod error;

/// Bounded browser/context pool
pub mod browser_pool;

/// Capture execution against a leased context
pub mod executor;

/// Job records and the job record store
pub mod job;

/// Artifact storage
pub mod artifact;

/// Priority/delay job queue
pub mod queue;

/// Worker pool and per-job state machine
pub mod worker;

/// Intake and orchestration facade
pub mod service;

/// Metrics collection
pub mod metrics;

/// Command-line interface
pub mod cli;

/// Shared helpers: resource blocklists, artifact keys, formatting
pub mod utils;

#[cfg(test)]
mod tests;

pub use artifact::{ArtifactStore, FsArtifactStore, InMemoryArtifactStore};
pub use browser_pool::{BrowserPool, ContextHandle, ContextOptions, PoolHealth, PoolStats};
pub use cli::{setup_logging, Cli, CliRunner, Commands};
pub use config::{
    browser_config, chrome_args, CaptureRequest, ClipRegion, Config, CookieSpec, OutputFormat,
    OutputKind, PdfOptions, RetryPolicy, Viewport, WaitOptions, WaitStrategy,
};
pub use error::{CaptureError, ErrorBody, ErrorDetail, LaunchBreaker};
pub use executor::{CaptureExecutor, CaptureOutput};
pub use job::{ArtifactRef, CaptureMeta, InMemoryJobStore, Job, JobStatus, JobStore};
pub use metrics::{Metrics, PrometheusExporter};
pub use queue::{EnqueueOptions, JobQueue, QueueLease, QueueStats};
pub use service::{CaptureService, ServiceStats, Submission};
pub use utils::{artifact_key, content_type_for_extension, count_pdf_pages, BlockList};
pub use worker::{JobRunner, Worker, WorkerPool, WorkerStats};
