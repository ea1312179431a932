use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::fs;
use tracing::{info, warn};

use crate::artifact::{ArtifactStore, InMemoryArtifactStore};
use crate::config::{CaptureRequest, Config, OutputFormat, Viewport, WaitStrategy};
use crate::job::{InMemoryJobStore, JobStatus};
use crate::service::{CaptureService, Submission};
use crate::utils::{format_bytes, format_duration};

#[derive(Parser)]
#[command(name = "capture-pipeline")]
#[command(about = "Headless-browser capture pipeline: screenshots and PDFs")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, help = "Configuration file path (JSON)")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Maximum browser processes in the pool")]
    pub max_browsers: Option<usize>,

    #[arg(long, help = "Number of concurrent workers")]
    pub workers: Option<usize>,

    #[arg(long, help = "Navigation timeout in seconds")]
    pub timeout: Option<u64>,

    #[arg(long, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(long, help = "Chrome executable path")]
    pub chrome_path: Option<String>,

    #[arg(long, help = "Expose Prometheus metrics on this port")]
    pub metrics_port: Option<u16>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Capture a single URL synchronously
    Single {
        #[arg(short, long, help = "URL to capture")]
        url: String,

        #[arg(short, long, help = "Output file path")]
        output: PathBuf,

        #[arg(long, help = "Output format (png, jpeg, webp, pdf)")]
        format: Option<String>,

        #[arg(long, help = "Viewport width")]
        width: Option<u32>,

        #[arg(long, help = "Viewport height")]
        height: Option<u32>,

        #[arg(long, help = "Capture the full page height")]
        full_page: bool,

        #[arg(long, help = "Wait strategy (load, dom-content-loaded, network-idle)")]
        wait_until: Option<String>,

        #[arg(long, help = "Post-navigation delay in milliseconds")]
        delay: Option<u64>,

        #[arg(long, help = "CSS selector to wait for before capture")]
        selector: Option<String>,

        #[arg(long, help = "JPEG/WebP quality (1-100)")]
        quality: Option<u8>,

        #[arg(long, help = "Resource types to block, e.g. --block image --block font")]
        block: Vec<String>,
    },

    /// Capture URLs from a file through the queue and worker pool
    Batch {
        #[arg(short, long, help = "Input file containing URLs (one per line)")]
        input: PathBuf,

        #[arg(short, long, help = "Output directory")]
        output: PathBuf,

        #[arg(long, help = "Output format (png, jpeg, webp, pdf)")]
        format: Option<String>,

        #[arg(long, help = "Capture full pages")]
        full_page: bool,

        #[arg(long, default_value = "600", help = "Overall batch timeout in seconds")]
        batch_timeout: u64,
    },

    /// Show pool, queue, and worker statistics
    Health {
        #[arg(long, help = "Probe browser responsiveness too")]
        probe: bool,
    },

    /// Validate a configuration file
    Validate {
        #[arg(short, long, help = "Configuration file to validate")]
        config: PathBuf,
    },
}

pub struct CliRunner {
    pub config: Config,
    pub service: Arc<CaptureService>,
    artifacts: Arc<InMemoryArtifactStore>,
}

impl CliRunner {
    pub async fn new(mut config: Config, args: &Cli) -> Result<Self, Box<dyn std::error::Error>> {
        if let Some(max_browsers) = args.max_browsers {
            config.max_browsers = max_browsers;
        }
        if let Some(workers) = args.workers {
            config.worker_count = workers;
        }
        if let Some(timeout) = args.timeout {
            config.navigation_timeout = Duration::from_secs(timeout);
        }
        if let Some(chrome_path) = &args.chrome_path {
            config.chrome_path = Some(chrome_path.clone());
        }

        let store = Arc::new(InMemoryJobStore::new());
        let artifacts = Arc::new(InMemoryArtifactStore::new());
        let service =
            Arc::new(CaptureService::new(config.clone(), store, artifacts.clone()).await?);

        Ok(Self {
            config,
            service,
            artifacts,
        })
    }

    pub async fn run(&self, command: Commands) -> Result<(), Box<dyn std::error::Error>> {
        match command {
            Commands::Single {
                url,
                output,
                format,
                width,
                height,
                full_page,
                wait_until,
                delay,
                selector,
                quality,
                block,
            } => {
                let mut request = CaptureRequest::for_url(url);
                request.format = parse_format(format.as_deref());
                request.full_page = full_page;
                request.quality = quality;
                request.block_resources = block;
                request.wait.wait_until = parse_wait_strategy(wait_until.as_deref());
                request.wait.timeout_ms = self.config.navigation_timeout.as_millis() as u64;
                request.wait.delay_ms = delay;
                request.wait.selector = selector;
                if width.is_some() || height.is_some() {
                    request.viewport = Some(Viewport {
                        width: width.unwrap_or(self.config.viewport.width),
                        height: height.unwrap_or(self.config.viewport.height),
                        ..self.config.viewport.clone()
                    });
                }
                self.run_single(request, output).await
            }
            Commands::Batch {
                input,
                output,
                format,
                full_page,
                batch_timeout,
            } => {
                self.run_batch(
                    input,
                    output,
                    parse_format(format.as_deref()),
                    full_page,
                    Duration::from_secs(batch_timeout),
                )
                .await
            }
            Commands::Health { probe } => self.show_health(probe).await,
            Commands::Validate { config } => self.validate_config(config).await,
        }
    }

    async fn run_single(
        &self,
        request: CaptureRequest,
        output: PathBuf,
    ) -> Result<(), Box<dyn std::error::Error>> {
        info!("capturing {}", request.url.as_deref().unwrap_or("<html>"));

        let submission = self.service.submit("cli", request).await?;
        let job = match submission {
            Submission::Finished(job) => job,
            Submission::Queued(_) => unreachable!("sync submission returned a queued job"),
        };

        match job.status {
            JobStatus::Completed => {
                let Some(artifact) = job.artifact.as_ref() else {
                    return Err("completed job is missing its artifact reference".into());
                };
                let bytes = self.artifacts.download(&artifact.key).await?;
                if let Some(parent) = output.parent() {
                    fs::create_dir_all(parent).await?;
                }
                fs::write(&output, &bytes).await?;

                println!("Capture completed:");
                println!("  Output: {}", output.display());
                println!("  Size: {}", format_bytes(artifact.size_bytes));
                if let Some(pages) = artifact.page_count {
                    println!("  Pages: {pages}");
                }
                if let Some(meta) = &job.capture_meta {
                    println!(
                        "  Duration: {}",
                        format_duration(Duration::from_millis(meta.duration_ms))
                    );
                }
                Ok(())
            }
            _ => {
                let error = job.error.clone().unwrap_or_else(|| "unknown error".into());
                Err(format!("capture failed: {error}").into())
            }
        }
    }

    async fn run_batch(
        &self,
        input: PathBuf,
        output: PathBuf,
        format: OutputFormat,
        full_page: bool,
        batch_timeout: Duration,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let urls = self.read_urls_from_file(&input).await?;
        info!("loaded {} URLs from {}", urls.len(), input.display());
        fs::create_dir_all(&output).await?;

        let mut job_ids = Vec::with_capacity(urls.len());
        for url in &urls {
            let mut request = CaptureRequest::for_url(url.clone());
            request.format = format;
            request.full_page = full_page;
            request.wait.timeout_ms = self.config.navigation_timeout.as_millis() as u64;
            request.asynchronous = true;
            match self.service.submit("cli", request).await? {
                Submission::Queued(id) => job_ids.push((url.clone(), id)),
                Submission::Finished(_) => unreachable!("async submission finished inline"),
            }
        }

        // Poll the record store until every job reaches a terminal state.
        let deadline = tokio::time::Instant::now() + batch_timeout;
        let mut remaining: Vec<(String, uuid::Uuid)> = job_ids.clone();
        while !remaining.is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(500)).await;
            let mut still_running = Vec::new();
            for (url, id) in remaining {
                let job = self.service.get_job(id).await?;
                if job.status.is_terminal() {
                    continue;
                }
                still_running.push((url, id));
            }
            remaining = still_running;
        }
        if !remaining.is_empty() {
            warn!("{} jobs still running at the batch timeout", remaining.len());
        }

        let mut completed = 0usize;
        let mut failed = 0usize;
        for (index, (url, id)) in job_ids.iter().enumerate() {
            let job = self.service.get_job(*id).await?;
            match (&job.status, &job.artifact) {
                (JobStatus::Completed, Some(artifact)) => {
                    let bytes = self.artifacts.download(&artifact.key).await?;
                    let name = format!("{:04}-{}.{}", index, host_slug(url), format.extension());
                    fs::write(output.join(&name), &bytes).await?;
                    completed += 1;
                }
                _ => {
                    warn!(
                        "capture of {url} failed: {}",
                        job.error.as_deref().unwrap_or("still running")
                    );
                    failed += 1;
                }
            }
        }

        println!("Batch finished. Completed: {completed}, Failed: {failed}");
        Ok(())
    }

    async fn show_health(&self, probe: bool) -> Result<(), Box<dyn std::error::Error>> {
        let stats = self.service.stats().await;

        println!("Browser Pool:");
        println!("  Browsers: {}", stats.pool.total_browsers);
        println!("  Active browsers: {}", stats.pool.active_browsers);
        println!("  Contexts: {}", stats.pool.total_contexts);
        println!("  Active contexts: {}", stats.pool.active_contexts);
        println!(
            "  Avg contexts/browser: {:.2}",
            stats.pool.average_contexts_per_browser
        );
        if let Some(age) = stats.pool.oldest_browser_age {
            println!("  Oldest browser: {}", format_duration(age));
        }
        println!("  Total leases: {}", stats.pool.total_usage_count);

        println!("\nQueue:");
        println!("  Waiting: {}", stats.queue.waiting);
        println!("  Delayed: {}", stats.queue.delayed);
        println!("  Active: {}", stats.queue.active);
        println!("  Completed: {}", stats.queue.completed);
        println!("  Failed: {}", stats.queue.failed);

        println!("\nWorkers:");
        for worker in &stats.workers {
            println!(
                "  Worker {}: running={}, completed={}, errors={}",
                worker.id, worker.is_running, worker.processed_count, worker.error_count
            );
        }

        if probe {
            let health = self.service.check_health().await;
            println!("\nBrowser probes: healthy={}", health.healthy);
            for issue in &health.issues {
                println!("  issue: {issue}");
            }
        }

        Ok(())
    }

    async fn validate_config(&self, path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
        let content = fs::read_to_string(&path).await?;
        let config: Config = serde_json::from_str(&content)?;

        println!("Configuration is valid:");
        println!("  Max browsers: {}", config.max_browsers);
        println!(
            "  Contexts per browser: {}",
            config.max_contexts_per_browser
        );
        println!("  Pool capacity: {}", config.pool_capacity());
        println!("  Workers: {}", config.worker_count);
        println!("  Acquire timeout: {:?}", config.acquire_timeout);
        println!(
            "  Viewport: {}x{}",
            config.viewport.width, config.viewport.height
        );
        Ok(())
    }

    async fn read_urls_from_file(
        &self,
        path: &PathBuf,
    ) -> Result<Vec<String>, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path).await?;
        Ok(content
            .lines()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| line.to_string())
            .collect())
    }
}

fn parse_format(raw: Option<&str>) -> OutputFormat {
    match raw {
        Some("jpeg") | Some("jpg") => OutputFormat::Jpeg,
        Some("webp") => OutputFormat::Webp,
        Some("pdf") => OutputFormat::Pdf,
        _ => OutputFormat::Png,
    }
}

fn parse_wait_strategy(raw: Option<&str>) -> WaitStrategy {
    match raw {
        Some("dom-content-loaded") => WaitStrategy::DomContentLoaded,
        Some("network-idle") => WaitStrategy::NetworkIdle,
        _ => WaitStrategy::Load,
    }
}

fn host_slug(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.replace('.', "-")))
        .unwrap_or_else(|| "capture".to_string())
}

pub fn setup_logging(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(if verbose { "debug" } else { "info" }));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    Ok(())
}
