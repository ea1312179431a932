//! Configuration and capture request types with serde serialization/deserialization
//!
//! This module holds the pipeline configuration, the wire-level capture request
//! shapes, request validation, and the Chrome launch argument builders.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CaptureError;
use crate::utils::{validate_target_url, BlockList};

/// Main configuration for the capture pipeline
///
/// Controls pool sizing, worker concurrency, per-operation timeouts, and the
/// recycling thresholds that keep long-lived browser processes healthy.
///
/// # Examples
///
/// ```rust
/// use capture_pipeline::Config;
///
/// // Use default configuration
/// let config = Config::default();
///
/// // Create custom configuration
/// let config = Config {
///     max_browsers: 2,
///     max_contexts_per_browser: 4,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Maximum number of browser processes the pool may own (default: 4)
    pub max_browsers: usize,

    /// Maximum concurrent contexts per browser process (default: 8)
    ///
    /// The pool capacity is `max_browsers * max_contexts_per_browser`; this
    /// bounds the number of jobs that can hold a lease at any moment.
    pub max_contexts_per_browser: usize,

    /// Number of concurrent worker tasks consuming the job queue (default: CPU count, capped at 8)
    pub worker_count: usize,

    /// How long an acquire call may wait for a free context before failing
    /// with pool exhaustion (default: 30 seconds)
    pub acquire_timeout: Duration,

    /// Default navigation timeout when a request does not supply one (default: 30 seconds)
    pub navigation_timeout: Duration,

    /// Leases served by a context before it is destroyed on release instead
    /// of being returned to the pool (default: 32)
    pub max_context_uses: u64,

    /// Context age after which it is destroyed on release (default: 10 minutes)
    pub max_context_age: Duration,

    /// Browser age after which it is flagged for lazy recycling (default: 1 hour)
    pub max_browser_age: Duration,

    /// Contexts created by a browser before it is flagged for lazy recycling (default: 256)
    pub max_browser_uses: u64,

    /// Grace period shutdown waits for in-flight leases to drain (default: 10 seconds)
    pub shutdown_grace: Duration,

    /// Backoff policy for queue-level dispatch retries
    pub dispatch_retry: RetryPolicy,

    /// Lifetime of retrieval URLs issued for completed artifacts (default: 7 days)
    pub signed_url_ttl: Duration,

    /// Terminal jobs older than this are removed by the cleanup sweep (default: 7 days)
    pub retention: Duration,

    /// Interval between cleanup sweeps (default: 1 hour)
    pub cleanup_interval: Duration,

    /// Default viewport applied when a request does not supply one
    pub viewport: Viewport,

    /// Path to a Chrome/Chromium executable (default: auto-detect)
    pub chrome_path: Option<String>,

    /// Default User-Agent override (default: browser default)
    pub user_agent: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_browsers: 4,
            max_contexts_per_browser: 8,
            worker_count: num_cpus::get().min(8),
            acquire_timeout: Duration::from_secs(30),
            navigation_timeout: Duration::from_secs(30),
            max_context_uses: 32,
            max_context_age: Duration::from_secs(600),
            max_browser_age: Duration::from_secs(3600),
            max_browser_uses: 256,
            shutdown_grace: Duration::from_secs(10),
            dispatch_retry: RetryPolicy::default(),
            signed_url_ttl: Duration::from_secs(7 * 24 * 3600),
            retention: Duration::from_secs(7 * 24 * 3600),
            cleanup_interval: Duration::from_secs(3600),
            viewport: Viewport::default(),
            chrome_path: None,
            user_agent: None,
        }
    }
}

impl Config {
    pub fn pool_capacity(&self) -> usize {
        self.max_browsers * self.max_contexts_per_browser
    }
}

/// Backoff policy for queue-level dispatch retries
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let delay = Duration::from_millis(millis as u64);
        delay.min(self.max_delay)
    }
}

/// Browser viewport configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewport {
    /// Viewport width in pixels (default: 1920)
    pub width: u32,

    /// Viewport height in pixels (default: 1080)
    pub height: u32,

    /// Device pixel ratio for high-DPI emulation (default: 1.0)
    #[serde(default = "default_scale_factor")]
    pub device_scale_factor: f64,

    /// Whether to emulate a mobile device (default: false)
    #[serde(default)]
    pub mobile: bool,
}

fn default_scale_factor() -> f64 {
    1.0
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            device_scale_factor: 1.0,
            mobile: false,
        }
    }
}

/// Output formats the pipeline can render
///
/// The enum is closed: every format carries its content type and file
/// extension, so adding a format is one variant plus a render adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// PNG image - lossless, the capture-side native format
    #[default]
    Png,
    /// JPEG image - lossy, honors the request quality setting
    Jpeg,
    /// WebP image
    Webp,
    /// PDF document rendered through the browser print pipeline
    Pdf,
}

/// Coarse output class carried on the wire alongside `format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Image,
    Document,
}

impl OutputKind {
    pub fn matches(&self, format: OutputFormat) -> bool {
        match self {
            OutputKind::Image => !format.is_document(),
            OutputKind::Document => format.is_document(),
        }
    }
}

impl OutputFormat {
    pub fn kind(&self) -> OutputKind {
        if self.is_document() {
            OutputKind::Document
        } else {
            OutputKind::Image
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Webp => "image/webp",
            OutputFormat::Pdf => "application/pdf",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Webp => "webp",
            OutputFormat::Pdf => "pdf",
        }
    }

    pub fn is_document(&self) -> bool {
        matches!(self, OutputFormat::Pdf)
    }
}

/// Navigation-completion condition used before capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WaitStrategy {
    /// Wait for the load event (default)
    #[default]
    Load,
    /// Proceed as soon as navigation commits
    DomContentLoaded,
    /// Wait for load, then a short settle window with no expected traffic
    NetworkIdle,
}

/// Navigation wait options
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitOptions {
    #[serde(default)]
    pub wait_until: WaitStrategy,

    /// Navigation timeout in milliseconds (default: 30000)
    #[serde(default = "default_nav_timeout_ms", rename = "timeout")]
    pub timeout_ms: u64,

    /// Fixed post-navigation delay in milliseconds
    #[serde(default, rename = "delay")]
    pub delay_ms: Option<u64>,

    /// CSS selector to wait for after navigation
    #[serde(default)]
    pub selector: Option<String>,

    /// Bound on the selector wait in milliseconds (default: 10000)
    #[serde(default = "default_selector_timeout_ms", rename = "selectorTimeout")]
    pub selector_timeout_ms: u64,
}

fn default_nav_timeout_ms() -> u64 {
    30_000
}

fn default_selector_timeout_ms() -> u64 {
    10_000
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            wait_until: WaitStrategy::Load,
            timeout_ms: default_nav_timeout_ms(),
            delay_ms: None,
            selector: None,
            selector_timeout_ms: default_selector_timeout_ms(),
        }
    }
}

/// Capture clip rectangle, in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct ClipRegion {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Cookie installed into the context before navigation
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieSpec {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

/// Page setup for document output
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PdfOptions {
    #[serde(default)]
    pub landscape: bool,
    #[serde(default)]
    pub print_background: bool,
    #[serde(default)]
    pub display_header_footer: bool,
    #[serde(default)]
    pub header_template: Option<String>,
    #[serde(default)]
    pub footer_template: Option<String>,
    /// Margins in inches
    #[serde(default)]
    pub margin_top: Option<f64>,
    #[serde(default)]
    pub margin_bottom: Option<f64>,
    #[serde(default)]
    pub margin_left: Option<f64>,
    #[serde(default)]
    pub margin_right: Option<f64>,
    /// Page ranges, e.g. "1-3,5"
    #[serde(default)]
    pub page_ranges: Option<String>,
    /// Render scale, 0.1..=2.0
    #[serde(default)]
    pub scale: Option<f64>,
    /// Paper size in inches
    #[serde(default)]
    pub paper_width: Option<f64>,
    #[serde(default)]
    pub paper_height: Option<f64>,
    #[serde(default)]
    pub prefer_css_page_size: bool,
}

impl Default for PdfOptions {
    fn default() -> Self {
        Self {
            landscape: false,
            print_background: false,
            display_header_footer: false,
            header_template: None,
            footer_template: None,
            margin_top: None,
            margin_bottom: None,
            margin_left: None,
            margin_right: None,
            page_ranges: None,
            scale: None,
            paper_width: None,
            paper_height: None,
            prefer_css_page_size: false,
        }
    }
}

/// One validated capture request
///
/// Exactly one of `url` / `html` names the target. Every other field is
/// optional with conventional defaults, matching the wire contract.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRequest {
    #[serde(default)]
    pub url: Option<String>,

    /// Inline document rendered through a data URL
    #[serde(default)]
    pub html: Option<String>,

    /// Redundant with `format` on the wire; validated for consistency when
    /// present.
    #[serde(default)]
    pub output_kind: Option<OutputKind>,

    #[serde(default)]
    pub format: OutputFormat,

    #[serde(default)]
    pub full_page: bool,

    /// JPEG/WebP re-encode quality, 1..=100
    #[serde(default)]
    pub quality: Option<u8>,

    #[serde(default)]
    pub viewport: Option<Viewport>,

    #[serde(default)]
    pub clip: Option<ClipRegion>,

    #[serde(default)]
    pub omit_background: bool,

    #[serde(default, rename = "waitOptions")]
    pub wait: WaitOptions,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(default)]
    pub cookies: Vec<CookieSpec>,

    #[serde(default)]
    pub user_agent: Option<String>,

    /// Resource types aborted during navigation, e.g. ["image", "font"]
    #[serde(default)]
    pub block_resources: Vec<String>,

    #[serde(default)]
    pub pdf: PdfOptions,

    /// Opaque caller metadata echoed on the job record
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,

    /// POSTed the terminal job snapshot when set
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// false: the submission call returns the terminal result inline;
    /// true: the job is queued and the call returns its id immediately
    #[serde(default, rename = "async")]
    pub asynchronous: bool,
}

impl Default for CaptureRequest {
    fn default() -> Self {
        Self {
            url: None,
            html: None,
            output_kind: None,
            format: OutputFormat::Png,
            full_page: false,
            quality: None,
            viewport: None,
            clip: None,
            omit_background: false,
            wait: WaitOptions::default(),
            headers: HashMap::new(),
            cookies: Vec::new(),
            user_agent: None,
            block_resources: Vec::new(),
            pdf: PdfOptions::default(),
            metadata: None,
            webhook_url: None,
            asynchronous: false,
        }
    }
}

impl CaptureRequest {
    /// Convenience constructor for a plain URL capture.
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Schema validation applied at intake, before any job record exists.
    pub fn validate(&self) -> Result<(), CaptureError> {
        match (&self.url, &self.html) {
            (None, None) => {
                return Err(CaptureError::validation(
                    "missing_target",
                    "one of `url` or `html` is required",
                ))
            }
            (Some(_), Some(_)) => {
                return Err(CaptureError::validation(
                    "conflicting_target",
                    "`url` and `html` are mutually exclusive",
                ))
            }
            (Some(url), None) => {
                validate_target_url(url)?;
            }
            (None, Some(html)) => {
                if html.trim().is_empty() {
                    return Err(CaptureError::validation("empty_html", "`html` is empty"));
                }
            }
        }

        if let Some(kind) = self.output_kind {
            if !kind.matches(self.format) {
                return Err(CaptureError::validation(
                    "format_mismatch",
                    format!("outputKind {kind:?} does not match format {:?}", self.format),
                ));
            }
        }

        if let Some(q) = self.quality {
            if !(1..=100).contains(&q) {
                return Err(CaptureError::validation(
                    "invalid_quality",
                    format!("quality {q} is outside 1..=100"),
                ));
            }
        }

        if let Some(vp) = &self.viewport {
            if !(1..=10_000).contains(&vp.width) || !(1..=10_000).contains(&vp.height) {
                return Err(CaptureError::validation(
                    "invalid_viewport",
                    format!("viewport {}x{} is outside 1..=10000", vp.width, vp.height),
                ));
            }
            if !(0.1..=5.0).contains(&vp.device_scale_factor) {
                return Err(CaptureError::validation(
                    "invalid_viewport",
                    "deviceScaleFactor is outside 0.1..=5.0",
                ));
            }
        }

        if let Some(clip) = &self.clip {
            if clip.width <= 0.0 || clip.height <= 0.0 || clip.x < 0.0 || clip.y < 0.0 {
                return Err(CaptureError::validation(
                    "invalid_clip",
                    "clip must have positive dimensions and non-negative origin",
                ));
            }
            if self.full_page {
                return Err(CaptureError::validation(
                    "invalid_clip",
                    "`clip` and `fullPage` are mutually exclusive",
                ));
            }
        }

        if !(1_000..=120_000).contains(&self.wait.timeout_ms) {
            return Err(CaptureError::validation(
                "invalid_timeout",
                "navigation timeout must be between 1000 and 120000 ms",
            ));
        }
        if !(1_000..=120_000).contains(&self.wait.selector_timeout_ms) {
            return Err(CaptureError::validation(
                "invalid_timeout",
                "selector timeout must be between 1000 and 120000 ms",
            ));
        }
        if let Some(delay) = self.wait.delay_ms {
            if delay > 30_000 {
                return Err(CaptureError::validation(
                    "invalid_delay",
                    "post-navigation delay must not exceed 30000 ms",
                ));
            }
        }

        BlockList::parse(&self.block_resources)?;

        if let Some(scale) = self.pdf.scale {
            if !(0.1..=2.0).contains(&scale) {
                return Err(CaptureError::validation(
                    "invalid_pdf_options",
                    "pdf scale must be between 0.1 and 2.0",
                ));
            }
        }
        for margin in [
            self.pdf.margin_top,
            self.pdf.margin_bottom,
            self.pdf.margin_left,
            self.pdf.margin_right,
        ]
        .into_iter()
        .flatten()
        {
            if margin < 0.0 {
                return Err(CaptureError::validation(
                    "invalid_pdf_options",
                    "pdf margins must be non-negative",
                ));
            }
        }

        if let Some(hook) = &self.webhook_url {
            validate_target_url(hook).map_err(|_| {
                CaptureError::validation("invalid_webhook_url", format!("bad webhook url: {hook}"))
            })?;
        }

        Ok(())
    }
}

/// Generate Chrome command-line arguments for a pooled browser process
///
/// Each process gets its own user-data directory so pooled instances never
/// trip over Chrome's process-singleton checks; the DevTools port stays
/// driver-assigned.
pub fn chrome_args(config: &Config, instance: usize) -> Vec<String> {
    let unique_id = format!(
        "{}-{}-{}",
        std::process::id(),
        instance,
        uuid::Uuid::new_v4().simple()
    );

    let mut args = vec![
        "--headless".to_string(),
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
        "--disable-background-timer-throttling".to_string(),
        "--disable-backgrounding-occluded-windows".to_string(),
        "--disable-renderer-backgrounding".to_string(),
        "--disable-extensions".to_string(),
        "--disable-default-apps".to_string(),
        "--disable-sync".to_string(),
        "--no-first-run".to_string(),
        "--mute-audio".to_string(),
        "--hide-scrollbars".to_string(),
        "--ignore-certificate-errors".to_string(),
        format!(
            "--window-size={},{}",
            config.viewport.width, config.viewport.height
        ),
        format!("--user-data-dir=/tmp/capture-pipeline-{unique_id}"),
    ];

    if let Some(user_agent) = &config.user_agent {
        args.push(format!("--user-agent={user_agent}"));
    }

    args
}

/// Build the chromiumoxide launch configuration for one pool slot.
pub fn browser_config(
    config: &Config,
    instance: usize,
) -> Result<chromiumoxide::browser::BrowserConfig, CaptureError> {
    use chromiumoxide::browser::BrowserConfig;

    let mut builder = BrowserConfig::builder()
        .window_size(config.viewport.width, config.viewport.height)
        .args(chrome_args(config, instance));

    if let Some(chrome_path) = &config.chrome_path {
        builder = builder.chrome_executable(chrome_path);
    }

    builder.build().map_err(CaptureError::LaunchFailed)
}
