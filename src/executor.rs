//! Capture execution against a leased browser context
//!
//! Given a leased context and a validated request, the executor applies the
//! per-job environment (viewport, user agent, headers, cookies, resource
//! blocking), navigates with the requested wait strategy, and renders either
//! a screenshot or a PDF, returning raw bytes plus capture metadata.

use std::time::{Duration, Instant};

use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::fetch::{self, EventRequestPaused};
use chromiumoxide::cdp::browser_protocol::network::{
    ClearBrowserCookiesParams, CookieParam, EnableParams as NetworkEnableParams, ErrorReason,
    Headers, SetExtraHttpHeadersParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, PrintToPdfParams, Viewport as CdpViewport,
};
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::debug;

use crate::browser_pool::ContextHandle;
use crate::config::{CaptureRequest, Config, OutputFormat, PdfOptions, WaitStrategy};
use crate::error::CaptureError;
use crate::utils::{count_pdf_pages, BlockList};

const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(200);
const NETWORK_IDLE_SETTLE: Duration = Duration::from_millis(500);
const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Raw render result handed back to the worker.
#[derive(Debug, Clone)]
pub struct CaptureOutput {
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
    /// Documents only
    pub page_count: Option<u32>,
    pub duration: Duration,
}

/// Drives one leased context through navigation and rendering.
pub struct CaptureExecutor {
    config: Config,
}

impl CaptureExecutor {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub async fn capture(
        &self,
        handle: &ContextHandle,
        request: &CaptureRequest,
    ) -> Result<CaptureOutput, CaptureError> {
        let started = Instant::now();
        let page = handle.page();

        self.apply_environment(page, request).await?;

        let blocklist = BlockList::parse(&request.block_resources)?;
        let guard = if blocklist.is_empty() {
            None
        } else {
            Some(self.install_blocking(page, blocklist).await?)
        };

        debug!(context_id = %handle.context_id(), "navigating");
        let rendered = match self.navigate(page, request).await {
            Ok(()) => {
                debug!(context_id = %handle.context_id(), "capturing");
                self.render(page, request).await
            }
            Err(e) => Err(e),
        };

        if let Some(guard) = guard {
            self.teardown_blocking(page, guard).await;
        }
        self.reset_context(page).await;

        rendered.map(|(bytes, page_count)| CaptureOutput {
            bytes,
            format: request.format,
            page_count,
            duration: started.elapsed(),
        })
    }

    /// Viewport, user agent, extra headers, and cookies, in that order.
    /// Failures surface verbatim and fail the job.
    async fn apply_environment(
        &self,
        page: &Page,
        request: &CaptureRequest,
    ) -> Result<(), CaptureError> {
        let viewport = request.viewport.as_ref().unwrap_or(&self.config.viewport);
        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(i64::from(viewport.width))
            .height(i64::from(viewport.height))
            .device_scale_factor(viewport.device_scale_factor)
            .mobile(viewport.mobile)
            .build()
            .map_err(CaptureError::Capture)?;
        page.execute(metrics)
            .await
            .map_err(|e| CaptureError::Capture(format!("viewport override failed: {e}")))?;

        if let Some(user_agent) = request
            .user_agent
            .as_ref()
            .or(self.config.user_agent.as_ref())
        {
            page.set_user_agent(user_agent.as_str())
                .await
                .map_err(|e| CaptureError::Capture(format!("user agent override failed: {e}")))?;
        }

        if !request.headers.is_empty() {
            page.execute(NetworkEnableParams::default())
                .await
                .map_err(|e| CaptureError::Capture(format!("network enable failed: {e}")))?;
            let map: serde_json::Map<String, serde_json::Value> = request
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            let params = SetExtraHttpHeadersParams::builder()
                .headers(Headers::new(serde_json::Value::Object(map)))
                .build()
                .map_err(CaptureError::Capture)?;
            page.execute(params)
                .await
                .map_err(|e| CaptureError::Capture(format!("extra headers failed: {e}")))?;
        }

        if !request.cookies.is_empty() {
            let mut cookies = Vec::with_capacity(request.cookies.len());
            for spec in &request.cookies {
                let mut builder = CookieParam::builder()
                    .name(&spec.name)
                    .value(&spec.value);
                if let Some(url) = &spec.url {
                    builder = builder.url(url);
                }
                if let Some(domain) = &spec.domain {
                    builder = builder.domain(domain);
                }
                if let Some(path) = &spec.path {
                    builder = builder.path(path);
                }
                cookies.push(builder.build().map_err(CaptureError::Capture)?);
            }
            page.set_cookies(cookies)
                .await
                .map_err(|e| CaptureError::Capture(format!("cookie install failed: {e}")))?;
        }

        Ok(())
    }

    /// Enable Fetch-domain interception; a listener task aborts requests
    /// whose resource type is blocked and continues everything else
    /// unmodified.
    async fn install_blocking(
        &self,
        page: &Page,
        blocklist: BlockList,
    ) -> Result<InterceptGuard, CaptureError> {
        let mut events = page
            .event_listener::<EventRequestPaused>()
            .await
            .map_err(|e| CaptureError::Capture(format!("interception listener failed: {e}")))?;
        page.execute(fetch::EnableParams::default())
            .await
            .map_err(|e| CaptureError::Capture(format!("interception enable failed: {e}")))?;

        let page = page.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                resolve_paused_request(&page, &event, &blocklist).await;
            }
        });
        Ok(InterceptGuard { task })
    }

    async fn teardown_blocking(&self, page: &Page, guard: InterceptGuard) {
        if let Err(e) = page.execute(fetch::DisableParams::default()).await {
            debug!("interception disable: {e}");
        }
        guard.task.abort();
    }

    /// Navigate under the request timeout, then honor the optional fixed
    /// delay and selector wait.
    async fn navigate(&self, page: &Page, request: &CaptureRequest) -> Result<(), CaptureError> {
        let target = match (&request.url, &request.html) {
            (Some(url), _) => url.clone(),
            (None, Some(html)) => format!(
                "data:text/html;charset=utf-8,{}",
                urlencoding::encode(html)
            ),
            (None, None) => {
                return Err(CaptureError::Navigation("no navigation target".to_string()))
            }
        };

        let nav_timeout = Duration::from_millis(request.wait.timeout_ms);
        let strategy = request.wait.wait_until;
        let navigation = async {
            page.goto(target.as_str())
                .await
                .map_err(|e| CaptureError::Navigation(e.to_string()))?;
            match strategy {
                WaitStrategy::DomContentLoaded => {}
                WaitStrategy::Load => {
                    page.wait_for_navigation()
                        .await
                        .map_err(|e| CaptureError::Navigation(e.to_string()))?;
                }
                WaitStrategy::NetworkIdle => {
                    page.wait_for_navigation()
                        .await
                        .map_err(|e| CaptureError::Navigation(e.to_string()))?;
                    sleep(NETWORK_IDLE_SETTLE).await;
                }
            }
            Ok::<(), CaptureError>(())
        };
        timeout(nav_timeout, navigation).await.map_err(|_| {
            CaptureError::Navigation(format!(
                "navigation timed out after {}ms",
                request.wait.timeout_ms
            ))
        })??;

        if let Some(delay_ms) = request.wait.delay_ms {
            sleep(Duration::from_millis(delay_ms)).await;
        }

        if let Some(selector) = &request.wait.selector {
            self.wait_for_selector(
                page,
                selector,
                Duration::from_millis(request.wait.selector_timeout_ms),
            )
            .await?;
        }

        Ok(())
    }

    async fn wait_for_selector(
        &self,
        page: &Page,
        selector: &str,
        bound: Duration,
    ) -> Result<(), CaptureError> {
        let deadline = Instant::now() + bound;
        loop {
            if page.find_element(selector).await.is_ok() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(CaptureError::Navigation(format!(
                    "selector `{selector}` did not appear within {}ms",
                    bound.as_millis()
                )));
            }
            sleep(SELECTOR_POLL_INTERVAL).await;
        }
    }

    async fn render(
        &self,
        page: &Page,
        request: &CaptureRequest,
    ) -> Result<(Vec<u8>, Option<u32>), CaptureError> {
        match request.format {
            OutputFormat::Pdf => {
                let bytes = self.render_pdf(page, &request.pdf).await?;
                let pages = count_pdf_pages(&bytes);
                Ok((bytes, Some(pages)))
            }
            _ => {
                let bytes = self.render_image(page, request).await?;
                Ok((bytes, None))
            }
        }
    }

    async fn render_pdf(&self, page: &Page, opts: &PdfOptions) -> Result<Vec<u8>, CaptureError> {
        let mut builder = PrintToPdfParams::builder()
            .landscape(opts.landscape)
            .print_background(opts.print_background)
            .display_header_footer(opts.display_header_footer)
            .prefer_css_page_size(opts.prefer_css_page_size);
        if let Some(template) = &opts.header_template {
            builder = builder.header_template(template);
        }
        if let Some(template) = &opts.footer_template {
            builder = builder.footer_template(template);
        }
        if let Some(margin) = opts.margin_top {
            builder = builder.margin_top(margin);
        }
        if let Some(margin) = opts.margin_bottom {
            builder = builder.margin_bottom(margin);
        }
        if let Some(margin) = opts.margin_left {
            builder = builder.margin_left(margin);
        }
        if let Some(margin) = opts.margin_right {
            builder = builder.margin_right(margin);
        }
        if let Some(ranges) = &opts.page_ranges {
            builder = builder.page_ranges(ranges);
        }
        if let Some(scale) = opts.scale {
            builder = builder.scale(scale);
        }
        if let Some(width) = opts.paper_width {
            builder = builder.paper_width(width);
        }
        if let Some(height) = opts.paper_height {
            builder = builder.paper_height(height);
        }

        page.pdf(builder.build())
            .await
            .map_err(|e| CaptureError::Capture(e.to_string()))
    }

    /// Capture PNG through the browser, then re-encode for JPEG/WebP output.
    async fn render_image(
        &self,
        page: &Page,
        request: &CaptureRequest,
    ) -> Result<Vec<u8>, CaptureError> {
        let mut builder = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(request.full_page)
            .omit_background(request.omit_background);
        if let Some(clip) = &request.clip {
            let region = CdpViewport::builder()
                .x(clip.x)
                .y(clip.y)
                .width(clip.width)
                .height(clip.height)
                .scale(1.0)
                .build()
                .map_err(CaptureError::Capture)?;
            builder = builder.clip(region);
        }

        let png = page
            .screenshot(builder.build())
            .await
            .map_err(|e| CaptureError::Capture(e.to_string()))?;

        self.encode_image(png, request.format, request.quality)
    }

    fn encode_image(
        &self,
        png: Vec<u8>,
        format: OutputFormat,
        quality: Option<u8>,
    ) -> Result<Vec<u8>, CaptureError> {
        match format {
            OutputFormat::Png => Ok(png),
            OutputFormat::Jpeg => {
                let img = image::load_from_memory(&png)
                    .map_err(|e| CaptureError::Capture(e.to_string()))?;
                // JPEG has no alpha channel; flatten before encoding.
                let rgb = img.to_rgb8();
                let mut out = std::io::Cursor::new(Vec::new());
                let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(
                    &mut out,
                    quality.unwrap_or(DEFAULT_JPEG_QUALITY),
                );
                encoder
                    .encode_image(&rgb)
                    .map_err(|e| CaptureError::Capture(e.to_string()))?;
                Ok(out.into_inner())
            }
            OutputFormat::Webp => {
                let img = image::load_from_memory(&png)
                    .map_err(|e| CaptureError::Capture(e.to_string()))?;
                let mut out = Vec::new();
                img.write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::WebP)
                    .map_err(|e| CaptureError::Capture(e.to_string()))?;
                Ok(out)
            }
            OutputFormat::Pdf => Err(CaptureError::Capture(
                "pdf output has no image encoding".to_string(),
            )),
        }
    }

    /// Best-effort quiesce so a reused context does not leak per-job state.
    async fn reset_context(&self, page: &Page) {
        if let Err(e) = page.execute(ClearBrowserCookiesParams::default()).await {
            debug!("cookie clear on reset: {e}");
        }
        if let Err(e) = page.goto("about:blank").await {
            debug!("blank navigation on reset: {e}");
        }
    }
}

struct InterceptGuard {
    task: JoinHandle<()>,
}

async fn resolve_paused_request(page: &Page, event: &EventRequestPaused, blocked: &BlockList) {
    if blocked.blocks(&event.resource_type) {
        debug!(url = %event.request.url, kind = ?event.resource_type, "aborting blocked request");
        match fetch::FailRequestParams::builder()
            .request_id(event.request_id.clone())
            .error_reason(ErrorReason::BlockedByClient)
            .build()
        {
            Ok(params) => {
                if let Err(e) = page.execute(params).await {
                    debug!("request abort: {e}");
                }
            }
            Err(e) => debug!("request abort params: {e}"),
        }
    } else {
        match fetch::ContinueRequestParams::builder()
            .request_id(event.request_id.clone())
            .build()
        {
            Ok(params) => {
                if let Err(e) = page.execute(params).await {
                    debug!("request continue: {e}");
                }
            }
            Err(e) => debug!("request continue params: {e}"),
        }
    }
}
