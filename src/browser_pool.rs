//! Browser pool management for concurrent capture jobs
//!
//! A bounded set of Chrome processes, each owning a set of reusable execution
//! contexts (pages). Jobs lease a context, drive it, and release it exactly
//! once; the pool enforces the capacity ceiling, recycles aged resources
//! lazily, and drains cleanly on shutdown.
//!
//! Ownership is arena-and-index: a browser owns its context ids, a context
//! holds only the id of its browser, so teardown order is always contexts
//! first, then the process.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chromiumoxide::browser::Browser;
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{browser_config, Config, Viewport};
use crate::error::{CaptureError, LaunchBreaker};

const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const ALLOCATION_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Desired context configuration passed to `acquire`.
///
/// Viewport and user agent are applied per job by the executor, so any idle
/// context satisfies any options; they are recorded on the lease for
/// diagnostics.
#[derive(Debug, Clone, Default)]
pub struct ContextOptions {
    pub viewport: Option<Viewport>,
    pub user_agent: Option<String>,
}

#[derive(Debug)]
struct BrowserEntry {
    created_at: Instant,
    /// Contexts created over the browser's lifetime
    contexts_created: u64,
    context_ids: HashSet<Uuid>,
    needs_recycle: bool,
}

#[derive(Debug)]
struct ContextEntry {
    browser_id: Uuid,
    created_at: Instant,
    /// Leases served by this context
    use_count: u64,
}

#[derive(Debug, Clone, Copy)]
struct ContextLimits {
    max_uses: u64,
    max_age: Duration,
}

#[derive(Debug, PartialEq, Eq)]
enum ReleaseOutcome {
    /// Context returned to the available set
    Returned,
    /// Context destroyed instead of returned; replacement is lazy
    Retired,
    /// Unknown or already-released id; accounting untouched
    NotLeased,
}

#[derive(Debug, Default)]
struct LeaseResult {
    leased: Option<Uuid>,
    /// Idle contexts belonging to recycle-flagged browsers, destroyed on the way
    destroyed: Vec<Uuid>,
}

/// Pure accounting for the pool. All mutation happens under the pool mutex,
/// which serializes acquire/release bookkeeping and preserves the capacity
/// invariant `active <= total <= max_browsers * max_contexts_per_browser`.
#[derive(Debug, Default)]
struct PoolLedger {
    browsers: HashMap<Uuid, BrowserEntry>,
    contexts: HashMap<Uuid, ContextEntry>,
    available: VecDeque<Uuid>,
    leased: HashSet<Uuid>,
    launching: usize,
    total_leases: u64,
}

impl PoolLedger {
    fn register_browser(&mut self) -> Uuid {
        let id = Uuid::new_v4();
        self.browsers.insert(
            id,
            BrowserEntry {
                created_at: Instant::now(),
                contexts_created: 0,
                context_ids: HashSet::new(),
                needs_recycle: false,
            },
        );
        id
    }

    /// Create a context on `browser_id` and lease it immediately.
    fn register_context(&mut self, browser_id: Uuid) -> Option<Uuid> {
        let browser = self.browsers.get_mut(&browser_id)?;
        let id = Uuid::new_v4();
        browser.contexts_created += 1;
        browser.context_ids.insert(id);
        self.contexts.insert(
            id,
            ContextEntry {
                browser_id,
                created_at: Instant::now(),
                use_count: 1,
            },
        );
        self.leased.insert(id);
        self.total_leases += 1;
        Some(id)
    }

    /// Lease the oldest available context, discarding idle contexts that
    /// belong to recycle-flagged browsers.
    fn lease_available(&mut self) -> LeaseResult {
        let mut result = LeaseResult::default();
        while let Some(id) = self.available.pop_front() {
            let Some(ctx) = self.contexts.get_mut(&id) else {
                continue;
            };
            let flagged = self
                .browsers
                .get(&ctx.browser_id)
                .map(|b| b.needs_recycle)
                .unwrap_or(true);
            if flagged {
                self.remove_context(id);
                result.destroyed.push(id);
                continue;
            }
            ctx.use_count += 1;
            self.leased.insert(id);
            self.total_leases += 1;
            result.leased = Some(id);
            break;
        }
        result
    }

    /// First healthy browser with spare context capacity.
    fn spare_browser(&self, max_contexts_per_browser: usize) -> Option<Uuid> {
        self.browsers
            .iter()
            .filter(|(_, b)| !b.needs_recycle && b.context_ids.len() < max_contexts_per_browser)
            .min_by_key(|(_, b)| b.context_ids.len())
            .map(|(id, _)| *id)
    }

    fn release(&mut self, id: Uuid, limits: ContextLimits) -> ReleaseOutcome {
        if !self.leased.remove(&id) {
            return ReleaseOutcome::NotLeased;
        }
        let Some(ctx) = self.contexts.get(&id) else {
            return ReleaseOutcome::NotLeased;
        };
        let worn_out =
            ctx.use_count >= limits.max_uses || ctx.created_at.elapsed() >= limits.max_age;
        if worn_out {
            self.remove_context(id);
            ReleaseOutcome::Retired
        } else {
            self.available.push_back(id);
            ReleaseOutcome::Returned
        }
    }

    fn remove_context(&mut self, id: Uuid) {
        if let Some(ctx) = self.contexts.remove(&id) {
            if let Some(browser) = self.browsers.get_mut(&ctx.browser_id) {
                browser.context_ids.remove(&id);
            }
        }
        self.leased.remove(&id);
    }

    fn flag_browser(&mut self, id: Uuid) {
        if let Some(browser) = self.browsers.get_mut(&id) {
            browser.needs_recycle = true;
        }
    }

    fn flag_overdue_browsers(&mut self, max_age: Duration, max_uses: u64) {
        for browser in self.browsers.values_mut() {
            if browser.created_at.elapsed() >= max_age || browser.contexts_created >= max_uses {
                browser.needs_recycle = true;
            }
        }
    }

    /// Flagged browsers with no leased contexts, safe to tear down now.
    fn reapable_browsers(&self) -> Vec<Uuid> {
        self.browsers
            .iter()
            .filter(|(_, b)| b.needs_recycle && b.context_ids.is_disjoint(&self.leased))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Remove a browser and all its contexts; returns the context ids removed.
    fn remove_browser(&mut self, id: Uuid) -> Vec<Uuid> {
        let Some(browser) = self.browsers.remove(&id) else {
            return Vec::new();
        };
        let removed: Vec<Uuid> = browser.context_ids.into_iter().collect();
        for ctx_id in &removed {
            self.contexts.remove(ctx_id);
            self.leased.remove(ctx_id);
        }
        self.available.retain(|ctx_id| !removed.contains(ctx_id));
        removed
    }

    fn active_count(&self) -> usize {
        self.leased.len()
    }

    fn browser_count(&self) -> usize {
        self.browsers.len()
    }

    fn clear(&mut self) {
        self.browsers.clear();
        self.contexts.clear();
        self.available.clear();
        self.leased.clear();
    }

    fn snapshot(&self) -> PoolStats {
        let total_browsers = self.browsers.len();
        let active_browsers = self
            .browsers
            .values()
            .filter(|b| !b.context_ids.is_disjoint(&self.leased))
            .count();
        let total_contexts = self.contexts.len();
        PoolStats {
            total_browsers,
            active_browsers,
            total_contexts,
            active_contexts: self.leased.len(),
            average_contexts_per_browser: if total_browsers > 0 {
                total_contexts as f64 / total_browsers as f64
            } else {
                0.0
            },
            oldest_browser_age: self
                .browsers
                .values()
                .map(|b| b.created_at.elapsed())
                .max(),
            total_usage_count: self.total_leases,
        }
    }
}

/// Read-only pool snapshot. Never waits on capacity.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub total_browsers: usize,
    pub active_browsers: usize,
    pub total_contexts: usize,
    pub active_contexts: usize,
    pub average_contexts_per_browser: f64,
    #[serde(skip)]
    pub oldest_browser_age: Option<Duration>,
    pub total_usage_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolHealth {
    pub healthy: bool,
    pub issues: Vec<String>,
}

struct BrowserProc {
    browser: Arc<Mutex<Browser>>,
    handler: JoinHandle<()>,
}

struct PoolInner {
    ledger: PoolLedger,
    pages: HashMap<Uuid, Page>,
    procs: HashMap<Uuid, BrowserProc>,
    next_instance: usize,
}

/// Bounded pool of browser processes and their reusable contexts.
///
/// Browsers launch lazily as demand exceeds spare capacity, up to
/// `max_browsers`. When all capacity is leased, `acquire` suspends until a
/// release or the acquisition timeout.
pub struct BrowserPool {
    inner: Arc<Mutex<PoolInner>>,
    permits: Arc<Semaphore>,
    config: Config,
    breaker: Arc<LaunchBreaker>,
    shutting_down: Arc<AtomicBool>,
}

impl BrowserPool {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PoolInner {
                ledger: PoolLedger::default(),
                pages: HashMap::new(),
                procs: HashMap::new(),
                next_instance: 0,
            })),
            permits: Arc::new(Semaphore::new(config.pool_capacity())),
            breaker: Arc::new(LaunchBreaker::new(5, Duration::from_secs(30))),
            shutting_down: Arc::new(AtomicBool::new(false)),
            config,
        }
    }

    /// Lease a context. Reuses an idle context when one exists, otherwise
    /// creates one on a browser with spare capacity, otherwise launches a new
    /// browser. Suspends when every slot is leased; fails with
    /// `PoolExhausted` if nothing frees up within the acquisition timeout.
    pub async fn acquire(&self, options: ContextOptions) -> Result<ContextHandle, CaptureError> {
        if self.shutting_down.load(Ordering::Relaxed) {
            return Err(CaptureError::ShuttingDown);
        }

        let permit = timeout(
            self.config.acquire_timeout,
            self.permits.clone().acquire_owned(),
        )
        .await
        .map_err(|_| CaptureError::PoolExhausted(self.config.acquire_timeout))??;

        let deadline = Instant::now() + self.config.acquire_timeout;

        loop {
            self.reap_flagged_browsers().await;

            // Reuse an idle context when one exists.
            let reuse = {
                let mut inner = self.inner.lock().await;
                let result = inner.ledger.lease_available();
                for dead in &result.destroyed {
                    if let Some(page) = inner.pages.remove(dead) {
                        spawn_close_page(page);
                    }
                }
                result.leased.map(|id| (id, inner.pages.get(&id).cloned()))
            };
            if let Some((ctx_id, page)) = reuse {
                match page {
                    Some(page) => {
                        debug!(context_id = %ctx_id, "reusing pooled context");
                        permit.forget();
                        return Ok(ContextHandle::new(page, ctx_id, self.clone(), options));
                    }
                    None => {
                        // Accounting drift; drop the orphaned record and retry.
                        warn!(context_id = %ctx_id, "context had no page, discarding");
                        self.inner.lock().await.ledger.remove_context(ctx_id);
                        continue;
                    }
                }
            }

            // Spare capacity on an existing browser?
            let spare = {
                let inner = self.inner.lock().await;
                inner
                    .ledger
                    .spare_browser(self.config.max_contexts_per_browser)
                    .and_then(|id| inner.procs.get(&id).map(|p| (id, p.browser.clone())))
            };
            if let Some((browser_id, browser)) = spare {
                let created = browser.lock().await.new_page("about:blank").await;
                match created {
                    Ok(page) => {
                        let mut inner = self.inner.lock().await;
                        match inner.ledger.register_context(browser_id) {
                            Some(ctx_id) => {
                                inner.pages.insert(ctx_id, page.clone());
                                debug!(context_id = %ctx_id, browser_id = %browser_id, "created context");
                                permit.forget();
                                return Ok(ContextHandle::new(page, ctx_id, self.clone(), options));
                            }
                            None => {
                                // Browser recycled while we were creating the page.
                                drop(inner);
                                spawn_close_page(page);
                            }
                        }
                    }
                    Err(e) => {
                        warn!(browser_id = %browser_id, "context creation failed: {e}, flagging browser");
                        self.inner.lock().await.ledger.flag_browser(browser_id);
                    }
                }
                if Instant::now() >= deadline {
                    return Err(CaptureError::PoolExhausted(self.config.acquire_timeout));
                }
                continue;
            }

            // Launch a new browser when below the process ceiling.
            let launch_slot = {
                let mut inner = self.inner.lock().await;
                if inner.ledger.browser_count() + inner.ledger.launching < self.config.max_browsers
                {
                    inner.ledger.launching += 1;
                    let instance = inner.next_instance;
                    inner.next_instance += 1;
                    Some(instance)
                } else {
                    None
                }
            };
            if let Some(instance) = launch_slot {
                if !self.breaker.can_launch() {
                    self.inner.lock().await.ledger.launching -= 1;
                    return Err(CaptureError::LaunchFailed(
                        "launch breaker open after repeated failures".to_string(),
                    ));
                }
                match self.launch_browser(instance).await {
                    Ok((browser, handler)) => {
                        self.breaker.record_success();
                        let mut inner = self.inner.lock().await;
                        inner.ledger.launching -= 1;
                        let browser_id = inner.ledger.register_browser();
                        inner.procs.insert(
                            browser_id,
                            BrowserProc {
                                browser: Arc::new(Mutex::new(browser)),
                                handler,
                            },
                        );
                        info!(browser_id = %browser_id, instance, "browser launched");
                        // Next pass finds the spare capacity we just added.
                        continue;
                    }
                    Err(e) => {
                        self.breaker.record_failure();
                        self.inner.lock().await.ledger.launching -= 1;
                        error!("browser launch failed: {e}");
                        return Err(e);
                    }
                }
            }

            // Capacity exists (we hold a permit) but another task is mid-launch
            // or mid-create; yield briefly and retry.
            if Instant::now() >= deadline {
                return Err(CaptureError::PoolExhausted(self.config.acquire_timeout));
            }
            sleep(ALLOCATION_RETRY_DELAY).await;
        }
    }

    async fn launch_browser(
        &self,
        instance: usize,
    ) -> Result<(Browser, JoinHandle<()>), CaptureError> {
        let launch_config = browser_config(&self.config, instance)?;
        let (browser, mut handler) = Browser::launch(launch_config)
            .await
            .map_err(|e| CaptureError::LaunchFailed(e.to_string()))?;

        // The CDP handler is a stream that must be polled for the lifetime of
        // the browser process.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("browser handler error: {e}");
                }
            }
            debug!("browser handler stream ended");
        });

        Ok((browser, handler_task))
    }

    /// Return a context to the pool. Idempotent-safe: releasing an unknown or
    /// already-released id is a logged no-op and never corrupts accounting.
    pub async fn release(&self, context_id: Uuid) {
        let limits = ContextLimits {
            max_uses: self.config.max_context_uses,
            max_age: self.config.max_context_age,
        };
        let (outcome, page) = {
            let mut inner = self.inner.lock().await;
            let outcome = inner.ledger.release(context_id, limits);
            let page = if outcome == ReleaseOutcome::Retired {
                inner.pages.remove(&context_id)
            } else {
                None
            };
            inner
                .ledger
                .flag_overdue_browsers(self.config.max_browser_age, self.config.max_browser_uses);
            (outcome, page)
        };

        match outcome {
            ReleaseOutcome::NotLeased => {
                warn!(context_id = %context_id, "release of unknown or already-released context ignored");
            }
            ReleaseOutcome::Returned => {
                debug!(context_id = %context_id, "context returned to pool");
                self.permits.add_permits(1);
            }
            ReleaseOutcome::Retired => {
                debug!(context_id = %context_id, "context retired at threshold");
                if let Some(page) = page {
                    spawn_close_page(page);
                }
                self.permits.add_permits(1);
            }
        }
    }

    /// Tear down recycle-flagged browsers that have no leased contexts.
    async fn reap_flagged_browsers(&self) {
        let reaped: Vec<(Uuid, BrowserProc, Vec<Page>)> = {
            let mut inner = self.inner.lock().await;
            let ids = inner.ledger.reapable_browsers();
            let mut out = Vec::with_capacity(ids.len());
            for id in ids {
                let ctx_ids = inner.ledger.remove_browser(id);
                let pages = ctx_ids
                    .iter()
                    .filter_map(|ctx_id| inner.pages.remove(ctx_id))
                    .collect();
                if let Some(proc) = inner.procs.remove(&id) {
                    out.push((id, proc, pages));
                }
            }
            out
        };

        for (id, proc, pages) in reaped {
            info!(browser_id = %id, "recycling browser");
            // Contexts first, then the process.
            for page in pages {
                spawn_close_page(page);
            }
            if let Err(e) = proc.browser.lock().await.close().await {
                debug!(browser_id = %id, "browser close during recycle: {e}");
            }
            proc.handler.abort();
        }
    }

    /// Snapshot of pool accounting. Never blocks on capacity.
    pub async fn stats(&self) -> PoolStats {
        self.inner.lock().await.ledger.snapshot()
    }

    /// Probe each browser for responsiveness. Unresponsive browsers are
    /// flagged for lazy recycling, never torn down from inside the check.
    pub async fn check_health(&self) -> PoolHealth {
        let probes: Vec<(Uuid, Arc<Mutex<Browser>>)> = {
            let inner = self.inner.lock().await;
            inner
                .procs
                .iter()
                .map(|(id, proc)| (*id, proc.browser.clone()))
                .collect()
        };

        let mut issues = Vec::new();
        let mut flagged = Vec::new();
        for (id, browser) in probes {
            let probe = timeout(HEALTH_PROBE_TIMEOUT, async {
                browser.lock().await.version().await
            })
            .await;
            match probe {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    issues.push(format!("browser {id} failed version probe: {e}"));
                    flagged.push(id);
                }
                Err(_) => {
                    issues.push(format!(
                        "browser {id} unresponsive after {HEALTH_PROBE_TIMEOUT:?}"
                    ));
                    flagged.push(id);
                }
            }
        }

        if !flagged.is_empty() {
            let mut inner = self.inner.lock().await;
            for id in flagged {
                inner.ledger.flag_browser(id);
            }
        }

        PoolHealth {
            healthy: issues.is_empty(),
            issues,
        }
    }

    /// Drain the pool: refuse new acquires, wait for in-flight leases up to
    /// the grace period, then close every browser.
    pub async fn shutdown(&self) {
        info!("shutting down browser pool");
        self.shutting_down.store(true, Ordering::Relaxed);

        let deadline = Instant::now() + self.config.shutdown_grace;
        loop {
            let active = self.inner.lock().await.ledger.active_count();
            if active == 0 {
                break;
            }
            if Instant::now() >= deadline {
                warn!(active, "shutdown grace elapsed with leases outstanding");
                break;
            }
            sleep(Duration::from_millis(100)).await;
        }

        let procs: Vec<BrowserProc> = {
            let mut inner = self.inner.lock().await;
            inner.ledger.clear();
            inner.pages.clear();
            inner.procs.drain().map(|(_, proc)| proc).collect()
        };
        for proc in procs {
            if let Err(e) = proc.browser.lock().await.close().await {
                debug!("browser close during shutdown: {e}");
            }
            proc.handler.abort();
        }

        info!("browser pool shutdown complete");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Relaxed)
    }
}

impl Clone for BrowserPool {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            permits: self.permits.clone(),
            config: self.config.clone(),
            breaker: self.breaker.clone(),
            shutting_down: self.shutting_down.clone(),
        }
    }
}

fn spawn_close_page(page: Page) {
    tokio::spawn(async move {
        if let Err(e) = page.close().await {
            debug!("page close: {e}");
        }
    });
}

/// A leased context. Release it explicitly after the job's terminal status
/// write; dropping without releasing spawns the release as a backstop so a
/// lease can never leak.
pub struct ContextHandle {
    page: Page,
    context_id: Uuid,
    pool: BrowserPool,
    #[allow(dead_code)]
    options: ContextOptions,
    released: bool,
}

impl ContextHandle {
    fn new(page: Page, context_id: Uuid, pool: BrowserPool, options: ContextOptions) -> Self {
        Self {
            page,
            context_id,
            pool,
            options,
            released: false,
        }
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn context_id(&self) -> Uuid {
        self.context_id
    }

    pub async fn release(mut self) {
        self.released = true;
        let pool = self.pool.clone();
        let id = self.context_id;
        pool.release(id).await;
    }
}

impl Drop for ContextHandle {
    fn drop(&mut self) {
        if !self.released {
            let pool = self.pool.clone();
            let id = self.context_id;
            tokio::spawn(async move {
                pool.release(id).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ContextLimits {
        ContextLimits {
            max_uses: 3,
            max_age: Duration::from_secs(3600),
        }
    }

    #[test]
    fn ledger_lease_and_release_are_symmetric() {
        let mut ledger = PoolLedger::default();
        let browser = ledger.register_browser();
        let ctx = ledger.register_context(browser).unwrap();
        assert_eq!(ledger.active_count(), 1);

        assert_eq!(ledger.release(ctx, limits()), ReleaseOutcome::Returned);
        assert_eq!(ledger.active_count(), 0);

        let leased = ledger.lease_available();
        assert_eq!(leased.leased, Some(ctx));
        assert_eq!(ledger.active_count(), 1);
        assert_eq!(ledger.release(ctx, limits()), ReleaseOutcome::Returned);
        assert_eq!(ledger.total_leases, 2);
    }

    #[test]
    fn ledger_double_release_is_guarded() {
        let mut ledger = PoolLedger::default();
        let browser = ledger.register_browser();
        let ctx = ledger.register_context(browser).unwrap();

        assert_eq!(ledger.release(ctx, limits()), ReleaseOutcome::Returned);
        // Second release must not double-count available capacity.
        assert_eq!(ledger.release(ctx, limits()), ReleaseOutcome::NotLeased);
        assert_eq!(ledger.available.len(), 1);

        // Unknown ids are equally harmless.
        assert_eq!(
            ledger.release(Uuid::new_v4(), limits()),
            ReleaseOutcome::NotLeased
        );
        assert_eq!(ledger.available.len(), 1);
    }

    #[test]
    fn ledger_retires_worn_contexts() {
        let mut ledger = PoolLedger::default();
        let browser = ledger.register_browser();
        let ctx = ledger.register_context(browser).unwrap();

        // Two more leases push use_count to the threshold of 3.
        assert_eq!(ledger.release(ctx, limits()), ReleaseOutcome::Returned);
        assert_eq!(ledger.lease_available().leased, Some(ctx));
        assert_eq!(ledger.release(ctx, limits()), ReleaseOutcome::Returned);
        assert_eq!(ledger.lease_available().leased, Some(ctx));
        assert_eq!(ledger.release(ctx, limits()), ReleaseOutcome::Retired);

        assert!(ledger.contexts.is_empty());
        assert!(ledger.available.is_empty());
        // Replacement is lazy: nothing is created until next demand.
        assert_eq!(ledger.browsers[&browser].context_ids.len(), 0);
    }

    #[test]
    fn ledger_capacity_invariant_holds() {
        let max_browsers = 2;
        let per_browser = 3;
        let mut ledger = PoolLedger::default();
        let mut leased = Vec::new();

        for _ in 0..max_browsers {
            let b = ledger.register_browser();
            for _ in 0..per_browser {
                leased.push(ledger.register_context(b).unwrap());
            }
        }

        assert_eq!(ledger.active_count(), max_browsers * per_browser);
        let stats = ledger.snapshot();
        assert!(stats.active_contexts <= stats.total_contexts);
        assert!(stats.total_contexts <= max_browsers * per_browser);
        assert!(ledger.spare_browser(per_browser).is_none());

        for ctx in leased {
            ledger.release(ctx, limits());
        }
        assert_eq!(ledger.active_count(), 0);
        assert_eq!(ledger.snapshot().total_usage_count, 6);
    }

    #[test]
    fn ledger_skips_flagged_browsers_on_lease() {
        let mut ledger = PoolLedger::default();
        let stale = ledger.register_browser();
        let fresh = ledger.register_browser();
        let stale_ctx = ledger.register_context(stale).unwrap();
        let fresh_ctx = ledger.register_context(fresh).unwrap();
        ledger.release(stale_ctx, limits());
        ledger.release(fresh_ctx, limits());

        ledger.flag_browser(stale);
        let result = ledger.lease_available();
        assert_eq!(result.leased, Some(fresh_ctx));
        assert_eq!(result.destroyed, vec![stale_ctx]);
        assert!(ledger.spare_browser(8) == Some(fresh));
    }

    #[test]
    fn ledger_reaps_only_idle_flagged_browsers() {
        let mut ledger = PoolLedger::default();
        let busy = ledger.register_browser();
        let idle = ledger.register_browser();
        let _busy_ctx = ledger.register_context(busy).unwrap();
        let idle_ctx = ledger.register_context(idle).unwrap();
        ledger.release(idle_ctx, limits());

        ledger.flag_browser(busy);
        ledger.flag_browser(idle);

        let reapable = ledger.reapable_browsers();
        assert_eq!(reapable, vec![idle]);

        let removed = ledger.remove_browser(idle);
        assert_eq!(removed, vec![idle_ctx]);
        assert!(ledger.available.is_empty());
        assert_eq!(ledger.browser_count(), 1);
    }
}
