#[cfg(test)]
mod pipeline_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chromiumoxide::cdp::browser_protocol::network::ResourceType;
    use uuid::Uuid;

    use crate::artifact::{ArtifactStore, FsArtifactStore, InMemoryArtifactStore};
    use crate::browser_pool::ContextOptions;
    use crate::config::{
        CaptureRequest, Config, OutputFormat, OutputKind, Viewport, WaitStrategy,
    };
    use crate::error::{CaptureError, LaunchBreaker};
    use crate::job::{ArtifactRef, CaptureMeta, InMemoryJobStore, Job, JobStatus, JobStore};
    use crate::queue::{EnqueueOptions, JobQueue};
    use crate::service::{CaptureService, Submission};
    use crate::utils::{
        artifact_key, content_type_for_extension, count_pdf_pages, format_bytes, format_duration,
        BlockList,
    };

    fn test_config() -> Config {
        Config {
            max_browsers: 1,
            max_contexts_per_browser: 2,
            worker_count: 0,
            acquire_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(1),
            ..Default::default()
        }
    }

    async fn test_service() -> (
        Arc<CaptureService>,
        Arc<InMemoryJobStore>,
        Arc<InMemoryArtifactStore>,
    ) {
        let store = Arc::new(InMemoryJobStore::new());
        let artifacts = Arc::new(InMemoryArtifactStore::new());
        let service = CaptureService::new(test_config(), store.clone(), artifacts.clone())
            .await
            .expect("service construction is browser-free");
        (Arc::new(service), store, artifacts)
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.max_browsers, 4);
        assert_eq!(config.max_contexts_per_browser, 8);
        assert_eq!(config.pool_capacity(), 32);
        assert_eq!(config.acquire_timeout, Duration::from_secs(30));
        assert_eq!(config.navigation_timeout, Duration::from_secs(30));
        assert!(config.worker_count >= 1);
        assert_eq!(config.retention, Duration::from_secs(7 * 24 * 3600));
    }

    #[test]
    fn test_request_default() {
        let request = CaptureRequest::default();
        assert!(request.url.is_none());
        assert!(request.html.is_none());
        assert_eq!(request.format, OutputFormat::Png);
        assert!(!request.full_page);
        assert_eq!(request.wait.wait_until, WaitStrategy::Load);
        assert_eq!(request.wait.timeout_ms, 30_000);
        assert!(!request.asynchronous);
    }

    #[test]
    fn test_request_wire_shape() {
        let raw = r##"{
            "url": "https://example.com",
            "outputKind": "image",
            "format": "jpeg",
            "fullPage": true,
            "quality": 85,
            "waitOptions": {"waitUntil": "network-idle", "timeout": 15000, "selector": "#main"},
            "blockResources": ["image", "font"],
            "webhookUrl": "https://hooks.example.com/done",
            "async": true
        }"##;
        let request: CaptureRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(request.format, OutputFormat::Jpeg);
        assert_eq!(request.output_kind, Some(OutputKind::Image));
        assert!(request.full_page);
        assert_eq!(request.quality, Some(85));
        assert_eq!(request.wait.wait_until, WaitStrategy::NetworkIdle);
        assert_eq!(request.wait.timeout_ms, 15_000);
        assert_eq!(request.wait.selector.as_deref(), Some("#main"));
        assert_eq!(request.block_resources, vec!["image", "font"]);
        assert!(request.asynchronous);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_request_validation() {
        let missing = CaptureRequest::default();
        assert!(matches!(
            missing.validate(),
            Err(CaptureError::Validation { code: "missing_target", .. })
        ));

        let mut conflicting = CaptureRequest::for_url("https://example.com");
        conflicting.html = Some("<h1>hi</h1>".into());
        assert!(matches!(
            conflicting.validate(),
            Err(CaptureError::Validation { code: "conflicting_target", .. })
        ));

        let mut bad_scheme = CaptureRequest::for_url("ftp://example.com");
        assert!(bad_scheme.validate().is_err());
        bad_scheme.url = Some("not a url".into());
        assert!(bad_scheme.validate().is_err());

        let mut bad_quality = CaptureRequest::for_url("https://example.com");
        bad_quality.quality = Some(0);
        assert!(matches!(
            bad_quality.validate(),
            Err(CaptureError::Validation { code: "invalid_quality", .. })
        ));

        let mut bad_viewport = CaptureRequest::for_url("https://example.com");
        bad_viewport.viewport = Some(Viewport {
            width: 0,
            height: 1080,
            ..Default::default()
        });
        assert!(matches!(
            bad_viewport.validate(),
            Err(CaptureError::Validation { code: "invalid_viewport", .. })
        ));

        let mut bad_block = CaptureRequest::for_url("https://example.com");
        bad_block.block_resources = vec!["image".into(), "sorcery".into()];
        assert!(matches!(
            bad_block.validate(),
            Err(CaptureError::Validation { code: "invalid_block_resource", .. })
        ));

        let mut mismatch = CaptureRequest::for_url("https://example.com");
        mismatch.output_kind = Some(OutputKind::Document);
        assert!(matches!(
            mismatch.validate(),
            Err(CaptureError::Validation { code: "format_mismatch", .. })
        ));

        let mut bad_timeout = CaptureRequest::for_url("https://example.com");
        bad_timeout.wait.timeout_ms = 500;
        assert!(matches!(
            bad_timeout.validate(),
            Err(CaptureError::Validation { code: "invalid_timeout", .. })
        ));
    }

    #[test]
    fn test_output_format_table() {
        assert_eq!(OutputFormat::Png.content_type(), "image/png");
        assert_eq!(OutputFormat::Jpeg.content_type(), "image/jpeg");
        assert_eq!(OutputFormat::Webp.content_type(), "image/webp");
        assert_eq!(OutputFormat::Pdf.content_type(), "application/pdf");
        assert_eq!(OutputFormat::Jpeg.extension(), "jpg");
        assert!(OutputFormat::Pdf.is_document());
        assert!(!OutputFormat::Png.is_document());
        assert_eq!(OutputFormat::Pdf.kind(), OutputKind::Document);
        assert_eq!(content_type_for_extension("bin"), "application/octet-stream");
        assert_eq!(content_type_for_extension("pdf"), "application/pdf");
    }

    #[test]
    fn test_chrome_args_generation() {
        let config = Config::default();
        let args = crate::config::chrome_args(&config, 0);

        assert!(args.contains(&"--headless".to_string()));
        assert!(args.contains(&"--no-sandbox".to_string()));
        assert!(args.contains(&"--disable-gpu".to_string()));
        assert!(args.iter().any(|a| a.starts_with("--user-data-dir=")));
        assert!(args.contains(&format!(
            "--window-size={},{}",
            config.viewport.width, config.viewport.height
        )));

        // Two pool slots never share a profile directory.
        let other = crate::config::chrome_args(&config, 1);
        assert_ne!(
            args.iter().find(|a| a.starts_with("--user-data-dir=")),
            other.iter().find(|a| a.starts_with("--user-data-dir="))
        );
    }

    #[test]
    fn test_error_mapping() {
        let validation = CaptureError::validation("invalid_url", "nope");
        assert_eq!(validation.http_status(), 400);
        assert_eq!(validation.code(), "invalid_url");

        let not_found = CaptureError::NotFound("job x".into());
        assert_eq!(not_found.http_status(), 404);

        let exhausted = CaptureError::PoolExhausted(Duration::from_secs(30));
        assert_eq!(exhausted.http_status(), 503);
        assert!(exhausted.is_retryable());

        let launch = CaptureError::LaunchFailed("spawn".into());
        assert_eq!(launch.http_status(), 500);
        assert!(!launch.is_retryable());

        let body = exhausted.to_body();
        assert!(!body.success);
        assert_eq!(body.error.code, "pool_exhausted");
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["success"], false);
        assert!(json["error"]["message"].as_str().unwrap().contains("30s"));
    }

    #[test]
    fn test_launch_breaker() {
        let breaker = LaunchBreaker::new(3, Duration::from_secs(60));

        assert!(breaker.can_launch());
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.can_launch());

        breaker.record_failure();
        assert!(!breaker.can_launch());

        breaker.record_success();
        assert!(breaker.can_launch());
        assert_eq!(breaker.failure_count(), 0);
    }

    #[test]
    fn test_blocklist_matching() {
        let list = BlockList::parse(&["image".to_string(), "font".to_string()]).unwrap();
        assert!(list.blocks(&ResourceType::Image));
        assert!(list.blocks(&ResourceType::Font));
        assert!(!list.blocks(&ResourceType::Document));
        assert!(!list.blocks(&ResourceType::Script));

        assert!(BlockList::parse(&[]).unwrap().is_empty());
        assert!(BlockList::parse(&["Image".to_string()]).unwrap().blocks(&ResourceType::Image));
        assert!(BlockList::parse(&["garbage".to_string()]).is_err());
    }

    #[test]
    fn test_artifact_key_namespacing() {
        let job_id = Uuid::new_v4();
        let key = artifact_key("acct-42", job_id, "png");
        assert_eq!(key, format!("captures/acct-42/{job_id}.png"));
    }

    #[test]
    fn test_count_pdf_pages() {
        let pdf = b"%PDF-1.4\n1 0 obj << /Type /Pages /Count 3 >>\n2 0 obj << /Type /Page >>\n3 0 obj << /Type /Page >>\n4 0 obj << /Type /Page >>\n%%EOF";
        assert_eq!(count_pdf_pages(pdf), 3);
        // Not a PDF at all still reports one page rather than zero.
        assert_eq!(count_pdf_pages(b"not a pdf"), 1);
    }

    #[test]
    fn test_format_helpers() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
        assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
        assert_eq!(format_duration(Duration::from_secs(5)), "5.0s");
        assert_eq!(format_duration(Duration::from_secs(65)), "1m 5s");
        assert_eq!(format_duration(Duration::from_secs(3665)), "1h 1m 5s");
    }

    fn dummy_artifact() -> (ArtifactRef, CaptureMeta) {
        (
            ArtifactRef {
                key: "captures/a/b.png".into(),
                url: "memory://captures/a/b.png?expires=0".into(),
                size_bytes: 3,
                page_count: None,
            },
            CaptureMeta {
                format: OutputFormat::Png,
                duration_ms: 12,
                captured_at: chrono::Utc::now(),
            },
        )
    }

    #[tokio::test]
    async fn test_job_store_forward_transitions() {
        let store = InMemoryJobStore::new();
        let job = store
            .create(Job::new("acct", CaptureRequest::for_url("https://example.com")))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);

        store.mark_processing(job.id).await.unwrap();
        let (artifact, meta) = dummy_artifact();
        store.mark_completed(job.id, artifact, meta).await.unwrap();

        let done = store.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.artifact.is_some());
        assert!(done.error.is_none());
        assert!(done.completed_at.is_some());

        // No transition leaves a terminal state except the admin retry.
        assert!(store.mark_processing(job.id).await.is_err());
        assert!(store.mark_failed(job.id, "late").await.is_err());
        assert!(matches!(
            store.reset_for_retry(job.id).await,
            Err(CaptureError::InvalidTransition { from: JobStatus::Completed, .. })
        ));
    }

    #[tokio::test]
    async fn test_job_store_failure_and_retry() {
        let store = InMemoryJobStore::new();
        let job = store
            .create(Job::new("acct", CaptureRequest::for_url("https://example.com")))
            .await
            .unwrap();

        // Completion is only reachable from PROCESSING.
        let (artifact, meta) = dummy_artifact();
        assert!(store.mark_completed(job.id, artifact, meta).await.is_err());

        store.mark_processing(job.id).await.unwrap();
        store.mark_failed(job.id, "navigation failed: dns").await.unwrap();
        let failed = store.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("navigation failed: dns"));

        store.reset_for_retry(job.id).await.unwrap();
        let reset = store.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(reset.status, JobStatus::Pending);
        assert!(reset.error.is_none());
        assert!(reset.artifact.is_none());
        assert!(reset.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_job_store_cleanup() {
        let store = InMemoryJobStore::new();
        let done = store
            .create(Job::new("acct", CaptureRequest::for_url("https://example.com")))
            .await
            .unwrap();
        store.mark_processing(done.id).await.unwrap();
        store.mark_failed(done.id, "boom").await.unwrap();

        let pending = store
            .create(Job::new("acct", CaptureRequest::for_url("https://example.com")))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let removed = store.cleanup_old(Duration::ZERO).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.find_by_id(done.id).await.unwrap().is_none());
        // Non-terminal jobs are never swept.
        assert!(store.find_by_id(pending.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_queue_priority_and_fifo() {
        let queue = JobQueue::new();
        let low_a = Uuid::new_v4();
        let high = Uuid::new_v4();
        let low_b = Uuid::new_v4();

        queue.enqueue(low_a, EnqueueOptions::default()).await;
        queue
            .enqueue(
                high,
                EnqueueOptions {
                    priority: 5,
                    delay: None,
                },
            )
            .await;
        queue.enqueue(low_b, EnqueueOptions::default()).await;

        assert_eq!(queue.dequeue().await.unwrap().job_id, high);
        assert_eq!(queue.dequeue().await.unwrap().job_id, low_a);
        assert_eq!(queue.dequeue().await.unwrap().job_id, low_b);
    }

    #[tokio::test]
    async fn test_queue_delay_promotion() {
        let queue = JobQueue::new();
        let delayed = Uuid::new_v4();
        queue
            .enqueue(
                delayed,
                EnqueueOptions {
                    priority: 0,
                    delay: Some(Duration::from_millis(100)),
                },
            )
            .await;

        assert_eq!(queue.stats().await.delayed, 1);

        let start = std::time::Instant::now();
        let lease = tokio::time::timeout(Duration::from_secs(2), queue.dequeue())
            .await
            .expect("delayed entry must promote")
            .unwrap();
        assert_eq!(lease.job_id, delayed);
        assert!(start.elapsed() >= Duration::from_millis(90));
    }

    #[tokio::test]
    async fn test_queue_cancel_and_close() {
        let queue = JobQueue::new();
        let victim = Uuid::new_v4();
        let survivor = Uuid::new_v4();
        queue.enqueue(victim, EnqueueOptions::default()).await;
        queue.enqueue(survivor, EnqueueOptions::default()).await;

        assert!(queue.cancel(victim).await);
        assert_eq!(queue.stats().await.waiting, 1);
        assert_eq!(queue.dequeue().await.unwrap().job_id, survivor);

        // Cancelling a job the queue no longer holds only suppresses requeues.
        let inflight = Uuid::new_v4();
        assert!(!queue.cancel(inflight).await);
        assert!(
            !queue
                .requeue_with_backoff(inflight, 1, Duration::from_millis(1))
                .await
        );

        queue.close().await;
        assert!(queue.dequeue().await.is_none());
    }

    #[tokio::test]
    async fn test_queue_dequeue_blocks_until_enqueue() {
        let queue = Arc::new(JobQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        let id = Uuid::new_v4();
        queue.enqueue(id, EnqueueOptions::default()).await;
        let lease = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(lease.job_id, id);
    }

    #[tokio::test]
    async fn test_in_memory_artifacts() {
        let store = InMemoryArtifactStore::new();
        let key = "captures/acct/one.png";
        store
            .upload(key, vec![1, 2, 3], "image/png", None)
            .await
            .unwrap();
        assert_eq!(store.content_type_of(key).as_deref(), Some("image/png"));

        let url = store.signed_url(key, Duration::from_secs(60)).await.unwrap();
        assert!(url.starts_with("memory://captures/acct/one.png?expires="));

        assert_eq!(store.download(key).await.unwrap(), vec![1, 2, 3]);
        store.delete(key).await.unwrap();
        assert!(store.download(key).await.is_err());
        assert!(store.signed_url(key, Duration::from_secs(60)).await.is_err());
    }

    #[tokio::test]
    async fn test_fs_artifacts_roundtrip() {
        let root = std::env::temp_dir().join(format!("capture-pipeline-test-{}", Uuid::new_v4()));
        let store = FsArtifactStore::new(&root);
        let key = "captures/acct/file.pdf";

        store
            .upload(key, b"%PDF-1.4".to_vec(), "application/pdf", None)
            .await
            .unwrap();
        let url = store.signed_url(key, Duration::from_secs(60)).await.unwrap();
        assert!(url.starts_with("file://"));
        assert_eq!(store.download(key).await.unwrap(), b"%PDF-1.4".to_vec());
        store.delete(key).await.unwrap();
        assert!(store.download(key).await.is_err());

        // Keys that try to climb out of the root are rejected outright.
        assert!(store
            .upload("../escape.bin", vec![0], "application/octet-stream", None)
            .await
            .is_err());

        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_requests() {
        let (service, store, _) = test_service().await;

        let err = service
            .submit("acct", CaptureRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 400);
        // Rejected before any job record exists.
        assert!(store.is_empty());

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_async_submission_queues_job() {
        let (service, _, _) = test_service().await;

        let mut request = CaptureRequest::for_url("https://example.com");
        request.asynchronous = true;
        let id = match service.submit("acct", request).await.unwrap() {
            Submission::Queued(id) => id,
            Submission::Finished(_) => panic!("async submission must not finish inline"),
        };

        let job = service.get_job(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(service.stats().await.queue.waiting, 1);

        let unknown = service.get_job(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(unknown, CaptureError::NotFound(_)));

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_pending_job() {
        let (service, _, _) = test_service().await;

        let mut request = CaptureRequest::for_url("https://example.com");
        request.asynchronous = true;
        let Submission::Queued(id) = service.submit("acct", request).await.unwrap() else {
            panic!("expected queued submission");
        };

        let canceled = service.cancel_job(id).await.unwrap();
        assert_eq!(canceled.status, JobStatus::Failed);
        assert!(canceled.error.as_deref().unwrap().contains("canceled"));
        assert_eq!(service.stats().await.queue.waiting, 0);

        // A second cancel hits a terminal job and is rejected.
        assert!(matches!(
            service.cancel_job(id).await,
            Err(CaptureError::InvalidTransition { .. })
        ));

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_admin_retry_semantics() {
        let (service, store, _) = test_service().await;

        let mut request = CaptureRequest::for_url("https://example.com");
        request.asynchronous = true;
        let Submission::Queued(id) = service.submit("acct", request).await.unwrap() else {
            panic!("expected queued submission");
        };

        // Retry is rejected while the job is PENDING.
        assert!(matches!(
            service.retry_job(id).await,
            Err(CaptureError::InvalidTransition { from: JobStatus::Pending, .. })
        ));

        store.mark_processing(id).await.unwrap();
        // ... and while PROCESSING.
        assert!(matches!(
            service.retry_job(id).await,
            Err(CaptureError::InvalidTransition { from: JobStatus::Processing, .. })
        ));

        store.mark_failed(id, "capture failed: boom").await.unwrap();
        let waiting_before = service.stats().await.queue.waiting;
        let retried = service.retry_job(id).await.unwrap();
        assert_eq!(retried.status, JobStatus::Pending);
        assert!(retried.error.is_none());
        assert!(retried.artifact.is_none());
        assert_eq!(service.stats().await.queue.waiting, waiting_before + 1);

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_reseed_pending() {
        let (service, store, _) = test_service().await;

        for _ in 0..3 {
            store
                .create(Job::new("acct", CaptureRequest::for_url("https://example.com")))
                .await
                .unwrap();
        }
        let seeded = service.reseed_pending().await.unwrap();
        assert_eq!(seeded, 3);
        assert_eq!(service.stats().await.queue.waiting, 3);

        service.shutdown().await;
    }

    // ----- live tests below require a local Chromium; they skip themselves
    // when the pool cannot launch one (CI containers, sandboxes).

    async fn chromium_available(service: &CaptureService) -> bool {
        match service.pool().acquire(ContextOptions::default()).await {
            Ok(handle) => {
                handle.release().await;
                true
            }
            Err(e) => {
                eprintln!("skipping live test, no usable browser: {e}");
                false
            }
        }
    }

    #[tokio::test]
    async fn test_live_single_capture() {
        let (service, _, artifacts) = test_service().await;
        if !chromium_available(&service).await {
            service.shutdown().await;
            return;
        }

        let mut request = CaptureRequest::for_url("https://example.com");
        request.block_resources = vec!["font".into(), "media".into()];
        let Submission::Finished(job) = service.submit("acct", request).await.unwrap() else {
            panic!("sync submission must finish inline");
        };

        match job.status {
            JobStatus::Completed => {
                let artifact = job.artifact.expect("completed job carries an artifact");
                assert!(artifact.size_bytes > 0);
                assert!(artifact.url.contains("expires="));
                assert_eq!(
                    artifacts.content_type_of(&artifact.key).as_deref(),
                    Some("image/png")
                );
            }
            _ => {
                // Network-restricted environments reach FAILED instead; the
                // record must still carry the error string.
                eprintln!("live capture did not complete: {:?}", job.error);
                assert!(job.error.is_some());
            }
        }

        // Lease symmetry: every path released its context.
        assert_eq!(service.stats().await.pool.active_contexts, 0);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_live_navigation_failure_releases_context() {
        let (service, _, _) = test_service().await;
        if !chromium_available(&service).await {
            service.shutdown().await;
            return;
        }

        let before = service.stats().await.pool.active_contexts;
        let mut request = CaptureRequest::for_url("https://no-such-host.invalid");
        request.wait.timeout_ms = 5_000;
        let Submission::Finished(job) = service.submit("acct", request).await.unwrap() else {
            panic!("sync submission must finish inline");
        };

        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.is_some());
        assert_eq!(service.stats().await.pool.active_contexts, before);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_live_concurrent_captures_share_bounded_pool() {
        // Capacity 2, three concurrent jobs: the third waits for a release
        // instead of failing with pool exhaustion.
        let (service, _, _) = test_service().await;
        if !chromium_available(&service).await {
            service.shutdown().await;
            return;
        }

        let submissions = (0..3).map(|_| {
            let service = service.clone();
            async move {
                let mut request = CaptureRequest::for_url("https://example.com");
                request.wait.timeout_ms = 20_000;
                service.submit("acct", request).await
            }
        });
        let results = futures::future::join_all(submissions).await;

        for result in results {
            let Submission::Finished(job) = result.unwrap() else {
                panic!("sync submission must finish inline");
            };
            if let Some(error) = &job.error {
                assert!(
                    !error.contains("no browser context became available"),
                    "job failed with pool exhaustion: {error}"
                );
            }
        }

        let stats = service.stats().await.pool;
        assert_eq!(stats.active_contexts, 0);
        assert!(stats.total_contexts <= 2);
        service.shutdown().await;
    }
}
