use capture_pipeline::{
    artifact_key, count_pdf_pages, BlockList, CaptureRequest, Config, OutputFormat,
};
use chromiumoxide::cdp::browser_protocol::network::ResourceType;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::Duration;
use uuid::Uuid;

// Fast settings for all benchmarks
fn configure_fast_group(group: &mut criterion::BenchmarkGroup<criterion::measurement::WallTime>) {
    group.warm_up_time(Duration::from_millis(500));
    group.measurement_time(Duration::from_millis(500));
    group.sample_size(20);
}

fn benchmark_config_creation(c: &mut Criterion) {
    let mut group = c.benchmark_group("config");
    configure_fast_group(&mut group);

    group.bench_function("creation", |b| {
        b.iter(|| {
            let config = Config::default();
            black_box(config);
        });
    });

    group.finish();
}

fn benchmark_request_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("capture_request");
    configure_fast_group(&mut group);

    group.bench_function("creation", |b| {
        b.iter(|| {
            let request = CaptureRequest::for_url("https://example.com/path?q=1");
            black_box(request);
        });
    });

    group.bench_function("validation", |b| {
        let mut request = CaptureRequest::for_url("https://example.com/path?q=1");
        request.format = OutputFormat::Jpeg;
        request.quality = Some(85);
        request.block_resources = vec!["image".into(), "font".into()];
        b.iter(|| {
            let result = request.validate();
            black_box(result).ok();
        });
    });

    group.finish();
}

fn benchmark_blocklist(c: &mut Criterion) {
    let mut group = c.benchmark_group("blocklist");
    configure_fast_group(&mut group);

    let list = BlockList::parse(&["image".to_string(), "font".to_string()]).unwrap();
    let kinds = [
        ResourceType::Document,
        ResourceType::Image,
        ResourceType::Script,
        ResourceType::Font,
    ];

    group.bench_function("matching", |b| {
        b.iter(|| {
            for kind in &kinds {
                black_box(list.blocks(kind));
            }
        });
    });

    group.finish();
}

fn benchmark_artifact_key(c: &mut Criterion) {
    let mut group = c.benchmark_group("artifact_key");
    configure_fast_group(&mut group);

    let job_id = Uuid::new_v4();
    group.bench_function("namespacing", |b| {
        b.iter(|| {
            let key = artifact_key("account-12345", job_id, "png");
            black_box(key);
        });
    });

    group.finish();
}

fn benchmark_pdf_page_count(c: &mut Criterion) {
    let mut group = c.benchmark_group("pdf");
    configure_fast_group(&mut group);

    let mut pdf = b"%PDF-1.4\n".to_vec();
    for _ in 0..50 {
        pdf.extend_from_slice(b"obj << /Type /Page /Parent 1 0 R >>\n");
    }
    pdf.extend_from_slice(b"obj << /Type /Pages /Count 50 >>\n%%EOF");

    group.bench_function("page_count", |b| {
        b.iter(|| {
            black_box(count_pdf_pages(&pdf));
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_config_creation,
    benchmark_request_validation,
    benchmark_blocklist,
    benchmark_artifact_key,
    benchmark_pdf_page_count
);
criterion_main!(benches);
