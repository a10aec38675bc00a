use criterion::{black_box, criterion_group, criterion_main, Criterion};
use screenshot_tool::config::Config;
use std::time::Duration;

#[cfg(feature = "integration_benchmarks")]
use screenshot_tool::{
    browser_pool::BrowserPool,
    capture::{CapturePipeline, CaptureRequest},
    config::{OutputFormat, Settings},
    interceptor::BlockPolicy,
    resource_cache::{CacheabilityMode, ResourceCache},
    tab_pool::TabPool,
};
#[cfg(feature = "integration_benchmarks")]
use tokio::runtime::Runtime;

fn configure_fast_group(group: &mut criterion::BenchmarkGroup<criterion::measurement::WallTime>) {
    group.warm_up_time(Duration::from_millis(500));
    group.measurement_time(Duration::from_millis(500));
    group.sample_size(20);
}

// === UNIT BENCHMARKS ===

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

fn benchmark_chrome_args_generation(c: &mut Criterion) {
    let config = Config::default();
    let mut group = c.benchmark_group("chrome_args");
    configure_fast_group(&mut group);

    group.bench_function("generation", |b| {
        b.iter(|| {
            let args = screenshot_tool::config::get_chrome_args(&config);
            black_box(args);
        });
    });

    group.finish();
}

fn benchmark_url_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("url_validation");
    configure_fast_group(&mut group);

    let test_urls = ["https://example.com", "http://example.com/path", "invalid-url"];

    group.bench_function("validate", |b| {
        b.iter(|| {
            for url in &test_urls {
                let result = screenshot_tool::utils::validate_url(url);
                let _ = black_box(result);
            }
        });
    });

    group.finish();
}

fn benchmark_filename_sanitization(c: &mut Criterion) {
    let mut group = c.benchmark_group("filename_sanitization");
    configure_fast_group(&mut group);

    let test_filenames = ["normal_file.txt", "file with spaces.txt", "file/with/slashes.txt"];

    group.bench_function("sanitize", |b| {
        b.iter(|| {
            for filename in &test_filenames {
                let sanitized = screenshot_tool::utils::sanitize_filename(filename);
                black_box(sanitized);
            }
        });
    });

    group.finish();
}

fn benchmark_format_utilities(c: &mut Criterion) {
    let mut group = c.benchmark_group("format_utilities");
    configure_fast_group(&mut group);

    let test_durations = [Duration::from_millis(100), Duration::from_secs(5)];
    let test_byte_sizes = [1024usize, 1048576];

    group.bench_function("format_duration", |b| {
        b.iter(|| {
            for duration in &test_durations {
                let formatted = screenshot_tool::utils::format_duration(*duration);
                black_box(formatted);
            }
        });
    });

    group.bench_function("format_bytes", |b| {
        b.iter(|| {
            for size in &test_byte_sizes {
                let formatted = screenshot_tool::utils::format_bytes(*size);
                black_box(formatted);
            }
        });
    });

    group.finish();
}

fn benchmark_circuit_breaker(c: &mut Criterion) {
    use screenshot_tool::error::CircuitBreaker;

    let mut group = c.benchmark_group("circuit_breaker");
    configure_fast_group(&mut group);

    let breaker = CircuitBreaker::new(5, Duration::from_secs(60));
    group.bench_function("can_execute_then_record", |b| {
        b.iter(|| {
            let can_execute = breaker.can_execute();
            if can_execute {
                breaker.record_success();
            } else {
                breaker.record_failure();
            }
            black_box(can_execute);
        });
    });

    group.finish();
}

fn benchmark_url_rewrite(c: &mut Criterion) {
    use screenshot_tool::url_rewrite::{rewrite, RewriteRule, RuleTable};

    let table = RuleTable::new();
    table.set(
        "viding.co".to_string(),
        RewriteRule {
            target_host: "viding-co_website-revamp".to_string(),
            scheme: "http".to_string(),
        },
    );
    let rules = table.load();

    let mut group = c.benchmark_group("url_rewrite");
    configure_fast_group(&mut group);

    group.bench_function("rewrite", |b| {
        b.iter(|| {
            let rewritten = rewrite("https://viding.co/gallery/photo.jpg", &rules);
            black_box(rewritten);
        });
    });

    group.finish();
}

// === INTEGRATION BENCHMARKS (require a Chrome binary) ===

#[cfg(feature = "integration_benchmarks")]
fn benchmark_pool_creation(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("pool_creation");
    configure_fast_group(&mut group);

    group.bench_function("single_browser", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut settings = Settings::default();
                settings.browser_pool_min = 1;
                settings.browser_pool_max = 1;

                let pool = BrowserPool::new(Config::default(), settings).await.unwrap();
                pool.shutdown().await;
                black_box(pool);
            })
        });
    });

    group.finish();
}

#[cfg(feature = "integration_benchmarks")]
fn benchmark_real_world_screenshot(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("real_world_screenshot");
    configure_fast_group(&mut group);

    group.bench_function("single_url", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut settings = Settings::default();
                settings.browser_pool_min = 1;
                settings.browser_pool_max = 1;
                settings.screenshot_timeout = Duration::from_secs(5);

                let pool = BrowserPool::new(Config::default(), settings.clone()).await.unwrap();
                let tab_pool = TabPool::new(pool.clone(), settings.clone());
                let resource_cache = ResourceCache::new("bench-cache", 64 * 1024 * 1024, 4 * 1024 * 1024, Duration::from_secs(60));
                let capture = CapturePipeline::new(
                    tab_pool,
                    std::sync::Arc::new(resource_cache),
                    CacheabilityMode::AllContent,
                    BlockPolicy {
                        disable_analytics: false,
                        disable_ads: false,
                        disable_social_widgets: false,
                        disable_fonts: false,
                        disable_media: false,
                    },
                    settings,
                    std::sync::Arc::new(screenshot_tool::url_rewrite::RuleTable::new()),
                );

                let result = capture
                    .capture(
                        CaptureRequest {
                            url: "https://example.com".to_string(),
                            width: 1280,
                            height: 720,
                            format: OutputFormat::Png,
                            deadline: Duration::from_secs(10),
                        },
                        0.0,
                    )
                    .await;

                pool.shutdown().await;
                black_box(result.is_ok());
            })
        });
    });

    group.finish();
}

// === BENCHMARK GROUPS ===

criterion_group!(
    unit_benches,
    benchmark_config_creation,
    benchmark_chrome_args_generation,
    benchmark_url_validation,
    benchmark_filename_sanitization,
    benchmark_format_utilities,
    benchmark_circuit_breaker,
    benchmark_url_rewrite,
);

#[cfg(feature = "integration_benchmarks")]
criterion_group!(
    integration_benches,
    benchmark_pool_creation,
    benchmark_real_world_screenshot,
);

#[cfg(feature = "integration_benchmarks")]
criterion_main!(unit_benches, integration_benches);

#[cfg(not(feature = "integration_benchmarks"))]
criterion_main!(unit_benches);
