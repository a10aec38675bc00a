use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use screenshot_tool::admission::AdmissionController;
use screenshot_tool::batch::{BatchStore, Scheduler};
use screenshot_tool::browser_pool::BrowserPool;
use screenshot_tool::capture::CapturePipeline;
use screenshot_tool::cli::{setup_logging, Cli};
use screenshot_tool::config::{Config, Settings};
use screenshot_tool::health::HealthProber;
use screenshot_tool::http::AppState;
use screenshot_tool::interceptor::BlockPolicy;
use screenshot_tool::metrics::{Metrics, PerformanceTracker, PrometheusExporter};
use screenshot_tool::resource_cache::{CacheabilityMode, ResourceCache};
use screenshot_tool::result_cache::ResultCache;
use screenshot_tool::storage::{ArtifactStore, LocalDiskStore};
use screenshot_tool::tab_pool::TabPool;
use screenshot_tool::url_rewrite::RuleTable;
use screenshot_tool::watchdog::Watchdog;
use tokio::signal;
use tracing::{error, info};

/// Hosts whose sub-resources are worth caching even under the selective
/// (extension-only) cacheability policy — the corpus's own CDN allowlist.
const PRIORITY_CDNS: &[&str] = &[
    "cdnjs.cloudflare.com",
    "ajax.googleapis.com",
    "fonts.googleapis.com",
    "fonts.gstatic.com",
    "unpkg.com",
    "jsdelivr.net",
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Cli::parse();
    setup_logging(args.verbose)?;
    info!("starting screenshot-tool v{}", env!("CARGO_PKG_VERSION"));

    let settings = load_settings(&args)?;
    let config = load_browser_config(&args);

    let state = build_state(config, settings).await?;

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::broadcast::channel(1);
    let _shutdown_handler = setup_shutdown_handler(shutdown_tx.clone());

    let result = tokio::select! {
        result = screenshot_tool::cli::CliRunner::new(state.clone()).run(args.command) => {
            info!("command completed");
            result
        }
        _ = shutdown_rx.recv() => {
            info!("received shutdown signal");
            Ok(())
        }
    };

    info!("shutting down");
    state.browser_pool.shutdown().await;

    if let Err(err) = result {
        error!(error = %err, "application error");
        std::process::exit(1);
    }

    info!("screenshot-tool stopped");
    Ok(())
}

fn load_settings(args: &Cli) -> Result<Settings, Box<dyn std::error::Error>> {
    let mut settings = Settings::from_env()?;
    if let Some(max_concurrent) = args.max_concurrent {
        settings.max_concurrent_screenshots = max_concurrent;
    }
    if let Some(timeout) = args.timeout {
        settings.screenshot_timeout = std::time::Duration::from_secs(timeout);
    }
    if let Some(pool_size) = args.pool_size {
        settings.browser_pool_max = pool_size.max(settings.browser_pool_min);
    }
    Ok(settings)
}

fn load_browser_config(args: &Cli) -> Config {
    let mut config = Config::default();
    if let Some(chrome_path) = &args.chrome_path {
        config.chrome_path = Some(chrome_path.clone());
    }
    config
}

async fn build_state(
    config: Config,
    settings: Settings,
) -> Result<Arc<AppState>, Box<dyn std::error::Error>> {
    let browser_pool = BrowserPool::new(config, settings.clone()).await?;
    let tab_pool = TabPool::new(browser_pool.clone(), settings.clone());
    {
        let tab_pool = tab_pool.clone();
        browser_pool.set_on_recycle(Arc::new(move |instance_id| {
            let tab_pool = tab_pool.clone();
            tokio::spawn(async move {
                tab_pool.drop_browser(instance_id).await;
            });
        }));
    }

    let resource_cache = Arc::new(ResourceCache::new(
        settings.resource_cache_dir.clone(),
        settings.resource_cache_max_total_bytes,
        settings.resource_cache_max_entry_bytes,
        settings.resource_cache_ttl,
    ));

    if settings.resource_cache_enabled {
        tokio::spawn(screenshot_tool::resource_cache::run_cleanup_task(
            resource_cache.clone(),
            settings.resource_cache_cleanup_interval,
        ));
    }
    tokio::spawn(screenshot_tool::tab_pool::run_sweep_task(
        tab_pool.clone(),
        settings.tab_cleanup_interval,
    ));

    let cacheability = if settings.resource_cache_all_content {
        CacheabilityMode::AllContent
    } else {
        CacheabilityMode::Selective {
            priority_cdns: PRIORITY_CDNS,
        }
    };
    let block_policy = BlockPolicy {
        disable_analytics: settings.disable_analytics,
        disable_ads: settings.disable_ads,
        disable_social_widgets: settings.disable_social_widgets,
        disable_fonts: settings.disable_fonts,
        disable_media: settings.disable_media,
    };

    let rule_table = Arc::new(RuleTable::new());

    let capture = Arc::new(CapturePipeline::new(
        tab_pool.clone(),
        resource_cache.clone(),
        cacheability,
        block_policy,
        settings.clone(),
        rule_table.clone(),
    ));

    let admission = Arc::new(AdmissionController::new(settings.clone()));
    let result_cache = Arc::new(ResultCache::new(
        settings.result_cache_enabled,
        settings.result_cache_ttl,
        settings.result_cache_max_items,
    ));

    let artifact_store: Arc<dyn ArtifactStore> = Arc::new(LocalDiskStore::new("artifacts"));

    let batch_store = Arc::new(BatchStore::new(
        settings.batch_job_persistence_dir.clone(),
        settings.batch_job_persistence_enabled,
    ));
    if settings.batch_job_persistence_enabled {
        match batch_store.reload_from_disk().await {
            Ok(count) => info!(jobs = count, "reloaded batch jobs from disk"),
            Err(err) => error!(error = %err, "failed to reload batch jobs from disk"),
        }
    }

    let scheduler = Arc::new(Scheduler::new(
        batch_store.clone(),
        admission.clone(),
        capture.clone(),
        result_cache.clone(),
        artifact_store.clone(),
    ));

    let health_prober = if settings.health_check_enabled {
        let prober = HealthProber::new(
            capture.clone(),
            settings.health_check_url.clone(),
            settings.health_check_interval,
            settings.health_check_timeout,
        );
        prober.clone().spawn();
        Some(prober)
    } else {
        None
    };

    let watchdog = Arc::new(Watchdog::new(
        browser_pool.clone(),
        tab_pool.clone(),
        settings.watchdog_interval,
        settings.watchdog_force_release_after,
        settings.watchdog_hard_stuck_after,
        settings.browser_pool_idle_timeout,
    ));
    watchdog.spawn();

    let prometheus = match PrometheusExporter::install() {
        Ok(exporter) => Some(Arc::new(exporter)),
        Err(err) => {
            error!(error = %err, "failed to install prometheus recorder");
            None
        }
    };

    Ok(Arc::new(AppState {
        settings,
        browser_pool,
        tab_pool,
        capture,
        admission,
        resource_cache,
        result_cache,
        batch_store,
        scheduler,
        artifact_store,
        rule_table,
        health_prober,
        metrics: Metrics::new(),
        performance: Arc::new(PerformanceTracker::new()),
        prometheus,
        started_at: Instant::now(),
    }))
}

fn setup_shutdown_handler(
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
            .expect("failed to install SIGINT handler");
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");

        tokio::select! {
            _ = sigint.recv() => info!("received SIGINT"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }

        let _ = shutdown_tx.send(());
    })
}
