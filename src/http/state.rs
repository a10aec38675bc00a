//! Shared application state handed to every axum handler (§6).

use std::sync::Arc;
use std::time::Instant;

use crate::admission::AdmissionController;
use crate::batch::{BatchStore, Scheduler};
use crate::browser_pool::BrowserPool;
use crate::capture::CapturePipeline;
use crate::config::Settings;
use crate::health::HealthProber;
use crate::metrics::{Metrics, PerformanceTracker, PrometheusExporter};
use crate::resource_cache::ResourceCache;
use crate::result_cache::ResultCache;
use crate::storage::ArtifactStore;
use crate::tab_pool::TabPool;
use crate::url_rewrite::RuleTable;

pub struct AppState {
    pub settings: Settings,
    pub browser_pool: Arc<BrowserPool>,
    pub tab_pool: Arc<TabPool>,
    pub capture: Arc<CapturePipeline>,
    pub admission: Arc<AdmissionController>,
    pub resource_cache: Arc<ResourceCache>,
    pub result_cache: Arc<ResultCache>,
    pub batch_store: Arc<BatchStore>,
    pub scheduler: Arc<Scheduler>,
    pub artifact_store: Arc<dyn ArtifactStore>,
    pub rule_table: Arc<RuleTable>,
    pub health_prober: Option<Arc<HealthProber>>,
    pub metrics: Metrics,
    pub performance: Arc<PerformanceTracker>,
    pub prometheus: Option<Arc<PrometheusExporter>>,
    pub started_at: Instant,
}
