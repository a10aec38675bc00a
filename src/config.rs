//! Configuration management with serde serialization/deserialization
//!
//! This module provides all configuration structures and utilities for the screenshot tool,
//! including browser settings, optimization parameters, and output formats.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Main configuration structure for the screenshot tool
///
/// Controls all aspects of the screenshot service including browser pool size,
/// concurrency limits, timeouts, and optimization settings.
///
/// # Examples
///
/// ```rust
/// use screenshot_tool::Config;
///
/// // Use default configuration
/// let config = Config::default();
///
/// // Create custom configuration
/// let config = Config {
///     browser_pool_size: 5,
///     max_concurrent_screenshots: 50,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Number of Chrome browser instances to maintain in the pool (default: 10)
    ///
    /// Higher values increase concurrency but consume more memory and system resources.
    /// Recommended range: 5-20 depending on system capabilities.
    pub browser_pool_size: usize,

    /// Maximum number of concurrent screenshot operations (default: 200)
    ///
    /// This limit prevents system overload during high-volume processing.
    /// Should be higher than browser_pool_size for optimal utilization.
    pub max_concurrent_screenshots: usize,

    /// Timeout for individual screenshot operations (default: 30 seconds)
    ///
    /// Pages that take longer than this will be marked as failed and retried
    /// according to the retry_attempts setting.
    pub screenshot_timeout: Duration,

    /// Number of retry attempts for failed screenshots (default: 3)
    ///
    /// Transient failures like network timeouts will be retried up to this limit
    /// with exponential backoff delays.
    pub retry_attempts: usize,

    /// Output image format for screenshots (default: PNG)
    pub output_format: OutputFormat,

    /// Browser viewport configuration for screenshots
    pub viewport: Viewport,

    /// Performance optimization settings
    pub optimization: OptimizationSettings,

    /// Path to Chrome/Chromium executable (default: auto-detect)
    ///
    /// If None, the tool will automatically detect the Chrome installation.
    /// Specify a custom path if using a non-standard Chrome installation.
    pub chrome_path: Option<String>,

    /// Custom User-Agent string for requests (default: Chrome default)
    ///
    /// Some websites may require specific User-Agent strings for optimal rendering.
    pub user_agent: Option<String>,

    /// Memory limit per Chrome instance in bytes (default: 1GB)
    ///
    /// Helps prevent Chrome instances from consuming excessive memory during
    /// processing of complex pages.
    pub memory_limit: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            browser_pool_size: 10,
            max_concurrent_screenshots: 200,
            screenshot_timeout: Duration::from_secs(30),
            retry_attempts: 3,
            output_format: OutputFormat::Png,
            viewport: Viewport::default(),
            optimization: OptimizationSettings::default(),
            chrome_path: None,
            user_agent: None,
            memory_limit: Some(1024 * 1024 * 1024), // 1GB
        }
    }
}

/// Browser viewport configuration for screenshots
///
/// Controls the browser window size and display characteristics used when
/// rendering pages for screenshots.
///
/// # Examples
///
/// ```rust
/// use screenshot_tool::Viewport;
///
/// // Desktop viewport (default)
/// let desktop = Viewport::default();
///
/// // Mobile viewport
/// let mobile = Viewport {
///     width: 375,
///     height: 667,
///     device_scale_factor: 2.0,
///     mobile: true,
/// };
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Viewport {
    /// Viewport width in pixels (default: 1920)
    pub width: u32,

    /// Viewport height in pixels (default: 1080)
    pub height: u32,

    /// Device pixel ratio for high-DPI displays (default: 1.0)
    ///
    /// Values > 1.0 simulate high-density displays like Retina screens.
    pub device_scale_factor: f64,

    /// Whether to emulate mobile device (default: false)
    ///
    /// Enables mobile-specific rendering behaviors and touch events.
    pub mobile: bool,
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

/// Performance optimization settings for screenshot rendering
///
/// Controls various browser behaviors to optimize screenshot speed and quality.
/// Blocking unnecessary resources can significantly improve performance.
///
/// # Examples
///
/// ```rust
/// use screenshot_tool::OptimizationSettings;
///
/// // High-performance settings (minimal loading)
/// let fast = OptimizationSettings {
///     block_ads: true,
///     block_trackers: true,
///     block_images: true,
///     enable_javascript: false,
///     ..Default::default()
/// };
///
/// // High-fidelity settings (full rendering)
/// let detailed = OptimizationSettings {
///     block_ads: false,
///     block_trackers: false,
///     block_images: false,
///     enable_javascript: true,
///     wait_for_network_idle: true,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OptimizationSettings {
    /// Block advertisement content (default: true)
    ///
    /// Prevents loading of known advertising networks to improve speed.
    pub block_ads: bool,

    /// Block tracking scripts and analytics (default: true)
    ///
    /// Blocks common tracking and analytics scripts to reduce load time.
    pub block_trackers: bool,

    /// Block image loading (default: false)
    ///
    /// When true, images won't be loaded, significantly reducing bandwidth.
    /// Useful for text-only screenshots or performance testing.
    pub block_images: bool,

    /// Enable JavaScript execution (default: true)
    ///
    /// JavaScript is often required for proper page rendering but can be
    /// disabled for faster static content screenshots.
    pub enable_javascript: bool,

    /// Wait for network requests to complete (default: false)
    ///
    /// When true, waits for all network activity to finish before taking
    /// the screenshot. Increases accuracy but reduces speed.
    pub wait_for_network_idle: bool,

    /// Disable CSS loading (default: false)
    ///
    /// When true, CSS stylesheets won't be loaded. Useful for extracting
    /// raw content structure without styling.
    pub disable_css: bool,

    /// Disable browser plugins (default: true)
    ///
    /// Prevents Flash, Java, and other plugins from loading to improve
    /// security and performance.
    pub disable_plugins: bool,
}

impl Default for OptimizationSettings {
    fn default() -> Self {
        Self {
            block_ads: true,
            block_trackers: true,
            block_images: false,
            enable_javascript: true,
            wait_for_network_idle: false,
            disable_css: false,
            disable_plugins: true,
        }
    }
}

/// Supported output image formats for screenshots
///
/// Each format has different characteristics:
/// - PNG: Lossless compression, larger files, best quality
/// - JPEG: Lossy compression, smaller files, good for photos
/// - WebP: Modern format with excellent compression and quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum OutputFormat {
    /// PNG format - lossless compression, best quality
    Png,
    /// JPEG format - lossy compression, smaller files
    Jpeg,
    /// WebP format - modern compression, good balance of size and quality
    Webp,
}

/// Generate Chrome command-line arguments based on configuration
///
/// Creates a comprehensive set of Chrome command-line arguments optimized
/// for headless screenshot operation with performance and security settings.
///
/// # Examples
///
/// ```rust
/// use screenshot_tool::{Config, get_chrome_args};
///
/// let config = Config::default();
/// let args = get_chrome_args(&config);
/// println!("Chrome will be launched with {} arguments", args.len());
/// ```
pub fn get_chrome_args(config: &Config) -> Vec<String> {
    get_chrome_args_with_instance_id(config, None)
}

/// Generate Chrome arguments with unique instance ID for browser pool isolation
///
/// This variant creates unique temporary directories and debugging ports for each
/// browser instance to prevent singleton conflicts in concurrent environments.
///
/// # Arguments
///
/// * `config` - The configuration settings
/// * `instance_id` - Optional unique ID for this browser instance
///
/// # Examples
///
/// ```rust
/// use screenshot_tool::{Config, get_chrome_args_with_instance_id};
///
/// let config = Config::default();
/// let args = get_chrome_args_with_instance_id(&config, Some(0));
/// // Returns args with unique temp directories for instance 0
/// ```
pub fn get_chrome_args_with_instance_id(
    config: &Config,
    instance_id: Option<usize>,
) -> Vec<String> {
    let unique_id = match instance_id {
        Some(id) => format!("{}-{}", std::process::id(), id),
        None => format!("{}-{}", std::process::id(), uuid::Uuid::new_v4()),
    };

    let mut args = vec![
        "--headless".to_string(),
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
        "--disable-background-timer-throttling".to_string(),
        "--disable-backgrounding-occluded-windows".to_string(),
        "--disable-renderer-backgrounding".to_string(),
        "--disable-features=TranslateUI".to_string(),
        "--disable-extensions".to_string(),
        "--disable-default-apps".to_string(),
        "--disable-sync".to_string(),
        "--no-first-run".to_string(),
        "--disable-web-security".to_string(),
        "--disable-process-singleton-dialog".to_string(),
        "--disable-features=ProcessSingleton".to_string(),
        "--no-process-singleton-dialog".to_string(),
        "--disable-single-process".to_string(),
        "--allow-running-insecure-content".to_string(),
        "--ignore-certificate-errors".to_string(),
        "--ignore-ssl-errors".to_string(),
        "--ignore-certificate-errors-spki-list".to_string(),
        "--ignore-certificate-errors-ssl-errors".to_string(),
        format!(
            "--window-size={},{}",
            config.viewport.width, config.viewport.height
        ),
        format!("--memory-pressure-off"),
        // Add unique user data directory to avoid singleton issues
        format!("--user-data-dir=/tmp/chromium-screenshot-{}", unique_id),
        // Add unique remote debugging port for each instance
        format!(
            "--remote-debugging-port={}",
            9222 + instance_id.unwrap_or(0)
        ),
        // Set unique temp directory to avoid chromiumoxide singleton conflicts
        format!("--temp-dir=/tmp/chromium-temp-{}", unique_id),
    ];

    if let Some(memory_limit) = config.memory_limit {
        args.push(format!(
            "--max_old_space_size={}",
            memory_limit / 1024 / 1024
        ));
    }

    if config.optimization.block_images {
        args.push("--disable-images".to_string());
    }

    if !config.optimization.enable_javascript {
        args.push("--disable-javascript".to_string());
    }

    if config.optimization.disable_plugins {
        args.push("--disable-plugins".to_string());
    }

    if config.optimization.disable_css {
        args.push("--disable-css".to_string());
    }

    if let Some(user_agent) = &config.user_agent {
        args.push(format!("--user-agent={user_agent}"));
    }

    args
}

pub fn create_browser_config(config: &Config) -> chromiumoxide::browser::BrowserConfig {
    create_browser_config_with_instance_id(config, None)
}

pub fn create_browser_config_with_instance_id(
    config: &Config,
    instance_id: Option<usize>,
) -> chromiumoxide::browser::BrowserConfig {
    use chromiumoxide::browser::BrowserConfig;

    let mut builder = BrowserConfig::builder()
        .window_size(config.viewport.width, config.viewport.height)
        .args(get_chrome_args_with_instance_id(config, instance_id));

    if let Some(chrome_path) = &config.chrome_path {
        builder = builder.chrome_executable(chrome_path);
    }

    builder
        .build()
        .unwrap_or_else(|_| BrowserConfig::with_executable("/usr/sbin/chromium"))
}

/// Errors produced while reading typed values out of the environment.
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("missing required environment variable {0}")]
    NotFound(String),
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// Small typed wrapper around `std::env::var`, with an optional variable-name
/// prefix and per-key defaults. Every tunable in [`Settings`] is read through
/// this loader so the full set of recognized keys and their parsing lives in
/// one place.
pub struct EnvConfigLoader {
    prefix: Option<String>,
}

impl EnvConfigLoader {
    pub fn new() -> Self {
        Self { prefix: None }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    fn full_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}{key}"),
            None => key.to_string(),
        }
    }

    pub fn get_optional(&self, key: &str) -> Option<String> {
        env::var(self.full_key(key)).ok()
    }

    pub fn get(&self, key: &str, default: &str) -> String {
        self.get_optional(key).unwrap_or_else(|| default.to_string())
    }

    pub fn require(&self, key: &str) -> Result<String, EnvError> {
        self.get_optional(key)
            .ok_or_else(|| EnvError::NotFound(self.full_key(key)))
    }

    pub fn get_uint(&self, key: &str, default: u64) -> Result<u64, EnvError> {
        match self.get_optional(key) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|e| EnvError::InvalidValue {
                key: self.full_key(key),
                value,
                reason: format!("{e}"),
            }),
        }
    }

    pub fn get_float(&self, key: &str, default: f64) -> Result<f64, EnvError> {
        match self.get_optional(key) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|e| EnvError::InvalidValue {
                key: self.full_key(key),
                value,
                reason: format!("{e}"),
            }),
        }
    }

    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool, EnvError> {
        match self.get_optional(key) {
            None => Ok(default),
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(EnvError::InvalidValue {
                    key: self.full_key(key),
                    value,
                    reason: "expected a boolean".to_string(),
                }),
            },
        }
    }

    pub fn get_duration_secs(&self, key: &str, default_secs: u64) -> Result<Duration, EnvError> {
        self.get_uint(key, default_secs).map(Duration::from_secs)
    }

    pub fn get_duration_millis(&self, key: &str, default_millis: u64) -> Result<Duration, EnvError> {
        self.get_uint(key, default_millis).map(Duration::from_millis)
    }
}

impl Default for EnvConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// The full set of tunables enumerated in the configuration-keys section of
/// the design spec, read once at startup. `Config` above remains the
/// browser-launch-facing configuration (viewport, chrome args); `Settings`
/// governs the concurrency/resource-management substrate (C1-C12).
#[derive(Debug, Clone)]
pub struct Settings {
    // Browser pool (C4)
    pub browser_pool_min: usize,
    pub browser_pool_max: usize,
    pub browser_pool_idle_timeout: Duration,
    pub browser_pool_max_age: Duration,
    pub browser_pool_cleanup_interval: Duration,
    pub browser_pool_scale_threshold: f64,
    pub browser_pool_scale_factor: usize,
    pub max_wait_attempts: u32,
    pub browser_pool_health_threshold: usize,
    pub browser_pool_max_pages: usize,

    // Tab/context acquirer (C5)
    pub max_tabs_per_browser: usize,
    pub tab_idle_timeout: Duration,
    pub tab_max_age: Duration,
    pub tab_cleanup_interval: Duration,
    pub enable_tab_reuse: bool,

    // Capture pipeline (C6)
    pub navigation_timeout_regular: Duration,
    pub navigation_timeout_complex: Duration,
    pub screenshot_timeout: Duration,
    pub page_creation_timeout: Duration,
    pub context_creation_timeout: Duration,
    pub max_retries_regular: u32,
    pub max_fresh_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub retry_jitter: f64,
    pub route_setup_timeout: Duration,
    pub settle_timeout: Duration,

    // Admission controller (C7)
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_reset_time: Duration,
    pub max_concurrent_screenshots: usize,
    pub max_concurrent_contexts: usize,
    pub enable_request_queue: bool,
    pub max_queue_size: usize,
    pub queue_timeout: Duration,
    pub enable_load_shedding: bool,
    pub load_shedding_threshold: f64,

    // Result cache (C8)
    pub result_cache_enabled: bool,
    pub result_cache_ttl: Duration,
    pub result_cache_max_items: u64,

    // Resource cache (C2)
    pub resource_cache_enabled: bool,
    pub resource_cache_all_content: bool,
    pub resource_cache_max_total_bytes: u64,
    pub resource_cache_max_entry_bytes: u64,
    pub resource_cache_ttl: Duration,
    pub resource_cache_cleanup_interval: Duration,
    pub resource_cache_dir: String,

    // Request interceptor (C3)
    pub disable_fonts: bool,
    pub disable_media: bool,
    pub disable_analytics: bool,
    pub disable_third_party_scripts: bool,
    pub disable_ads: bool,
    pub disable_social_widgets: bool,

    // Boundary / proxy trust
    pub trust_proxy_headers: bool,
    pub trusted_proxy_ips: Vec<String>,
    pub workers: usize,

    // Health prober (C10)
    pub health_check_enabled: bool,
    pub health_check_interval: Duration,
    pub health_check_url: String,
    pub health_check_timeout: Duration,

    // Batch job store (C9)
    pub batch_job_persistence_enabled: bool,
    pub batch_job_persistence_dir: String,

    // Watchdog (C11) / emergency maintenance
    pub emergency_cleanup_interval: Duration,
    pub memory_cleanup_threshold: f64,
    pub force_browser_restart_interval: Duration,
    pub watchdog_interval: Duration,
    pub watchdog_force_release_after: Duration,
    pub watchdog_hard_stuck_after: Duration,
}

impl Settings {
    pub fn from_env() -> Result<Self, EnvError> {
        let env = EnvConfigLoader::new();

        Ok(Self {
            browser_pool_min: env.get_uint("BROWSER_POOL_MIN", 1)? as usize,
            browser_pool_max: env.get_uint("BROWSER_POOL_MAX", 10)? as usize,
            browser_pool_idle_timeout: env.get_duration_secs("BROWSER_POOL_IDLE_TIMEOUT", 120)?,
            browser_pool_max_age: env.get_duration_secs("BROWSER_POOL_MAX_AGE", 1800)?,
            browser_pool_cleanup_interval: env
                .get_duration_secs("BROWSER_POOL_CLEANUP_INTERVAL", 60)?,
            browser_pool_scale_threshold: env
                .get_float("BROWSER_POOL_SCALE_THRESHOLD", 0.70)?,
            browser_pool_scale_factor: env.get_uint("BROWSER_POOL_SCALE_FACTOR", 2)? as usize,
            max_wait_attempts: env.get_uint("MAX_WAIT_ATTEMPTS", 20)? as u32,
            browser_pool_health_threshold: env
                .get_uint("BROWSER_POOL_HEALTH_THRESHOLD", 10)? as usize,
            browser_pool_max_pages: env.get_uint("BROWSER_POOL_MAX_PAGES", 10_000)? as usize,

            max_tabs_per_browser: env.get_uint("MAX_TABS_PER_BROWSER", 20)? as usize,
            tab_idle_timeout: env.get_duration_secs("TAB_IDLE_TIMEOUT", 60)?,
            tab_max_age: env.get_duration_secs("TAB_MAX_AGE", 600)?,
            tab_cleanup_interval: env.get_duration_secs("TAB_CLEANUP_INTERVAL", 30)?,
            enable_tab_reuse: env.get_bool("ENABLE_TAB_REUSE", true)?,

            navigation_timeout_regular: env
                .get_duration_millis("NAVIGATION_TIMEOUT_REGULAR", 15_000)?,
            navigation_timeout_complex: env
                .get_duration_millis("NAVIGATION_TIMEOUT_COMPLEX", 30_000)?,
            screenshot_timeout: env.get_duration_millis("SCREENSHOT_TIMEOUT", 10_000)?,
            page_creation_timeout: env.get_duration_millis("PAGE_CREATION_TIMEOUT", 5_000)?,
            context_creation_timeout: env
                .get_duration_millis("CONTEXT_CREATION_TIMEOUT", 5_000)?,
            max_retries_regular: env.get_uint("MAX_RETRIES_REGULAR", 3)? as u32,
            max_fresh_retries: env.get_uint("MAX_FRESH_RETRIES", 3)? as u32,
            retry_base_delay: env.get_duration_millis("RETRY_BASE_DELAY", 50)?,
            retry_max_delay: env.get_duration_millis("RETRY_MAX_DELAY", 2_000)?,
            retry_jitter: env.get_float("RETRY_JITTER", 0.2)?,
            route_setup_timeout: env.get_duration_millis("ROUTE_SETUP_TIMEOUT", 2_000)?,
            settle_timeout: env.get_duration_millis("SETTLE_TIMEOUT", 500)?,

            circuit_breaker_threshold: env.get_uint("CIRCUIT_BREAKER_THRESHOLD", 5)? as u32,
            circuit_breaker_reset_time: env
                .get_duration_secs("CIRCUIT_BREAKER_RESET_TIME", 60)?,
            max_concurrent_screenshots: env
                .get_uint("MAX_CONCURRENT_SCREENSHOTS", 100)? as usize,
            max_concurrent_contexts: env.get_uint("MAX_CONCURRENT_CONTEXTS", 200)? as usize,
            enable_request_queue: env.get_bool("ENABLE_REQUEST_QUEUE", true)?,
            max_queue_size: env.get_uint("MAX_QUEUE_SIZE", 500)? as usize,
            queue_timeout: env.get_duration_secs("QUEUE_TIMEOUT", 30)?,
            enable_load_shedding: env.get_bool("ENABLE_LOAD_SHEDDING", true)?,
            load_shedding_threshold: env.get_float("LOAD_SHEDDING_THRESHOLD", 0.85)?,

            result_cache_enabled: env.get_bool("RESULT_CACHE_ENABLED", true)?,
            result_cache_ttl: env.get_duration_secs("RESULT_CACHE_TTL", 3600)?,
            result_cache_max_items: env.get_uint("RESULT_CACHE_MAX_ITEMS", 10_000)?,

            resource_cache_enabled: env.get_bool("RESOURCE_CACHE_ENABLED", true)?,
            resource_cache_all_content: env.get_bool("RESOURCE_CACHE_ALL_CONTENT", false)?,
            resource_cache_max_total_bytes: env
                .get_uint("RESOURCE_CACHE_MAX_TOTAL_BYTES", 1024 * 1024 * 1024)?,
            resource_cache_max_entry_bytes: env
                .get_uint("RESOURCE_CACHE_MAX_ENTRY_BYTES", 20 * 1024 * 1024)?,
            resource_cache_ttl: env.get_duration_secs("RESOURCE_CACHE_TTL", 86_400)?,
            resource_cache_cleanup_interval: env
                .get_duration_secs("RESOURCE_CACHE_CLEANUP_INTERVAL", 300)?,
            resource_cache_dir: env.get("RESOURCE_CACHE_DIR", "cache"),

            disable_fonts: env.get_bool("DISABLE_FONTS", false)?,
            disable_media: env.get_bool("DISABLE_MEDIA", false)?,
            disable_analytics: env.get_bool("DISABLE_ANALYTICS", true)?,
            disable_third_party_scripts: env.get_bool("DISABLE_THIRD_PARTY_SCRIPTS", false)?,
            disable_ads: env.get_bool("DISABLE_ADS", true)?,
            disable_social_widgets: env.get_bool("DISABLE_SOCIAL_WIDGETS", true)?,

            trust_proxy_headers: env.get_bool("TRUST_PROXY_HEADERS", false)?,
            trusted_proxy_ips: env
                .get_optional("TRUSTED_PROXY_IPS")
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_default(),
            workers: env.get_uint("WORKERS", num_cpus::get() as u64)? as usize,

            health_check_enabled: env.get_bool("HEALTH_CHECK_ENABLED", true)?,
            health_check_interval: env.get_duration_secs("HEALTH_CHECK_INTERVAL", 300)?,
            health_check_url: env.get("HEALTH_CHECK_URL", "https://example.com"),
            health_check_timeout: env.get_duration_secs("HEALTH_CHECK_TIMEOUT", 15)?,

            batch_job_persistence_enabled: env
                .get_bool("BATCH_JOB_PERSISTENCE_ENABLED", true)?,
            batch_job_persistence_dir: env.get("BATCH_JOB_PERSISTENCE_DIR", "jobs"),

            emergency_cleanup_interval: env
                .get_duration_secs("EMERGENCY_CLEANUP_INTERVAL", 600)?,
            memory_cleanup_threshold: env.get_float("MEMORY_CLEANUP_THRESHOLD", 0.90)?,
            force_browser_restart_interval: env
                .get_duration_secs("FORCE_BROWSER_RESTART_INTERVAL", 3600)?,
            watchdog_interval: env.get_duration_secs("WATCHDOG_INTERVAL", 30)?,
            watchdog_force_release_after: env
                .get_duration_secs("WATCHDOG_FORCE_RELEASE_AFTER", 120)?,
            watchdog_hard_stuck_after: env.get_duration_secs("WATCHDOG_HARD_STUCK_AFTER", 300)?,
        })
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_env().expect("default Settings parsing cannot fail with no env overrides")
    }
}

#[cfg(test)]
mod settings_tests {
    use super::*;

    #[test]
    fn defaults_match_spec_where_specified() {
        let s = Settings::default();
        assert_eq!(s.load_shedding_threshold, 0.85);
        assert_eq!(s.max_tabs_per_browser, 20);
        assert_eq!(s.watchdog_force_release_after, Duration::from_secs(120));
        assert_eq!(s.watchdog_hard_stuck_after, Duration::from_secs(300));
        assert_eq!(s.watchdog_interval, Duration::from_secs(30));
        assert_eq!(s.health_check_interval, Duration::from_secs(300));
        assert_eq!(s.retry_base_delay, Duration::from_millis(50));
        assert_eq!(s.retry_max_delay, Duration::from_secs(2));
    }

    #[test]
    fn env_override_takes_precedence() {
        std::env::set_var("SETTINGS_TEST_MAX_QUEUE_SIZE", "7");
        let env = EnvConfigLoader::new().with_prefix("SETTINGS_TEST_");
        assert_eq!(env.get_uint("MAX_QUEUE_SIZE", 500).unwrap(), 7);
        std::env::remove_var("SETTINGS_TEST_MAX_QUEUE_SIZE");
    }

    #[test]
    fn invalid_bool_is_rejected() {
        std::env::set_var("SETTINGS_TEST_FLAG", "maybe");
        let env = EnvConfigLoader::new().with_prefix("SETTINGS_TEST_");
        assert!(env.get_bool("FLAG", false).is_err());
        std::env::remove_var("SETTINGS_TEST_FLAG");
    }
}
