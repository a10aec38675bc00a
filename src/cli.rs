//! Command-line front end (§6 CLI surface): thin dispatch onto the same
//! [`crate::http::AppState`] the HTTP boundary uses, so `single`/`batch`
//! capture go through the identical admission + capture pipeline a server
//! request would.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::fs;
use tracing::{error, info};

use crate::batch::{BatchConfig, BatchItemInput, JobStatus};
use crate::capture::CaptureRequest;
use crate::config::OutputFormat;
use crate::http::AppState;

#[derive(Parser)]
#[command(name = "screenshot-tool")]
#[command(about = "Concurrent website screenshot service")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, help = "Browser pool maximum size")]
    pub pool_size: Option<usize>,

    #[arg(long, help = "Maximum concurrent screenshots")]
    pub max_concurrent: Option<usize>,

    #[arg(long, help = "Screenshot timeout in seconds")]
    pub timeout: Option<u64>,

    #[arg(long, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(long, help = "Chrome executable path")]
    pub chrome_path: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Take a single screenshot and save it to a file.
    Single {
        #[arg(short, long, help = "URL to screenshot")]
        url: String,

        #[arg(short, long, help = "Output file path")]
        output: PathBuf,

        #[arg(long, default_value = "png", help = "Output format (png, jpeg, webp)")]
        format: String,

        #[arg(long, default_value = "1280", help = "Viewport width")]
        width: u32,

        #[arg(long, default_value = "720", help = "Viewport height")]
        height: u32,
    },

    /// Submit a batch job described by a JSON file (`{"items": [...], "config": {...}}`)
    /// and wait for it to finish.
    Batch {
        #[arg(short, long, help = "Path to a batch job description JSON file")]
        input: PathBuf,

        #[arg(short, long, help = "Path to write the finished job JSON to")]
        output: Option<PathBuf>,
    },

    /// Serve the HTTP boundary (§6).
    Server {
        #[arg(short, long, default_value = "8080", help = "Bind port")]
        port: u16,

        #[arg(short, long, default_value = "0.0.0.0", help = "Bind address")]
        bind: String,
    },

    /// Print current pool/admission/probe health, the same document `/health` serves.
    Health {
        #[arg(long, help = "Include per-instance browser pool detail")]
        detailed: bool,
    },
}

#[derive(serde::Deserialize)]
struct BatchFile {
    items: Vec<BatchItemInput>,
    config: BatchConfig,
}

fn parse_format(raw: &str) -> Result<OutputFormat, Box<dyn std::error::Error>> {
    match raw.to_ascii_lowercase().as_str() {
        "png" => Ok(OutputFormat::Png),
        "jpeg" | "jpg" => Ok(OutputFormat::Jpeg),
        "webp" => Ok(OutputFormat::Webp),
        other => Err(format!("unknown output format: {other}").into()),
    }
}

pub struct CliRunner {
    state: Arc<AppState>,
}

impl CliRunner {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub async fn run(&self, command: Commands) -> Result<(), Box<dyn std::error::Error>> {
        match command {
            Commands::Single {
                url,
                output,
                format,
                width,
                height,
            } => self.run_single(url, output, format, width, height).await,
            Commands::Batch { input, output } => self.run_batch(input, output).await,
            Commands::Server { port, bind } => self.run_server(port, bind).await,
            Commands::Health { detailed } => self.show_health(detailed).await,
        }
    }

    async fn run_single(
        &self,
        url: String,
        output: PathBuf,
        format: String,
        width: u32,
        height: u32,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let format = parse_format(&format)?;
        crate::utils::validate_url(&url).map_err(|e| -> Box<dyn std::error::Error> { e.into() })?;

        info!(url = %url, "capturing screenshot");
        let _guard = self.state.admission.admit().await?;
        let pool_utilization = self.state.admission.utilization();
        let result = self
            .state
            .capture
            .capture(
                CaptureRequest {
                    url: url.clone(),
                    width,
                    height,
                    format,
                    deadline: Duration::from_secs(30),
                },
                pool_utilization,
            )
            .await;
        self.state.admission.record_outcome(result.is_ok());
        let captured = result?;

        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&output, &captured.bytes).await?;

        println!("Screenshot captured successfully:");
        println!("  URL: {url}");
        println!("  Output: {}", output.display());
        println!("  Size: {} bytes", captured.bytes.len());
        Ok(())
    }

    async fn run_batch(
        &self,
        input: PathBuf,
        output: Option<PathBuf>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let content = fs::read_to_string(&input).await?;
        let file: BatchFile = serde_json::from_str(&content)?;
        info!(items = file.items.len(), "submitting batch job");

        let handle = self
            .state
            .batch_store
            .create(file.items, file.config)
            .await?;
        let job_id = handle.read().await.job_id.clone();
        self.state.scheduler.clone().spawn_job(job_id.clone());

        loop {
            tokio::time::sleep(Duration::from_millis(500)).await;
            let job = handle.read().await.clone();
            if !matches!(job.status, JobStatus::Queued | JobStatus::Processing) {
                println!(
                    "Batch job {} finished: {:?} ({} succeeded, {} failed)",
                    job.job_id,
                    job.status,
                    job.succeeded(),
                    job.failed()
                );
                if let Some(path) = output {
                    fs::write(&path, serde_json::to_string_pretty(&job)?).await?;
                    info!(path = %path.display(), "wrote job result");
                }
                break;
            }
        }
        Ok(())
    }

    async fn run_server(&self, port: u16, bind: String) -> Result<(), Box<dyn std::error::Error>> {
        let addr = format!("{bind}:{port}");
        info!(addr = %addr, "starting http server");
        let router = crate::http::build_router(self.state.clone());
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, router).await?;
        Ok(())
    }

    async fn show_health(&self, detailed: bool) -> Result<(), Box<dyn std::error::Error>> {
        println!("System Health Check");
        println!("==================");

        let pool_stats = self.state.browser_pool.stats().await;
        println!("Browser Pool:");
        println!("  Size: {}", pool_stats.size);
        println!("  In use: {}", pool_stats.in_use);
        println!("  Available: {}", pool_stats.available);
        println!("  Errors: {}", pool_stats.errors);
        println!("  Created total: {}", pool_stats.created_total);
        println!("  Recycled total: {}", pool_stats.recycled_total);

        let admission = self.state.admission.stats();
        println!("\nAdmission:");
        println!("  In-flight screenshots: {}", admission.in_flight_screenshots);
        println!("  In-flight contexts: {}", admission.in_flight_contexts);
        println!("  Queued: {}", admission.queued);
        println!("  Circuit open: {}", admission.circuit_open);
        println!("  Utilization: {:.2}", admission.utilization);

        if detailed {
            if let Some(prober) = &self.state.health_prober {
                let report = prober.report().await;
                println!("\nHealth Probe:");
                println!("  Healthy: {}", report.healthy);
                println!("  Consecutive failures: {}", report.consecutive_failures);
                println!("  Total probes: {}", report.total_probes);
                println!("  Total failures: {}", report.total_failures);
                if let Some(err) = &report.last_error {
                    println!("  Last error: {err}");
                }
            } else {
                println!("\nHealth Probe: disabled");
            }
        }

        if !admission.circuit_open {
            Ok(())
        } else {
            error!("circuit breaker is open");
            Ok(())
        }
    }
}

pub fn setup_logging(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    Ok(())
}
