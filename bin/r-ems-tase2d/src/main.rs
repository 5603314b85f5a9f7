//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Binary entrypoint for the R-EMS TASE.2 gateway daemon."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use r_ems_common::config::{GatewayConfig, LoadedGatewayConfig};
use r_ems_common::logging::init_tracing;
use r_ems_metrics::{new_registry, spawn_http_server, DaemonMetrics, Tase2Metrics};
use r_ems_tase2::{
    CommandNotification, ConfigReport, ControlHandler, Reading, RecordingEngine, Tase2Server,
};
use serde::Deserialize;
use serde_json::json;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{debug, error, info, warn};

#[derive(Debug, Parser)]
#[command(author, version, about = "R-EMS TASE.2 gateway daemon", long_about = None)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(
        long,
        value_name = "FILE",
        help = "JSON lines file of readings to feed; defaults to stdin"
    )]
    input: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the gateway")]
    Run,
    #[command(about = "Compile the configured documents and report, then exit")]
    Check,
}

/// One input line: a single reading or a batch.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Batch {
    Many(Vec<Reading>),
    One(Reading),
}

impl Batch {
    fn into_readings(self) -> Vec<Reading> {
        match self {
            Batch::Many(readings) => readings,
            Batch::One(reading) => vec![reading],
        }
    }
}

/// Writes each notification to stdout as one JSON line.
struct StdoutControl;

impl ControlHandler for StdoutControl {
    fn forward_command(&self, notification: &CommandNotification) -> bool {
        let line = json!({
            "operation": CommandNotification::OPERATION,
            "parameters": notification,
        });
        println!("{}", line);
        true
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/tase2.toml"));

    let loaded = GatewayConfig::load_with_source(&candidates)?;
    init_tracing("r-ems-tase2d", &loaded.config.logging)?;
    info!(config_path = %loaded.source.display(), name = %loaded.config.name, "configuration loaded");

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(loaded, cli.input).await,
        Commands::Check => {
            let mut server = Tase2Server::new(Arc::new(RecordingEngine::new()));
            let report = load_documents(&loaded, &mut server).await?;
            render_report(&server, &report);
            if !report.is_complete() {
                bail!("{} document(s) failed to import", report.failures.len());
            }
            Ok(())
        }
    }
}

async fn read_document(loaded: &LoadedGatewayConfig, path: &std::path::Path) -> Result<String> {
    let path = loaded.resolve_document(path);
    tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("failed to read document {}", path.display()))
}

async fn load_documents(
    loaded: &LoadedGatewayConfig,
    server: &mut Tase2Server,
) -> Result<ConfigReport> {
    let documents = &loaded.config.documents;
    let protocol_stack = read_document(loaded, &documents.protocol_stack).await?;
    let model = read_document(loaded, &documents.model).await?;
    let exchanged_data = read_document(loaded, &documents.exchanged_data).await?;
    let tls = match &documents.tls {
        Some(path) => Some(read_document(loaded, path).await?),
        None => None,
    };

    let report = server.set_json_config(&protocol_stack, &exchanged_data, tls.as_deref(), &model)?;
    for failure in &report.failures {
        error!(error = %failure, "document import failed");
    }
    Ok(report)
}

fn render_report(server: &Tase2Server, report: &ConfigReport) {
    let exchanged = server.model().map_or(0, |model| model.exchanged_count());
    println!(
        "Points: {} ({} skipped)\nExchanged: {}\nBilateral tables: {}\nDatasets: {}\nFailures: {}",
        report.model.points,
        report.model.skipped_points,
        exchanged,
        report.model.bilateral_tables,
        report.model.datasets,
        report.failures.len()
    );
    for failure in &report.failures {
        println!("  - {}", failure);
    }
}

async fn open_input(input: Option<PathBuf>) -> Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    match input {
        Some(path) if path.as_os_str() != "-" => {
            let file = File::open(&path)
                .await
                .with_context(|| format!("failed to open input {}", path.display()))?;
            Ok(Box::new(BufReader::new(file)))
        }
        _ => Ok(Box::new(BufReader::new(tokio::io::stdin()))),
    }
}

fn feed_line(server: &Tase2Server, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    match serde_json::from_str::<Batch>(line) {
        Ok(batch) => {
            let readings = batch.into_readings();
            let applied = server.send(&readings);
            debug!(readings = readings.len(), applied, "readings dispatched");
        }
        Err(err) => warn!(error = %err, "ignoring malformed input line"),
    }
}

async fn run_daemon(loaded: LoadedGatewayConfig, input: Option<PathBuf>) -> Result<()> {
    let config = &loaded.config;
    let registry = new_registry();
    let daemon_metrics = DaemonMetrics::new(registry.clone())?;
    daemon_metrics.inc_start();

    let (metrics_server, tase2_metrics) = if config.metrics.enabled {
        info!(address = %config.metrics.listen, "metrics exporter enabled");
        let tase2_metrics = Tase2Metrics::new(registry.clone())?;
        (
            Some(spawn_http_server(registry.clone(), config.metrics.listen)?),
            Some(tase2_metrics),
        )
    } else {
        info!("metrics exporter disabled by configuration");
        (None, None)
    };

    let engine = Arc::new(RecordingEngine::new());
    let mut server = Tase2Server::new(engine)
        .with_name(config.name.clone())
        .with_metrics(tase2_metrics)
        .with_sweep_interval(config.tracker.sweep_interval);

    let load_started = Instant::now();
    let report = load_documents(&loaded, &mut server).await?;
    daemon_metrics.observe_config_load(load_started.elapsed().as_secs_f64());
    if !report.is_complete() {
        warn!(
            failures = report.failures.len(),
            "running with a partially imported configuration"
        );
    }

    server.register_control(Arc::new(StdoutControl));
    server.start()?;

    let mut lines = open_input(input).await?.lines();
    info!(name = %server.name(), "gateway running; waiting for readings or termination signal");
    loop {
        tokio::select! {
            result = signal::ctrl_c() => {
                result.context("failed to listen for ctrl-c")?;
                info!("ctrl-c received; shutting down");
                break;
            }
            line = lines.next_line() => match line.context("failed to read input")? {
                Some(line) => feed_line(&server, &line),
                None => {
                    info!("input closed; waiting for termination signal");
                    signal::ctrl_c().await?;
                    break;
                }
            },
        }
    }

    server.stop().await;
    if let Some(metrics) = metrics_server {
        metrics.shutdown().await?;
    }
    Ok(())
}
