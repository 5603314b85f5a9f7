//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Prometheus registry, exporter and TASE.2 gateway metrics."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::response::{IntoResponse, Response};
use axum::Router;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder, TEXT_FORMAT,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across services.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %addr, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

/// Prometheus scrape endpoint. Returns `text/plain` metrics even on large registries.
async fn metrics_handler(registry: SharedRegistry) -> Response {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(TEXT_FORMAT),
            )],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                String::from("metrics encoding error"),
            )
                .into_response()
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Return the bound address for convenience.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the gateway daemon process itself.
#[derive(Clone)]
pub struct DaemonMetrics {
    registry: SharedRegistry,
    starts_total: IntCounter,
    config_load_seconds: Histogram,
}

impl DaemonMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let starts_total = IntCounter::with_opts(Opts::new(
            "r_ems_tase2d_starts_total",
            "Total number of times the TASE.2 gateway daemon has initialised",
        ))?;
        registry.register(Box::new(starts_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let config_load_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "r_ems_tase2d_config_load_seconds",
                "Time spent loading and compiling the gateway documents",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(config_load_seconds.clone()))?;

        Ok(Self {
            registry,
            starts_total,
            config_load_seconds,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }
}

/// Counters and gauges for the telemetry dispatch and control paths.
#[derive(Clone, Debug)]
pub struct Tase2Metrics {
    registry: SharedRegistry,
    records: IntCounterVec,
    commands: IntCounterVec,
    outstanding: IntGauge,
    expired: IntCounter,
}

impl Tase2Metrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let records = IntCounterVec::new(
            Opts::new(
                "r_ems_tase2_records_total",
                "Telemetry records processed by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(records.clone()))?;

        let commands = IntCounterVec::new(
            Opts::new(
                "r_ems_tase2_commands_total",
                "Control events received from the protocol engine by kind and outcome",
            ),
            &["kind", "outcome"],
        )?;
        registry.register(Box::new(commands.clone()))?;

        let outstanding = IntGauge::with_opts(Opts::new(
            "r_ems_tase2_outstanding_commands",
            "Forwarded commands awaiting confirmation",
        ))?;
        registry.register(Box::new(outstanding.clone()))?;

        let expired = IntCounter::with_opts(Opts::new(
            "r_ems_tase2_outstanding_expired_total",
            "Outstanding commands removed by the timeout sweep",
        ))?;
        registry.register(Box::new(expired.clone()))?;

        Ok(Self {
            registry,
            records,
            commands,
            outstanding,
            expired,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    /// `outcome` is `applied` or a skip reason such as `unknown_point`.
    pub fn record_record(&self, outcome: &str) {
        self.records.with_label_values(&[outcome]).inc();
    }

    pub fn record_command(&self, kind: &str, outcome: &str) {
        self.commands.with_label_values(&[kind, outcome]).inc();
    }

    pub fn set_outstanding(&self, count: usize) {
        self.outstanding.set(count as i64);
    }

    pub fn record_expired(&self, count: usize) {
        self.expired.inc_by(count as u64);
    }
}

pub use prometheus;

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(registry: &SharedRegistry, name: &str) -> Vec<prometheus::proto::Metric> {
        registry
            .gather()
            .into_iter()
            .find(|family| family.get_name() == name)
            .map(|family| family.get_metric().to_vec())
            .unwrap_or_default()
    }

    #[test]
    fn gateway_metrics_register_and_count() {
        let registry = new_registry();
        let metrics = Tase2Metrics::new(registry.clone()).unwrap();

        metrics.record_record("applied");
        metrics.record_record("applied");
        metrics.record_record("unknown_point");
        metrics.record_command("SetPointReal", "forwarded");
        metrics.set_outstanding(3);
        metrics.record_expired(2);

        let records = sample(&registry, "r_ems_tase2_records_total");
        let applied = records
            .iter()
            .find(|m| m.get_label()[0].get_value() == "applied")
            .unwrap();
        assert_eq!(applied.get_counter().get_value(), 2.0);

        let outstanding = sample(&registry, "r_ems_tase2_outstanding_commands");
        assert_eq!(outstanding[0].get_gauge().get_value(), 3.0);

        let expired = sample(&registry, "r_ems_tase2_outstanding_expired_total");
        assert_eq!(expired[0].get_counter().get_value(), 2.0);
    }

    #[tokio::test]
    async fn scrape_returns_text_exposition() {
        let registry = new_registry();
        let metrics = Tase2Metrics::new(registry.clone()).unwrap();
        metrics.record_expired(1);

        let response = metrics_handler(registry).await;
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap();
        assert!(content_type.starts_with("text/plain"));
    }

    #[test]
    fn registering_twice_on_one_registry_fails() {
        let registry = new_registry();
        Tase2Metrics::new(registry.clone()).unwrap();
        assert!(Tase2Metrics::new(registry).is_err());
    }
}
