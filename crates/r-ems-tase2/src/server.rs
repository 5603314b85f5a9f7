//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "TASE.2 server facade: configuration, lifecycle, telemetry and control entry points."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! [`Tase2Server`] ties the compiled model to the protocol engine.
//!
//! Configuration builds a fresh [`DataModel`] from the four documents and
//! wires a [`Dispatcher`] and [`CommandForwarder`] around it. `start` hands
//! the model to the engine and spawns the outstanding command sweep; `stop`
//! undoes both.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use r_ems_metrics::Tase2Metrics;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::category::ConfigCategory;
use crate::control::{
    CommandForwarder, ControlHandler, HandlerResult, HandlerSlot, OperateValue, TagValue,
};
use crate::dispatch::{Dispatcher, TelemetryRecord};
use crate::engine::ProtocolEngine;
use crate::errors::{ImportError, ServerError};
use crate::exchange::{import_exchange, ExchangeSummary};
use crate::import::{import_model, ImportSummary};
use crate::model::DataModel;
use crate::outstanding::{spawn_sweeper, OutstandingCommands, SweepHandle};
use crate::protocol::ProtocolSettings;
use crate::tls::TlsSettings;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(50);

/// Name of the reading datapoint that carries a telemetry record.
pub const DATA_OBJECT: &str = "data_object";

const MANDATORY_ITEMS: [&str; 3] = ["protocol_stack", "exchanged_data", "model_conf"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datapoint {
    pub name: String,
    pub value: Value,
}

/// One reading from the host pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    #[serde(default)]
    pub asset: String,
    #[serde(default)]
    pub datapoints: Vec<Datapoint>,
}

/// Outcome of loading the configuration documents.
///
/// Import failures do not stop the remaining documents from loading; they
/// are collected in `failures`.
#[derive(Debug, Default)]
pub struct ConfigReport {
    pub model: ImportSummary,
    pub exchange: ExchangeSummary,
    pub failures: Vec<ImportError>,
}

impl ConfigReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

struct Compiled {
    model: Arc<DataModel>,
    tracker: Arc<OutstandingCommands>,
    dispatcher: Dispatcher,
    forwarder: Arc<CommandForwarder>,
}

pub struct Tase2Server {
    name: String,
    engine: Arc<dyn ProtocolEngine>,
    handler: HandlerSlot,
    protocol: ProtocolSettings,
    tls: Option<TlsSettings>,
    compiled: Option<Compiled>,
    sweep_interval: Duration,
    sweeper: Option<SweepHandle>,
    metrics: Option<Tase2Metrics>,
}

impl Tase2Server {
    pub fn new(engine: Arc<dyn ProtocolEngine>) -> Self {
        Self {
            name: "tase2".to_owned(),
            engine,
            handler: Arc::new(RwLock::new(None)),
            protocol: ProtocolSettings::default(),
            tls: None,
            compiled: None,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            sweeper: None,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<Tase2Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn protocol(&self) -> &ProtocolSettings {
        &self.protocol
    }

    pub fn tls(&self) -> Option<&TlsSettings> {
        self.tls.as_ref()
    }

    pub fn model(&self) -> Option<&Arc<DataModel>> {
        self.compiled.as_ref().map(|compiled| &compiled.model)
    }

    pub fn tracker(&self) -> Option<&Arc<OutstandingCommands>> {
        self.compiled.as_ref().map(|compiled| &compiled.tracker)
    }

    /// Entry point for engine control callbacks running on other threads.
    pub fn forwarder(&self) -> Option<Arc<CommandForwarder>> {
        self.compiled
            .as_ref()
            .map(|compiled| compiled.forwarder.clone())
    }

    pub fn is_running(&self) -> bool {
        self.engine.is_running()
    }

    /// Load the four configuration documents and rebuild the runtime.
    pub fn set_json_config(
        &mut self,
        protocol_stack: &str,
        exchanged_data: &str,
        tls_conf: Option<&str>,
        model_conf: &str,
    ) -> Result<ConfigReport, ServerError> {
        if self.sweeper.is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        let mut report = ConfigReport::default();
        let mut model = DataModel::new();

        match import_model(&mut model, model_conf) {
            Ok(summary) => report.model = summary,
            Err(err) => report.failures.push(err),
        }
        match import_exchange(&mut model, exchanged_data) {
            Ok(summary) => report.exchange = summary,
            Err(err) => report.failures.push(err),
        }

        let mut protocol = ProtocolSettings::default();
        if let Err(err) = protocol.import(protocol_stack) {
            report.failures.push(err);
        }
        self.protocol = protocol;

        self.tls = match tls_conf {
            Some(document) => match TlsSettings::from_document(document) {
                Ok(settings) => Some(settings),
                Err(err) => {
                    report.failures.push(err);
                    None
                }
            },
            None => None,
        };

        let model = Arc::new(model);
        let tracker = Arc::new(
            OutstandingCommands::new(self.protocol.cmd_exec_timeout)
                .with_metrics(self.metrics.clone()),
        );
        let dispatcher = Dispatcher::new(model.clone(), self.engine.clone(), tracker.clone())
            .with_metrics(self.metrics.clone());
        let forwarder = Arc::new(
            CommandForwarder::new(model.clone(), tracker.clone(), self.handler.clone())
                .with_metrics(self.metrics.clone()),
        );

        info!(
            server = %self.name,
            points = model.point_count(),
            exchanged = model.exchanged_count(),
            domains = model.domains().count(),
            bilateral_tables = model.bilateral_tables().len(),
            failures = report.failures.len(),
            "configuration loaded"
        );

        self.compiled = Some(Compiled {
            model,
            tracker,
            dispatcher,
            forwarder,
        });
        Ok(report)
    }

    /// Configure from a host pipeline category.
    pub fn configure(&mut self, category: &ConfigCategory) -> Result<ConfigReport, ServerError> {
        match category.value("name") {
            Some(name) if !name.is_empty() => self.name = name.to_owned(),
            _ => error!("configuration is missing the service name"),
        }

        let mut documents = Vec::with_capacity(MANDATORY_ITEMS.len());
        for item in MANDATORY_ITEMS {
            let Some(document) = category.effective(item) else {
                error!(item, "configuration is missing a mandatory item");
                return Err(ServerError::MissingConfigItem(item));
            };
            documents.push(document);
        }

        let tls_conf = category
            .effective("tls_conf")
            .filter(|document| !document.is_empty());
        if tls_conf.is_none() {
            warn!("no TLS configuration supplied");
        }

        self.set_json_config(documents[0], documents[1], tls_conf, documents[2])
    }

    pub fn register_control(&self, handler: Arc<dyn ControlHandler>) {
        *self.handler.write() = Some(handler);
        info!(server = %self.name, "control handler registered");
    }

    /// Start the engine and the sweep task. Must run inside a tokio runtime.
    pub fn start(&mut self) -> Result<(), ServerError> {
        tokio::runtime::Handle::try_current().map_err(|_| ServerError::NoRuntime)?;
        if self.sweeper.is_some() {
            return Err(ServerError::AlreadyRunning);
        }
        let Some(compiled) = &self.compiled else {
            error!(server = %self.name, "no configuration loaded, cannot start");
            return Err(ServerError::NotConfigured);
        };

        for table in compiled.model.bilateral_tables() {
            debug!(table = %table.name, domain = %table.domain, peer = %table.peer, "installing bilateral table");
        }
        self.engine.start(
            &self.protocol.endpoint,
            self.tls.as_ref(),
            &compiled.model,
        )?;
        self.sweeper = Some(spawn_sweeper(compiled.tracker.clone(), self.sweep_interval));

        info!(
            server = %self.name,
            address = %self.protocol.endpoint.socket_addr(),
            cmd_exec_timeout_s = self.protocol.cmd_exec_timeout.as_secs(),
            "TASE.2 server started"
        );
        Ok(())
    }

    /// Dispatch every `data_object` in `readings`. Returns the number applied.
    pub fn send(&self, readings: &[Reading]) -> u32 {
        if !self.engine.is_running() {
            debug!(server = %self.name, readings = readings.len(), "server not running, dropping readings");
            return 0;
        }
        let Some(compiled) = &self.compiled else {
            return 0;
        };

        let mut applied = 0;
        for reading in readings {
            for datapoint in &reading.datapoints {
                if datapoint.name != DATA_OBJECT {
                    debug!(asset = %reading.asset, datapoint = %datapoint.name, "ignoring datapoint");
                    continue;
                }
                match TelemetryRecord::deserialize(&datapoint.value) {
                    Ok(record) => {
                        if compiled.dispatcher.dispatch(&record).is_applied() {
                            applied += 1;
                        }
                    }
                    Err(err) => {
                        warn!(asset = %reading.asset, error = %err, "malformed data_object");
                    }
                }
            }
        }
        applied
    }

    pub fn handle_select(&self, domain: &str, label: &str) -> HandlerResult {
        match &self.compiled {
            Some(compiled) => compiled.forwarder.handle_select(domain, label),
            None => HandlerResult::NotHandled,
        }
    }

    pub fn handle_operate(&self, domain: &str, label: &str, value: OperateValue) -> HandlerResult {
        match &self.compiled {
            Some(compiled) => compiled.forwarder.handle_operate(domain, label, value),
            None => HandlerResult::NotHandled,
        }
    }

    pub fn handle_set_tag(
        &self,
        domain: &str,
        label: &str,
        tag: TagValue,
        reason: &str,
    ) -> HandlerResult {
        match &self.compiled {
            Some(compiled) => compiled.forwarder.handle_set_tag(domain, label, tag, reason),
            None => HandlerResult::NotHandled,
        }
    }

    /// Stop the sweep, drop pending commands and stop the engine.
    pub async fn stop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.shutdown().await;
        }
        if let Some(compiled) = &self.compiled {
            compiled.tracker.clear();
        }
        self.engine.stop();
        info!(server = %self.name, "TASE.2 server stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RecordingEngine;
    use serde_json::json;

    fn model_conf() -> String {
        json!({"model_conf": {
            "vcc": { "datapoints": [ { "name": "gmeas", "type": "Real", "hasCOV": false } ] },
            "icc": [],
            "bilateral_tables": []
        }})
        .to_string()
    }

    fn stack() -> String {
        json!({"protocol_stack": {"transport_layer": {"port": 10102}}}).to_string()
    }

    fn exchange() -> String {
        json!({"exchanged_data": {"datapoints": [
            { "label": "gmeas", "protocols": [ { "name": "tase2", "ref": "vcc:gmeas" } ] }
        ]}})
        .to_string()
    }

    #[test]
    fn start_requires_runtime() {
        let mut server = Tase2Server::new(Arc::new(RecordingEngine::new()));
        server
            .set_json_config(&stack(), &exchange(), None, &model_conf())
            .unwrap();
        assert!(matches!(server.start(), Err(ServerError::NoRuntime)));
    }

    #[tokio::test]
    async fn start_requires_configuration() {
        let mut server = Tase2Server::new(Arc::new(RecordingEngine::new()));
        assert!(matches!(server.start(), Err(ServerError::NotConfigured)));
        assert_eq!(server.handle_select("vcc", "x"), HandlerResult::NotHandled);
    }

    #[tokio::test]
    async fn partial_configuration_is_reported() {
        let mut server = Tase2Server::new(Arc::new(RecordingEngine::new()));
        let report = server
            .set_json_config("{}", &exchange(), Some("not json"), &model_conf())
            .unwrap();
        assert!(!report.is_complete());
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.model.points, 1);
        assert_eq!(report.exchange.flagged, 1);
        assert!(server.tls().is_none());
        assert_eq!(server.protocol(), &ProtocolSettings::default());
    }

    #[tokio::test]
    async fn send_is_ignored_until_started() {
        let engine = Arc::new(RecordingEngine::new());
        let mut server = Tase2Server::new(engine.clone());
        server
            .set_json_config(&stack(), &exchange(), None, &model_conf())
            .unwrap();
        let readings = vec![Reading {
            asset: "tm".into(),
            datapoints: vec![Datapoint {
                name: DATA_OBJECT.into(),
                value: json!({"do_domain": "vcc", "do_name": "gmeas", "do_type": "Real", "do_value": 1.5}),
            }],
        }];
        assert_eq!(server.send(&readings), 0);

        server.start().unwrap();
        assert!(matches!(server.start(), Err(ServerError::AlreadyRunning)));
        assert_eq!(server.send(&readings), 1);
        assert_eq!(engine.updates().len(), 1);

        server.stop().await;
        assert!(!server.is_running());
        assert_eq!(server.send(&readings), 0);
    }
}
