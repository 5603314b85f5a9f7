//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Command forwarder turning engine control events into host notifications."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Select, operate and set-tag events from the protocol engine.
//!
//! Select and operate on an exchanged control point become a
//! [`CommandNotification`] for the registered [`ControlHandler`], and an
//! entry in the outstanding command tracker. Set-tag is only logged.

use std::sync::Arc;

use parking_lot::RwLock;
use r_ems_common::time::epoch_millis;
use r_ems_metrics::Tase2Metrics;
use serde::ser::{Serialize, SerializeMap, Serializer};
use tracing::{debug, info, warn};

use crate::model::{DataModel, Scope};
use crate::outstanding::OutstandingCommands;
use crate::types::ControlKind;

/// Answer returned to the protocol engine for a control event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerResult {
    Success,
    NotHandled,
}

/// Value carried by an operate event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperateValue {
    Command(i32),
    Discrete(i32),
    Real(f32),
}

impl OperateValue {
    /// The control kind this value can operate.
    pub fn kind(&self) -> ControlKind {
        match self {
            OperateValue::Command(_) => ControlKind::Command,
            OperateValue::Discrete(_) => ControlKind::SetPointDiscrete,
            OperateValue::Real(_) => ControlKind::SetPointReal,
        }
    }

    /// Integers in decimal, reals with six fractional digits.
    pub fn format(&self) -> String {
        match self {
            OperateValue::Command(value) | OperateValue::Discrete(value) => value.to_string(),
            OperateValue::Real(value) => format!("{:.6}", value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagValue {
    NoTag,
    OpenAndCloseInhibit,
    CloseOnlyInhibit,
    Invalid,
}

/// The fixed seven-field notification handed to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandNotification {
    pub kind: ControlKind,
    pub scope: Scope,
    pub domain: String,
    pub name: String,
    /// Empty for select.
    pub value: String,
    pub select: bool,
    pub timestamp_ms: u64,
}

impl CommandNotification {
    pub const OPERATION: &'static str = "TASE2Command";
    pub const PARAMETER_NAMES: [&'static str; 7] = [
        "co_type", "co_scope", "co_domain", "co_name", "co_value", "co_se", "co_ts",
    ];

    /// Parameter values in [`Self::PARAMETER_NAMES`] order.
    pub fn parameters(&self) -> [String; 7] {
        [
            self.kind.as_str().to_owned(),
            self.scope.as_str().to_owned(),
            self.domain.clone(),
            self.name.clone(),
            self.value.clone(),
            if self.select { "1" } else { "0" }.to_owned(),
            self.timestamp_ms.to_string(),
        ]
    }
}

impl Serialize for CommandNotification {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(Self::PARAMETER_NAMES.len()))?;
        for (name, value) in Self::PARAMETER_NAMES.iter().zip(self.parameters()) {
            map.serialize_entry(name, &value)?;
        }
        map.end()
    }
}

/// Host-side receiver of forwarded commands.
pub trait ControlHandler: Send + Sync {
    /// Returns `false` when the host did not accept the command.
    fn forward_command(&self, notification: &CommandNotification) -> bool;
}

impl<F> ControlHandler for F
where
    F: Fn(&CommandNotification) -> bool + Send + Sync,
{
    fn forward_command(&self, notification: &CommandNotification) -> bool {
        self(notification)
    }
}

/// Shared registration slot for the host's control handler.
pub type HandlerSlot = Arc<RwLock<Option<Arc<dyn ControlHandler>>>>;

pub struct CommandForwarder {
    model: Arc<DataModel>,
    tracker: Arc<OutstandingCommands>,
    handler: HandlerSlot,
    metrics: Option<Tase2Metrics>,
}

impl CommandForwarder {
    pub fn new(model: Arc<DataModel>, tracker: Arc<OutstandingCommands>, handler: HandlerSlot) -> Self {
        Self {
            model,
            tracker,
            handler,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<Tase2Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn handle_select(&self, domain: &str, label: &str) -> HandlerResult {
        self.forward(domain, label, None)
    }

    pub fn handle_operate(&self, domain: &str, label: &str, value: OperateValue) -> HandlerResult {
        self.forward(domain, label, Some(value))
    }

    pub fn handle_set_tag(
        &self,
        domain: &str,
        label: &str,
        tag: TagValue,
        reason: &str,
    ) -> HandlerResult {
        info!(domain = %domain, point = %label, tag = ?tag, reason = %reason, "set tag requested");
        self.record("SetTag", "logged");
        HandlerResult::Success
    }

    fn record(&self, kind: &str, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_command(kind, outcome);
        }
    }

    fn forward(&self, domain: &str, label: &str, value: Option<OperateValue>) -> HandlerResult {
        let select = value.is_none();
        let event = if select { "select" } else { "operate" };

        let Some(point) = self.model.point(domain, label) else {
            debug!(domain = %domain, point = %label, event, "dropping command for unknown point");
            self.record("unknown", "dropped");
            return HandlerResult::NotHandled;
        };
        let Some(kind) = point.point_type().control_kind() else {
            warn!(domain = %domain, point = %label, event, "dropping command for indication point");
            self.record("unknown", "dropped");
            return HandlerResult::NotHandled;
        };
        if !point.is_exchanged() {
            debug!(domain = %domain, point = %label, event, "dropping command for point outside exchanged data");
            self.record(kind.as_str(), "dropped");
            return HandlerResult::NotHandled;
        }
        if let Some(operated) = value.filter(|value| value.kind() != kind) {
            warn!(
                domain = %domain,
                point = %label,
                kind = %kind,
                value_kind = %operated.kind(),
                "dropping operate with a value of the wrong kind"
            );
            self.record(kind.as_str(), "kind_mismatch");
            return HandlerResult::NotHandled;
        }

        let handler = self.handler.read().clone();
        let Some(handler) = handler else {
            warn!(domain = %domain, point = %label, event, "no control handler registered");
            self.record(kind.as_str(), "no_handler");
            return HandlerResult::NotHandled;
        };

        let notification = CommandNotification {
            kind,
            scope: Scope::of(domain),
            domain: domain.to_owned(),
            name: label.to_owned(),
            value: value.map(|value| value.format()).unwrap_or_default(),
            select,
            timestamp_ms: epoch_millis(),
        };

        self.tracker.insert(domain, label, select);
        debug!(domain = %domain, point = %label, kind = %kind, event, value = %notification.value, "forwarding command");

        if handler.forward_command(&notification) {
            self.record(kind.as_str(), "forwarded");
        } else {
            warn!(domain = %domain, point = %label, kind = %kind, event, "control handler rejected command");
            self.record(kind.as_str(), "rejected");
        }
        HandlerResult::Success
    }
}
