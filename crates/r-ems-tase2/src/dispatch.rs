//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Type-checked dispatch of inbound telemetry into indication points."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Telemetry dispatch.
//!
//! Each record is checked in a fixed order (type name, point, exchange flag,
//! declared type, value kind) and either applied to exactly one indication
//! point or skipped with a [`SkipReason`]. A skipped record never touches the
//! point it names.

use std::sync::Arc;

use r_ems_common::time::{epoch_millis, truncate_to_second};
use r_ems_metrics::Tase2Metrics;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use crate::engine::{IndicationUpdate, ProtocolEngine};
use crate::model::DataModel;
use crate::outstanding::OutstandingCommands;
use crate::quality::{DataFlags, QualityAxes};
use crate::types::{classify, Family, PointType, TimestampClass};

/// Numeric payload of a telemetry record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordValue {
    Integer(i64),
    Float(f64),
}

/// The `data_object` attribute bag carried by a reading.
///
/// Quality axes and the timestamp are read leniently: a value of the wrong
/// JSON kind is treated as absent rather than rejecting the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    #[serde(rename = "do_domain")]
    pub domain: String,
    #[serde(rename = "do_name")]
    pub name: String,
    #[serde(rename = "do_type", default)]
    pub type_name: Option<String>,
    #[serde(rename = "do_value", default)]
    pub value: Option<RecordValue>,
    #[serde(rename = "do_validity", default, deserialize_with = "lenient_text")]
    pub validity: Option<String>,
    #[serde(rename = "do_cs", default, deserialize_with = "lenient_text")]
    pub source: Option<String>,
    #[serde(
        rename = "do_quality_normal_value",
        default,
        deserialize_with = "lenient_text"
    )]
    pub normal_value: Option<String>,
    #[serde(rename = "do_ts", default, deserialize_with = "lenient_millis")]
    pub timestamp_ms: Option<u64>,
    #[serde(rename = "do_ts_validity", default, deserialize_with = "lenient_text")]
    pub timestamp_validity: Option<String>,
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) => Some(text),
        _ => None,
    })
}

fn lenient_millis<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Value::deserialize(deserializer)?.as_u64())
}

impl TelemetryRecord {
    pub fn new(
        domain: impl Into<String>,
        name: impl Into<String>,
        type_name: impl Into<String>,
        value: RecordValue,
    ) -> Self {
        Self {
            domain: domain.into(),
            name: name.into(),
            type_name: Some(type_name.into()),
            value: Some(value),
            validity: None,
            source: None,
            normal_value: None,
            timestamp_ms: None,
            timestamp_validity: None,
        }
    }

    pub fn quality(&self) -> QualityAxes<'_> {
        QualityAxes {
            validity: self.validity.as_deref(),
            source: self.source.as_deref(),
            normal_value: self.normal_value.as_deref(),
            timestamp_validity: self.timestamp_validity.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    UnknownType,
    UnknownPoint,
    NotExchanged,
    TypeMismatch,
    /// The record names a control point; only indications take telemetry.
    ControlPoint,
    MissingValue,
    ValueKindMismatch,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::UnknownType => "unknown_type",
            SkipReason::UnknownPoint => "unknown_point",
            SkipReason::NotExchanged => "not_exchanged",
            SkipReason::TypeMismatch => "type_mismatch",
            SkipReason::ControlPoint => "control_point",
            SkipReason::MissingValue => "missing_value",
            SkipReason::ValueKindMismatch => "value_kind_mismatch",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Applied,
    Skipped(SkipReason),
}

impl DispatchOutcome {
    pub fn is_applied(self) -> bool {
        matches!(self, DispatchOutcome::Applied)
    }

    fn label(self) -> &'static str {
        match self {
            DispatchOutcome::Applied => "applied",
            DispatchOutcome::Skipped(reason) => reason.as_str(),
        }
    }
}

enum Detail {
    Bare,
    Quality,
    Timed(u64),
}

/// Select the engine update for `point_type`, checking the value kind.
fn build_update(
    point_type: PointType,
    value: RecordValue,
    flags: DataFlags,
    timestamp_ms: Option<u64>,
) -> Result<IndicationUpdate, SkipReason> {
    use IndicationUpdate as U;

    let family = point_type.family().ok_or(SkipReason::ControlPoint)?;
    let detail = match (point_type.has_quality(), point_type.timestamp_class()) {
        (false, _) => Detail::Bare,
        (true, TimestampClass::None) => Detail::Quality,
        (true, TimestampClass::Normal) => {
            Detail::Timed(truncate_to_second(timestamp_ms.unwrap_or_else(epoch_millis)))
        }
        (true, TimestampClass::Extended) => Detail::Timed(timestamp_ms.unwrap_or_else(epoch_millis)),
    };

    if family == Family::Real {
        let RecordValue::Float(value) = value else {
            return Err(SkipReason::ValueKindMismatch);
        };
        let value = value as f32;
        return Ok(match detail {
            Detail::Bare => U::Real { value },
            Detail::Quality => U::RealQ { value, flags },
            Detail::Timed(timestamp_ms) => U::RealQTimeStamp {
                value,
                flags,
                timestamp_ms,
            },
        });
    }

    let RecordValue::Integer(value) = value else {
        return Err(SkipReason::ValueKindMismatch);
    };
    Ok(match (family, detail) {
        (Family::State, Detail::Bare) => U::State { value },
        (Family::State, Detail::Quality) => U::StateQ { value, flags },
        (Family::State, Detail::Timed(timestamp_ms)) => U::StateQTimeStamp {
            value,
            flags,
            timestamp_ms,
        },
        (Family::Discrete, Detail::Bare) => U::Discrete { value },
        (Family::Discrete, Detail::Quality) => U::DiscreteQ { value, flags },
        (Family::Discrete, Detail::Timed(timestamp_ms)) => U::DiscreteQTimeStamp {
            value,
            flags,
            timestamp_ms,
        },
        (Family::StateSupplemental, Detail::Bare) => U::StateSupplemental { value },
        (Family::StateSupplemental, Detail::Quality) => U::StateSupplementalQ { value, flags },
        (Family::StateSupplemental, Detail::Timed(timestamp_ms)) => {
            U::StateSupplementalQTimeStamp {
                value,
                flags,
                timestamp_ms,
            }
        }
        (Family::Real, _) => return Err(SkipReason::ValueKindMismatch),
    })
}

/// Applies telemetry records to the model and the protocol engine.
pub struct Dispatcher {
    model: Arc<DataModel>,
    engine: Arc<dyn ProtocolEngine>,
    tracker: Arc<OutstandingCommands>,
    metrics: Option<Tase2Metrics>,
}

impl Dispatcher {
    pub fn new(
        model: Arc<DataModel>,
        engine: Arc<dyn ProtocolEngine>,
        tracker: Arc<OutstandingCommands>,
    ) -> Self {
        Self {
            model,
            engine,
            tracker,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<Tase2Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn dispatch(&self, record: &TelemetryRecord) -> DispatchOutcome {
        let outcome = self.apply(record);
        match outcome {
            DispatchOutcome::Applied => {
                trace!(domain = %record.domain, point = %record.name, "record applied")
            }
            DispatchOutcome::Skipped(reason) => debug!(
                domain = %record.domain,
                point = %record.name,
                declared_type = record.type_name.as_deref().unwrap_or(""),
                reason = reason.as_str(),
                "skipping record"
            ),
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_record(outcome.label());
        }
        outcome
    }

    fn apply(&self, record: &TelemetryRecord) -> DispatchOutcome {
        use DispatchOutcome::Skipped;

        // Any record for a point confirms the oldest command pending on it.
        self.tracker.confirm(&record.domain, &record.name);

        let Some(declared) = record.type_name.as_deref().and_then(classify) else {
            return Skipped(SkipReason::UnknownType);
        };
        let Some(point) = self.model.point(&record.domain, &record.name) else {
            return Skipped(SkipReason::UnknownPoint);
        };
        if !point.is_exchanged() {
            return Skipped(SkipReason::NotExchanged);
        }
        if point.point_type() != declared {
            return Skipped(SkipReason::TypeMismatch);
        }
        let Some(indication) = point.as_indication() else {
            return Skipped(SkipReason::ControlPoint);
        };
        let Some(value) = record.value else {
            return Skipped(SkipReason::MissingValue);
        };

        let flags = record.quality().to_flags();
        let update = match build_update(declared, value, flags, record.timestamp_ms) {
            Ok(update) => update,
            Err(reason) => return Skipped(reason),
        };

        indication.store(update.live_value());
        self.engine
            .update_online_value(point.domain(), point.label(), &update);
        DispatchOutcome::Applied
    }
}
