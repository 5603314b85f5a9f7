//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Boundary to the TASE.2 protocol engine and an in-memory recording engine."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! The protocol engine owns wire encoding, associations, TLS and report
//! transmission. This crate only needs the small surface in
//! [`ProtocolEngine`]: lifecycle plus one live-value update per indication
//! case.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use crate::errors::EngineError;
use crate::model::{DataModel, LiveValue, PointValue};
use crate::protocol::EndpointSettings;
use crate::quality::DataFlags;
use crate::tls::TlsSettings;

/// One live-value update, split the way the engine exposes them: four
/// families, each bare, with quality, or with quality and timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "case", rename_all = "snake_case")]
pub enum IndicationUpdate {
    Real { value: f32 },
    RealQ { value: f32, flags: DataFlags },
    RealQTimeStamp { value: f32, flags: DataFlags, timestamp_ms: u64 },
    State { value: i64 },
    StateQ { value: i64, flags: DataFlags },
    StateQTimeStamp { value: i64, flags: DataFlags, timestamp_ms: u64 },
    Discrete { value: i64 },
    DiscreteQ { value: i64, flags: DataFlags },
    DiscreteQTimeStamp { value: i64, flags: DataFlags, timestamp_ms: u64 },
    StateSupplemental { value: i64 },
    StateSupplementalQ { value: i64, flags: DataFlags },
    StateSupplementalQTimeStamp { value: i64, flags: DataFlags, timestamp_ms: u64 },
}

impl IndicationUpdate {
    /// The cached state a point holds after this update.
    pub fn live_value(&self) -> LiveValue {
        use IndicationUpdate::*;

        let (value, flags, timestamp_ms) = match *self {
            Real { value } => (PointValue::Real(value), DataFlags::empty(), None),
            RealQ { value, flags } => (PointValue::Real(value), flags, None),
            RealQTimeStamp {
                value,
                flags,
                timestamp_ms,
            } => (PointValue::Real(value), flags, Some(timestamp_ms)),
            State { value } | Discrete { value } | StateSupplemental { value } => {
                (PointValue::Integer(value), DataFlags::empty(), None)
            }
            StateQ { value, flags }
            | DiscreteQ { value, flags }
            | StateSupplementalQ { value, flags } => (PointValue::Integer(value), flags, None),
            StateQTimeStamp {
                value,
                flags,
                timestamp_ms,
            }
            | DiscreteQTimeStamp {
                value,
                flags,
                timestamp_ms,
            }
            | StateSupplementalQTimeStamp {
                value,
                flags,
                timestamp_ms,
            } => (PointValue::Integer(value), flags, Some(timestamp_ms)),
        };

        LiveValue {
            value,
            flags,
            timestamp_ms,
        }
    }
}

/// The external TASE.2 protocol engine.
///
/// Implementations are called from the telemetry path and from the server
/// lifecycle, so they must tolerate concurrent calls.
pub trait ProtocolEngine: Send + Sync {
    /// Bind the endpoint and publish `model` to peers.
    fn start(
        &self,
        endpoint: &EndpointSettings,
        tls: Option<&TlsSettings>,
        model: &DataModel,
    ) -> Result<(), EngineError>;

    fn stop(&self);

    fn is_running(&self) -> bool;

    fn update_online_value(&self, domain: &str, label: &str, update: &IndicationUpdate);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedUpdate {
    pub domain: String,
    pub label: String,
    pub update: IndicationUpdate,
}

/// In-memory engine that records every call. Used by tests and the daemon's
/// dry-run mode.
#[derive(Debug, Default)]
pub struct RecordingEngine {
    running: AtomicBool,
    fail_start: bool,
    endpoint: Mutex<Option<EndpointSettings>>,
    updates: Mutex<Vec<RecordedUpdate>>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// An engine whose `start` always fails.
    pub fn failing() -> Self {
        Self {
            fail_start: true,
            ..Self::default()
        }
    }

    pub fn endpoint(&self) -> Option<EndpointSettings> {
        self.endpoint.lock().clone()
    }

    pub fn updates(&self) -> Vec<RecordedUpdate> {
        self.updates.lock().clone()
    }

    pub fn take_updates(&self) -> Vec<RecordedUpdate> {
        std::mem::take(&mut *self.updates.lock())
    }
}

impl ProtocolEngine for RecordingEngine {
    fn start(
        &self,
        endpoint: &EndpointSettings,
        tls: Option<&TlsSettings>,
        model: &DataModel,
    ) -> Result<(), EngineError> {
        if self.fail_start {
            return Err(EngineError::Start(format!(
                "cannot bind {}",
                endpoint.socket_addr()
            )));
        }
        *self.endpoint.lock() = Some(endpoint.clone());
        self.running.store(true, Ordering::SeqCst);
        info!(
            address = %endpoint.socket_addr(),
            tls = tls.is_some(),
            points = model.point_count(),
            bilateral_tables = model.bilateral_tables().len(),
            "recording engine started"
        );
        Ok(())
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn update_online_value(&self, domain: &str, label: &str, update: &IndicationUpdate) {
        debug!(domain = %domain, point = %label, update = ?update, "online value updated");
        self.updates.lock().push(RecordedUpdate {
            domain: domain.to_owned(),
            label: label.to_owned(),
            update: *update,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_value_of_each_shape() {
        let flags = DataFlags::VALIDITY_VALID;
        assert_eq!(
            IndicationUpdate::Real { value: 1.5 }.live_value(),
            LiveValue {
                value: PointValue::Real(1.5),
                flags: DataFlags::empty(),
                timestamp_ms: None
            }
        );
        assert_eq!(
            IndicationUpdate::DiscreteQ { value: 4, flags }.live_value(),
            LiveValue {
                value: PointValue::Integer(4),
                flags,
                timestamp_ms: None
            }
        );
        assert_eq!(
            IndicationUpdate::StateSupplementalQTimeStamp {
                value: 2,
                flags,
                timestamp_ms: 1_000
            }
            .live_value()
            .timestamp_ms,
            Some(1_000)
        );
    }

    #[test]
    fn recording_engine_lifecycle() {
        let engine = RecordingEngine::new();
        let model = DataModel::new();
        assert!(!engine.is_running());
        engine
            .start(&EndpointSettings::default(), None, &model)
            .unwrap();
        assert!(engine.is_running());
        assert_eq!(engine.endpoint().unwrap().port, 102);

        engine.update_online_value("vcc", "p", &IndicationUpdate::State { value: 1 });
        assert_eq!(engine.take_updates().len(), 1);
        assert!(engine.updates().is_empty());

        engine.stop();
        assert!(!engine.is_running());
    }

    #[test]
    fn failing_engine_reports_start_error() {
        let engine = RecordingEngine::failing();
        let err = engine
            .start(&EndpointSettings::default(), None, &DataModel::new())
            .unwrap_err();
        assert!(err.to_string().contains("0.0.0.0:102"));
        assert!(!engine.is_running());
    }
}
