//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "ICCP / TASE.2 server data model compiler and runtime dispatcher."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! ICCP / TASE.2 server side of the R-EMS gateway.
//!
//! JSON configuration documents are compiled into a [`DataModel`] of
//! domains and typed points. At runtime the [`Dispatcher`] pushes telemetry
//! records into the model and the protocol engine, while the
//! [`CommandForwarder`] hands select/operate requests from remote peers to
//! the host and tracks them until they are confirmed or time out.

pub mod category;
pub mod control;
pub mod dispatch;
pub mod engine;
pub mod errors;
pub mod exchange;
pub mod import;
pub mod model;
pub mod outstanding;
pub mod protocol;
pub mod quality;
pub mod server;
pub mod tls;
pub mod types;

pub use category::{ConfigCategory, ConfigItem};
pub use control::{
    CommandForwarder, CommandNotification, ControlHandler, HandlerResult, OperateValue, TagValue,
};
pub use dispatch::{DispatchOutcome, Dispatcher, RecordValue, SkipReason, TelemetryRecord};
pub use engine::{IndicationUpdate, ProtocolEngine, RecordedUpdate, RecordingEngine};
pub use errors::{EngineError, ImportError, ServerError};
pub use exchange::{import_exchange, ExchangeSummary};
pub use import::{import_model, ImportSummary};
pub use model::{DataModel, Domain, Point, Scope, GLOBAL_DOMAIN};
pub use outstanding::{spawn_sweeper, OutstandingCommand, OutstandingCommands, SweepHandle};
pub use protocol::{EndpointSettings, ProtocolSettings};
pub use quality::DataFlags;
pub use server::{ConfigReport, Datapoint, Reading, Tase2Server};
pub use tls::TlsSettings;
pub use types::{classify, ControlKind, PointType};
