//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives for the TASE.2 gateway."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Shared primitives for the R-EMS TASE.2 gateway workspace: configuration
//! loading, tracing initialisation and wall-clock helpers.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{
    DocumentsConfig, GatewayConfig, LoadedGatewayConfig, LoggingConfig, MetricsConfig,
    TrackerConfig,
};
pub use logging::{init_tracing, LogFormat};
