//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Error types for TASE.2 model import and server lifecycle."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ImportError>;

/// Failures that abort a whole document import.
///
/// Per-entry problems (bad names, unknown types, unresolved references) are
/// logged and skipped instead; they never surface here.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("{document} document is not valid JSON: {source}")]
    Parse {
        document: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("{document} document is missing mandatory section '{section}'")]
    MissingSection {
        document: &'static str,
        section: &'static str,
    },
    #[error("{document} section '{section}' is malformed: {reason}")]
    MalformedSection {
        document: &'static str,
        section: &'static str,
        reason: String,
    },
    #[error("bilateral table '{table}' references unknown domain '{domain}'")]
    UnknownDomain { table: String, domain: String },
}

/// Failures of the engine collaborator behind [`crate::engine::ProtocolEngine`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("protocol engine failed to start: {0}")]
    Start(String),
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("configuration item '{0}' is missing")]
    MissingConfigItem(&'static str),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("server must be started from within a tokio runtime")]
    NoRuntime,
    #[error("server has no configuration loaded")]
    NotConfigured,
    #[error("server is already running")]
    AlreadyRunning,
}
