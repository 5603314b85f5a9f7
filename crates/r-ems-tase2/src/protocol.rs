//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Protocol stack settings: endpoint, AP titles and command timeout."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::errors::{ImportError, Result};
use crate::model::PeerIdentity;

const DOCUMENT: &str = "protocol_stack";

pub const DEFAULT_PORT: u16 = 102;
pub const DEFAULT_CMD_EXEC_TIMEOUT: Duration = Duration::from_secs(5);

/// Where and how the engine listens for associations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointSettings {
    pub ip: Ipv4Addr,
    /// Set once a valid `srv_ip` was configured.
    pub bind_on_ip: bool,
    pub port: u16,
    pub tls: bool,
    pub passive: bool,
    pub local_ap_title: Option<PeerIdentity>,
    pub remote_ap_title: Option<PeerIdentity>,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            ip: Ipv4Addr::UNSPECIFIED,
            bind_on_ip: false,
            port: DEFAULT_PORT,
            tls: false,
            passive: true,
            local_ap_title: None,
            remote_ap_title: None,
        }
    }
}

impl EndpointSettings {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip, self.port))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolSettings {
    pub name: Option<String>,
    pub version: Option<String>,
    pub endpoint: EndpointSettings,
    pub cmd_exec_timeout: Duration,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            name: None,
            version: None,
            endpoint: EndpointSettings::default(),
            cmd_exec_timeout: DEFAULT_CMD_EXEC_TIMEOUT,
        }
    }
}

fn fatal(err: ImportError) -> ImportError {
    error!(fatal = true, document = DOCUMENT, error = %err, "protocol stack import aborted");
    err
}

fn ap_title(layer: &Map<String, Value>, key: &str) -> Option<PeerIdentity> {
    let value = layer.get(key)?;
    let Some(text) = value.as_str() else {
        warn!(key = %key, "AP title is not a string, ignoring");
        return None;
    };
    match text.parse() {
        Ok(identity) => Some(identity),
        Err(reason) => {
            warn!(key = %key, reason = %reason, "ignoring AP title");
            None
        }
    }
}

impl ProtocolSettings {
    /// Apply a `protocol_stack` document on top of the current settings.
    ///
    /// Bad individual values are logged and left at their previous value. A
    /// missing `protocol_stack` or `transport_layer` section is an error and
    /// leaves every setting untouched.
    pub fn import(&mut self, document: &str) -> Result<()> {
        let root: Value = serde_json::from_str(document).map_err(|source| {
            fatal(ImportError::Parse {
                document: DOCUMENT,
                source,
            })
        })?;
        let stack = root
            .get("protocol_stack")
            .and_then(Value::as_object)
            .ok_or_else(|| {
                fatal(ImportError::MissingSection {
                    document: DOCUMENT,
                    section: "protocol_stack",
                })
            })?;
        let transport = stack
            .get("transport_layer")
            .and_then(Value::as_object)
            .ok_or_else(|| {
                fatal(ImportError::MissingSection {
                    document: DOCUMENT,
                    section: "transport_layer",
                })
            })?;

        self.name = stack.get("name").and_then(Value::as_str).map(str::to_owned);
        self.version = stack
            .get("version")
            .and_then(Value::as_str)
            .map(str::to_owned);

        self.apply_transport(transport);
        if let Some(application) = stack.get("application_layer").and_then(Value::as_object) {
            self.apply_application(application);
        }

        debug!(
            address = %self.endpoint.socket_addr(),
            tls = self.endpoint.tls,
            cmd_exec_timeout_s = self.cmd_exec_timeout.as_secs(),
            "protocol stack imported"
        );
        Ok(())
    }

    fn apply_transport(&mut self, transport: &Map<String, Value>) {
        let endpoint = &mut self.endpoint;

        if let Some(port) = transport.get("port") {
            match port.as_i64() {
                Some(port) => match u16::try_from(port) {
                    Ok(port) if port > 0 => endpoint.port = port,
                    _ => warn!(port, "transport_layer.port out of range, using default port"),
                },
                None => warn!("transport_layer.port has invalid type, using default port"),
            }
        }

        if let Some(ip) = transport.get("srv_ip") {
            match ip.as_str().map(str::parse::<Ipv4Addr>) {
                Some(Ok(ip)) => {
                    endpoint.ip = ip;
                    endpoint.bind_on_ip = true;
                }
                _ => warn!(srv_ip = %ip, "transport_layer.srv_ip is not a valid IPv4 address, ignoring"),
            }
        }

        if let Some(tls) = transport.get("tls") {
            match tls.as_bool() {
                Some(tls) => endpoint.tls = tls,
                None => warn!("transport_layer.tls has invalid type, not using TLS"),
            }
        }

        if let Some(passive) = transport.get("passive") {
            match passive.as_bool() {
                Some(passive) => endpoint.passive = passive,
                None => warn!("transport_layer.passive has invalid type, ignoring"),
            }
        }

        if let Some(identity) = ap_title(transport, "localApTitle") {
            endpoint.local_ap_title = Some(identity);
        }
        if let Some(identity) = ap_title(transport, "remoteApTitle") {
            endpoint.remote_ap_title = Some(identity);
        }
    }

    fn apply_application(&mut self, application: &Map<String, Value>) {
        if let Some(timeout) = application.get("cmd_exec_timeout") {
            match timeout.as_u64() {
                Some(seconds) if seconds > 0 => {
                    self.cmd_exec_timeout = Duration::from_secs(seconds)
                }
                _ => warn!(
                    value = %timeout,
                    "application_layer.cmd_exec_timeout must be a positive number of seconds, keeping default"
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn import(doc: Value) -> (ProtocolSettings, Result<()>) {
        let mut settings = ProtocolSettings::default();
        let result = settings.import(&doc.to_string());
        (settings, result)
    }

    #[test]
    fn full_document() {
        let (settings, result) = import(json!({
            "protocol_stack": {
                "name": "tase2north",
                "version": "1.0",
                "transport_layer": {
                    "srv_ip": "127.0.0.1",
                    "port": 10002,
                    "tls": true,
                    "passive": false,
                    "localApTitle": "1.1.1.999:12",
                    "remoteApTitle": "1.1.1.998:12"
                },
                "application_layer": { "cmd_exec_timeout": 3 }
            }
        }));
        result.unwrap();
        assert_eq!(settings.name.as_deref(), Some("tase2north"));
        let endpoint = &settings.endpoint;
        assert_eq!(endpoint.socket_addr(), "127.0.0.1:10002".parse().unwrap());
        assert!(endpoint.bind_on_ip);
        assert!(endpoint.tls);
        assert!(!endpoint.passive);
        assert_eq!(endpoint.local_ap_title.as_ref().unwrap().ae_qualifier, 12);
        assert_eq!(
            endpoint.remote_ap_title.as_ref().unwrap().ap_title,
            "1.1.1.998"
        );
        assert_eq!(settings.cmd_exec_timeout, Duration::from_secs(3));
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        for port in [json!(0), json!(65536), json!(-4), json!("102x")] {
            let (settings, result) = import(json!({
                "protocol_stack": {
                    "transport_layer": {
                        "port": port,
                        "srv_ip": "300.1.1.1",
                        "tls": "yes",
                        "localApTitle": "nonsense"
                    },
                    "application_layer": { "cmd_exec_timeout": "soon" }
                }
            }));
            result.unwrap();
            assert_eq!(settings.endpoint.port, DEFAULT_PORT);
            assert_eq!(settings.endpoint.ip, Ipv4Addr::UNSPECIFIED);
            assert!(!settings.endpoint.bind_on_ip);
            assert!(!settings.endpoint.tls);
            assert!(settings.endpoint.local_ap_title.is_none());
            assert_eq!(settings.cmd_exec_timeout, DEFAULT_CMD_EXEC_TIMEOUT);
        }
    }

    #[test]
    fn port_boundaries() {
        for (port, expected) in [(1, 1), (65535, 65535)] {
            let (settings, _) =
                import(json!({ "protocol_stack": { "transport_layer": { "port": port } } }));
            assert_eq!(settings.endpoint.port, expected);
        }
    }

    #[test]
    fn missing_sections_are_fatal_and_keep_defaults() {
        let (settings, result) = import(json!({ "protocol_stack": { "name": "x" } }));
        assert!(matches!(
            result,
            Err(ImportError::MissingSection { section: "transport_layer", .. })
        ));
        assert_eq!(settings, ProtocolSettings::default());

        let (_, result) = import(json!({}));
        assert!(matches!(
            result,
            Err(ImportError::MissingSection { section: "protocol_stack", .. })
        ));
    }
}
