//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "TLS certificate file configuration handed to the protocol engine."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

use crate::errors::{ImportError, Result};

const DOCUMENT: &str = "tls_conf";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
struct CertFile {
    cert_file: String,
}

/// Certificate and key file names. Loading them is the engine's job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsSettings {
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default, rename = "own_cert")]
    pub own_certificate: Option<String>,
    #[serde(default, rename = "ca_certs", deserialize_with = "cert_files")]
    pub ca_certificates: Vec<String>,
    #[serde(default, rename = "remote_certs", deserialize_with = "cert_files")]
    pub remote_certificates: Vec<String>,
}

fn cert_files<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let files = Vec::<CertFile>::deserialize(deserializer)?;
    Ok(files.into_iter().map(|file| file.cert_file).collect())
}

fn fatal(err: ImportError) -> ImportError {
    error!(fatal = true, document = DOCUMENT, error = %err, "TLS configuration import aborted");
    err
}

impl TlsSettings {
    pub fn from_document(document: &str) -> Result<Self> {
        let root: Value = serde_json::from_str(document).map_err(|source| {
            fatal(ImportError::Parse {
                document: DOCUMENT,
                source,
            })
        })?;
        let section = root.get(DOCUMENT).ok_or_else(|| {
            fatal(ImportError::MissingSection {
                document: DOCUMENT,
                section: DOCUMENT,
            })
        })?;
        TlsSettings::deserialize(section).map_err(|err| {
            fatal(ImportError::MalformedSection {
                document: DOCUMENT,
                section: DOCUMENT,
                reason: err.to_string(),
            })
        })
    }

    pub fn is_empty(&self) -> bool {
        self.private_key.is_none()
            && self.own_certificate.is_none()
            && self.ca_certificates.is_empty()
            && self.remote_certificates.is_empty()
    }
}
