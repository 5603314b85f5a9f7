//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Exchanged-data mapper flagging points eligible for forwarding."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::errors::{ImportError, Result};
use crate::model::DataModel;

const DOCUMENT: &str = "exchanged_data";
const PROTOCOL_NAME: &str = "tase2";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExchangeSummary {
    pub flagged: usize,
    pub skipped: usize,
}

#[derive(Debug, Deserialize)]
struct RawExchangeEntry {
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    protocols: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RawProtocol {
    name: String,
    #[serde(rename = "ref")]
    reference: Option<String>,
}

/// Split `"<domain>:<label>"` on the first colon.
pub fn split_reference(reference: &str) -> Option<(&str, &str)> {
    reference.split_once(':')
}

fn fatal(err: ImportError) -> ImportError {
    error!(fatal = true, document = DOCUMENT, error = %err, "exchanged data import aborted");
    err
}

/// Flag every point referenced by a `tase2` protocol entry as exchanged.
///
/// Only ever sets flags; points are neither created nor removed.
pub fn import_exchange(model: &mut DataModel, document: &str) -> Result<ExchangeSummary> {
    let root: Value = serde_json::from_str(document).map_err(|source| {
        fatal(ImportError::Parse {
            document: DOCUMENT,
            source,
        })
    })?;
    let entries = root
        .get("exchanged_data")
        .and_then(|section| section.get("datapoints"))
        .and_then(Value::as_array)
        .ok_or_else(|| {
            fatal(ImportError::MissingSection {
                document: DOCUMENT,
                section: "exchanged_data.datapoints",
            })
        })?;

    let mut summary = ExchangeSummary::default();

    for entry in entries {
        let raw = match RawExchangeEntry::deserialize(entry) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(error = %err, "skipping malformed exchanged datapoint");
                summary.skipped += 1;
                continue;
            }
        };
        let label = raw.label.as_deref().unwrap_or("<unlabelled>");

        for protocol in &raw.protocols {
            let Ok(protocol) = RawProtocol::deserialize(protocol) else {
                warn!(label = %label, "skipping malformed protocol entry");
                summary.skipped += 1;
                continue;
            };
            if protocol.name != PROTOCOL_NAME {
                continue;
            }
            let Some(reference) = protocol.reference.as_deref() else {
                warn!(label = %label, "tase2 protocol entry without 'ref'");
                summary.skipped += 1;
                continue;
            };
            let Some((domain, point)) = split_reference(reference) else {
                warn!(label = %label, reference = %reference, "reference is not of the form <domain>:<point>");
                summary.skipped += 1;
                continue;
            };
            let Some(target) = model.domain_mut(domain) else {
                warn!(label = %label, domain = %domain, "exchanged reference names unknown domain");
                summary.skipped += 1;
                continue;
            };
            let Some(target) = target.point_mut(point) else {
                warn!(label = %label, domain = %domain, point = %point, "exchanged reference names unknown point");
                summary.skipped += 1;
                continue;
            };
            target.mark_exchanged();
            summary.flagged += 1;
        }
    }

    info!(
        flagged = summary.flagged,
        skipped = summary.skipped,
        exchanged_points = model.exchanged_count(),
        "exchanged data imported"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Point;
    use crate::types::PointType;
    use serde_json::json;

    fn model() -> DataModel {
        let mut model = DataModel::new();
        model
            .global_mut()
            .insert(Point::indication("vcc", "g1", PointType::State, false).unwrap());
        let icc = model.add_domain("icc1").unwrap();
        icc.insert(Point::indication("icc1", "p1", PointType::RealQ, false).unwrap());
        icc.insert(Point::indication("icc1", "p2", PointType::StateQ, false).unwrap());
        model
    }

    fn exchange(refs: &[(&str, &str)]) -> String {
        let datapoints: Vec<Value> = refs
            .iter()
            .enumerate()
            .map(|(i, (protocol, reference))| {
                json!({
                    "pivot_id": format!("TS{i}"),
                    "label": format!("TS{i}"),
                    "protocols": [ { "name": protocol, "ref": reference } ]
                })
            })
            .collect();
        json!({ "exchanged_data": { "datapoints": datapoints } }).to_string()
    }

    #[test]
    fn flags_referenced_points() {
        let mut model = model();
        let summary =
            import_exchange(&mut model, &exchange(&[("tase2", "icc1:p1"), ("tase2", "vcc:g1")]))
                .unwrap();
        assert_eq!(summary.flagged, 2);
        assert!(model.point("icc1", "p1").unwrap().is_exchanged());
        assert!(model.point("vcc", "g1").unwrap().is_exchanged());
        assert!(!model.point("icc1", "p2").unwrap().is_exchanged());
    }

    #[test]
    fn unresolved_references_change_nothing_and_do_not_stop_import() {
        let mut model = model();
        let summary = import_exchange(
            &mut model,
            &exchange(&[
                ("tase2", "icc1:missingPoint"),
                ("tase2", "icc9:p1"),
                ("tase2", "no_colon"),
                ("tase2", "icc1:p2"),
            ]),
        )
        .unwrap();
        assert_eq!(summary.skipped, 3);
        assert_eq!(summary.flagged, 1);
        assert_eq!(model.exchanged_count(), 1);
        assert!(model.point("icc1", "p2").unwrap().is_exchanged());
    }

    #[test]
    fn other_protocols_are_ignored() {
        let mut model = model();
        let summary = import_exchange(&mut model, &exchange(&[("iec104", "icc1:p1")])).unwrap();
        assert_eq!(summary, ExchangeSummary::default());
        assert_eq!(model.exchanged_count(), 0);
    }

    #[test]
    fn import_is_additive() {
        let mut model = model();
        import_exchange(&mut model, &exchange(&[("tase2", "icc1:p1")])).unwrap();
        import_exchange(&mut model, &exchange(&[("tase2", "icc1:p2")])).unwrap();
        assert_eq!(model.exchanged_count(), 2);
    }

    #[test]
    fn reference_splits_on_first_colon() {
        assert_eq!(split_reference("icc1:a:b"), Some(("icc1", "a:b")));
        assert_eq!(split_reference("icc1"), None);
    }

    #[test]
    fn missing_section_is_fatal() {
        let mut model = model();
        assert!(matches!(
            import_exchange(&mut model, r#"{"exchanged_data": {}}"#),
            Err(ImportError::MissingSection { .. })
        ));
    }
}
