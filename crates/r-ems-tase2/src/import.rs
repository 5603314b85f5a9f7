//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Model configuration importer populating the TASE.2 object model."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Compiles the `model_conf` document into a [`DataModel`].
//!
//! Sections are processed in dependency order: global points, named domains,
//! bilateral tables, dataset transfer sets, datasets. Every entry is decoded
//! on its own so one malformed entry is skipped without losing its siblings.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::errors::{ImportError, Result};
use crate::model::{
    is_valid_name, AccessGrant, BilateralEntry, BilateralTable, ControlPoint, DataModel, Dataset,
    DeviceClass, PeerIdentity, Point, TransferSet, GLOBAL_DOMAIN,
};
use crate::types::classify;

const DOCUMENT: &str = "model";

/// Counts of what an import registered and skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub points: usize,
    pub skipped_points: usize,
    pub domains: usize,
    pub bilateral_tables: usize,
    pub transfer_sets: usize,
    pub datasets: usize,
    pub skipped_references: usize,
}

#[derive(Debug, Deserialize)]
struct RawPoint {
    name: String,
    #[serde(rename = "type")]
    point_type: String,
    #[serde(rename = "hasCOV")]
    has_cov: Option<bool>,
    mode: Option<String>,
    #[serde(rename = "hasTag")]
    has_tag: Option<bool>,
    #[serde(rename = "checkBackId")]
    check_back_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawDomain {
    name: String,
    datapoints: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct RawReference {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawBilateralTable {
    name: String,
    icc: String,
    #[serde(rename = "apTitle")]
    ap_title: String,
    #[serde(rename = "aeQualifier")]
    ae_qualifier: i32,
    #[serde(default)]
    datapoints: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RawTransferSet {
    domain: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawDataset {
    name: String,
    domain: String,
    #[serde(default)]
    datapoints: Vec<Value>,
}

fn fatal(err: ImportError) -> ImportError {
    error!(fatal = true, document = DOCUMENT, error = %err, "model import aborted");
    err
}

fn entry_name(entry: &Value) -> &str {
    entry.get("name").and_then(Value::as_str).unwrap_or("<unnamed>")
}

/// Build a point from one configuration entry, or explain why it is skipped.
fn build_point(domain: &str, entry: &Value) -> std::result::Result<Point, String> {
    let raw = RawPoint::deserialize(entry).map_err(|err| format!("malformed entry: {}", err))?;

    if !is_valid_name(&raw.name) {
        return Err("name may only contain letters, digits, '$' and '_'".to_owned());
    }

    let point_type =
        classify(&raw.point_type).ok_or_else(|| format!("unknown type '{}'", raw.point_type))?;

    let point = if point_type.is_control() {
        let mode = raw.mode.ok_or("control point without 'mode'")?;
        let device_class = mode.parse::<DeviceClass>()?;
        let has_tag = raw.has_tag.ok_or("control point without 'hasTag'")?;
        let check_back_id = raw
            .check_back_id
            .ok_or("control point without 'checkBackId'")?;
        let check_back_id = i16::try_from(check_back_id)
            .map_err(|_| format!("checkBackId {} out of range", check_back_id))?;
        Point::control(
            domain,
            raw.name,
            point_type,
            ControlPoint {
                device_class,
                has_tag,
                check_back_id,
            },
        )
    } else {
        let report_on_change = raw.has_cov.ok_or("measurement point without 'hasCOV'")?;
        Point::indication(domain, raw.name, point_type, report_on_change)
    };

    point.ok_or_else(|| format!("type '{}' has no matching point role", point_type))
}

struct ModelImporter<'a> {
    model: &'a mut DataModel,
    summary: ImportSummary,
}

impl ModelImporter<'_> {
    fn register_points(&mut self, domain: &str, entries: &[Value]) {
        for entry in entries {
            let point = match build_point(domain, entry) {
                Ok(point) => point,
                Err(reason) => {
                    warn!(domain = %domain, point = %entry_name(entry), reason = %reason, "skipping point");
                    self.summary.skipped_points += 1;
                    continue;
                }
            };
            let Some(target) = self.model.domain_mut(domain) else {
                self.summary.skipped_points += 1;
                continue;
            };
            let label = point.label().to_owned();
            if target.insert(point) {
                debug!(domain = %domain, point = %label, "point registered");
                self.summary.points += 1;
            } else {
                warn!(domain = %domain, point = %label, reason = "duplicate label", "skipping point");
                self.summary.skipped_points += 1;
            }
        }
    }

    fn register_domains(&mut self, entries: &[Value]) {
        for entry in entries {
            let raw = match RawDomain::deserialize(entry) {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(domain = %entry_name(entry), error = %err, "skipping malformed domain");
                    continue;
                }
            };
            if !is_valid_name(&raw.name) {
                warn!(domain = %raw.name, "skipping domain with invalid name");
                continue;
            }
            if self.model.add_domain(&raw.name).is_none() {
                warn!(domain = %raw.name, "skipping duplicate domain");
                continue;
            }
            self.summary.domains += 1;
            match raw.datapoints {
                Some(points) => self.register_points(&raw.name, &points),
                None => warn!(domain = %raw.name, "domain declares no datapoints"),
            }
        }
    }

    fn build_bilateral_tables(&mut self, entries: &[Value]) -> Result<()> {
        for entry in entries {
            let raw = match RawBilateralTable::deserialize(entry) {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(table = %entry_name(entry), error = %err, "skipping malformed bilateral table");
                    continue;
                }
            };
            let Some(domain) = self.model.domain(&raw.icc) else {
                return Err(fatal(ImportError::UnknownDomain {
                    table: raw.name,
                    domain: raw.icc,
                }));
            };

            let mut entries = Vec::with_capacity(raw.datapoints.len());
            for reference in &raw.datapoints {
                let Ok(reference) = RawReference::deserialize(reference) else {
                    warn!(table = %raw.name, "skipping malformed bilateral table entry");
                    self.summary.skipped_references += 1;
                    continue;
                };
                let Some(point) = domain.point(&reference.name) else {
                    warn!(table = %raw.name, domain = %raw.icc, point = %reference.name, "bilateral table references unknown point");
                    self.summary.skipped_references += 1;
                    continue;
                };
                let grant = AccessGrant {
                    read: true,
                    control: point.is_control(),
                };
                entries.push(BilateralEntry {
                    label: reference.name,
                    grant,
                });
            }

            info!(table = %raw.name, domain = %raw.icc, points = entries.len(), "bilateral table built");
            self.model.add_bilateral_table(BilateralTable {
                name: raw.name,
                domain: raw.icc,
                peer: PeerIdentity {
                    ap_title: raw.ap_title,
                    ae_qualifier: raw.ae_qualifier,
                },
                entries,
            });
            self.summary.bilateral_tables += 1;
        }
        Ok(())
    }

    fn register_transfer_sets(&mut self, entries: &[Value]) {
        for entry in entries {
            let raw = match RawTransferSet::deserialize(entry) {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(error = %err, "skipping malformed dataset transfer set");
                    continue;
                }
            };
            if raw.domain == GLOBAL_DOMAIN || self.model.domain(&raw.domain).is_none() {
                warn!(domain = %raw.domain, transfer_set = %raw.name, "dataset transfer set references unknown domain");
                continue;
            }
            if !is_valid_name(&raw.name) {
                warn!(domain = %raw.domain, transfer_set = %raw.name, "skipping transfer set with invalid name");
                continue;
            }
            self.model.add_transfer_set(TransferSet {
                domain: raw.domain,
                name: raw.name,
            });
            self.summary.transfer_sets += 1;
        }
    }

    fn build_datasets(&mut self, entries: &[Value]) {
        for entry in entries {
            let raw = match RawDataset::deserialize(entry) {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(dataset = %entry_name(entry), error = %err, "skipping malformed dataset");
                    continue;
                }
            };
            let Some(domain) = self.model.domain(&raw.domain) else {
                warn!(dataset = %raw.name, domain = %raw.domain, "dataset references unknown domain");
                continue;
            };

            let mut members = Vec::with_capacity(raw.datapoints.len());
            for reference in &raw.datapoints {
                match reference.as_str() {
                    Some(label) if domain.point(label).is_some() => members.push(label.to_owned()),
                    Some(label) => {
                        warn!(dataset = %raw.name, domain = %raw.domain, point = %label, "dataset references unknown point");
                        self.summary.skipped_references += 1;
                    }
                    None => {
                        warn!(dataset = %raw.name, "skipping non-string dataset entry");
                        self.summary.skipped_references += 1;
                    }
                }
            }

            self.model.add_dataset(Dataset {
                name: raw.name,
                domain: raw.domain,
                members,
            });
            self.summary.datasets += 1;
        }
    }
}

fn optional_array<'v>(
    conf: &'v serde_json::Map<String, Value>,
    section: &'static str,
) -> Result<&'v [Value]> {
    match conf.get(section) {
        None => Ok(Default::default()),
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(fatal(ImportError::MalformedSection {
            document: DOCUMENT,
            section,
            reason: "expected an array".to_owned(),
        })),
    }
}

/// Populate `model` from a `model_conf` document.
///
/// On error the model keeps whatever was registered before the failing
/// section.
pub fn import_model(model: &mut DataModel, document: &str) -> Result<ImportSummary> {
    let root: Value = serde_json::from_str(document).map_err(|source| {
        fatal(ImportError::Parse {
            document: DOCUMENT,
            source,
        })
    })?;
    let conf = root
        .get("model_conf")
        .and_then(Value::as_object)
        .ok_or_else(|| {
            fatal(ImportError::MissingSection {
                document: DOCUMENT,
                section: "model_conf",
            })
        })?;
    let global_points = conf
        .get("vcc")
        .and_then(|vcc| vcc.get("datapoints"))
        .and_then(Value::as_array)
        .ok_or_else(|| {
            fatal(ImportError::MissingSection {
                document: DOCUMENT,
                section: "vcc.datapoints",
            })
        })?;

    let mut importer = ModelImporter {
        model,
        summary: ImportSummary::default(),
    };

    importer.register_points(GLOBAL_DOMAIN, global_points);
    importer.register_domains(optional_array(conf, "icc")?);

    let tables = conf
        .get("bilateral_tables")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            fatal(ImportError::MissingSection {
                document: DOCUMENT,
                section: "bilateral_tables",
            })
        })?;
    importer.build_bilateral_tables(tables)?;

    importer.register_transfer_sets(optional_array(conf, "dataset_transfer_sets")?);
    importer.build_datasets(optional_array(conf, "datasets")?);

    let summary = importer.summary;
    info!(
        points = summary.points,
        skipped_points = summary.skipped_points,
        domains = summary.domains,
        bilateral_tables = summary.bilateral_tables,
        datasets = summary.datasets,
        "model imported"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PointType;
    use serde_json::json;

    fn import(doc: Value) -> (DataModel, Result<ImportSummary>) {
        let mut model = DataModel::new();
        let result = import_model(&mut model, &doc.to_string());
        (model, result)
    }

    fn with_tables(vcc: Value, icc: Value, tables: Value) -> Value {
        json!({ "model_conf": { "vcc": { "datapoints": vcc }, "icc": icc, "bilateral_tables": tables } })
    }

    #[test]
    fn invalid_name_skips_only_that_entry() {
        let (model, result) = import(with_tables(
            json!([
                { "name": "ok1", "type": "State", "hasCOV": false },
                { "name": "bad-name", "type": "State", "hasCOV": false },
                { "name": "ok2", "type": "Real", "hasCOV": true }
            ]),
            json!([]),
            json!([]),
        ));
        let summary = result.unwrap();
        assert_eq!(summary.points, 2);
        assert_eq!(summary.skipped_points, 1);
        assert!(model.point("vcc", "bad-name").is_none());
        assert!(model.point("vcc", "ok2").is_some());
    }

    #[test]
    fn unknown_type_and_missing_fields_skip_points() {
        let (model, result) = import(with_tables(
            json!([
                { "name": "a", "type": "Analog", "hasCOV": false },
                { "name": "b", "type": "StateQ" },
                { "name": "c", "type": "Command", "mode": "sbo", "hasTag": true },
                { "name": "d", "type": "Command", "hasTag": true, "checkBackId": 1 },
                { "name": "e", "type": "Command", "mode": "toggle", "hasTag": true, "checkBackId": 1 },
                { "name": "f", "type": "Command", "mode": "sbo", "hasTag": true, "checkBackId": 70000 },
                { "type": "State", "hasCOV": false },
                { "name": "g", "type": "SetPointReal", "mode": "direct", "hasTag": false, "checkBackId": 3 }
            ]),
            json!([]),
            json!([]),
        ));
        assert_eq!(result.unwrap().points, 1);
        assert_eq!(model.point_count(), 1);
        let g = model.point("vcc", "g").unwrap();
        assert_eq!(g.point_type(), PointType::SetPointReal);
        assert_eq!(g.as_control().unwrap().device_class, DeviceClass::Direct);
    }

    #[test]
    fn missing_global_points_is_fatal() {
        let (model, result) = import(json!({ "model_conf": { "icc": [] } }));
        assert!(matches!(
            result,
            Err(ImportError::MissingSection { section: "vcc.datapoints", .. })
        ));
        assert_eq!(model.point_count(), 0);
    }

    #[test]
    fn missing_bilateral_tables_is_fatal_after_points_are_registered() {
        let (model, result) = import(json!({
            "model_conf": {
                "vcc": { "datapoints": [ { "name": "p", "type": "State", "hasCOV": false } ] },
                "icc": [ { "name": "icc1", "datapoints": [] } ]
            }
        }));
        assert!(matches!(
            result,
            Err(ImportError::MissingSection { section: "bilateral_tables", .. })
        ));
        assert!(model.point("vcc", "p").is_some());
        assert!(model.domain("icc1").is_some());
    }

    #[test]
    fn parse_errors_are_fatal() {
        let mut model = DataModel::new();
        assert!(matches!(
            import_model(&mut model, "{ not json"),
            Err(ImportError::Parse { .. })
        ));
        assert!(matches!(
            import_model(&mut model, "{}"),
            Err(ImportError::MissingSection { section: "model_conf", .. })
        ));
    }

    #[test]
    fn bilateral_table_grants_follow_point_kind() {
        let (model, result) = import(with_tables(
            json!([]),
            json!([{
                "name": "icc1",
                "datapoints": [
                    { "name": "meas", "type": "RealQ", "hasCOV": true },
                    { "name": "cmd", "type": "Command", "mode": "sbo", "hasTag": false, "checkBackId": 5 }
                ]
            }]),
            json!([{
                "name": "BLT1", "icc": "icc1", "apTitle": "1.1.1.998", "aeQualifier": 12,
                "datapoints": [ { "name": "meas" }, { "name": "cmd" }, { "name": "ghost" } ]
            }]),
        ));
        let summary = result.unwrap();
        assert_eq!(summary.skipped_references, 1);

        let table = &model.bilateral_tables()[0];
        assert_eq!(table.peer.to_string(), "1.1.1.998:12");
        assert_eq!(table.entries.len(), 2);
        assert_eq!(table.entries[0].grant, AccessGrant { read: true, control: false });
        assert_eq!(table.entries[1].grant, AccessGrant { read: true, control: true });
    }

    #[test]
    fn bilateral_table_with_unknown_domain_is_fatal() {
        let (model, result) = import(with_tables(
            json!([]),
            json!([{ "name": "icc1", "datapoints": [] }]),
            json!([
                { "name": "BLT1", "icc": "icc1", "apTitle": "1.1", "aeQualifier": 1, "datapoints": [] },
                { "name": "BLT2", "icc": "icc9", "apTitle": "1.2", "aeQualifier": 1, "datapoints": [] }
            ]),
        ));
        match result {
            Err(ImportError::UnknownDomain { table, domain }) => {
                assert_eq!(table, "BLT2");
                assert_eq!(domain, "icc9");
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert_eq!(model.bilateral_tables().len(), 1);
    }

    #[test]
    fn datasets_and_transfer_sets_skip_unresolved_references() {
        let mut doc = with_tables(
            json!([]),
            json!([{
                "name": "icc1",
                "datapoints": [
                    { "name": "a", "type": "State", "hasCOV": false },
                    { "name": "b", "type": "Real", "hasCOV": false }
                ]
            }]),
            json!([]),
        );
        doc["model_conf"]["dataset_transfer_sets"] = json!([
            { "domain": "icc1", "name": "DSTrans1" },
            { "domain": "icc7", "name": "DSTrans2" }
        ]);
        doc["model_conf"]["datasets"] = json!([
            { "name": "ds1", "domain": "icc1", "datapoints": ["b", "missing", "a", 4] },
            { "name": "ds2", "domain": "icc7", "datapoints": ["a"] }
        ]);
        let (model, result) = import(doc);
        let summary = result.unwrap();
        assert_eq!(summary.transfer_sets, 1);
        assert_eq!(summary.datasets, 1);
        assert_eq!(model.transfer_sets()[0].name, "DSTrans1");
        assert_eq!(model.datasets()[0].members, vec!["b".to_owned(), "a".to_owned()]);
    }

    #[test]
    fn duplicate_and_invalid_domains_are_skipped() {
        let (model, result) = import(with_tables(
            json!([]),
            json!([
                { "name": "icc1", "datapoints": [ { "name": "a", "type": "State", "hasCOV": false } ] },
                { "name": "icc1", "datapoints": [ { "name": "z", "type": "State", "hasCOV": false } ] },
                { "name": "bad domain", "datapoints": [] },
                { "name": "vcc", "datapoints": [] },
                { "name": "icc2" }
            ]),
            json!([]),
        ));
        assert_eq!(result.unwrap().domains, 2);
        assert!(model.point("icc1", "z").is_none());
        assert!(model.domain("icc2").unwrap().is_empty());
    }
}
