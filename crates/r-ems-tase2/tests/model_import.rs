//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Integration tests compiling the fixture documents into a data model."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use r_ems_tase2::model::DeviceClass;
use r_ems_tase2::{
    import_exchange, import_model, DataModel, PointType, ProtocolSettings, TlsSettings,
    GLOBAL_DOMAIN,
};

const MODEL: &str = include_str!("fixtures/model_conf.json");
const EXCHANGE: &str = include_str!("fixtures/exchanged_data.json");
const STACK: &str = include_str!("fixtures/protocol_stack.json");
const TLS: &str = include_str!("fixtures/tls_conf.json");

fn compiled() -> DataModel {
    let mut model = DataModel::new();
    import_model(&mut model, MODEL).unwrap();
    import_exchange(&mut model, EXCHANGE).unwrap();
    model
}

#[test]
fn fixture_model_registers_valid_points_only() {
    let mut model = DataModel::new();
    let summary = import_model(&mut model, MODEL).unwrap();

    assert_eq!(summary.domains, 2);
    assert_eq!(summary.points, 3 + 8 + 1);
    assert_eq!(summary.skipped_points, 2);
    assert_eq!(summary.bilateral_tables, 1);
    assert_eq!(summary.transfer_sets, 1);
    assert_eq!(summary.datasets, 1);

    assert!(model.point("icc1", "bad-name").is_none());
    assert!(model.point("icc1", "unknownType").is_none());
    assert_eq!(model.global().len(), 3);
    assert_eq!(model.domain("icc1").unwrap().len(), 8);

    let cmd = model.point("icc1", "cmd1").unwrap();
    assert_eq!(cmd.point_type(), PointType::Command);
    let control = cmd.as_control().unwrap();
    assert_eq!(control.device_class, DeviceClass::Sbo);
    assert!(control.has_tag);
    assert_eq!(control.check_back_id, 1);
}

#[test]
fn bilateral_tables_and_datasets_drop_unknown_references() {
    let model = compiled();

    let table = &model.bilateral_tables()[0];
    assert_eq!(table.name, "BLT_MZA_001_V1");
    assert_eq!(table.domain, "icc1");
    assert_eq!(table.peer.to_string(), "1.1.1.998:12");
    let labels: Vec<_> = table.entries.iter().map(|entry| entry.label.as_str()).collect();
    assert_eq!(labels, ["realQTime", "cmd1"]);
    assert!(!table.entries[0].grant.control);
    assert!(table.entries[1].grant.control);

    assert_eq!(model.datasets()[0].members, ["realQTime", "discreteQ"]);
    assert_eq!(model.transfer_sets()[0].name, "DSTS_1");
}

#[test]
fn exchange_flags_referenced_points() {
    let model = compiled();

    assert_eq!(model.exchanged_count(), 10);
    assert!(model.point(GLOBAL_DOMAIN, "datapointReal").unwrap().is_exchanged());
    assert!(model.point("icc1", "setPointReal").unwrap().is_exchanged());
    assert!(!model.point("icc1", "commandNotInExchange").unwrap().is_exchanged());
    // Referenced only through another protocol.
    assert!(!model.point("icc2", "state").unwrap().is_exchanged());
    assert!(model.point("icc1", "missingPoint").is_none());
}

#[test]
fn stack_and_tls_fixtures_load() {
    let mut protocol = ProtocolSettings::default();
    protocol.import(STACK).unwrap();
    assert_eq!(protocol.endpoint.socket_addr().to_string(), "127.0.0.1:10002");
    assert_eq!(protocol.cmd_exec_timeout.as_secs(), 5);
    assert!(protocol.endpoint.passive);

    let tls = TlsSettings::from_document(TLS).unwrap();
    assert_eq!(tls.remote_certificates, ["peer.cer"]);
}

#[test]
fn reimporting_into_fresh_models_is_deterministic() {
    let first = compiled();
    let second = compiled();
    let labels = |model: &DataModel| {
        model
            .points()
            .map(|point| format!("{}:{}", point.domain(), point.label()))
            .collect::<Vec<_>>()
    };
    assert_eq!(labels(&first), labels(&second));
}
