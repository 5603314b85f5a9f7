//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Compiled TASE.2 object model: domains, points, bilateral tables and datasets."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! The compiled object model.
//!
//! A [`DataModel`] is built single-threaded by the importers and then shared
//! behind an `Arc`. After that only the live value of indication points
//! changes, through the per-point lock in [`IndicationPoint`].

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::Serialize;

use crate::quality::DataFlags;
use crate::types::{PointKind, PointType, ValueKind};

/// Name under which the global (VCC) scope is addressed.
pub const GLOBAL_DOMAIN: &str = "vcc";

/// Domain and point names: ASCII letters, digits, `$` and `_`.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '$' || c == '_')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Vcc,
    Domain,
}

impl Scope {
    pub fn of(domain: &str) -> Self {
        if domain == GLOBAL_DOMAIN {
            Scope::Vcc
        } else {
            Scope::Domain
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Vcc => "vcc",
            Scope::Domain => "domain",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PointValue {
    Integer(i64),
    Real(f32),
}

impl PointValue {
    fn zero(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Integer => PointValue::Integer(0),
            ValueKind::Float => PointValue::Real(0.0),
        }
    }
}

/// Cached state of an indication point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LiveValue {
    pub value: PointValue,
    pub flags: DataFlags,
    pub timestamp_ms: Option<u64>,
}

#[derive(Debug)]
pub struct IndicationPoint {
    report_on_change: bool,
    live: RwLock<LiveValue>,
}

impl IndicationPoint {
    pub fn report_on_change(&self) -> bool {
        self.report_on_change
    }

    pub fn live(&self) -> LiveValue {
        *self.live.read()
    }

    pub(crate) fn store(&self, value: LiveValue) {
        *self.live.write() = value;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Direct,
    Sbo,
}

impl FromStr for DeviceClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(DeviceClass::Direct),
            "sbo" => Ok(DeviceClass::Sbo),
            other => Err(format!("unknown control mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlPoint {
    pub device_class: DeviceClass,
    pub has_tag: bool,
    pub check_back_id: i16,
}

#[derive(Debug)]
pub enum PointRole {
    Indication(IndicationPoint),
    Control(ControlPoint),
}

/// A configured indication or control object, addressed by `(domain, label)`.
#[derive(Debug)]
pub struct Point {
    domain: String,
    label: String,
    point_type: PointType,
    exchanged: bool,
    role: PointRole,
}

impl Point {
    /// Returns `None` when `point_type` is a control type.
    pub fn indication(
        domain: impl Into<String>,
        label: impl Into<String>,
        point_type: PointType,
        report_on_change: bool,
    ) -> Option<Self> {
        if point_type.is_control() {
            return None;
        }
        Some(Self {
            domain: domain.into(),
            label: label.into(),
            point_type,
            exchanged: false,
            role: PointRole::Indication(IndicationPoint {
                report_on_change,
                live: RwLock::new(LiveValue {
                    value: PointValue::zero(point_type.value_kind()),
                    flags: DataFlags::empty(),
                    timestamp_ms: None,
                }),
            }),
        })
    }

    /// Returns `None` when `point_type` is a measurement type.
    pub fn control(
        domain: impl Into<String>,
        label: impl Into<String>,
        point_type: PointType,
        control: ControlPoint,
    ) -> Option<Self> {
        if !point_type.is_control() {
            return None;
        }
        Some(Self {
            domain: domain.into(),
            label: label.into(),
            point_type,
            exchanged: false,
            role: PointRole::Control(control),
        })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn point_type(&self) -> PointType {
        self.point_type
    }

    pub fn kind(&self) -> PointKind {
        self.point_type.kind()
    }

    pub fn is_control(&self) -> bool {
        matches!(self.role, PointRole::Control(_))
    }

    pub fn is_exchanged(&self) -> bool {
        self.exchanged
    }

    /// Flags the point for cross-system forwarding. Never cleared.
    pub fn mark_exchanged(&mut self) {
        self.exchanged = true;
    }

    pub fn role(&self) -> &PointRole {
        &self.role
    }

    pub fn as_indication(&self) -> Option<&IndicationPoint> {
        match &self.role {
            PointRole::Indication(indication) => Some(indication),
            PointRole::Control(_) => None,
        }
    }

    pub fn as_control(&self) -> Option<&ControlPoint> {
        match &self.role {
            PointRole::Control(control) => Some(control),
            PointRole::Indication(_) => None,
        }
    }

    /// Current cached state; `None` for control points.
    pub fn live(&self) -> Option<LiveValue> {
        self.as_indication().map(IndicationPoint::live)
    }
}

#[derive(Debug)]
pub struct Domain {
    name: String,
    points: IndexMap<String, Point>,
}

impl Domain {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            points: IndexMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> Scope {
        Scope::of(&self.name)
    }

    pub fn point(&self, label: &str) -> Option<&Point> {
        self.points.get(label)
    }

    pub fn point_mut(&mut self, label: &str) -> Option<&mut Point> {
        self.points.get_mut(label)
    }

    pub fn points(&self) -> impl Iterator<Item = &Point> {
        self.points.values()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Adds `point` unless the label is taken; the existing point is kept.
    pub fn insert(&mut self, point: Point) -> bool {
        if self.points.contains_key(point.label()) {
            return false;
        }
        self.points.insert(point.label().to_owned(), point);
        true
    }
}

/// Remote peer identity: AP-title plus AE-qualifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PeerIdentity {
    pub ap_title: String,
    pub ae_qualifier: i32,
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ap_title, self.ae_qualifier)
    }
}

impl FromStr for PeerIdentity {
    type Err = String;

    /// Parses `"<ap-title>:<ae-qualifier>"`, e.g. `"1.1.1.999:12"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ap_title, qualifier) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("'{}' is not of the form <ap-title>:<ae-qualifier>", s))?;
        if ap_title.is_empty() {
            return Err(format!("'{}' has an empty AP-title", s));
        }
        let ae_qualifier = qualifier
            .trim()
            .parse::<i32>()
            .map_err(|err| format!("'{}' has an invalid AE-qualifier: {}", s, err))?;
        Ok(Self {
            ap_title: ap_title.to_owned(),
            ae_qualifier,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccessGrant {
    pub read: bool,
    pub control: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BilateralEntry {
    pub label: String,
    pub grant: AccessGrant,
}

/// Access grant binding a remote peer to a subset of one domain's points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BilateralTable {
    pub name: String,
    pub domain: String,
    pub peer: PeerIdentity,
    pub entries: Vec<BilateralEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dataset {
    pub name: String,
    pub domain: String,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferSet {
    pub domain: String,
    pub name: String,
}

#[derive(Debug)]
pub struct DataModel {
    global: Domain,
    domains: IndexMap<String, Domain>,
    bilateral_tables: Vec<BilateralTable>,
    transfer_sets: Vec<TransferSet>,
    datasets: Vec<Dataset>,
}

impl Default for DataModel {
    fn default() -> Self {
        Self::new()
    }
}

impl DataModel {
    pub fn new() -> Self {
        Self {
            global: Domain::new(GLOBAL_DOMAIN),
            domains: IndexMap::new(),
            bilateral_tables: Vec::new(),
            transfer_sets: Vec::new(),
            datasets: Vec::new(),
        }
    }

    pub fn global(&self) -> &Domain {
        &self.global
    }

    pub fn global_mut(&mut self) -> &mut Domain {
        &mut self.global
    }

    /// Resolves named domains as well as the global one under [`GLOBAL_DOMAIN`].
    pub fn domain(&self, name: &str) -> Option<&Domain> {
        if name == GLOBAL_DOMAIN {
            Some(&self.global)
        } else {
            self.domains.get(name)
        }
    }

    pub fn domain_mut(&mut self, name: &str) -> Option<&mut Domain> {
        if name == GLOBAL_DOMAIN {
            Some(&mut self.global)
        } else {
            self.domains.get_mut(name)
        }
    }

    /// Creates a named domain. `None` if the name is taken.
    pub fn add_domain(&mut self, name: &str) -> Option<&mut Domain> {
        if name == GLOBAL_DOMAIN || self.domains.contains_key(name) {
            return None;
        }
        Some(
            self.domains
                .entry(name.to_owned())
                .or_insert_with(|| Domain::new(name)),
        )
    }

    /// Named domains in declaration order, excluding the global scope.
    pub fn domains(&self) -> impl Iterator<Item = &Domain> {
        self.domains.values()
    }

    pub fn point(&self, domain: &str, label: &str) -> Option<&Point> {
        self.domain(domain)?.point(label)
    }

    pub fn point_mut(&mut self, domain: &str, label: &str) -> Option<&mut Point> {
        self.domain_mut(domain)?.point_mut(label)
    }

    /// Every point, global scope first.
    pub fn points(&self) -> impl Iterator<Item = &Point> {
        std::iter::once(&self.global)
            .chain(self.domains.values())
            .flat_map(Domain::points)
    }

    pub fn point_count(&self) -> usize {
        self.global.len() + self.domains.values().map(Domain::len).sum::<usize>()
    }

    pub fn exchanged_count(&self) -> usize {
        self.points().filter(|point| point.is_exchanged()).count()
    }

    pub fn bilateral_tables(&self) -> &[BilateralTable] {
        &self.bilateral_tables
    }

    pub fn add_bilateral_table(&mut self, table: BilateralTable) {
        self.bilateral_tables.push(table);
    }

    pub fn transfer_sets(&self) -> &[TransferSet] {
        &self.transfer_sets
    }

    pub fn add_transfer_set(&mut self, transfer_set: TransferSet) {
        self.transfer_sets.push(transfer_set);
    }

    pub fn datasets(&self) -> &[Dataset] {
        &self.datasets
    }

    pub fn add_dataset(&mut self, dataset: Dataset) {
        self.datasets.push(dataset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sbo() -> ControlPoint {
        ControlPoint {
            device_class: DeviceClass::Sbo,
            has_tag: true,
            check_back_id: 7,
        }
    }

    #[test]
    fn name_charset() {
        assert!(is_valid_name("icc1"));
        assert!(is_valid_name("Tx$Power_2"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("bad-name"));
        assert!(!is_valid_name("white space"));
        assert!(!is_valid_name("ünïcode"));
    }

    #[test]
    fn point_roles_follow_type() {
        assert!(Point::indication("vcc", "p", PointType::Command, false).is_none());
        assert!(Point::control("vcc", "p", PointType::StateQ, sbo()).is_none());

        let real = Point::indication("vcc", "p", PointType::RealQ, true).unwrap();
        assert!(!real.is_control());
        assert!(!real.is_exchanged());
        assert_eq!(real.live().unwrap().value, PointValue::Real(0.0));
        assert!(real.as_control().is_none());

        let state = Point::indication("vcc", "s", PointType::State, false).unwrap();
        assert_eq!(state.live().unwrap().value, PointValue::Integer(0));

        let cmd = Point::control("icc1", "c", PointType::Command, sbo()).unwrap();
        assert!(cmd.is_control());
        assert!(cmd.live().is_none());
        assert_eq!(cmd.as_control().unwrap().check_back_id, 7);
    }

    #[test]
    fn global_domain_is_addressed_by_vcc() {
        let mut model = DataModel::new();
        assert!(model.add_domain(GLOBAL_DOMAIN).is_none());
        let icc = model.add_domain("icc1").unwrap();
        assert!(icc.insert(Point::indication("icc1", "a", PointType::State, false).unwrap()));
        assert!(model.add_domain("icc1").is_none());

        model
            .global_mut()
            .insert(Point::indication("vcc", "g", PointType::Real, false).unwrap());

        assert_eq!(model.domain("vcc").unwrap().scope(), Scope::Vcc);
        assert_eq!(model.domain("icc1").unwrap().scope(), Scope::Domain);
        assert!(model.point("vcc", "g").is_some());
        assert!(model.point("icc1", "a").is_some());
        assert!(model.point("icc1", "g").is_none());
        assert!(model.point("icc2", "a").is_none());
        assert_eq!(model.point_count(), 2);
        assert_eq!(model.points().next().unwrap().label(), "g");
    }

    #[test]
    fn duplicate_labels_keep_first_point() {
        let mut model = DataModel::new();
        let global = model.global_mut();
        assert!(global.insert(Point::indication("vcc", "p", PointType::State, false).unwrap()));
        assert!(!global.insert(Point::indication("vcc", "p", PointType::Real, false).unwrap()));
        assert_eq!(model.point("vcc", "p").unwrap().point_type(), PointType::State);
    }

    #[test]
    fn exchange_flag_is_sticky() {
        let mut model = DataModel::new();
        model
            .global_mut()
            .insert(Point::indication("vcc", "p", PointType::State, false).unwrap());
        let point = model.point_mut("vcc", "p").unwrap();
        point.mark_exchanged();
        point.mark_exchanged();
        assert_eq!(model.exchanged_count(), 1);
    }

    #[test]
    fn peer_identity_parsing() {
        let peer: PeerIdentity = "1.1.1.999:12".parse().unwrap();
        assert_eq!(peer.ap_title, "1.1.1.999");
        assert_eq!(peer.ae_qualifier, 12);
        assert_eq!(peer.to_string(), "1.1.1.999:12");
        assert!("1.1.1.999".parse::<PeerIdentity>().is_err());
        assert!(":12".parse::<PeerIdentity>().is_err());
        assert!("1.1.1.999:x".parse::<PeerIdentity>().is_err());
    }

    #[test]
    fn device_class_parsing() {
        assert_eq!("direct".parse::<DeviceClass>(), Ok(DeviceClass::Direct));
        assert_eq!("sbo".parse::<DeviceClass>(), Ok(DeviceClass::Sbo));
        assert!("SBO".parse::<DeviceClass>().is_err());
    }
}
