//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Point type classifier for TASE.2 indication and control objects."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Point type classification.
//!
//! The nineteen point types are four measurement families (real, state,
//! discrete, supplemental state) at four detail levels each, followed by the
//! three control kinds. Every derived property comes from [`TYPE_TABLE`];
//! nothing is computed from the declaration order except the control
//! boundary in [`PointType::is_control`], which the table tests pin down.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use serde::Serialize;

/// Declared type of a configured point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum PointType {
    Real,
    RealQ,
    RealQTime,
    RealQTimeExt,
    State,
    StateQ,
    StateQTime,
    StateQTimeExt,
    Discrete,
    DiscreteQ,
    DiscreteQTime,
    DiscreteQTimeExt,
    StateSup,
    StateSupQ,
    StateSupQTime,
    StateSupQTimeExt,
    Command,
    SetPointReal,
    SetPointDiscrete,
}

/// Measurement family of an indication point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Family {
    Real,
    State,
    Discrete,
    StateSupplemental,
}

/// Kind of a control point, also used as the event kind of forwarded commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ControlKind {
    Command,
    SetPointReal,
    SetPointDiscrete,
}

impl ControlKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ControlKind::Command => "Command",
            ControlKind::SetPointReal => "SetPointReal",
            ControlKind::SetPointDiscrete => "SetPointDiscrete",
        }
    }
}

impl fmt::Display for ControlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointKind {
    Indication(Family),
    Control(ControlKind),
}

/// Granularity of the timestamp carried with an indication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TimestampClass {
    None,
    /// Whole seconds.
    Normal,
    /// Milliseconds.
    Extended,
}

/// Numeric representation a point's value must arrive in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Integer,
    Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeTraits {
    pub name: &'static str,
    pub kind: PointKind,
    pub quality: bool,
    pub timestamp: TimestampClass,
}

const fn indication(
    name: &'static str,
    family: Family,
    quality: bool,
    timestamp: TimestampClass,
) -> TypeTraits {
    TypeTraits {
        name,
        kind: PointKind::Indication(family),
        quality,
        timestamp,
    }
}

const fn control(name: &'static str, kind: ControlKind) -> TypeTraits {
    TypeTraits {
        name,
        kind: PointKind::Control(kind),
        quality: false,
        timestamp: TimestampClass::None,
    }
}

use Family as F;
use TimestampClass as T;

/// One row per [`PointType`], in declaration order.
pub const TYPE_TABLE: [(PointType, TypeTraits); 19] = [
    (PointType::Real, indication("Real", F::Real, false, T::None)),
    (PointType::RealQ, indication("RealQ", F::Real, true, T::None)),
    (PointType::RealQTime, indication("RealQTime", F::Real, true, T::Normal)),
    (PointType::RealQTimeExt, indication("RealQTimeExt", F::Real, true, T::Extended)),
    (PointType::State, indication("State", F::State, false, T::None)),
    (PointType::StateQ, indication("StateQ", F::State, true, T::None)),
    (PointType::StateQTime, indication("StateQTime", F::State, true, T::Normal)),
    (PointType::StateQTimeExt, indication("StateQTimeExt", F::State, true, T::Extended)),
    (PointType::Discrete, indication("Discrete", F::Discrete, false, T::None)),
    (PointType::DiscreteQ, indication("DiscreteQ", F::Discrete, true, T::None)),
    (PointType::DiscreteQTime, indication("DiscreteQTime", F::Discrete, true, T::Normal)),
    (PointType::DiscreteQTimeExt, indication("DiscreteQTimeExt", F::Discrete, true, T::Extended)),
    (PointType::StateSup, indication("StateSup", F::StateSupplemental, false, T::None)),
    (PointType::StateSupQ, indication("StateSupQ", F::StateSupplemental, true, T::None)),
    (PointType::StateSupQTime, indication("StateSupQTime", F::StateSupplemental, true, T::Normal)),
    (PointType::StateSupQTimeExt, indication("StateSupQTimeExt", F::StateSupplemental, true, T::Extended)),
    (PointType::Command, control("Command", ControlKind::Command)),
    (PointType::SetPointReal, control("SetPointReal", ControlKind::SetPointReal)),
    (PointType::SetPointDiscrete, control("SetPointDiscrete", ControlKind::SetPointDiscrete)),
];

static BY_NAME: Lazy<HashMap<&'static str, PointType>> = Lazy::new(|| {
    TYPE_TABLE
        .iter()
        .map(|(point_type, traits)| (traits.name, *point_type))
        .collect()
});

/// Resolve a configured type name. Matching is exact and case-sensitive.
pub fn classify(name: &str) -> Option<PointType> {
    BY_NAME.get(name).copied()
}

impl PointType {
    pub fn traits(self) -> &'static TypeTraits {
        &TYPE_TABLE[self as usize].1
    }

    pub fn name(self) -> &'static str {
        self.traits().name
    }

    pub fn kind(self) -> PointKind {
        self.traits().kind
    }

    pub fn has_quality(self) -> bool {
        self.traits().quality
    }

    pub fn timestamp_class(self) -> TimestampClass {
        self.traits().timestamp
    }

    /// Control types are declared after every measurement type.
    pub fn is_control(self) -> bool {
        self >= PointType::Command
    }

    pub fn family(self) -> Option<Family> {
        match self.kind() {
            PointKind::Indication(family) => Some(family),
            PointKind::Control(_) => None,
        }
    }

    pub fn control_kind(self) -> Option<ControlKind> {
        match self.kind() {
            PointKind::Control(kind) => Some(kind),
            PointKind::Indication(_) => None,
        }
    }

    /// Floating point for the real family and real setpoints, integral otherwise.
    pub fn value_kind(self) -> ValueKind {
        match self.kind() {
            PointKind::Indication(Family::Real) | PointKind::Control(ControlKind::SetPointReal) => {
                ValueKind::Float
            }
            _ => ValueKind::Integer,
        }
    }
}

impl fmt::Display for PointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown point type '{0}'")]
pub struct UnknownPointType(pub String);

impl FromStr for PointType {
    type Err = UnknownPointType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        classify(s).ok_or_else(|| UnknownPointType(s.to_owned()))
    }
}
