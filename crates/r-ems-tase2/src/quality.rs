//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Quality axis mapping into TASE.2 data flags."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use bitflags::bitflags;
use serde::{Serialize, Serializer};

bitflags! {
    /// Quality bitmask attached to indication values, one bit per
    /// recognised value on each axis.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DataFlags: u16 {
        const VALIDITY_VALID = 1 << 0;
        const VALIDITY_HELD = 1 << 1;
        const VALIDITY_SUSPECT = 1 << 2;
        const VALIDITY_INVALID = 1 << 3;
        const SOURCE_TELEMETERED = 1 << 4;
        const SOURCE_ENTERED = 1 << 5;
        const SOURCE_CALCULATED = 1 << 6;
        const SOURCE_ESTIMATED = 1 << 7;
        const NORMAL_VALUE = 1 << 8;
        const TIMESTAMP_INVALID = 1 << 9;
    }
}

impl Serialize for DataFlags {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.bits())
    }
}

/// The quality axes of an inbound telemetry record, as received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QualityAxes<'a> {
    pub validity: Option<&'a str>,
    pub source: Option<&'a str>,
    pub normal_value: Option<&'a str>,
    pub timestamp_validity: Option<&'a str>,
}

impl QualityAxes<'_> {
    /// Unrecognised or absent values contribute nothing.
    pub fn to_flags(&self) -> DataFlags {
        let mut flags = DataFlags::empty();

        flags |= match self.validity {
            Some("valid") => DataFlags::VALIDITY_VALID,
            Some("held") => DataFlags::VALIDITY_HELD,
            Some("suspect") => DataFlags::VALIDITY_SUSPECT,
            Some("invalid") => DataFlags::VALIDITY_INVALID,
            _ => DataFlags::empty(),
        };

        flags |= match self.source {
            Some("telemetered") => DataFlags::SOURCE_TELEMETERED,
            Some("entered") => DataFlags::SOURCE_ENTERED,
            Some("calculated") => DataFlags::SOURCE_CALCULATED,
            Some("estimated") => DataFlags::SOURCE_ESTIMATED,
            _ => DataFlags::empty(),
        };

        if self.normal_value == Some("normal") {
            flags |= DataFlags::NORMAL_VALUE;
        }
        if self.timestamp_validity == Some("invalid") {
            flags |= DataFlags::TIMESTAMP_INVALID;
        }
        flags
    }
}
