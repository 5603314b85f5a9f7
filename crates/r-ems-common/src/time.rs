//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Wall-clock helpers shared by the gateway crates."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use chrono::Utc;

/// Milliseconds since the Unix epoch, clamped at zero for clocks set before 1970.
pub fn epoch_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

/// Drop the sub-second part of an epoch-millisecond timestamp.
pub fn truncate_to_second(epoch_ms: u64) -> u64 {
    epoch_ms - epoch_ms % 1000
}
