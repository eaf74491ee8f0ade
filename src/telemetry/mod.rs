//! # Telemetry Module
//!
//! Turns raw telemetry records into named, scaled readings.
//!
//! This module handles:
//! - The per-family field catalog (name, unit, scale)
//! - Timestamped samples for presentation
//! - Formatting samples as text or JSON lines

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::hm::decoder::TelemetryRecord;
use crate::hm::protocol::{Family, InverterIdentity};
use crate::link::StatusFlags;

/// Meaning of one raw telemetry field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub unit: &'static str,
    /// Raw value divided by this gives the value in `unit`
    pub divisor: u32,
}

const fn field(name: &'static str, unit: &'static str, divisor: u32) -> FieldSpec {
    FieldSpec { name, unit, divisor }
}

static FAMILY1_FIELDS: [FieldSpec; 13] = [
    field("u_dc", "V", 10),
    field("i_dc", "A", 100),
    field("p_dc", "W", 10),
    field("yield_total", "kWh", 1000),
    field("yield_day", "Wh", 1),
    field("u_ac", "V", 10),
    field("frequency", "Hz", 100),
    field("p_ac", "W", 10),
    field("q_ac", "var", 10),
    field("i_ac", "A", 100),
    field("power_factor", "", 1000),
    field("temperature", "°C", 10),
    field("event_count", "", 1),
];

static FAMILY2_FIELDS: [FieldSpec; 18] = [
    field("u_dc1", "V", 10),
    field("i_dc1", "A", 100),
    field("p_dc1", "W", 10),
    field("u_dc2", "V", 10),
    field("i_dc2", "A", 100),
    field("p_dc2", "W", 10),
    field("yield_total1", "kWh", 1000),
    field("yield_total2", "kWh", 1000),
    field("yield_day1", "Wh", 1),
    field("yield_day2", "Wh", 1),
    field("u_ac", "V", 10),
    field("frequency", "Hz", 100),
    field("p_ac", "W", 10),
    field("q_ac", "var", 10),
    field("i_ac", "A", 100),
    field("power_factor", "", 1000),
    field("temperature", "°C", 10),
    field("event_count", "", 1),
];

// Inputs 1/2 and 3/4 share a voltage field each. The 4-byte fields are totals.
static FAMILY3_FIELDS: [FieldSpec; 26] = [
    field("u_dc12", "V", 10),
    field("i_dc1", "A", 100),
    field("i_dc2", "A", 100),
    field("p_dc1", "W", 10),
    field("p_dc2", "W", 10),
    field("yield_total1", "kWh", 1000),
    field("yield_total2", "kWh", 1000),
    field("yield_day1", "Wh", 1),
    field("yield_day2", "Wh", 1),
    field("u_dc34", "V", 10),
    field("i_dc3", "A", 100),
    field("i_dc4", "A", 100),
    field("p_dc3", "W", 10),
    field("p_dc4", "W", 10),
    field("yield_total3", "kWh", 1000),
    field("yield_total4", "kWh", 1000),
    field("yield_day3", "Wh", 1),
    field("yield_day4", "Wh", 1),
    field("u_ac", "V", 10),
    field("frequency", "Hz", 100),
    field("p_ac", "W", 10),
    field("q_ac", "var", 10),
    field("i_ac", "A", 100),
    field("power_factor", "", 1000),
    field("temperature", "°C", 10),
    field("event_count", "", 1),
];

/// Field catalog of a family, in record order
pub fn catalog(family: Family) -> &'static [FieldSpec] {
    match family {
        Family::Family1 => &FAMILY1_FIELDS,
        Family::Family2 => &FAMILY2_FIELDS,
        Family::Family3 => &FAMILY3_FIELDS,
    }
}

/// One scaled telemetry value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub name: &'static str,
    pub value: f64,
    #[serde(skip_serializing_if = "str::is_empty")]
    pub unit: &'static str,
}

/// A telemetry record with its context, ready for output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySample {
    pub timestamp: DateTime<Utc>,
    pub serial: u64,
    pub model: String,
    pub valid: bool,
    pub status: StatusFlags,
    pub readings: Vec<Reading>,
}

impl TelemetrySample {
    /// Name and scale every field of `record`
    pub fn new(
        inverter: &InverterIdentity,
        record: &TelemetryRecord,
        status: StatusFlags,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let readings = catalog(inverter.family())
            .iter()
            .zip(record.values())
            .map(|(spec, &raw)| Reading {
                name: spec.name,
                value: raw as f64 / spec.divisor as f64,
                unit: spec.unit,
            })
            .collect();

        Self {
            timestamp,
            serial: inverter.serial(),
            model: inverter.family().to_string(),
            valid: status.is_valid(),
            status,
            readings,
        }
    }

    /// Look up a reading by name
    pub fn reading(&self, name: &str) -> Option<f64> {
        self.readings.iter().find(|r| r.name == name).map(|r| r.value)
    }

    /// Serialize as one line of JSON
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl fmt::Display for TelemetrySample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({}) [{}]",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.serial,
            self.model,
            self.status
        )?;

        if !self.valid {
            return Ok(());
        }

        for reading in &self.readings {
            write!(f, " {}={}", reading.name, reading.value)?;
            if !reading.unit.is_empty() {
                write!(f, " {}", reading.unit)?;
            }
        }
        Ok(())
    }
}
