//! Telemetry line classification and sample decoding
//!
//! Rig output is free text. Three kinds of line matter:
//! - readiness marker (`System Ready`)
//! - completion marker (`Test complete`)
//! - telemetry, e.g. `timestamp,1000,speed,5` or
//!   `timestamp,1000,speed,5,weight,12`
//!
//! Anything else is a diagnostic and only goes to the raw log.

use super::framing::RawLine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default readiness marker
pub const READY_MARKER: &str = "System Ready";
/// Default completion marker
pub const COMPLETE_MARKER: &str = "Test complete";
/// Default telemetry prefix
pub const TELEMETRY_PREFIX: &str = "timestamp";

const TIMESTAMP_FIELD: usize = 1;
const SPEED_FIELD: usize = 3;
const WEIGHT_FIELD: usize = 5;

/// Which measurement fields a telemetry line carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SampleLayout {
    /// `timestamp,<ms>,speed,<n>`
    #[default]
    SpeedOnly,
    /// `timestamp,<ms>,speed,<n>,weight,<n>`
    SpeedAndWeight,
}

impl SampleLayout {
    /// Minimum comma-delimited field count
    pub fn field_count(&self) -> usize {
        match self {
            SampleLayout::SpeedOnly => 4,
            SampleLayout::SpeedAndWeight => 6,
        }
    }

    /// Column names of the structured sample table
    pub fn header(&self) -> &'static [&'static str] {
        match self {
            SampleLayout::SpeedOnly => &["Timestamp", "Speed"],
            SampleLayout::SpeedAndWeight => &["Timestamp", "Speed", "Weight"],
        }
    }
}

/// One decoded telemetry record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Device clock in milliseconds
    pub timestamp: i64,
    /// Motor speed (PWM value)
    pub speed: i64,
    /// Load cell reading, speed+weight layout only
    pub weight: Option<i64>,
}

impl TelemetrySample {
    /// Speed-only sample
    pub fn new(timestamp: i64, speed: i64) -> Self {
        Self {
            timestamp,
            speed,
            weight: None,
        }
    }

    /// Sample with weight
    pub fn with_weight(timestamp: i64, speed: i64, weight: i64) -> Self {
        Self {
            timestamp,
            speed,
            weight: Some(weight),
        }
    }
}

/// A telemetry-prefixed line that could not be decoded
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedTelemetry {
    /// Fewer fields than the layout needs
    #[error("expected at least {expected} fields, got {found}")]
    FieldCount {
        /// Required count
        expected: usize,
        /// Fields present
        found: usize,
    },

    /// A numeric field did not parse
    #[error("field {position} ({name}) is not an integer: {value:?}")]
    NotInteger {
        /// Zero-based field position
        position: usize,
        /// Field name
        name: &'static str,
        /// Offending text
        value: String,
    },
}

/// Result of [`TelemetryParser::parse`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// Decoded sample
    Sample(TelemetrySample),
    /// Line does not carry the telemetry prefix
    NotTelemetry,
    /// Telemetry prefix present but the body is broken
    Malformed(MalformedTelemetry),
}

/// Classification of a framed line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineClass {
    /// Readiness marker
    Ready,
    /// Completion marker
    Complete,
    /// Telemetry sample
    Telemetry(TelemetrySample),
    /// Telemetry prefix with a broken body
    Malformed(MalformedTelemetry),
    /// Any other text
    Diagnostic,
}

/// Marker texts and telemetry prefix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Markers {
    /// Substring announcing readiness
    pub ready: String,
    /// Substring announcing end of test
    pub complete: String,
    /// Prefix of telemetry lines
    pub telemetry_prefix: String,
}

impl Default for Markers {
    fn default() -> Self {
        Self {
            ready: READY_MARKER.to_string(),
            complete: COMPLETE_MARKER.to_string(),
            telemetry_prefix: TELEMETRY_PREFIX.to_string(),
        }
    }
}

/// Line classifier and sample decoder
#[derive(Debug, Clone)]
pub struct TelemetryParser {
    layout: SampleLayout,
    markers: Markers,
}

impl TelemetryParser {
    /// Parser with default markers
    pub fn new(layout: SampleLayout) -> Self {
        Self::with_markers(layout, Markers::default())
    }

    /// Parser with custom markers
    pub fn with_markers(layout: SampleLayout, markers: Markers) -> Self {
        Self { layout, markers }
    }

    /// Sample layout in use
    pub fn layout(&self) -> SampleLayout {
        self.layout
    }

    /// Classify a line. Markers win over telemetry; the completion marker
    /// wins over the readiness marker.
    pub fn classify(&self, line: &RawLine) -> LineClass {
        let text = line.as_str();
        if text.contains(self.markers.complete.as_str()) {
            return LineClass::Complete;
        }
        if text.contains(self.markers.ready.as_str()) {
            return LineClass::Ready;
        }
        match self.parse(line) {
            ParseOutcome::Sample(sample) => LineClass::Telemetry(sample),
            ParseOutcome::Malformed(err) => LineClass::Malformed(err),
            ParseOutcome::NotTelemetry => LineClass::Diagnostic,
        }
    }

    /// Decode a telemetry line
    pub fn parse(&self, line: &RawLine) -> ParseOutcome {
        let text = line.as_str();
        if !text.starts_with(self.markers.telemetry_prefix.as_str()) {
            return ParseOutcome::NotTelemetry;
        }

        let fields: Vec<&str> = text.split(',').collect();
        let expected = self.layout.field_count();
        if fields.len() < expected {
            return ParseOutcome::Malformed(MalformedTelemetry::FieldCount {
                expected,
                found: fields.len(),
            });
        }

        match self.decode(&fields) {
            Ok(sample) => ParseOutcome::Sample(sample),
            Err(err) => ParseOutcome::Malformed(err),
        }
    }

    fn decode(&self, fields: &[&str]) -> Result<TelemetrySample, MalformedTelemetry> {
        let timestamp = int_field(fields, TIMESTAMP_FIELD, "timestamp")?;
        let speed = int_field(fields, SPEED_FIELD, "speed")?;
        let weight = match self.layout {
            SampleLayout::SpeedOnly => None,
            SampleLayout::SpeedAndWeight => Some(int_field(fields, WEIGHT_FIELD, "weight")?),
        };
        Ok(TelemetrySample {
            timestamp,
            speed,
            weight,
        })
    }
}

fn int_field(
    fields: &[&str],
    position: usize,
    name: &'static str,
) -> Result<i64, MalformedTelemetry> {
    let raw = fields[position].trim();
    raw.parse().map_err(|_| MalformedTelemetry::NotInteger {
        position,
        name,
        value: raw.to_string(),
    })
}
