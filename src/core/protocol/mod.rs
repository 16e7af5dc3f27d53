//! Rig line protocol
//!
//! Framing of the inbound byte stream, classification of lines, and the
//! encoding of outbound commands.

pub mod command;
pub mod framing;
pub mod telemetry;

pub use command::{Command, CommandCodec, InvalidIntent, SpeedLevel};
pub use framing::{FramingError, LineFramer, Lines, RawLine, DEFAULT_MAX_PENDING};
pub use telemetry::{
    LineClass, MalformedTelemetry, Markers, ParseOutcome, SampleLayout, TelemetryParser,
    TelemetrySample,
};
