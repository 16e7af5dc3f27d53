//! # Thrustlog Core Library
//!
//! Serial line-protocol engine for a motor/propeller thrust test rig. The rig
//! streams telemetry lines over a serial link while the operator sends
//! throttle commands; the host records a raw log and a structured sample
//! table.
//!
//! ## Features
//!
//! - Newline framing with a bounded partial-line buffer
//! - Marker-based or immediate startup handshake
//! - Telemetry decoding for speed-only and speed+weight rigs
//! - Serialized command writes with a settle delay
//! - Clean shutdown ordering between capture and the output files
//! - Offline replay of captured raw logs
//!
//! ## Example
//!
//! ```rust,no_run
//! use thrustlog_core::{NoIntents, SerialConfig, SerialTransport, Session, SessionConfig, Sinks};
//! use thrustlog_core::core::protocol::SampleLayout;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let mut transport = SerialTransport::new(SerialConfig::new("/dev/ttyUSB0", 9600));
//!     let sinks = Sinks::create_files("eng.log", "eng.csv", SampleLayout::SpeedOnly)?;
//!     let (session, dispatcher) =
//!         Session::open(&mut transport, SessionConfig::default(), sinks).await?;
//!
//!     let (report, _) = session.run_with(dispatcher, &mut NoIntents).await;
//!     println!("complete: {}", report?.completed);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes, OutputFormat};
pub use crate::config::{AppConfig, Deployment};
pub use crate::core::dispatcher::{
    ChannelIntents, CommandDispatcher, DispatchError, IntentSource, NoIntents, PreReadyPolicy,
};
pub use crate::core::protocol::{Command, SampleLayout, TelemetrySample};
pub use crate::core::session::{
    MalformedPolicy, Session, SessionConfig, SessionError, SessionEvent, SessionReport,
};
pub use crate::core::sink::Sinks;
pub use crate::core::state_machine::{HandshakeMode, ProtocolState};
pub use crate::core::transport::{
    MemoryTransport, SerialConfig, SerialTransport, TransportError, TransportType,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
