//! Core module containing the protocol engine of Thrustlog
//!
//! This module provides:
//! - Transport layer for the rig link (serial port, in-memory pipe)
//! - Line framing, telemetry parsing and command encoding
//! - Protocol state machine with ready/complete latches
//! - Command dispatcher gated on protocol state
//! - Session management and output sinks
//! - Offline replay of raw logs and sample table summaries

pub mod dispatcher;
pub mod protocol;
pub mod replay;
pub mod session;
pub mod sink;
pub mod state_machine;
pub mod summary;
pub mod transport;
