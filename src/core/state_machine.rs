//! Protocol State Machine
//!
//! Tracks one session through `Connecting -> AwaitingReady -> Running ->
//! Complete`, with `Closed` reachable from anywhere. The machine is a pure
//! event processor: [`ProtocolMachine::handle`] returns the [`Effect`]s the
//! session must apply (sink appends, link close), so it can be driven without
//! a transport.

use crate::core::protocol::{
    LineClass, MalformedTelemetry, RawLine, TelemetryParser, TelemetrySample,
};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolState {
    /// Transport not yet open
    Connecting,
    /// Link open, waiting for the rig to report readiness
    AwaitingReady,
    /// Ready latched; telemetry flowing and commands accepted
    Running,
    /// Completion marker seen; sinks being flushed
    Complete,
    /// Terminal
    Closed,
}

impl ProtocolState {
    /// Check if state is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Check if the test has ended, successfully or not
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Complete | Self::Closed)
    }

    /// Check if commands may be written in this state
    pub fn accepts_commands(&self, mode: HandshakeMode) -> bool {
        match self {
            Self::Running => true,
            Self::AwaitingReady => mode == HandshakeMode::Immediate,
            _ => false,
        }
    }
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::AwaitingReady => "awaiting-ready",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// How readiness is established
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeMode {
    /// Opening the link latches readiness
    Immediate,
    /// Readiness latches on the rig's ready marker line
    #[default]
    Marker,
}

/// Boolean that can be set exactly once
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Latch(bool);

impl Latch {
    /// Set the latch. Returns `true` only for the call that set it.
    pub fn set(&mut self) -> bool {
        let won = !self.0;
        self.0 = true;
        won
    }

    /// Check if set
    pub fn is_set(&self) -> bool {
        self.0
    }
}

/// Input to the machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    /// Transport reported the link open
    Connected,
    /// One framed line
    Line(RawLine),
    /// Sinks flushed after completion
    Flushed,
    /// Link closed for a reason other than completion
    LinkClosed(String),
}

/// Output of the machine, applied by the session in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Append to the raw log
    AppendRaw(RawLine),
    /// Append to the structured sample table
    AppendSample(TelemetrySample),
    /// A telemetry line failed to decode
    Malformed {
        /// Offending line
        line: RawLine,
        /// Decode error
        error: MalformedTelemetry,
    },
    /// State changed; publish it
    StateChanged(ProtocolState),
    /// Close the transport
    CloseTransport,
}

/// State transition record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    /// Previous state
    pub from: ProtocolState,
    /// New state
    pub to: ProtocolState,
    /// Timestamp
    pub timestamp: DateTime<Local>,
    /// Reason for transition
    pub reason: Option<String>,
}

/// Counters kept by the machine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineStats {
    /// Lines accepted for the raw log
    pub lines: u64,
    /// Decoded samples
    pub samples: u64,
    /// Telemetry lines that failed to decode
    pub malformed: u64,
    /// Samples whose timestamp went backwards
    pub non_monotonic: u64,
    /// Lines dropped because they arrived after completion
    pub dropped: u64,
}

/// Session protocol state machine
pub struct ProtocolMachine {
    state: ProtocolState,
    mode: HandshakeMode,
    parser: TelemetryParser,
    ready: Latch,
    complete: Latch,
    last_timestamp: Option<i64>,
    stats: LineStats,
    history: Vec<StateTransition>,
    max_history: usize,
}

impl ProtocolMachine {
    /// Create a new machine in `Connecting`
    pub fn new(mode: HandshakeMode, parser: TelemetryParser) -> Self {
        Self {
            state: ProtocolState::Connecting,
            mode,
            parser,
            ready: Latch::default(),
            complete: Latch::default(),
            last_timestamp: None,
            stats: LineStats::default(),
            history: Vec::new(),
            max_history: 32,
        }
    }

    /// Get current state
    pub fn state(&self) -> ProtocolState {
        self.state
    }

    /// Handshake mode
    pub fn mode(&self) -> HandshakeMode {
        self.mode
    }

    /// Whether readiness has latched
    pub fn is_ready(&self) -> bool {
        self.ready.is_set()
    }

    /// Whether completion has latched
    pub fn is_complete(&self) -> bool {
        self.complete.is_set()
    }

    /// Line counters
    pub fn stats(&self) -> LineStats {
        self.stats
    }

    /// Get state history
    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    /// Feed one event and collect the resulting effects
    pub fn handle(&mut self, event: ProtocolEvent) -> Vec<Effect> {
        let mut effects = Vec::new();
        match event {
            ProtocolEvent::Connected => self.on_connected(&mut effects),
            ProtocolEvent::Line(line) => self.on_line(line, &mut effects),
            ProtocolEvent::Flushed => {
                if self.state == ProtocolState::Complete {
                    self.transition(ProtocolState::Closed, Some("sinks flushed"), &mut effects);
                }
            }
            ProtocolEvent::LinkClosed(reason) => {
                if !self.state.is_terminal() {
                    self.transition(ProtocolState::Closed, Some(&reason), &mut effects);
                }
            }
        }
        effects
    }

    fn on_connected(&mut self, effects: &mut Vec<Effect>) {
        if self.state != ProtocolState::Connecting {
            tracing::warn!(state = %self.state, "connected event outside connecting state");
            return;
        }
        self.transition(ProtocolState::AwaitingReady, Some("link open"), effects);
        if self.mode == HandshakeMode::Immediate && self.ready.set() {
            self.transition(ProtocolState::Running, Some("immediate ready"), effects);
        }
    }

    fn on_line(&mut self, line: RawLine, effects: &mut Vec<Effect>) {
        match self.state {
            ProtocolState::AwaitingReady | ProtocolState::Running => {}
            state => {
                tracing::debug!(%state, %line, "dropping line");
                self.stats.dropped += 1;
                return;
            }
        }

        self.stats.lines += 1;
        effects.push(Effect::AppendRaw(line.clone()));

        match self.parser.classify(&line) {
            LineClass::Ready => {
                if self.ready.set() {
                    self.transition(ProtocolState::Running, Some("ready marker"), effects);
                } else {
                    tracing::debug!("repeated ready marker ignored");
                }
            }
            LineClass::Complete => {
                if self.complete.set() {
                    self.transition(ProtocolState::Complete, Some("complete marker"), effects);
                    effects.push(Effect::CloseTransport);
                }
            }
            LineClass::Telemetry(sample) => {
                if let Some(last) = self.last_timestamp {
                    if sample.timestamp < last {
                        self.stats.non_monotonic += 1;
                        tracing::warn!(
                            previous = last,
                            timestamp = sample.timestamp,
                            "telemetry timestamp went backwards"
                        );
                    }
                }
                self.last_timestamp = Some(sample.timestamp);
                self.stats.samples += 1;
                effects.push(Effect::AppendSample(sample));
            }
            LineClass::Malformed(error) => {
                self.stats.malformed += 1;
                effects.push(Effect::Malformed { line, error });
            }
            LineClass::Diagnostic => {}
        }
    }

    fn transition(&mut self, to: ProtocolState, reason: Option<&str>, effects: &mut Vec<Effect>) {
        if !Self::is_valid_transition(self.state, to) {
            tracing::error!(from = %self.state, %to, "invalid protocol transition");
            return;
        }

        tracing::info!(from = %self.state, %to, reason = reason.unwrap_or(""), "protocol state");
        self.history.push(StateTransition {
            from: self.state,
            to,
            timestamp: Local::now(),
            reason: reason.map(String::from),
        });
        if self.history.len() > self.max_history {
            self.history.remove(0);
        }

        self.state = to;
        effects.push(Effect::StateChanged(to));
    }

    fn is_valid_transition(from: ProtocolState, to: ProtocolState) -> bool {
        use ProtocolState::*;

        match (from, to) {
            (Connecting, AwaitingReady) => true,
            (AwaitingReady, Running) => true,
            (Running, Complete) => true,
            // The rig may finish without ever announcing readiness.
            (AwaitingReady, Complete) => true,
            (Closed, _) => false,
            (_, Closed) => true,
            _ => false,
        }
    }
}
