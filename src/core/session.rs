//! Session management
//!
//! A Session is one test run: from opening the link to closing it. The
//! session task is the only reader of the link and the only writer of the
//! sinks. It frames incoming bytes, drives the [`ProtocolMachine`] and
//! applies the effects it returns. Protocol state is published on a watch
//! channel which the [`CommandDispatcher`] follows.

use crate::core::dispatcher::{
    CommandDispatcher, DispatchError, DispatchSummary, DispatcherConfig, IntentSource,
    PreReadyPolicy, DEFAULT_SETTLE,
};
use crate::core::protocol::{
    FramingError, LineFramer, Markers, RawLine, SampleLayout, TelemetryParser,
    DEFAULT_MAX_PENDING,
};
use crate::core::sink::{SinkError, Sinks};
use crate::core::state_machine::{
    Effect, HandshakeMode, LineStats, ProtocolEvent, ProtocolMachine, ProtocolState,
    StateTransition,
};
use crate::core::transport::{
    CloseHandle, CloseReason, LinkReader, TransportError, TransportStats, TransportTrait,
};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

const EVENT_CAPACITY: usize = 256;

/// How malformed telemetry is surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum MalformedPolicy {
    /// Log a warning and keep the line in the raw log
    #[default]
    LogOnly,
    /// Additionally publish a [`SessionEvent::Malformed`]
    Report,
}

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Handshake mode
    pub mode: HandshakeMode,
    /// Telemetry layout
    pub layout: SampleLayout,
    /// Marker texts
    pub markers: Markers,
    /// Framing overflow limit (`None` disables it)
    pub max_pending: Option<usize>,
    /// Pause after each command write
    pub settle: Duration,
    /// Delay before the automatic `START`, if any
    pub auto_start: Option<Duration>,
    /// Commands before readiness
    pub pre_ready: PreReadyPolicy,
    /// Malformed telemetry reporting
    pub malformed: MalformedPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: HandshakeMode::default(),
            layout: SampleLayout::default(),
            markers: Markers::default(),
            max_pending: Some(DEFAULT_MAX_PENDING),
            settle: DEFAULT_SETTLE,
            auto_start: None,
            pre_ready: PreReadyPolicy::default(),
            malformed: MalformedPolicy::default(),
        }
    }
}

impl SessionConfig {
    /// Settings for the command dispatcher
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            mode: self.mode,
            pre_ready: self.pre_ready,
            settle: self.settle,
            auto_start: self.auto_start,
        }
    }
}

/// Session events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Protocol state changed
    StateChanged(ProtocolState),
    /// Telemetry line failed to decode (reported under [`MalformedPolicy::Report`])
    Malformed {
        /// Offending line
        line: String,
        /// Decode error
        error: String,
    },
}

/// Session errors
#[derive(Error, Debug)]
pub enum SessionError {
    /// Link could not be opened
    #[error("connection failed: {0}")]
    Connection(#[source] TransportError),

    /// Link failed while reading
    #[error("link error: {0}")]
    Link(#[source] TransportError),

    /// A command write failed and closed the link
    #[error("link write failed: {0}")]
    WriteFailed(String),

    /// Inbound stream could not be framed
    #[error(transparent)]
    Framing(#[from] FramingError),

    /// Output file failed
    #[error(transparent)]
    Sink(#[from] SinkError),

    /// Dispatcher failure outside a write
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl SessionError {
    fn close_reason(&self) -> CloseReason {
        match self {
            Self::Connection(e) | Self::Link(e) => CloseReason::LinkLost(e.to_string()),
            Self::WriteFailed(e) => CloseReason::WriteFailed(e.clone()),
            other => CloseReason::ProtocolFault(other.to_string()),
        }
    }
}

/// Summary of a finished session
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    /// Session id
    pub id: Uuid,
    /// Link description
    pub link: String,
    /// Session start
    pub started: DateTime<Local>,
    /// Session end
    pub finished: DateTime<Local>,
    /// Final protocol state
    pub final_state: ProtocolState,
    /// Whether the completion marker was seen
    pub completed: bool,
    /// Why the link closed
    pub close_reason: Option<CloseReason>,
    /// Line counters
    pub lines: LineStats,
    /// Link counters
    pub transport: TransportStats,
    /// State transitions
    pub transitions: Vec<StateTransition>,
}

impl SessionReport {
    /// Duration of the session
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished - self.started
    }
}

/// One test run over an open link
pub struct Session {
    id: Uuid,
    link: String,
    started: DateTime<Local>,
    config: SessionConfig,
    reader: LinkReader,
    close: CloseHandle,
    framer: LineFramer,
    machine: ProtocolMachine,
    sinks: Sinks,
    state_tx: watch::Sender<ProtocolState>,
    events: broadcast::Sender<SessionEvent>,
}

impl Session {
    /// Open the link and start a session over already created sinks.
    ///
    /// Returns the session together with the dispatcher that owns the write
    /// half. A failure to open is fatal and nothing is appended to `sinks`.
    pub async fn open<T>(
        transport: &mut T,
        config: SessionConfig,
        sinks: Sinks,
    ) -> Result<(Self, CommandDispatcher), SessionError>
    where
        T: TransportTrait + ?Sized,
    {
        Self::connect(transport, config, || Ok(sinks)).await
    }

    /// Open the link, then create the sinks with `create_sinks`.
    ///
    /// The sinks are only created once the link is open, so a connection
    /// failure leaves the previous run's output files untouched.
    pub async fn connect<T, F>(
        transport: &mut T,
        config: SessionConfig,
        create_sinks: F,
    ) -> Result<(Self, CommandDispatcher), SessionError>
    where
        T: TransportTrait + ?Sized,
        F: FnOnce() -> Result<Sinks, SinkError>,
    {
        let link = transport.connection_info();
        let connection = transport.open().await.map_err(|e| {
            tracing::error!(%link, error = %e, "failed to open link");
            SessionError::Connection(e)
        })?;
        let sinks = create_sinks()?;
        let (reader, writer, close) = connection.split();

        let parser = TelemetryParser::with_markers(config.layout, config.markers.clone());
        let machine = ProtocolMachine::new(config.mode, parser);
        let (state_tx, state_rx) = watch::channel(machine.state());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let dispatcher = CommandDispatcher::new(writer, state_rx, config.dispatcher_config());

        let mut session = Self {
            id: Uuid::new_v4(),
            link,
            started: Local::now(),
            framer: LineFramer::with_limit(config.max_pending),
            config,
            reader,
            close,
            machine,
            sinks,
            state_tx,
            events,
        };
        tracing::info!(id = %session.id, link = %session.link, mode = ?session.config.mode, "session started");

        let effects = session.machine.handle(ProtocolEvent::Connected);
        session.apply(effects)?;

        Ok((session, dispatcher))
    }

    /// Session id
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current protocol state
    pub fn state(&self) -> ProtocolState {
        self.machine.state()
    }

    /// Watch the protocol state
    pub fn watch_state(&self) -> watch::Receiver<ProtocolState> {
        self.state_tx.subscribe()
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Handle that closes the link from anywhere
    pub fn close_handle(&self) -> CloseHandle {
        self.close.clone()
    }

    /// Run the session together with its dispatcher on the current task
    pub async fn run_with<S>(
        self,
        dispatcher: CommandDispatcher,
        source: &mut S,
    ) -> (
        Result<SessionReport, SessionError>,
        Result<DispatchSummary, DispatchError>,
    )
    where
        S: IntentSource + ?Sized,
    {
        tokio::join!(self.run(), dispatcher.run(source))
    }

    /// Read until the link closes, then flush the sinks.
    ///
    /// Completion and cancellation return a report; link, framing and sink
    /// failures return the error after the link is closed.
    pub async fn run(mut self) -> Result<SessionReport, SessionError> {
        let result = self.pump().await;
        if let Err(e) = &result {
            tracing::error!(error = %e, "session aborted");
            self.close.close(e.close_reason());
        }
        self.close
            .close(CloseReason::LinkLost("session ended".to_string()));

        let reason = self.close.reason();
        let reason_text = reason
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        let effects = self.machine.handle(ProtocolEvent::LinkClosed(reason_text));
        let applied = self.apply(effects);
        let flushed = self.sinks.close();

        if self.framer.pending() > 0 {
            tracing::debug!(bytes = self.framer.pending(), "discarding unterminated line");
        }

        let report = SessionReport {
            id: self.id,
            link: self.link.clone(),
            started: self.started,
            finished: Local::now(),
            final_state: self.machine.state(),
            completed: self.machine.is_complete(),
            close_reason: reason,
            lines: self.machine.stats(),
            transport: self.reader.stats(),
            transitions: self.machine.history().to_vec(),
        };
        tracing::info!(
            id = %report.id,
            completed = report.completed,
            lines = report.lines.lines,
            samples = report.lines.samples,
            malformed = report.lines.malformed,
            "session finished"
        );

        result?;
        applied?;
        flushed?;
        Ok(report)
    }

    async fn pump(&mut self) -> Result<(), SessionError> {
        loop {
            let chunk = match self.reader.next_chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => return self.closed_locally(),
                Err(e) => {
                    tracing::warn!(error = %e, "link lost");
                    return Err(SessionError::Link(e));
                }
            };

            let lines: Vec<Result<RawLine, FramingError>> = self.framer.feed(&chunk).collect();
            for line in lines {
                let line = match line {
                    Ok(line) => line,
                    Err(e) if self.machine.is_complete() => {
                        tracing::debug!(error = %e, "ignoring framing error after completion");
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };
                tracing::debug!(%line, "rx line");
                let effects = self.machine.handle(ProtocolEvent::Line(line));
                self.apply(effects)?;
            }
        }
    }

    fn closed_locally(&self) -> Result<(), SessionError> {
        match self.close.reason() {
            Some(CloseReason::WriteFailed(e)) => Err(SessionError::WriteFailed(e)),
            Some(reason) => {
                tracing::debug!(%reason, "link closed");
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn apply(&mut self, effects: Vec<Effect>) -> Result<(), SessionError> {
        for effect in effects {
            match effect {
                Effect::AppendRaw(line) => self.sinks.raw.append(&line)?,
                Effect::AppendSample(sample) => self.sinks.samples.append(&sample)?,
                Effect::Malformed { line, error } => {
                    tracing::warn!(%line, %error, "malformed telemetry");
                    if self.config.malformed == MalformedPolicy::Report {
                        let _ = self.events.send(SessionEvent::Malformed {
                            line: line.into_string(),
                            error: error.to_string(),
                        });
                    }
                }
                Effect::StateChanged(state) => {
                    self.state_tx.send_replace(state);
                    let _ = self.events.send(SessionEvent::StateChanged(state));
                }
                Effect::CloseTransport => {
                    self.close.close(CloseReason::Completed);
                    self.sinks.close()?;
                    let effects = self.machine.handle(ProtocolEvent::Flushed);
                    self.apply(effects)?;
                }
            }
        }
        Ok(())
    }
}

/// Wait until the session reaches `Complete` or `Closed`
pub async fn wait_finished(state: &mut watch::Receiver<ProtocolState>) -> ProtocolState {
    match state.wait_for(ProtocolState::is_finished).await {
        Ok(state) => *state,
        Err(_) => ProtocolState::Closed,
    }
}
