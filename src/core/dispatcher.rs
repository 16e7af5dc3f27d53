//! Command Dispatcher
//!
//! Owns the write half of the link. Operator intents and the optional
//! scheduled `START` are turned into wire bytes here, gated on the protocol
//! state published by the session. Every write is followed by a settle delay,
//! so at most one command is ever in flight.

use crate::core::protocol::{Command, CommandCodec, InvalidIntent};
use crate::core::state_machine::{HandshakeMode, ProtocolState};
use crate::core::transport::{LinkWriter, TransportError};
use async_trait::async_trait;
use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::pending;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::Sleep;
use tokio_util::codec::Encoder;

/// Default pause after every write
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(100);

/// What to do with commands issued before a marker handshake completes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PreReadyPolicy {
    /// Refuse them
    #[default]
    Reject,
    /// Hold them and write them in order once ready
    Queue,
}

/// Dispatcher settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Handshake mode of the session
    pub mode: HandshakeMode,
    /// Pre-ready policy (marker handshake only)
    pub pre_ready: PreReadyPolicy,
    /// Pause after every write
    pub settle: Duration,
    /// Emit `START` this long after the session starts running
    pub auto_start: Option<Duration>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            mode: HandshakeMode::default(),
            pre_ready: PreReadyPolicy::default(),
            settle: DEFAULT_SETTLE,
            auto_start: None,
        }
    }
}

/// Dispatcher errors
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Command not allowed in the current state
    #[error("{command} rejected: session is {state}")]
    Rejected {
        /// Refused command
        command: Command,
        /// State at the time
        state: ProtocolState,
    },

    /// Stop was already issued
    #[error("{command} rejected: stop already issued")]
    AfterStop {
        /// Refused command
        command: Command,
    },

    /// Input is not a command
    #[error(transparent)]
    InvalidIntent(#[from] InvalidIntent),

    /// Writing to the link failed
    #[error("link write failed: {0}")]
    Transport(#[from] TransportError),
}

impl DispatchError {
    /// Rejections only concern the operator; the session carries on
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Rejected { .. } | Self::AfterStop { .. } | Self::InvalidIntent(_)
        )
    }
}

/// Outcome of an accepted command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted {
    /// Written to the link
    Sent(Command),
    /// Held until the rig is ready
    Queued(Command),
}

/// Why [`CommandDispatcher::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchEnd {
    /// Operator sent stop
    Stopped,
    /// Session reached `Complete` or `Closed`
    SessionFinished(ProtocolState),
    /// Session dropped its state channel
    SessionGone,
}

/// Result of a dispatcher run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Commands written, in order
    pub sent: Vec<Command>,
    /// Intents refused
    pub rejected: usize,
    /// Queued commands dropped at completion
    pub dropped: usize,
    /// Reason the run ended
    pub end: DispatchEnd,
}

/// Source of operator intents.
///
/// `next_intent` must be cancel safe: the dispatcher races it against state
/// changes and drops it when the session finishes.
#[async_trait]
pub trait IntentSource: Send {
    /// Next raw intent, or `None` when the source is exhausted
    async fn next_intent(&mut self) -> Option<String>;

    /// Tell the operator an intent was refused
    fn reject(&mut self, message: &str);

    /// Tell the operator an intent was accepted
    fn accepted(&mut self, _outcome: &Submitted) {}
}

/// Intents delivered over a channel
pub struct ChannelIntents {
    rx: mpsc::Receiver<String>,
    rejections: Vec<String>,
}

impl ChannelIntents {
    /// Wrap a receiver
    pub fn new(rx: mpsc::Receiver<String>) -> Self {
        Self {
            rx,
            rejections: Vec::new(),
        }
    }

    /// Create a channel and its source
    pub fn channel(capacity: usize) -> (mpsc::Sender<String>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx))
    }

    /// Rejection messages seen so far
    pub fn rejections(&self) -> &[String] {
        &self.rejections
    }
}

#[async_trait]
impl IntentSource for ChannelIntents {
    async fn next_intent(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    fn reject(&mut self, message: &str) {
        self.rejections.push(message.to_string());
    }
}

/// A source with no operator behind it
#[derive(Debug, Default)]
pub struct NoIntents;

#[async_trait]
impl IntentSource for NoIntents {
    async fn next_intent(&mut self) -> Option<String> {
        pending().await
    }

    fn reject(&mut self, _message: &str) {}
}

/// Serialized writer of rig commands
pub struct CommandDispatcher {
    writer: LinkWriter,
    state: watch::Receiver<ProtocolState>,
    config: DispatcherConfig,
    codec: CommandCodec,
    queue: VecDeque<Command>,
    sent: Vec<Command>,
    rejected: usize,
    start_sent: bool,
    stopped: bool,
}

impl CommandDispatcher {
    /// Create a dispatcher over the link's write half
    pub fn new(
        writer: LinkWriter,
        state: watch::Receiver<ProtocolState>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            writer,
            state,
            config,
            codec: CommandCodec,
            queue: VecDeque::new(),
            sent: Vec::new(),
            rejected: 0,
            start_sent: false,
            stopped: false,
        }
    }

    /// Current protocol state as last published
    pub fn state(&self) -> ProtocolState {
        *self.state.borrow()
    }

    /// Commands waiting for readiness
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Commands written so far
    pub fn sent(&self) -> &[Command] {
        &self.sent
    }

    /// Whether a stop has been written
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    fn stop_pending(&self) -> bool {
        self.stopped || self.queue.iter().any(Command::ends_input)
    }

    /// Parse an operator intent and send it
    pub async fn submit(&mut self, intent: &str) -> Result<Submitted, DispatchError> {
        let command = match intent.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                self.rejected += 1;
                tracing::warn!(intent, "invalid operator intent");
                return Err(e.into());
            }
        };
        self.send(command).await
    }

    /// Send a command, honouring the state gate and pre-ready policy
    pub async fn send(&mut self, command: Command) -> Result<Submitted, DispatchError> {
        let state = self.state();

        if self.stop_pending() && state.accepts_commands(self.config.mode) {
            self.flush_queue().await?;
        }
        if self.stop_pending() {
            self.rejected += 1;
            tracing::warn!(%command, "command after stop rejected");
            return Err(DispatchError::AfterStop { command });
        }

        if state.accepts_commands(self.config.mode) {
            self.flush_queue().await?;
            self.write(command).await?;
            return Ok(Submitted::Sent(command));
        }

        if state == ProtocolState::AwaitingReady && self.config.pre_ready == PreReadyPolicy::Queue
        {
            tracing::info!(%command, "queued until ready");
            self.queue.push_back(command);
            return Ok(Submitted::Queued(command));
        }

        self.rejected += 1;
        tracing::warn!(%command, %state, "command rejected");
        Err(DispatchError::Rejected { command, state })
    }

    /// Write queued commands if the session is running.
    ///
    /// Nothing is written after a queued stop.
    pub async fn flush_queue(&mut self) -> Result<usize, DispatchError> {
        let mut written = 0;
        while !self.stopped && self.state() == ProtocolState::Running {
            let Some(command) = self.queue.pop_front() else {
                break;
            };
            self.write(command).await?;
            written += 1;
        }
        Ok(written)
    }

    fn cancel_queue(&mut self) -> usize {
        let dropped = self.queue.len();
        if dropped > 0 {
            tracing::warn!(dropped, "session finished, dropping queued commands");
            self.queue.clear();
        }
        dropped
    }

    async fn write(&mut self, command: Command) -> Result<(), DispatchError> {
        let mut buf = BytesMut::new();
        self.codec
            .encode(command, &mut buf)
            .map_err(TransportError::IoError)?;

        match self.writer.write(&buf).await {
            Ok(()) => {}
            Err(TransportError::Closed) => {
                self.rejected += 1;
                let state = self.state();
                tracing::warn!(%command, %state, "link closed, command not written");
                return Err(DispatchError::Rejected { command, state });
            }
            Err(e) => {
                tracing::error!(%command, error = %e, "command write failed");
                return Err(e.into());
            }
        }

        tracing::info!(%command, "command sent");
        self.sent.push(command);
        if command.ends_input() {
            self.stopped = true;
        }
        tokio::time::sleep(self.config.settle).await;
        Ok(())
    }

    fn summary(&mut self, end: DispatchEnd) -> DispatchSummary {
        let dropped = self.cancel_queue();
        DispatchSummary {
            sent: std::mem::take(&mut self.sent),
            rejected: self.rejected,
            dropped,
            end,
        }
    }

    /// Drive the dispatcher until the operator stops, or the session finishes.
    ///
    /// Recoverable errors are reported to `source` and the loop continues;
    /// a link write failure ends the run with an error.
    pub async fn run<S: IntentSource + ?Sized>(
        mut self,
        source: &mut S,
    ) -> Result<DispatchSummary, DispatchError> {
        let mut input_open = true;
        let mut start_timer: Option<Pin<Box<Sleep>>> = None;

        loop {
            let state = *self.state.borrow_and_update();
            if state.is_finished() {
                return Ok(self.summary(DispatchEnd::SessionFinished(state)));
            }

            if state == ProtocolState::Running {
                self.flush_queue().await?;
                if self.stopped {
                    return Ok(self.summary(DispatchEnd::Stopped));
                }
                if let Some(delay) = self.config.auto_start {
                    if start_timer.is_none() && !self.start_sent {
                        tracing::info!(delay_ms = delay.as_millis() as u64, "START scheduled");
                        start_timer = Some(Box::pin(tokio::time::sleep(delay)));
                    }
                }
            }

            tokio::select! {
                changed = self.state.changed() => {
                    if changed.is_err() {
                        return Ok(self.summary(DispatchEnd::SessionGone));
                    }
                }
                () = wait_timer(&mut start_timer), if start_timer.is_some() => {
                    start_timer = None;
                    self.start_sent = true;
                    match self.send(Command::Start).await {
                        Ok(_) => {}
                        Err(e) if e.is_recoverable() => tracing::warn!(error = %e, "START not sent"),
                        Err(e) => return Err(e),
                    }
                }
                intent = source.next_intent(), if input_open => {
                    let Some(intent) = intent else {
                        tracing::debug!("intent source closed");
                        input_open = false;
                        continue;
                    };
                    match self.submit(&intent).await {
                        Ok(outcome) => source.accepted(&outcome),
                        Err(e) if e.is_recoverable() => source.reject(&e.to_string()),
                        Err(e) => return Err(e),
                    }
                    if self.stopped {
                        return Ok(self.summary(DispatchEnd::Stopped));
                    }
                }
            }
        }
    }
}

async fn wait_timer(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}
