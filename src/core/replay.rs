//! Offline replay of a captured raw log
//!
//! A raw log is the line stream exactly as the session accepted it, so
//! feeding it back through the framer, parser and state machine reproduces
//! the structured sample table. The layout may differ from the one used
//! during capture.

use crate::core::protocol::{FramingError, LineFramer, TelemetryParser};
use crate::core::session::SessionConfig;
use crate::core::sink::{SampleSink, SinkError};
use crate::core::state_machine::{Effect, LineStats, ProtocolEvent, ProtocolMachine, ProtocolState};
use futures::StreamExt;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio_util::codec::FramedRead;

/// Replay errors
#[derive(Error, Debug)]
pub enum ReplayError {
    /// Raw log could not be opened
    #[error("failed to open {path}: {source}")]
    Open {
        /// Raw log path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Raw log could not be framed
    #[error(transparent)]
    Framing(#[from] FramingError),

    /// Sample table failed
    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Result of a replay
#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    /// Raw log path
    pub source: PathBuf,
    /// State when the log ran out
    pub final_state: ProtocolState,
    /// Whether the ready marker (or immediate mode) latched
    pub ready: bool,
    /// Whether the completion marker was seen
    pub completed: bool,
    /// Line counters
    pub lines: LineStats,
}

/// Replay `raw_log` and write every decoded sample to `samples`
pub async fn replay_file(
    raw_log: impl AsRef<Path>,
    config: &SessionConfig,
    samples: &mut dyn SampleSink,
) -> Result<ReplayReport, ReplayError> {
    let path = raw_log.as_ref().to_path_buf();
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|source| ReplayError::Open {
            path: path.clone(),
            source,
        })?;

    let parser = TelemetryParser::with_markers(config.layout, config.markers.clone());
    let mut machine = ProtocolMachine::new(config.mode, parser);
    machine.handle(ProtocolEvent::Connected);

    let mut lines = FramedRead::new(file, LineFramer::with_limit(config.max_pending));
    let result = async {
        while let Some(line) = lines.next().await {
            let mut finished = false;
            for effect in machine.handle(ProtocolEvent::Line(line?)) {
                match effect {
                    Effect::AppendSample(sample) => samples.append(&sample)?,
                    Effect::Malformed { line, error } => {
                        tracing::warn!(%line, %error, "malformed telemetry in raw log");
                    }
                    Effect::CloseTransport => finished = true,
                    Effect::AppendRaw(_) | Effect::StateChanged(_) => {}
                }
            }
            if finished {
                machine.handle(ProtocolEvent::Flushed);
                break;
            }
        }
        Ok::<_, ReplayError>(())
    }
    .await;

    let closed = samples.close();
    result?;
    closed?;

    let report = ReplayReport {
        source: path,
        final_state: machine.state(),
        ready: machine.is_ready(),
        completed: machine.is_complete(),
        lines: machine.stats(),
    };
    if !report.completed {
        tracing::warn!(source = %report.source.display(), "raw log ends without the completion marker");
    }
    Ok(report)
}
