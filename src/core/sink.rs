//! Session output sinks
//!
//! Two append-only streams are produced per session:
//! - the raw log, one received line per row, in arrival order
//! - the structured sample table, `Timestamp,Speed[,Weight]`
//!
//! Both files are truncated when the session opens them.

use crate::core::protocol::{RawLine, SampleLayout, TelemetrySample};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Raw log lines between explicit flushes
const RAW_FLUSH_EVERY: usize = 100;

/// Sink errors
#[derive(Error, Debug)]
pub enum SinkError {
    /// File could not be created
    #[error("failed to open {path}: {source}")]
    Open {
        /// Target path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Write or flush failed
    #[error("sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Sink used after close
    #[error("sink already closed")]
    Closed,
}

/// Append-only consumer of raw lines
pub trait RawLogSink: Send {
    /// Append one line
    fn append(&mut self, line: &RawLine) -> Result<(), SinkError>;

    /// Flush and close. Calling twice is a no-op.
    fn close(&mut self) -> Result<(), SinkError>;
}

/// Append-only consumer of decoded samples
pub trait SampleSink: Send {
    /// Append one sample
    fn append(&mut self, sample: &TelemetrySample) -> Result<(), SinkError>;

    /// Flush and close. Calling twice is a no-op.
    fn close(&mut self) -> Result<(), SinkError>;
}

fn create(path: &Path) -> Result<BufWriter<File>, SinkError> {
    File::create(path)
        .map(BufWriter::new)
        .map_err(|source| SinkError::Open {
            path: path.to_path_buf(),
            source,
        })
}

/// Raw log file
pub struct RawLogFile {
    writer: Option<BufWriter<File>>,
    path: PathBuf,
    lines: usize,
}

impl RawLogFile {
    /// Create (truncate) the raw log
    pub fn create(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let writer = create(&path)?;
        Ok(Self {
            writer: Some(writer),
            path,
            lines: 0,
        })
    }

    /// Log path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lines written so far
    pub fn lines(&self) -> usize {
        self.lines
    }
}

impl RawLogSink for RawLogFile {
    fn append(&mut self, line: &RawLine) -> Result<(), SinkError> {
        let writer = self.writer.as_mut().ok_or(SinkError::Closed)?;
        writeln!(writer, "{}", line)?;
        self.lines += 1;

        if self.lines % RAW_FLUSH_EVERY == 0 {
            writer.flush()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

/// Structured sample table (CSV)
pub struct CsvSampleFile {
    writer: Option<BufWriter<File>>,
    path: PathBuf,
    layout: SampleLayout,
    rows: usize,
}

impl CsvSampleFile {
    /// Create (truncate) the table and write its header row
    pub fn create(path: impl AsRef<Path>, layout: SampleLayout) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let mut writer = create(&path)?;
        writeln!(writer, "{}", layout.header().join(","))?;
        Ok(Self {
            writer: Some(writer),
            path,
            layout,
            rows: 0,
        })
    }

    /// Table path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Data rows written so far
    pub fn rows(&self) -> usize {
        self.rows
    }
}

impl SampleSink for CsvSampleFile {
    fn append(&mut self, sample: &TelemetrySample) -> Result<(), SinkError> {
        let writer = self.writer.as_mut().ok_or(SinkError::Closed)?;
        match self.layout {
            SampleLayout::SpeedOnly => writeln!(writer, "{},{}", sample.timestamp, sample.speed)?,
            SampleLayout::SpeedAndWeight => {
                let weight = sample.weight.map(|w| w.to_string()).unwrap_or_default();
                writeln!(writer, "{},{},{}", sample.timestamp, sample.speed, weight)?;
            }
        }
        self.rows += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

/// The pair of sinks a session writes to
pub struct Sinks {
    /// Raw line log
    pub raw: Box<dyn RawLogSink>,
    /// Structured samples
    pub samples: Box<dyn SampleSink>,
}

impl Sinks {
    /// Bundle two sinks
    pub fn new(raw: Box<dyn RawLogSink>, samples: Box<dyn SampleSink>) -> Self {
        Self { raw, samples }
    }

    /// Open both files fresh
    pub fn create_files(
        raw_log: impl AsRef<Path>,
        samples: impl AsRef<Path>,
        layout: SampleLayout,
    ) -> Result<Self, SinkError> {
        Ok(Self::new(
            Box::new(RawLogFile::create(raw_log)?),
            Box::new(CsvSampleFile::create(samples, layout)?),
        ))
    }

    /// Close both sinks, reporting the first failure
    pub fn close(&mut self) -> Result<(), SinkError> {
        let raw = self.raw.close();
        let samples = self.samples.close();
        raw.and(samples)
    }
}
