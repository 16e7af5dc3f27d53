//! Textual summary of a structured sample table

use crate::core::protocol::SampleLayout;
use serde::Serialize;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;

/// Summary errors
#[derive(Error, Debug)]
pub enum SummaryError {
    /// File could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Table is empty or has an unknown header
    #[error("unrecognised header {0:?}")]
    Header(String),

    /// A data row does not fit the header
    #[error("row {row}: {content:?}")]
    Row {
        /// 1-based line number in the file
        row: usize,
        /// Row text
        content: String,
    },
}

/// Inclusive range of observed values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Extent {
    /// Smallest value
    pub min: i64,
    /// Largest value
    pub max: i64,
}

impl Extent {
    fn widen(extent: &mut Option<Extent>, value: i64) {
        match extent {
            Some(e) => {
                e.min = e.min.min(value);
                e.max = e.max.max(value);
            }
            None => *extent = Some(Extent { min: value, max: value }),
        }
    }
}

/// Statistics of one sample table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSummary {
    /// Layout given by the header
    pub layout: SampleLayout,
    /// Data rows
    pub samples: u64,
    /// First timestamp
    pub first_timestamp: Option<i64>,
    /// Last timestamp
    pub last_timestamp: Option<i64>,
    /// Speed range
    pub speed: Option<Extent>,
    /// Weight range
    pub weight: Option<Extent>,
    /// Rows whose timestamp went backwards
    pub non_monotonic: u64,
}

impl TableSummary {
    /// Milliseconds between first and last sample, if representable
    pub fn span_ms(&self) -> Option<i64> {
        self.last_timestamp?.checked_sub(self.first_timestamp?)
    }
}

impl fmt::Display for TableSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Samples:        {}", self.samples)?;
        if let (Some(first), Some(last)) = (self.first_timestamp, self.last_timestamp) {
            match self.span_ms() {
                Some(span) => writeln!(f, "Time span:      {first} .. {last} ms ({span} ms)")?,
                None => writeln!(f, "Time span:      {first} .. {last} ms")?,
            }
        }
        if let Some(speed) = self.speed {
            writeln!(f, "Speed:          {} .. {}", speed.min, speed.max)?;
        }
        if let Some(weight) = self.weight {
            writeln!(f, "Weight:         {} .. {}", weight.min, weight.max)?;
        }
        write!(f, "Non-monotonic:  {}", self.non_monotonic)
    }
}

/// Summarize a table on disk
pub fn summarize_file(path: impl AsRef<Path>) -> Result<TableSummary, SummaryError> {
    summarize(BufReader::new(File::open(path)?))
}

/// Summarize a table from any reader
pub fn summarize<R: BufRead>(reader: R) -> Result<TableSummary, SummaryError> {
    let mut rows = reader.lines();

    let header = rows.next().transpose()?.unwrap_or_default();
    let layout = [SampleLayout::SpeedOnly, SampleLayout::SpeedAndWeight]
        .into_iter()
        .find(|layout| layout.header().join(",") == header.trim_end())
        .ok_or_else(|| SummaryError::Header(header.clone()))?;

    let mut summary = TableSummary {
        layout,
        samples: 0,
        first_timestamp: None,
        last_timestamp: None,
        speed: None,
        weight: None,
        non_monotonic: 0,
    };

    for (index, row) in rows.enumerate() {
        let row = row?;
        let content = row.trim_end();
        if content.is_empty() {
            continue;
        }
        let bad_row = || SummaryError::Row {
            row: index + 2,
            content: content.to_string(),
        };

        let fields: Vec<&str> = content.split(',').collect();
        if fields.len() != layout.header().len() {
            return Err(bad_row());
        }
        let timestamp: i64 = fields[0].parse().map_err(|_| bad_row())?;
        let speed: i64 = fields[1].parse().map_err(|_| bad_row())?;
        let weight = match fields.get(2) {
            Some(w) if !w.is_empty() => Some(w.parse::<i64>().map_err(|_| bad_row())?),
            _ => None,
        };

        if summary.last_timestamp.is_some_and(|last| timestamp < last) {
            summary.non_monotonic += 1;
        }
        summary.first_timestamp.get_or_insert(timestamp);
        summary.last_timestamp = Some(timestamp);
        Extent::widen(&mut summary.speed, speed);
        if let Some(weight) = weight {
            Extent::widen(&mut summary.weight, weight);
        }
        summary.samples += 1;
    }

    Ok(summary)
}
