//! Line framing for the rig's text protocol
//!
//! Bytes are buffered as they arrive and cut at `\n`. A line is decoded as
//! UTF-8 only once it is complete, so chunk boundaries never change the
//! output, even inside a multi-byte character.

use bytes::BytesMut;
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;
use tokio_util::codec::Decoder;

/// Default cap on buffered bytes that have not seen a newline yet
pub const DEFAULT_MAX_PENDING: usize = 64 * 1024;

/// A trimmed, non-empty text line as received from the rig
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RawLine(String);

impl RawLine {
    /// Build a line from text, trimming it. Empty lines are rejected.
    pub fn new(text: &str) -> Option<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// Line text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the owned text
    pub fn into_string(self) -> String {
        self.0
    }
}

impl AsRef<str> for RawLine {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RawLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Framing errors
#[derive(Error, Debug)]
pub enum FramingError {
    /// Too many bytes arrived without a line terminator.
    ///
    /// This guard is a hardening addition: the rig firmware itself never
    /// bounds line length.
    #[error("framing overflow: {pending} bytes without a newline (limit {limit})")]
    Overflow {
        /// Unterminated bytes currently buffered
        pending: usize,
        /// Configured limit
        limit: usize,
    },

    /// I/O error while reading a framed stream
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Newline framer with a bounded partial-line buffer
#[derive(Debug)]
pub struct LineFramer {
    buffer: BytesMut,
    max_pending: Option<usize>,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineFramer {
    /// Create a framer with the default overflow limit
    pub fn new() -> Self {
        Self::with_limit(Some(DEFAULT_MAX_PENDING))
    }

    /// Create a framer with a custom limit (`None` disables the guard)
    pub fn with_limit(max_pending: Option<usize>) -> Self {
        Self {
            buffer: BytesMut::with_capacity(1024),
            max_pending,
        }
    }

    /// Append a chunk and iterate over the lines it completes.
    ///
    /// Lines are cut lazily while the iterator is consumed; any line left
    /// unread stays buffered for the next call. Once every complete line has
    /// been handed out, an unterminated tail above the limit yields a single
    /// [`FramingError::Overflow`].
    pub fn feed(&mut self, data: &[u8]) -> Lines<'_> {
        self.buffer.extend_from_slice(data);
        Lines {
            framer: self,
            done: false,
        }
    }

    /// Number of buffered bytes after the last newline
    pub fn pending(&self) -> usize {
        match self.buffer.iter().rposition(|&b| b == b'\n') {
            Some(i) => self.buffer.len() - i - 1,
            None => self.buffer.len(),
        }
    }

    fn check_overflow(&self) -> Result<(), FramingError> {
        if let Some(limit) = self.max_pending {
            let pending = self.pending();
            if pending > limit {
                return Err(FramingError::Overflow { pending, limit });
            }
        }
        Ok(())
    }

    fn next_line(&mut self) -> Option<RawLine> {
        loop {
            let pos = self.buffer.iter().position(|&b| b == b'\n')?;
            let mut frame = self.buffer.split_to(pos + 1);
            frame.truncate(pos);
            if let Some(line) = decode_line(&frame) {
                return Some(line);
            }
        }
    }
}

fn decode_line(frame: &[u8]) -> Option<RawLine> {
    let text = String::from_utf8_lossy(frame);
    if let Cow::Owned(_) = text {
        tracing::warn!(bytes = %hex::encode(frame), "line is not valid UTF-8, replacing invalid sequences");
    }
    RawLine::new(&text)
}

/// Lines completed by one [`LineFramer::feed`] call
pub struct Lines<'a> {
    framer: &'a mut LineFramer,
    done: bool,
}

impl Iterator for Lines<'_> {
    type Item = Result<RawLine, FramingError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Some(line) = self.framer.next_line() {
            return Some(Ok(line));
        }
        self.done = true;
        self.framer.check_overflow().err().map(Err)
    }
}

impl Decoder for LineFramer {
    type Item = RawLine;
    type Error = FramingError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RawLine>, FramingError> {
        if !src.is_empty() {
            let chunk = src.split();
            self.buffer.unsplit(chunk);
        }
        match self.next_line() {
            Some(line) => Ok(Some(line)),
            None => self.check_overflow().map(|()| None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<RawLine>, FramingError> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if self.buffer.is_empty() {
            return Ok(None);
        }
        // Stream ended mid-line; hand out the tail rather than lose it.
        let tail = self.buffer.split();
        tracing::debug!(len = tail.len(), "unterminated line at end of stream");
        Ok(decode_line(&tail))
    }
}
