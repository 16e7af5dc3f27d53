//! Transport layer
//!
//! A transport opens a duplex byte link to the rig. Once open, a
//! [`Connection`] is split into three parts:
//! - [`LinkReader`] - chunk stream driven by the session task
//! - [`LinkWriter`] - write path owned by the command dispatcher
//! - [`CloseHandle`] - cloneable, idempotent close usable from either side
//!
//! Closing cancels a pending read immediately. The OS handle is released once
//! both halves have been dropped.

mod memory;
mod serial;

pub use memory::{MemoryDevice, MemoryTransport};
pub use serial::{list_ports, SerialConfig, SerialTransport};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// Read half of an open link
pub type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of an open link
pub type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

const READ_CHUNK: usize = 4096;

/// Transport type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportType {
    /// Serial port
    Serial,
    /// In-process pipe
    Memory,
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial => write!(f, "Serial"),
            Self::Memory => write!(f, "Memory"),
        }
    }
}

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Port already in use
    #[error("Port already in use: {0}")]
    PortInUse(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Remote end went away (EOF)
    #[error("Disconnected")]
    Disconnected,

    /// Link was closed locally
    #[error("Link closed")]
    Closed,
}

impl TransportError {
    /// Whether the error happened while opening the link
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_)
                | Self::PortNotFound(_)
                | Self::PermissionDenied(_)
                | Self::PortInUse(_)
        )
    }
}

/// Transport statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransportStats {
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
    /// Completed writes
    pub writes: u64,
    /// Chunks delivered to the reader
    pub chunks_received: u64,
}

/// Why a link was closed. Only the first reason is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CloseReason {
    /// Test complete marker seen
    Completed,
    /// Operator or caller cancelled the session
    Cancelled,
    /// A write to the link failed
    WriteFailed(String),
    /// The remote end disappeared or the read failed
    LinkLost(String),
    /// The session aborted on a protocol fault
    ProtocolFault(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "test complete"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::WriteFailed(e) => write!(f, "write failed: {e}"),
            Self::LinkLost(e) => write!(f, "link lost: {e}"),
            Self::ProtocolFault(e) => write!(f, "protocol fault: {e}"),
        }
    }
}

/// Idempotent close shared by both halves of a link
#[derive(Debug, Clone)]
pub struct CloseHandle {
    token: CancellationToken,
    reason: Arc<Mutex<Option<CloseReason>>>,
}

impl CloseHandle {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            reason: Arc::new(Mutex::new(None)),
        }
    }

    /// Close the link. Returns `false` if it was already closed.
    pub fn close(&self, reason: CloseReason) -> bool {
        {
            let mut slot = self.reason.lock();
            if slot.is_some() {
                return false;
            }
            tracing::debug!(%reason, "closing link");
            *slot = Some(reason);
        }
        self.token.cancel();
        true
    }

    /// Check if the link has been closed
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// First close reason, if closed
    pub fn reason(&self) -> Option<CloseReason> {
        self.reason.lock().clone()
    }

    /// Resolve once the link is closed
    pub async fn closed(&self) {
        self.token.cancelled().await;
    }
}

/// An open, not yet split link
pub struct Connection {
    info: String,
    reader: BoxedRead,
    writer: BoxedWrite,
}

impl Connection {
    /// Wrap an opened read/write pair
    pub fn new(info: impl Into<String>, reader: BoxedRead, writer: BoxedWrite) -> Self {
        Self {
            info: info.into(),
            reader,
            writer,
        }
    }

    /// Connection info string
    pub fn info(&self) -> &str {
        &self.info
    }

    /// Split into reader, writer and close handle
    pub fn split(self) -> (LinkReader, LinkWriter, CloseHandle) {
        let close = CloseHandle::new();
        let stats = Arc::new(RwLock::new(TransportStats::default()));

        let reader = LinkReader {
            inner: self.reader,
            buf: vec![0u8; READ_CHUNK],
            close: close.clone(),
            stats: stats.clone(),
        };
        let writer = LinkWriter {
            inner: self.writer,
            close: close.clone(),
            stats,
        };
        (reader, writer, close)
    }
}

/// Chunk-level read side of a link
pub struct LinkReader {
    inner: BoxedRead,
    buf: Vec<u8>,
    close: CloseHandle,
    stats: Arc<RwLock<TransportStats>>,
}

impl LinkReader {
    /// Wait for the next chunk of bytes.
    ///
    /// Returns `Ok(None)` once the link has been closed through the
    /// [`CloseHandle`], and [`TransportError::Disconnected`] on EOF.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, TransportError> {
        let token = self.close.token.clone();
        if token.is_cancelled() {
            return Ok(None);
        }

        let n = tokio::select! {
            biased;
            () = token.cancelled() => return Ok(None),
            read = self.inner.read(&mut self.buf) => read?,
        };

        if n == 0 {
            return Err(TransportError::Disconnected);
        }

        {
            let mut stats = self.stats.write();
            stats.bytes_received += n as u64;
            stats.chunks_received += 1;
        }
        tracing::trace!(len = n, bytes = %hex::encode(&self.buf[..n]), "rx chunk");

        Ok(Some(Bytes::copy_from_slice(&self.buf[..n])))
    }

    /// Close handle for this link
    pub fn close_handle(&self) -> CloseHandle {
        self.close.clone()
    }

    /// Snapshot of link statistics
    pub fn stats(&self) -> TransportStats {
        self.stats.read().clone()
    }
}

/// Write side of a link
pub struct LinkWriter {
    inner: BoxedWrite,
    close: CloseHandle,
    stats: Arc<RwLock<TransportStats>>,
}

impl LinkWriter {
    /// Write all bytes and drain them to the device.
    ///
    /// A failed write closes the link with [`CloseReason::WriteFailed`].
    pub async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if self.close.is_closed() {
            return Err(TransportError::Closed);
        }

        let result = async {
            self.inner.write_all(data).await?;
            self.inner.flush().await
        }
        .await;

        match result {
            Ok(()) => {
                let mut stats = self.stats.write();
                stats.bytes_sent += data.len() as u64;
                stats.writes += 1;
                Ok(())
            }
            Err(e) => {
                self.close.close(CloseReason::WriteFailed(e.to_string()));
                Err(TransportError::IoError(e))
            }
        }
    }

    /// Close handle for this link
    pub fn close_handle(&self) -> CloseHandle {
        self.close.clone()
    }
}

/// Transport trait for the rig link
#[async_trait]
pub trait TransportTrait: Send {
    /// Open the endpoint
    async fn open(&mut self) -> Result<Connection, TransportError>;

    /// Get transport type
    fn transport_type(&self) -> TransportType;

    /// Get connection info string
    fn connection_info(&self) -> String;
}
