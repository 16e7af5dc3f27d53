//! In-process transport backed by a tokio duplex pipe
//!
//! The [`MemoryDevice`] end plays the rig firmware: tests push telemetry lines
//! into it and read back what the host wrote.

use super::{Connection, TransportError, TransportTrait, TransportType};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};

const PIPE_CAPACITY: usize = 64 * 1024;

/// Transport whose far end is a [`MemoryDevice`]
pub struct MemoryTransport {
    name: String,
    host: Option<DuplexStream>,
}

impl MemoryTransport {
    /// Create a connected transport/device pair
    pub fn pair(name: &str) -> (Self, MemoryDevice) {
        let (host, device) = tokio::io::duplex(PIPE_CAPACITY);
        let (rx, tx) = tokio::io::split(device);
        (
            Self {
                name: name.to_string(),
                host: Some(host),
            },
            MemoryDevice {
                rx: BufReader::new(rx),
                tx,
            },
        )
    }
}

#[async_trait]
impl TransportTrait for MemoryTransport {
    async fn open(&mut self) -> Result<Connection, TransportError> {
        let host = self
            .host
            .take()
            .ok_or_else(|| TransportError::PortInUse(self.name.clone()))?;
        let (reader, writer) = tokio::io::split(host);
        Ok(Connection::new(
            self.connection_info(),
            Box::new(reader),
            Box::new(writer),
        ))
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Memory
    }

    fn connection_info(&self) -> String {
        format!("memory:{}", self.name)
    }
}

/// Device side of a [`MemoryTransport`]
pub struct MemoryDevice {
    rx: BufReader<ReadHalf<DuplexStream>>,
    tx: WriteHalf<DuplexStream>,
}

impl MemoryDevice {
    /// Send raw bytes to the host
    pub async fn send(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.tx.write_all(data).await?;
        self.tx.flush().await
    }

    /// Send one newline-terminated line to the host
    pub async fn send_line(&mut self, line: &str) -> std::io::Result<()> {
        self.send(format!("{line}\n").as_bytes()).await
    }

    /// Read one line written by the host, without the newline.
    /// Returns `None` once the host side is gone.
    pub async fn recv_line(&mut self) -> std::io::Result<Option<String>> {
        let mut line = String::new();
        if self.rx.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches('\n').to_string()))
    }

    /// Read everything the host writes until it drops its end
    pub async fn recv_all(&mut self) -> std::io::Result<Vec<String>> {
        let mut lines = Vec::new();
        while let Some(line) = self.recv_line().await? {
            lines.push(line);
        }
        Ok(lines)
    }
}
