//! Serial port transport implementation

use super::{Connection, TransportError, TransportTrait, TransportType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, StopBits};

/// Serial port configuration.
///
/// The rig firmware talks 8N1 without flow control, so only the endpoint and
/// baud rate are configurable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Port name (e.g., COM3, /dev/ttyUSB0)
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
}

impl SerialConfig {
    /// Create a new serial configuration
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self::new("/dev/ttyUSB0", 9600)
    }
}

/// Serial port transport.
///
/// On unix the port is opened in exclusive mode, so a second session on the
/// same endpoint fails with [`TransportError::PortInUse`] (or a permission
/// error, depending on the platform).
pub struct SerialTransport {
    config: SerialConfig,
}

impl SerialTransport {
    /// Create a new serial transport
    pub fn new(config: SerialConfig) -> Self {
        Self { config }
    }

    fn map_open_error(&self, e: &tokio_serial::Error) -> TransportError {
        let port = self.config.port.clone();
        match e.kind() {
            tokio_serial::ErrorKind::NoDevice => TransportError::PortNotFound(port),
            tokio_serial::ErrorKind::Io(std::io::ErrorKind::NotFound) => {
                TransportError::PortNotFound(port)
            }
            tokio_serial::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                TransportError::PermissionDenied(port)
            }
            _ if e.to_string().to_lowercase().contains("busy") => TransportError::PortInUse(port),
            _ => TransportError::ConnectionFailed(format!("{}: {}", port, e)),
        }
    }
}

#[async_trait]
impl TransportTrait for SerialTransport {
    async fn open(&mut self) -> Result<Connection, TransportError> {
        let stream = tokio_serial::new(&self.config.port, self.config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native_async()
            .map_err(|e| self.map_open_error(&e))?;

        tracing::info!(port = %self.config.port, baud = self.config.baud_rate, "serial port opened");

        let (reader, writer) = tokio::io::split(stream);
        Ok(Connection::new(
            self.connection_info(),
            Box::new(reader),
            Box::new(writer),
        ))
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Serial
    }

    fn connection_info(&self) -> String {
        format!("{} @ {} baud (8N1)", self.config.port, self.config.baud_rate)
    }
}

/// List available serial ports
pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>, TransportError> {
    serialport::available_ports().map_err(|e| TransportError::IoError(e.into()))
}
