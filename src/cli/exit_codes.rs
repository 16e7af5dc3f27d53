//! CLI Exit Codes
//!
//! Exit codes for scripted test runs.

use crate::config::ConfigError;
use crate::core::session::{SessionError, SessionReport};
use crate::core::transport::{CloseReason, TransportError};
use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// Connection failed
    pub const CONNECTION_FAILED: u8 = 3;

    /// File not found
    pub const FILE_NOT_FOUND: u8 = 6;

    /// Permission denied
    pub const PERMISSION_DENIED: u8 = 7;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 8;

    /// Protocol error (framing overflow, bad table)
    pub const PROTOCOL_ERROR: u8 = 9;

    /// Link I/O failed mid-session
    pub const LINK_ERROR: u8 = 10;

    /// User cancelled
    pub const CANCELLED: u8 = 11;

    /// Device busy
    pub const DEVICE_BUSY: u8 = 13;

    /// Port not found
    pub const PORT_NOT_FOUND: u8 = 14;

    /// Link closed before the completion marker
    pub const INCOMPLETE: u8 = 15;

    /// Internal error
    pub const INTERNAL_ERROR: u8 = 127;

    const TABLE: &'static [(u8, &'static str)] = &[
        (Self::SUCCESS, "Success"),
        (Self::ERROR, "General error"),
        (Self::INVALID_ARGS, "Invalid arguments"),
        (Self::CONNECTION_FAILED, "Connection failed"),
        (Self::FILE_NOT_FOUND, "File not found"),
        (Self::PERMISSION_DENIED, "Permission denied"),
        (Self::CONFIG_ERROR, "Configuration error"),
        (Self::PROTOCOL_ERROR, "Protocol error"),
        (Self::LINK_ERROR, "Link I/O error"),
        (Self::CANCELLED, "Operation cancelled"),
        (Self::DEVICE_BUSY, "Device busy"),
        (Self::PORT_NOT_FOUND, "Port not found"),
        (Self::INCOMPLETE, "Test incomplete"),
        (Self::INTERNAL_ERROR, "Internal error"),
    ];
}

/// CLI operation result
#[derive(Debug)]
pub enum CliResult {
    /// Success with optional message
    Success(Option<String>),

    /// Error with code and message
    Error(u8, String),
}

impl CliResult {
    /// Plain success
    pub fn success() -> Self {
        Self::Success(None)
    }

    /// Error with an explicit code
    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    /// Outcome of a session that ended without an error
    pub fn from_report(report: &SessionReport) -> Self {
        if report.completed {
            return Self::success();
        }
        match &report.close_reason {
            Some(CloseReason::Cancelled) => {
                Self::Error(ExitCodes::CANCELLED, "session cancelled".into())
            }
            Some(reason) => Self::Error(
                ExitCodes::INCOMPLETE,
                format!("link closed before test complete ({reason})"),
            ),
            None => Self::Error(
                ExitCodes::INCOMPLETE,
                "link closed before test complete".into(),
            ),
        }
    }

    /// Get exit code
    pub fn code(&self) -> u8 {
        match self {
            Self::Success(_) => ExitCodes::SUCCESS,
            Self::Error(code, _) => *code,
        }
    }

    /// Get message
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(Some(msg)) | Self::Error(_, msg) => Some(msg),
            Self::Success(None) => None,
        }
    }

    /// Convert to ExitCode
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Is success?
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl From<std::io::Error> for CliResult {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let code = match err.kind() {
            ErrorKind::NotFound => ExitCodes::FILE_NOT_FOUND,
            ErrorKind::PermissionDenied => ExitCodes::PERMISSION_DENIED,
            _ => ExitCodes::ERROR,
        };

        Self::Error(code, err.to_string())
    }
}

impl From<&TransportError> for CliResult {
    fn from(err: &TransportError) -> Self {
        let code = match err {
            TransportError::PortNotFound(_) => ExitCodes::PORT_NOT_FOUND,
            TransportError::PermissionDenied(_) => ExitCodes::PERMISSION_DENIED,
            TransportError::PortInUse(_) => ExitCodes::DEVICE_BUSY,
            TransportError::ConnectionFailed(_) => ExitCodes::CONNECTION_FAILED,
            TransportError::IoError(_) | TransportError::Disconnected | TransportError::Closed => {
                ExitCodes::LINK_ERROR
            }
        };
        Self::Error(code, err.to_string())
    }
}

impl From<&SessionError> for CliResult {
    fn from(err: &SessionError) -> Self {
        let code = match err {
            SessionError::Connection(e) => return Self::from(e),
            SessionError::Link(_) | SessionError::WriteFailed(_) | SessionError::Dispatch(_) => {
                ExitCodes::LINK_ERROR
            }
            SessionError::Framing(_) => ExitCodes::PROTOCOL_ERROR,
            SessionError::Sink(_) => ExitCodes::ERROR,
        };
        Self::Error(code, err.to_string())
    }
}

impl From<&ConfigError> for CliResult {
    fn from(err: &ConfigError) -> Self {
        Self::Error(ExitCodes::CONFIG_ERROR, err.to_string())
    }
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    ExitCodes::TABLE
        .iter()
        .find(|(c, _)| *c == code)
        .map_or("Unknown error", |&(_, desc)| desc)
}

/// Print exit code table
pub fn print_exit_codes() {
    println!("Exit Codes:");
    for (code, desc) in ExitCodes::TABLE {
        println!("  {:>3}  {}", code, desc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_result() {
        let success = CliResult::success();
        assert!(success.is_success());
        assert_eq!(success.code(), 0);

        let error = CliResult::error(3, "Connection failed");
        assert!(!error.is_success());
        assert_eq!(error.code(), 3);
        assert_eq!(error.message(), Some("Connection failed"));
    }

    #[test]
    fn test_from_session_error() {
        let busy = SessionError::Connection(TransportError::PortInUse("/dev/ttyUSB0".into()));
        assert_eq!(CliResult::from(&busy).code(), ExitCodes::DEVICE_BUSY);

        let missing = SessionError::Connection(TransportError::PortNotFound("COM9".into()));
        assert_eq!(CliResult::from(&missing).code(), ExitCodes::PORT_NOT_FOUND);

        let lost = SessionError::Link(TransportError::Disconnected);
        assert_eq!(CliResult::from(&lost).code(), ExitCodes::LINK_ERROR);

        let write = SessionError::WriteFailed("broken pipe".into());
        assert_eq!(CliResult::from(&write).code(), ExitCodes::LINK_ERROR);
    }

    fn report(completed: bool, close_reason: Option<CloseReason>) -> SessionReport {
        let now = chrono::Local::now();
        SessionReport {
            id: uuid::Uuid::new_v4(),
            link: "rig".into(),
            started: now,
            finished: now,
            final_state: crate::core::state_machine::ProtocolState::Closed,
            completed,
            close_reason,
            lines: Default::default(),
            transport: Default::default(),
            transitions: Vec::new(),
        }
    }

    #[test]
    fn test_from_report() {
        let done = report(true, Some(CloseReason::Completed));
        assert!(CliResult::from_report(&done).is_success());

        let cancelled = report(false, Some(CloseReason::Cancelled));
        assert_eq!(CliResult::from_report(&cancelled).code(), ExitCodes::CANCELLED);

        // A detail that merely reads "cancelled" is still an incomplete run.
        let lost = report(false, Some(CloseReason::LinkLost("cancelled".into())));
        assert_eq!(CliResult::from_report(&lost).code(), ExitCodes::INCOMPLETE);

        assert_eq!(CliResult::from_report(&report(false, None)).code(), ExitCodes::INCOMPLETE);
    }

    #[test]
    fn test_close_reason_json() {
        let json = serde_json::to_value(CloseReason::WriteFailed("eio".into())).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "write_failed", "detail": "eio"}));
    }

    #[test]
    fn test_descriptions() {
        assert_eq!(exit_code_description(ExitCodes::INCOMPLETE), "Test incomplete");
        assert_eq!(exit_code_description(200), "Unknown error");
    }
}
