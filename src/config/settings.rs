//! Application settings and deployment presets

use crate::core::dispatcher::{PreReadyPolicy, DEFAULT_SETTLE};
use crate::core::protocol::{Markers, SampleLayout, DEFAULT_MAX_PENDING};
use crate::core::session::{MalformedPolicy, SessionConfig};
use crate::core::state_machine::HandshakeMode;
use crate::core::transport::SerialConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No platform config directory
    #[error("could not determine config directory")]
    NoConfigDir,

    /// File could not be read or written
    #[error("{path}: {source}")]
    Io {
        /// Config path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// File is not valid TOML for [`AppConfig`]
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config could not be serialized
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Rig firmware variant the host is paired with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Deployment {
    /// Operator-driven; waits for the ready marker; speed only
    #[default]
    Interactive,
    /// Operator-driven thrust stand; ready on open; speed and weight
    Thrust,
    /// Unattended; ready on open; `START` after a fixed delay
    Autostart,
}

impl Deployment {
    /// Delay before the automatic `START`
    pub const START_DELAY: Duration = Duration::from_secs(8);

    /// Handshake mode of the preset
    pub fn mode(self) -> HandshakeMode {
        match self {
            Self::Interactive => HandshakeMode::Marker,
            Self::Thrust | Self::Autostart => HandshakeMode::Immediate,
        }
    }

    /// Telemetry layout of the preset
    pub fn layout(self) -> SampleLayout {
        match self {
            Self::Thrust => SampleLayout::SpeedAndWeight,
            Self::Interactive | Self::Autostart => SampleLayout::SpeedOnly,
        }
    }

    /// Automatic start delay, if the preset has one
    pub fn auto_start(self) -> Option<Duration> {
        match self {
            Self::Autostart => Some(Self::START_DELAY),
            Self::Interactive | Self::Thrust => None,
        }
    }

    /// Whether the preset reads operator commands
    pub fn operator_input(self) -> bool {
        !matches!(self, Self::Autostart)
    }
}

/// Output file names
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    /// Raw line log
    pub raw_log: PathBuf,
    /// Structured sample table
    pub samples: PathBuf,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            raw_log: PathBuf::from("eng.log"),
            samples: PathBuf::from("eng.csv"),
        }
    }
}

/// Protocol tuning. Unset fields fall back to the deployment preset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Handshake override
    pub mode: Option<HandshakeMode>,
    /// Layout override
    pub layout: Option<SampleLayout>,
    /// Ready marker text
    pub ready_marker: String,
    /// Completion marker text
    pub complete_marker: String,
    /// Telemetry line prefix
    pub telemetry_prefix: String,
    /// Pause after every command write (ms)
    pub settle_ms: u64,
    /// Auto-start delay override (ms)
    pub start_delay_ms: Option<u64>,
    /// Framing overflow limit in bytes (0 disables)
    pub max_pending: usize,
    /// Commands before readiness
    pub pre_ready: PreReadyPolicy,
    /// Malformed telemetry reporting
    pub malformed: MalformedPolicy,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        let markers = Markers::default();
        Self {
            mode: None,
            layout: None,
            ready_marker: markers.ready,
            complete_marker: markers.complete,
            telemetry_prefix: markers.telemetry_prefix,
            settle_ms: DEFAULT_SETTLE.as_millis() as u64,
            start_delay_ms: None,
            max_pending: DEFAULT_MAX_PENDING,
            pre_ready: PreReadyPolicy::default(),
            malformed: MalformedPolicy::default(),
        }
    }
}

/// Diagnostic logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive
    pub level: String,
    /// Directory for daily-rotated trace files
    pub trace_dir: Option<PathBuf>,
    /// Emit JSON instead of text
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            trace_dir: None,
            json: false,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Deployment preset
    pub deployment: Deployment,
    /// Serial endpoint
    pub serial: SerialConfig,
    /// Output files
    pub files: FilesConfig,
    /// Protocol settings
    pub protocol: ProtocolConfig,
    /// Diagnostic logging
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load from `path`, or from the platform config file when `None`.
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => super::config_file().ok_or(ConfigError::NoConfigDir)?,
        };

        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(&path).map_err(|source| ConfigError::Io { path, source })?;
        Ok(toml::from_str(&content)?)
    }

    /// Save to `path`, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(io_err)
    }

    /// Markers from the protocol section
    pub fn markers(&self) -> Markers {
        Markers {
            ready: self.protocol.ready_marker.clone(),
            complete: self.protocol.complete_marker.clone(),
            telemetry_prefix: self.protocol.telemetry_prefix.clone(),
        }
    }

    /// Session settings: the deployment preset with protocol overrides applied
    pub fn session_config(&self) -> SessionConfig {
        let protocol = &self.protocol;
        SessionConfig {
            mode: protocol.mode.unwrap_or_else(|| self.deployment.mode()),
            layout: protocol.layout.unwrap_or_else(|| self.deployment.layout()),
            markers: self.markers(),
            max_pending: (protocol.max_pending > 0).then_some(protocol.max_pending),
            settle: Duration::from_millis(protocol.settle_ms),
            auto_start: protocol
                .start_delay_ms
                .map(Duration::from_millis)
                .or_else(|| self.deployment.auto_start()),
            pre_ready: protocol.pre_ready,
            malformed: protocol.malformed,
        }
    }
}
