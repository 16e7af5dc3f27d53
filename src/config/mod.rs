//! Configuration module
//!
//! Handles application settings and deployment presets

mod settings;

pub use settings::{
    AppConfig, ConfigError, Deployment, FilesConfig, LoggingConfig, ProtocolConfig,
};

use directories::ProjectDirs;
use std::path::PathBuf;

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "thrustlog", "Thrustlog").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Default location of the configuration file
pub fn config_file() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}
