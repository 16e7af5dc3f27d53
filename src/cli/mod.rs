//! CLI Module
//!
//! Provides command-line interface functionality including:
//! - Exit codes for automation
//! - Operator input from stdin
//! - Text/JSON output selection

pub mod exit_codes;
pub mod operator;

pub use exit_codes::{exit_code_description, print_exit_codes, CliResult, ExitCodes};
pub use operator::{stdin_is_terminal, StdinIntents, PROMPT};

use serde::Serialize;

/// Output format for reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// Pretty-printed JSON
    Json,
}

/// Render a value as pretty JSON
pub fn to_json<T: Serialize>(value: &T) -> serde_json::Result<String> {
    serde_json::to_string_pretty(value)
}
