//! Error types for the intellicat binary.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised before the control loop starts.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Config file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    #[error("Config file already exists: {} (use --force to overwrite)", .0.display())]
    ConfigExists(PathBuf),

    #[error("Invalid {field}: {message}")]
    InvalidSetting { field: &'static str, message: String },

    #[error("Node configuration error: {0}")]
    Node(#[from] intellicat_core::error::ConfigError),
}

impl AppError {
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidSetting {
            field,
            message: message.into(),
        }
    }
}
