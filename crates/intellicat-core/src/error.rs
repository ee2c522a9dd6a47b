//! Error types for intellicat-core.

use thiserror::Error;

pub use crate::command::CommandParseError;
pub use crate::config::ConfigError;
pub use crate::link::LinkError;
pub use crate::motion::{ActuatorError, SpeedError};
pub use crate::vision::VisionError;

/// Result type alias using intellicat-core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for node operations
#[derive(Error, Debug)]
pub enum Error {
    // Startup errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    // Collaborator errors
    #[error("Actuator error: {0}")]
    Actuator(#[from] ActuatorError),

    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("Vision error: {0}")]
    Vision(#[from] VisionError),

    // Operator input errors
    #[error("Command error: {0}")]
    Command(#[from] CommandParseError),

    #[error("Speed error: {0}")]
    Speed(#[from] SpeedError),

    // Generic errors
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the error belongs to an external collaborator (actuator, link, detector).
    ///
    /// Collaborator errors are recovered inside the control loop; everything else is
    /// either an operator mistake or a startup problem.
    pub fn is_collaborator_failure(&self) -> bool {
        matches!(self, Error::Actuator(_) | Error::Link(_) | Error::Vision(_))
    }
}
