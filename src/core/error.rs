use std::path::PathBuf;
use thiserror::Error;

/// Custom error types for borgpilot
#[derive(Error, Debug)]
pub enum PilotError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Another invocation holds the lock file
    #[error("Another borgpilot run is in progress (pid {pid}, lock {path:?})")]
    AlreadyRunning { pid: u32, path: PathBuf },

    /// Environment validation errors
    #[error("Validation failed: {0}")]
    ValidationError(String),

    /// External command execution errors
    #[error("Command execution failed: {0}")]
    CommandError(String),
}
