use thiserror::Error;

/// Monitor error types
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Sensor hardware error: {0}")]
    Hardware(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Malformed message: {0}")]
    Decode(String),

    #[error("Task not running: {0}")]
    NotRunning(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for monitor operations
pub type Result<T> = std::result::Result<T, MonitorError>;
