use thiserror::Error;

#[derive(Error, Debug)]
pub enum TerminalError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serial port error: {0}")]
    SerialError(#[from] serialport::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Ticket {0} already has a pending request")]
    DuplicateTicket(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Terminal session is closed")]
    SessionClosed,
}

pub type Result<T> = std::result::Result<T, TerminalError>;
