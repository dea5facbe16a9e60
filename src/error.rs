//! Error types and exit codes for stream-engine

use std::process::ExitCode;
use thiserror::Error;

/// Main error type for stream-engine operations
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Transport closed for client {client_id}")]
    TransportClosed { client_id: String },

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Compression failed: {0}")]
    Compression(#[source] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid client message: {message}")]
    InvalidMessage { message: String },

    #[error("Invalid event: {message}")]
    InvalidEvent { message: String },

    #[error("Streaming service is already running")]
    AlreadyRunning,

    #[error("Streaming service is not running")]
    NotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamError {
    /// Convert error to a daemon exit code:
    /// - 1: IO / socket failure
    /// - 2: Configuration error
    /// - 3: Lifecycle misuse (start/stop)
    /// - 4: Anything raised while streaming
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Io(_) | Self::WebSocket(_) => ExitCode::from(1),
            Self::Config { .. } => ExitCode::from(2),
            Self::AlreadyRunning | Self::NotRunning => ExitCode::from(3),
            Self::TransportClosed { .. }
            | Self::Serialization(_)
            | Self::Compression(_)
            | Self::InvalidMessage { .. }
            | Self::InvalidEvent { .. } => ExitCode::from(4),
        }
    }
}

/// Result type alias for stream-engine operations
pub type Result<T> = std::result::Result<T, StreamError>;
