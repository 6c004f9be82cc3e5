//! Unified error types for hdmicap

use thiserror::Error;

/// Main error type for hdmicap operations
#[derive(Error, Debug)]
pub enum HdmicapError {
    /// Device lacks a required capability (capture or streaming)
    #[error("Device '{path}' unsupported: {reason}")]
    DeviceUnsupported { path: String, reason: String },

    /// Fatal I/O failure during configuration or streaming
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Audio backend could not be reached or refused the stream
    #[error("Audio start failed: {0}")]
    AudioStart(String),

    /// Worker thread failed to report startup status
    #[error("Startup handshake failed: {0}")]
    Startup(String),
}

/// Result type alias for hdmicap operations
pub type Result<T> = std::result::Result<T, HdmicapError>;

impl HdmicapError {
    /// Create an unsupported-device error with context
    pub fn unsupported(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DeviceUnsupported {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
