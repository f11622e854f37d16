//! Error types for the voice call engine

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the voice call engine
///
/// Variants map onto the failure taxonomy the session enforces: device,
/// transport and remote-reported errors are fatal and always end the
/// session through the teardown path; protocol and playback errors are
/// per-item and never stop a pipeline.
#[derive(Error, Debug)]
pub enum Error {
    /// Microphone or renderer acquisition failed. Surfaced distinctly so
    /// callers can tell a denied permission from a dead connection.
    #[error("Audio device error: {0}")]
    Device(String),

    /// Transport-level failure: refused, reset, or handshake timeout.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed or unexpected wire message. Logged and skipped.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A single inbound chunk failed to decode. Dropped, playback continues.
    #[error("Playback decode error: {0}")]
    Playback(String),

    /// Error reported by the remote agent, forwarded verbatim.
    #[error("Remote error: {0}")]
    Remote(String),

    /// Invalid configuration, detected before any connection attempt.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error class ends the session.
    ///
    /// Fatal classes go through the same idempotent teardown as an
    /// explicit disconnect; non-fatal classes are handled per-message.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Device(_) | Error::Transport(_) | Error::Remote(_) | Error::Config(_)
        )
    }

    /// Create a generic error from a string
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Error::Other(msg.into())
    }

    /// Create a config error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::Device("mic denied".into()).is_fatal());
        assert!(Error::Transport("refused".into()).is_fatal());
        assert!(Error::Remote("quota exceeded".into()).is_fatal());
        assert!(!Error::Protocol("unknown field".into()).is_fatal());
        assert!(!Error::Playback("odd byte length".into()).is_fatal());
    }
}
