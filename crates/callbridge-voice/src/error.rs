//! Error types for the Callbridge voice session

use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors that can occur while running a call session.
///
/// Only `Transport` and `InvalidSession` end a call; everything else is local to one turn.
#[derive(Error, Debug)]
pub enum VoiceError {
    /// Media connection dropped or refused a write.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Recognizer rejected our credentials; the call continues without STT.
    #[error("Transcription unavailable: {0}")]
    TranscriptionUnavailable(String),

    #[error("Synthesis failure: {0}")]
    Synthesis(String),

    /// Unknown or missing agent id for the connection.
    #[error("Invalid session: {0}")]
    InvalidSession(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("Agent lookup failed: {0}")]
    Core(#[from] callbridge_core::CoreError),
}

impl From<base64::DecodeError> for VoiceError {
    fn from(err: base64::DecodeError) -> Self {
        VoiceError::Codec(err.to_string())
    }
}

impl From<reqwest::Error> for VoiceError {
    fn from(err: reqwest::Error) -> Self {
        VoiceError::Synthesis(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for VoiceError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        VoiceError::Synthesis(err.to_string())
    }
}
