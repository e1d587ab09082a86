//! Error types for the Swift voice assistant

use thiserror::Error;

/// Result type alias for Swift operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice assistant
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Transcription produced no text (silence or unusable audio)
    #[error("no speech detected in audio")]
    EmptyAudio,

    /// Response generation error
    #[error("LLM error: {0}")]
    Llm(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Streaming relay error
    #[error("relay error: {0}")]
    Relay(String),

    /// Playback engine error
    #[error("playback error: {0}")]
    Playback(String),

    /// Voice cloning error
    #[error("voice clone error: {0}")]
    Clone(String),

    /// Request rejected before reaching any provider
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Server is rate limiting requests
    #[error("too many requests, please try again later")]
    RateLimited,

    /// Server returned a failure response
    #[error("api error {status}: {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Human readable message from the server
        message: String,
    },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
