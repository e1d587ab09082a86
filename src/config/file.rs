//! TOML configuration file loading
//!
//! Supports `~/.config/swift/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct SwiftConfigFile {
    /// Server/runtime configuration
    #[serde(default)]
    pub server: ServerFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,

    /// Transcription configuration
    #[serde(default)]
    pub stt: SttFileConfig,

    /// Response generation configuration
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Speech synthesis configuration
    #[serde(default)]
    pub tts: TtsFileConfig,

    /// Streaming relay configuration
    #[serde(default)]
    pub relay: RelayFileConfig,

    /// CLI client configuration
    #[serde(default)]
    pub client: ClientFileConfig,
}

/// Server/runtime configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// API server port
    pub port: Option<u16>,

    /// Directory holding a static web UI
    pub static_dir: Option<String>,

    /// Requests per minute before answering 429 (0 disables)
    pub rate_limit: Option<u32>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub groq: Option<String>,
    pub openai: Option<String>,
    pub deepgram: Option<String>,
    pub cartesia: Option<String>,
}

/// Transcription configuration
#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    /// "groq", "openai" or "deepgram"
    pub provider: Option<String>,

    /// Model identifier (e.g. "whisper-large-v3")
    pub model: Option<String>,

    /// Spoken language hint (ISO-639-1)
    pub language: Option<String>,
}

/// Response generation configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// OpenAI-compatible base URL
    pub base_url: Option<String>,

    /// Model identifier (e.g. "llama3-8b-8192")
    pub model: Option<String>,

    pub temperature: Option<f32>,

    pub max_tokens: Option<u32>,

    /// System prompt prepended to every conversation
    pub system_prompt: Option<String>,
}

/// Speech synthesis configuration
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    /// Model identifier (e.g. "sonic-english")
    pub model: Option<String>,

    /// Voice identifier
    pub voice: Option<String>,

    /// Output sample rate in Hz
    pub sample_rate: Option<u32>,

    /// Provider API version header
    pub api_version: Option<String>,
}

/// Streaming relay configuration
#[derive(Debug, Default, Deserialize)]
pub struct RelayFileConfig {
    /// Flush once the buffer holds this many characters
    pub min_chars: Option<usize>,

    /// Characters that force a flush
    pub terminators: Option<String>,
}

/// CLI client configuration
#[derive(Debug, Default, Deserialize)]
pub struct ClientFileConfig {
    /// Base URL of a running `swift serve`
    pub server_url: Option<String>,

    /// Minimum press-to-talk hold in milliseconds
    pub min_hold_ms: Option<u64>,
}

/// Load the TOML config file from the standard path
///
/// Returns `SwiftConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> SwiftConfigFile {
    config_file_path().map_or_else(SwiftConfigFile::default, |path| load_from(&path))
}

/// Load a TOML config file from an explicit path
///
/// Missing or malformed files fall back to defaults.
pub fn load_from(path: &Path) -> SwiftConfigFile {
    if !path.exists() {
        return SwiftConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                SwiftConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            SwiftConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/swift/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("swift").join("config.toml"))
}
