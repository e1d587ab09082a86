//! Configuration management for the Swift voice assistant

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use crate::relay::FlushPolicy;
use crate::{Error, Result};

use file::SwiftConfigFile;

/// Default system prompt for the assistant persona
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a voice assistant named Swift who is helping a user. Respond briefly to the user's requests.";

/// Swift configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP API server configuration
    pub server: ServerConfig,

    /// API keys
    pub api_keys: ApiKeys,

    /// Transcription configuration
    pub stt: SttConfig,

    /// Response generation configuration
    pub llm: LlmConfig,

    /// Speech synthesis configuration
    pub tts: TtsConfig,

    /// Streaming relay flush policy
    pub relay: FlushPolicy,

    /// CLI client configuration
    pub client: ClientConfig,
}

/// HTTP API server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Path to static files directory (web UI)
    pub static_dir: Option<PathBuf>,

    /// Requests per minute; `None` disables rate limiting
    pub rate_limit: Option<u32>,
}

/// API keys for external services
#[derive(Clone, Default)]
pub struct ApiKeys {
    /// `Groq` API key (Whisper and chat completions)
    pub groq: Option<String>,

    /// `OpenAI` API key (alternate Whisper and chat completions)
    pub openai: Option<String>,

    /// `Deepgram` API key (optional STT)
    pub deepgram: Option<String>,

    /// `Cartesia` API key (TTS and voice cloning)
    pub cartesia: Option<String>,
}

impl std::fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |k: &Option<String>| k.as_ref().map(|_| "<redacted>");
        f.debug_struct("ApiKeys")
            .field("groq", &redact(&self.groq))
            .field("openai", &redact(&self.openai))
            .field("deepgram", &redact(&self.deepgram))
            .field("cartesia", &redact(&self.cartesia))
            .finish()
    }
}

/// Transcription provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SttProvider {
    Groq,
    OpenAI,
    Deepgram,
}

impl SttProvider {
    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "groq" => Some(Self::Groq),
            "openai" | "whisper" => Some(Self::OpenAI),
            "deepgram" => Some(Self::Deepgram),
            _ => None,
        }
    }
}

/// Transcription configuration
#[derive(Debug, Clone)]
pub struct SttConfig {
    pub provider: SttProvider,

    /// Model identifier (e.g. "whisper-large-v3", "nova-2")
    pub model: String,

    /// Spoken language hint
    pub language: Option<String>,
}

/// Response generation configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// OpenAI-compatible base URL (no trailing slash)
    pub base_url: String,

    pub model: String,

    pub temperature: f32,

    pub max_tokens: u32,

    pub system_prompt: String,
}

/// Speech synthesis configuration
#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// Model identifier (e.g. "sonic-english")
    pub model: String,

    /// Voice identifier
    pub voice: String,

    /// Raw PCM output sample rate
    pub sample_rate: u32,

    /// `Cartesia-Version` header value
    pub api_version: String,
}

/// CLI client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the orchestration server
    pub server_url: String,

    /// Minimum press-to-talk hold before a clip is submitted
    pub min_hold: Duration,
}

impl Config {
    /// Load configuration (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if an environment override is malformed
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if an override cannot be parsed
    pub fn from_sources<F>(fc: SwiftConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let server = ServerConfig {
            port: parse_env(&env, "SWIFT_PORT")?
                .or(fc.server.port)
                .unwrap_or(3000),
            static_dir: env("SWIFT_STATIC_DIR")
                .or(fc.server.static_dir)
                .map(PathBuf::from),
            rate_limit: parse_env(&env, "SWIFT_RATE_LIMIT")?
                .or(fc.server.rate_limit)
                .filter(|rpm| *rpm > 0),
        };

        let api_keys = ApiKeys {
            groq: env("GROQ_API_KEY").or(fc.api_keys.groq),
            openai: env("OPENAI_API_KEY").or(fc.api_keys.openai),
            deepgram: env("DEEPGRAM_API_KEY").or(fc.api_keys.deepgram),
            cartesia: env("CARTESIA_API_KEY").or(fc.api_keys.cartesia),
        };

        let provider = match env("SWIFT_STT_PROVIDER").or(fc.stt.provider) {
            Some(name) => SttProvider::parse(&name)
                .ok_or_else(|| Error::Config(format!("unknown STT provider: {name}")))?,
            None => SttProvider::Groq,
        };
        let default_stt_model = match provider {
            SttProvider::Groq => "whisper-large-v3",
            SttProvider::OpenAI => "whisper-1",
            SttProvider::Deepgram => "nova-2",
        };
        let stt = SttConfig {
            provider,
            model: env("SWIFT_STT_MODEL")
                .or(fc.stt.model)
                .unwrap_or_else(|| default_stt_model.to_string()),
            language: env("SWIFT_STT_LANGUAGE").or(fc.stt.language),
        };

        let llm = LlmConfig {
            base_url: env("SWIFT_LLM_BASE_URL")
                .or(fc.llm.base_url)
                .unwrap_or_else(|| "https://api.groq.com/openai/v1".to_string())
                .trim_end_matches('/')
                .to_string(),
            model: env("SWIFT_LLM_MODEL")
                .or(fc.llm.model)
                .unwrap_or_else(|| "llama3-8b-8192".to_string()),
            temperature: fc.llm.temperature.unwrap_or(0.5),
            max_tokens: fc.llm.max_tokens.unwrap_or(1024),
            system_prompt: fc
                .llm
                .system_prompt
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        };

        let tts = TtsConfig {
            model: env("SWIFT_TTS_MODEL")
                .or(fc.tts.model)
                .unwrap_or_else(|| "sonic-english".to_string()),
            voice: env("SWIFT_TTS_VOICE")
                .or(fc.tts.voice)
                .unwrap_or_else(|| "79a125e8-cd45-4c13-8a67-188112f4dd22".to_string()),
            sample_rate: parse_env(&env, "SWIFT_TTS_SAMPLE_RATE")?
                .or(fc.tts.sample_rate)
                .unwrap_or(24_000),
            api_version: fc
                .tts
                .api_version
                .unwrap_or_else(|| "2024-06-30".to_string()),
        };
        if tts.sample_rate == 0 {
            return Err(Error::Config("TTS sample rate must be non-zero".to_string()));
        }

        let default_policy = FlushPolicy::default();
        let relay = FlushPolicy {
            min_chars: parse_env(&env, "SWIFT_RELAY_MIN_CHARS")?
                .or(fc.relay.min_chars)
                .unwrap_or(default_policy.min_chars),
            terminators: fc
                .relay
                .terminators
                .map_or(default_policy.terminators, |t| t.chars().collect()),
        };

        let client = ClientConfig {
            server_url: env("SWIFT_SERVER_URL")
                .or(fc.client.server_url)
                .unwrap_or_else(|| format!("http://localhost:{}", server.port))
                .trim_end_matches('/')
                .to_string(),
            min_hold: Duration::from_millis(fc.client.min_hold_ms.unwrap_or(500)),
        };

        Ok(Self {
            server,
            api_keys,
            stt,
            llm,
            tts,
            relay,
            client,
        })
    }

    /// API key for the configured chat completion endpoint
    ///
    /// Groq is preferred when the base URL points at it, `OpenAI` otherwise.
    #[must_use]
    pub fn llm_api_key(&self) -> Option<&str> {
        if self.llm.base_url.contains("groq.com") {
            self.api_keys.groq.as_deref()
        } else {
            self.api_keys
                .openai
                .as_deref()
                .or(self.api_keys.groq.as_deref())
        }
    }
}

/// Parse an optional environment override
fn parse_env<T, F>(env: &F, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    env(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| Error::Config(format!("invalid value for {key}: {raw}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_sources(SwiftConfigFile::default(), env_from(&[])).unwrap();

        assert_eq!(config.server.port, 3000);
        assert!(config.server.rate_limit.is_none());
        assert_eq!(config.stt.provider, SttProvider::Groq);
        assert_eq!(config.stt.model, "whisper-large-v3");
        assert_eq!(config.llm.model, "llama3-8b-8192");
        assert_eq!(config.tts.sample_rate, 24_000);
        assert_eq!(config.relay.min_chars, 20);
        assert_eq!(config.relay.terminators, vec!['.']);
        assert_eq!(config.client.min_hold, Duration::from_millis(500));
        assert_eq!(config.client.server_url, "http://localhost:3000");
    }

    #[test]
    fn test_env_overrides_file() {
        let mut fc = SwiftConfigFile::default();
        fc.server.port = Some(4000);
        fc.tts.voice = Some("file-voice".to_string());

        let config = Config::from_sources(
            fc,
            env_from(&[("SWIFT_PORT", "5000"), ("SWIFT_STT_PROVIDER", "deepgram")]),
        )
        .unwrap();

        assert_eq!(config.server.port, 5000);
        assert_eq!(config.tts.voice, "file-voice");
        assert_eq!(config.stt.provider, SttProvider::Deepgram);
        assert_eq!(config.stt.model, "nova-2");
    }

    #[test]
    fn test_invalid_override_rejected() {
        let result = Config::from_sources(
            SwiftConfigFile::default(),
            env_from(&[("SWIFT_PORT", "not-a-port")]),
        );
        assert!(matches!(result, Err(Error::Config(_))));

        let result = Config::from_sources(
            SwiftConfigFile::default(),
            env_from(&[("SWIFT_STT_PROVIDER", "carrier-pigeon")]),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_rate_limit_disables() {
        let config = Config::from_sources(
            SwiftConfigFile::default(),
            env_from(&[("SWIFT_RATE_LIMIT", "0")]),
        )
        .unwrap();
        assert!(config.server.rate_limit.is_none());
    }

    #[test]
    fn test_api_keys_redacted_in_debug() {
        let config = Config::from_sources(
            SwiftConfigFile::default(),
            env_from(&[("CARTESIA_API_KEY", "sk-secret")]),
        )
        .unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("<redacted>"));
    }
}
