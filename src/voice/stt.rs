//! Speech-to-text (STT) processing

use async_trait::async_trait;

use super::capture::AudioClip;
use crate::config::{SttConfig, SttProvider};
use crate::{Error, Result};

/// Groq's OpenAI-compatible API base
pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// `OpenAI` API base
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Deepgram API base
pub const DEEPGRAM_BASE_URL: &str = "https://api.deepgram.com/v1";

/// Transcription collaborator
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe a clip to text
    ///
    /// Fails with [`Error::EmptyAudio`] when the clip holds no recognizable
    /// speech.
    async fn transcribe(&self, clip: &AudioClip) -> Result<String>;
}

/// Build the transcriber selected by `config`
///
/// # Errors
///
/// Returns error if the provider's API key is missing
pub fn from_config(
    config: &SttConfig,
    groq_key: Option<&str>,
    openai_key: Option<&str>,
    deepgram_key: Option<&str>,
) -> Result<Box<dyn Transcriber>> {
    let key = |k: Option<&str>| k.unwrap_or_default().to_string();

    Ok(match config.provider {
        SttProvider::Groq => Box::new(Whisper::new(key(groq_key), GROQ_BASE_URL, config)?),
        SttProvider::OpenAI => Box::new(Whisper::new(key(openai_key), OPENAI_BASE_URL, config)?),
        SttProvider::Deepgram => Box::new(Deepgram::new(key(deepgram_key), config)?),
    })
}

/// Response from Whisper-style transcription APIs
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Response from Deepgram transcription API
#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// Trim a provider transcript, rejecting silence
fn non_empty(transcript: &str) -> Result<String> {
    let trimmed = transcript.trim();
    if trimmed.is_empty() {
        tracing::debug!("transcription returned no text");
        return Err(Error::EmptyAudio);
    }
    Ok(trimmed.to_string())
}

/// Whisper transcription over an OpenAI-compatible endpoint (Groq or `OpenAI`)
pub struct Whisper {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    language: Option<String>,
}

impl Whisper {
    /// Create a new Whisper transcriber
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: String, base_url: &str, config: &SttConfig) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(format!(
                "API key required for Whisper at {base_url}"
            )));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            language: config.language.clone(),
        })
    }

    fn form(&self, clip: &AudioClip) -> Result<reqwest::multipart::Form> {
        let part = reqwest::multipart::Part::bytes(clip.bytes.to_vec())
            .file_name(clip.file_name())
            .mime_str(&clip.mime)
            .map_err(|e| Error::Stt(e.to_string()))?;

        let mut form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }
        Ok(form)
    }
}

#[async_trait]
impl Transcriber for Whisper {
    async fn transcribe(&self, clip: &AudioClip) -> Result<String> {
        tracing::debug!(
            audio_bytes = clip.bytes.len(),
            mime = %clip.mime,
            "starting Whisper transcription"
        );

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(self.form(clip)?)
            .send()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Whisper request failed"))?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response
            .json()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "failed to parse response"))?;

        let transcript = non_empty(&result.text)?;
        tracing::info!(transcript = %transcript, "transcription complete");
        Ok(transcript)
    }
}

/// Deepgram prerecorded transcription
pub struct Deepgram {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    language: Option<String>,
}

impl Deepgram {
    /// Create a new Deepgram transcriber
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: String, config: &SttConfig) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("Deepgram API key required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: DEEPGRAM_BASE_URL.to_string(),
            model: config.model.clone(),
            language: config.language.clone(),
        })
    }

    fn url(&self) -> String {
        let mut url = format!(
            "{}/listen?model={}&punctuate=true",
            self.base_url,
            urlencoding::encode(&self.model)
        );
        if let Some(language) = &self.language {
            url.push_str("&language=");
            url.push_str(&urlencoding::encode(language));
        }
        url
    }
}

#[async_trait]
impl Transcriber for Deepgram {
    async fn transcribe(&self, clip: &AudioClip) -> Result<String> {
        tracing::debug!(audio_bytes = clip.bytes.len(), "starting Deepgram transcription");

        let response = self
            .client
            .post(self.url())
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", clip.mime.as_str())
            .body(clip.bytes.clone())
            .send()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Deepgram request failed"))?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Deepgram API error");
            return Err(Error::Stt(format!("Deepgram API error {status}: {body}")));
        }

        let result: DeepgramResponse = response
            .json()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "failed to parse Deepgram response"))?;

        let transcript = result
            .results
            .channels
            .first()
            .and_then(|c| c.alternatives.first())
            .map(|a| a.transcript.as_str())
            .unwrap_or_default();

        let transcript = non_empty(transcript)?;
        tracing::info!(transcript = %transcript, "transcription complete");
        Ok(transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: SttProvider, language: Option<&str>) -> SttConfig {
        SttConfig {
            provider,
            model: "nova-2".to_string(),
            language: language.map(str::to_string),
        }
    }

    #[test]
    fn test_blank_transcript_is_empty_audio() {
        assert!(matches!(non_empty("  \n"), Err(Error::EmptyAudio)));
        assert_eq!(non_empty(" hello ").unwrap(), "hello");
    }

    #[test]
    fn test_missing_key_rejected() {
        let cfg = config(SttProvider::Groq, None);
        assert!(matches!(
            from_config(&cfg, None, Some("openai"), None),
            Err(Error::Config(_))
        ));
        assert!(from_config(&cfg, Some("groq"), None, None).is_ok());
    }

    #[test]
    fn test_deepgram_url_includes_language() {
        let dg = Deepgram::new("key".to_string(), &config(SttProvider::Deepgram, Some("en-US")))
            .unwrap();
        assert_eq!(
            dg.url(),
            "https://api.deepgram.com/v1/listen?model=nova-2&punctuate=true&language=en-US"
        );
    }
}
