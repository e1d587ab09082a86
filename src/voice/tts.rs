//! Text-to-speech (TTS) processing
//!
//! Output is always raw mono `pcm_f32le` at the configured sample rate so the
//! playback engine can consume it without a decoder.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Serialize;

use crate::config::TtsConfig;
use crate::{Error, Result};

/// Default Cartesia API base URL
pub const CARTESIA_BASE_URL: &str = "https://api.cartesia.ai";

/// Stream of raw audio bytes as they arrive from a provider
pub type AudioByteStream = BoxStream<'static, Result<Bytes>>;

/// One incremental synthesis call within a synthesis context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRequest<'a> {
    /// Context scoping all calls of one utterance
    pub context_id: &'a str,
    /// Text to speak; empty on the closing call
    pub transcript: &'a str,
    /// Whether more calls will follow for this context
    pub continues: bool,
}

impl<'a> ChunkRequest<'a> {
    /// A content-bearing call with more to follow
    #[must_use]
    pub const fn content(context_id: &'a str, transcript: &'a str) -> Self {
        Self {
            context_id,
            transcript,
            continues: true,
        }
    }

    /// The closing call: no transcript, no continuation
    #[must_use]
    pub const fn close(context_id: &'a str) -> Self {
        Self {
            context_id,
            transcript: "",
            continues: false,
        }
    }

    #[must_use]
    pub const fn is_close(&self) -> bool {
        !self.continues && self.transcript.is_empty()
    }
}

/// Speech synthesis collaborator
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize a whole reply, streaming the audio body as it arrives
    async fn synthesize(&self, text: &str) -> Result<AudioByteStream>;

    /// Synthesize one incremental piece of an utterance
    async fn synthesize_chunk(&self, request: &ChunkRequest<'_>) -> Result<Bytes>;

    /// Sample rate of the PCM this synthesizer produces
    fn sample_rate(&self) -> u32;
}

#[derive(Serialize)]
struct VoiceSpec<'a> {
    mode: &'static str,
    id: &'a str,
}

#[derive(Serialize)]
struct OutputFormat {
    container: &'static str,
    encoding: &'static str,
    sample_rate: u32,
}

#[derive(Serialize)]
struct CartesiaRequest<'a> {
    model_id: &'a str,
    transcript: &'a str,
    voice: VoiceSpec<'a>,
    output_format: OutputFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    context_id: Option<&'a str>,
    #[serde(rename = "continue", skip_serializing_if = "Option::is_none")]
    continues: Option<bool>,
}

/// Synthesizes speech with the Cartesia `tts/bytes` endpoint
pub struct CartesiaTts {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    voice: String,
    sample_rate: u32,
    api_version: String,
}

impl CartesiaTts {
    /// Create a new Cartesia TTS instance
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: String, config: &TtsConfig) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("Cartesia API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: CARTESIA_BASE_URL.to_string(),
            model: config.model.clone(),
            voice: config.voice.clone(),
            sample_rate: config.sample_rate,
            api_version: config.api_version.clone(),
        })
    }

    /// Point at a different API host
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn request_body<'a>(
        &'a self,
        transcript: &'a str,
        context: Option<&ChunkRequest<'a>>,
    ) -> CartesiaRequest<'a> {
        CartesiaRequest {
            model_id: &self.model,
            transcript,
            voice: VoiceSpec {
                mode: "id",
                id: &self.voice,
            },
            output_format: OutputFormat {
                container: "raw",
                encoding: "pcm_f32le",
                sample_rate: self.sample_rate,
            },
            context_id: context.map(|c| c.context_id),
            continues: context.map(|c| c.continues),
        }
    }

    async fn post(&self, body: &CartesiaRequest<'_>) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/tts/bytes", self.base_url))
            .header("Cartesia-Version", &self.api_version)
            .header("X-API-Key", &self.api_key)
            .json(body)
            .send()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Cartesia request failed"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Cartesia API error");
            return Err(Error::Tts(format!("Cartesia TTS error {status}: {body}")));
        }

        Ok(response)
    }
}

#[async_trait]
impl Synthesizer for CartesiaTts {
    async fn synthesize(&self, text: &str) -> Result<AudioByteStream> {
        tracing::debug!(chars = text.len(), "starting Cartesia synthesis");

        let response = self.post(&self.request_body(text, None)).await?;
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(Error::from))
            .boxed())
    }

    async fn synthesize_chunk(&self, request: &ChunkRequest<'_>) -> Result<Bytes> {
        tracing::debug!(
            context_id = request.context_id,
            chars = request.transcript.len(),
            continues = request.continues,
            "synthesizing chunk"
        );

        let body = self.request_body(request.transcript, Some(request));
        let response = self.post(&body).await?;
        let audio = response.bytes().await?;

        tracing::trace!(bytes = audio.len(), "chunk synthesized");
        Ok(audio)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TtsConfig {
        TtsConfig {
            model: "sonic-english".to_string(),
            voice: "voice-1".to_string(),
            sample_rate: 24_000,
            api_version: "2024-06-30".to_string(),
        }
    }

    #[test]
    fn test_requires_api_key() {
        assert!(matches!(
            CartesiaTts::new(String::new(), &config()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_whole_text_body() {
        let tts = CartesiaTts::new("key".to_string(), &config()).unwrap();
        let json = serde_json::to_value(tts.request_body("hello", None)).unwrap();

        assert_eq!(json["model_id"], "sonic-english");
        assert_eq!(json["transcript"], "hello");
        assert_eq!(json["voice"]["id"], "voice-1");
        assert_eq!(json["output_format"]["encoding"], "pcm_f32le");
        assert_eq!(json["output_format"]["sample_rate"], 24_000);
        assert!(json.get("context_id").is_none());
        assert!(json.get("continue").is_none());
    }

    #[test]
    fn test_chunk_body_carries_context() {
        let tts = CartesiaTts::new("key".to_string(), &config()).unwrap();

        let request = ChunkRequest::content("ctx-1", "Hello there.");
        let json = serde_json::to_value(tts.request_body(request.transcript, Some(&request)))
            .unwrap();
        assert_eq!(json["context_id"], "ctx-1");
        assert_eq!(json["continue"], true);

        let close = ChunkRequest::close("ctx-1");
        assert!(close.is_close());
        let json =
            serde_json::to_value(tts.request_body(close.transcript, Some(&close))).unwrap();
        assert_eq!(json["transcript"], "");
        assert_eq!(json["continue"], false);
    }
}
