//! Voice cloning from a short audio sample

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::capture::AudioClip;
use super::tts::CARTESIA_BASE_URL;
use crate::{Error, Result};

/// `Cartesia-Version` used by the voice endpoints
const CLONE_API_VERSION: &str = "2024-06-10";

/// Voice cloning collaborator
#[async_trait]
pub trait VoiceCloner: Send + Sync {
    /// Create a new voice from `sample`, returning its id
    async fn clone_voice(&self, sample: &AudioClip) -> Result<String>;
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct CreateVoiceRequest<'a> {
    name: String,
    description: &'static str,
    embedding: &'a [f32],
}

#[derive(Deserialize)]
struct CreateVoiceResponse {
    id: String,
}

/// Clones voices through Cartesia: sample -> embedding -> stored voice
pub struct CartesiaCloner {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl CartesiaCloner {
    /// Create a new cloner
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "Cartesia API key required for voice cloning".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: CARTESIA_BASE_URL.to_string(),
        })
    }

    /// Point at a different API host
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn check(response: reqwest::Response, step: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        tracing::error!(status = %status, body = %body, step, "Cartesia voice API error");
        Err(Error::Clone(format!("{step} failed with {status}: {body}")))
    }

    async fn embed(&self, sample: &AudioClip) -> Result<Vec<f32>> {
        let part = reqwest::multipart::Part::bytes(sample.bytes.to_vec())
            .file_name(sample.file_name())
            .mime_str(&sample.mime)
            .map_err(|e| Error::Clone(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("clip", part);

        let response = self
            .client
            .post(format!("{}/voices/clone/clip", self.base_url))
            .header("Cartesia-Version", CLONE_API_VERSION)
            .header("X-API-Key", &self.api_key)
            .multipart(form)
            .send()
            .await?;

        let result: EmbeddingResponse = Self::check(response, "embedding").await?.json().await?;
        Ok(result.embedding)
    }

    async fn create(&self, embedding: &[f32]) -> Result<String> {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();

        let request = CreateVoiceRequest {
            name: format!("Cloned Voice {millis}"),
            description: "A voice cloned from an audio sample.",
            embedding,
        };

        let response = self
            .client
            .post(format!("{}/voices", self.base_url))
            .header("Cartesia-Version", CLONE_API_VERSION)
            .header("X-API-Key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let result: CreateVoiceResponse = Self::check(response, "create voice")
            .await?
            .json()
            .await?;
        Ok(result.id)
    }
}

#[async_trait]
impl VoiceCloner for CartesiaCloner {
    async fn clone_voice(&self, sample: &AudioClip) -> Result<String> {
        if sample.is_empty() {
            return Err(Error::InvalidRequest("voice sample is empty".to_string()));
        }

        tracing::debug!(bytes = sample.bytes.len(), "cloning voice");
        let embedding = self.embed(sample).await?;
        let voice_id = self.create(&embedding).await?;

        tracing::info!(voice_id = %voice_id, "voice cloned");
        Ok(voice_id)
    }
}
