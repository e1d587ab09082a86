//! HTTP client for the assistant server

mod session;

pub use session::{TurnOutcome, VoiceSession};

use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use crate::api::assistant::{
    CONTEXT_ID_HEADER, RESPONSE_HEADER, SAMPLE_RATE_HEADER, TRANSCRIPT_HEADER,
};
use crate::api::health::Capabilities;
use crate::conversation::{ConversationHistory, TurnInput};
use crate::voice::{AudioByteStream, AudioClip};
use crate::{Error, Result};

/// Server reply to one turn; `audio` is still streaming
pub struct TurnResponse {
    pub transcript: String,
    /// Reply text; only known for non-streamed turns
    pub response: Option<String>,
    /// Synthesis context; only present for streamed turns
    pub context_id: Option<String>,
    /// Sample rate the server synthesized at
    pub sample_rate: Option<u32>,
    pub audio: AudioByteStream,
}

impl std::fmt::Debug for TurnResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnResponse")
            .field("transcript", &self.transcript)
            .field("response", &self.response)
            .field("context_id", &self.context_id)
            .field("sample_rate", &self.sample_rate)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloneVoiceResponse {
    voice_id: String,
}

/// Talks to the orchestration server
#[derive(Debug, Clone)]
pub struct AssistantClient {
    client: reqwest::Client,
    base_url: String,
}

impl AssistantClient {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Submit one turn
    ///
    /// # Errors
    ///
    /// Returns [`Error::RateLimited`] on 429, [`Error::Api`] for any other
    /// failure status, or a transport error.
    pub async fn submit(
        &self,
        input: TurnInput,
        history: &ConversationHistory,
        streaming: bool,
    ) -> Result<TurnResponse> {
        let form = turn_form(input, history)?;
        let path = if streaming { "api/stream" } else { "api" };

        tracing::debug!(streaming, history = history.len(), "submitting turn");
        let response = self
            .client
            .post(format!("{}/{path}", self.base_url))
            .multipart(form)
            .send()
            .await?;
        let response = check(response).await?;

        let transcript = decoded_header(&response, TRANSCRIPT_HEADER).ok_or_else(|| Error::Api {
            status: response.status().as_u16(),
            message: "response is missing the transcript header".to_string(),
        })?;
        let reply = decoded_header(&response, RESPONSE_HEADER);
        let context_id = decoded_header(&response, CONTEXT_ID_HEADER);
        let sample_rate =
            decoded_header(&response, SAMPLE_RATE_HEADER).and_then(|rate| rate.parse().ok());

        Ok(TurnResponse {
            transcript,
            response: reply,
            context_id,
            sample_rate,
            audio: response
                .bytes_stream()
                .map(|chunk| chunk.map_err(Error::from))
                .boxed(),
        })
    }

    /// Clone a voice from a sample, returning the new voice id
    ///
    /// # Errors
    ///
    /// Returns error if the upload fails or the server rejects it
    pub async fn clone_voice(&self, sample: AudioClip) -> Result<String> {
        let part = Part::bytes(sample.bytes.to_vec())
            .file_name(sample.file_name())
            .mime_str(&sample.mime)
            .map_err(|e| Error::InvalidRequest(e.to_string()))?;
        let form = Form::new().part("voiceSample", part);

        let response = self
            .client
            .post(format!("{}/api/clone-voice", self.base_url))
            .multipart(form)
            .send()
            .await?;

        let body: CloneVoiceResponse = check(response).await?.json().await?;
        Ok(body.voice_id)
    }

    /// Ask which collaborators the server has configured
    ///
    /// # Errors
    ///
    /// Returns error if the server is unreachable
    pub async fn capabilities(&self) -> Result<Capabilities> {
        let response = self
            .client
            .get(format!("{}/api/capabilities", self.base_url))
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }
}

/// Multipart body for a turn: the input plus one part per history message
fn turn_form(input: TurnInput, history: &ConversationHistory) -> Result<Form> {
    let mut form = match input {
        TurnInput::Text(text) => Form::new().text("input", text),
        TurnInput::Audio(clip) => {
            let part = Part::bytes(clip.bytes.to_vec())
                .file_name(clip.file_name())
                .mime_str(&clip.mime)
                .map_err(|e| Error::InvalidRequest(e.to_string()))?;
            Form::new().part("input", part)
        }
    };

    for message in history.messages() {
        form = form.text("message", serde_json::to_string(message)?);
    }
    Ok(form)
}

/// Map failure statuses to errors, preferring the server's own message
async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        tracing::warn!("server is rate limiting");
        return Err(Error::RateLimited);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body);

    tracing::debug!(status = %status, message = %message, "server rejected request");
    Err(Error::Api {
        status: status.as_u16(),
        message,
    })
}

fn decoded_header(response: &reqwest::Response, name: &str) -> Option<String> {
    let raw = response.headers().get(name)?.to_str().ok()?;
    urlencoding::decode(raw).ok().map(std::borrow::Cow::into_owned)
}
