//! Assistant turn endpoints
//!
//! A turn arrives as a multipart form: an `input` part holding either typed
//! text or an audio file, plus one `message` part per prior history entry.
//! Input is validated before any provider is called.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{
        DefaultBodyLimit, Multipart, State,
        multipart::{Field, MultipartRejection},
    },
    http::{HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use serde::Serialize;

use super::ApiState;
use crate::conversation::{ConversationHistory, Message, TurnInput};
use crate::llm::ResponseGenerator;
use crate::relay::{StreamingRelay, SynthesisContext};
use crate::voice::{AudioClip, Synthesizer};
use crate::Error;

/// Percent-encoded transcript of the user's input
pub const TRANSCRIPT_HEADER: &str = "x-transcript";

/// Percent-encoded reply text (non-streaming turns only)
pub const RESPONSE_HEADER: &str = "x-response";

/// Synthesis context of a streamed turn
pub const CONTEXT_ID_HEADER: &str = "x-context-id";

/// Sample rate of the PCM body
pub const SAMPLE_RATE_HEADER: &str = "x-sample-rate";

/// Reply headers browser clients must be allowed to read
#[must_use]
pub fn exposed_headers() -> [HeaderName; 4] {
    [
        TRANSCRIPT_HEADER,
        RESPONSE_HEADER,
        CONTEXT_ID_HEADER,
        SAMPLE_RATE_HEADER,
    ]
    .map(HeaderName::from_static)
}

/// Upload limit for audio parts
const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Build assistant router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api", post(respond))
        .route("/api/stream", post(respond_stream))
        .route("/api/clone-voice", post(clone_voice))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

/// A parsed turn request
#[derive(Debug)]
pub struct TurnRequest {
    pub input: TurnInput,
    pub history: ConversationHistory,
}

impl TurnRequest {
    async fn from_multipart(
        multipart: Result<Multipart, MultipartRejection>,
    ) -> Result<Self, AssistantError> {
        let mut multipart = multipart.map_err(invalid_request)?;
        let mut input = None;
        let mut messages = Vec::new();

        while let Some(field) = multipart.next_field().await.map_err(invalid_request)? {
            let name = field.name().map(str::to_string);
            match name.as_deref() {
                Some("input") => input = Some(read_input(field).await?),
                Some("message") => {
                    let raw = field.text().await.map_err(invalid_request)?;
                    let message: Message =
                        serde_json::from_str(&raw).map_err(invalid_request)?;
                    messages.push(message);
                }
                _ => {}
            }
        }

        let input = match input {
            Some(TurnInput::Text(text)) => {
                let text = text.trim();
                if text.is_empty() {
                    return Err(invalid_request("empty text input"));
                }
                TurnInput::Text(text.to_string())
            }
            Some(TurnInput::Audio(clip)) if clip.is_empty() => {
                return Err(AssistantError::InvalidAudio);
            }
            Some(audio) => audio,
            None => return Err(invalid_request("missing input")),
        };

        Ok(Self {
            input,
            history: ConversationHistory::from_messages(messages),
        })
    }
}

/// A file part (or any part typed as audio) is a recording; anything else is text
async fn read_input(field: Field<'_>) -> Result<TurnInput, AssistantError> {
    let content_type = field.content_type().map(str::to_string);
    let is_audio = field.file_name().is_some()
        || content_type
            .as_deref()
            .is_some_and(|c| c.starts_with("audio/"));

    if is_audio {
        let bytes = field.bytes().await.map_err(invalid_request)?;
        let mime = content_type.unwrap_or_else(|| "application/octet-stream".to_string());
        Ok(TurnInput::Audio(AudioClip::new(bytes, mime)))
    } else {
        Ok(TurnInput::Text(field.text().await.map_err(invalid_request)?))
    }
}

/// Turn the input into the text the model will answer
async fn resolve_transcript(state: &ApiState, input: TurnInput) -> Result<String, AssistantError> {
    match input {
        TurnInput::Text(text) => Ok(text),
        TurnInput::Audio(clip) => {
            let transcriber = state
                .transcriber
                .as_ref()
                .ok_or(AssistantError::NotConfigured("transcription"))?;

            transcriber.transcribe(&clip).await.map_err(|e| {
                tracing::warn!(error = %e, mime = %clip.mime, "transcription rejected input");
                AssistantError::InvalidAudio
            })
        }
    }
}

fn collaborators(
    state: &ApiState,
) -> Result<(&Arc<dyn ResponseGenerator>, &Arc<dyn Synthesizer>), AssistantError> {
    let generator = state
        .generator
        .as_ref()
        .ok_or(AssistantError::NotConfigured("response generation"))?;
    let synthesizer = state
        .synthesizer
        .as_ref()
        .ok_or(AssistantError::NotConfigured("speech synthesis"))?;
    Ok((generator, synthesizer))
}

/// Whole-reply turn: transcribe, generate, then stream the synthesized audio
async fn respond(
    State(state): State<Arc<ApiState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, AssistantError> {
    let request = TurnRequest::from_multipart(multipart).await?;
    let (generator, synthesizer) = collaborators(&state)?;

    let transcript = resolve_transcript(&state, request.input).await?;
    tracing::debug!(chars = transcript.len(), history = request.history.len(), "turn received");

    let reply = generator
        .generate(&transcript, &request.history)
        .await
        .map_err(AssistantError::Generation)?;

    let audio = synthesizer
        .synthesize(&reply)
        .await
        .map_err(AssistantError::Synthesis)?;

    tracing::info!(transcript = %transcript, reply = %reply, "turn answered");

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/octet-stream")),
            (HeaderName::from_static(TRANSCRIPT_HEADER), encoded_header(&transcript)),
            (HeaderName::from_static(RESPONSE_HEADER), encoded_header(&reply)),
            (
                HeaderName::from_static(SAMPLE_RATE_HEADER),
                HeaderValue::from(synthesizer.sample_rate()),
            ),
        ],
        Body::from_stream(audio),
    )
        .into_response())
}

/// Streamed turn: generated tokens are relayed into incremental synthesis
async fn respond_stream(
    State(state): State<Arc<ApiState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, AssistantError> {
    let request = TurnRequest::from_multipart(multipart).await?;
    let (generator, synthesizer) = collaborators(&state)?;

    let transcript = resolve_transcript(&state, request.input).await?;

    let text = generator
        .generate_stream(&transcript, &request.history)
        .await
        .map_err(AssistantError::Generation)?;

    let sample_rate = synthesizer.sample_rate();
    let context = SynthesisContext::new();
    let context_id = context.id().to_string();
    tracing::info!(transcript = %transcript, context_id = %context_id, "streaming turn");

    let relay = Arc::new(StreamingRelay::new(
        Arc::clone(synthesizer),
        state.relay_policy.clone(),
    ));
    // the relay reports its own outcome; the body ends with an error if it fails
    let (audio, _report) = relay.spawn(text, context);

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/octet-stream")),
            (HeaderName::from_static(TRANSCRIPT_HEADER), encoded_header(&transcript)),
            (HeaderName::from_static(CONTEXT_ID_HEADER), encoded_header(&context_id)),
            (HeaderName::from_static(SAMPLE_RATE_HEADER), HeaderValue::from(sample_rate)),
        ],
        Body::from_stream(audio),
    )
        .into_response())
}

/// Voice clone response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloneVoiceResponse {
    pub voice_id: String,
}

async fn clone_voice(
    State(state): State<Arc<ApiState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<CloneVoiceResponse>, AssistantError> {
    let mut multipart = multipart.map_err(invalid_request)?;
    let mut sample = None;
    while let Some(field) = multipart.next_field().await.map_err(invalid_request)? {
        if field.name() == Some("voiceSample") {
            let mime = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let bytes = field.bytes().await.map_err(invalid_request)?;
            sample = Some(AudioClip::new(bytes, mime));
        }
    }

    let sample = sample
        .filter(|s| !s.is_empty())
        .ok_or_else(|| invalid_request("missing voice sample"))?;
    let cloner = state
        .cloner
        .as_ref()
        .ok_or(AssistantError::NotConfigured("voice cloning"))?;

    let voice_id = cloner
        .clone_voice(&sample)
        .await
        .map_err(AssistantError::Clone)?;

    Ok(Json(CloneVoiceResponse { voice_id }))
}

fn encoded_header(value: &str) -> HeaderValue {
    HeaderValue::from_str(&urlencoding::encode(value))
        .unwrap_or_else(|_| HeaderValue::from_static(""))
}

fn invalid_request(reason: impl std::fmt::Display) -> AssistantError {
    AssistantError::InvalidRequest(reason.to_string())
}

/// Assistant API errors
#[derive(Debug)]
pub enum AssistantError {
    /// Malformed form, history or empty text
    InvalidRequest(String),
    /// Audio missing or not transcribable
    InvalidAudio,
    NotConfigured(&'static str),
    RateLimited,
    Generation(Error),
    Synthesis(Error),
    Clone(Error),
}

impl IntoResponse for AssistantError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: ErrorBody,
        }

        #[derive(Serialize)]
        struct ErrorBody {
            code: &'static str,
            message: String,
        }

        let (status, code, message) = match self {
            Self::InvalidRequest(reason) => {
                tracing::debug!(reason = %reason, "invalid request");
                (StatusCode::BAD_REQUEST, "invalid_request", "Invalid request".to_string())
            }
            Self::InvalidAudio => (
                StatusCode::BAD_REQUEST,
                "invalid_audio",
                "Invalid audio".to_string(),
            ),
            Self::NotConfigured(what) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "not_configured",
                format!("{what} is not configured"),
            ),
            Self::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "Too many requests. Please try again later.".to_string(),
            ),
            // provider detail stays in the log
            Self::Generation(e) => {
                tracing::error!(error = %e, "response generation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "generation_failed",
                    "Response generation failed".to_string(),
                )
            }
            Self::Synthesis(e) => {
                tracing::error!(error = %e, "speech synthesis failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "synthesis_failed",
                    "Voice synthesis failed".to_string(),
                )
            }
            Self::Clone(e) => {
                tracing::error!(error = %e, "voice cloning failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "clone_failed",
                    "Failed to clone voice".to_string(),
                )
            }
        };

        (status, Json(ErrorResponse { error: ErrorBody { code, message } })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_is_percent_encoded() {
        let value = encoded_header("héllo, wörld?");
        assert_eq!(value.to_str().unwrap(), "h%C3%A9llo%2C%20w%C3%B6rld%3F");
        assert_eq!(
            urlencoding::decode(value.to_str().unwrap()).unwrap(),
            "héllo, wörld?"
        );
    }

    #[test]
    fn test_error_statuses() {
        assert_eq!(
            AssistantError::InvalidAudio.into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AssistantError::RateLimited.into_response().status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AssistantError::NotConfigured("x").into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AssistantError::Synthesis(Error::Tts("down".into()))
                .into_response()
                .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
