//! Response generation via OpenAI-compatible chat completions
//!
//! Works against Groq (default), `OpenAI` or any endpoint that speaks the same
//! `/chat/completions` dialect, including server-sent event streaming.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::conversation::ConversationHistory;
use crate::{Error, Result};

/// A fragment of generated text with its position in the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Zero-based ordinal of this chunk
    pub index: usize,
    pub text: String,
}

/// Ordered stream of generated text chunks
pub type TextStream = BoxStream<'static, Result<TextChunk>>;

/// Response generation collaborator
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    /// Generate a complete reply
    async fn generate(&self, transcript: &str, history: &ConversationHistory) -> Result<String>;

    /// Generate a reply as an incremental token stream
    async fn generate_stream(
        &self,
        transcript: &str,
        history: &ConversationHistory,
    ) -> Result<TextStream>;
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

/// Chat completion client
pub struct ChatCompletions {
    client: reqwest::Client,
    api_key: String,
    config: LlmConfig,
}

impl ChatCompletions {
    /// Create a new chat completion client
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: String, config: LlmConfig) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "API key required for chat completions".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            config,
        })
    }

    /// System prompt, then prior turns, then the new user message
    fn messages(&self, transcript: &str, history: &ConversationHistory) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage {
            role: "system",
            content: self.config.system_prompt.clone(),
        });
        messages.extend(history.messages().iter().map(|m| ChatMessage {
            role: m.role.as_str(),
            content: m.content.clone(),
        }));
        messages.push(ChatMessage {
            role: "user",
            content: transcript.to_string(),
        });
        messages
    }

    async fn send(&self, request: &ChatRequest<'_>) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(request)
            .send()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "chat completion request failed"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "chat completion API error");
            return Err(Error::Llm(format!("chat completion error {status}: {body}")));
        }

        Ok(response)
    }
}

#[async_trait]
impl ResponseGenerator for ChatCompletions {
    async fn generate(&self, transcript: &str, history: &ConversationHistory) -> Result<String> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: self.messages(transcript, history),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            stream: false,
        };

        let response: ChatResponse = self.send(&request).await?.json().await?;
        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::Llm("completion contained no choices".to_string()))?;

        tracing::info!(chars = text.len(), "completion received");
        Ok(text)
    }

    async fn generate_stream(
        &self,
        transcript: &str,
        history: &ConversationHistory,
    ) -> Result<TextStream> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: self.messages(transcript, history),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            stream: true,
        };

        let response = self.send(&request).await?;
        tracing::debug!("completion stream opened");
        Ok(text_stream(response.bytes_stream().boxed()))
    }
}

/// Outcome of parsing one server-sent event `data:` payload
#[derive(Debug, PartialEq, Eq)]
enum SseEvent {
    Delta(String),
    Done,
}

/// Drain complete events from `buffer`, leaving any partial event in place
fn drain_sse_events(buffer: &mut String) -> Result<Vec<SseEvent>> {
    let mut events = Vec::new();

    while let Some(pos) = buffer.find("\n\n") {
        let event: String = buffer.drain(..pos + 2).collect();

        for line in event.lines() {
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                events.push(SseEvent::Done);
                continue;
            }

            let parsed: StreamResponse = serde_json::from_str(data)
                .map_err(|e| Error::Llm(format!("malformed stream event: {e}")))?;
            if let Some(content) = parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta.content)
                .filter(|c| !c.is_empty())
            {
                events.push(SseEvent::Delta(content));
            }
        }
    }

    Ok(events)
}

/// End offset of the last complete event in `raw`
fn last_event_boundary(raw: &[u8]) -> Option<usize> {
    raw.windows(2).rposition(|w| w == b"\n\n").map(|pos| pos + 2)
}

struct SseState<S> {
    body: S,
    raw: Vec<u8>,
    buffer: String,
    pending: VecDeque<String>,
    next_index: usize,
    done: bool,
}

/// Turn an SSE response body into an ordered stream of text chunks
fn text_stream<S, B>(body: S) -> TextStream
where
    S: futures::Stream<Item = std::result::Result<B, reqwest::Error>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = SseState {
        body,
        raw: Vec::new(),
        buffer: String::new(),
        pending: VecDeque::new(),
        next_index: 0,
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(text) = state.pending.pop_front() {
                let chunk = TextChunk {
                    index: state.next_index,
                    text,
                };
                state.next_index += 1;
                return Some((Ok(chunk), state));
            }

            if state.done {
                return None;
            }

            match state.body.next().await {
                Some(Ok(bytes)) => {
                    // only decode whole events so multi-byte characters never split
                    state.raw.extend_from_slice(bytes.as_ref());
                    if let Some(end) = last_event_boundary(&state.raw) {
                        let complete: Vec<u8> = state.raw.drain(..end).collect();
                        state.buffer.push_str(&String::from_utf8_lossy(&complete));
                    }
                    match drain_sse_events(&mut state.buffer) {
                        Ok(events) => {
                            for event in events {
                                match event {
                                    SseEvent::Delta(text) => state.pending.push_back(text),
                                    SseEvent::Done => state.done = true,
                                }
                            }
                        }
                        Err(e) => {
                            state.done = true;
                            state.pending.clear();
                            return Some((Err(e), state));
                        }
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "completion stream interrupted");
                    state.done = true;
                    return Some((Err(Error::from(e)), state));
                }
                None => {
                    // a body without the terminator is a truncated reply
                    tracing::warn!(
                        leftover = state.raw.len() + state.buffer.len(),
                        "completion stream ended before [DONE]"
                    );
                    state.done = true;
                    return Some((
                        Err(Error::Llm(
                            "completion stream ended before [DONE]".to_string(),
                        )),
                        state,
                    ));
                }
            }
        }
    })
    .boxed()
}
