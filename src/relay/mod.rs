//! Streaming relay from generated text to synthesized audio
//!
//! Couples the incremental token stream of the response generator to
//! incremental synthesis calls:
//! - tokens are coalesced by a [`FlushPolicy`] into sub-requests
//! - every sub-request of one turn shares a single [`SynthesisContext`]
//! - sub-request N+1 is never issued before sub-request N returned
//! - audio is forwarded in issue order, without buffering the whole reply
//! - the context is always closed, even when the turn fails

mod batcher;

use std::sync::Arc;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use crate::llm::TextChunk;
use crate::voice::{ChunkRequest, Synthesizer};
use crate::{Error, Result};

pub use batcher::{ChunkBatcher, FlushPolicy};

/// Audio chunks buffered between the relay and its consumer
const AUDIO_CHANNEL_CAPACITY: usize = 16;

/// Continuity token scoping the synthesis calls of one assistant turn
///
/// Not `Clone`: a context is created at turn start, moved into exactly one
/// relay run, and closed by it.
#[derive(Debug, PartialEq, Eq)]
pub struct SynthesisContext {
    id: String,
}

impl SynthesisContext {
    /// Create a fresh context with a random id
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Wrap an existing id
    #[must_use]
    pub fn from_id(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Default for SynthesisContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary of one relay run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayReport {
    /// Context the run used
    pub context_id: String,
    /// Content-bearing sub-requests issued
    pub sub_requests: usize,
    /// Audio bytes forwarded to the consumer
    pub audio_bytes: usize,
    /// Full generated text seen by the relay
    pub text: String,
    /// Whether the closing call succeeded
    pub closed: bool,
    /// Whether the consumer went away before the turn finished
    pub cancelled: bool,
}

/// Why a relay run stopped early
enum Halt {
    Cancelled,
    Failed(Error),
}

/// Relays a text stream into ordered synthesized audio
pub struct StreamingRelay {
    synthesizer: Arc<dyn Synthesizer>,
    policy: FlushPolicy,
}

impl StreamingRelay {
    #[must_use]
    pub fn new(synthesizer: Arc<dyn Synthesizer>, policy: FlushPolicy) -> Self {
        Self {
            synthesizer,
            policy,
        }
    }

    /// Run the relay in a background task
    ///
    /// Returns the audio stream for the consumer and a handle resolving to the
    /// run's report. Dropping the audio stream cancels the run; the context is
    /// still closed.
    pub fn spawn<S>(
        self: Arc<Self>,
        text: S,
        context: SynthesisContext,
    ) -> (
        ReceiverStream<Result<Bytes>>,
        JoinHandle<Result<RelayReport>>,
    )
    where
        S: Stream<Item = Result<TextChunk>> + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::channel(AUDIO_CHANNEL_CAPACITY);
        let handle = tokio::spawn(async move { self.run(text, context, tx).await });
        (ReceiverStream::new(rx), handle)
    }

    /// Relay `text` into `audio`, returning once the context is closed
    ///
    /// A failure is also sent down `audio` so the consumer sees a truncated
    /// stream rather than a clean end.
    ///
    /// # Errors
    ///
    /// Returns error if the text stream fails, chunks arrive out of order, or
    /// any synthesis call fails.
    pub async fn run<S>(
        &self,
        mut text: S,
        context: SynthesisContext,
        audio: mpsc::Sender<Result<Bytes>>,
    ) -> Result<RelayReport>
    where
        S: Stream<Item = Result<TextChunk>> + Unpin,
    {
        let mut report = RelayReport {
            context_id: context.id().to_string(),
            ..RelayReport::default()
        };
        let mut batcher = ChunkBatcher::new(self.policy.clone());

        tracing::debug!(context_id = context.id(), "relay started");

        let halt = self
            .pump(&mut text, &context, &mut batcher, &audio, &mut report)
            .await
            .err();

        if halt.is_some() {
            let dropped = batcher.discard();
            if dropped > 0 {
                tracing::debug!(chars = dropped, "discarded unflushed text");
            }
        }

        let close = self.close(&context, &audio, &mut report).await;

        match (halt, close) {
            (Some(Halt::Failed(e)), close_result) => {
                if let Err(close_err) = close_result {
                    tracing::warn!(error = %close_err, "failed to close context after error");
                }
                tracing::warn!(context_id = context.id(), error = %e, "relay failed");
                let _ = audio.send(Err(Error::Relay(e.to_string()))).await;
                Err(e)
            }
            (Some(Halt::Cancelled), close_result) => {
                if let Err(close_err) = close_result {
                    tracing::warn!(error = %close_err, "failed to close context after cancel");
                }
                report.cancelled = true;
                tracing::debug!(context_id = context.id(), "relay cancelled by consumer");
                Ok(report)
            }
            (None, Err(e)) => {
                let _ = audio.send(Err(Error::Relay(e.to_string()))).await;
                Err(e)
            }
            (None, Ok(())) => {
                tracing::info!(
                    context_id = context.id(),
                    sub_requests = report.sub_requests,
                    audio_bytes = report.audio_bytes,
                    "relay complete"
                );
                Ok(report)
            }
        }
    }

    /// Consume the text stream, flushing batches as they become ready
    async fn pump<S>(
        &self,
        text: &mut S,
        context: &SynthesisContext,
        batcher: &mut ChunkBatcher,
        audio: &mpsc::Sender<Result<Bytes>>,
        report: &mut RelayReport,
    ) -> std::result::Result<(), Halt>
    where
        S: Stream<Item = Result<TextChunk>> + Unpin,
    {
        let mut expected = 0;

        while let Some(item) = text.next().await {
            let chunk = item.map_err(Halt::Failed)?;

            if chunk.index != expected {
                return Err(Halt::Failed(Error::Relay(format!(
                    "text chunk {} arrived, expected {expected}",
                    chunk.index
                ))));
            }
            expected += 1;

            if chunk.text.is_empty() {
                continue;
            }
            report.text.push_str(&chunk.text);

            if let Some(batch) = batcher.push(&chunk.text) {
                self.flush(context, &batch, audio, report).await?;
            }
        }

        if let Some(rest) = batcher.finish() {
            self.flush(context, &rest, audio, report).await?;
        }

        Ok(())
    }

    /// Issue one content sub-request and forward its audio
    async fn flush(
        &self,
        context: &SynthesisContext,
        batch: &str,
        audio: &mpsc::Sender<Result<Bytes>>,
        report: &mut RelayReport,
    ) -> std::result::Result<(), Halt> {
        if audio.is_closed() {
            return Err(Halt::Cancelled);
        }

        let request = ChunkRequest::content(context.id(), batch);
        let bytes = self
            .synthesizer
            .synthesize_chunk(&request)
            .await
            .map_err(Halt::Failed)?;
        report.sub_requests += 1;

        forward(bytes, audio, report).await
    }

    /// Issue the closing call for the context
    async fn close(
        &self,
        context: &SynthesisContext,
        audio: &mpsc::Sender<Result<Bytes>>,
        report: &mut RelayReport,
    ) -> Result<()> {
        let bytes = self
            .synthesizer
            .synthesize_chunk(&ChunkRequest::close(context.id()))
            .await?;
        report.closed = true;

        // late audio from the close call is best effort
        let _ = forward(bytes, audio, report).await;
        Ok(())
    }
}

async fn forward(
    bytes: Bytes,
    audio: &mpsc::Sender<Result<Bytes>>,
    report: &mut RelayReport,
) -> std::result::Result<(), Halt> {
    if bytes.is_empty() {
        return Ok(());
    }

    let len = bytes.len();
    audio.send(Ok(bytes)).await.map_err(|_| Halt::Cancelled)?;
    report.audio_bytes += len;
    Ok(())
}
