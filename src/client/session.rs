//! Conversation session: one turn at a time, newest turn wins

use std::time::{Duration, Instant};

use super::AssistantClient;
use crate::conversation::{ConversationHistory, TurnInput};
use crate::voice::{AudioSink, PlaybackEngine, PlaybackSummary, StopHandle, StopSignal, stop_pair};
use crate::{Error, Result};

/// What one completed turn produced
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub transcript: String,
    pub response: Option<String>,
    /// Submission to response headers
    pub latency: Duration,
    pub playback: PlaybackSummary,
}

/// Owns the history and the playback engine for one conversation
pub struct VoiceSession<S> {
    client: AssistantClient,
    engine: PlaybackEngine<S>,
    history: ConversationHistory,
    streaming: bool,
    stop: Option<StopHandle>,
}

impl<S: AudioSink> VoiceSession<S> {
    #[must_use]
    pub const fn new(client: AssistantClient, engine: PlaybackEngine<S>, streaming: bool) -> Self {
        Self {
            client,
            engine,
            history: ConversationHistory::new(),
            streaming,
            stop: None,
        }
    }

    /// Hard cutover to a new turn
    ///
    /// Stops the previous turn's stream and silences anything it scheduled
    /// before the new turn can touch the playback clock.
    pub fn begin_turn(&mut self) -> StopSignal {
        if let Some(previous) = self.stop.take() {
            previous.stop();
        }
        if self.engine.pending_secs() > 0.0 {
            self.engine.cancel();
        }

        let (handle, signal) = stop_pair();
        self.stop = Some(handle);
        signal
    }

    /// Handle for interrupting the current turn from elsewhere
    #[must_use]
    pub fn stop_handle(&self) -> Option<StopHandle> {
        self.stop.clone()
    }

    /// Submit `input`, play the reply and record the turn
    ///
    /// The history only grows once the reply has played and the server
    /// returned its text, so a failed turn leaves the history as it was.
    ///
    /// # Errors
    ///
    /// Returns error if the server rejects the turn, synthesizes at a sample
    /// rate other than the engine's, or playback fails
    pub async fn run_turn(&mut self, input: TurnInput) -> Result<TurnOutcome> {
        let stop = self.begin_turn();

        let started = Instant::now();
        let response = self
            .client
            .submit(input, &self.history, self.streaming)
            .await?;
        let latency = started.elapsed();

        tracing::info!(
            transcript = %response.transcript,
            latency_ms = latency.as_millis(),
            context_id = response.context_id.as_deref().unwrap_or_default(),
            "reply received"
        );

        if let Some(rate) = response.sample_rate
            && rate != self.engine.sample_rate()
        {
            tracing::error!(
                server = rate,
                playback = self.engine.sample_rate(),
                "sample rate mismatch"
            );
            return Err(Error::Playback(format!(
                "server synthesizes at {rate} Hz but playback runs at {} Hz",
                self.engine.sample_rate()
            )));
        }

        let playback = self.engine.play(response.audio, stop).await?;

        if let Some(reply) = &response.response {
            let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
            self.history
                .push_turn(response.transcript.clone(), reply.clone(), Some(latency_ms));
        }

        Ok(TurnOutcome {
            transcript: response.transcript,
            response: response.response,
            latency,
            playback,
        })
    }

    /// Seconds of reply audio still queued on the output
    #[must_use]
    pub fn pending_secs(&self) -> f64 {
        self.engine.pending_secs()
    }

    /// Let queued reply audio play out, cutting it off once the user speaks
    ///
    /// `user_speaking` is polled every `poll`. Returns `true` when the reply
    /// was interrupted, `false` once it finished on its own.
    pub async fn play_out<F>(&mut self, poll: Duration, mut user_speaking: F) -> bool
    where
        F: FnMut() -> bool,
    {
        loop {
            let remaining = self.pending_secs();
            if remaining <= 0.0 {
                return false;
            }

            tokio::time::sleep(poll.min(Duration::from_secs_f64(remaining))).await;

            if user_speaking() && self.pending_secs() > 0.0 {
                tracing::debug!("user started speaking, interrupting reply");
                self.interrupt();
                return true;
            }
        }
    }

    /// Silence the output immediately
    pub fn interrupt(&mut self) {
        if let Some(handle) = self.stop.take() {
            handle.stop();
        }
        self.engine.cancel();
    }

    #[must_use]
    pub const fn history(&self) -> &ConversationHistory {
        &self.history
    }

    #[must_use]
    pub const fn engine(&self) -> &PlaybackEngine<S> {
        &self.engine
    }

    pub const fn engine_mut(&mut self) -> &mut PlaybackEngine<S> {
        &mut self.engine
    }

    #[must_use]
    pub const fn client(&self) -> &AssistantClient {
        &self.client
    }
}
