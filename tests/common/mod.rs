//! Shared test utilities: in-memory collaborators and a manual audio clock

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream;

use swift_voice::voice::{
    AudioByteStream, AudioClip, AudioSink, ChunkRequest, PlaybackUnit, Synthesizer, Transcriber,
    VoiceCloner,
};
use swift_voice::{ConversationHistory, Error, ResponseGenerator, Result, TextChunk, TextStream};

pub const SAMPLE_RATE: u32 = 8;

/// Deterministic PCM for a piece of text: one sample per character
pub fn samples_for(text: &str) -> Vec<f32> {
    text.chars().map(|c| u32::from(c) as f32 / 1000.0).collect()
}

pub fn pcm_for(text: &str) -> Vec<u8> {
    to_pcm(&samples_for(text))
}

pub fn to_pcm(samples: &[f32]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// One recorded incremental synthesis call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthCall {
    pub context_id: String,
    pub transcript: String,
    pub continues: bool,
}

#[derive(Default)]
pub struct FakeSynthesizer {
    pub calls: Mutex<Vec<SynthCall>>,
    /// `start N` / `end N` markers, in the order they happened
    pub events: Mutex<Vec<String>>,
    pub whole: Mutex<Vec<String>>,
    /// Zero-based call index that fails
    pub fail_on_call: Option<usize>,
    /// Per-call latency in milliseconds
    pub delays_ms: Vec<u64>,
    /// Whole-text synthesis is refused outright
    pub fail_whole: bool,
    /// Whole-text audio breaks off after its first piece
    pub break_whole: bool,
}

/// Provider detail that must never reach a client
pub const PROVIDER_DETAIL: &str = "upstream 401: key sk-live-1234 revoked";

impl FakeSynthesizer {
    pub fn failing_on(call: usize) -> Self {
        Self {
            fail_on_call: Some(call),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<SynthCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn close_calls(&self) -> usize {
        self.calls().iter().filter(|c| !c.continues).count()
    }
}

#[async_trait]
impl Synthesizer for FakeSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<AudioByteStream> {
        self.whole.lock().unwrap().push(text.to_string());
        if self.fail_whole {
            return Err(Error::Tts(PROVIDER_DETAIL.to_string()));
        }

        // 5-byte pieces never line up with 4-byte samples
        let mut pieces: Vec<Result<Bytes>> = pcm_for(text)
            .chunks(5)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        if self.break_whole {
            pieces.truncate(1);
            pieces.push(Err(Error::Tts("connection reset".to_string())));
        }
        Ok(stream::iter(pieces).boxed())
    }

    async fn synthesize_chunk(&self, request: &ChunkRequest<'_>) -> Result<Bytes> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(SynthCall {
                context_id: request.context_id.to_string(),
                transcript: request.transcript.to_string(),
                continues: request.continues,
            });
            calls.len() - 1
        };

        self.events.lock().unwrap().push(format!("start {n}"));
        if let Some(ms) = self.delays_ms.get(n) {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
        }
        self.events.lock().unwrap().push(format!("end {n}"));

        if self.fail_on_call == Some(n) {
            return Err(Error::Tts(format!("call {n} rejected")));
        }
        Ok(Bytes::from(pcm_for(request.transcript)))
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}

pub struct FakeTranscriber {
    pub transcript: String,
    pub calls: AtomicUsize,
}

impl FakeTranscriber {
    pub fn new(transcript: &str) -> Self {
        Self {
            transcript: transcript.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, clip: &AudioClip) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if clip.bytes.starts_with(b"SILENCE") {
            return Err(Error::EmptyAudio);
        }
        Ok(self.transcript.clone())
    }
}

pub struct FakeGenerator {
    pub reply: String,
    pub chunks: Vec<String>,
    /// Stream fails after yielding this many chunks
    pub fail_after: Option<usize>,
    /// Every request is refused
    pub fail: bool,
    pub calls: AtomicUsize,
    pub last_history: Mutex<Option<ConversationHistory>>,
}

impl FakeGenerator {
    pub fn new(reply: &str, chunks: &[&str]) -> Self {
        Self {
            reply: reply.to_string(),
            chunks: chunks.iter().map(ToString::to_string).collect(),
            fail_after: None,
            fail: false,
            calls: AtomicUsize::new(0),
            last_history: Mutex::new(None),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new("", &[])
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn record(&self, history: &ConversationHistory) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_history.lock().unwrap() = Some(history.clone());
        if self.fail {
            return Err(Error::Llm(PROVIDER_DETAIL.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ResponseGenerator for FakeGenerator {
    async fn generate(&self, _transcript: &str, history: &ConversationHistory) -> Result<String> {
        self.record(history)?;
        Ok(self.reply.clone())
    }

    async fn generate_stream(
        &self,
        _transcript: &str,
        history: &ConversationHistory,
    ) -> Result<TextStream> {
        self.record(history)?;
        Ok(text_stream(&self.chunks, self.fail_after))
    }
}

/// Indexed text stream, optionally failing after `fail_after` chunks
pub fn text_stream(chunks: &[String], fail_after: Option<usize>) -> TextStream {
    let mut items: Vec<Result<TextChunk>> = chunks
        .iter()
        .take(fail_after.unwrap_or(usize::MAX))
        .enumerate()
        .map(|(index, text)| {
            Ok(TextChunk {
                index,
                text: text.clone(),
            })
        })
        .collect();
    if fail_after.is_some() {
        items.push(Err(Error::Llm("stream dropped".to_string())));
    }
    stream::iter(items).boxed()
}

pub fn chunks(texts: &[&str]) -> Vec<String> {
    texts.iter().map(ToString::to_string).collect()
}

pub struct FakeCloner;

#[async_trait]
impl VoiceCloner for FakeCloner {
    async fn clone_voice(&self, _sample: &AudioClip) -> Result<String> {
        Ok("voice-123".to_string())
    }
}

pub struct FailingCloner;

#[async_trait]
impl VoiceCloner for FailingCloner {
    async fn clone_voice(&self, _sample: &AudioClip) -> Result<String> {
        Err(Error::Clone(PROVIDER_DETAIL.to_string()))
    }
}

/// Audio clock moved by hand
#[derive(Debug, Clone, Default)]
pub struct ManualClock(Arc<Mutex<f64>>);

impl ManualClock {
    pub fn set(&self, now: f64) {
        *self.0.lock().unwrap() = now;
    }

    pub fn get(&self) -> f64 {
        *self.0.lock().unwrap()
    }
}

/// Sink that keeps every scheduled unit
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub clock: ManualClock,
    pub units: Vec<PlaybackUnit>,
    pub stops: usize,
}

impl RecordingSink {
    pub fn samples(&self) -> Vec<f32> {
        self.units.iter().flat_map(|u| u.samples.clone()).collect()
    }
}

impl AudioSink for RecordingSink {
    fn now(&self) -> f64 {
        self.clock.get()
    }

    fn schedule(&mut self, unit: PlaybackUnit) -> Result<()> {
        self.units.push(unit);
        Ok(())
    }

    fn stop_all(&mut self) {
        self.units.clear();
        self.stops += 1;
    }
}

/// One part of a hand-built multipart body
pub struct FormPart<'a> {
    pub name: &'a str,
    pub file_name: Option<&'a str>,
    pub content_type: Option<&'a str>,
    pub data: Vec<u8>,
}

impl<'a> FormPart<'a> {
    pub fn text(name: &'a str, value: &str) -> Self {
        Self {
            name,
            file_name: None,
            content_type: None,
            data: value.as_bytes().to_vec(),
        }
    }

    pub fn file(name: &'a str, content_type: &'a str, data: &[u8]) -> Self {
        Self {
            name,
            file_name: Some("clip.wav"),
            content_type: Some(content_type),
            data: data.to_vec(),
        }
    }
}

pub const BOUNDARY: &str = "swift-test-boundary";

pub fn multipart_body(parts: &[FormPart<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        let mut disposition = format!("Content-Disposition: form-data; name=\"{}\"", part.name);
        if let Some(file_name) = part.file_name {
            disposition.push_str(&format!("; filename=\"{file_name}\""));
        }
        body.extend_from_slice(disposition.as_bytes());
        body.extend_from_slice(b"\r\n");
        if let Some(content_type) = part.content_type {
            body.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(&part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}
