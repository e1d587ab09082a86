//! Swift - low-latency voice assistant
//!
//! This library provides the pieces of a speak-and-listen assistant:
//! - Audio capture, press-to-talk and utterance segmentation
//! - Transcription, chat completion and speech synthesis collaborators
//! - A streaming relay that turns generated tokens into ordered speech
//! - A playback engine that schedules raw PCM gaplessly as it arrives
//! - The HTTP boundary between clients and providers, and a client for it
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  Client: capture → AssistantClient → PlaybackEngine  │
//! └───────────────────────────┬──────────────────────────┘
//!                             │ multipart turn / PCM body
//! ┌───────────────────────────▼──────────────────────────┐
//! │  Server: Transcriber → ResponseGenerator → Relay     │
//! └───────────────────────────┬──────────────────────────┘
//!                             │
//! ┌───────────────────────────▼──────────────────────────┐
//! │  Providers: Groq / OpenAI / Deepgram / Cartesia      │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod conversation;
pub mod error;
pub mod llm;
pub mod relay;
pub mod voice;

pub use api::{ApiServer, ApiServerBuilder, ApiState};
pub use client::{AssistantClient, TurnOutcome, TurnResponse, VoiceSession};
pub use config::Config;
pub use conversation::{ConversationHistory, Message, Role, TurnInput};
pub use error::{Error, Result};
pub use llm::{ChatCompletions, ResponseGenerator, TextChunk, TextStream};
pub use relay::{ChunkBatcher, FlushPolicy, RelayReport, StreamingRelay, SynthesisContext};
