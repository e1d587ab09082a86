//! Voice processing module
//!
//! Handles audio capture, utterance segmentation, transcription, synthesis,
//! voice cloning and streamed playback.

mod capture;
mod clone;
mod output;
pub mod playback;
mod segmenter;
pub mod stt;
mod tts;

pub use capture::{
    AudioCapture, AudioClip, PushToTalk, RecordingOutcome, SAMPLE_RATE, TOO_SHORT_NOTICE,
    finish_recording, samples_to_wav,
};
pub use clone::{CartesiaCloner, VoiceCloner};
pub use output::CpalSink;
pub use playback::{
    AudioSink, PcmDecoder, PlaybackClock, PlaybackEngine, PlaybackState, PlaybackSummary,
    PlaybackUnit, StopHandle, StopSignal, stop_pair,
};
pub use segmenter::{SegmenterState, SpeechSegmenter};
pub use stt::{Deepgram, Transcriber, Whisper};
pub use tts::{AudioByteStream, CARTESIA_BASE_URL, CartesiaTts, ChunkRequest, Synthesizer};
