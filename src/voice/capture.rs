//! Audio capture from microphone

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};

use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Shown when a press-to-talk hold is released too early
pub const TOO_SHORT_NOTICE: &str = "Too short. Keep recording for at least half a second.";

/// Encoded audio ready for transcription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub bytes: Bytes,
    /// MIME type of `bytes`, e.g. `audio/wav`
    pub mime: String,
}

impl AudioClip {
    #[must_use]
    pub fn new(bytes: impl Into<Bytes>, mime: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            mime: mime.into(),
        }
    }

    /// Encode mono samples as a 16-bit WAV clip
    ///
    /// # Errors
    ///
    /// Returns error if WAV encoding fails
    pub fn wav(samples: &[f32], sample_rate: u32) -> Result<Self> {
        Ok(Self::new(samples_to_wav(samples, sample_rate)?, "audio/wav"))
    }

    /// Upload file name with an extension matching the MIME type
    #[must_use]
    pub fn file_name(&self) -> &'static str {
        let essence = self.mime.split(';').next().unwrap_or_default().trim();
        match essence {
            "audio/webm" | "video/webm" => "audio.webm",
            "audio/ogg" => "audio.ogg",
            "audio/mpeg" | "audio/mp3" => "audio.mp3",
            "audio/mp4" | "audio/m4a" | "audio/x-m4a" => "audio.m4a",
            "audio/flac" => "audio.flac",
            _ => "audio.wav",
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Result of releasing a press-to-talk hold
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingOutcome {
    /// Long enough to submit
    Clip(AudioClip),
    /// Released before the minimum hold; nothing is submitted
    TooShort { held: Duration },
}

/// Turn a finished hold into a submittable clip, or reject it as too short
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn finish_recording(
    samples: &[f32],
    sample_rate: u32,
    held: Duration,
    min_hold: Duration,
) -> Result<RecordingOutcome> {
    if held < min_hold || samples.is_empty() {
        tracing::debug!(held_ms = held.as_millis(), "recording too short");
        return Ok(RecordingOutcome::TooShort { held });
    }

    tracing::debug!(
        held_ms = held.as_millis(),
        samples = samples.len(),
        "recording finished"
    );
    Ok(RecordingOutcome::Clip(AudioClip::wav(samples, sample_rate)?))
}

/// Captures audio from the default input device
pub struct AudioCapture {
    config: StreamConfig,
    buffer: Arc<Mutex<Vec<f32>>>,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Create a new audio capture instance
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let supports = |c: &cpal::SupportedStreamConfigRange, channels: u16| {
            c.channels() == channels
                && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        };

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| supports(c, 1))
            .or_else(|| {
                // Fallback: stereo, downmixed in the callback
                device
                    .supported_input_configs()
                    .ok()?
                    .find(|c| supports(c, 2))
            })
            .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = %device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            channels = config.channels,
            "audio capture initialized"
        );

        Ok(Self {
            config,
            buffer: Arc::new(Mutex::new(Vec::new())),
            stream: None,
        })
    }

    /// Start capturing audio
    ///
    /// # Errors
    ///
    /// Returns error if capture fails
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let buffer = Arc::clone(&self.buffer);
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device".to_string()))?;

        let channels = usize::from(self.config.channels);

        let stream = device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = buffer.lock() {
                        if channels == 1 {
                            buf.extend_from_slice(data);
                        } else {
                            #[allow(clippy::cast_precision_loss)]
                            buf.extend(
                                data.chunks(channels)
                                    .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
                            );
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    /// Stop capturing audio
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }

    /// Get captured audio buffer and clear it
    ///
    /// Returns the audio samples captured since last call
    #[must_use]
    pub fn take_buffer(&self) -> Vec<f32> {
        self.buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default()
    }

    /// Clear the audio buffer
    pub fn clear_buffer(&self) {
        if let Ok(mut buf) = self.buffer.lock() {
            buf.clear();
        }
    }

    /// Check if currently capturing
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    /// Get the sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}

/// Press-to-talk recorder: capture runs only while the hold is active
pub struct PushToTalk {
    capture: AudioCapture,
    min_hold: Duration,
    pressed_at: Option<Instant>,
}

impl PushToTalk {
    #[must_use]
    pub const fn new(capture: AudioCapture, min_hold: Duration) -> Self {
        Self {
            capture,
            min_hold,
            pressed_at: None,
        }
    }

    /// Begin a hold
    ///
    /// # Errors
    ///
    /// Returns error if capture cannot start
    pub fn press(&mut self) -> Result<()> {
        self.capture.clear_buffer();
        self.capture.start()?;
        self.pressed_at = Some(Instant::now());
        Ok(())
    }

    /// End the hold and decide whether the recording is usable
    ///
    /// # Errors
    ///
    /// Returns error if no hold is active or WAV encoding fails
    pub fn release(&mut self) -> Result<RecordingOutcome> {
        let pressed_at = self
            .pressed_at
            .take()
            .ok_or_else(|| Error::Audio("release without press".to_string()))?;
        self.capture.stop();

        let samples = self.capture.take_buffer();
        finish_recording(
            &samples,
            self.capture.sample_rate(),
            pressed_at.elapsed(),
            self.min_hold,
        )
    }

    #[must_use]
    pub const fn is_recording(&self) -> bool {
        self.pressed_at.is_some()
    }
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN_HOLD: Duration = Duration::from_millis(500);

    #[test]
    fn test_short_hold_is_rejected() {
        let outcome =
            finish_recording(&[0.1; 160], SAMPLE_RATE, Duration::from_millis(300), MIN_HOLD)
                .unwrap();
        assert_eq!(
            outcome,
            RecordingOutcome::TooShort {
                held: Duration::from_millis(300)
            }
        );
    }

    #[test]
    fn test_long_hold_produces_wav() {
        let outcome =
            finish_recording(&[0.1; 160], SAMPLE_RATE, Duration::from_millis(800), MIN_HOLD)
                .unwrap();
        let RecordingOutcome::Clip(clip) = outcome else {
            panic!("expected a clip");
        };
        assert_eq!(clip.mime, "audio/wav");
        assert_eq!(&clip.bytes[..4], b"RIFF");
        // 44-byte header plus two bytes per sample
        assert_eq!(clip.bytes.len(), 44 + 320);
    }

    #[test]
    fn test_silent_capture_is_too_short() {
        let outcome =
            finish_recording(&[], SAMPLE_RATE, Duration::from_secs(2), MIN_HOLD).unwrap();
        assert!(matches!(outcome, RecordingOutcome::TooShort { .. }));
    }

    #[test]
    fn test_file_name_follows_mime() {
        assert_eq!(AudioClip::new(Vec::new(), "audio/webm;codecs=opus").file_name(), "audio.webm");
        assert_eq!(AudioClip::new(Vec::new(), "audio/wav").file_name(), "audio.wav");
        assert_eq!(AudioClip::new(Vec::new(), "application/octet-stream").file_name(), "audio.wav");
    }

    #[test]
    fn test_wav_roundtrip_with_hound() {
        let wav = samples_to_wav(&[0.0, 0.5, -0.5], 16_000).unwrap();
        let reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16_000);
        assert_eq!(reader.len(), 3);
    }
}
