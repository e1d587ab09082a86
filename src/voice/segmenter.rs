//! Utterance segmentation for hands-free listening
//!
//! A plain energy detector: speech starts when a block's RMS crosses the
//! threshold and ends after enough trailing silence. Segments that are too
//! short are dropped as noise.

use super::capture::SAMPLE_RATE;

/// Minimum audio energy threshold to consider speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum duration of speech to emit (0.3 seconds at 16kHz)
const MIN_SPEECH_SAMPLES: usize = (SAMPLE_RATE as usize) * 3 / 10;

/// Silence that ends an utterance (0.8 seconds at 16kHz)
const SILENCE_SAMPLES: usize = (SAMPLE_RATE as usize) * 8 / 10;

/// Longest utterance kept before it is cut (30 seconds at 16kHz)
const MAX_UTTERANCE_SAMPLES: usize = (SAMPLE_RATE as usize) * 30;

/// State of the segmenter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    /// Waiting for speech
    Idle,
    /// Inside an utterance
    Speaking,
}

/// Splits a continuous capture into utterances
#[derive(Debug)]
pub struct SpeechSegmenter {
    threshold: f32,
    state: SegmenterState,
    speech_buffer: Vec<f32>,
    silence_counter: usize,
}

impl Default for SpeechSegmenter {
    fn default() -> Self {
        Self::new(ENERGY_THRESHOLD)
    }
}

impl SpeechSegmenter {
    #[must_use]
    pub const fn new(threshold: f32) -> Self {
        Self {
            threshold,
            state: SegmenterState::Idle,
            speech_buffer: Vec::new(),
            silence_counter: 0,
        }
    }

    /// Feed a block of samples
    ///
    /// Returns a finished utterance once speech is followed by enough silence.
    pub fn process(&mut self, samples: &[f32]) -> Option<Vec<f32>> {
        let energy = calculate_energy(samples);
        let is_speech = energy > self.threshold;

        match self.state {
            SegmenterState::Idle => {
                if is_speech {
                    self.state = SegmenterState::Speaking;
                    self.speech_buffer.clear();
                    self.speech_buffer.extend_from_slice(samples);
                    self.silence_counter = 0;
                    tracing::trace!(energy, "speech started");
                }
                None
            }
            SegmenterState::Speaking => {
                self.speech_buffer.extend_from_slice(samples);

                if is_speech {
                    self.silence_counter = 0;
                } else {
                    self.silence_counter += samples.len();
                }

                if self.speech_buffer.len() >= MAX_UTTERANCE_SAMPLES {
                    // steady noise above the threshold never goes quiet
                    let segment = std::mem::take(&mut self.speech_buffer);
                    self.reset();
                    tracing::debug!(samples = segment.len(), "utterance cut at maximum length");
                    return Some(segment);
                }

                if self.silence_counter <= SILENCE_SAMPLES {
                    return None;
                }

                let voiced = self.speech_buffer.len() - self.silence_counter;
                let segment = std::mem::take(&mut self.speech_buffer);
                self.reset();

                if voiced < MIN_SPEECH_SAMPLES {
                    tracing::trace!(samples = voiced, "discarding short noise burst");
                    return None;
                }

                tracing::debug!(samples = segment.len(), "utterance complete");
                Some(segment)
            }
        }
    }

    /// Energy a block must exceed to count as speech
    #[must_use]
    pub const fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Change the speech threshold without losing the current utterance
    pub const fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold;
    }

    /// Reset segmenter to idle state
    pub fn reset(&mut self) {
        self.state = SegmenterState::Idle;
        self.speech_buffer.clear();
        self.silence_counter = 0;
    }

    #[must_use]
    pub const fn state(&self) -> SegmenterState {
        self.state
    }
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK: usize = 1600;

    fn feed(segmenter: &mut SpeechSegmenter, level: f32, blocks: usize) -> Vec<Vec<f32>> {
        (0..blocks)
            .filter_map(|_| segmenter.process(&vec![level; BLOCK]))
            .collect()
    }

    #[test]
    fn test_energy_calculation() {
        assert!(calculate_energy(&[0.0; 100]) < 0.001);
        assert!(calculate_energy(&[0.5; 100]) > 0.4);
        assert!(calculate_energy(&[]).abs() < f32::EPSILON);
    }

    #[test]
    fn test_emits_after_trailing_silence() {
        let mut segmenter = SpeechSegmenter::default();

        assert!(feed(&mut segmenter, 0.0, 5).is_empty());
        assert!(feed(&mut segmenter, 0.2, 5).is_empty());
        assert_eq!(segmenter.state(), SegmenterState::Speaking);

        let segments = feed(&mut segmenter, 0.0, 10);
        assert_eq!(segments.len(), 1);
        assert!(segments[0].len() >= 5 * BLOCK);
        assert_eq!(segmenter.state(), SegmenterState::Idle);
    }

    #[test]
    fn test_endless_speech_is_cut_at_maximum() {
        let mut segmenter = SpeechSegmenter::default();
        let blocks = MAX_UTTERANCE_SAMPLES / BLOCK;

        let segments = feed(&mut segmenter, 0.2, blocks);
        assert_eq!(segments.len(), 1);
        assert!(segments[0].len() >= MAX_UTTERANCE_SAMPLES);
        assert!(segments[0].len() < MAX_UTTERANCE_SAMPLES + BLOCK);
        assert_eq!(segmenter.state(), SegmenterState::Idle);
    }

    #[test]
    fn test_raised_threshold_ignores_quiet_input() {
        let mut segmenter = SpeechSegmenter::default();
        segmenter.set_threshold(segmenter.threshold() * 10.0);

        feed(&mut segmenter, 0.2, 3);
        assert_eq!(segmenter.state(), SegmenterState::Idle);

        feed(&mut segmenter, 0.5, 1);
        assert_eq!(segmenter.state(), SegmenterState::Speaking);
    }

    #[test]
    fn test_short_burst_is_dropped() {
        let mut segmenter = SpeechSegmenter::default();
        feed(&mut segmenter, 0.2, 1);
        assert!(feed(&mut segmenter, 0.0, 10).is_empty());
        assert_eq!(segmenter.state(), SegmenterState::Idle);
    }
}
