//! Speaker output driven by a frame-counted timeline

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use super::playback::{AudioSink, PlaybackUnit};
use crate::{Error, Result};

#[derive(Debug)]
struct ScheduledUnit {
    start_frame: u64,
    samples: Vec<f32>,
    cursor: usize,
}

/// Units queued against the count of frames the device has consumed
#[derive(Debug, Default)]
struct Timeline {
    position: u64,
    units: VecDeque<ScheduledUnit>,
}

impl Timeline {
    /// Produce the sample for the next frame and advance the clock
    fn next_sample(&mut self) -> f32 {
        let frame = self.position;
        self.position += 1;

        while self
            .units
            .front()
            .is_some_and(|u| u.cursor >= u.samples.len())
        {
            self.units.pop_front();
        }

        match self.units.front_mut() {
            Some(unit) if frame >= unit.start_frame => {
                let sample = unit.samples[unit.cursor];
                unit.cursor += 1;
                sample
            }
            _ => 0.0,
        }
    }
}

/// Plays scheduled units on the default output device
///
/// The audio clock is the number of frames the device has pulled, so it only
/// advances while the stream runs.
pub struct CpalSink {
    _stream: cpal::Stream,
    timeline: Arc<Mutex<Timeline>>,
    sample_rate: u32,
}

impl CpalSink {
    /// Open the default output device at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new(sample_rate: u32) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supports = |c: &cpal::SupportedStreamConfigRange, channels: u16| {
            c.channels() == channels
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        };

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| supports(c, 1))
            .or_else(|| {
                // Fallback: duplicate mono onto stereo
                device
                    .supported_output_configs()
                    .ok()?
                    .find(|c| supports(c, 2))
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config: StreamConfig = supported_config
            .with_sample_rate(SampleRate(sample_rate))
            .config();
        let channels = usize::from(config.channels);

        let timeline = Arc::new(Mutex::new(Timeline::default()));
        let callback_timeline = Arc::clone(&timeline);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut timeline = callback_timeline
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);

                    for frame in data.chunks_mut(channels) {
                        let sample = timeline.next_sample();
                        frame.fill(sample);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        tracing::debug!(
            device = %device.name().unwrap_or_default(),
            sample_rate,
            channels,
            "audio output initialized"
        );

        Ok(Self {
            _stream: stream,
            timeline,
            sample_rate,
        })
    }

    fn timeline(&self) -> std::sync::MutexGuard<'_, Timeline> {
        self.timeline.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AudioSink for CpalSink {
    #[allow(clippy::cast_precision_loss)]
    fn now(&self) -> f64 {
        self.timeline().position as f64 / f64::from(self.sample_rate)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn schedule(&mut self, unit: PlaybackUnit) -> Result<()> {
        let start_frame = (unit.start * f64::from(self.sample_rate)).round().max(0.0) as u64;
        self.timeline().units.push_back(ScheduledUnit {
            start_frame,
            samples: unit.samples,
            cursor: 0,
        });
        Ok(())
    }

    fn stop_all(&mut self) {
        let mut timeline = self.timeline();
        let dropped = timeline.units.len();
        timeline.units.clear();
        tracing::trace!(units = dropped, "output queue cleared");
    }
}
