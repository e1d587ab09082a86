//! Incremental playback of streamed raw PCM
//!
//! Bytes arrive in arbitrary network-sized pieces. The engine carries the
//! 0-3 bytes that do not complete a sample over to the next read, turns each
//! aligned block into one playback unit and schedules units back to back on
//! the sink's clock so playback is gapless however irregular the arrivals.
//!
//! State machine: `Idle -> Streaming -> (Draining | Cancelled) -> Idle`.

use std::sync::Arc;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::watch;

use crate::{Error, Result};

/// Size of one `f32` sample on the wire
pub const BYTES_PER_SAMPLE: usize = 4;

/// Destination for scheduled audio, owning the shared audio clock
pub trait AudioSink {
    /// Current time of the audio clock in seconds
    fn now(&self) -> f64;

    /// Queue a unit to start at `unit.start` on the audio clock
    ///
    /// # Errors
    ///
    /// Returns error if the output device rejects the unit
    fn schedule(&mut self, unit: PlaybackUnit) -> Result<()>;

    /// Drop every unit that has not finished playing. Never fails.
    fn stop_all(&mut self);
}

/// A block of mono samples scheduled at a point on the audio clock
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackUnit {
    /// Start time in seconds
    pub start: f64,
    pub samples: Vec<f32>,
}

impl PlaybackUnit {
    /// Duration in seconds at `sample_rate`
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self, sample_rate: u32) -> f64 {
        self.samples.len() as f64 / f64::from(sample_rate)
    }
}

/// Reassembles little-endian `f32` samples across arbitrary byte boundaries
#[derive(Debug, Default)]
pub struct PcmDecoder {
    leftover: Vec<u8>,
}

impl PcmDecoder {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            leftover: Vec::new(),
        }
    }

    /// Decode every complete sample available after appending `bytes`
    pub fn push(&mut self, bytes: &[u8]) -> Vec<f32> {
        let mut data = std::mem::take(&mut self.leftover);
        data.extend_from_slice(bytes);

        let aligned = data.len() - data.len() % BYTES_PER_SAMPLE;
        let samples = data[..aligned]
            .chunks_exact(BYTES_PER_SAMPLE)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        data.drain(..aligned);
        self.leftover = data;
        samples
    }

    /// Bytes waiting for the rest of their sample
    #[must_use]
    pub fn leftover(&self) -> usize {
        self.leftover.len()
    }

    /// Drop the incomplete trailing sample, returning how many bytes were dropped
    pub fn finish(&mut self) -> usize {
        let dropped = self.leftover.len();
        self.leftover.clear();
        dropped
    }
}

/// "Next available start time" cursor on the audio clock
///
/// Only ever advanced by reservations, except for explicit resets on
/// cancellation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackClock {
    cursor: f64,
    resets: u64,
}

impl PlaybackClock {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cursor: 0.0,
            resets: 0,
        }
    }

    /// Reserve `duration` seconds starting no earlier than `now`
    ///
    /// Returns the reserved start time; the cursor moves to its end.
    pub fn reserve(&mut self, now: f64, duration: f64) -> f64 {
        let start = self.cursor.max(now);
        self.cursor = start + duration;
        start
    }

    /// Move the cursor up to `now` if it fell behind
    pub fn catch_up(&mut self, now: f64) {
        self.cursor = self.cursor.max(now);
    }

    /// Forget all reservations
    pub fn reset(&mut self, now: f64) {
        self.cursor = now;
        self.resets += 1;
    }

    #[must_use]
    pub const fn cursor(&self) -> f64 {
        self.cursor
    }

    /// Number of resets so far
    #[must_use]
    pub const fn resets(&self) -> u64 {
        self.resets
    }
}

/// Lifecycle of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// No active stream
    Idle,
    /// Reading and scheduling bytes
    Streaming,
    /// Input finished, scheduled units still playing out
    Draining,
    /// Stopped externally; late bytes are ignored
    Cancelled,
}

/// Outcome of one stream
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackSummary {
    /// Units scheduled
    pub units: usize,
    /// Samples scheduled
    pub samples: usize,
    /// Sum of scheduled unit durations in seconds
    pub scheduled_secs: f64,
    /// Start time of the first unit
    pub first_start: Option<f64>,
    /// Trailing bytes that never formed a sample
    pub discarded_bytes: usize,
    pub cancelled: bool,
}

/// Requests that an in-flight stream stop
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }
}

/// Observed by the engine while streaming
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once stop is requested; never resolves if every handle is gone
    async fn stopped(&mut self) {
        if self.rx.wait_for(|stopped| *stopped).await.is_err() {
            futures::future::pending::<()>().await;
        }
    }
}

/// Create a connected stop handle and signal
#[must_use]
pub fn stop_pair() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx: Arc::new(tx) }, StopSignal { rx })
}

/// Schedules streamed PCM on an [`AudioSink`]
pub struct PlaybackEngine<S> {
    sink: S,
    sample_rate: u32,
    clock: PlaybackClock,
    decoder: PcmDecoder,
    state: PlaybackState,
    summary: PlaybackSummary,
}

impl<S: AudioSink> PlaybackEngine<S> {
    /// Create an engine for mono `f32` PCM at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns error if the sample rate is zero
    pub fn new(sink: S, sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(Error::Playback("sample rate must be non-zero".to_string()));
        }

        let mut clock = PlaybackClock::new();
        clock.catch_up(sink.now());

        Ok(Self {
            sink,
            sample_rate,
            clock,
            decoder: PcmDecoder::new(),
            state: PlaybackState::Idle,
            summary: PlaybackSummary::default(),
        })
    }

    /// Start a new stream, cutting over from any stream still in flight
    pub fn begin(&mut self) {
        if matches!(
            self.state,
            PlaybackState::Streaming | PlaybackState::Draining
        ) && self.pending_secs() > 0.0
        {
            self.cancel();
        }

        self.decoder = PcmDecoder::new();
        self.summary = PlaybackSummary::default();
        self.clock.catch_up(self.sink.now());
        self.state = PlaybackState::Streaming;
        tracing::trace!(cursor = self.clock.cursor(), "playback stream started");
    }

    /// Feed newly arrived bytes
    ///
    /// Returns the start time of the unit scheduled from them, if any.
    ///
    /// # Errors
    ///
    /// Returns error if no stream is active or the sink rejects the unit
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Option<f64>> {
        match self.state {
            PlaybackState::Streaming => {}
            PlaybackState::Cancelled => {
                tracing::trace!(bytes = bytes.len(), "ignoring bytes after cancel");
                return Ok(None);
            }
            PlaybackState::Idle | PlaybackState::Draining => {
                return Err(Error::Playback("no active stream".to_string()));
            }
        }

        let samples = self.decoder.push(bytes);
        if samples.is_empty() {
            return Ok(None);
        }

        let unit_len = samples.len();
        #[allow(clippy::cast_precision_loss)]
        let duration = unit_len as f64 / f64::from(self.sample_rate);
        let start = self.clock.reserve(self.sink.now(), duration);

        self.sink.schedule(PlaybackUnit { start, samples })?;

        self.summary.units += 1;
        self.summary.samples += unit_len;
        self.summary.scheduled_secs += duration;
        self.summary.first_start.get_or_insert(start);

        Ok(Some(start))
    }

    /// Mark end of input; scheduled units keep playing
    pub fn finish(&mut self) -> PlaybackSummary {
        if self.state == PlaybackState::Streaming {
            self.state = PlaybackState::Draining;
            let dropped = self.decoder.finish();
            if dropped > 0 {
                tracing::debug!(bytes = dropped, "discarding incomplete trailing sample");
            }
            self.summary.discarded_bytes = dropped;
        }

        tracing::debug!(
            units = self.summary.units,
            samples = self.summary.samples,
            secs = self.summary.scheduled_secs,
            cancelled = self.summary.cancelled,
            "playback stream finished"
        );
        self.state = PlaybackState::Idle;
        self.summary.clone()
    }

    /// Stop everything now and reset the clock
    pub fn cancel(&mut self) {
        self.sink.stop_all();
        self.decoder.finish();
        self.clock.reset(self.sink.now());
        self.summary.cancelled = true;
        self.state = PlaybackState::Cancelled;
        tracing::debug!(cursor = self.clock.cursor(), "playback cancelled");
    }

    /// Play a byte stream to completion or until `stop` fires
    ///
    /// # Errors
    ///
    /// Returns error if the byte stream fails or the sink rejects a unit.
    /// Units scheduled before the failure keep playing.
    pub async fn play<St>(&mut self, mut stream: St, mut stop: StopSignal) -> Result<PlaybackSummary>
    where
        St: Stream<Item = Result<Bytes>> + Unpin,
    {
        self.begin();

        if stop.is_stopped() {
            self.cancel();
            return Ok(self.finish());
        }

        loop {
            tokio::select! {
                biased;
                () = stop.stopped() => {
                    self.cancel();
                    return Ok(self.finish());
                }
                next = stream.next() => match next {
                    Some(Ok(bytes)) => {
                        if let Err(e) = self.feed(&bytes) {
                            self.finish();
                            return Err(e);
                        }
                    }
                    Some(Err(e)) => {
                        self.finish();
                        return Err(e);
                    }
                    None => return Ok(self.finish()),
                },
            }
        }
    }

    /// Seconds of scheduled audio not yet played
    #[must_use]
    pub fn pending_secs(&self) -> f64 {
        (self.clock.cursor() - self.sink.now()).max(0.0)
    }

    #[must_use]
    pub const fn state(&self) -> PlaybackState {
        self.state
    }

    #[must_use]
    pub const fn clock(&self) -> &PlaybackClock {
        &self.clock
    }

    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    pub const fn sink(&self) -> &S {
        &self.sink
    }

    pub const fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct NullSink {
        now: f64,
        units: Vec<PlaybackUnit>,
        stops: usize,
    }

    impl AudioSink for NullSink {
        fn now(&self) -> f64 {
            self.now
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

    fn pcm(samples: &[f32]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_decoder_carries_leftover() {
        let bytes = pcm(&[0.25, -0.5]);
        let mut decoder = PcmDecoder::new();

        assert!(decoder.push(&bytes[..3]).is_empty());
        assert_eq!(decoder.leftover(), 3);

        assert_eq!(decoder.push(&bytes[3..6]), vec![0.25]);
        assert_eq!(decoder.leftover(), 2);

        assert_eq!(decoder.push(&bytes[6..]), vec![-0.5]);
        assert_eq!(decoder.leftover(), 0);
    }

    #[test]
    fn test_decoder_finish_drops_partial() {
        let mut decoder = PcmDecoder::new();
        decoder.push(&[1, 2, 3, 4, 5]);
        assert_eq!(decoder.finish(), 1);
        assert_eq!(decoder.leftover(), 0);
    }

    #[test]
    fn test_clock_reserve_is_back_to_back() {
        let mut clock = PlaybackClock::new();
        assert!((clock.reserve(1.0, 0.5) - 1.0).abs() < f64::EPSILON);
        // still ahead of now, so the next unit follows immediately
        assert!((clock.reserve(1.2, 0.25) - 1.5).abs() < f64::EPSILON);
        // fell behind now, so the next unit starts at now
        assert!((clock.reserve(3.0, 0.1) - 3.0).abs() < f64::EPSILON);
        assert_eq!(clock.resets(), 0);
    }

    #[test]
    fn test_engine_rejects_zero_rate() {
        assert!(PlaybackEngine::new(NullSink::default(), 0).is_err());
    }

    #[test]
    fn test_feed_requires_active_stream() {
        let mut engine = PlaybackEngine::new(NullSink::default(), 4).unwrap();
        assert!(engine.feed(&pcm(&[0.0])).is_err());

        engine.begin();
        assert_eq!(engine.state(), PlaybackState::Streaming);
        assert_eq!(engine.feed(&pcm(&[0.0])).unwrap(), Some(0.0));
    }

    #[test]
    fn test_short_reads_schedule_nothing() {
        let mut engine = PlaybackEngine::new(NullSink::default(), 4).unwrap();
        engine.begin();
        assert_eq!(engine.feed(&[0, 0]).unwrap(), None);
        assert!(engine.sink().units.is_empty());
    }

    #[test]
    fn test_finish_discards_odd_bytes() {
        let mut engine = PlaybackEngine::new(NullSink::default(), 4).unwrap();
        engine.begin();
        let mut bytes = pcm(&[0.1, 0.2]);
        bytes.extend_from_slice(&[9, 9, 9]);
        engine.feed(&bytes).unwrap();

        let summary = engine.finish();
        assert_eq!(summary.samples, 2);
        assert_eq!(summary.discarded_bytes, 3);
        assert_eq!(engine.state(), PlaybackState::Idle);
    }

    #[test]
    fn test_cancel_ignores_late_bytes() {
        let mut engine = PlaybackEngine::new(NullSink::default(), 4).unwrap();
        engine.begin();
        engine.feed(&pcm(&[0.1; 8])).unwrap();

        engine.sink_mut().now = 0.5;
        engine.cancel();
        assert_eq!(engine.state(), PlaybackState::Cancelled);
        assert_eq!(engine.sink().stops, 1);
        assert!((engine.clock().cursor() - 0.5).abs() < f64::EPSILON);

        assert_eq!(engine.feed(&pcm(&[0.3; 4])).unwrap(), None);
        assert!(engine.sink().units.is_empty());

        let summary = engine.finish();
        assert!(summary.cancelled);
        assert_eq!(engine.state(), PlaybackState::Idle);
    }

    #[test]
    fn test_stop_signal_observes_handle() {
        let (handle, signal) = stop_pair();
        assert!(!signal.is_stopped());
        handle.stop();
        assert!(signal.is_stopped());
    }
}
