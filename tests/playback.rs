//! Playback engine integration tests

mod common;

use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use futures::stream;

use common::{RecordingSink, to_pcm};
use swift_voice::voice::{PlaybackEngine, PlaybackState, stop_pair};

const RATE: u32 = 100;

fn engine() -> PlaybackEngine<RecordingSink> {
    PlaybackEngine::new(RecordingSink::default(), RATE).unwrap()
}

fn ramp(n: usize) -> Vec<f32> {
    (0..n).map(|i| i as f32 / 10.0).collect()
}

fn feed_all(engine: &mut PlaybackEngine<RecordingSink>, pieces: &[&[u8]]) {
    engine.begin();
    for piece in pieces {
        engine.feed(piece).unwrap();
    }
}

#[test]
fn test_chunking_does_not_change_samples() {
    let samples = ramp(37);
    let pcm = to_pcm(&samples);

    let mut whole = engine();
    feed_all(&mut whole, &[&pcm]);

    let mut bytewise = engine();
    let singles: Vec<&[u8]> = pcm.chunks(1).collect();
    feed_all(&mut bytewise, &singles);

    // three non-aligned pieces
    let mut split = engine();
    feed_all(&mut split, &[&pcm[..5], &pcm[5..70], &pcm[70..]]);

    assert_eq!(whole.sink().samples(), samples);
    assert_eq!(bytewise.sink().samples(), samples);
    assert_eq!(split.sink().samples(), samples);
    assert_eq!(bytewise.sink().units.len(), 37);
    assert_eq!(split.sink().units.len(), 3);
}

#[test]
fn test_scheduled_duration_matches_valid_bytes() {
    let mut pcm = to_pcm(&ramp(50));
    pcm.extend_from_slice(&[1, 2, 3]);

    let mut engine = engine();
    feed_all(&mut engine, &[&pcm[..9], &pcm[9..101], &pcm[101..]]);
    let summary = engine.finish();

    let total: f64 = engine
        .sink()
        .units
        .iter()
        .map(|u| u.duration(RATE))
        .sum();
    let expected = (pcm.len() / 4) as f64 / f64::from(RATE);
    assert!((total - expected).abs() < 1e-9);
    assert!((summary.scheduled_secs - expected).abs() < 1e-9);
    assert_eq!(summary.samples, 50);
    assert_eq!(summary.discarded_bytes, 3);
}

#[test]
fn test_units_are_back_to_back_and_monotonic() {
    let pcm = to_pcm(&ramp(40));
    let mut engine = engine();
    feed_all(&mut engine, &[&pcm[..40], &pcm[40..80], &pcm[80..120], &pcm[120..]]);

    let units = &engine.sink().units;
    assert_eq!(units[0].start, 0.0);
    for pair in units.windows(2) {
        let end = pair[0].start + pair[0].duration(RATE);
        assert!(pair[1].start >= pair[0].start);
        assert!((pair[1].start - end).abs() < 1e-9);
    }
}

#[test]
fn test_late_chunk_starts_at_current_time() {
    let mut engine = engine();
    engine.begin();
    engine.feed(&to_pcm(&ramp(10))).unwrap();

    // output ran dry before the next chunk arrived
    engine.sink().clock.set(2.0);
    let start = engine.feed(&to_pcm(&ramp(10))).unwrap();

    assert_eq!(start, Some(2.0));
    assert!((engine.clock().cursor() - 2.1).abs() < 1e-9);
}

#[test]
fn test_one_reset_per_cancel() {
    let mut engine = engine();
    let pcm = to_pcm(&ramp(20));

    for turn in 1..=3 {
        engine.begin();
        engine.feed(&pcm).unwrap();
        engine.cancel();
        assert_eq!(engine.clock().resets(), turn);
        assert_eq!(engine.sink().stops, turn as usize);
        engine.finish();
    }
}

#[test]
fn test_new_stream_after_finish_does_not_reset() {
    let mut engine = engine();
    let pcm = to_pcm(&ramp(20));

    feed_all(&mut engine, &[&pcm]);
    engine.finish();
    feed_all(&mut engine, &[&pcm]);

    assert_eq!(engine.clock().resets(), 0);
    // second stream queues behind the first
    assert!((engine.sink().units[1].start - 0.2).abs() < 1e-9);
}

#[test]
fn test_cancel_then_new_turn_has_no_overlap() {
    let mut engine = engine();
    engine.begin();
    engine.feed(&to_pcm(&ramp(100))).unwrap();
    assert!((engine.pending_secs() - 1.0).abs() < 1e-9);

    engine.sink().clock.set(0.3);
    engine.cancel();
    assert_eq!(engine.state(), PlaybackState::Cancelled);
    assert_eq!(engine.pending_secs(), 0.0);

    engine.begin();
    let start = engine.feed(&to_pcm(&ramp(10))).unwrap().unwrap();

    assert!(start >= 0.3);
    // only the new turn's audio is left on the output
    assert_eq!(engine.sink().units.len(), 1);
    assert_eq!(engine.sink().units[0].samples, ramp(10));
}

#[test]
fn test_begin_while_streaming_cuts_over() {
    let mut engine = engine();
    engine.begin();
    engine.feed(&to_pcm(&ramp(50))).unwrap();

    engine.begin();
    assert_eq!(engine.sink().stops, 1);
    assert_eq!(engine.clock().resets(), 1);
    assert_eq!(engine.state(), PlaybackState::Streaming);
}

fn byte_stream(pieces: Vec<Vec<u8>>) -> Vec<swift_voice::Result<Bytes>> {
    pieces.into_iter().map(|p| Ok(Bytes::from(p))).collect()
}

#[tokio::test]
async fn test_play_runs_stream_to_end() {
    let pcm = to_pcm(&ramp(30));
    let pieces = vec![pcm[..7].to_vec(), pcm[7..64].to_vec(), pcm[64..].to_vec()];

    let mut engine = engine();
    let (_handle, signal) = stop_pair();
    let summary = engine
        .play(stream::iter(byte_stream(pieces)).boxed(), signal)
        .await
        .unwrap();

    assert_eq!(summary.samples, 30);
    assert!(!summary.cancelled);
    assert_eq!(summary.first_start, Some(0.0));
    assert_eq!(engine.state(), PlaybackState::Idle);
    assert_eq!(engine.sink().samples(), ramp(30));
}

#[tokio::test]
async fn test_play_stops_when_signalled() {
    let first = byte_stream(vec![to_pcm(&ramp(10))]);
    let endless = stream::iter(first).chain(stream::pending()).boxed();

    let mut engine = engine();
    let (handle, signal) = stop_pair();
    let (summary, ()) = tokio::join!(engine.play(endless, signal), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.stop();
    });
    let summary = summary.unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.units, 1);
    assert_eq!(engine.sink().stops, 1);
    assert!(engine.sink().units.is_empty());
}

#[tokio::test]
async fn test_play_with_stopped_signal_schedules_nothing() {
    let mut engine = engine();
    let (handle, signal) = stop_pair();
    handle.stop();

    let summary = engine
        .play(
            stream::iter(byte_stream(vec![to_pcm(&ramp(10))])).boxed(),
            signal,
        )
        .await
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.units, 0);
}

#[tokio::test]
async fn test_play_surfaces_stream_errors() {
    let mut items = byte_stream(vec![to_pcm(&ramp(10))]);
    items.push(Err(swift_voice::Error::Relay("connection reset".to_string())));

    let mut engine = engine();
    let (_handle, signal) = stop_pair();
    let result = engine.play(stream::iter(items).boxed(), signal).await;

    assert!(result.is_err());
    // audio that already arrived keeps playing
    assert_eq!(engine.sink().units.len(), 1);
    assert_eq!(engine.state(), PlaybackState::Idle);
}

#[test]
fn test_manual_clock_drives_pending_time() {
    tokio_test::block_on(async {
        let mut engine = engine();
        let (_handle, signal) = stop_pair();
        engine
            .play(
                stream::iter(byte_stream(vec![to_pcm(&ramp(50))])).boxed(),
                signal,
            )
            .await
            .unwrap();

        assert!((engine.pending_secs() - 0.5).abs() < 1e-9);
        engine.sink().clock.set(0.4);
        assert!((engine.pending_secs() - 0.1).abs() < 1e-9);
        engine.sink().clock.set(1.0);
        assert_eq!(engine.pending_secs(), 0.0);
    });
}
