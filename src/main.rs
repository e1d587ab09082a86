use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use bytes::Bytes;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use swift_voice::voice::{
    AudioCapture, AudioClip, CpalSink, PlaybackEngine, PushToTalk, RecordingOutcome, SAMPLE_RATE,
    SegmenterState, SpeechSegmenter, TOO_SHORT_NOTICE, stop_pair,
};
use swift_voice::{
    ApiServerBuilder, AssistantClient, Config, Error, TurnInput, TurnOutcome, VoiceSession,
};

/// How often the microphone is polled in continuous mode
const LISTEN_TICK: Duration = Duration::from_millis(100);

/// Threshold multiplier while a reply plays, so our own audio doesn't interrupt it
const BARGE_IN_FACTOR: f32 = 3.0;

/// Swift - low-latency voice assistant
#[derive(Parser)]
#[command(name = "swift", version, about)]
struct Cli {
    /// Port for the HTTP server
    #[arg(long, env = "SWIFT_PORT")]
    port: Option<u16>,

    /// Server to talk to (client commands)
    #[arg(long, env = "SWIFT_SERVER_URL")]
    server: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Talk to the assistant through the microphone
    Talk {
        /// Detect turns automatically instead of press-to-talk
        #[arg(long)]
        continuous: bool,
        /// Stream the reply as it is generated
        #[arg(long)]
        stream: bool,
    },
    /// Send one typed message and play the reply
    Ask {
        text: String,
        /// Stream the reply as it is generated
        #[arg(long)]
        stream: bool,
    },
    /// Create a new voice from an audio sample
    CloneVoice {
        /// Audio file (wav, webm, mp3, ...)
        file: std::path::PathBuf,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,swift_voice=info",
        1 => "info,swift_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(server) = cli.server {
        config.client.server_url = server.trim_end_matches('/').to_string();
    }
    tracing::debug!(?config, "loaded configuration");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&config).await,
        Command::Talk { continuous, stream } => {
            let mut session = open_session(&config, stream).await?;
            if continuous {
                talk_continuous(&mut session).await
            } else {
                talk_push_to_talk(&mut session, &config).await
            }
        }
        Command::Ask { text, stream } => {
            let mut session = open_session(&config, stream).await?;
            let result = session.run_turn(TurnInput::Text(text)).await;
            report(result);
            wait_for_playback(&session).await;
            Ok(())
        }
        Command::CloneVoice { file } => clone_voice(&config, &file).await,
        Command::TestMic { duration } => test_mic(duration).await,
        Command::TestSpeaker => test_speaker(config.tts.sample_rate).await,
    }
}

async fn serve(config: &Config) -> anyhow::Result<()> {
    let server = ApiServerBuilder::from_config(config).build();
    let caps = swift_voice::api::health::Capabilities::of(&server.state());
    tracing::info!(?caps, "swift server ready");
    server.run().await?;
    Ok(())
}

/// Open a session playing at the rate the server synthesizes at
async fn open_session(
    config: &Config,
    streaming: bool,
) -> anyhow::Result<VoiceSession<CpalSink>> {
    let client = AssistantClient::new(config.client.server_url.clone());
    let sample_rate = match client.capabilities().await {
        Ok(caps) => caps.sample_rate.unwrap_or(config.tts.sample_rate),
        Err(e) => {
            tracing::warn!(error = %e, "capabilities unavailable, using configured sample rate");
            config.tts.sample_rate
        }
    };

    let sink = CpalSink::new(sample_rate)?;
    let engine = PlaybackEngine::new(sink, sample_rate)?;
    tracing::info!(server = client.base_url(), streaming, sample_rate, "session opened");
    Ok(VoiceSession::new(client, engine, streaming))
}

/// Print a turn's result; failures only end the turn, never the session
fn report(result: swift_voice::Result<TurnOutcome>) {
    match result {
        Ok(outcome) => {
            println!("you:   {}", outcome.transcript);
            if let Some(reply) = &outcome.response {
                println!("swift: {reply}");
            }
            println!("       ({} ms)", outcome.latency.as_millis());
        }
        Err(Error::RateLimited) => println!("Too many requests. Please try again later."),
        Err(Error::Api { message, .. }) => println!("{message}"),
        Err(e) => {
            tracing::warn!(error = %e, "turn failed");
            println!("Something went wrong: {e}");
        }
    }
}

async fn wait_for_playback<S: swift_voice::voice::AudioSink>(session: &VoiceSession<S>) {
    let remaining = Duration::from_secs_f64(session.pending_secs());
    tokio::select! {
        () = tokio::time::sleep(remaining) => {}
        _ = tokio::signal::ctrl_c() => {}
    }
}

/// Enter starts a recording, Enter again sends it
#[allow(clippy::future_not_send)]
async fn talk_push_to_talk(
    session: &mut VoiceSession<CpalSink>,
    config: &Config,
) -> anyhow::Result<()> {
    let mut recorder = PushToTalk::new(AudioCapture::new()?, config.client.min_hold);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        println!("Press Enter to talk (Ctrl-D to quit)");
        if lines.next_line().await?.is_none() {
            break;
        }

        session.interrupt();
        recorder.press()?;
        println!("Recording... press Enter to send");
        if lines.next_line().await?.is_none() {
            break;
        }

        match recorder.release()? {
            RecordingOutcome::TooShort { .. } => println!("{TOO_SHORT_NOTICE}"),
            RecordingOutcome::Clip(clip) => report(session.run_turn(TurnInput::Audio(clip)).await),
        }
    }

    session.interrupt();
    Ok(())
}

/// Listen continuously; each utterance becomes a turn and speaking over the reply cuts it off
#[allow(clippy::future_not_send)]
async fn talk_continuous(session: &mut VoiceSession<CpalSink>) -> anyhow::Result<()> {
    let mut capture = AudioCapture::new()?;
    let mut segmenter = SpeechSegmenter::default();
    capture.start()?;
    println!("Listening... speak naturally (Ctrl-C to quit)");

    let listening = segmenter.threshold();
    let mut tick = tokio::time::interval(LISTEN_TICK);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = tick.tick() => {}
        }

        let Some(utterance) = segmenter.process(&capture.take_buffer()) else {
            continue;
        };

        let clip = AudioClip::wav(&utterance, SAMPLE_RATE)?;
        report(session.run_turn(TurnInput::Audio(clip)).await);

        // audio heard while waiting on the reply is stale
        capture.clear_buffer();
        segmenter.set_threshold(listening * BARGE_IN_FACTOR);
        let played = tokio::select! {
            interrupted = session.play_out(LISTEN_TICK, || {
                segmenter.process(&capture.take_buffer());
                segmenter.state() == SegmenterState::Speaking
            }) => Some(interrupted),
            _ = tokio::signal::ctrl_c() => None,
        };
        segmenter.set_threshold(listening);

        match played {
            None => break,
            Some(true) => println!("(interrupted)"),
            Some(false) => {}
        }
    }

    capture.stop();
    session.interrupt();
    Ok(())
}

async fn clone_voice(config: &Config, file: &Path) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(file).await?;
    let mime = match file.extension().and_then(|e| e.to_str()) {
        Some("webm") => "audio/webm",
        Some("ogg") => "audio/ogg",
        Some("mp3") => "audio/mpeg",
        Some("m4a") => "audio/mp4",
        Some("flac") => "audio/flac",
        _ => "audio/wav",
    };

    let client = AssistantClient::new(config.client.server_url.clone());
    let voice_id = client.clone_voice(AudioClip::new(bytes, mime)).await?;

    println!("Cloned voice: {voice_id}");
    println!("Use it with SWIFT_TTS_VOICE={voice_id}");
    Ok(())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new()?;
    capture.start()?;

    println!("Sample rate: {} Hz", capture.sample_rate());
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.take_buffer();
        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine wave streamed in uneven pieces
#[allow(clippy::future_not_send)]
async fn test_speaker(sample_rate: u32) -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let frequency = 440.0_f32;
    #[allow(clippy::cast_precision_loss)]
    let pcm: Vec<u8> = (0..sample_rate * 2)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .flat_map(f32::to_le_bytes)
        .collect();

    // odd-sized pieces so samples straddle chunk boundaries
    let pieces: Vec<swift_voice::Result<Bytes>> = pcm
        .chunks(4093)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();

    let mut engine = PlaybackEngine::new(CpalSink::new(sample_rate)?, sample_rate)?;
    let (_stop, signal) = stop_pair();
    let summary = engine.play(futures::stream::iter(pieces).boxed(), signal).await?;

    println!(
        "Scheduled {} units, {:.2}s of audio at {sample_rate} Hz...",
        summary.units, summary.scheduled_secs
    );
    tokio::time::sleep(Duration::from_secs_f64(engine.pending_secs() + 0.2)).await;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}
