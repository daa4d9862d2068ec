use std::io::Write as _;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use ally_voice::audio::{CaptureSource, MicCapture, PlaybackSink, SpeakerSink, pcm};
use ally_voice::session::CaptureState;
use ally_voice::store::{self, ProfileRepo};
use ally_voice::transcript::Origin;
use ally_voice::{Config, SessionEvent, VoiceSessionClient, WsConnector};

/// Ally - push-to-talk voice client for the Kisan Ally farming assistant
#[derive(Parser)]
#[command(name = "ally", version, about)]
struct Cli {
    /// Assistant service websocket URL
    #[arg(long, env = "ALLY_SERVER_URL")]
    server_url: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Write the captured audio to a WAV file
        #[arg(short, long)]
        output: Option<std::path::PathBuf>,
    },
    /// Test speaker output
    TestSpeaker,
    /// Show the stored owner id
    Whoami,
    /// Clear the stored owner id so the service assigns a fresh one
    Forget,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,ally_voice=info",
        1 => "info,ally_voice=debug",
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
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration, output } => test_mic(duration, output.as_deref()).await,
            Command::TestSpeaker => test_speaker(),
            Command::Whoami => cmd_whoami(),
            Command::Forget => cmd_forget(),
        };
    }

    let mut config = Config::load()?;
    if let Some(url) = cli.server_url {
        config.server_url = url;
    }
    tracing::debug!(?config, "loaded configuration");

    let pool = store::init(&config.store_path())?;
    let profile = ProfileRepo::new(pool);

    let capture = MicCapture::new()?;
    let sink = SpeakerSink::new()?;

    let mut session = VoiceSessionClient::new(
        config,
        Box::new(WsConnector),
        profile,
        Box::new(capture),
        Box::new(sink),
    );

    println!("Kisan Ally voice client");
    println!("Press Enter to start recording, Enter again to send. Type 'q' to quit.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut status_tick = tokio::time::interval(Duration::from_millis(100));

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let input = line.trim();
                if matches!(input, "q" | "quit" | "exit") {
                    break;
                }
                handle_toggle(&mut session).await;
            }
            event = session.pump() => {
                if !render_event(&session, &event) {
                    break;
                }
            }
            _ = status_tick.tick() => {
                // Live status line while recording, redrawn in place
                if let Some(elapsed) = session.recording_elapsed() {
                    print!("\r  recording {elapsed:.1}s (press Enter to send) ");
                    let _ = std::io::stdout().flush();
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        }
    }

    session.teardown();
    println!("Goodbye!");
    Ok(())
}

/// Enter toggles between arming and finishing a recording
#[allow(clippy::future_not_send)]
async fn handle_toggle(session: &mut VoiceSessionClient) {
    if session.state().capture == CaptureState::Armed {
        // Move off the in-place status line before printing results
        println!();
        match session.stop_capture() {
            Ok(()) => print_last_entry(session),
            Err(e) => println!("  ({e})"),
        }
    } else {
        match session.start_capture().await {
            Ok(()) => print_last_entry(session),
            Err(e) => println!("  ({e})"),
        }
    }
}

/// Returns false when the loop should exit
fn render_event(session: &VoiceSessionClient, event: &SessionEvent) -> bool {
    match event {
        SessionEvent::TranscriptAppended => print_last_entry(session),
        SessionEvent::AssistantFragment(text) => {
            print!("{text} ");
            let _ = std::io::stdout().flush();
        }
        SessionEvent::TurnComplete => {
            println!("\n  (press Enter to reply)");
        }
        SessionEvent::RemoteError(message) => println!("  (service error: {message})"),
        SessionEvent::Disconnected => print_last_entry(session),
        SessionEvent::SpeechQueued | SessionEvent::Quiet => {}
    }
    true
}

fn print_last_entry(session: &VoiceSessionClient) {
    if let Some(entry) = session.transcript().entries().last() {
        let prefix = match entry.origin {
            Origin::User => "you",
            Origin::Assistant => "ally",
            Origin::System => "*",
        };
        println!("[{prefix}] {}", entry.text);
    }
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64, output: Option<&std::path::Path>) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = MicCapture::new()?;
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    capture.start(tx)?;

    let sample_rate = capture.sample_rate();
    println!("Sample rate: {sample_rate} Hz");
    println!("---");

    let mut recorded: Vec<f32> = Vec::new();

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let mut second: Vec<f32> = Vec::new();
        while let Ok(chunk) = rx.try_recv() {
            second.extend_from_slice(&chunk);
        }

        let energy = calculate_rms(&second);
        let peak = second.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );

        if output.is_some() {
            recorded.extend_from_slice(&second);
        }
    }

    capture.stop();

    if let Some(path) = output {
        let wav = pcm::samples_to_wav(&recorded, sample_rate)?;
        std::fs::write(path, wav)?;
        println!("\nWrote {} samples to {}", recorded.len(), path.display());
    }

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

/// Test speaker output with a sine wave
fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let mut sink = SpeakerSink::new()?;

    // 2 seconds of 440Hz sine at the playback rate
    let sample_rate = ally_voice::audio::PLAYBACK_SAMPLE_RATE;
    let frequency = 440.0_f32;
    let num_samples = (sample_rate * 2) as usize;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {sample_rate} Hz...", samples.len());
    sink.play(samples)?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    Ok(())
}

/// Show the stored owner id
fn cmd_whoami() -> anyhow::Result<()> {
    let config = Config::load()?;
    let pool = store::init(&config.store_path())?;
    let profile = ProfileRepo::new(pool);

    match profile.owner_id()? {
        Some(id) => println!("Owner id: {id}"),
        None => println!("No owner id stored yet; the service will assign one on first contact"),
    }
    Ok(())
}

/// Clear the stored owner id
fn cmd_forget() -> anyhow::Result<()> {
    let config = Config::load()?;
    let pool = store::init(&config.store_path())?;
    let profile = ProfileRepo::new(pool);

    profile.clear_owner_id()?;
    println!("Owner id cleared; the service will treat the next session as a new user");
    Ok(())
}
