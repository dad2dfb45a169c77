use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use url::Url;

use aiva_client::session::{SessionController, SessionHandle};
use aiva_client::voice::{
    Microphone, MicrophoneOptions, OutputDevice, PLAYBACK_SAMPLE_RATE, SAMPLE_RATE, SpeakerOutput,
    SpeakerProvider, samples_to_wav,
};
use aiva_client::{Backends, CapturesClient, Config, FacingMode, SystemMedia, WsConnector};

/// Aiva - live camera and voice client for a multimodal AI assistant
#[derive(Parser)]
#[command(name = "aiva", version, about)]
struct Cli {
    /// Assistant service base URL (overrides config)
    #[arg(short, long)]
    server: Option<String>,

    /// Camera to start with: user or environment
    #[arg(long)]
    facing: Option<FacingMode>,

    /// Use a generated test pattern when no camera source is configured
    #[arg(long)]
    test_pattern: bool,

    /// Config file (default: ~/.config/aiva/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive session (default)
    Run {
        /// Start streaming immediately
        #[arg(long)]
        start: bool,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Save the recording as a WAV file
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Test speaker output
    TestSpeaker,
    /// List frames the assistant has saved
    Captures,
    /// Check the assistant service is up
    Health,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity; RUST_LOG wins when set
    let filter = match cli.verbose {
        0 => "info,aiva_client=info",
        1 => "info,aiva_client=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(server) = &cli.server {
        config.server_url = Url::parse(server)?;
    }
    if let Some(facing) = cli.facing {
        config.camera.facing = facing;
    }
    tracing::debug!(?config, "loaded configuration");

    match cli.command {
        None => interactive(&config, cli.test_pattern, false).await,
        Some(Command::Run { start }) => interactive(&config, cli.test_pattern, start).await,
        Some(Command::TestMic { duration, save }) => {
            test_mic(&config, duration, save.as_deref()).await
        }
        Some(Command::TestSpeaker) => test_speaker(&config).await,
        Some(Command::Captures) => list_captures(&config).await,
        Some(Command::Health) => health(&config).await,
    }
}

/// Drive a session from stdin commands
async fn interactive(config: &Config, test_pattern: bool, autostart: bool) -> anyhow::Result<()> {
    let options = config.session_options()?;
    let backends = Backends {
        media: Arc::new(
            SystemMedia::new(
                config.camera.front_source.clone(),
                config.camera.back_source.clone(),
                config.audio.input_device.clone(),
            )
            .with_test_pattern(test_pattern),
        ),
        connector: Arc::new(WsConnector),
        output: Arc::new(SpeakerProvider::new(config.audio.output_device.clone())),
    };

    tracing::info!(endpoint = %options.endpoint, facing = %options.facing, "aiva client ready");
    let session = SessionController::spawn(options, backends);
    tokio::spawn(print_status(session.clone()));

    println!("Commands: start | stop | switch | say <text> | status | quit");
    if autostart {
        start(&session).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                None
            }
        };
        let Some(line) = line else {
            break;
        };

        let line = line.trim();
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        match command {
            "" => {}
            "start" => start(&session).await,
            "stop" => session.stop().await,
            "switch" => {
                let facing = session.switch_camera().await?;
                println!("Camera: {facing}");
            }
            "say" if !rest.trim().is_empty() => {
                if let Err(e) = session.send_text(rest.trim()).await {
                    println!("Not sent: {e}");
                }
            }
            "status" => {
                let status = session.status();
                println!("{}", serde_json::to_string_pretty(&status)?);
            }
            "quit" | "exit" => break,
            other => println!("Unknown command: {other}"),
        }
    }

    session.stop().await;
    Ok(())
}

async fn start(session: &SessionHandle) {
    match session.start().await {
        Ok(()) => println!("Streaming. Say something!"),
        Err(e) => println!("Could not start: {e}"),
    }
}

/// Echo status line changes to stdout
async fn print_status(session: SessionHandle) {
    let mut status = session.subscribe();
    let mut last_line = String::new();
    while status.changed().await.is_ok() {
        let snapshot = status.borrow_and_update().clone();
        if snapshot.status_line != last_line {
            println!("[{:?}] {}", snapshot.state, snapshot.status_line);
            last_line = snapshot.status_line;
        }
    }
}

/// Test microphone input
async fn test_mic(
    config: &Config,
    duration: u64,
    save: Option<&std::path::Path>,
) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let (blocks_tx, mut blocks_rx) = mpsc::channel(64);
    let options = MicrophoneOptions {
        device_name: config.audio.input_device.clone(),
        ..MicrophoneOptions::default()
    };
    let mut microphone = Microphone::open(options, blocks_tx).await?;

    println!("Device: {}", microphone.device_name());
    println!("Sample rate: {SAMPLE_RATE} Hz");
    println!("---");

    let mut recording = Vec::new();
    for i in 0..duration {
        let mut second = Vec::new();
        let deadline = tokio::time::sleep(Duration::from_secs(1));
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                () = &mut deadline => break,
                block = blocks_rx.recv() => match block {
                    Some(block) => second.extend(block),
                    None => anyhow::bail!("microphone stopped delivering audio"),
                },
            }
        }

        let energy = calculate_rms(&second);
        let peak = second.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
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
        recording.extend(second);
    }

    microphone.stop();
    if microphone.dropped_blocks() > 0 {
        println!("Dropped {} blocks", microphone.dropped_blocks());
    }

    if let Some(path) = save {
        std::fs::write(path, samples_to_wav(&recording, SAMPLE_RATE)?)?;
        println!("Saved {} samples to {}", recording.len(), path.display());
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
async fn test_speaker(config: &Config) -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let output = SpeakerOutput::new(config.audio.output_device.clone());
    output.ensure_running().await?;

    let frequency = 440.0_f32;
    let num_samples = PLAYBACK_SAMPLE_RATE as usize * 2;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / PLAYBACK_SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {PLAYBACK_SAMPLE_RATE} Hz...", samples.len());
    output.render(samples, PLAYBACK_SAMPLE_RATE).await?;
    output.close()?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

/// Print the assistant's saved captures
async fn list_captures(config: &Config) -> anyhow::Result<()> {
    let client = CapturesClient::new(config.server_url.clone());
    let captures = client.list().await?;

    if captures.is_empty() {
        println!("No captures yet");
        return Ok(());
    }

    for capture in captures {
        println!(
            "{}  {:<24} {:>8} KB  {}",
            capture.timestamp.format("%Y-%m-%d %H:%M:%S"),
            capture.frame_id,
            capture.size_bytes / 1024,
            capture.description
        );
    }
    Ok(())
}

/// Probe the service health endpoint
async fn health(config: &Config) -> anyhow::Result<()> {
    let client = CapturesClient::new(config.server_url.clone());
    if client.health().await? {
        println!("{} is healthy", config.server_url);
        Ok(())
    } else {
        anyhow::bail!("{} reported unhealthy", config.server_url)
    }
}
