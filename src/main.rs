use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use wakeline::audio::AudioCapture;
use wakeline::exec::{CapabilityProbe, ExecutionPlanner};
use wakeline::inference::onnx::OnnxBackend;
use wakeline::{App, Config, SessionEvent};

/// Wakeline - always-listening wake word pipeline
#[derive(Parser)]
#[command(name = "wakeline", version, about)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "WAKELINE_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the model files
    #[arg(short, long, env = "WAKELINE_MODEL_DIR")]
    model_dir: Option<PathBuf>,

    /// Wake detection threshold (0.0 to 1.0)
    #[arg(short, long)]
    threshold: Option<f32>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the always-listening pipeline (default)
    Run,
    /// Probe host capabilities and print the planned execution chain
    Probe,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Write the captured audio to a WAV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,wakeline=info",
        1 => "info,wakeline=debug",
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

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(Command::Probe) = cli.command {
        return probe().await;
    }
    if let Some(Command::TestMic { duration, output }) = cli.command {
        return test_mic(duration, output);
    }

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    if let Some(model_dir) = cli.model_dir {
        config.model_dir = Some(model_dir);
    }

    let backend = Arc::new(OnnxBackend::new());
    let mut app = App::initialize(config, backend).await?;
    if let Some(threshold) = cli.threshold {
        app.set_threshold(threshold);
    }

    // Print session events as they happen
    let mut events = app.events().subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SessionEvent::StateChanged { old, new } => {
                    println!("session: {old} -> {new}");
                }
                SessionEvent::WakeDetected { score } => {
                    println!("wake word detected (score {:.3})", score.value);
                }
                SessionEvent::SpeechStart => println!("speech started"),
                SessionEvent::SpeechEnd => println!("speech ended"),
                SessionEvent::WakeScore(_) => {}
            }
        }
    });

    let mut capture = AudioCapture::new()?;
    capture.start()?;
    app.start();
    tracing::info!("listening (ctrl-c to stop)");

    let mut poll = tokio::time::interval(Duration::from_millis(10));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
            _ = poll.tick() => {
                while let Some(frame) = capture.next_frame(app.required_frame_samples()) {
                    app.process_frame(&frame).await?;
                }
            }
        }
    }

    capture.stop();
    app.stop();
    Ok(())
}

async fn probe() -> anyhow::Result<()> {
    let caps = CapabilityProbe::detect().await;
    let planner = ExecutionPlanner::plan(&caps);
    let report = serde_json::json!({
        "capabilities": caps,
        "chain": planner.chain(),
        "selected": planner.current(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn test_mic(duration: u64, output: Option<PathBuf>) -> anyhow::Result<()> {
    let mut capture = AudioCapture::new()?;
    capture.start()?;
    println!("recording for {duration}s...");

    let deadline = std::time::Instant::now() + Duration::from_secs(duration);
    let mut peak: f32 = 0.0;
    let mut recorded = Vec::new();
    let mut frames = 0usize;
    while std::time::Instant::now() < deadline {
        if let Some(frame) = capture.next_frame(wakeline::audio::WAKE_FRAME_SAMPLES) {
            peak = peak.max(frame.rms());
            recorded.extend_from_slice(frame.samples());
            frames += 1;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    capture.stop();

    println!("captured {frames} frames, peak RMS {peak:.4}");
    if frames == 0 {
        anyhow::bail!("no audio captured, check the input device");
    }
    if let Some(path) = output {
        let wav = wakeline::audio::samples_to_wav(&recorded, wakeline::audio::SAMPLE_RATE)?;
        std::fs::write(&path, wav)?;
        println!("wrote {}", path.display());
    }
    Ok(())
}
