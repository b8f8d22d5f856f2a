use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand};

use visemix::{
    AudioBuffer, PipelineOpts, SAMPLE_RATE, ScheduleParams, SpriteSet, events_from_json,
    render_to_mp4, stub_alignment,
};

#[derive(Parser, Debug)]
#[command(name = "visemix", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render a lip-sync MP4 from phonemes + audio (requires `ffmpeg` on PATH).
    Render(RenderArgs),
    /// Render a short demo clip from a built-in alignment and a test tone.
    Demo(DemoArgs),
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// Phoneme alignment JSON (array of {symbol, start, end}).
    /// Omit to use the built-in placeholder alignment.
    #[arg(long)]
    phonemes: Option<PathBuf>,

    /// Input audio: mono 22050 Hz WAV (float32 or int16).
    #[arg(long)]
    audio: PathBuf,

    /// Directory of face sprites (REST.png/base.png plus optional overlays).
    #[arg(long)]
    sprites: PathBuf,

    /// Output MP4 path.
    #[arg(long)]
    out: PathBuf,

    /// Seed for blink and jitter; same seed, same video.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Fail instead of replacing an existing output file.
    #[arg(long)]
    no_overwrite: bool,
}

#[derive(Parser, Debug)]
struct DemoArgs {
    /// Directory of face sprites.
    #[arg(long)]
    sprites: PathBuf,

    /// Output MP4 path.
    #[arg(long)]
    out: PathBuf,

    /// Demo clip length in seconds.
    #[arg(long, default_value_t = 2.0)]
    secs: f64,

    /// Seed for blink and jitter.
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Render(args) => cmd_render(args),
        Command::Demo(args) => cmd_demo(args),
    }
}

fn cmd_render(args: RenderArgs) -> anyhow::Result<()> {
    let audio = AudioBuffer::from_wav_path(&args.audio)?;
    let events = match &args.phonemes {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("read phoneme alignment '{}'", path.display()))?;
            events_from_json(&json)?
        }
        None => stub_alignment(audio.duration_secs()),
    };
    let sprites = SpriteSet::load_dir(&args.sprites)?;

    let opts = PipelineOpts {
        schedule: ScheduleParams {
            seed: args.seed,
            ..Default::default()
        },
        overwrite: !args.no_overwrite,
        ..Default::default()
    };

    let report = render_to_mp4(&events, &audio, &sprites, &args.out, &opts)?;
    println!(
        "wrote {} ({} frames, {:.2}s, {}x{})",
        args.out.display(),
        report.frames,
        report.duration_secs,
        report.width,
        report.height
    );
    Ok(())
}

fn cmd_demo(args: DemoArgs) -> anyhow::Result<()> {
    anyhow::ensure!(
        args.secs.is_finite() && args.secs > 0.0,
        "demo length must be > 0 seconds"
    );

    let samples = (args.secs * f64::from(SAMPLE_RATE)) as usize;
    let tone: Vec<f32> = (0..samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            0.4 * (t * 220.0 * std::f32::consts::TAU).sin()
        })
        .collect();
    let audio = AudioBuffer::new(tone, SAMPLE_RATE)?;
    let events = stub_alignment(audio.duration_secs());
    let sprites = SpriteSet::load_dir(&args.sprites)?;

    let opts = PipelineOpts {
        schedule: ScheduleParams {
            seed: args.seed,
            ..Default::default()
        },
        ..Default::default()
    };

    let report = render_to_mp4(&events, &audio, &sprites, &args.out, &opts)?;
    println!(
        "wrote demo {} ({} frames, {:.2}s)",
        args.out.display(),
        report.frames,
        report.duration_secs
    );
    Ok(())
}
