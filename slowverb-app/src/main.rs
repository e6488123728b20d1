//! slowverb - slowed + reverb playground
//!
//! Renders a song with reduced playback speed and convolution reverb, or plays
//! it live while the effect is tuned from the console.

mod console;

use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::Context;
use clap::{Parser, Subcommand};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::Receiver;
use tracing_subscriber::EnvFilter;

use slowverb_audio::{
    ArtifactStore, ArtifactUrl, EffectParameters, LiveRenderer, ParamKind, RenderJob, SampleFormat,
    SessionCommand, SessionConfig, SessionEvent, SessionHandle, SessionSnapshot,
};
use slowverb_library::{Config, TrackLoader};

use console::{parse_line, ConsoleCommand, HELP};

/// Largest output callback handled in one pass when converting channel layouts
const MAX_CALLBACK_FRAMES: usize = 8192;

#[derive(Parser)]
#[command(name = "slowverb", version, about = "Slowed + reverb playground")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a file offline and save it as reverb-song.wav
    Render {
        /// Audio file to process
        input: PathBuf,
        /// Playback rate (0.6 - 1.0)
        #[arg(long)]
        rate: Option<f64>,
        /// Reverb wet level (0 - 1)
        #[arg(long)]
        wet: Option<f64>,
        /// Reverb decay in seconds (0.5 - 10)
        #[arg(long)]
        decay: Option<f64>,
        /// Reverb pre-delay in seconds (0 - 1)
        #[arg(long = "pre-delay")]
        pre_delay: Option<f64>,
        /// Folder to save into
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Write 32-bit float samples instead of 16-bit PCM
        #[arg(long)]
        float: bool,
    },
    /// Play a file live and tune the effect from the console
    Play {
        /// Audio file to play
        input: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = Config::load();

    match cli.command {
        Commands::Render {
            input,
            rate,
            wet,
            decay,
            pre_delay,
            output,
            float,
        } => {
            let mut params = config.effect_parameters();
            for (kind, value) in [
                (ParamKind::PlaybackRate, rate),
                (ParamKind::ReverbWet, wet),
                (ParamKind::ReverbDecay, decay),
                (ParamKind::ReverbPreDelay, pre_delay),
            ] {
                if let Some(value) = value {
                    params.set(kind, value)?;
                }
            }
            let format = if float {
                SampleFormat::Float32
            } else {
                SampleFormat::Pcm16
            };
            let folder = output_folder(output, &config);
            let path = render_file(&input, params, format, &folder)?;
            println!("{}", path.display());
            Ok(())
        }
        Commands::Play { input } => run_player(&input, &config),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("slowverb=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn output_folder(flag: Option<PathBuf>, config: &Config) -> PathBuf {
    flag.or_else(|| config.output_folder.clone())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Decode, render and save in one go
fn render_file(
    input: &Path,
    params: EffectParameters,
    format: SampleFormat,
    folder: &Path,
) -> anyhow::Result<PathBuf> {
    let source = TrackLoader::new()
        .load(input)
        .with_context(|| format!("failed to load {}", input.display()))?;

    let job = RenderJob::new(source, params).with_format(format);
    tracing::info!(
        rate = params.playback_rate,
        wet = params.reverb_wet,
        decay = params.reverb_decay,
        pre_delay = params.reverb_pre_delay,
        duration = job.duration(),
        "rendering"
    );
    let bytes = job.run()?;

    let store = ArtifactStore::new();
    let url = store.create(bytes);
    let saved = store.save(&url, folder);
    store.revoke(&url);
    Ok(saved?)
}

/// What the console shows, kept current by the event printer
#[derive(Default)]
struct ConsoleState {
    snapshot: Option<SessionSnapshot>,
    artifact: Option<ArtifactUrl>,
}

fn run_player(input: &Path, config: &Config) -> anyhow::Result<()> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .context("no audio output device found")?;
    let supported = device
        .default_output_config()
        .context("failed to get audio config")?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;

    let session_config = SessionConfig {
        live_sample_rate: sample_rate,
        params: config.effect_parameters(),
        debounce: config.debounce(),
        tick_interval: config.tick_interval(),
        ..SessionConfig::default()
    };
    let (mut handle, renderer) = SessionHandle::start(session_config)?;

    let stream = build_output_stream(&device, &supported.into(), channels, renderer)?;
    stream.play().context("failed to start audio")?;
    tracing::info!(sample_rate, channels, "audio output started");

    let state = Arc::new(Mutex::new(ConsoleState::default()));
    let printer = {
        let events = handle.events().clone();
        let state = state.clone();
        thread::spawn(move || print_events(events, state))
    };

    load_into(&handle, input);
    println!("{HELP}");

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let command = match parse_line(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                println!("{message}");
                continue;
            }
        };

        match command {
            ConsoleCommand::Session(cmd) => handle.send(cmd),
            ConsoleCommand::Load(path) => load_into(&handle, &path),
            ConsoleCommand::Save(folder) => {
                let url = state.lock().ok().and_then(|s| s.artifact.clone());
                match url {
                    Some(url) => {
                        let folder = output_folder(folder, config);
                        match handle.artifacts().save(&url, &folder) {
                            Ok(path) => println!("saved {}", path.display()),
                            Err(e) => println!("save failed: {e}"),
                        }
                    }
                    None => println!("nothing rendered yet, try 'render'"),
                }
            }
            ConsoleCommand::SaveConfig => {
                let params = state.lock().ok().and_then(|s| s.snapshot.as_ref().map(|s| s.params));
                let mut updated = config.clone();
                if let Some(params) = params {
                    updated.set_effect_parameters(&params);
                }
                match updated.save() {
                    Ok(()) => println!("settings saved to {}", Config::config_path().display()),
                    Err(e) => println!("could not save settings: {e}"),
                }
            }
            ConsoleCommand::Status => {
                let snapshot = state.lock().ok().and_then(|s| s.snapshot.clone());
                match snapshot {
                    Some(snapshot) => print_status(&snapshot),
                    None => println!("no state yet"),
                }
            }
            ConsoleCommand::Help => println!("{HELP}"),
            ConsoleCommand::Quit => break,
        }
    }

    handle.shutdown();
    drop(stream);
    let _ = printer.join();
    Ok(())
}

/// Decode on this thread and hand the result to the session
fn load_into(handle: &SessionHandle, path: &Path) {
    match TrackLoader::new().load(path) {
        Ok(source) => handle.send(SessionCommand::Load(source)),
        Err(e) => handle.send(SessionCommand::LoadFailed(format!("{}: {e}", path.display()))),
    }
}

fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    renderer: LiveRenderer,
) -> anyhow::Result<cpal::Stream> {
    // Pre-allocated so the callback never allocates
    let mut stereo_buffer = vec![0.0f32; MAX_CALLBACK_FRAMES * 2];

    let stream = device.build_output_stream(
        config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            if channels == 2 {
                renderer.process(data);
                return;
            }
            for chunk in data.chunks_mut(channels.max(1) * MAX_CALLBACK_FRAMES) {
                let frames = chunk.len() / channels.max(1);
                let stereo = &mut stereo_buffer[..frames * 2];
                renderer.process(stereo);
                for (frame, lr) in chunk.chunks_mut(channels.max(1)).zip(stereo.chunks(2)) {
                    if frame.len() == 1 {
                        frame[0] = (lr[0] + lr[1]) * 0.5;
                    } else {
                        frame[0] = lr[0];
                        frame[1] = lr[1];
                        frame[2..].fill(0.0);
                    }
                }
            }
        },
        |err| {
            tracing::error!(error = %err, "audio stream error");
        },
        None,
    )?;
    Ok(stream)
}

fn print_events(events: Receiver<SessionEvent>, state: Arc<Mutex<ConsoleState>>) {
    for event in events.iter() {
        match event {
            SessionEvent::StateUpdate(snapshot) => {
                if let Ok(mut state) = state.lock() {
                    state.artifact = snapshot.artifact.clone();
                    state.snapshot = Some(snapshot);
                }
            }
            SessionEvent::Loaded {
                metadata,
                native_duration,
                effective_length,
            } => {
                println!(
                    "loaded \"{}\" by {} ({}), {:.1}s, {:.1}s slowed",
                    metadata.title, metadata.artist, metadata.album, native_duration, effective_length
                );
            }
            SessionEvent::LoadFailed(reason) => println!("could not load: {reason}"),
            SessionEvent::SongOver => println!("song over"),
            SessionEvent::RenderStarted { duration } => println!("rendering {duration:.1}s..."),
            SessionEvent::RenderComplete(artifact) => {
                println!(
                    "render ready: {} ({} bytes, {:.1}s), 'save' to write it",
                    artifact.url,
                    artifact.size,
                    artifact.header.duration()
                );
            }
            SessionEvent::RenderFailed(reason) => println!("render failed: {reason}"),
            SessionEvent::ArtifactRevoked(url) => tracing::debug!(%url, "artifact revoked"),
            SessionEvent::Rejected { command, reason } => println!("{command}: {reason}"),
        }
    }
}

fn print_status(snapshot: &SessionSnapshot) {
    let playback = &snapshot.playback;
    let params = &snapshot.params;
    println!(
        "{} {:.0}/{:.0}s | rate {:.2} | wet {:.2} | decay {:.2}s | pre-delay {:.2}s{}{}",
        if playback.is_playing { "playing" } else { "stopped" },
        playback.position,
        playback.effective_length,
        params.playback_rate,
        params.reverb_wet,
        params.reverb_decay,
        params.reverb_pre_delay,
        if snapshot.rendering { " | rendering" } else { "" },
        if snapshot.loaded { "" } else { " | no song loaded" },
    );
}
