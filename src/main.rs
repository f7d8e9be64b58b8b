mod tui;

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use crossterm::terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;

use procscore::audio::{self, OfflineBackend, SampleBuffer};
use procscore::audio_api::SignalBackend;
use procscore::middle::Middle;
use procscore::pipeline::pattern::{self, VoiceKind};
use procscore::pipeline::persistence::{self, PROCSCORE_DIR};
use procscore::pipeline::pulse::ThreadPulse;
use procscore::pipeline::transport::TransportState;
use procscore::pipeline::{Engine, EngineConfig, Player};
use procscore::shared::{InputEvent, TICKS_PER_BAR, Track};

const LOG_FILE: &str = "procscore.log";
const RENDER_RATE: u32 = 44_100;
const RENDER_TAIL: f64 = 2.0; // seconds of ring-out after the last bar
const QUIT_GRACE: Duration = Duration::from_millis(800);

#[derive(Parser)]
#[command(name = "procscore")]
#[command(about = "Procedural music from oscillators, noise and a lookahead scheduler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play through the sound card with a live status screen
    Play {
        /// Project directory holding .procscore/ (defaults to the current one)
        dir: Option<PathBuf>,
        #[arg(long)]
        track: Option<String>,
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Bounce a number of bars to a WAV file
    Render {
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        track: Option<String>,
        #[arg(long, default_value_t = 8)]
        bars: u32,
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Print the voices the pattern generator emits, tick by tick
    Score {
        #[arg(long)]
        track: Option<String>,
        #[arg(long, default_value_t = 4)]
        bars: u32,
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Play { dir, track, seed } => play(dir, track, seed),
        Commands::Render { out, track, bars, seed } => {
            init_logging();
            render(&out, track, bars, seed)
        }
        Commands::Score { track, bars, seed } => {
            init_logging();
            score(track, bars, seed);
            Ok(())
        }
    }
}

fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

fn init_logging() {
    tracing_subscriber::fmt().with_env_filter(env_filter()).with_writer(std::io::stderr).init();
}

// the terminal belongs to the UI while playing, so logs go to a file
fn init_file_logging(project_dir: &Path) -> anyhow::Result<PathBuf> {
    let dir = project_dir.join(PROCSCORE_DIR);
    std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join(LOG_FILE);
    let file = std::fs::File::create(&path).with_context(|| format!("creating {}", path.display()))?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(path)
}

fn config_with(mut cfg: EngineConfig, track: Option<String>, seed: Option<u64>) -> EngineConfig {
    if let Some(name) = track {
        cfg.initial_track = Track::from_name(&name);
    }
    if seed.is_some() {
        cfg.seed = seed;
    }
    cfg
}

fn play(dir: Option<PathBuf>, track: Option<String>, seed: Option<u64>) -> anyhow::Result<()> {
    let project_dir = match dir {
        Some(d) => d,
        None => std::env::current_dir().context("no current directory")?,
    };
    let log_path = init_file_logging(&project_dir)?;
    let saved = persistence::load_config(&project_dir).unwrap_or_default();
    let cfg = config_with(saved, track, seed);

    let (audio_handle, backend) = audio::start_audio()?;
    let engine = Engine::new(backend, cfg).context("building the mix bus")?;
    let mut middle = Middle::new(Player::new(engine, Box::new(ThreadPulse::new())));

    terminal::enable_raw_mode()?;
    let _guard = RawModeGuard; // auto drops when out of scope
    let backend = CrosstermBackend::new(std::io::stdout());
    let mut term = Terminal::new(backend)?;
    term.clear()?;

    let tick_rate = Duration::from_millis(16); // ~60fps
    loop {
        middle.tick();
        let ds = middle.display_state().clone();
        term.draw(|frame| {
            tui::view::render(frame, frame.area(), &ds);
        })?;

        for event in tui::input::poll_input(tick_rate)? {
            if event == InputEvent::Quit {
                // save before quitting
                let session = middle.player().session_config();
                if let Err(e) = persistence::save_config(&project_dir, &session) {
                    tracing::warn!("could not save config: {e:#}");
                }
                middle.player_mut().destroy_with_grace(QUIT_GRACE);
                drop(term);
                drop(audio_handle);
                tracing::info!(log = %log_path.display(), "bye");
                return Ok(());
            }
            middle.handle_input(event);
        }
    }
}

// Drive the engine by hand: one pulse of scheduling, one pulse of audio.
fn render(out: &Path, track: Option<String>, bars: u32, seed: Option<u64>) -> anyhow::Result<()> {
    let cfg = config_with(EngineConfig::default(), track, seed);
    let pulse = cfg.pulse_interval().as_secs_f64();
    let mut engine = Engine::new(OfflineBackend::new(RENDER_RATE), cfg).context("building the mix bus")?;
    let pulse_frames = ((RENDER_RATE as f64 * pulse).round() as usize).max(1);
    let mut buffer = SampleBuffer::new(RENDER_RATE);

    engine.start();
    let seed = engine.snapshot().seed;
    while engine.is_playing() {
        engine.on_timer_pulse();
        if engine.transport().bar >= bars {
            engine.stop();
        }
        engine.backend_mut().render(pulse_frames, &mut buffer);
    }
    let end = engine.backend().now() + RENDER_TAIL;
    while engine.backend().now() < end {
        engine.housekeep();
        engine.backend_mut().render(pulse_frames, &mut buffer);
    }
    engine.shutdown();

    buffer.write_wav(out)?;
    tracing::info!(
        out = %out.display(),
        bars,
        seed,
        seconds = buffer.duration(),
        peak = buffer.peak(),
        "render finished"
    );
    Ok(())
}

fn score(track: Option<String>, bars: u32, seed: Option<u64>) {
    let cfg = config_with(EngineConfig::default(), track, seed);
    let seed = cfg.seed.unwrap_or_else(rand::random::<u64>);
    let track = cfg.initial_track;
    let mut state = TransportState::new(track, cfg.track(track).bpm);
    println!("# {} at {} bpm, seed {seed}", track.name(), state.tempo_bpm);

    for _ in 0..bars as usize * TICKS_PER_BAR as usize {
        let voices = pattern::emit(&state, seed);
        if !voices.is_empty() {
            let described: Vec<String> = voices.iter().map(|v| describe(&v.kind, v.gain, v.offset)).collect();
            println!(
                "{:>3}:{:02} {:<9} {:>8.3}s  {}",
                state.bar + 1,
                state.tick + 1,
                state.section().label(),
                state.next_event_time,
                described.join(", ")
            );
        }
        state.advance();
    }
}

fn describe(kind: &VoiceKind, gain: f64, offset: f64) -> String {
    let mut s = match kind {
        VoiceKind::Bass { freq, cutoff, .. } => format!("bass {freq:.1}Hz lp{cutoff:.0}"),
        VoiceKind::Lead { freq, .. } => format!("lead {freq:.1}Hz"),
        VoiceKind::Pad { freq, .. } => format!("pad {freq:.1}Hz"),
        other => other.label().to_string(),
    };
    s.push_str(&format!(" @{gain:.2}"));
    if offset > 0.0 {
        s.push_str(&format!(" +{:.0}ms", offset * 1000.0));
    }
    s
}

struct RawModeGuard;
impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}
