use reverie::config::EngineConfig;
use reverie::console_display;
use reverie::data_logger;
use reverie::engine::Engine;
use reverie::osc_sender;
use reverie::scale::ScaleType;
use reverie::simulator::{self, Simulation};
use reverie::sink::{ChannelSink, EventSink, LogSink};
use reverie::types::*;

use clap::Parser;
use crossbeam_channel::{bounded, Sender};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "reverie")]
#[command(about = "Generative impressionistic piano engine")]
struct Cli {
    /// Load settings from a JSON file; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the resolved settings to a JSON file and exit
    #[arg(long)]
    save_config: Option<PathBuf>,

    /// Tempo in BPM (20–300)
    #[arg(long)]
    tempo: Option<f64>,

    /// Key centre, e.g. "C", "Db", "F#"
    #[arg(long, value_parser = parse_note_name)]
    key: Option<u8>,

    /// Mode, e.g. "major", "dorian", "whole_tone"
    #[arg(long)]
    mode: Option<ScaleType>,

    /// Right-hand texture, e.g. "flowing_arpeggios", "off"
    #[arg(long)]
    rh_texture: Option<RhTexture>,

    /// Left-hand texture, e.g. "alberti_bass", "off"
    #[arg(long)]
    lh_texture: Option<LhTexture>,

    #[arg(long)]
    rh_density: Option<f64>,

    #[arg(long)]
    lh_density: Option<f64>,

    /// Harmonic tension, 0–1
    #[arg(long)]
    tension: Option<f64>,

    /// Rubato and dynamics, 0–1
    #[arg(long)]
    expressiveness: Option<f64>,

    /// MIDI channel, 0–15
    #[arg(long)]
    channel: Option<i32>,

    /// Random seed (default: from the wall clock)
    #[arg(long)]
    seed: Option<u64>,

    /// Stop after this many seconds (default: run until killed)
    #[arg(long)]
    duration: Option<f64>,

    /// Run the simulator offline for this many beats and print a summary
    #[arg(long)]
    simulate_beats: Option<f64>,

    /// With --simulate-beats: play the scripted texture tour instead
    #[arg(long)]
    demo: bool,

    /// Enable OSC output
    #[arg(long)]
    osc: bool,

    /// OSC target address
    #[arg(long, default_value = "127.0.0.1:9000")]
    osc_target: String,

    /// Record the session as JSONL
    #[arg(long)]
    log_events: bool,

    /// Output directory for recorded sessions
    #[arg(long, default_value = "./sessions")]
    output_dir: PathBuf,

    /// Enable console display
    #[arg(long)]
    console: bool,

    /// Console display refresh rate (Hz)
    #[arg(long, default_value_t = 20)]
    display_hz: u32,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    let config = match resolve_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    if let Some(path) = &cli.save_config {
        if let Err(e) = config.save(path) {
            error!("{}", e);
            std::process::exit(1);
        }
        return;
    }

    info!("═══════════════════════════════════════════════");
    info!("  REVERIE v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "  Key: {} {}  Tempo: {:.0} BPM  {}",
        pitch_class_name(config.key_root),
        config.scale_type,
        config.tempo,
        config.time_signature
    );
    info!("  RH: {}  LH: {}", config.rh.texture, config.lh.texture);
    info!(
        "  Mode: {}",
        if cli.simulate_beats.is_some() { "SIMULATOR" } else { "LIVE" }
    );
    if cli.osc { info!("  Output: OSC → {}", cli.osc_target); }
    if cli.log_events { info!("  Output: session log in {:?}", cli.output_dir); }
    if cli.console { info!("  Output: console monitor"); }
    info!("═══════════════════════════════════════════════");

    let seed = cli.seed.unwrap_or_else(rand::random);

    // Channels: sink → consumers
    let mut event_txs: Vec<Sender<StampedEvent>> = Vec::new();
    let mut handles = Vec::new();

    // ─── Console display ────────────────────────────────────────────
    if cli.console {
        let (tx, rx) = bounded::<StampedEvent>(256);
        event_txs.push(tx);
        let hz = cli.display_hz;
        handles.extend(spawn_named("display", move || {
            console_display::ConsoleDisplay::new(rx, hz).run();
        }));
    }

    // ─── OSC sender ─────────────────────────────────────────────────
    if cli.osc {
        let (tx, rx) = bounded::<StampedEvent>(1024);
        event_txs.push(tx);
        let target = cli.osc_target.clone();
        handles.extend(spawn_named("osc", move || {
            osc_sender::OscSender::new(rx, target).run();
        }));
    }

    // ─── Session logger ─────────────────────────────────────────────
    if cli.log_events {
        let (tx, rx) = bounded::<StampedEvent>(4096);
        match data_logger::DataLogger::new(rx, &cli.output_dir, config, Some(seed)) {
            Ok(logger) => {
                event_txs.push(tx);
                handles.extend(spawn_named("logger", move || logger.run_logged()));
            }
            Err(e) => error!("Session logging disabled: {}", e),
        }
    }

    match cli.simulate_beats {
        Some(beats) => run_simulation(config, seed, beats, cli.demo, event_txs),
        None => run_live(config, seed, cli.duration, event_txs),
    }

    for h in handles {
        let _ = h.join();
    }
}

fn resolve_config(cli: &Cli) -> Result<EngineConfig, reverie::ConfigError> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(bpm) = cli.tempo {
        config.set_tempo(bpm);
    }
    if let Some(key) = cli.key {
        config.set_key(key as i32, cli.mode);
    } else if let Some(mode) = cli.mode {
        config.scale_type = mode;
    }
    if let Some(t) = cli.rh_texture {
        config.rh.texture = t;
    }
    if let Some(t) = cli.lh_texture {
        config.lh.texture = t;
    }
    if let Some(d) = cli.rh_density {
        config.rh.set_density(d);
    }
    if let Some(d) = cli.lh_density {
        config.lh.set_density(d);
    }
    if let Some(t) = cli.tension {
        config.set_tension(t);
    }
    if let Some(x) = cli.expressiveness {
        config.set_expressiveness(x);
    }
    if let Some(ch) = cli.channel {
        config.set_channel(ch);
    }
    Ok(config)
}

/// Consumers get a `ChannelSink`; with none attached, events are logged.
fn make_sink(txs: &[Sender<StampedEvent>], clock: Arc<dyn Clock>) -> Box<dyn EventSink> {
    if txs.is_empty() {
        Box::new(LogSink)
    } else {
        Box::new(ChannelSink::new(txs.to_vec(), clock))
    }
}

fn run_simulation(
    config: EngineConfig,
    seed: u64,
    beats: f64,
    demo: bool,
    event_txs: Vec<Sender<StampedEvent>>,
) {
    info!("Simulating {} beats (seed {})...", beats, seed);
    let clock = SimClock::new();
    let shared: Arc<dyn Clock> = Arc::new(clock.clone());
    let sink = make_sink(&event_txs, shared.clone());
    let mut sim = Simulation::with_clock(config, seed, sink, clock);
    if !event_txs.is_empty() {
        let chords = ChannelSink::new(event_txs, shared);
        sim.orchestrator_mut().set_chord_observer(Some(Box::new(chords)));
    }

    if demo {
        sim.run_script(&simulator::demo_sequence());
    } else {
        sim.run_beats(beats);
    }
    sim.stop();

    let stats = sim.orchestrator().stats();
    match serde_json::to_string_pretty(&stats) {
        Ok(json) => println!("{}", json),
        Err(e) => warn!("Could not render stats: {}", e),
    }
    info!(
        "Simulated {:.1} beats in {:.1}s of music",
        sim.current_beat(),
        sim.elapsed().as_secs_f64()
    );
}

fn run_live(
    config: EngineConfig,
    seed: u64,
    duration: Option<f64>,
    event_txs: Vec<Sender<StampedEvent>>,
) {
    let clock: Arc<dyn Clock> = Arc::new(SessionClock::new());
    let sink_txs = event_txs.clone();
    let sink_clock = clock.clone();
    let mut engine = Engine::new(config, move || Ok(make_sink(&sink_txs, sink_clock.clone())))
        .with_clock(clock.clone())
        .with_seed(seed);
    if !event_txs.is_empty() {
        engine.set_chord_observer(Some(Box::new(ChannelSink::new(event_txs, clock))));
    }

    if let Err(e) = engine.start() {
        error!("{}", e);
        return;
    }

    match duration {
        Some(secs) => {
            thread::sleep(Duration::from_secs_f64(secs.max(0.0)));
            engine.stop();
            let stats = engine.last_stats();
            info!(
                "Played {} notes over {} chords, {} modulations",
                stats.note_ons, stats.chord_changes, stats.modulations
            );
        }
        None => {
            info!("Playing. Press Ctrl+C to stop.");
            loop {
                thread::sleep(Duration::from_secs(60));
            }
        }
    }
    // Dropping the engine drops its sink, which closes the consumer channels.
}

fn spawn_named<F>(name: &str, f: F) -> Option<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    match thread::Builder::new().name(name.into()).spawn(f) {
        Ok(h) => Some(h),
        Err(e) => {
            error!("Failed to spawn {} thread: {}", name, e);
            None
        }
    }
}
