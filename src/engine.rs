//! Engine: the control surface an embedding application drives.
//!
//! The generator runs on its own thread and owns the Orchestrator while it
//! plays. Scalar settings go through a shared config that the generator
//! snapshots once per tick; settings that reset generator state (tempo,
//! key, forced modulation, observers) travel as commands on a channel the
//! generator drains at the top of each tick.

use crate::chord::Chord;
use crate::config::EngineConfig;
use crate::error::{EngineError, SinkError};
use crate::orchestrator::{Orchestrator, OrchestratorStats};
use crate::random;
use crate::scale::ScaleType;
use crate::sink::{ChordObserver, EventSink, NoteObserver};
use crate::types::{Clock, EngineState, LhTexture, RhTexture, SessionClock};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, SendError, Sender};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Sleep between generator iterations.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(5);

/// Sleep while paused.
const IDLE_INTERVAL: Duration = Duration::from_millis(10);

/// How long `stop` waits for the generator thread.
const STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// Opens the event sink on first `start`.
pub type SinkFactory = Box<dyn FnMut() -> Result<Box<dyn EventSink>, SinkError> + Send>;

/// Requests applied by the generator at the top of its next tick.
enum Command {
    SetTempo(f64),
    SetKey(i32, Option<ScaleType>),
    ScheduleTempoChange {
        target_bpm: f64,
        in_beats: f64,
        transition_beats: f64,
    },
    SetMeasuresUntilModulation(i32),
    SetChordObserver(Option<Box<dyn ChordObserver>>),
    SetNoteObserver(Option<Box<dyn NoteObserver>>),
}

impl Command {
    fn apply(self, orch: &mut Orchestrator) {
        match self {
            Command::SetTempo(bpm) => orch.set_tempo(bpm),
            Command::SetKey(root, mode) => orch.set_key(root, mode),
            Command::ScheduleTempoChange {
                target_bpm,
                in_beats,
                transition_beats,
            } => orch.schedule_tempo_change(target_bpm, in_beats, transition_beats),
            Command::SetMeasuresUntilModulation(m) => orch.set_measures_until_modulation(m),
            Command::SetChordObserver(obs) => orch.set_chord_observer(obs),
            Command::SetNoteObserver(obs) => orch.set_note_observer(obs),
        }
    }
}

struct Worker {
    handle: JoinHandle<()>,
    /// Per run, so a detached generator never sees a later run's reset.
    stop_flag: Arc<AtomicBool>,
    /// The generator hands the Orchestrator back here when it exits.
    done_rx: Receiver<Orchestrator>,
}

pub struct Engine {
    config: Arc<Mutex<EngineConfig>>,
    state: Arc<AtomicU8>,
    cmd_tx: Sender<Command>,
    cmd_rx: Receiver<Command>,
    sink_factory: SinkFactory,
    clock: Arc<dyn Clock>,
    seed: Option<u64>,
    tick_interval: Duration,
    /// Generator state between runs; `None` while the worker holds it.
    orchestrator: Option<Orchestrator>,
    worker: Option<Worker>,
    last_stats: OrchestratorStats,
}

impl Engine {
    pub fn new<F>(config: EngineConfig, sink_factory: F) -> Self
    where
        F: FnMut() -> Result<Box<dyn EventSink>, SinkError> + Send + 'static,
    {
        let (cmd_tx, cmd_rx) = unbounded();
        Self {
            config: Arc::new(Mutex::new(config.sanitized())),
            state: Arc::new(AtomicU8::new(EngineState::Stopped as u8)),
            cmd_tx,
            cmd_rx,
            sink_factory: Box::new(sink_factory),
            clock: Arc::new(SessionClock::new()),
            seed: None,
            tick_interval: DEFAULT_TICK_INTERVAL,
            orchestrator: None,
            worker: None,
            last_stats: OrchestratorStats::default(),
        }
    }

    /// Replace the wall clock, e.g. with a `ScaledClock` for accelerated runs.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Fix the random seed. Without one, the generator seeds from the wall clock.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────

    /// Open the sink if needed, seed the first progression and launch the
    /// generator thread. No-op if already playing or paused.
    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.state() != EngineState::Stopped {
            return Ok(());
        }

        let mut orch = match self.orchestrator.take() {
            Some(orch) => orch,
            None => {
                let config = *self.lock_config();
                let rng = match self.seed {
                    Some(seed) => random::seeded(seed),
                    None => random::from_wall_clock(),
                };
                Orchestrator::new(config, self.clock.clone(), rng)
            }
        };
        if !orch.has_sink() {
            match (self.sink_factory)() {
                Ok(sink) => orch.set_sink(sink),
                Err(e) => {
                    self.orchestrator = Some(orch);
                    return Err(EngineError::Sink(e));
                }
            }
        }

        // Observers registered before start must hear the first chord.
        for cmd in self.cmd_rx.try_iter() {
            cmd.apply(&mut orch);
        }
        orch.begin();

        let stop_flag = Arc::new(AtomicBool::new(false));
        self.state
            .store(EngineState::Playing as u8, Ordering::SeqCst);

        let (done_tx, done_rx) = bounded(1);
        let ctx = GeneratorContext {
            config: self.config.clone(),
            state: self.state.clone(),
            stop_flag: stop_flag.clone(),
            cmd_rx: self.cmd_rx.clone(),
            tick_interval: self.tick_interval,
        };
        let handle = thread::Builder::new()
            .name("generator".into())
            .spawn(move || {
                let orch = ctx.run(orch);
                if let Err(SendError(mut orch)) = done_tx.send(orch) {
                    // stop() gave up on us; release our own notes.
                    warn!("Late generator exit, releasing its notes");
                    orch.all_notes_off();
                }
            })
            .map_err(|e| {
                self.state
                    .store(EngineState::Stopped as u8, Ordering::SeqCst);
                EngineError::Spawn(e)
            })?;

        self.worker = Some(Worker {
            handle,
            stop_flag,
            done_rx,
        });
        info!("Engine started");
        Ok(())
    }

    /// Stop the generator, release every sounding note and clear anything
    /// still scheduled.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        worker.stop_flag.store(true, Ordering::SeqCst);
        self.state
            .store(EngineState::Stopped as u8, Ordering::SeqCst);

        match worker.done_rx.recv_timeout(STOP_TIMEOUT) {
            Ok(mut orch) => {
                let _ = worker.handle.join();
                orch.all_notes_off();
                self.last_stats = orch.stats();
                info!(
                    "Engine stopped: {} notes on, {} off, {} dropped",
                    self.last_stats.note_ons, self.last_stats.note_offs, self.last_stats.dropped
                );
                self.orchestrator = Some(orch);
            }
            Err(RecvTimeoutError::Timeout) => {
                // The sink is stuck inside an emit. Let the thread go; it
                // drains its own notes when the emit returns, and the next
                // start builds a fresh generator and sink.
                warn!("Generator did not stop within {:?}; detaching", STOP_TIMEOUT);
            }
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Generator thread exited without returning its state");
                let _ = worker.handle.join();
            }
        }
    }

    pub fn pause(&self) {
        if self
            .state
            .compare_exchange(
                EngineState::Playing as u8,
                EngineState::Paused as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
        {
            info!("Engine paused");
        }
    }

    pub fn resume(&self) {
        if self
            .state
            .compare_exchange(
                EngineState::Paused as u8,
                EngineState::Playing as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
        {
            info!("Engine resumed");
        }
    }

    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Counters from the most recent completed run.
    pub fn last_stats(&self) -> OrchestratorStats {
        self.last_stats
    }

    /// Snapshot of the current settings.
    pub fn config(&self) -> EngineConfig {
        *self.lock_config()
    }

    // ─── Setters ────────────────────────────────────────────────────────

    pub fn set_tempo(&self, bpm: f64) {
        self.lock_config().set_tempo(bpm);
        self.send(Command::SetTempo(bpm));
    }

    /// Move to a new key. The mode is kept when `scale_type` is `None`.
    pub fn set_key(&self, root: i32, scale_type: Option<ScaleType>) {
        self.lock_config().set_key(root, scale_type);
        self.send(Command::SetKey(root, scale_type));
    }

    /// Ramp to `target_bpm` over `transition_beats`, starting `in_beats` from now.
    pub fn schedule_tempo_change(&self, target_bpm: f64, in_beats: f64, transition_beats: f64) {
        self.send(Command::ScheduleTempoChange {
            target_bpm,
            in_beats,
            transition_beats,
        });
    }

    /// Force the modulation countdown, e.g. `1` to modulate at the next
    /// progression boundary.
    pub fn set_measures_until_modulation(&self, measures: i32) {
        self.send(Command::SetMeasuresUntilModulation(measures));
    }

    pub fn set_tension(&self, tension: f64) {
        self.lock_config().set_tension(tension);
    }

    pub fn set_expressiveness(&self, expressiveness: f64) {
        self.lock_config().set_expressiveness(expressiveness);
    }

    pub fn set_rh_density(&self, density: f64) {
        self.lock_config().rh.set_density(density);
    }

    pub fn set_lh_density(&self, density: f64) {
        self.lock_config().lh.set_density(density);
    }

    pub fn set_rh_texture(&self, texture: RhTexture) {
        self.lock_config().rh.texture = texture;
        debug!("RH texture → {}", texture);
    }

    pub fn set_lh_texture(&self, texture: LhTexture) {
        self.lock_config().lh.texture = texture;
        debug!("LH texture → {}", texture);
    }

    pub fn set_channel(&self, channel: i32) {
        self.lock_config().set_channel(channel);
    }

    pub fn set_rh_register(&self, low: i32, high: i32) {
        self.lock_config().rh.set_register(low, high);
    }

    pub fn set_lh_register(&self, low: i32, high: i32) {
        self.lock_config().lh.set_register(low, high);
    }

    pub fn set_rh_velocity(&self, min: i32, max: i32) {
        self.lock_config().rh.set_velocity(min, max);
    }

    pub fn set_lh_velocity(&self, min: i32, max: i32) {
        self.lock_config().lh.set_velocity(min, max);
    }

    // ─── Observers ──────────────────────────────────────────────────────

    /// Called on the generator thread at every chord change.
    pub fn on_chord_change<F>(&self, callback: F)
    where
        F: FnMut(&Chord) + Send + 'static,
    {
        self.set_chord_observer(Some(Box::new(callback)));
    }

    /// Called on the generator thread for every note the sink accepted.
    pub fn on_note<F>(&self, callback: F)
    where
        F: FnMut(u8, u8, bool) + Send + 'static,
    {
        self.set_note_observer(Some(Box::new(callback)));
    }

    pub fn set_chord_observer(&self, observer: Option<Box<dyn ChordObserver>>) {
        self.send(Command::SetChordObserver(observer));
    }

    pub fn set_note_observer(&self, observer: Option<Box<dyn NoteObserver>>) {
        self.send(Command::SetNoteObserver(observer));
    }

    fn send(&self, cmd: Command) {
        // We hold the receiver too, so the channel never disconnects.
        let _ = self.cmd_tx.send(cmd);
    }

    fn lock_config(&self) -> MutexGuard<'_, EngineConfig> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Everything the generator thread shares with the Engine.
struct GeneratorContext {
    config: Arc<Mutex<EngineConfig>>,
    state: Arc<AtomicU8>,
    stop_flag: Arc<AtomicBool>,
    cmd_rx: Receiver<Command>,
    tick_interval: Duration,
}

impl GeneratorContext {
    fn run(self, mut orch: Orchestrator) -> Orchestrator {
        debug!("Generator thread running");
        while !self.stop_flag.load(Ordering::SeqCst) {
            if EngineState::from_u8(self.state.load(Ordering::SeqCst)) != EngineState::Playing {
                thread::sleep(IDLE_INTERVAL);
                continue;
            }

            for cmd in self.cmd_rx.try_iter() {
                cmd.apply(&mut orch);
            }
            let config = *self.config.lock().unwrap_or_else(PoisonError::into_inner);
            orch.tick(&config);

            thread::sleep(self.tick_interval);
        }
        debug!("Generator thread exiting after {} ticks", orch.stats().ticks);
        orch
    }
}
