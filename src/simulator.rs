use crate::config::EngineConfig;
use crate::orchestrator::Orchestrator;
use crate::random;
use crate::scale::ScaleType;
use crate::sink::EventSink;
use crate::types::*;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

/// Simulated time per generator tick, matching the live engine.
pub const SIM_STEP: Duration = Duration::from_millis(5);

/// Drives an Orchestrator over a simulated clock, as fast as the CPU allows.
///
/// Each `step` advances the clock by `SIM_STEP` and runs one tick, so a
/// run is fully determined by the seed and the script. Nothing sleeps.
pub struct Simulation {
    clock: SimClock,
    config: EngineConfig,
    orch: Orchestrator,
    step: Duration,
    started: bool,
}

impl Simulation {
    pub fn new(config: EngineConfig, seed: u64, sink: Box<dyn EventSink>) -> Self {
        Self::with_clock(config, seed, sink, SimClock::new())
    }

    /// Share `clock` with other parts of the program, e.g. a `ChannelSink`
    /// that stamps events in simulated time.
    pub fn with_clock(
        config: EngineConfig,
        seed: u64,
        sink: Box<dyn EventSink>,
        clock: SimClock,
    ) -> Self {
        let config = config.sanitized();
        let mut orch = Orchestrator::new(config, Arc::new(clock.clone()), random::seeded(seed));
        orch.set_sink(sink);
        Self {
            clock,
            config,
            orch,
            step: SIM_STEP,
            started: false,
        }
    }

    pub fn with_step(mut self, step: Duration) -> Self {
        self.step = step;
        self
    }

    /// Seed the first progression. Called implicitly by the first `step`.
    pub fn begin(&mut self) {
        self.orch.begin();
        self.started = true;
    }

    /// Advance simulated time by one step and run one generator tick.
    pub fn step(&mut self) {
        if !self.started {
            self.begin();
        }
        self.clock.advance(self.step);
        self.orch.tick(&self.config);
    }

    /// Run until the beat clock has moved `beats` past where it is now.
    pub fn run_beats(&mut self, beats: f64) {
        if !self.started {
            self.begin();
        }
        let target = self.orch.current_beat() + beats.max(0.0);
        // Slowest tempo with full negative rubato still moves forward; this
        // bound only catches a stalled clock.
        let max_steps = (beats.max(0.0) * 60.0 / 10.0 / self.step.as_secs_f64()) as u64 + 1;
        let mut steps = 0u64;
        while self.orch.current_beat() < target {
            self.step();
            steps += 1;
            if steps > max_steps {
                warn!(
                    "Simulation stalled at beat {:.2} (target {:.2})",
                    self.orch.current_beat(),
                    target
                );
                break;
            }
        }
    }

    /// Release every sounding note.
    pub fn stop(&mut self) {
        self.orch.all_notes_off();
        let stats = self.orch.stats();
        info!(
            "Simulation stopped at beat {:.1}: {} chords, {} modulations, {} notes",
            self.orch.current_beat(),
            stats.chord_changes,
            stats.modulations,
            stats.note_ons
        );
    }

    /// Play a scripted sequence of actions.
    pub fn run_script(&mut self, script: &[SimAction]) {
        for action in script {
            self.execute(action);
        }
    }

    fn execute(&mut self, action: &SimAction) {
        match *action {
            SimAction::Play { beats } => {
                info!("  play {} beats", beats);
                self.run_beats(beats);
            }

            SimAction::Rh(texture) => {
                info!("  RH → {}", texture);
                self.config.rh.texture = texture;
            }

            SimAction::Lh(texture) => {
                info!("  LH → {}", texture);
                self.config.lh.texture = texture;
            }

            SimAction::Tension(tension) => {
                info!("  tension {:.2}", tension);
                self.config.set_tension(tension);
            }

            SimAction::Density { rh, lh } => {
                info!("  density RH {:.2} LH {:.2}", rh, lh);
                self.config.rh.set_density(rh);
                self.config.lh.set_density(lh);
            }

            SimAction::Key { root, mode } => {
                info!("  key → {} {}", note_name(clamp_pitch(root)), mode.name());
                self.config.set_key(root, Some(mode));
                self.orch.set_key(root, Some(mode));
            }

            SimAction::Tempo { bpm, over_beats } => {
                info!("  tempo → {:.0} over {} beats", bpm, over_beats);
                self.orch.schedule_tempo_change(bpm, 0.0, over_beats);
            }

            SimAction::Modulate => {
                info!("  force modulation");
                self.orch.set_measures_until_modulation(1);
            }
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orch
    }

    pub fn orchestrator_mut(&mut self) -> &mut Orchestrator {
        &mut self.orch
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Changes take effect on the next step, like the live engine's setters.
    pub fn config_mut(&mut self) -> &mut EngineConfig {
        &mut self.config
    }

    pub fn current_beat(&self) -> f64 {
        self.orch.current_beat()
    }

    /// Simulated seconds since the first step.
    pub fn elapsed(&self) -> Duration {
        Duration::from_micros(self.clock.now_us())
    }
}

// ─── Scripted actions ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub enum SimAction {
    Play { beats: f64 },
    Rh(RhTexture),
    Lh(LhTexture),
    Tension(f64),
    Density { rh: f64, lh: f64 },
    Key { root: i32, mode: ScaleType },
    Tempo { bpm: f64, over_beats: f64 },
    /// Modulate at the next progression boundary
    Modulate,
}

/// A tour through every texture, a key change and a tempo swell.
pub fn demo_sequence() -> Vec<SimAction> {
    use SimAction::*;
    vec![
        // Opening: sustained chords over bass
        Rh(RhTexture::ShimmeringChords),
        Lh(LhTexture::SustainedBass),
        Play { beats: 8.0 },
        // Arpeggios over broken chords, a little denser
        Rh(RhTexture::FlowingArpeggios),
        Lh(LhTexture::BrokenChords),
        Density { rh: 0.7, lh: 0.5 },
        Play { beats: 8.0 },
        // Melody over alberti
        Rh(RhTexture::MelodicFragments),
        Lh(LhTexture::AlbertiBass),
        Play { beats: 8.0 },
        // Darker colours, slowing down
        Tension(0.7),
        Tempo { bpm: 60.0, over_beats: 4.0 },
        Rh(RhTexture::LayeredVoices),
        Lh(LhTexture::BlockChords),
        Play { beats: 8.0 },
        // Into D dorian
        Key { root: 62, mode: ScaleType::Dorian },
        Rh(RhTexture::ImpressionistWash),
        Lh(LhTexture::RollingOctaves),
        Play { beats: 8.0 },
        // Thinning out
        Tension(0.2),
        Density { rh: 0.3, lh: 0.3 },
        Rh(RhTexture::SparseMeditation),
        Lh(LhTexture::SparseRoots),
        Tempo { bpm: 72.0, over_beats: 2.0 },
        Modulate,
        Play { beats: 16.0 },
    ]
}
