//! Beat clock with rubato, swing, humanization and tempo transitions,
//! plus a small library of rhythm patterns.

use crate::random::gaussian;
use crate::types::{Clock, TimeSignature};
use log::debug;
use rand::seq::SliceRandom;
use rand::Rng;
use std::f64::consts::PI;
use std::sync::Arc;

pub const MIN_BPM: f64 = 20.0;
pub const MAX_BPM: f64 = 300.0;

/// Depth of the sinusoidal tempo swing at full rubato.
const RUBATO_DEPTH: f64 = 0.15;
/// Rubato phase advance per beat, in radians.
const RUBATO_RATE: f64 = 0.1;
/// Maximum swing delay of an off-beat, in beats.
const SWING_DELAY: f64 = 0.167;

pub fn clamp_bpm(bpm: f64) -> f64 {
    if bpm.is_nan() {
        return MIN_BPM;
    }
    bpm.clamp(MIN_BPM, MAX_BPM)
}

/// A pending tempo change: starting at `beat`, move to `bpm` over
/// `transition_beats` (immediately when 0).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempoEvent {
    pub beat: f64,
    pub bpm: f64,
    pub transition_beats: f64,
}

#[derive(Debug, Clone, Copy)]
struct TempoRamp {
    start_beat: f64,
    from_bpm: f64,
    to_bpm: f64,
    span: f64,
}

/// Tracks musical time against a clock.
///
/// `tick` converts elapsed clock time into beats at the current effective
/// tempo. The beat position only moves forward.
pub struct RhythmEngine {
    clock: Arc<dyn Clock>,
    bpm: f64,
    base_bpm: f64,
    time_signature: TimeSignature,
    swing: f64,
    rubato: f64,
    current_beat: f64,
    anchor_us: Option<u64>,
    phase: f64,
    tempo_events: Vec<TempoEvent>,
    ramp: Option<TempoRamp>,
}

impl RhythmEngine {
    pub fn new(bpm: f64, time_signature: TimeSignature, clock: Arc<dyn Clock>) -> Self {
        let bpm = clamp_bpm(bpm);
        Self {
            clock,
            bpm,
            base_bpm: bpm,
            time_signature,
            swing: 0.0,
            rubato: 0.3,
            current_beat: 0.0,
            anchor_us: None,
            phase: 0.0,
            tempo_events: Vec::new(),
            ramp: None,
        }
    }

    /// Record the clock anchor and rewind to beat 0.
    pub fn start(&mut self) {
        self.anchor_us = Some(self.clock.now_us());
        self.current_beat = 0.0;
        self.phase = 0.0;
    }

    /// Advance by the clock time since the previous tick. Returns the beats
    /// elapsed.
    pub fn tick(&mut self) -> f64 {
        let now = self.clock.now_us();
        let anchor = match self.anchor_us {
            Some(a) => a,
            None => {
                self.start();
                now
            }
        };
        let elapsed_seconds = now.saturating_sub(anchor) as f64 / 1_000_000.0;
        self.anchor_us = Some(now);

        self.apply_tempo_events();

        let beats = elapsed_seconds * self.effective_bpm() / 60.0;
        self.current_beat += beats;

        self.phase += RUBATO_RATE * beats;
        while self.phase > PI {
            self.phase -= 2.0 * PI;
        }
        beats
    }

    fn apply_tempo_events(&mut self) {
        while let Some(next) = self.tempo_events.first().copied() {
            if next.beat > self.current_beat {
                break;
            }
            self.tempo_events.remove(0);
            if next.transition_beats <= 0.0 {
                self.ramp = None;
                self.bpm = clamp_bpm(next.bpm);
                self.base_bpm = self.bpm;
            } else {
                self.ramp = Some(TempoRamp {
                    start_beat: self.current_beat,
                    from_bpm: self.bpm,
                    to_bpm: clamp_bpm(next.bpm),
                    span: next.transition_beats,
                });
            }
            debug!("Tempo change to {:.1} BPM at beat {:.2}", next.bpm, self.current_beat);
        }

        if let Some(ramp) = self.ramp {
            let progress = ((self.current_beat - ramp.start_beat) / ramp.span).clamp(0.0, 1.0);
            self.bpm = ramp.from_bpm + (ramp.to_bpm - ramp.from_bpm) * progress;
            if progress >= 1.0 {
                self.base_bpm = ramp.to_bpm;
                self.ramp = None;
            }
        }
    }

    /// Tempo including the current rubato deviation.
    pub fn effective_bpm(&self) -> f64 {
        if self.rubato == 0.0 {
            return self.bpm;
        }
        self.bpm * (1.0 + RUBATO_DEPTH * self.rubato * self.phase.sin())
    }

    /// Delay an off-beat eighth in proportion to the swing amount.
    pub fn apply_swing(&self, offset: f64) -> f64 {
        if self.swing == 0.0 {
            return offset;
        }
        let eighth = (offset * 2.0).rem_euclid(2.0);
        if eighth > 0.4 && eighth < 0.6 {
            offset + SWING_DELAY * self.swing
        } else {
            offset
        }
    }

    pub fn humanize<R: Rng + ?Sized>(&self, offset: f64, amount: f64, rng: &mut R) -> f64 {
        offset + gaussian(rng, 0.02 * amount)
    }

    /// Metric weight of a beat position: 1.0 on the downbeat, 0.3 off-beat.
    pub fn beat_strength(&self, beat: f64) -> f64 {
        let pos = beat.rem_euclid(self.measure_beats() as f64);
        let near = |target: f64| (pos - target).abs() < 0.1;
        if pos < 0.1 {
            return 1.0;
        }
        match self.time_signature {
            TimeSignature::FourFour if near(2.0) => 0.8,
            TimeSignature::FourFour if near(1.0) || near(3.0) => 0.6,
            TimeSignature::ThreeFour if near(1.0) || near(2.0) => 0.5,
            _ => 0.3,
        }
    }

    // ─── Tempo control ──────────────────────────────────────────────────

    /// Set the tempo immediately, cancelling any ramp in progress.
    pub fn set_tempo(&mut self, bpm: f64) {
        self.bpm = clamp_bpm(bpm);
        self.base_bpm = self.bpm;
        self.ramp = None;
    }

    /// Queue a tempo change `in_beats` from now, reached over
    /// `transition_beats`.
    pub fn schedule_tempo_change(&mut self, target_bpm: f64, in_beats: f64, transition_beats: f64) {
        let event = TempoEvent {
            beat: self.current_beat + in_beats.max(0.0),
            bpm: clamp_bpm(target_bpm),
            transition_beats: transition_beats.max(0.0),
        };
        let at = self.tempo_events.partition_point(|e| e.beat <= event.beat);
        self.tempo_events.insert(at, event);
    }

    pub fn accelerando(&mut self, target_bpm: f64, over_beats: f64) {
        self.schedule_tempo_change(target_bpm, 0.0, over_beats);
    }

    pub fn ritardando(&mut self, target_bpm: f64, over_beats: f64) {
        self.schedule_tempo_change(target_bpm, 0.0, over_beats);
    }

    /// Hold the current beat by dropping the tempo, then return to it over
    /// half a beat.
    pub fn fermata(&mut self, multiplier: f64) {
        let original = self.bpm;
        self.ramp = None;
        self.bpm = clamp_bpm(self.bpm / multiplier.max(1.0));
        self.schedule_tempo_change(original, 1.0, 0.5);
    }

    pub fn pending_tempo_changes(&self) -> &[TempoEvent] {
        &self.tempo_events
    }

    // ─── Accessors ──────────────────────────────────────────────────────

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn base_bpm(&self) -> f64 {
        self.base_bpm
    }

    pub fn current_beat(&self) -> f64 {
        self.current_beat
    }

    pub fn time_signature(&self) -> TimeSignature {
        self.time_signature
    }

    pub fn set_time_signature(&mut self, ts: TimeSignature) {
        self.time_signature = ts;
    }

    pub fn rubato(&self) -> f64 {
        self.rubato
    }

    pub fn set_rubato(&mut self, amount: f64) {
        self.rubato = amount.clamp(0.0, 1.0);
    }

    pub fn swing(&self) -> f64 {
        self.swing
    }

    pub fn set_swing(&mut self, amount: f64) {
        self.swing = amount.clamp(0.0, 1.0);
    }

    pub fn measure_beats(&self) -> u32 {
        self.time_signature.numerator()
    }

    pub fn current_measure(&self) -> u64 {
        (self.current_beat / self.measure_beats() as f64).floor() as u64
    }

    pub fn beat_in_measure(&self) -> f64 {
        self.current_beat.rem_euclid(self.measure_beats() as f64)
    }

    /// Seconds per beat at the current tempo.
    pub fn beat_duration(&self) -> f64 {
        60.0 / self.bpm
    }

    pub fn beats_to_seconds(&self, beats: f64) -> f64 {
        beats * self.beat_duration()
    }

    pub fn seconds_to_beats(&self, seconds: f64) -> f64 {
        seconds / self.beat_duration()
    }
}

// ─── Rhythm patterns ────────────────────────────────────────────────────────

/// Note durations with an accent per note.
#[derive(Debug, Clone, PartialEq)]
pub struct RhythmPattern {
    pub durations: Vec<f64>,
    /// Accent strengths in [0,1], one per duration
    pub accents: Vec<f64>,
}

impl RhythmPattern {
    /// Accents are padded with 0.5 or truncated to match `durations`.
    pub fn new(durations: Vec<f64>, accents: Vec<f64>) -> Self {
        let accents = (0..durations.len())
            .map(|i| accents.get(i).copied().unwrap_or(0.5).clamp(0.0, 1.0))
            .collect();
        Self { durations, accents }
    }

    pub const NAMES: [&'static str; 7] = [
        "flowing_eighth",
        "dotted_quarter",
        "triplet",
        "syncopated",
        "sparse",
        "gentle_waltz",
        "impressionist_flow",
    ];

    /// One of the built-in patterns.
    pub fn named(name: &str) -> Option<RhythmPattern> {
        let third = 1.0 / 3.0;
        let (d, a): (Vec<f64>, Vec<f64>) = match name {
            "flowing_eighth" => (vec![0.5; 8], vec![0.8, 0.4, 0.6, 0.4, 0.7, 0.4, 0.5, 0.4]),
            "dotted_quarter" => (vec![1.5, 0.5, 1.5, 0.5], vec![0.9, 0.5, 0.7, 0.5]),
            "triplet" => (vec![third; 6], vec![0.8, 0.5, 0.5, 0.7, 0.5, 0.5]),
            "syncopated" => (vec![0.5, 1.0, 0.5, 1.0, 1.0], vec![0.7, 0.9, 0.6, 0.8, 0.7]),
            "sparse" => (vec![2.0, 1.0, 1.0], vec![0.9, 0.6, 0.5]),
            "gentle_waltz" => (vec![1.0, 0.5, 0.5, 1.0], vec![0.9, 0.4, 0.5, 0.7]),
            "impressionist_flow" => (
                vec![0.75, 0.25, 0.5, 0.5, 1.0, 1.0],
                vec![0.8, 0.4, 0.6, 0.5, 0.7, 0.6],
            ),
            _ => return None,
        };
        Some(RhythmPattern::new(d, a))
    }

    pub fn len(&self) -> usize {
        self.durations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.durations.is_empty()
    }

    pub fn total_beats(&self) -> f64 {
        self.durations.iter().sum()
    }
}

/// A random pattern filling `length_beats`. Higher `complexity` draws from
/// shorter note values; on-beat notes get stronger accents.
pub fn generate_pattern<R: Rng + ?Sized>(
    length_beats: f64,
    complexity: f64,
    rng: &mut R,
) -> RhythmPattern {
    let available: &[f64] = if complexity < 0.3 {
        &[1.0, 2.0, 1.5]
    } else if complexity < 0.7 {
        &[0.5, 1.0, 1.5, 0.75, 0.25]
    } else {
        &[0.25, 0.5, 0.75, 1.0, 1.0 / 3.0, 0.125]
    };

    let mut durations = Vec::new();
    let mut accents = Vec::new();
    let mut total = 0.0;
    while total < length_beats {
        let remaining = length_beats - total;
        let valid: Vec<f64> = available
            .iter()
            .copied()
            .filter(|&d| d <= remaining + 0.01)
            .collect();
        let Some(&dur) = valid.choose(rng) else {
            if remaining > 0.1 {
                durations.push(remaining);
                accents.push(0.5);
            }
            break;
        };
        let accent = if total.rem_euclid(1.0) < 0.1 {
            0.7 + rng.gen::<f64>() * 0.3
        } else {
            0.3 + rng.gen::<f64>() * 0.4
        };
        durations.push(dur);
        accents.push(accent);
        total += dur;
    }
    RhythmPattern::new(durations, accents)
}

/// Split or merge notes (30% each position), then jitter accents.
/// Total length is preserved.
pub fn vary_pattern<R: Rng + ?Sized>(base: &RhythmPattern, rng: &mut R) -> RhythmPattern {
    let mut durations = base.durations.clone();
    let mut accents = base.accents.clone();

    let mut i = 0;
    while i < durations.len() {
        if rng.gen::<f64>() < 0.3 {
            if rng.gen::<bool>() && durations[i] >= 0.5 {
                let half = durations[i] / 2.0;
                durations[i] = half;
                durations.insert(i + 1, half);
                accents.insert(i + 1, accents[i] * 0.7);
            } else if i + 1 < durations.len() {
                durations[i] += durations[i + 1];
                durations.remove(i + 1);
                accents.remove(i + 1);
            }
        }
        i += 1;
    }

    for a in accents.iter_mut() {
        *a = (*a + gaussian(rng, 0.1)).clamp(0.1, 1.0);
    }
    RhythmPattern::new(durations, accents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::seeded;
    use crate::types::SimClock;
    use std::time::Duration;

    fn engine(bpm: f64) -> (RhythmEngine, SimClock) {
        let clock = SimClock::new();
        let mut r = RhythmEngine::new(bpm, TimeSignature::FourFour, Arc::new(clock.clone()));
        r.set_rubato(0.0);
        r.start();
        (r, clock)
    }

    #[test]
    fn test_tick_advances_by_tempo() {
        let (mut r, clock) = engine(60.0);
        clock.advance(Duration::from_secs(2));
        let beats = r.tick();
        assert!((beats - 2.0).abs() < 1e-9);
        assert!((r.current_beat() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_rubato_bounds_effective_tempo() {
        let (mut r, clock) = engine(100.0);
        r.set_rubato(1.0);
        for _ in 0..10_000 {
            clock.advance(Duration::from_millis(50));
            r.tick();
            let eff = r.effective_bpm();
            assert!((85.0 - 1e-9..=115.0 + 1e-9).contains(&eff), "eff {}", eff);
            assert!(r.phase > -PI - 1e-9 && r.phase <= PI + 1e-9);
        }
    }

    #[test]
    fn test_tempo_clamp() {
        let (mut r, _) = engine(72.0);
        r.set_tempo(10.0);
        assert_eq!(r.effective_bpm(), 20.0);
        r.set_tempo(1000.0);
        assert_eq!(r.effective_bpm(), 300.0);
    }

    #[test]
    fn test_scheduled_tempo_change_ramps() {
        let (mut r, clock) = engine(60.0);
        r.schedule_tempo_change(120.0, 1.0, 2.0);
        r.schedule_tempo_change(90.0, 0.5, 0.0);
        assert_eq!(r.pending_tempo_changes()[0].bpm, 90.0);

        // 0.6 beats: immediate change to 90 fires
        clock.advance(Duration::from_millis(600));
        r.tick();
        clock.advance(Duration::from_millis(10));
        r.tick();
        assert_eq!(r.bpm(), 90.0);

        for _ in 0..400 {
            clock.advance(Duration::from_millis(10));
            r.tick();
        }
        assert_eq!(r.bpm(), 120.0);
        assert_eq!(r.base_bpm(), 120.0);
        assert!(r.pending_tempo_changes().is_empty());
    }

    #[test]
    fn test_fermata_restores_tempo() {
        let (mut r, clock) = engine(80.0);
        r.fermata(2.0);
        assert_eq!(r.bpm(), 40.0);
        for _ in 0..500 {
            clock.advance(Duration::from_millis(10));
            r.tick();
        }
        assert_eq!(r.bpm(), 80.0);
    }

    #[test]
    fn test_swing_only_moves_off_beats() {
        let (mut r, _) = engine(72.0);
        r.set_swing(1.0);
        assert_eq!(r.apply_swing(1.0), 1.0);
        assert!((r.apply_swing(0.25) - (0.25 + SWING_DELAY)).abs() < 1e-9);
        r.set_swing(0.0);
        assert_eq!(r.apply_swing(0.25), 0.25);
    }

    #[test]
    fn test_beat_strength() {
        let (mut r, _) = engine(72.0);
        assert_eq!(r.beat_strength(0.0), 1.0);
        assert_eq!(r.beat_strength(2.0), 0.8);
        assert_eq!(r.beat_strength(3.0), 0.6);
        assert_eq!(r.beat_strength(4.0), 1.0);
        assert_eq!(r.beat_strength(1.5), 0.3);
        r.set_time_signature(TimeSignature::ThreeFour);
        assert_eq!(r.beat_strength(2.0), 0.5);
        assert_eq!(r.beat_strength(3.0), 1.0);
    }

    #[test]
    fn test_measure_position() {
        let (mut r, clock) = engine(60.0);
        clock.advance(Duration::from_millis(9500));
        r.tick();
        assert_eq!(r.current_measure(), 2);
        assert!((r.beat_in_measure() - 1.5).abs() < 1e-9);
        assert!((r.beats_to_seconds(2.0) - 2.0).abs() < 1e-9);
        assert!((r.seconds_to_beats(3.0) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_named_patterns_consistent() {
        for name in RhythmPattern::NAMES {
            let p = RhythmPattern::named(name).unwrap();
            assert_eq!(p.durations.len(), p.accents.len(), "{}", name);
        }
        assert!(RhythmPattern::named("bossa").is_none());
        assert!((RhythmPattern::named("triplet").unwrap().total_beats() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_generate_pattern_fills_length() {
        let mut rng = seeded(42);
        for complexity in [0.1, 0.5, 0.9] {
            for _ in 0..50 {
                let p = generate_pattern(4.0, complexity, &mut rng);
                assert_eq!(p.durations.len(), p.accents.len());
                assert!((p.total_beats() - 4.0).abs() < 0.15, "total {}", p.total_beats());
                assert!(p.accents.iter().all(|a| (0.0..=1.0).contains(a)));
            }
        }
    }

    #[test]
    fn test_vary_pattern_preserves_length() {
        let mut rng = seeded(42);
        let base = RhythmPattern::named("impressionist_flow").unwrap();
        for _ in 0..50 {
            let v = vary_pattern(&base, &mut rng);
            assert_eq!(v.durations.len(), v.accents.len());
            assert!((v.total_beats() - base.total_beats()).abs() < 1e-9);
            assert!(v.accents.iter().all(|a| (0.1..=1.0).contains(a)));
        }
    }
}
