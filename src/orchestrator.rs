use crate::chord::{Chord, ChordProgression, ChordQuality};
use crate::config::EngineConfig;
use crate::harmony::{HarmonyEngine, HISTORY_LEN};
use crate::melody::MelodyEngine;
use crate::rhythm::RhythmEngine;
use crate::scale::{Scale, ScaleType};
use crate::scheduler::EventScheduler;
use crate::sink::{ChordObserver, EventSink, NoteObserver};
use crate::types::*;
use log::{debug, info, trace};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

/// MIDI "all notes off" controller.
pub const CC_ALL_NOTES_OFF: u8 = 123;

const NEXT_PROGRESSION_LENGTHS: [usize; 6] = [3, 4, 4, 4, 5, 6];

/// Running counters for one session.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct OrchestratorStats {
    pub ticks: u64,
    pub note_ons: u64,
    pub note_offs: u64,
    /// Emits the sink refused
    pub dropped: u64,
    /// note_offs skipped because their note_on never sounded
    pub orphan_offs: u64,
    pub chord_changes: u64,
    pub modulations: u64,
    pub phrases: u64,
    pub arpeggios: u64,
}

/// Generator state for one performance.
///
/// Owns the sub-engines, the scheduler and the set of sounding notes.
/// Driven one `tick` at a time, by the engine's worker thread or by the
/// simulator; nothing here sleeps or spawns.
pub struct Orchestrator {
    pub(crate) config: EngineConfig,
    pub(crate) harmony: HarmonyEngine,
    pub(crate) rh: MelodyEngine,
    pub(crate) lh: MelodyEngine,
    pub(crate) rhythm: RhythmEngine,
    pub(crate) scheduler: EventScheduler,
    /// Sounding (pitch, channel) → number of unmatched note_ons
    active: BTreeMap<(u8, u8), u32>,
    progression: ChordProgression,
    index: usize,
    pub(crate) chord_beat_counter: f64,
    pub(crate) rh_phrase_counter: f64,
    pub(crate) lh_pattern_counter: f64,
    /// Beats until the next impressionist-wash phrase decision
    pub(crate) wash_threshold: f64,
    measures_until_modulation: i32,
    /// Set on the tick a chord begins; cleared once both hands have run.
    pub(crate) chord_onset: bool,
    pub(crate) rng: StdRng,
    sink: Option<Box<dyn EventSink>>,
    chord_observer: Option<Box<dyn ChordObserver>>,
    note_observer: Option<Box<dyn NoteObserver>>,
    modulation_history: VecDeque<Scale>,
    pub(crate) stats: OrchestratorStats,
}

impl Orchestrator {
    pub fn new(config: EngineConfig, clock: Arc<dyn Clock>, rng: StdRng) -> Self {
        let config = config.sanitized();
        let scale = Scale::new(config.key_root as i32, config.scale_type);
        let mut rhythm = RhythmEngine::new(config.tempo, config.time_signature, clock);
        rhythm.set_rubato(config.rubato());
        let home = Chord::new(config.key_root as i32, ChordQuality::Major7);

        Self {
            harmony: HarmonyEngine::new(config.key_root as i32, config.scale_type, config.tension),
            rh: MelodyEngine::new(scale, config.rh.register, config.rh.density, config.expressiveness),
            lh: MelodyEngine::new(scale, config.lh.register, config.lh.density, config.expressiveness),
            rhythm,
            scheduler: EventScheduler::new(),
            active: BTreeMap::new(),
            progression: ChordProgression::new(vec![home], vec![4.0]),
            index: 0,
            chord_beat_counter: 0.0,
            rh_phrase_counter: 0.0,
            lh_pattern_counter: 0.0,
            wash_threshold: 2.0,
            measures_until_modulation: 8,
            chord_onset: false,
            rng,
            sink: None,
            chord_observer: None,
            note_observer: None,
            modulation_history: VecDeque::with_capacity(HISTORY_LEN),
            stats: OrchestratorStats::default(),
            config,
        }
    }

    // ─── Wiring ─────────────────────────────────────────────────────────

    pub fn set_sink(&mut self, sink: Box<dyn EventSink>) {
        self.sink = Some(sink);
    }

    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    pub fn set_chord_observer(&mut self, observer: Option<Box<dyn ChordObserver>>) {
        self.chord_observer = observer;
    }

    pub fn set_note_observer(&mut self, observer: Option<Box<dyn NoteObserver>>) {
        self.note_observer = observer;
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────

    /// Seed a 4-chord progression, rewind the beat clock and announce the
    /// first chord.
    pub fn begin(&mut self) {
        self.progression = self.harmony.generate_progression(4, &mut self.rng);
        self.index = 0;
        self.chord_beat_counter = 0.0;
        self.rh_phrase_counter = 0.0;
        self.lh_pattern_counter = 0.0;
        self.chord_onset = true;
        self.rhythm.start();
        info!(
            "Starting in {} at {:.0} BPM: {}",
            self.harmony.scale(),
            self.rhythm.bpm(),
            self.progression
        );
        self.announce_chord();
    }

    /// One generator iteration against the caller's latest config.
    pub fn tick(&mut self, config: &EngineConfig) {
        self.apply_config(config);

        let beats = self.rhythm.tick();
        self.process_due();
        self.update_harmony(beats);
        self.right_hand(beats);
        self.left_hand(beats);
        self.check_modulation();
        self.chord_onset = false;

        self.stats.ticks += 1;
        if self.stats.ticks % 1000 == 0 {
            debug!(
                "Generator: beat {:.1}, {} on / {} off, {} dropped, {} pending, {} sounding",
                self.rhythm.current_beat(),
                self.stats.note_ons,
                self.stats.note_offs,
                self.stats.dropped,
                self.scheduler.len(),
                self.active_note_count()
            );
        }
    }

    /// Release every sounding note, send all-notes-off and forget anything
    /// still scheduled.
    pub fn all_notes_off(&mut self) {
        let sounding = std::mem::take(&mut self.active);
        for (&(pitch, channel), &count) in &sounding {
            for _ in 0..count {
                let result = match self.sink.as_mut() {
                    Some(sink) => sink.emit_note_off(pitch, channel),
                    None => Ok(()),
                };
                match result {
                    Ok(()) => {
                        self.stats.note_offs += 1;
                        if let Some(obs) = self.note_observer.as_mut() {
                            obs.note(pitch, 0, false);
                        }
                    }
                    Err(e) => {
                        self.stats.dropped += 1;
                        debug!("note_off {} failed during release: {}", pitch, e);
                    }
                }
            }
        }
        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.emit_cc(CC_ALL_NOTES_OFF, 0, self.config.channel) {
                debug!("all-notes-off CC failed: {}", e);
            }
        }
        self.scheduler.clear();
        debug!("Released {} sounding notes", sounding.values().sum::<u32>());
    }

    // ─── Config application ─────────────────────────────────────────────

    /// Push scalar settings into the sub-engines. Tempo and key go through
    /// `set_tempo` / `set_key` because they reset state.
    fn apply_config(&mut self, config: &EngineConfig) {
        // Keep our own record of tempo and key; those change by command.
        let incoming = EngineConfig {
            tempo: self.config.tempo,
            key_root: self.config.key_root,
            scale_type: self.config.scale_type,
            ..*config
        };
        if incoming == self.config {
            return;
        }
        let c = incoming.sanitized();
        self.harmony.set_tension(c.tension);
        for (melody, hand_density, register) in [
            (&mut self.rh, c.rh.density, c.rh.register),
            (&mut self.lh, c.lh.density, c.lh.register),
        ] {
            melody.set_density(hand_density);
            melody.set_expressiveness(c.expressiveness);
            melody.set_register(register.0, register.1);
        }
        self.rhythm.set_rubato(c.rubato());
        self.rhythm.set_time_signature(c.time_signature);
        self.config = c;
    }

    pub fn set_tempo(&mut self, bpm: f64) {
        self.config.set_tempo(bpm);
        self.rhythm.set_tempo(bpm);
        info!("Tempo {:.1} BPM", self.rhythm.bpm());
    }

    pub fn schedule_tempo_change(&mut self, target_bpm: f64, in_beats: f64, transition_beats: f64) {
        self.rhythm
            .schedule_tempo_change(target_bpm, in_beats, transition_beats);
    }

    /// Move the key centre. Harmony and both hands change together.
    pub fn set_key(&mut self, root: i32, scale_type: Option<ScaleType>) {
        self.config.set_key(root, scale_type);
        let mode = scale_type.unwrap_or(self.config.scale_type);
        self.harmony.modulate(Some(root), Some(mode));
        let scale = self.harmony.scale();
        self.rh.set_scale(scale);
        self.lh.set_scale(scale);
        info!("Key set to {}", scale);
    }

    pub fn set_measures_until_modulation(&mut self, measures: i32) {
        self.measures_until_modulation = measures;
    }

    // ─── Per-tick steps ─────────────────────────────────────────────────

    fn process_due(&mut self) {
        let cursor = self.rhythm.current_beat();
        while let Some(event) = self.scheduler.pop_due(cursor) {
            self.emit(event);
        }
    }

    /// Active notes are counted per (pitch, channel), so overlapping
    /// same-pitch notes each get their own note_off.
    fn emit(&mut self, event: ScheduledEvent) {
        let key = (event.pitch, event.channel);
        match event.kind {
            EventKind::NoteOn => {
                let result = match self.sink.as_mut() {
                    Some(sink) => sink.emit_note_on(event.pitch, event.velocity, event.channel),
                    None => return,
                };
                match result {
                    Ok(()) => {
                        *self.active.entry(key).or_insert(0) += 1;
                        self.stats.note_ons += 1;
                        if let Some(obs) = self.note_observer.as_mut() {
                            obs.note(event.pitch, event.velocity, true);
                        }
                    }
                    Err(e) => {
                        self.stats.dropped += 1;
                        debug!("note_on {} dropped: {}", note_name(event.pitch), e);
                    }
                }
            }
            EventKind::NoteOff => {
                let Some(&count) = self.active.get(&key) else {
                    self.stats.orphan_offs += 1;
                    trace!("note_off {} has no sounding note_on", note_name(event.pitch));
                    return;
                };
                let result = match self.sink.as_mut() {
                    Some(sink) => sink.emit_note_off(event.pitch, event.channel),
                    None => return,
                };
                match result {
                    Ok(()) => {
                        if count <= 1 {
                            self.active.remove(&key);
                        } else {
                            self.active.insert(key, count - 1);
                        }
                        self.stats.note_offs += 1;
                        if let Some(obs) = self.note_observer.as_mut() {
                            obs.note(event.pitch, 0, false);
                        }
                    }
                    Err(e) => {
                        // Still sounding; the release on stop will retry.
                        self.stats.dropped += 1;
                        debug!("note_off {} dropped: {}", note_name(event.pitch), e);
                    }
                }
            }
        }
    }

    fn update_harmony(&mut self, beats: f64) {
        self.chord_beat_counter += beats;
        let duration = self
            .progression
            .get(self.index)
            .map(|(_, d)| d)
            .unwrap_or(4.0);
        if self.chord_beat_counter >= duration {
            self.chord_beat_counter = 0.0;
            self.advance_chord();
        }
    }

    /// Step to the next chord, generating a fresh progression past the end.
    pub fn advance_chord(&mut self) {
        self.index += 1;
        if self.index >= self.progression.len() {
            let length = *NEXT_PROGRESSION_LENGTHS
                .choose(&mut self.rng)
                .unwrap_or(&4);
            self.progression = self.harmony.generate_progression(length, &mut self.rng);
            self.index = 0;
            self.measures_until_modulation -= 1;
            debug!("New progression: {}", self.progression);
        }
        self.chord_onset = true;
        self.stats.chord_changes += 1;
        self.announce_chord();
    }

    fn announce_chord(&mut self) {
        let chord = self.current_chord();
        debug!("Chord → {}", chord);
        if let Some(obs) = self.chord_observer.as_mut() {
            obs.chord_changed(&chord);
        }
    }

    fn check_modulation(&mut self) {
        if self.measures_until_modulation > 0 {
            return;
        }
        let (root, mode) = self.harmony.suggest_modulation(&mut self.rng);
        self.harmony.modulate(Some(root), Some(mode));
        let scale = self.harmony.scale();
        self.rh.set_scale(scale);
        self.lh.set_scale(scale);
        self.measures_until_modulation = self.rng.gen_range(6..=12);

        if self.modulation_history.len() == HISTORY_LEN {
            self.modulation_history.pop_front();
        }
        self.modulation_history.push_back(scale);
        self.stats.modulations += 1;
        info!("Modulating to {}", scale);
    }

    // ─── Scheduling ─────────────────────────────────────────────────────

    /// Queue a note_on/note_off pair `delay` beats from now, humanized by
    /// the current expressiveness.
    pub(crate) fn schedule_note(&mut self, pitch: i32, velocity: i32, duration: f64, delay: f64) {
        let delay = self
            .rhythm
            .humanize(delay, self.config.expressiveness, &mut self.rng);
        let on_beat = self.rhythm.current_beat() + delay;
        let off_beat = on_beat + duration.max(MIN_NOTE_BEATS);
        let pitch = clamp_pitch(pitch);
        let channel = self.config.channel;
        self.scheduler
            .insert(on_beat, EventKind::NoteOn, pitch, clamp_velocity(velocity), channel);
        self.scheduler
            .insert(off_beat, EventKind::NoteOff, pitch, 0, channel);
    }

    /// Queue a phrase's notes back to back, velocities clamped into
    /// `velocity_range`. Stacked notes share the next note's onset.
    pub(crate) fn schedule_phrase(&mut self, phrase: &Phrase, velocity_range: (u8, u8)) {
        let (lo, hi) = velocity_range;
        let mut offset = phrase.start_beat;
        for note in &phrase.notes {
            let velocity = (note.velocity as i32).clamp(lo as i32, hi as i32);
            self.schedule_note(note.pitch as i32, velocity, note.duration, offset + note.delay);
            if !note.stacked {
                offset += note.duration;
            }
        }
        self.stats.phrases += 1;
    }

    // ─── Accessors ──────────────────────────────────────────────────────

    pub fn current_chord(&self) -> Chord {
        self.progression
            .get(self.index)
            .map(|(c, _)| c)
            .unwrap_or_else(|| Chord::new(self.config.key_root as i32, ChordQuality::Major7))
    }

    pub fn progression(&self) -> &ChordProgression {
        &self.progression
    }

    pub fn progression_index(&self) -> usize {
        self.index
    }

    pub fn harmony(&self) -> &HarmonyEngine {
        &self.harmony
    }

    pub fn rh_melody(&self) -> &MelodyEngine {
        &self.rh
    }

    pub fn lh_melody(&self) -> &MelodyEngine {
        &self.lh
    }

    pub fn rhythm(&self) -> &RhythmEngine {
        &self.rhythm
    }

    pub fn current_beat(&self) -> f64 {
        self.rhythm.current_beat()
    }

    pub fn pending_events(&self) -> usize {
        self.scheduler.len()
    }

    /// Total unmatched note_ons across all sounding pitches.
    pub fn active_note_count(&self) -> usize {
        self.active.values().map(|&n| n as usize).sum()
    }

    /// Sounding pitches on any channel, ascending.
    pub fn sounding_pitches(&self) -> Vec<u8> {
        let mut pitches: Vec<u8> = self.active.keys().map(|&(p, _)| p).collect();
        pitches.dedup();
        pitches
    }

    pub fn measures_until_modulation(&self) -> i32 {
        self.measures_until_modulation
    }

    /// Keys modulated to, oldest first.
    pub fn modulation_history(&self) -> impl Iterator<Item = &Scale> {
        self.modulation_history.iter()
    }

    pub fn stats(&self) -> OrchestratorStats {
        self.stats
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
