//! Melodic line generation for one hand: contour-driven phrases,
//! arpeggios, motif development and accompaniment figures.

use crate::chord::Chord;
use crate::random::{chance, gaussian};
use crate::scale::Scale;
use crate::types::{
    AccompanimentStyle, ArpeggioPattern, Articulation, ContourType, Note, Phrase, MIN_NOTE_BEATS,
};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::VecDeque;

/// Maximum number of phrases kept for later development.
pub const MOTIF_CAPACITY: usize = 5;

const RHYTHMIC_VALUES: [f64; 6] = [0.25, 0.5, 0.75, 1.0, 1.5, 2.0];
const TRANSPOSE_INTERVALS: [i32; 8] = [-7, -5, -3, -2, 2, 3, 5, 7];

/// Fixed-capacity FIFO of recent phrases. The oldest is dropped on overflow.
#[derive(Debug, Clone)]
pub struct MotifStore {
    phrases: VecDeque<Phrase>,
    capacity: usize,
}

impl MotifStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            phrases: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, phrase: Phrase) {
        if self.phrases.len() == self.capacity {
            self.phrases.pop_front();
        }
        self.phrases.push_back(phrase);
    }

    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }

    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&Phrase> {
        if self.phrases.is_empty() {
            return None;
        }
        self.phrases.get(rng.gen_range(0..self.phrases.len()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Phrase> {
        self.phrases.iter()
    }
}

impl Default for MotifStore {
    fn default() -> Self {
        Self::new(MOTIF_CAPACITY)
    }
}

/// Melody generator for one hand. The orchestrator owns two: right hand
/// in the upper register, left hand in the bass.
#[derive(Debug, Clone)]
pub struct MelodyEngine {
    scale: Scale,
    register_low: u8,
    register_high: u8,
    density: f64,
    expressiveness: f64,
    last_note: u8,
    motifs: MotifStore,
}

impl MelodyEngine {
    pub fn new(scale: Scale, register: (u8, u8), density: f64, expressiveness: f64) -> Self {
        let (low, high) = ordered(register);
        Self {
            scale,
            register_low: low,
            register_high: high,
            density: density.clamp(0.0, 1.0),
            expressiveness: expressiveness.clamp(0.0, 1.0),
            last_note: 72,
            motifs: MotifStore::default(),
        }
    }

    // ─── Accessors ──────────────────────────────────────────────────────

    pub fn scale(&self) -> Scale {
        self.scale
    }

    pub fn set_scale(&mut self, scale: Scale) {
        self.scale = scale;
    }

    pub fn register(&self) -> (u8, u8) {
        (self.register_low, self.register_high)
    }

    pub fn set_register(&mut self, low: u8, high: u8) {
        let (low, high) = ordered((low, high));
        self.register_low = low;
        self.register_high = high;
    }

    pub fn density(&self) -> f64 {
        self.density
    }

    pub fn set_density(&mut self, density: f64) {
        self.density = density.clamp(0.0, 1.0);
    }

    pub fn expressiveness(&self) -> f64 {
        self.expressiveness
    }

    pub fn set_expressiveness(&mut self, expressiveness: f64) {
        self.expressiveness = expressiveness.clamp(0.0, 1.0);
    }

    pub fn last_note(&self) -> u8 {
        self.last_note
    }

    pub fn motif_count(&self) -> usize {
        self.motifs.len()
    }

    pub fn motifs(&self) -> &MotifStore {
        &self.motifs
    }

    fn low(&self) -> i32 {
        self.register_low as i32
    }

    fn high(&self) -> i32 {
        self.register_high as i32
    }

    // ─── Phrases ────────────────────────────────────────────────────────

    /// A contour-shaped phrase spanning roughly `length_beats`.
    ///
    /// Pitches snap to chord tones (40% of the time, when a chord is given)
    /// or to the scale. Total duration stays within half a beat of
    /// `length_beats`.
    pub fn generate_phrase<R: Rng + ?Sized>(
        &mut self,
        length_beats: f64,
        contour: Option<ContourType>,
        chord: Option<&Chord>,
        rng: &mut R,
    ) -> Phrase {
        let length_beats = length_beats.max(MIN_NOTE_BEATS);
        let contour = contour.unwrap_or_else(|| {
            *ContourType::ALL
                .choose(rng)
                .unwrap_or(&ContourType::Arch)
        });

        let note_count = ((2.0 * length_beats * (0.5 + self.density)).round() as usize).max(1);
        let values = contour_curve(contour, note_count, rng);

        let scale_notes = self.scale.notes_in_range(self.low(), self.high());
        let chord_tones = chord
            .map(|c| c.voicing(self.low(), self.high(), true, true, rng))
            .unwrap_or_default();

        let mut notes: Vec<Note> = Vec::with_capacity(note_count);
        let mut elapsed = 0.0;
        for (i, &value) in values.iter().enumerate() {
            let target = self.low() + (value * (self.high() - self.low()) as f64) as i32;

            let snapped = if !chord_tones.is_empty() && chance(rng, 0.4) {
                nearest(&chord_tones, target)
            } else {
                nearest(&scale_notes, target)
            };
            let mut pitch = snapped.unwrap_or_else(|| self.scale.quantize(target)) as i32;

            if chance(rng, 0.1) {
                pitch += if rng.gen::<bool>() { 1 } else { -1 };
            }

            let remaining = length_beats - elapsed;
            let base = remaining / (note_count - i) as f64;
            let duration = self.vary_duration(base, rng);
            elapsed += duration;

            let mut velocity = 70 + (30.0 * value).round() as i32;
            if self.expressiveness > 0.3 {
                velocity += gaussian(rng, 10.0).round() as i32;
            }
            let velocity = velocity.clamp(40, 110);

            let delay = if self.expressiveness > 0.4 {
                gaussian(rng, 0.02 * self.expressiveness)
            } else {
                0.0
            };

            let articulation = choose_articulation(i, note_count, duration, rng);
            notes.push(
                Note::new(pitch, duration, velocity)
                    .with_articulation(articulation)
                    .with_delay(delay),
            );
        }

        fit_to_length(&mut notes, length_beats);

        if let Some(last) = notes.last() {
            self.last_note = last.pitch;
        }

        let phrase = Phrase::new(notes, contour);
        if phrase.len() >= 3 && chance(rng, 0.3) {
            self.motifs.push(phrase.clone());
        }
        phrase
    }

    /// Snap to the nearest common rhythmic value, sometimes as a triplet.
    fn vary_duration<R: Rng + ?Sized>(&self, base: f64, rng: &mut R) -> f64 {
        let mut closest = RHYTHMIC_VALUES
            .iter()
            .copied()
            .min_by(|a, b| (a - base).abs().total_cmp(&(b - base).abs()))
            .unwrap_or(1.0);
        if chance(rng, 0.2) {
            closest *= 2.0 / 3.0;
        }
        closest.max(MIN_NOTE_BEATS)
    }

    // ─── Arpeggios ──────────────────────────────────────────────────────

    /// The chord's voicing in the hand's register, spread evenly over
    /// `length_beats`.
    pub fn generate_arpeggio<R: Rng + ?Sized>(
        &self,
        chord: &Chord,
        length_beats: f64,
        pattern: ArpeggioPattern,
        rng: &mut R,
    ) -> Phrase {
        let voicing = chord.voicing(self.low(), self.high(), true, true, rng);
        if voicing.is_empty() || length_beats <= 0.0 {
            return Phrase::empty();
        }

        let ordered: Vec<u8> = match pattern {
            ArpeggioPattern::Up => voicing,
            ArpeggioPattern::Down => voicing.into_iter().rev().collect(),
            ArpeggioPattern::UpDown => {
                let n = voicing.len();
                let descent: Vec<u8> = if n > 2 {
                    voicing[1..n - 1].iter().rev().copied().collect()
                } else {
                    Vec::new()
                };
                voicing.into_iter().chain(descent).collect()
            }
            ArpeggioPattern::Random => {
                let mut shuffled = voicing;
                shuffled.shuffle(rng);
                shuffled
            }
        };

        let note_duration = length_beats / ordered.len() as f64;
        let notes = ordered
            .iter()
            .enumerate()
            .map(|(i, &pitch)| {
                let mut velocity = 60 + rng.gen_range(0..=20);
                if i == 0 {
                    velocity += 15;
                }
                let delay = if self.expressiveness > 0.5 {
                    gaussian(rng, 0.01)
                } else {
                    0.0
                };
                Note::new(pitch as i32, note_duration, velocity)
                    .with_articulation(Articulation::Legato)
                    .with_delay(delay)
            })
            .collect();

        let contour = if pattern == ArpeggioPattern::Up {
            ContourType::Ascending
        } else {
            ContourType::Descending
        };
        Phrase::new(notes, contour)
    }

    // ─── Motif development ──────────────────────────────────────────────

    /// Transform `motif`, or a stored motif when none is given. With nothing
    /// stored, falls back to a fresh 4-beat phrase.
    pub fn develop_motif<R: Rng + ?Sized>(&mut self, motif: Option<&Phrase>, rng: &mut R) -> Phrase {
        let source = match motif {
            Some(m) => m.clone(),
            None => match self.motifs.choose(rng) {
                Some(m) => m.clone(),
                None => return self.generate_phrase(4.0, None, None, rng),
            },
        };

        let developed = match rng.gen_range(0..5) {
            0 => {
                let interval = *TRANSPOSE_INTERVALS.choose(rng).unwrap_or(&5);
                source.transpose(interval)
            }
            1 => self.invert(&source),
            2 => scale_durations(&source, 2.0),
            3 => scale_durations(&source, 0.5),
            _ => ornament(&source, rng),
        };
        self.fold_into_register(developed)
    }

    /// Move out-of-register notes by octaves back inside, when the register
    /// spans at least an octave.
    fn fold_into_register(&self, mut phrase: Phrase) -> Phrase {
        if self.high() - self.low() < 12 {
            return phrase;
        }
        for n in phrase.notes.iter_mut() {
            let mut p = n.pitch as i32;
            while p < self.low() {
                p += 12;
            }
            while p > self.high() {
                p -= 12;
            }
            n.pitch = p as u8;
        }
        phrase
    }

    /// Mirror intervals around the first pitch, clamped to the register.
    fn invert(&self, motif: &Phrase) -> Phrase {
        let Some(first) = motif.notes.first() else {
            return motif.clone();
        };
        if motif.len() < 2 {
            return motif.clone();
        }
        let pivot = first.pitch as i32;
        let notes = motif
            .notes
            .iter()
            .map(|n| Note {
                pitch: (2 * pivot - n.pitch as i32).clamp(self.low(), self.high()) as u8,
                ..*n
            })
            .collect();
        Phrase::new(notes, motif.contour)
    }

    // ─── Accompaniment ──────────────────────────────────────────────────

    /// A repeating left-hand figure one octave below the register.
    /// Returns an empty phrase when the voicing has fewer than three notes.
    pub fn generate_accompaniment_figure<R: Rng + ?Sized>(
        &self,
        chord: &Chord,
        length_beats: f64,
        style: AccompanimentStyle,
        rng: &mut R,
    ) -> Phrase {
        let voicing = chord.voicing(self.low() - 12, self.high() - 12, true, true, rng);
        if voicing.len() < 3 || length_beats <= 0.0 {
            return Phrase::empty();
        }
        let bass = voicing[0];
        let upper = &voicing[1..];

        let mut notes = Vec::new();
        match style {
            AccompanimentStyle::Broken => {
                let pattern: Vec<u8> = std::iter::once(bass).chain(upper.iter().copied()).collect();
                let dur = length_beats / pattern.len() as f64 / 2.0;
                cycle_pattern(&mut notes, &pattern, dur, length_beats, 55);
            }
            AccompanimentStyle::Alberti => {
                if upper.len() >= 2 {
                    let top = upper[upper.len() - 1];
                    let pattern = [bass, top, upper[0], top];
                    cycle_pattern(&mut notes, &pattern, 0.25, length_beats, 50);
                }
            }
            AccompanimentStyle::Block => {
                let mut beat = 0.0;
                while beat < length_beats {
                    let last = voicing.len() - 1;
                    for (i, &pitch) in voicing.iter().enumerate() {
                        let mut note = Note::new(pitch as i32, 1.0, 60 + rng.gen_range(-5..=5));
                        note.stacked = i < last;
                        notes.push(note);
                    }
                    beat += 1.0;
                }
            }
            AccompanimentStyle::Tremolo => {
                cycle_pattern(&mut notes, &[bass, upper[0]], 0.125, length_beats, 45);
            }
        }
        Phrase::new(notes, ContourType::Static)
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn ordered((a, b): (u8, u8)) -> (u8, u8) {
    let a = a.min(127);
    let b = b.min(127);
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Contour samples at evenly spaced points, with σ=0.05 noise, in [0,1].
fn contour_curve<R: Rng + ?Sized>(contour: ContourType, count: usize, rng: &mut R) -> Vec<f64> {
    if count <= 1 {
        return vec![0.5];
    }
    (0..count)
        .map(|i| {
            let t = i as f64 / (count - 1) as f64;
            (contour.value_at(t) + gaussian(rng, 0.05)).clamp(0.0, 1.0)
        })
        .collect()
}

/// Closest candidate to `target`; the lower wins a tie.
fn nearest(candidates: &[u8], target: i32) -> Option<u8> {
    candidates
        .iter()
        .copied()
        .min_by_key(|&p| ((p as i32 - target).abs(), p))
}

fn choose_articulation<R: Rng + ?Sized>(
    index: usize,
    count: usize,
    duration: f64,
    rng: &mut R,
) -> Articulation {
    if index + 1 == count {
        return Articulation::Tenuto;
    }
    if duration < 0.3 && chance(rng, 0.5) {
        return Articulation::Staccato;
    }
    if duration > 1.0 {
        return Articulation::Legato;
    }
    if chance(rng, 0.1) {
        Articulation::Accent
    } else {
        Articulation::Normal
    }
}

/// Bring the phrase's total duration back to `length` when rhythmic
/// quantization has pushed it more than half a beat away.
fn fit_to_length(notes: &mut [Note], length: f64) {
    let total: f64 = notes.iter().map(|n| n.duration).sum();
    if total <= 0.0 || (total - length).abs() <= 0.5 {
        return;
    }
    let factor = length / total;
    for n in notes.iter_mut() {
        n.duration = (n.duration * factor).max(MIN_NOTE_BEATS);
    }
    let drift = length - notes.iter().map(|n| n.duration).sum::<f64>();
    if let Some(longest) = notes
        .iter_mut()
        .max_by(|a, b| a.duration.total_cmp(&b.duration))
    {
        longest.duration = (longest.duration + drift).max(MIN_NOTE_BEATS);
    }
}

fn scale_durations(motif: &Phrase, factor: f64) -> Phrase {
    let notes = motif
        .notes
        .iter()
        .map(|n| Note {
            duration: (n.duration * factor).max(MIN_NOTE_BEATS),
            ..*n
        })
        .collect();
    Phrase::new(notes, motif.contour)
}

/// Prepend a grace note to roughly 30% of the notes.
fn ornament<R: Rng + ?Sized>(motif: &Phrase, rng: &mut R) -> Phrase {
    let mut notes = Vec::with_capacity(motif.len() * 2);
    for n in &motif.notes {
        if chance(rng, 0.3) {
            let offset = *[-2, -1, 1, 2].choose(rng).unwrap_or(&1);
            notes.push(
                Note::new(n.pitch as i32 + offset, MIN_NOTE_BEATS, n.velocity as i32 - 10)
                    .with_articulation(Articulation::Staccato)
                    .with_delay(-0.05),
            );
            notes.push(Note {
                duration: (n.duration - MIN_NOTE_BEATS).max(MIN_NOTE_BEATS),
                ..*n
            });
        } else {
            notes.push(*n);
        }
    }
    Phrase::new(notes, motif.contour)
}

fn cycle_pattern(notes: &mut Vec<Note>, pattern: &[u8], dur: f64, length: f64, velocity: i32) {
    if pattern.is_empty() || dur <= 0.0 {
        return;
    }
    let mut beat = 0.0;
    'outer: loop {
        for &pitch in pattern {
            if beat >= length {
                break 'outer;
            }
            notes.push(Note::new(pitch as i32, dur, velocity));
            beat += dur;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chord::ChordQuality;
    use crate::random::seeded;
    use crate::scale::ScaleType;

    fn rh_engine(density: f64) -> MelodyEngine {
        MelodyEngine::new(Scale::new(60, ScaleType::Major), (60, 96), density, 0.6)
    }

    fn lh_engine() -> MelodyEngine {
        MelodyEngine::new(Scale::new(60, ScaleType::Major), (36, 60), 0.4, 0.6)
    }

    #[test]
    fn test_phrase_length_bound() {
        let mut rng = seeded(42);
        let chord = Chord::new(2, ChordQuality::Minor9);
        for density in [0.0, 0.3, 0.5, 0.9, 1.0] {
            let mut m = rh_engine(density);
            for &len in &[1.0, 2.0, 3.0, 4.0, 6.0, 8.0] {
                for _ in 0..25 {
                    let p = m.generate_phrase(len, None, Some(&chord), &mut rng);
                    let total: f64 = p.notes.iter().map(|n| n.duration).sum();
                    assert!(
                        (total - len).abs() <= 0.5,
                        "density {} len {} total {}",
                        density,
                        len,
                        total
                    );
                    assert!(p.notes.iter().all(|n| n.duration > 0.0));
                }
            }
        }
    }

    #[test]
    fn test_phrase_note_count_and_last_note() {
        let mut rng = seeded(7);
        let mut m = rh_engine(0.5);
        let p = m.generate_phrase(4.0, Some(ContourType::Arch), None, &mut rng);
        assert_eq!(p.len(), 8);
        assert_eq!(p.contour, ContourType::Arch);
        assert_eq!(m.last_note(), p.notes[7].pitch);
        assert_eq!(p.notes[7].articulation, Articulation::Tenuto);
        assert!(p.notes.iter().all(|n| (40..=110).contains(&n.velocity)));
    }

    #[test]
    fn test_motif_store_bounded() {
        let mut rng = seeded(42);
        let mut m = rh_engine(0.8);
        for _ in 0..200 {
            m.generate_phrase(4.0, None, None, &mut rng);
            assert!(m.motif_count() <= MOTIF_CAPACITY);
        }
        assert_eq!(m.motif_count(), MOTIF_CAPACITY);
    }

    #[test]
    fn test_motif_store_drops_oldest() {
        let mut store = MotifStore::new(2);
        for pitch in [60, 62, 64] {
            store.push(Phrase::new(vec![Note::new(pitch, 1.0, 70)], ContourType::Static));
        }
        let firsts: Vec<u8> = store.iter().map(|p| p.notes[0].pitch).collect();
        assert_eq!(firsts, vec![62, 64]);
    }

    #[test]
    fn test_arpeggio_patterns() {
        let mut rng = seeded(3);
        let m = rh_engine(0.5);
        let chord = Chord::new(0, ChordQuality::Major7);

        let up = m.generate_arpeggio(&chord, 2.0, ArpeggioPattern::Up, &mut rng);
        assert!(!up.is_empty());
        assert!(up.notes.windows(2).all(|w| w[0].pitch < w[1].pitch));
        assert!((up.total_duration() - 2.0).abs() < 1e-9);
        assert!(up.notes.iter().all(|n| n.articulation == Articulation::Legato));
        assert!(up.notes[0].velocity >= 75);

        let down = m.generate_arpeggio(&chord, 2.0, ArpeggioPattern::Down, &mut rng);
        assert!(down.notes.windows(2).all(|w| w[0].pitch > w[1].pitch));

        let updown = m.generate_arpeggio(&chord, 3.0, ArpeggioPattern::UpDown, &mut rng);
        let peak = updown
            .notes
            .iter()
            .position(|n| n.pitch == updown.notes.iter().map(|n| n.pitch).max().unwrap())
            .unwrap();
        assert!(updown.notes[..=peak].windows(2).all(|w| w[0].pitch < w[1].pitch));
        assert!(updown.notes[peak..].windows(2).all(|w| w[0].pitch > w[1].pitch));
    }

    #[test]
    fn test_develop_motif_without_store_generates() {
        let mut rng = seeded(1);
        let mut m = rh_engine(0.5);
        let p = m.develop_motif(None, &mut rng);
        assert!(!p.is_empty());
    }

    #[test]
    fn test_develop_motif_preserves_shape() {
        let mut rng = seeded(9);
        let m0 = rh_engine(0.5);
        let motif = Phrase::new(
            vec![
                Note::new(72, 1.0, 80),
                Note::new(76, 0.5, 80),
                Note::new(74, 0.5, 80),
            ],
            ContourType::Wave,
        );
        for _ in 0..50 {
            let mut m = m0.clone();
            let dev = m.develop_motif(Some(&motif), &mut rng);
            assert!(dev.len() >= motif.len());
            assert!(dev.notes.iter().all(|n| n.duration >= MIN_NOTE_BEATS));
            assert_eq!(dev.contour, ContourType::Wave);
        }
    }

    #[test]
    fn test_invert_clamps_to_register() {
        let m = MelodyEngine::new(Scale::new(60, ScaleType::Major), (60, 72), 0.5, 0.5);
        let motif = Phrase::new(
            vec![Note::new(62, 1.0, 80), Note::new(72, 1.0, 80)],
            ContourType::Ascending,
        );
        let inv = m.invert(&motif);
        assert_eq!(inv.notes[0].pitch, 62);
        assert_eq!(inv.notes[1].pitch, 60);
    }

    #[test]
    fn test_alberti_figure() {
        let mut rng = seeded(4);
        let m = lh_engine();
        let chord = Chord::new(0, ChordQuality::Major7);
        let fig = m.generate_accompaniment_figure(&chord, 2.0, AccompanimentStyle::Alberti, &mut rng);
        assert_eq!(fig.len(), 8);
        assert_eq!(fig.notes[1].pitch, fig.notes[3].pitch);
        assert!(fig.notes[0].pitch < fig.notes[2].pitch);
        assert!(fig.notes.iter().all(|n| n.velocity == 50 && n.duration == 0.25));
    }

    #[test]
    fn test_block_figure_sounds_together() {
        let mut rng = seeded(4);
        let m = lh_engine();
        let chord = Chord::new(5, ChordQuality::Major9);
        let fig = m.generate_accompaniment_figure(&chord, 2.0, AccompanimentStyle::Block, &mut rng);
        assert!(!fig.is_empty());
        assert!((fig.total_duration() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_broken_and_tremolo_fill_length() {
        let mut rng = seeded(4);
        let m = lh_engine();
        let chord = Chord::new(9, ChordQuality::Minor7);
        for style in [AccompanimentStyle::Broken, AccompanimentStyle::Tremolo] {
            let fig = m.generate_accompaniment_figure(&chord, 2.0, style, &mut rng);
            assert!(!fig.is_empty(), "{:?} empty", style);
            assert!(fig.total_duration() >= 2.0 - 1e-9);
        }
    }

    #[test]
    fn test_fit_to_length_rescales() {
        let mut notes = vec![Note::new(60, 2.0, 70); 4];
        fit_to_length(&mut notes, 4.0);
        let total: f64 = notes.iter().map(|n| n.duration).sum();
        assert!((total - 4.0).abs() < 1e-9);
    }
}
