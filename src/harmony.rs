//! Chord progression generation: templates, free root motion, diatonic
//! quality selection and modulation.

use crate::chord::{Chord, ChordProgression, ChordQuality};
use crate::random::{chance, weighted_choice};
use crate::scale::{Scale, ScaleType};
use log::debug;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::VecDeque;

/// Number of recent chords remembered by the engine.
pub const HISTORY_LEN: usize = 16;

type Template = [(i32, ChordQuality); 4];

const TEMPLATES: [Template; 5] = {
    use ChordQuality::*;
    [
        // Parallel maj7 motion
        [(1, Major7), (2, Minor7), (4, Major7), (1, Major7)],
        // Modal interchange
        [(1, Major7), (6, Minor7), (4, Major7), (5, Dominant7)],
        // Whole-tone colour
        [(1, Augmented), (2, Dominant7), (6, Minor7), (1, Major9)],
        // ii-V-I with ninths
        [(2, Minor9), (5, Dominant9), (1, Major9), (4, Major7)],
        // Suspended
        [(1, Sus4), (1, Major7), (4, Add9), (5, Sus4)],
    ]
};

/// Root movement in semitones for free progressions, weighted toward
/// motion by fourth and fifth.
const FREE_MOVES: [i32; 9] = [0, 2, -2, 3, 4, 5, 7, -3, -5];
const FREE_WEIGHTS: [f64; 9] = [0.5, 1.0, 1.0, 0.8, 0.8, 1.6, 1.6, 0.8, 1.2];

const NEXT_MOVES: [i32; 6] = [5, 7, 2, -1, 3, 4];
const NEXT_WEIGHTS: [f64; 6] = [0.3, 0.2, 0.15, 0.15, 0.1, 0.1];

const DURATION_CHOICES: [f64; 5] = [2.0, 4.0, 4.0, 4.0, 8.0];

/// Generates impressionist progressions over a current key and mode.
pub struct HarmonyEngine {
    scale: Scale,
    current_chord: Option<Chord>,
    tension: f64,
    history: VecDeque<Chord>,
}

impl HarmonyEngine {
    pub fn new(root: i32, scale_type: ScaleType, tension: f64) -> Self {
        Self {
            scale: Scale::new(root, scale_type),
            current_chord: None,
            tension: tension.clamp(0.0, 1.0),
            history: VecDeque::with_capacity(HISTORY_LEN),
        }
    }

    pub fn scale(&self) -> Scale {
        self.scale
    }

    pub fn current_chord(&self) -> Option<Chord> {
        self.current_chord
    }

    pub fn tension(&self) -> f64 {
        self.tension
    }

    pub fn set_tension(&mut self, tension: f64) {
        self.tension = tension.clamp(0.0, 1.0);
    }

    /// Most recent chords, oldest first. Never longer than `HISTORY_LEN`.
    pub fn history(&self) -> impl Iterator<Item = &Chord> {
        self.history.iter()
    }

    fn remember(&mut self, chord: Chord) {
        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(chord);
    }

    /// A progression of exactly `length` chords.
    pub fn generate_progression<R: Rng + ?Sized>(
        &mut self,
        length: usize,
        rng: &mut R,
    ) -> ChordProgression {
        let chords = if length == 4 && chance(rng, 0.6) {
            self.realize_template(rng)
        } else {
            self.free_progression(length, rng)
        };

        let durations = chords
            .iter()
            .map(|_| *DURATION_CHOICES.choose(rng).unwrap_or(&4.0))
            .collect();

        for &c in &chords {
            self.remember(c);
        }
        ChordProgression::new(chords, durations)
    }

    fn realize_template<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<Chord> {
        let template = TEMPLATES[rng.gen_range(0..TEMPLATES.len())];
        template
            .iter()
            .map(|&(degree, quality)| {
                let root = self.scale.degree_to_note(degree, 4);
                let quality = if chance(rng, self.tension * 0.5) {
                    substitute_quality(quality, rng)
                } else {
                    quality
                };
                Chord::new(root as i32, quality)
            })
            .collect()
    }

    fn free_progression<R: Rng + ?Sized>(&self, length: usize, rng: &mut R) -> Vec<Chord> {
        let mut prev_root = self.scale.root as i32;
        let mut chords = Vec::with_capacity(length);
        for _ in 0..length {
            let step = *weighted_choice(&FREE_MOVES, &FREE_WEIGHTS, rng).unwrap_or(&5);
            let root = (prev_root + step).rem_euclid(12);
            let pool = tension_pool(self.tension);
            let quality = *pool.choose(rng).unwrap_or(&ChordQuality::Major7);
            chords.push(Chord::new(root, quality));
            prev_root = root;
        }
        chords
    }

    /// Advance by weighted root motion from the current chord. The first
    /// call seeds the tonic maj7.
    pub fn next_chord<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Chord {
        let Some(current) = self.current_chord else {
            let tonic = Chord::new(self.scale.root as i32, ChordQuality::Major7);
            self.current_chord = Some(tonic);
            self.remember(tonic);
            return tonic;
        };

        let mut weights = NEXT_WEIGHTS;
        if self.tension > 0.5 {
            for w in weights.iter_mut() {
                *w *= 1.0 + self.tension;
            }
        }
        let step = *weighted_choice(&NEXT_MOVES, &weights, rng).unwrap_or(&5);
        let root = (current.root as i32 + step).rem_euclid(12);
        let quality = self.quality_for_context(root, rng);
        let chord = Chord::new(root, quality);
        self.current_chord = Some(chord);
        self.remember(chord);
        chord
    }

    /// Diatonic function when the root is in the scale, colourful otherwise.
    pub fn quality_for_context<R: Rng + ?Sized>(&self, root: i32, rng: &mut R) -> ChordQuality {
        use ChordQuality::*;
        let root_pc = root.rem_euclid(12);
        let degree = self
            .scale
            .intervals()
            .iter()
            .position(|&i| (self.scale.root as i32 + i as i32).rem_euclid(12) == root_pc);
        let family: &[ChordQuality] = match degree {
            Some(0) | Some(3) => &[Major7, Major9, Add9],
            Some(1) | Some(2) | Some(5) => &[Minor7, Minor9],
            Some(4) => &[Dominant7, Dominant9, Sus4],
            Some(_) => &[HalfDiminished7, Diminished7],
            None => &[Major7, Minor7, Dominant7, Augmented],
        };
        *family.choose(rng).unwrap_or(&Major7)
    }

    /// Replace the current scale, keeping whichever part is not supplied.
    pub fn modulate(&mut self, new_root: Option<i32>, new_mode: Option<ScaleType>) {
        let root = new_root.unwrap_or(self.scale.root as i32);
        let mode = new_mode.unwrap_or(self.scale.scale_type);
        self.scale = Scale::new(root, mode);
        debug!("Harmony now in {}", self.scale);
    }

    /// One of five closely related keys, chosen uniformly. Roots are folded
    /// into the octave above middle C so repeated modulation cannot drift
    /// out of MIDI range.
    pub fn suggest_modulation<R: Rng + ?Sized>(&self, rng: &mut R) -> (i32, ScaleType) {
        let root = self.scale.root as i32;
        let mode = self.scale.scale_type;
        let targets = [
            (root + 7, mode),
            (root + 5, mode),
            (root, ScaleType::Dorian),
            (root + 3, ScaleType::NaturalMinor),
            (root - 1, mode),
        ];
        let (r, m) = targets[rng.gen_range(0..targets.len())];
        (fold_root(r), m)
    }
}

/// Fold a root into [60, 72), preserving its pitch class.
pub fn fold_root(root: i32) -> i32 {
    60 + root.rem_euclid(12)
}

fn tension_pool(tension: f64) -> &'static [ChordQuality] {
    use ChordQuality::*;
    if tension < 0.3 {
        &[Major7, Minor7, Add9, Sus4]
    } else if tension < 0.6 {
        &[Major9, Minor9, Dominant7, Minor7]
    } else {
        &[Augmented, Diminished7, Dominant9, HalfDiminished7]
    }
}

fn substitute_quality<R: Rng + ?Sized>(quality: ChordQuality, rng: &mut R) -> ChordQuality {
    use ChordQuality::*;
    let options: &[ChordQuality] = match quality {
        Major => &[Major7, Add9],
        Minor => &[Minor7, Minor9],
        Major7 => &[Major9, Major6],
        Minor7 => &[Minor9, Minor6],
        Dominant7 => &[Dominant9, Sus4],
        _ => return quality,
    };
    *options.choose(rng).unwrap_or(&quality)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::seeded;

    #[test]
    fn test_progression_length_and_durations() {
        let mut rng = seeded(42);
        let mut h = HarmonyEngine::new(60, ScaleType::Major, 0.3);
        for k in 1..=8 {
            for _ in 0..20 {
                let p = h.generate_progression(k, &mut rng);
                assert_eq!(p.chords.len(), k);
                assert_eq!(p.durations.len(), k);
                assert!(p.durations.iter().all(|&d| d >= 0.25));
            }
        }
    }

    #[test]
    fn test_templates_follow_modulation() {
        let mut rng = seeded(11);
        let mut h = HarmonyEngine::new(60, ScaleType::Major, 0.0);
        h.modulate(Some(63), Some(ScaleType::NaturalMinor));
        let scale = h.scale();
        for _ in 0..50 {
            for chord in h.realize_template(&mut rng) {
                assert!(
                    scale.contains_pitch_class(chord.root as i32),
                    "{} is outside {}",
                    chord,
                    scale
                );
            }
        }
    }

    #[test]
    fn test_history_is_bounded() {
        let mut rng = seeded(3);
        let mut h = HarmonyEngine::new(60, ScaleType::Major, 0.3);
        for _ in 0..50 {
            h.next_chord(&mut rng);
            h.generate_progression(6, &mut rng);
        }
        assert_eq!(h.history().count(), HISTORY_LEN);
    }

    #[test]
    fn test_next_chord_seeds_tonic() {
        let mut rng = seeded(5);
        let mut h = HarmonyEngine::new(62, ScaleType::Dorian, 0.0);
        let first = h.next_chord(&mut rng);
        assert_eq!(first, Chord::new(2, ChordQuality::Major7));
        let second = h.next_chord(&mut rng);
        let moved = (second.root as i32 - first.root as i32).rem_euclid(12);
        assert!([5, 7, 2, 11, 3, 4].contains(&moved), "moved by {}", moved);
    }

    #[test]
    fn test_quality_for_context_families() {
        let mut rng = seeded(11);
        let h = HarmonyEngine::new(60, ScaleType::Major, 0.3);
        for _ in 0..30 {
            let q = h.quality_for_context(7, &mut rng);
            assert!(matches!(q, ChordQuality::Dominant7 | ChordQuality::Dominant9 | ChordQuality::Sus4));
            let q = h.quality_for_context(2, &mut rng);
            assert!(matches!(q, ChordQuality::Minor7 | ChordQuality::Minor9));
            let q = h.quality_for_context(11, &mut rng);
            assert!(matches!(q, ChordQuality::HalfDiminished7 | ChordQuality::Diminished7));
            let q = h.quality_for_context(1, &mut rng);
            assert!(matches!(
                q,
                ChordQuality::Major7 | ChordQuality::Minor7 | ChordQuality::Dominant7 | ChordQuality::Augmented
            ));
        }
    }

    #[test]
    fn test_modulate_preserves_unsupplied_fields() {
        let mut h = HarmonyEngine::new(60, ScaleType::Lydian, 0.3);
        h.modulate(Some(67), None);
        assert_eq!(h.scale(), Scale::new(67, ScaleType::Lydian));
        h.modulate(None, Some(ScaleType::Aeolian));
        assert_eq!(h.scale(), Scale::new(67, ScaleType::Aeolian));
    }

    #[test]
    fn test_suggest_modulation_targets() {
        let mut rng = seeded(42);
        let h = HarmonyEngine::new(60, ScaleType::Major, 0.3);
        for _ in 0..100 {
            let (root, mode) = h.suggest_modulation(&mut rng);
            let ok = matches!(
                (root.rem_euclid(12), mode),
                (7, ScaleType::Major)
                    | (5, ScaleType::Major)
                    | (0, ScaleType::Dorian)
                    | (3, ScaleType::NaturalMinor)
                    | (11, ScaleType::Major)
            );
            assert!(ok, "unexpected target {} {:?}", root, mode);
            assert!((60..72).contains(&root));
        }
    }

    #[test]
    fn test_low_tension_free_progressions_avoid_tense_pool() {
        let mut rng = seeded(8);
        let mut h = HarmonyEngine::new(60, ScaleType::Major, 0.0);
        for _ in 0..50 {
            let p = h.generate_progression(3, &mut rng);
            assert!(p.chords.iter().all(|c| !c.quality.is_tense()));
        }
    }
}
