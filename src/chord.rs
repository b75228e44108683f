use crate::random::chance;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Chord qualities, from triads to ninths and sixths.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChordQuality {
    Major,
    Minor,
    Diminished,
    Augmented,
    Major7,
    Minor7,
    Dominant7,
    Diminished7,
    HalfDiminished7,
    MinorMajor7,
    Major9,
    Minor9,
    Dominant9,
    Add9,
    MinorAdd9,
    Sus2,
    Sus4,
    Major6,
    Minor6,
}

impl ChordQuality {
    pub const ALL: [ChordQuality; 19] = [
        ChordQuality::Major,
        ChordQuality::Minor,
        ChordQuality::Diminished,
        ChordQuality::Augmented,
        ChordQuality::Major7,
        ChordQuality::Minor7,
        ChordQuality::Dominant7,
        ChordQuality::Diminished7,
        ChordQuality::HalfDiminished7,
        ChordQuality::MinorMajor7,
        ChordQuality::Major9,
        ChordQuality::Minor9,
        ChordQuality::Dominant9,
        ChordQuality::Add9,
        ChordQuality::MinorAdd9,
        ChordQuality::Sus2,
        ChordQuality::Sus4,
        ChordQuality::Major6,
        ChordQuality::Minor6,
    ];

    /// Semitones above the root.
    pub fn intervals(self) -> &'static [u8] {
        match self {
            ChordQuality::Major => &[0, 4, 7],
            ChordQuality::Minor => &[0, 3, 7],
            ChordQuality::Diminished => &[0, 3, 6],
            ChordQuality::Augmented => &[0, 4, 8],
            ChordQuality::Major7 => &[0, 4, 7, 11],
            ChordQuality::Minor7 => &[0, 3, 7, 10],
            ChordQuality::Dominant7 => &[0, 4, 7, 10],
            ChordQuality::Diminished7 => &[0, 3, 6, 9],
            ChordQuality::HalfDiminished7 => &[0, 3, 6, 10],
            ChordQuality::MinorMajor7 => &[0, 3, 7, 11],
            ChordQuality::Major9 => &[0, 4, 7, 11, 14],
            ChordQuality::Minor9 => &[0, 3, 7, 10, 14],
            ChordQuality::Dominant9 => &[0, 4, 7, 10, 14],
            ChordQuality::Add9 => &[0, 4, 7, 14],
            ChordQuality::MinorAdd9 => &[0, 3, 7, 14],
            ChordQuality::Sus2 => &[0, 2, 7],
            ChordQuality::Sus4 => &[0, 5, 7],
            ChordQuality::Major6 => &[0, 4, 7, 9],
            ChordQuality::Minor6 => &[0, 3, 7, 9],
        }
    }

    /// Lead-sheet suffix, e.g. "maj7", "m9", "m7b5".
    pub fn symbol(self) -> &'static str {
        match self {
            ChordQuality::Major => "",
            ChordQuality::Minor => "m",
            ChordQuality::Diminished => "dim",
            ChordQuality::Augmented => "aug",
            ChordQuality::Major7 => "maj7",
            ChordQuality::Minor7 => "m7",
            ChordQuality::Dominant7 => "7",
            ChordQuality::Diminished7 => "dim7",
            ChordQuality::HalfDiminished7 => "m7b5",
            ChordQuality::MinorMajor7 => "mMaj7",
            ChordQuality::Major9 => "maj9",
            ChordQuality::Minor9 => "m9",
            ChordQuality::Dominant9 => "9",
            ChordQuality::Add9 => "add9",
            ChordQuality::MinorAdd9 => "madd9",
            ChordQuality::Sus2 => "sus2",
            ChordQuality::Sus4 => "sus4",
            ChordQuality::Major6 => "6",
            ChordQuality::Minor6 => "m6",
        }
    }

    /// Qualities that count as high-tension color.
    pub fn is_tense(self) -> bool {
        matches!(
            self,
            ChordQuality::Augmented
                | ChordQuality::Diminished7
                | ChordQuality::HalfDiminished7
                | ChordQuality::Dominant9
        )
    }
}

/// Root pitch class + quality + inversion. Immutable value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chord {
    /// Pitch class, 0–11
    pub root: u8,
    pub quality: ChordQuality,
    pub inversion: u8,
}

impl Chord {
    pub fn new(root: i32, quality: ChordQuality) -> Self {
        Self {
            root: root.rem_euclid(12) as u8,
            quality,
            inversion: 0,
        }
    }

    pub fn with_inversion(mut self, inversion: u8) -> Self {
        self.inversion = inversion;
        self
    }

    pub fn intervals(&self) -> &'static [u8] {
        self.quality.intervals()
    }

    pub fn pitch_classes(&self) -> impl Iterator<Item = u8> + '_ {
        self.intervals().iter().map(move |&i| (self.root + i) % 12)
    }

    pub fn contains_pitch_class(&self, pc: u8) -> bool {
        self.pitch_classes().any(|p| p == pc % 12)
    }

    /// Close-position chord tones with the bass around `base_octave`,
    /// inverted by cycling the lowest tone up an octave.
    pub fn notes(&self, base_octave: i32) -> Vec<u8> {
        let base = self.root as i32 + 12 * base_octave - 24;
        let mut notes: Vec<i32> = self.intervals().iter().map(|&i| base + i as i32).collect();
        let n = notes.len();
        for _ in 0..(self.inversion as usize % n) {
            let lowest = notes.remove(0);
            notes.push(lowest + 12);
        }
        notes.sort_unstable();
        notes.into_iter().map(|p| p.clamp(0, 127) as u8).collect()
    }

    /// A pianistic voicing of the chord inside `[low, high]`.
    ///
    /// With `spread`, upper tones sit between `low + 12` and `high - 6` and
    /// each has a 30% chance of lifting another octave. Without it, every
    /// pitch class takes its lowest placement in range.
    pub fn voicing<R: Rng + ?Sized>(
        &self,
        low: i32,
        high: i32,
        spread: bool,
        include_bass: bool,
        rng: &mut R,
    ) -> Vec<u8> {
        let low = low.clamp(0, 127);
        let high = high.clamp(0, 127);
        let mut voiced: Vec<i32> = Vec::with_capacity(8);
        if low > high {
            return Vec::new();
        }

        if include_bass {
            let mut bass = self.root as i32 + 24;
            while bass < low {
                bass += 12;
            }
            while bass > low + 12 {
                bass -= 12;
            }
            if (low..=high).contains(&bass) {
                voiced.push(bass);
            }
        }

        for pc in self.pitch_classes() {
            let pc = pc as i32;
            let placed = if spread {
                let mut target = pc + 48;
                while target < low + 12 {
                    target += 12;
                }
                while target > high - 6 {
                    target -= 12;
                }
                if chance(rng, 0.3) && target + 12 <= high {
                    target += 12;
                }
                if (low..=high).contains(&target) {
                    Some(target)
                } else {
                    lowest_placement(pc, low, high)
                }
            } else {
                lowest_placement(pc, low, high)
            };
            if let Some(p) = placed {
                voiced.push(p);
            }
        }

        voiced.sort_unstable();
        voiced.dedup();
        voiced.into_iter().map(|p| p as u8).collect()
    }

    /// Root placed in the lowest octave at or above `low`, falling back an
    /// octave at a time while it exceeds `high`.
    pub fn bass_in(&self, low: i32, high: i32) -> u8 {
        let mut bass = self.root as i32 + 36;
        while bass < low {
            bass += 12;
        }
        while bass > low + 12 {
            bass -= 12;
        }
        while bass > high && bass >= 12 {
            bass -= 12;
        }
        bass.clamp(0, 127) as u8
    }
}

fn lowest_placement(pc: i32, low: i32, high: i32) -> Option<i32> {
    let p = low + (pc - low).rem_euclid(12);
    (p <= high).then_some(p)
}

impl fmt::Display for Chord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}",
            crate::types::NOTE_NAMES[self.root as usize % 12],
            self.quality.symbol()
        )?;
        if self.inversion > 0 {
            write!(f, " (inv {})", self.inversion)?;
        }
        Ok(())
    }
}

/// Chords with per-chord durations in beats.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChordProgression {
    pub chords: Vec<Chord>,
    pub durations: Vec<f64>,
}

/// Shortest chord duration a progression may hold, in beats.
pub const MIN_CHORD_BEATS: f64 = 0.25;

impl ChordProgression {
    /// Pairs chords with durations. Missing durations default to 4 beats;
    /// short ones are raised to the minimum; extras are dropped.
    pub fn new(chords: Vec<Chord>, durations: Vec<f64>) -> Self {
        let durations = (0..chords.len())
            .map(|i| durations.get(i).copied().unwrap_or(4.0).max(MIN_CHORD_BEATS))
            .collect();
        Self { chords, durations }
    }

    pub fn len(&self) -> usize {
        self.chords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chords.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<(Chord, f64)> {
        Some((*self.chords.get(index)?, *self.durations.get(index)?))
    }

    pub fn total_beats(&self) -> f64 {
        self.durations.iter().sum()
    }
}

impl fmt::Display for ChordProgression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .chords
            .iter()
            .zip(&self.durations)
            .map(|(c, d)| format!("{}:{}", c, d))
            .collect();
        write!(f, "{}", parts.join(" | "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::seeded;

    #[test]
    fn test_notes_root_position() {
        let c = Chord::new(0, ChordQuality::Major7);
        assert_eq!(c.notes(4), vec![24, 28, 31, 35]);
    }

    #[test]
    fn test_notes_inversion_cycles() {
        let c = Chord::new(0, ChordQuality::Major).with_inversion(1);
        assert_eq!(c.notes(4), vec![28, 31, 36]);
        let wrapped = Chord::new(0, ChordQuality::Major).with_inversion(3);
        assert_eq!(wrapped.notes(4), Chord::new(0, ChordQuality::Major).notes(4));
    }

    #[test]
    fn test_voicing_in_range_and_complete() {
        let mut rng = seeded(42);
        for q in ChordQuality::ALL {
            for root in 0..12 {
                let chord = Chord::new(root, q);
                for (low, high) in [(60, 96), (36, 60), (48, 84), (60, 70), (24, 48)] {
                    for spread in [true, false] {
                        let v = chord.voicing(low, high, spread, true, &mut rng);
                        assert!(
                            v.iter().all(|&p| (low..=high).contains(&(p as i32))),
                            "{} {:?} out of [{},{}]",
                            chord, v, low, high
                        );
                        for pc in chord.pitch_classes() {
                            if lowest_placement(pc as i32, low, high).is_some() {
                                assert!(
                                    v.iter().any(|&p| p % 12 == pc),
                                    "{} missing pc {} in {:?} [{},{}]",
                                    chord, pc, v, low, high
                                );
                            }
                        }
                        assert!(v.windows(2).all(|w| w[0] < w[1]));
                    }
                }
            }
        }
    }

    #[test]
    fn test_voicing_bass_in_low_octave() {
        let mut rng = seeded(1);
        let v = Chord::new(7, ChordQuality::Dominant9).voicing(36, 84, true, true, &mut rng);
        assert_eq!(v[0], 43);
    }

    #[test]
    fn test_voicing_empty_range() {
        let mut rng = seeded(1);
        assert!(Chord::new(0, ChordQuality::Major).voicing(80, 60, true, true, &mut rng).is_empty());
    }

    #[test]
    fn test_progression_invariants() {
        let chords = vec![Chord::new(0, ChordQuality::Major); 3];
        let p = ChordProgression::new(chords, vec![0.1, 2.0]);
        assert_eq!(p.chords.len(), p.durations.len());
        assert_eq!(p.durations, vec![0.25, 2.0, 4.0]);
        assert!((p.total_beats() - 6.25).abs() < 1e-9);
    }

    #[test]
    fn test_display() {
        assert_eq!(Chord::new(2, ChordQuality::Minor9).to_string(), "Dm9");
        assert_eq!(Chord::new(-1, ChordQuality::Major7).to_string(), "Bmaj7");
    }
}
