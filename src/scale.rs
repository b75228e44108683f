use crate::error::ConfigError;
use crate::types::{clamp_pitch, normalize_tag};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Scale types common in impressionist harmony.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScaleType {
    #[default]
    Major,
    NaturalMinor,
    HarmonicMinor,
    MelodicMinor,
    Dorian,
    Phrygian,
    Lydian,
    Mixolydian,
    Aeolian,
    Locrian,
    WholeTone,
    PentatonicMajor,
    PentatonicMinor,
    Blues,
}

impl ScaleType {
    pub const ALL: [ScaleType; 14] = [
        ScaleType::Major,
        ScaleType::NaturalMinor,
        ScaleType::HarmonicMinor,
        ScaleType::MelodicMinor,
        ScaleType::Dorian,
        ScaleType::Phrygian,
        ScaleType::Lydian,
        ScaleType::Mixolydian,
        ScaleType::Aeolian,
        ScaleType::Locrian,
        ScaleType::WholeTone,
        ScaleType::PentatonicMajor,
        ScaleType::PentatonicMinor,
        ScaleType::Blues,
    ];

    /// Semitone offsets from the root, strictly increasing, all < 12.
    pub fn intervals(self) -> &'static [u8] {
        match self {
            ScaleType::Major => &[0, 2, 4, 5, 7, 9, 11],
            ScaleType::NaturalMinor => &[0, 2, 3, 5, 7, 8, 10],
            ScaleType::HarmonicMinor => &[0, 2, 3, 5, 7, 8, 11],
            ScaleType::MelodicMinor => &[0, 2, 3, 5, 7, 9, 11],
            ScaleType::Dorian => &[0, 2, 3, 5, 7, 9, 10],
            ScaleType::Phrygian => &[0, 1, 3, 5, 7, 8, 10],
            ScaleType::Lydian => &[0, 2, 4, 6, 7, 9, 11],
            ScaleType::Mixolydian => &[0, 2, 4, 5, 7, 9, 10],
            ScaleType::Aeolian => &[0, 2, 3, 5, 7, 8, 10],
            ScaleType::Locrian => &[0, 1, 3, 5, 6, 8, 10],
            ScaleType::WholeTone => &[0, 2, 4, 6, 8, 10],
            ScaleType::PentatonicMajor => &[0, 2, 4, 7, 9],
            ScaleType::PentatonicMinor => &[0, 3, 5, 7, 10],
            ScaleType::Blues => &[0, 3, 5, 6, 7, 10],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ScaleType::Major => "major",
            ScaleType::NaturalMinor => "natural_minor",
            ScaleType::HarmonicMinor => "harmonic_minor",
            ScaleType::MelodicMinor => "melodic_minor",
            ScaleType::Dorian => "dorian",
            ScaleType::Phrygian => "phrygian",
            ScaleType::Lydian => "lydian",
            ScaleType::Mixolydian => "mixolydian",
            ScaleType::Aeolian => "aeolian",
            ScaleType::Locrian => "locrian",
            ScaleType::WholeTone => "whole_tone",
            ScaleType::PentatonicMajor => "pentatonic_major",
            ScaleType::PentatonicMinor => "pentatonic_minor",
            ScaleType::Blues => "blues",
        }
    }
}

impl fmt::Display for ScaleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ScaleType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = normalize_tag(s);
        ScaleType::ALL
            .into_iter()
            .find(|t| t.name() == key)
            .ok_or_else(|| ConfigError::UnknownMode(s.to_string()))
    }
}

/// A pitch-class set rooted at a tonic. Immutable; replaced on key change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Scale {
    /// MIDI note of the tonic (60 = middle C)
    pub root: u8,
    pub scale_type: ScaleType,
}

impl Scale {
    pub fn new(root: i32, scale_type: ScaleType) -> Self {
        Self {
            root: clamp_pitch(root),
            scale_type,
        }
    }

    pub fn intervals(&self) -> &'static [u8] {
        self.scale_type.intervals()
    }

    pub fn contains_pitch_class(&self, pc: i32) -> bool {
        let offset = (pc - self.root as i32).rem_euclid(12) as u8;
        self.intervals().contains(&offset)
    }

    pub fn contains(&self, pitch: i32) -> bool {
        self.contains_pitch_class(pitch)
    }

    /// Every scale pitch in `[low, high]`, ascending.
    pub fn notes_in_range(&self, low: i32, high: i32) -> Vec<u8> {
        let low = low.max(0);
        let high = high.min(127);
        let mut notes = Vec::new();
        if low > high {
            return notes;
        }
        let root = self.root as i32;
        let first_octave = (low - root).div_euclid(12) - 1;
        let last_octave = (high - root).div_euclid(12) + 1;
        for k in first_octave..=last_octave {
            for &i in self.intervals() {
                let n = root + 12 * k + i as i32;
                if (low..=high).contains(&n) {
                    notes.push(n as u8);
                }
            }
        }
        notes
    }

    /// Nearest scale pitch to `n`; ties resolve downward.
    pub fn quantize(&self, n: i32) -> u8 {
        let n = n.clamp(0, 127);
        for d in 0..=6 {
            for candidate in [n - d, n + d] {
                if (0..=127).contains(&candidate) && self.contains(candidate) {
                    return candidate as u8;
                }
            }
        }
        n as u8
    }

    /// Pitch of a 1-indexed scale degree. Degrees past the interval list wrap
    /// into higher octaves.
    pub fn degree_to_note(&self, degree: i32, octave: i32) -> u8 {
        let len = self.intervals().len() as i32;
        let idx = (degree - 1).rem_euclid(len) as usize;
        let wraps = (degree - 1).div_euclid(len);
        clamp_pitch(
            self.root as i32 + octave * 12 - 24 + self.intervals()[idx] as i32 + wraps * 12,
        )
    }
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            crate::types::pitch_class_name(self.root),
            self.scale_type
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intervals_well_formed() {
        for t in ScaleType::ALL {
            let iv = t.intervals();
            assert!(!iv.is_empty());
            assert_eq!(iv[0], 0);
            assert!(iv.windows(2).all(|w| w[0] < w[1]), "{:?} not increasing", t);
            assert!(*iv.last().unwrap() < 12);
        }
    }

    #[test]
    fn test_notes_in_range_c_major() {
        let s = Scale::new(60, ScaleType::Major);
        assert_eq!(s.notes_in_range(60, 72), vec![60, 62, 64, 65, 67, 69, 71, 72]);
        assert!(s.notes_in_range(70, 60).is_empty());
    }

    #[test]
    fn test_notes_in_range_covers_low_octaves() {
        let s = Scale::new(67, ScaleType::PentatonicMajor);
        let notes = s.notes_in_range(0, 127);
        assert_eq!(notes[0], 2); // D is in G pentatonic
        assert!(notes.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_quantize_prefers_lower_on_tie() {
        let s = Scale::new(60, ScaleType::WholeTone);
        // 61 sits between 60 and 62
        assert_eq!(s.quantize(61), 60);
        let major = Scale::new(60, ScaleType::Major);
        assert_eq!(major.quantize(66), 65);
        assert_eq!(major.quantize(64), 64);
    }

    #[test]
    fn test_quantize_idempotent() {
        for t in ScaleType::ALL {
            for root in [55, 60, 66] {
                let s = Scale::new(root, t);
                for n in 0..128 {
                    let q = s.quantize(n);
                    assert_eq!(s.quantize(q as i32), q, "{:?} root={} n={}", t, root, n);
                }
            }
        }
    }

    #[test]
    fn test_degree_wraps_octave() {
        let s = Scale::new(60, ScaleType::Major);
        let tonic = s.degree_to_note(1, 4);
        assert_eq!(s.degree_to_note(8, 4), tonic + 12);
        assert_eq!(s.degree_to_note(5, 4) % 12, 7);
        assert_eq!(s.degree_to_note(0, 4) % 12, 11);
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!("whole-tone".parse::<ScaleType>().unwrap(), ScaleType::WholeTone);
        assert!("ionian".parse::<ScaleType>().is_err());
    }
}
