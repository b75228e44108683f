use crate::chord::Chord;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// ─── Notes and phrases ──────────────────────────────────────────────────────

/// How a note should be played.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Articulation {
    Legato,
    Staccato,
    Tenuto,
    Accent,
    Normal,
}

/// A single melodic note with timing and expression.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Note {
    /// MIDI pitch, 0–127
    pub pitch: u8,
    /// Duration in beats, always > 0
    pub duration: f64,
    /// MIDI velocity, 1–127
    pub velocity: u8,
    pub articulation: Articulation,
    /// Signed micro-offset from the nominal onset, in beats
    pub delay: f64,
    /// Sounds together with the following note: the phrase cursor does not
    /// advance past it. Used for block chords.
    #[serde(default)]
    pub stacked: bool,
}

impl Note {
    pub fn new(pitch: i32, duration: f64, velocity: i32) -> Self {
        Self {
            pitch: clamp_pitch(pitch),
            duration: duration.max(MIN_NOTE_BEATS),
            velocity: clamp_velocity(velocity),
            articulation: Articulation::Normal,
            delay: 0.0,
            stacked: false,
        }
    }

    pub fn with_articulation(mut self, articulation: Articulation) -> Self {
        self.articulation = articulation;
        self
    }

    pub fn with_delay(mut self, delay: f64) -> Self {
        self.delay = delay;
        self
    }
}

/// Melodic contour shapes for phrase generation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContourType {
    Ascending,
    Descending,
    Arch,
    InverseArch,
    Wave,
    Plateau,
    Static,
}

impl ContourType {
    pub const ALL: [ContourType; 7] = [
        ContourType::Ascending,
        ContourType::Descending,
        ContourType::Arch,
        ContourType::InverseArch,
        ContourType::Wave,
        ContourType::Plateau,
        ContourType::Static,
    ];

    /// Shape value in [0,1] at position `t` in [0,1], before noise.
    pub fn value_at(self, t: f64) -> f64 {
        use std::f64::consts::PI;
        match self {
            ContourType::Ascending => t,
            ContourType::Descending => 1.0 - t,
            ContourType::Arch => (PI * t).sin(),
            ContourType::InverseArch => 1.0 - (PI * t).sin(),
            ContourType::Wave => 0.5 + 0.5 * (2.0 * PI * t).sin(),
            ContourType::Plateau => {
                if t < 0.25 {
                    t * 4.0
                } else if t > 0.75 {
                    (1.0 - t) * 4.0
                } else {
                    1.0
                }
            }
            ContourType::Static => 0.5,
        }
    }
}

/// An ordered run of notes returned by a melody engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Phrase {
    pub notes: Vec<Note>,
    pub contour: ContourType,
    /// Beat offset at which the phrase starts, relative to scheduling time
    pub start_beat: f64,
}

impl Phrase {
    pub fn new(notes: Vec<Note>, contour: ContourType) -> Self {
        Self {
            notes,
            contour,
            start_beat: 0.0,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), ContourType::Arch)
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Beats spanned by the phrase cursor (stacked notes do not advance it).
    pub fn total_duration(&self) -> f64 {
        self.notes
            .iter()
            .filter(|n| !n.stacked)
            .map(|n| n.duration)
            .sum()
    }

    pub fn transpose(&self, semitones: i32) -> Phrase {
        let notes = self
            .notes
            .iter()
            .map(|n| Note {
                pitch: clamp_pitch(n.pitch as i32 + semitones),
                ..*n
            })
            .collect();
        Phrase {
            notes,
            contour: self.contour,
            start_beat: self.start_beat,
        }
    }
}

// ─── Scheduled events ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    NoteOn,
    NoteOff,
}

/// A note event waiting in the scheduler for its beat.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledEvent {
    /// Absolute beat position
    pub beat: f64,
    pub kind: EventKind,
    pub pitch: u8,
    /// 0 for note_off
    pub velocity: u8,
    pub channel: u8,
}

// ─── Meter ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum TimeSignature {
    #[default]
    #[serde(rename = "4/4")]
    FourFour,
    #[serde(rename = "3/4")]
    ThreeFour,
    #[serde(rename = "6/8")]
    SixEight,
    #[serde(rename = "2/4")]
    TwoFour,
    #[serde(rename = "5/4")]
    FiveFour,
    #[serde(rename = "7/8")]
    SevenEight,
    #[serde(rename = "12/8")]
    TwelveEight,
}

impl TimeSignature {
    pub fn numerator(self) -> u32 {
        match self {
            TimeSignature::FourFour => 4,
            TimeSignature::ThreeFour => 3,
            TimeSignature::SixEight => 6,
            TimeSignature::TwoFour => 2,
            TimeSignature::FiveFour => 5,
            TimeSignature::SevenEight => 7,
            TimeSignature::TwelveEight => 12,
        }
    }

    pub fn denominator(self) -> u32 {
        match self {
            TimeSignature::SixEight | TimeSignature::SevenEight | TimeSignature::TwelveEight => 8,
            _ => 4,
        }
    }
}

impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator(), self.denominator())
    }
}

// ─── Textures ───────────────────────────────────────────────────────────────

/// Right hand (upper register) figuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RhTexture {
    FlowingArpeggios,
    MelodicFragments,
    #[default]
    ShimmeringChords,
    SparseMeditation,
    LayeredVoices,
    ImpressionistWash,
    Off,
}

impl RhTexture {
    pub const ALL: [RhTexture; 7] = [
        RhTexture::FlowingArpeggios,
        RhTexture::MelodicFragments,
        RhTexture::ShimmeringChords,
        RhTexture::SparseMeditation,
        RhTexture::LayeredVoices,
        RhTexture::ImpressionistWash,
        RhTexture::Off,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RhTexture::FlowingArpeggios => "flowing_arpeggios",
            RhTexture::MelodicFragments => "melodic_fragments",
            RhTexture::ShimmeringChords => "shimmering_chords",
            RhTexture::SparseMeditation => "sparse_meditation",
            RhTexture::LayeredVoices => "layered_voices",
            RhTexture::ImpressionistWash => "impressionist_wash",
            RhTexture::Off => "off",
        }
    }
}

/// Left hand (bass register) figuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LhTexture {
    #[default]
    SustainedBass,
    BrokenChords,
    AlbertiBass,
    BlockChords,
    RollingOctaves,
    SparseRoots,
    Off,
}

impl LhTexture {
    pub const ALL: [LhTexture; 7] = [
        LhTexture::SustainedBass,
        LhTexture::BrokenChords,
        LhTexture::AlbertiBass,
        LhTexture::BlockChords,
        LhTexture::RollingOctaves,
        LhTexture::SparseRoots,
        LhTexture::Off,
    ];

    pub fn name(self) -> &'static str {
        match self {
            LhTexture::SustainedBass => "sustained_bass",
            LhTexture::BrokenChords => "broken_chords",
            LhTexture::AlbertiBass => "alberti_bass",
            LhTexture::BlockChords => "block_chords",
            LhTexture::RollingOctaves => "rolling_octaves",
            LhTexture::SparseRoots => "sparse_roots",
            LhTexture::Off => "off",
        }
    }
}

impl fmt::Display for RhTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for LhTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RhTexture {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = normalize_tag(s);
        RhTexture::ALL
            .into_iter()
            .find(|t| t.name() == key)
            .ok_or_else(|| ConfigError::UnknownTexture(s.to_string()))
    }
}

impl FromStr for LhTexture {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = normalize_tag(s);
        LhTexture::ALL
            .into_iter()
            .find(|t| t.name() == key)
            .ok_or_else(|| ConfigError::UnknownTexture(s.to_string()))
    }
}

/// Note ordering for arpeggios.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpeggioPattern {
    Up,
    Down,
    UpDown,
    Random,
}

impl ArpeggioPattern {
    pub const ALL: [ArpeggioPattern; 4] = [
        ArpeggioPattern::Up,
        ArpeggioPattern::Down,
        ArpeggioPattern::UpDown,
        ArpeggioPattern::Random,
    ];
}

/// Accompaniment figure styles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccompanimentStyle {
    Broken,
    Alberti,
    Block,
    Tremolo,
}

// ─── Engine lifecycle ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineState {
    Stopped = 0,
    Playing = 1,
    Paused = 2,
}

impl EngineState {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => EngineState::Playing,
            2 => EngineState::Paused,
            _ => EngineState::Stopped,
        }
    }
}

// ─── Output events (sink → consumer threads) ────────────────────────────────

/// Everything the engine emits, in a form consumer threads can serialize.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputEvent {
    NoteOn { pitch: u8, velocity: u8, channel: u8 },
    NoteOff { pitch: u8, channel: u8 },
    ControlChange { controller: u8, value: u8, channel: u8 },
    PitchBend { value: i16, channel: u8 },
    ChordChange { chord: Chord },
}

/// An output event stamped with session time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct StampedEvent {
    /// Microseconds since session start
    pub t: u64,
    #[serde(flatten)]
    pub event: OutputEvent,
}

impl fmt::Display for StampedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.t as f64 / 1_000_000.0;
        match self.event {
            OutputEvent::NoteOn { pitch, velocity, channel } => write!(
                f,
                "{:>9.3}s  ON   {:<4} vel={:<3} ch={}",
                secs,
                note_name(pitch),
                velocity,
                channel
            ),
            OutputEvent::NoteOff { pitch, channel } => write!(
                f,
                "{:>9.3}s  OFF  {:<4}         ch={}",
                secs,
                note_name(pitch),
                channel
            ),
            OutputEvent::ControlChange { controller, value, channel } => write!(
                f,
                "{:>9.3}s  CC   {:<3}={:<3}      ch={}",
                secs, controller, value, channel
            ),
            OutputEvent::PitchBend { value, channel } => {
                write!(f, "{:>9.3}s  BEND {:<6}      ch={}", secs, value, channel)
            }
            OutputEvent::ChordChange { chord } => write!(f, "{:>9.3}s  CHORD {}", secs, chord),
        }
    }
}

// ─── Clocks ─────────────────────────────────────────────────────────────────

/// Source of session time for the rhythm engine.
pub trait Clock: Send + Sync {
    fn now_us(&self) -> u64;
}

/// Monotonic wall clock for a live session.
#[derive(Clone)]
pub struct SessionClock {
    start: Instant,
}

impl SessionClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Clock for SessionClock {
    fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Wall clock running `factor` times faster than real time.
#[derive(Clone)]
pub struct ScaledClock {
    start: Instant,
    factor: f64,
}

impl ScaledClock {
    pub fn new(factor: f64) -> Self {
        Self {
            start: Instant::now(),
            factor: factor.max(0.0),
        }
    }
}

impl Clock for ScaledClock {
    fn now_us(&self) -> u64 {
        (self.start.elapsed().as_micros() as f64 * self.factor) as u64
    }
}

/// Manually advanced clock. Clones share the same time.
#[derive(Clone, Default)]
pub struct SimClock {
    now_us: Arc<AtomicU64>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now_us
            .fetch_add(by.as_micros() as u64, Ordering::SeqCst);
    }
}

impl Clock for SimClock {
    fn now_us(&self) -> u64 {
        self.now_us.load(Ordering::SeqCst)
    }
}

// ─── Constants and helpers ──────────────────────────────────────────────────

/// Shortest note the engine will produce, in beats.
pub const MIN_NOTE_BEATS: f64 = 0.125;

pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

pub fn clamp_pitch(p: i32) -> u8 {
    p.clamp(0, 127) as u8
}

pub fn clamp_velocity(v: i32) -> u8 {
    v.clamp(1, 127) as u8
}

/// Pitch class name, e.g. 61 → "C#".
pub fn pitch_class_name(pitch: u8) -> &'static str {
    NOTE_NAMES[(pitch % 12) as usize]
}

/// Scientific pitch name, e.g. 60 → "C4".
pub fn note_name(pitch: u8) -> String {
    format!("{}{}", pitch_class_name(pitch), pitch as i32 / 12 - 1)
}

/// Parse a key name such as "C", "Db", "f#" into a MIDI note in octave 4.
pub fn parse_note_name(name: &str) -> Result<u8, ConfigError> {
    let trimmed = name.trim();
    let mut chars = trimmed.chars();
    let letter = chars
        .next()
        .ok_or_else(|| ConfigError::UnknownNote(name.to_string()))?;
    let base: i32 = match letter.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return Err(ConfigError::UnknownNote(name.to_string())),
    };
    let accidental = match chars.as_str() {
        "" => 0,
        "#" => 1,
        "b" => -1,
        _ => return Err(ConfigError::UnknownNote(name.to_string())),
    };
    Ok((60 + (base + accidental).rem_euclid(12)) as u8)
}

pub(crate) fn normalize_tag(s: &str) -> String {
    s.trim().to_ascii_lowercase().replace(['-', ' '], "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_note_names() {
        assert_eq!(parse_note_name("C").unwrap(), 60);
        assert_eq!(parse_note_name("Db").unwrap(), 61);
        assert_eq!(parse_note_name("f#").unwrap(), 66);
        assert_eq!(parse_note_name("B").unwrap(), 71);
        assert_eq!(parse_note_name("Cb").unwrap(), 71);
        assert!(parse_note_name("H").is_err());
        assert!(parse_note_name("").is_err());
    }

    #[test]
    fn test_note_name() {
        assert_eq!(note_name(60), "C4");
        assert_eq!(note_name(21), "A0");
        assert_eq!(note_name(70), "A#4");
    }

    #[test]
    fn test_texture_tags_parse() {
        assert_eq!("flowing-arpeggios".parse::<RhTexture>().unwrap(), RhTexture::FlowingArpeggios);
        assert_eq!("Alberti Bass".parse::<LhTexture>().unwrap(), LhTexture::AlbertiBass);
        assert!("tango".parse::<RhTexture>().is_err());
        for t in RhTexture::ALL {
            assert_eq!(t.name().parse::<RhTexture>().unwrap(), t);
        }
    }

    #[test]
    fn test_phrase_duration_skips_stacked_notes() {
        let mut a = Note::new(60, 1.0, 70);
        a.stacked = true;
        let b = Note::new(64, 1.0, 70);
        let c = Note::new(67, 0.5, 70);
        let phrase = Phrase::new(vec![a, b, c], ContourType::Static);
        assert!((phrase.total_duration() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_sim_clock_shared_between_clones() {
        let clock = SimClock::new();
        let other = clock.clone();
        clock.advance(Duration::from_millis(5));
        assert_eq!(other.now_us(), 5000);
    }

    #[test]
    fn test_plateau_contour() {
        assert!((ContourType::Plateau.value_at(0.125) - 0.5).abs() < 1e-9);
        assert_eq!(ContourType::Plateau.value_at(0.5), 1.0);
        assert!((ContourType::Plateau.value_at(1.0)).abs() < 1e-9);
    }
}
