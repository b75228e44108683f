use crate::chord::Chord;
use crate::types::*;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::time::{Duration, Instant};

/// Lowest and highest keys drawn on the keyboard strip.
const KEY_LOW: u8 = 21;
const KEY_HIGH: u8 = 108;

/// What the monitor knows, rebuilt from the event stream.
#[derive(Debug, Default)]
pub struct MonitorState {
    pub chord: Option<Chord>,
    /// Sounding pitch → number of unmatched note_ons
    pub sounding: BTreeMap<u8, u32>,
    pub notes_played: u64,
    pub last_t_us: u64,
}

impl MonitorState {
    pub fn apply(&mut self, stamped: &StampedEvent) {
        self.last_t_us = stamped.t;
        match stamped.event {
            OutputEvent::NoteOn { pitch, .. } => {
                *self.sounding.entry(pitch).or_insert(0) += 1;
                self.notes_played += 1;
            }
            OutputEvent::NoteOff { pitch, .. } => {
                if let Some(count) = self.sounding.get_mut(&pitch) {
                    *count -= 1;
                    if *count == 0 {
                        self.sounding.remove(&pitch);
                    }
                }
            }
            OutputEvent::ControlChange { controller: 123, .. } => self.sounding.clear(),
            OutputEvent::ChordChange { chord } => self.chord = Some(chord),
            _ => {}
        }
    }
}

/// Renders a live terminal view of the current chord and sounding notes.
pub struct ConsoleDisplay {
    rx: Receiver<StampedEvent>,
    update_hz: u32,
}

impl ConsoleDisplay {
    pub fn new(rx: Receiver<StampedEvent>, update_hz: u32) -> Self {
        Self { rx, update_hz }
    }

    pub fn run(&self) {
        let period = Duration::from_secs_f64(1.0 / self.update_hz.max(1) as f64);
        let mut state = MonitorState::default();
        let mut last_draw = Instant::now();
        let mut stdout = io::stdout();

        loop {
            match self.rx.recv_timeout(period) {
                Ok(stamped) => state.apply(&stamped),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            if last_draw.elapsed() < period {
                continue;
            }
            last_draw = Instant::now();

            // Clear screen and move cursor home
            print!("\x1b[2J\x1b[H");
            println!("╔══════════════════════════════════════════════════════════╗");
            println!("║  REVERIE  Live Monitor                                   ║");
            println!("╠══════════════════════════════════════════════════════════╣");
            println!(
                "║  Time:  {:<49}║",
                format!("{:.2}s", state.last_t_us as f64 / 1_000_000.0)
            );
            let chord = state
                .chord
                .map(|c| c.to_string())
                .unwrap_or_else(|| "---".to_string());
            println!("║  Chord: {:<49}║", chord);
            println!("║  Notes: {:<49}║", state.notes_played);
            println!("║                                                          ║");
            let names: Vec<String> = state.sounding.keys().map(|&p| note_name(p)).collect();
            for line in wrap(&names.join(" "), 54) {
                println!("║  {:<56}║", line);
            }
            println!("║                                                          ║");
            println!("║  {} ║", keyboard(&state));
            println!("╚══════════════════════════════════════════════════════════╝");
            let _ = stdout.flush();
        }
    }
}

/// One character per two semitones across the piano range.
fn keyboard(state: &MonitorState) -> String {
    let mut strip = String::new();
    let mut p = KEY_LOW;
    while p <= KEY_HIGH {
        let lit = state.sounding.contains_key(&p) || state.sounding.contains_key(&(p + 1));
        strip.push(if lit { '█' } else { '░' });
        p += 2;
    }
    while strip.chars().count() < 55 {
        strip.push(' ');
    }
    strip.chars().take(55).collect()
}

fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = vec![String::new()];
    for word in text.split_whitespace() {
        let current = lines.last_mut().map(|l| l.len()).unwrap_or(0);
        if current > 0 && current + word.len() + 1 > width {
            lines.push(String::new());
        }
        if let Some(line) = lines.last_mut() {
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(word);
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chord::ChordQuality;

    fn ev(event: OutputEvent) -> StampedEvent {
        StampedEvent { t: 0, event }
    }

    #[test]
    fn test_monitor_tracks_sounding_notes() {
        let mut s = MonitorState::default();
        s.apply(&ev(OutputEvent::NoteOn { pitch: 60, velocity: 80, channel: 0 }));
        s.apply(&ev(OutputEvent::NoteOn { pitch: 60, velocity: 80, channel: 0 }));
        s.apply(&ev(OutputEvent::NoteOff { pitch: 60, channel: 0 }));
        assert_eq!(s.sounding.get(&60), Some(&1));
        s.apply(&ev(OutputEvent::NoteOff { pitch: 60, channel: 0 }));
        assert!(s.sounding.is_empty());
        s.apply(&ev(OutputEvent::NoteOff { pitch: 61, channel: 0 }));
        assert!(s.sounding.is_empty(), "stray off must not underflow");
        assert_eq!(s.notes_played, 2);
    }

    #[test]
    fn test_monitor_all_notes_off_and_chord() {
        let mut s = MonitorState::default();
        s.apply(&ev(OutputEvent::NoteOn { pitch: 48, velocity: 60, channel: 0 }));
        s.apply(&ev(OutputEvent::ControlChange { controller: 123, value: 0, channel: 0 }));
        assert!(s.sounding.is_empty());
        s.apply(&ev(OutputEvent::ChordChange { chord: Chord::new(9, ChordQuality::Minor7) }));
        assert_eq!(s.chord.map(|c| c.to_string()), Some("Am7".to_string()));
    }

    #[test]
    fn test_keyboard_strip_width() {
        let mut s = MonitorState::default();
        s.sounding.insert(60, 1);
        let strip = keyboard(&s);
        assert_eq!(strip.chars().count(), 55);
        assert!(strip.contains('█'));
    }

    #[test]
    fn test_wrap() {
        assert_eq!(wrap("C4 E4 G4", 5), vec!["C4 E4", "G4"]);
        assert_eq!(wrap("", 10), vec![String::new()]);
    }
}
