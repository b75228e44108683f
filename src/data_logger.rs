use crate::config::EngineConfig;
use crate::types::*;
use crossbeam_channel::Receiver;
use log::{error, info};
use serde::Serialize;
use serde_json::json;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Per-kind event counts written to `stats.json` at the end of a session.
#[derive(Debug, Default, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct SessionStats {
    pub total_events: u64,
    pub note_ons: u64,
    pub note_offs: u64,
    pub control_changes: u64,
    pub pitch_bends: u64,
    pub chord_changes: u64,
    /// Timestamp of the last event, microseconds
    pub last_t_us: u64,
}

impl SessionStats {
    fn record(&mut self, stamped: &StampedEvent) {
        self.total_events += 1;
        self.last_t_us = self.last_t_us.max(stamped.t);
        match stamped.event {
            OutputEvent::NoteOn { .. } => self.note_ons += 1,
            OutputEvent::NoteOff { .. } => self.note_offs += 1,
            OutputEvent::ControlChange { .. } => self.control_changes += 1,
            OutputEvent::PitchBend { .. } => self.pitch_bends += 1,
            OutputEvent::ChordChange { .. } => self.chord_changes += 1,
        }
    }
}

/// Records a session to `<output_dir>/session_<unix secs>/`:
/// `manifest.json`, `events.jsonl` (one event per line), `stats.json`.
pub struct DataLogger {
    rx: Receiver<StampedEvent>,
    session_dir: PathBuf,
    config: EngineConfig,
    seed: Option<u64>,
}

impl DataLogger {
    pub fn new(
        rx: Receiver<StampedEvent>,
        output_dir: &Path,
        config: EngineConfig,
        seed: Option<u64>,
    ) -> io::Result<Self> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let session_dir = output_dir.join(format!("session_{}", timestamp));
        fs::create_dir_all(&session_dir)?;

        Ok(Self {
            rx,
            session_dir,
            config,
            seed,
        })
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    /// Run the logger until the channel disconnects. Blocks the calling thread.
    pub fn run(&self) -> io::Result<SessionStats> {
        info!("Data logger → {:?}", self.session_dir);
        self.write_manifest()?;

        let events_path = self.session_dir.join("events.jsonl");
        let mut writer = BufWriter::new(File::create(&events_path)?);
        let mut stats = SessionStats::default();

        for stamped in self.rx.iter() {
            let line = serde_json::to_string(&stamped)?;
            writeln!(writer, "{}", line)?;
            stats.record(&stamped);

            if stats.total_events % 1000 == 0 {
                writer.flush()?;
                info!("Logged {} events", stats.total_events);
            }
        }
        writer.flush()?;

        let stats_path = self.session_dir.join("stats.json");
        fs::write(&stats_path, serde_json::to_string_pretty(&stats)?)?;

        info!(
            "Session saved: {} events ({} notes, {} chords) → {:?}",
            stats.total_events, stats.note_ons, stats.chord_changes, self.session_dir
        );
        Ok(stats)
    }

    /// Same as `run`, logging instead of returning the error.
    pub fn run_logged(&self) {
        if let Err(e) = self.run() {
            error!("Data logger failed: {}", e);
        }
    }

    fn write_manifest(&self) -> io::Result<()> {
        let manifest = json!({
            "version": env!("CARGO_PKG_VERSION"),
            "system": "reverie",
            "seed": self.seed,
            "config": self.config,
            "event_format": {
                "t": "microseconds since session start",
                "types": ["note_on", "note_off", "control_change", "pitch_bend", "chord_change"],
            },
        });
        let path = self.session_dir.join("manifest.json");
        fs::write(&path, serde_json::to_string_pretty(&manifest)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chord::{Chord, ChordQuality};
    use crossbeam_channel::bounded;

    #[test]
    fn test_logger_writes_session_files() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = bounded(16);
        let logger = DataLogger::new(rx, dir.path(), EngineConfig::default(), Some(42)).unwrap();
        let session = logger.session_dir().to_path_buf();

        let events = [
            OutputEvent::ChordChange {
                chord: Chord::new(0, ChordQuality::Major7),
            },
            OutputEvent::NoteOn {
                pitch: 60,
                velocity: 70,
                channel: 0,
            },
            OutputEvent::NoteOff { pitch: 60, channel: 0 },
            OutputEvent::ControlChange {
                controller: 123,
                value: 0,
                channel: 0,
            },
        ];
        for (i, event) in events.into_iter().enumerate() {
            tx.send(StampedEvent {
                t: i as u64 * 1000,
                event,
            })
            .unwrap();
        }
        drop(tx);

        let stats = logger.run().unwrap();
        assert_eq!(stats.total_events, 4);
        assert_eq!(stats.note_ons, 1);
        assert_eq!(stats.chord_changes, 1);
        assert_eq!(stats.last_t_us, 3000);

        let jsonl = fs::read_to_string(session.join("events.jsonl")).unwrap();
        let lines: Vec<&str> = jsonl.lines().collect();
        assert_eq!(lines.len(), 4);
        let parsed: StampedEvent = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed.event, events[1]);
        assert!(lines[0].contains("\"type\":\"chord_change\""));

        let manifest: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(session.join("manifest.json")).unwrap())
                .unwrap();
        assert_eq!(manifest["seed"], 42);
        assert_eq!(manifest["config"]["tempo"], 72.0);
        assert!(session.join("stats.json").exists());
    }
}
