//! Outbound interface: where note events go, and who hears about them.

use crate::chord::Chord;
use crate::error::SinkError;
use crate::types::{note_name, Clock, OutputEvent, StampedEvent};
use crossbeam_channel::{Sender, TrySendError};
use log::{debug, trace};
use std::sync::Arc;

/// Destination for note and controller events.
///
/// Called only from the generator thread. A failed call drops that one
/// event; the generator keeps running.
pub trait EventSink: Send {
    fn emit_note_on(&mut self, pitch: u8, velocity: u8, channel: u8) -> Result<(), SinkError>;

    fn emit_note_off(&mut self, pitch: u8, channel: u8) -> Result<(), SinkError>;

    fn emit_cc(&mut self, controller: u8, value: u8, channel: u8) -> Result<(), SinkError>;

    /// `value` in [-8192, 8191]. Sinks that don't support bends ignore it.
    fn emit_pitch_bend(&mut self, _value: i16, _channel: u8) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Notified on the generator thread whenever the chord changes.
/// Implementations that touch UI state must hand off to their own thread.
pub trait ChordObserver: Send {
    fn chord_changed(&mut self, chord: &Chord);
}

/// Notified on the generator thread for every note that reaches the sink.
pub trait NoteObserver: Send {
    fn note(&mut self, pitch: u8, velocity: u8, is_on: bool);
}

impl<F: FnMut(&Chord) + Send> ChordObserver for F {
    fn chord_changed(&mut self, chord: &Chord) {
        self(chord)
    }
}

impl<F: FnMut(u8, u8, bool) + Send> NoteObserver for F {
    fn note(&mut self, pitch: u8, velocity: u8, is_on: bool) {
        self(pitch, velocity, is_on)
    }
}

// ─── Sinks ──────────────────────────────────────────────────────────────────

/// Accepts and discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit_note_on(&mut self, _: u8, _: u8, _: u8) -> Result<(), SinkError> {
        Ok(())
    }

    fn emit_note_off(&mut self, _: u8, _: u8) -> Result<(), SinkError> {
        Ok(())
    }

    fn emit_cc(&mut self, _: u8, _: u8, _: u8) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Writes each event as a debug log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit_note_on(&mut self, pitch: u8, velocity: u8, channel: u8) -> Result<(), SinkError> {
        debug!("note_on  {:<4} vel={:<3} ch={}", note_name(pitch), velocity, channel);
        Ok(())
    }

    fn emit_note_off(&mut self, pitch: u8, channel: u8) -> Result<(), SinkError> {
        debug!("note_off {:<4}         ch={}", note_name(pitch), channel);
        Ok(())
    }

    fn emit_cc(&mut self, controller: u8, value: u8, channel: u8) -> Result<(), SinkError> {
        debug!("cc {}={} ch={}", controller, value, channel);
        Ok(())
    }

    fn emit_pitch_bend(&mut self, value: i16, channel: u8) -> Result<(), SinkError> {
        debug!("bend {} ch={}", value, channel);
        Ok(())
    }
}

/// Fans timestamped events out to consumer threads over bounded channels.
///
/// A full channel drops the event for that consumer only. The sink reports
/// `Disconnected` once every consumer has gone away. Clones share the same
/// consumers, so one clone can be the sink while another observes chords.
#[derive(Clone)]
pub struct ChannelSink {
    txs: Vec<Sender<StampedEvent>>,
    clock: Arc<dyn Clock>,
}

impl ChannelSink {
    pub fn new(txs: Vec<Sender<StampedEvent>>, clock: Arc<dyn Clock>) -> Self {
        Self { txs, clock }
    }

    pub fn publish(&self, event: OutputEvent) -> Result<(), SinkError> {
        if self.txs.is_empty() {
            return Ok(());
        }
        let stamped = StampedEvent {
            t: self.clock.now_us(),
            event,
        };
        let mut delivered = false;
        for tx in &self.txs {
            match tx.try_send(stamped) {
                Ok(()) => delivered = true,
                Err(TrySendError::Full(_)) => {
                    delivered = true;
                    trace!("Consumer channel full, dropping {:?}", stamped.event);
                }
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
        if delivered {
            Ok(())
        } else {
            Err(SinkError::Disconnected)
        }
    }
}

impl EventSink for ChannelSink {
    fn emit_note_on(&mut self, pitch: u8, velocity: u8, channel: u8) -> Result<(), SinkError> {
        self.publish(OutputEvent::NoteOn {
            pitch,
            velocity,
            channel,
        })
    }

    fn emit_note_off(&mut self, pitch: u8, channel: u8) -> Result<(), SinkError> {
        self.publish(OutputEvent::NoteOff { pitch, channel })
    }

    fn emit_cc(&mut self, controller: u8, value: u8, channel: u8) -> Result<(), SinkError> {
        self.publish(OutputEvent::ControlChange {
            controller,
            value,
            channel,
        })
    }

    fn emit_pitch_bend(&mut self, value: i16, channel: u8) -> Result<(), SinkError> {
        self.publish(OutputEvent::PitchBend { value, channel })
    }
}

impl ChordObserver for ChannelSink {
    fn chord_changed(&mut self, chord: &Chord) {
        if let Err(e) = self.publish(OutputEvent::ChordChange { chord: *chord }) {
            trace!("Chord change not delivered: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chord::ChordQuality;
    use crate::types::SimClock;
    use crossbeam_channel::bounded;
    use std::time::Duration;

    #[test]
    fn test_channel_sink_stamps_and_fans_out() {
        let clock = SimClock::new();
        clock.advance(Duration::from_millis(3));
        let (tx1, rx1) = bounded(8);
        let (tx2, rx2) = bounded(8);
        let mut sink = ChannelSink::new(vec![tx1, tx2], Arc::new(clock));
        sink.emit_note_on(60, 90, 2).unwrap();
        for rx in [&rx1, &rx2] {
            let e = rx.try_recv().unwrap();
            assert_eq!(e.t, 3000);
            assert_eq!(
                e.event,
                OutputEvent::NoteOn {
                    pitch: 60,
                    velocity: 90,
                    channel: 2
                }
            );
        }
    }

    #[test]
    fn test_channel_sink_full_is_not_an_error() {
        let (tx, _rx) = bounded(1);
        let mut sink = ChannelSink::new(vec![tx], Arc::new(SimClock::new()));
        sink.emit_note_off(60, 0).unwrap();
        assert!(sink.emit_note_off(61, 0).is_ok());
    }

    #[test]
    fn test_channel_sink_disconnected() {
        let (tx, rx) = bounded(4);
        drop(rx);
        let mut sink = ChannelSink::new(vec![tx], Arc::new(SimClock::new()));
        assert!(matches!(
            sink.emit_cc(64, 127, 0),
            Err(SinkError::Disconnected)
        ));
    }

    #[test]
    fn test_channel_sink_observes_chords() {
        let (tx, rx) = bounded(4);
        let mut sink = ChannelSink::new(vec![tx], Arc::new(SimClock::new()));
        sink.chord_changed(&Chord::new(2, ChordQuality::Minor9));
        match rx.try_recv().unwrap().event {
            OutputEvent::ChordChange { chord } => assert_eq!(chord.to_string(), "Dm9"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_closure_observers() {
        let mut seen = Vec::new();
        {
            let mut obs = |p: u8, v: u8, on: bool| seen.push((p, v, on));
            obs.note(60, 80, true);
        }
        assert_eq!(seen, vec![(60, 80, true)]);
    }
}
