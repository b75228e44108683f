use crate::types::{EventKind, ScheduledEvent};
use std::collections::VecDeque;

/// Pending note events ordered by beat.
///
/// Kept sorted on insert; events with equal beats leave in insertion order,
/// so a note_on queued before its note_off at the same beat is drained first.
#[derive(Debug, Default)]
pub struct EventScheduler {
    events: VecDeque<ScheduledEvent>,
}

impl EventScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, beat: f64, kind: EventKind, pitch: u8, velocity: u8, channel: u8) {
        let beat = if beat.is_finite() { beat } else { 0.0 };
        let event = ScheduledEvent {
            beat,
            kind,
            pitch,
            velocity: if kind == EventKind::NoteOff { 0 } else { velocity },
            channel,
        };
        let at = self.events.partition_point(|e| e.beat <= beat);
        self.events.insert(at, event);
        debug_assert!(self.is_ordered());
    }

    pub fn peek(&self) -> Option<&ScheduledEvent> {
        self.events.front()
    }

    pub fn pop(&mut self) -> Option<ScheduledEvent> {
        self.events.pop_front()
    }

    /// Pop the earliest event if it is due at `cursor`.
    pub fn pop_due(&mut self, cursor: f64) -> Option<ScheduledEvent> {
        if self.events.front().is_some_and(|e| e.beat <= cursor) {
            self.events.pop_front()
        } else {
            None
        }
    }

    /// Pop every event with `beat <= cursor`, earliest first.
    pub fn drain_due(&mut self, cursor: f64) -> DrainDue<'_> {
        DrainDue {
            scheduler: self,
            cursor,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    fn is_ordered(&self) -> bool {
        self.events
            .iter()
            .zip(self.events.iter().skip(1))
            .all(|(a, b)| a.beat <= b.beat)
    }
}

pub struct DrainDue<'a> {
    scheduler: &'a mut EventScheduler,
    cursor: f64,
}

impl Iterator for DrainDue<'_> {
    type Item = ScheduledEvent;

    fn next(&mut self) -> Option<ScheduledEvent> {
        self.scheduler.pop_due(self.cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::seeded;
    use rand::Rng;

    #[test]
    fn test_peek_is_minimum_after_random_inserts() {
        let mut rng = seeded(42);
        let mut s = EventScheduler::new();
        for i in 0..500 {
            let beat = rng.gen_range(0.0..100.0);
            s.insert(beat, EventKind::NoteOn, (i % 128) as u8, 64, 0);
            let min = s.events.iter().map(|e| e.beat).fold(f64::INFINITY, f64::min);
            assert_eq!(s.peek().unwrap().beat, min);
        }
        let mut last = f64::NEG_INFINITY;
        while let Some(e) = s.pop() {
            assert!(e.beat >= last);
            last = e.beat;
        }
    }

    #[test]
    fn test_equal_beats_keep_insertion_order() {
        let mut s = EventScheduler::new();
        s.insert(1.0, EventKind::NoteOn, 60, 80, 0);
        s.insert(1.0, EventKind::NoteOff, 60, 80, 0);
        assert_eq!(s.pop().unwrap().kind, EventKind::NoteOn);
        let off = s.pop().unwrap();
        assert_eq!(off.kind, EventKind::NoteOff);
        assert_eq!(off.velocity, 0);
    }

    #[test]
    fn test_drain_due_stops_at_cursor() {
        let mut s = EventScheduler::new();
        for beat in [0.5, 2.0, 1.0, 3.0] {
            s.insert(beat, EventKind::NoteOn, 60, 80, 0);
        }
        let due: Vec<f64> = s.drain_due(2.0).map(|e| e.beat).collect();
        assert_eq!(due, vec![0.5, 1.0, 2.0]);
        assert_eq!(s.len(), 1);
        assert_eq!(s.drain_due(2.5).count(), 0);
    }
}
