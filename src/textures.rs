//! Per-tick figuration for each hand. Each routine looks at the current
//! chord and the hand's settings, and queues notes on the orchestrator.

use crate::orchestrator::Orchestrator;
use crate::random::{chance, gaussian};
use crate::types::{AccompanimentStyle, ArpeggioPattern, ContourType, LhTexture, RhTexture};
use rand::seq::SliceRandom;
use rand::Rng;

impl Orchestrator {
    pub(crate) fn right_hand(&mut self, beats: f64) {
        let texture = self.config.rh.texture;
        if texture == RhTexture::Off {
            return;
        }
        self.rh_phrase_counter += beats;

        match texture {
            RhTexture::FlowingArpeggios => self.rh_arpeggios(),
            RhTexture::MelodicFragments => self.rh_melodic(),
            RhTexture::ShimmeringChords => self.rh_shimmering(),
            RhTexture::SparseMeditation => self.rh_sparse(),
            RhTexture::LayeredVoices => self.rh_layered(),
            RhTexture::ImpressionistWash => self.rh_wash(),
            RhTexture::Off => {}
        }
    }

    pub(crate) fn left_hand(&mut self, beats: f64) {
        let texture = self.config.lh.texture;
        if texture == LhTexture::Off {
            return;
        }
        self.lh_pattern_counter += beats;

        match texture {
            LhTexture::SustainedBass => self.lh_sustained_bass(),
            LhTexture::BrokenChords => self.lh_broken_chords(),
            LhTexture::AlbertiBass => self.lh_alberti(),
            LhTexture::BlockChords => self.lh_block_chords(),
            LhTexture::RollingOctaves => self.lh_rolling_octaves(),
            LhTexture::SparseRoots => self.lh_sparse_roots(),
            LhTexture::Off => {}
        }
    }

    // ─── Right hand ─────────────────────────────────────────────────────

    fn rh_arpeggios(&mut self) {
        if !chance(&mut self.rng, 0.04 * self.config.rh.density) {
            return;
        }
        let chord = self.current_chord();
        let pattern = *ArpeggioPattern::ALL
            .choose(&mut self.rng)
            .unwrap_or(&ArpeggioPattern::Up);
        let length = *[1.0, 2.0, 2.0, 3.0].choose(&mut self.rng).unwrap_or(&2.0);
        let phrase = self.rh.generate_arpeggio(&chord, length, pattern, &mut self.rng);
        self.schedule_phrase(&phrase, self.config.rh.velocity);
        self.stats.arpeggios += 1;
    }

    fn rh_melodic(&mut self) {
        if self.rh_phrase_counter < 4.0 {
            return;
        }
        self.rh_phrase_counter = 0.0;
        let chord = self.current_chord();
        let length = *[2.0, 3.0, 4.0, 4.0, 6.0].choose(&mut self.rng).unwrap_or(&4.0);
        let contour = *ContourType::ALL
            .choose(&mut self.rng)
            .unwrap_or(&ContourType::Arch);
        let phrase = if chance(&mut self.rng, 0.3) {
            self.rh.develop_motif(None, &mut self.rng)
        } else {
            self.rh
                .generate_phrase(length, Some(contour), Some(&chord), &mut self.rng)
        };
        self.schedule_phrase(&phrase, self.config.rh.velocity);
    }

    /// A spread chord pad on each chord change, plus rare high sparkles.
    fn rh_shimmering(&mut self) {
        let chord = self.current_chord();
        let (low, high) = self.config.rh.register;
        let (low, high) = (low as i32, high as i32);

        if self.chord_onset {
            let voicing = chord.voicing(low, high, true, true, &mut self.rng);
            let vel_floor = self.config.rh.velocity.0 as i32;
            let base = self.rng.gen_range(vel_floor..=vel_floor + 15);
            let duration = self.rng.gen_range(4.0..8.0);
            for (i, &pitch) in voicing.iter().enumerate() {
                let velocity = base + self.rng.gen_range(-5..=5);
                let delay = i as f64 * 0.02 + gaussian(&mut self.rng, 0.01);
                self.schedule_note(pitch as i32, velocity, duration, delay);
            }
        }

        if chance(&mut self.rng, 0.02 * self.config.rh.density) {
            let voicing = chord.voicing(low + 12, high, true, true, &mut self.rng);
            if let Some(&pitch) = voicing.choose(&mut self.rng) {
                let velocity = self.rng.gen_range(30..=50);
                let duration = self.rng.gen_range(0.3..0.8);
                self.schedule_note(pitch as i32, velocity, duration, 0.0);
            }
        }
    }

    fn rh_sparse(&mut self) {
        if !chance(&mut self.rng, 0.005 * self.config.rh.density) {
            return;
        }
        let chord = self.current_chord();
        let (low, high) = self.config.rh.register;
        let voicing = chord.voicing(low as i32, high as i32, true, true, &mut self.rng);
        if let Some(&pitch) = voicing.choose(&mut self.rng) {
            let velocity = self.rng.gen_range(35..=60);
            let duration = self.rng.gen_range(2.0..6.0);
            self.schedule_note(pitch as i32, velocity, duration, 0.0);
        }
    }

    fn rh_layered(&mut self) {
        if self.rh_phrase_counter < 3.0 {
            return;
        }
        self.rh_phrase_counter = 0.0;
        let chord = self.current_chord();
        let phrase = self.rh.generate_phrase(3.0, None, Some(&chord), &mut self.rng);
        self.schedule_phrase(&phrase, self.config.rh.velocity);
    }

    /// Occasional arpeggios layered with phrases every 2 to 6 beats.
    fn rh_wash(&mut self) {
        let chord = self.current_chord();
        if chance(&mut self.rng, 0.02 * self.config.rh.density) {
            let pattern = *[
                ArpeggioPattern::Up,
                ArpeggioPattern::Down,
                ArpeggioPattern::UpDown,
            ]
            .choose(&mut self.rng)
            .unwrap_or(&ArpeggioPattern::Up);
            let length = if self.rng.gen::<bool>() { 1.0 } else { 2.0 };
            let phrase = self.rh.generate_arpeggio(&chord, length, pattern, &mut self.rng);
            self.schedule_phrase(&phrase, self.config.rh.velocity);
            self.stats.arpeggios += 1;
        }

        if self.rh_phrase_counter >= self.wash_threshold {
            self.rh_phrase_counter = 0.0;
            self.wash_threshold = 2.0 + self.rng.gen::<f64>() * 4.0;
            if chance(&mut self.rng, 0.6) {
                let length = *[2.0, 3.0, 4.0].choose(&mut self.rng).unwrap_or(&3.0);
                let phrase = self.rh.generate_phrase(length, None, Some(&chord), &mut self.rng);
                self.schedule_phrase(&phrase, self.config.rh.velocity);
            }
        }
    }

    // ─── Left hand ──────────────────────────────────────────────────────

    fn lh_velocity(&mut self) -> i32 {
        let (lo, hi) = self.config.lh.velocity;
        self.rng.gen_range(lo as i32..=hi as i32)
    }

    /// The root held through each chord, sometimes doubled at the fifth.
    fn lh_sustained_bass(&mut self) {
        if !self.chord_onset {
            return;
        }
        let chord = self.current_chord();
        let (low, high) = self.config.lh.register;
        let bass = chord.bass_in(low as i32, low as i32 + 12) as i32;
        let velocity = self.lh_velocity();
        let duration = self.rng.gen_range(3.0..6.0);
        self.schedule_note(bass, velocity, duration, 0.0);

        if chance(&mut self.rng, 0.4) && bass + 7 <= high as i32 {
            self.schedule_note(bass + 7, velocity - 10, duration, 0.05);
        }
    }

    fn lh_broken_chords(&mut self) {
        if !chance(&mut self.rng, 0.03 * self.config.lh.density) {
            return;
        }
        let chord = self.current_chord();
        let phrase = self.lh.generate_accompaniment_figure(
            &chord,
            2.0,
            AccompanimentStyle::Broken,
            &mut self.rng,
        );
        self.schedule_phrase(&phrase, self.config.lh.velocity);
    }

    fn lh_alberti(&mut self) {
        if self.lh_pattern_counter < 2.0 {
            return;
        }
        self.lh_pattern_counter = 0.0;
        let chord = self.current_chord();
        let phrase = self.lh.generate_accompaniment_figure(
            &chord,
            2.0,
            AccompanimentStyle::Alberti,
            &mut self.rng,
        );
        self.schedule_phrase(&phrase, self.config.lh.velocity);
    }

    /// The lowest four tones of a close voicing, lightly rolled.
    fn lh_block_chords(&mut self) {
        if !self.chord_onset {
            return;
        }
        let chord = self.current_chord();
        let (low, high) = self.config.lh.register;
        let voicing = chord.voicing(low as i32, high as i32, false, true, &mut self.rng);
        let vel_floor = self.config.lh.velocity.0 as i32;
        let base = self.rng.gen_range(vel_floor..=vel_floor + 15);
        let duration = self.rng.gen_range(2.0..4.0);
        for (i, &pitch) in voicing.iter().take(4).enumerate() {
            let velocity = base + self.rng.gen_range(-5..=5);
            self.schedule_note(pitch as i32, velocity, duration, i as f64 * 0.015);
        }
    }

    fn lh_rolling_octaves(&mut self) {
        if !chance(&mut self.rng, 0.02 * self.config.lh.density) {
            return;
        }
        let chord = self.current_chord();
        let (low, high) = self.config.lh.register;
        let bass = chord.bass_in(low as i32, low as i32 + 12) as i32;
        let velocity = self.lh_velocity();
        self.schedule_note(bass, velocity, 0.4, 0.0);
        if bass + 12 <= high as i32 {
            self.schedule_note(bass + 12, velocity - 5, 0.4, 0.15);
        }
    }

    fn lh_sparse_roots(&mut self) {
        if !chance(&mut self.rng, 0.008 * self.config.lh.density) {
            return;
        }
        let chord = self.current_chord();
        let (low, high) = self.config.lh.register;
        let bass = chord.bass_in(low as i32, high as i32) as i32;
        let velocity = self.rng.gen_range(45..=65);
        let duration = self.rng.gen_range(3.0..8.0);
        self.schedule_note(bass, velocity, duration, 0.0);
    }
}
