//! Engine configuration: plain scalars and tags, clamped on every write.
//! Serializes to JSON for `--config`.

use crate::error::ConfigError;
use crate::rhythm::clamp_bpm;
use crate::scale::ScaleType;
use crate::types::{clamp_pitch, LhTexture, RhTexture, TimeSignature};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Rubato depth per unit of expressiveness.
pub const RUBATO_PER_EXPRESSIVENESS: f64 = 0.5;

/// Settings for one hand.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct HandConfig<T> {
    pub texture: T,
    pub density: f64,
    /// Lowest and highest MIDI pitch
    pub register: (u8, u8),
    /// Lowest and highest MIDI velocity
    pub velocity: (u8, u8),
}

impl<T> HandConfig<T> {
    pub fn set_density(&mut self, density: f64) {
        self.density = clamp_unit(density);
    }

    /// Out-of-range values clamp; reversed bounds are swapped.
    pub fn set_register(&mut self, low: i32, high: i32) {
        self.register = ordered_pair(clamp_pitch(low), clamp_pitch(high));
    }

    pub fn set_velocity(&mut self, min: i32, max: i32) {
        self.velocity = ordered_pair(min.clamp(1, 127) as u8, max.clamp(1, 127) as u8);
    }

    /// Clamp a velocity into this hand's range.
    pub fn clamp_velocity(&self, velocity: i32) -> u8 {
        velocity.clamp(self.velocity.0 as i32, self.velocity.1 as i32) as u8
    }

    fn sanitize(&mut self) {
        self.set_density(self.density);
        self.set_register(self.register.0 as i32, self.register.1 as i32);
        self.set_velocity(self.velocity.0 as i32, self.velocity.1 as i32);
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub tempo: f64,
    /// MIDI note of the tonic
    pub key_root: u8,
    pub scale_type: ScaleType,
    pub time_signature: TimeSignature,
    pub tension: f64,
    pub expressiveness: f64,
    /// MIDI channel, 0–15
    pub channel: u8,
    pub rh: HandConfig<RhTexture>,
    pub lh: HandConfig<LhTexture>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tempo: 72.0,
            key_root: 60,
            scale_type: ScaleType::Major,
            time_signature: TimeSignature::FourFour,
            tension: 0.3,
            expressiveness: 0.6,
            channel: 0,
            rh: HandConfig {
                texture: RhTexture::ShimmeringChords,
                density: 0.5,
                register: (60, 96),
                velocity: (45, 85),
            },
            lh: HandConfig {
                texture: LhTexture::SustainedBass,
                density: 0.4,
                register: (36, 60),
                velocity: (50, 80),
            },
        }
    }
}

impl EngineConfig {
    pub fn set_tempo(&mut self, bpm: f64) {
        self.tempo = clamp_bpm(bpm);
    }

    pub fn set_key(&mut self, root: i32, scale_type: Option<ScaleType>) {
        self.key_root = clamp_pitch(root);
        if let Some(t) = scale_type {
            self.scale_type = t;
        }
    }

    pub fn set_tension(&mut self, tension: f64) {
        self.tension = clamp_unit(tension);
    }

    pub fn set_expressiveness(&mut self, expressiveness: f64) {
        self.expressiveness = clamp_unit(expressiveness);
    }

    pub fn set_channel(&mut self, channel: i32) {
        self.channel = channel.clamp(0, 15) as u8;
    }

    /// Rubato depth implied by the current expressiveness.
    pub fn rubato(&self) -> f64 {
        self.expressiveness * RUBATO_PER_EXPRESSIVENESS
    }

    /// Re-apply every clamp. Used after deserializing.
    pub fn sanitized(mut self) -> Self {
        self.set_tempo(self.tempo);
        self.set_key(self.key_root as i32, None);
        self.set_tension(self.tension);
        self.set_expressiveness(self.expressiveness);
        self.set_channel(self.channel as i32);
        self.rh.sanitize();
        self.lh.sanitize();
        self
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&data)?;
        info!("Loaded config from {:?}", path);
        Ok(config.sanitized())
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!("Config saved to {:?}", path);
        Ok(())
    }
}

fn clamp_unit(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

fn ordered_pair(a: u8, b: u8) -> (u8, u8) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setters_clamp() {
        let mut c = EngineConfig::default();
        c.set_tempo(10.0);
        assert_eq!(c.tempo, 20.0);
        c.set_tempo(1000.0);
        assert_eq!(c.tempo, 300.0);
        c.set_tension(-1.0);
        assert_eq!(c.tension, 0.0);
        c.set_expressiveness(3.0);
        assert_eq!(c.expressiveness, 1.0);
        c.set_channel(20);
        assert_eq!(c.channel, 15);
        c.rh.set_density(f64::NAN);
        assert_eq!(c.rh.density, 0.0);
    }

    #[test]
    fn test_register_and_velocity_swap() {
        let mut c = EngineConfig::default();
        c.lh.set_register(72, 40);
        assert_eq!(c.lh.register, (40, 72));
        c.rh.set_velocity(200, 0);
        assert_eq!(c.rh.velocity, (1, 127));
        assert_eq!(c.rh.clamp_velocity(0), 1);
    }

    #[test]
    fn test_set_key_keeps_mode_when_absent() {
        let mut c = EngineConfig::default();
        c.set_key(62, Some(ScaleType::Dorian));
        c.set_key(65, None);
        assert_eq!(c.key_root, 65);
        assert_eq!(c.scale_type, ScaleType::Dorian);
    }

    #[test]
    fn test_rubato_coefficient() {
        let mut c = EngineConfig::default();
        c.set_expressiveness(0.8);
        assert!((c.rubato() - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_json_tags_and_partial_load() {
        let json = serde_json::to_string(&EngineConfig::default()).unwrap();
        assert!(json.contains("\"shimmering_chords\""));
        assert!(json.contains("\"4/4\""));

        let partial: EngineConfig =
            serde_json::from_str(r#"{"tempo": 500, "scale_type": "lydian"}"#).unwrap();
        let partial = partial.sanitized();
        assert_eq!(partial.tempo, 300.0);
        assert_eq!(partial.scale_type, ScaleType::Lydian);
        assert_eq!(partial.rh, EngineConfig::default().rh);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        let mut c = EngineConfig::default();
        c.lh.texture = LhTexture::AlbertiBass;
        c.save(&path).unwrap();
        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded, c);
        assert!(EngineConfig::load(&dir.path().join("missing.json")).is_err());
    }
}
