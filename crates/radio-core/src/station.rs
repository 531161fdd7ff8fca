//! Station descriptors as consumed from the persistence/UI layer.
//!
//! Descriptors are JSON objects with camelCase keys. Decoding is the only
//! validation the engine performs: an unknown `source.kind` or preset, or a
//! missing required field, fails here before any audio node is created.

use crate::constants::TEXTURE_AMOUNT_MAX;
use crate::error::Result;
use crate::noise::NoiseColor;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub id: String,
    pub name: String,
    pub freq: String,
    pub band: String,
    pub category: String,
    pub source: SourceSpec,
    #[serde(default)]
    pub texture: TextureSpec,
}

impl Station {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceSpec {
    Synth(SynthSpec),
    Url { url: String },
    /// Bytes are handed to the engine at play time.
    File,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SynthSpec {
    pub preset: PresetKind,
    #[serde(default)]
    pub params: SynthParams,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PresetKind {
    Noise,
    Rain,
    RainWeather,
    Forest,
    Airport,
}

impl PresetKind {
    pub fn name(self) -> &'static str {
        match self {
            PresetKind::Noise => "noise",
            PresetKind::Rain => "rain",
            PresetKind::RainWeather => "rainWeather",
            PresetKind::Forest => "forest",
            PresetKind::Airport => "airport",
        }
    }

    fn default_intensity(self) -> f32 {
        match self {
            PresetKind::Forest => 0.7,
            PresetKind::Airport => 0.75,
            _ => 0.8,
        }
    }
}

/// Loose bag of preset parameters; each preset reads the keys it knows.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SynthParams {
    pub intensity: Option<f32>,
    pub color: Option<NoiseColor>,
    pub drift_hz: Option<f32>,
    pub thunder_profile: Option<ThunderProfile>,
    pub thunder_nearness: Option<f32>,
    pub wind_chance: Option<f32>,
    pub space: Option<Space>,
}

impl SynthParams {
    pub fn intensity_for(&self, preset: PresetKind) -> f32 {
        self.intensity
            .unwrap_or_else(|| preset.default_intensity())
            .clamp(0.0, 1.0)
    }

    pub fn weather(&self) -> WeatherParams {
        let d = WeatherParams::default();
        WeatherParams {
            intensity: self.intensity.unwrap_or(d.intensity).clamp(0.0, 1.0),
            drift_hz: self.drift_hz.unwrap_or(d.drift_hz).clamp(0.02, 0.14),
            thunder_profile: self.thunder_profile.unwrap_or(d.thunder_profile),
            thunder_nearness: self
                .thunder_nearness
                .unwrap_or(d.thunder_nearness)
                .clamp(0.0, 1.0),
            wind_chance: self.wind_chance.unwrap_or(d.wind_chance).clamp(0.0, 1.0),
            space: self.space.unwrap_or(d.space),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThunderProfile {
    #[default]
    Rare,
    Medium,
    Stormy,
}

impl ThunderProfile {
    /// Range (seconds) the gap to the next strike is drawn from.
    pub fn interval_range(self) -> (f64, f64) {
        match self {
            ThunderProfile::Stormy => (20.0, 60.0),
            ThunderProfile::Medium => (45.0, 120.0),
            ThunderProfile::Rare => (90.0, 240.0),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Space {
    #[default]
    Window,
    Outdoor,
    Cabin,
}

impl Space {
    /// Cutoff of the enclosure lowpass.
    pub fn cutoff_hz(self) -> f32 {
        match self {
            Space::Cabin => 5200.0,
            Space::Window => 8200.0,
            Space::Outdoor => 12000.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WeatherParams {
    pub intensity: f32,
    pub drift_hz: f32,
    pub thunder_profile: ThunderProfile,
    pub thunder_nearness: f32,
    pub wind_chance: f32,
    pub space: Space,
}

impl Default for WeatherParams {
    fn default() -> Self {
        Self {
            intensity: 0.8,
            drift_hz: 0.06,
            thunder_profile: ThunderProfile::Rare,
            thunder_nearness: 0.35,
            wind_chance: 0.12,
            space: Space::Window,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextureColor {
    #[default]
    Off,
    White,
    Pink,
    Brown,
}

impl TextureColor {
    pub fn noise(self) -> Option<NoiseColor> {
        match self {
            TextureColor::Off => None,
            TextureColor::White => Some(NoiseColor::White),
            TextureColor::Pink => Some(NoiseColor::Pink),
            TextureColor::Brown => Some(NoiseColor::Brown),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextureSpec {
    pub color: TextureColor,
    pub amount: f32,
}

impl TextureSpec {
    pub const OFF: TextureSpec = TextureSpec {
        color: TextureColor::Off,
        amount: 0.0,
    };

    /// Amount clamped into the allowed range; non-finite values count as 0.
    pub fn clamped_amount(&self) -> f32 {
        if self.amount.is_finite() {
            self.amount.clamp(0.0, TEXTURE_AMOUNT_MAX)
        } else {
            0.0
        }
    }
}

/// Media bytes or location for `url`/`file` stations.
#[derive(Clone, Debug, PartialEq)]
pub enum MediaInput {
    Url(String),
    File { bytes: Vec<u8>, mime: Option<String> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_weather_station_with_camel_case_params() {
        let json = r#"{
            "id": "storm", "name": "Storm", "freq": "98.1", "band": "FM",
            "category": "Weather",
            "source": { "kind": "synth", "preset": "rainWeather",
                        "params": { "intensity": 0.9, "driftHz": 0.5,
                                    "thunderProfile": "stormy", "space": "cabin" } },
            "texture": { "color": "brown", "amount": 0.2 }
        }"#;
        let st = Station::from_json(json).unwrap();
        let SourceSpec::Synth(spec) = &st.source else {
            panic!("expected synth source");
        };
        assert_eq!(spec.preset, PresetKind::RainWeather);
        let w = spec.params.weather();
        assert_eq!(w.thunder_profile, ThunderProfile::Stormy);
        assert_eq!(w.space, Space::Cabin);
        assert!((w.drift_hz - 0.14).abs() < 1e-6, "drift clamps to 0.14");
        assert!((w.wind_chance - 0.12).abs() < 1e-6);
        assert_eq!(st.texture.color, TextureColor::Brown);
    }

    #[test]
    fn file_station_and_missing_texture() {
        let json = r#"{"id":"f","name":"F","freq":"","band":"AM","category":"Mine",
                       "source":{"kind":"file"}}"#;
        let st = Station::from_json(json).unwrap();
        assert_eq!(st.source, SourceSpec::File);
        assert_eq!(st.texture, TextureSpec::OFF);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let json = r#"{"id":"x","name":"X","freq":"1","band":"FM","category":"c",
                       "source":{"kind":"tape"}}"#;
        assert!(Station::from_json(json).is_err());
    }

    #[test]
    fn texture_amount_is_clamped() {
        let t = TextureSpec {
            color: TextureColor::Pink,
            amount: 2.0,
        };
        assert_eq!(t.clamped_amount(), TEXTURE_AMOUNT_MAX);
        let t = TextureSpec {
            color: TextureColor::Pink,
            amount: f32::NAN,
        };
        assert_eq!(t.clamped_amount(), 0.0);
    }
}
