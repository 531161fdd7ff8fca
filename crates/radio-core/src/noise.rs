//! Colored-noise buffers.
//!
//! Buffers are generated once per `(sample_rate, color)` and shared by every
//! consumer through `Arc`; nothing mutates a buffer after it is built.
//! Consumers loop them, so eight seconds is enough to hide the repeat.

use crate::constants::*;
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoiseColor {
    White,
    Pink,
    Brown,
}

impl NoiseColor {
    pub const ALL: [NoiseColor; 3] = [NoiseColor::White, NoiseColor::Pink, NoiseColor::Brown];

    pub fn name(self) -> &'static str {
        match self {
            NoiseColor::White => "white",
            NoiseColor::Pink => "pink",
            NoiseColor::Brown => "brown",
        }
    }
}

#[derive(Debug, PartialEq)]
pub struct NoiseBuffer {
    pub color: NoiseColor,
    pub sample_rate: u32,
    pub duration_seconds: f64,
    /// `samples[channel][frame]`
    pub samples: Vec<Vec<f32>>,
}

impl NoiseBuffer {
    pub fn channels(&self) -> usize {
        self.samples.len()
    }

    pub fn frames(&self) -> usize {
        self.samples.first().map_or(0, Vec::len)
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.samples[index]
    }
}

/// mulberry32; one instance per channel so left and right never correlate.
struct Mulberry32(u32);

impl Mulberry32 {
    fn next_unit(&mut self) -> f32 {
        self.0 = self.0.wrapping_add(0x6d2b_79f5);
        let mut x = self.0;
        x = (x ^ (x >> 15)).wrapping_mul(x | 1);
        x ^= x.wrapping_add((x ^ (x >> 7)).wrapping_mul(x | 61));
        ((x ^ (x >> 14)) as f64 / 4_294_967_296.0) as f32
    }

    /// Uniform sample in [-1, 1).
    fn next_white(&mut self) -> f32 {
        self.next_unit() * 2.0 - 1.0
    }
}

#[derive(Default)]
struct PinkState {
    b: [f32; 7],
}

impl PinkState {
    // Paul Kellet's refined pink filter
    fn step(&mut self, white: f32) -> f32 {
        let b = &mut self.b;
        b[0] = 0.99886 * b[0] + white * 0.0555179;
        b[1] = 0.99332 * b[1] + white * 0.0750759;
        b[2] = 0.969 * b[2] + white * 0.153852;
        b[3] = 0.8665 * b[3] + white * 0.3104856;
        b[4] = 0.55 * b[4] + white * 0.5329522;
        b[5] = -0.7616 * b[5] - white * 0.016898;
        let pink = b[0] + b[1] + b[2] + b[3] + b[4] + b[5] + b[6] + white * 0.5362;
        b[6] = white * 0.115926;
        pink
    }
}

fn fill_channel(color: NoiseColor, rng: &mut Mulberry32, out: &mut [f32]) {
    match color {
        NoiseColor::White => {
            for s in out.iter_mut() {
                *s = rng.next_white();
            }
        }
        NoiseColor::Brown => {
            let mut last = 0.0_f32;
            for s in out.iter_mut() {
                last = (last + BROWN_LEAK * rng.next_white()) / (1.0 + BROWN_LEAK);
                *s = (last * BROWN_SCALE).clamp(-1.0, 1.0);
            }
        }
        NoiseColor::Pink => {
            let mut state = PinkState::default();
            for s in out.iter_mut() {
                *s = (state.step(rng.next_white()) * PINK_SCALE).clamp(-1.0, 1.0);
            }
        }
    }
}

/// Build a buffer without touching any cache.
pub fn generate(sample_rate: u32, color: NoiseColor, seconds: f64) -> NoiseBuffer {
    let frames = (seconds * sample_rate as f64).floor() as usize;
    let seeds = [
        NOISE_SEED_LEFT ^ sample_rate,
        NOISE_SEED_RIGHT ^ frames as u32,
    ];
    let samples = seeds
        .iter()
        .take(NOISE_CHANNELS)
        .map(|&seed| {
            let mut rng = Mulberry32(seed);
            let mut ch = vec![0.0_f32; frames];
            fill_channel(color, &mut rng, &mut ch);
            ch
        })
        .collect();
    NoiseBuffer {
        color,
        sample_rate,
        duration_seconds: seconds,
        samples,
    }
}

#[derive(Default)]
pub struct NoiseBufferFactory {
    cache: Mutex<FnvHashMap<(u32, NoiseColor), Arc<NoiseBuffer>>>,
}

impl NoiseBufferFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached buffer for this rate and color; repeated calls return the same `Arc`.
    pub fn get_buffer(&self, sample_rate: f32, color: NoiseColor) -> Arc<NoiseBuffer> {
        let sr = sample_rate.round() as u32;
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache
            .entry((sr, color))
            .or_insert_with(|| {
                log::debug!("[noise] generating {} buffer at {} Hz", color.name(), sr);
                Arc::new(generate(sr, color, NOISE_BUFFER_SECONDS))
            })
            .clone()
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().map_or(0, |c| c.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mulberry_matches_reference_sequence() {
        // First outputs of mulberry32(1), as produced by the common JS version.
        let mut rng = Mulberry32(1);
        let a = rng.next_unit();
        let b = rng.next_unit();
        assert!((a - 0.627_073_94).abs() < 1e-6, "got {a}");
        assert!((b - 0.002_735_721).abs() < 1e-6, "got {b}");
    }

    #[test]
    fn buffer_has_two_uncorrelated_channels() {
        let buf = generate(8000, NoiseColor::White, 1.0);
        assert_eq!(buf.channels(), 2);
        assert_eq!(buf.frames(), 8000);
        assert_ne!(buf.channel(0)[..16], buf.channel(1)[..16]);
    }

    #[test]
    fn brown_is_smoother_than_white() {
        let white = generate(8000, NoiseColor::White, 1.0);
        let brown = generate(8000, NoiseColor::Brown, 1.0);
        let roughness = |s: &[f32]| {
            s.windows(2).map(|w| (w[1] - w[0]).abs()).sum::<f32>() / s.len() as f32
        };
        assert!(roughness(brown.channel(0)) < roughness(white.channel(0)) * 0.2);
    }

    #[test]
    fn cache_returns_same_instance() {
        let f = NoiseBufferFactory::new();
        let a = f.get_buffer(8000.0, NoiseColor::Pink);
        let b = f.get_buffer(8000.0, NoiseColor::Pink);
        assert!(Arc::ptr_eq(&a, &b));
        let _ = f.get_buffer(8000.0, NoiseColor::Brown);
        assert_eq!(f.cached_len(), 2);
    }
}
