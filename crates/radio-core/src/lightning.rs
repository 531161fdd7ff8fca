//! Thunder timing: strike renewal process and light-before-sound delays.

use crate::station::ThunderProfile;
use rand::Rng;
use std::rc::Rc;

/// Payload for the visual flash, fired once per strike at the visual instant.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LightningEvent {
    pub near: f32,
    pub thunder_profile: ThunderProfile,
    pub intensity: f32,
}

pub type LightningHandler = Rc<dyn Fn(LightningEvent)>;

/// Spread applied around the configured nearness per strike.
pub const NEARNESS_JITTER: f32 = 0.18;
/// Strikes above this nearness get the short, bright rumble.
pub const NEAR_THRESHOLD: f32 = 0.6;
/// Strikes above this nearness may add a crack.
pub const CRACK_THRESHOLD: f32 = 0.55;
pub const CRACK_PROBABILITY: f64 = 0.75;

pub fn draw_nearness<R: Rng + ?Sized>(base: f32, rng: &mut R) -> f32 {
    let jitter = rng.gen_range(-NEARNESS_JITTER..=NEARNESS_JITTER);
    (base + jitter).clamp(0.0, 1.0)
}

/// Seconds between flash and rumble: closer strikes arrive sooner.
pub fn acoustic_delay(near: f32, spread: f64) -> f64 {
    0.25 + (1.0 - near as f64) * (0.9 + spread.clamp(0.0, 1.5))
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StrikeTiming {
    /// Audio time of the flash.
    pub visual_at: f64,
    /// Wall-clock delay from the decision instant to the flash callback.
    pub visual_delay_ms: u32,
    /// Flash to rumble.
    pub audio_delay_sec: f64,
}

impl StrikeTiming {
    pub fn sound_at(&self) -> f64 {
        self.visual_at + self.audio_delay_sec
    }
}

/// Timing for a strike decided at `now` for lookahead slot `slot`.
pub fn plan_strike<R: Rng + ?Sized>(slot: f64, now: f64, near: f32, rng: &mut R) -> StrikeTiming {
    let visual_at = slot + 0.05 + rng.gen_range(0.0..0.25);
    let audio_delay_sec = acoustic_delay(near, rng.gen_range(0.0..1.5));
    let visual_delay_ms = ((visual_at - now).max(0.0) * 1000.0).round() as u32;
    StrikeTiming {
        visual_at,
        visual_delay_ms,
        audio_delay_sec,
    }
}

/// Next-strike bookkeeping. Gaps are redrawn uniformly in the profile's
/// range right after each strike (renewal process, not Poisson).
#[derive(Clone, Debug)]
pub struct ThunderClock {
    range: (f64, f64),
    next_at: f64,
}

impl ThunderClock {
    /// First strike lands a little after the range's lower bound.
    pub fn new<R: Rng + ?Sized>(now: f64, profile: ThunderProfile, rng: &mut R) -> Self {
        let range = profile.interval_range();
        Self {
            range,
            next_at: now + range.0 + rng.gen_range(0.0..6.0),
        }
    }

    pub fn next_at(&self) -> f64 {
        self.next_at
    }

    /// True when `slot` is due for a strike; the next one is drawn immediately.
    pub fn poll<R: Rng + ?Sized>(&mut self, slot: f64, rng: &mut R) -> bool {
        if slot < self.next_at {
            return false;
        }
        let (lo, hi) = self.range;
        self.next_at = slot + rng.gen_range(lo..hi);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn near_strikes_arrive_sooner() {
        assert!(acoustic_delay(1.0, 1.0) < acoustic_delay(0.2, 1.0));
        assert!((acoustic_delay(1.0, 0.7) - 0.25).abs() < 1e-9);
        assert!((acoustic_delay(0.0, 1.5) - 2.65).abs() < 1e-9);
    }

    #[test]
    fn flash_precedes_rumble() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let near = draw_nearness(0.5, &mut rng);
            let s = plan_strike(10.0, 9.0, near, &mut rng);
            assert!(s.sound_at() > s.visual_at);
            assert!(s.audio_delay_sec >= 0.25);
            assert!(s.visual_delay_ms >= 1050 && s.visual_delay_ms <= 1300);
        }
    }

    #[test]
    fn nearness_stays_in_unit_range() {
        let mut rng = StdRng::seed_from_u64(3);
        for base in [0.0, 0.1, 0.9, 1.0] {
            for _ in 0..200 {
                let n = draw_nearness(base, &mut rng);
                assert!((0.0..=1.0).contains(&n));
                assert!((n - base).abs() <= NEARNESS_JITTER + 1e-6);
            }
        }
    }
}
