// Host-side tests for the colored-noise buffers.

use proptest::prelude::*;
use radio_core::constants::NOISE_BUFFER_SECONDS;
use radio_core::noise::{generate, NoiseBufferFactory, NoiseColor};
use std::sync::Arc;

fn color() -> impl Strategy<Value = NoiseColor> {
    prop::sample::select(NoiseColor::ALL.to_vec())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn generation_is_deterministic_and_bounded(sr in 8_000u32..48_000, color in color()) {
        let a = generate(sr, color, 0.25);
        let b = generate(sr, color, 0.25);
        prop_assert_eq!(&a.samples, &b.samples);
        prop_assert_eq!(a.channels(), 2);
        for ch in &a.samples {
            prop_assert!(ch.iter().all(|s| (-1.0..=1.0).contains(s)));
        }
    }
}

#[test]
fn factory_shares_one_buffer_per_rate_and_color() {
    let factory = NoiseBufferFactory::new();
    let a = factory.get_buffer(44_100.0, NoiseColor::Pink);
    let b = factory.get_buffer(44_100.0, NoiseColor::Pink);
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(factory.cached_len(), 1);
    assert_eq!(a.frames(), (NOISE_BUFFER_SECONDS * 44_100.0) as usize);

    let other_rate = factory.get_buffer(48_000.0, NoiseColor::Pink);
    let other_color = factory.get_buffer(44_100.0, NoiseColor::Brown);
    assert_eq!(factory.cached_len(), 3);
    assert_ne!(a.channel(0)[..64], other_rate.channel(0)[..64]);
    assert_ne!(a.channel(0)[..64], other_color.channel(0)[..64]);
}

#[test]
fn every_color_has_signal() {
    for color in NoiseColor::ALL {
        let buf = generate(16_000, color, 1.0);
        let rms = (buf.channel(0).iter().map(|s| s * s).sum::<f32>() / buf.frames() as f32).sqrt();
        assert!(rms > 0.01, "{} is near silent (rms {rms})", color.name());
    }
}
