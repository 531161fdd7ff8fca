// Host-side tests for the synth presets and the thunder/lightning timing.

use fnv::FnvHashMap;
use radio_core::constants::GAIN_FLOOR;
use radio_core::graph::{Automation, Param, ParamRef};
use radio_core::lightning::{plan_strike, ThunderClock};
use radio_core::noise::NoiseBufferFactory;
use radio_core::sim::SimContext;
use radio_core::station::{PresetKind, Space, SynthParams, SynthSpec};
use radio_core::synth::{build_synth, droplet_probability, SoundSource, SynthContext};
use radio_core::{
    AudioBackend, EngineConfig, EventScheduler, LightningEvent, NodeId, Station, ThunderProfile,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

fn synth_ctx(sim: &SimContext, seed: u64) -> SynthContext {
    SynthContext {
        backend: sim.shared_backend(),
        timers: sim.shared_timers(),
        scheduler: EventScheduler::new(sim.shared_backend(), sim.shared_timers()),
        noise: Arc::new(NoiseBufferFactory::new()),
        rng: Rc::new(RefCell::new(StdRng::seed_from_u64(seed))),
        lightning: Rc::new(RefCell::new(None)),
    }
}

fn spec(preset: PresetKind) -> SynthSpec {
    SynthSpec {
        preset,
        params: SynthParams::default(),
    }
}

const ALL_PRESETS: [PresetKind; 5] = [
    PresetKind::Noise,
    PresetKind::Rain,
    PresetKind::RainWeather,
    PresetKind::Forest,
    PresetKind::Airport,
];

#[test]
fn stop_is_safe_before_start_and_when_repeated() {
    let sim = SimContext::default();
    let ctx = synth_ctx(&sim, 5);
    for preset in ALL_PRESETS {
        let mut never_started = build_synth(&ctx, &spec(preset)).unwrap();
        never_started.stop();
        never_started.stop();

        let mut source = build_synth(&ctx, &spec(preset)).unwrap();
        source.start().unwrap();
        source.start().unwrap();
        sim.advance(500);
        source.stop();
        source.stop();
        assert_eq!(ctx.scheduler.active_count(), 0, "{} left a scheduler", preset.name());
    }
}

#[test]
fn dropping_a_preset_releases_its_nodes() {
    let sim = SimContext::default();
    let ctx = synth_ctx(&sim, 9);
    for preset in ALL_PRESETS {
        let before = sim.backend.live_nodes();
        let mut source = build_synth(&ctx, &spec(preset)).unwrap();
        source.start().unwrap();
        sim.advance(3000);
        source.stop();
        drop(source);
        sim.advance(100);
        assert_eq!(sim.backend.live_nodes(), before, "{} leaked nodes", preset.name());
    }
}

#[test]
fn presets_run_their_schedulers() {
    let sim = SimContext::default();
    let ctx = synth_ctx(&sim, 2);
    let expect = [
        (PresetKind::Rain, &["rain-droplets"][..]),
        (PresetKind::Forest, &["forest-birds"][..]),
        (PresetKind::Airport, &["airport-announcements", "airport-beeps"][..]),
        (
            PresetKind::RainWeather,
            &["rain-droplets", "weather-thunder", "weather-wind"][..],
        ),
    ];
    for (preset, labels) in expect {
        let mut source = build_synth(&ctx, &spec(preset)).unwrap();
        source.start().unwrap();
        assert_eq!(ctx.scheduler.active_labels(), labels.to_vec());
        source.stop();
    }
}

#[test]
fn droplet_chance_saturates() {
    assert!((droplet_probability(0.0) - 0.35).abs() < 1e-6);
    assert!((droplet_probability(0.4) - 0.85).abs() < 1e-6);
    assert_eq!(droplet_probability(0.8), 1.0);
    assert_eq!(droplet_probability(1.0), 1.0);
}

#[test]
fn bird_calls_clean_themselves_up() {
    let sim = SimContext::default();
    let ctx = synth_ctx(&sim, 4);
    let mut forest = build_synth(&ctx, &spec(PresetKind::Forest)).unwrap();
    forest.start().unwrap();
    sim.advance(60_000);
    assert!(sim.backend.starts("forest-bird") > 10);
    // Only calls still inside the lookahead window are alive.
    assert!(sim.backend.live_with_label("forest-bird") < 3 * 4);

    forest.stop();
    assert_eq!(sim.backend.live_with_label("forest-bird"), 0);
}

#[test]
fn stormy_thunder_is_a_uniform_renewal_process() {
    let mut rng = StdRng::seed_from_u64(2024);
    let mut clock = ThunderClock::new(0.0, ThunderProfile::Stormy, &mut rng);
    assert!((20.0..26.0).contains(&clock.next_at()));

    let mut strikes = Vec::new();
    let mut slot = 0.0;
    while strikes.len() < 400 {
        if clock.poll(slot, &mut rng) {
            strikes.push(slot);
        }
        slot += 0.25;
    }
    let gaps: Vec<f64> = strikes.windows(2).map(|w| w[1] - w[0]).collect();
    assert!(gaps.iter().all(|g| (20.0..=60.25).contains(g)), "gap out of range");

    let mean = gaps.iter().sum::<f64>() / gaps.len() as f64;
    assert!((mean - 40.1).abs() < 2.5, "mean gap {mean}");
    let short = gaps.iter().filter(|&&g| g < 40.0).count() as f64 / gaps.len() as f64;
    assert!((0.4..0.6).contains(&short), "share below midpoint {short}");
}

#[test]
fn strike_timing_is_measured_from_the_decision() {
    let mut rng = StdRng::seed_from_u64(1);
    let s = plan_strike(5.0, 4.0, 0.5, &mut rng);
    assert!(s.visual_at >= 5.05 && s.visual_at < 5.3);
    let expected_ms = ((s.visual_at - 4.0) * 1000.0).round() as u32;
    assert_eq!(s.visual_delay_ms, expected_ms);
}

fn storm_station() -> Station {
    Station::from_json(
        r#"{"id":"storm","name":"Storm","freq":"88.1","band":"FM","category":"Weather",
            "source":{"kind":"synth","preset":"rainWeather",
                      "params":{"intensity":0.9,"thunderProfile":"stormy",
                                "thunderNearness":0.9,"space":"outdoor"}}}"#,
    )
    .unwrap()
}

#[test]
fn lightning_precedes_its_rumble() {
    let sim = SimContext::default();
    let engine = sim.engine(EngineConfig::seeded(77));
    let flashes: Rc<RefCell<Vec<(f64, LightningEvent)>>> = Rc::default();
    let seen = flashes.clone();
    let clock = sim.backend.clone();
    engine.set_on_lightning(Some(Rc::new(move |ev: LightningEvent| {
        seen.borrow_mut().push((clock.current_time(), ev));
    })));
    engine.power_on().unwrap();
    engine.set_station(&storm_station(), None).unwrap();

    sim.advance(130_000);

    let flashes = flashes.borrow();
    let rumbles = sim.backend.start_times("thunder-rumble");
    assert!(flashes.len() >= 2, "only {} strikes", flashes.len());
    assert!(rumbles.len() >= flashes.len());
    for ((flash_at, ev), rumble_at) in flashes.iter().zip(&rumbles) {
        assert!(flash_at < rumble_at, "flash {flash_at} after rumble {rumble_at}");
        assert!(ev.near > 0.6);
        assert_eq!(ev.thunder_profile, ThunderProfile::Stormy);
        assert!((ev.intensity - 0.9).abs() < 1e-6);
    }
}

#[test]
fn no_flash_after_power_off() {
    let sim = SimContext::default();
    let engine = sim.engine(EngineConfig::seeded(3));
    let count = Rc::new(RefCell::new(0));
    let c = count.clone();
    engine.set_on_lightning(Some(Rc::new(move |_: LightningEvent| *c.borrow_mut() += 1)));
    engine.power_on().unwrap();
    engine.set_station(&storm_station(), None).unwrap();

    // Run until the first strike has been decided, then switch off before its flash.
    let mut waited = 0;
    while sim.backend.starts("thunder-rumble") == 0 && waited < 40_000 {
        sim.advance(1);
        waited += 1;
    }
    assert_eq!(sim.backend.starts("thunder-rumble"), 1);
    assert_eq!(*count.borrow(), 0);

    engine.power_off();
    sim.advance(5000);
    assert_eq!(*count.borrow(), 0);
    assert_eq!(sim.backend.live_with_label("thunder-rumble"), 0);
}

fn run_preset(seed: u64, spec: SynthSpec, ms: u64) -> SimContext {
    let sim = SimContext::default();
    let ctx = synth_ctx(&sim, seed);
    let mut source = build_synth(&ctx, &spec).unwrap();
    source.start().unwrap();
    sim.advance(ms);
    source.stop();
    sim
}

fn weather(params: SynthParams) -> SynthSpec {
    SynthSpec {
        preset: PresetKind::RainWeather,
        params,
    }
}

/// `(time, value)` of every `SetValueAtTime` on `param` for `label`.
fn sets(sim: &SimContext, label: &str, param: Param) -> Vec<(f64, f32)> {
    sim.backend
        .automation(label)
        .into_iter()
        .filter_map(|(p, a)| match a {
            Automation::SetValueAtTime { value, time } if p.param == param => Some((time, value)),
            _ => None,
        })
        .collect()
}

/// Envelope lengths: from each gain reset to the floor until the ramp that
/// brings it back down to the floor.
fn envelopes(sim: &SimContext, label: &str) -> Vec<f64> {
    let mut opened: FnvHashMap<ParamRef, f64> = FnvHashMap::default();
    let mut lengths = Vec::new();
    for (p, a) in sim.backend.automation(label) {
        if p.param != Param::Gain {
            continue;
        }
        match a {
            Automation::SetValueAtTime { value, time } if value == GAIN_FLOOR => {
                opened.insert(p, time);
            }
            Automation::ExponentialRampToValueAtTime { value, time } if value == GAIN_FLOOR => {
                if let Some(start) = opened.remove(&p) {
                    lengths.push(time - start);
                }
            }
            _ => {}
        }
    }
    lengths
}

fn assert_within<T: PartialOrd + std::fmt::Debug + Copy>(what: &str, values: &[T], lo: T, hi: T) {
    assert!(!values.is_empty(), "no {what} recorded");
    for v in values {
        assert!(*v >= lo && *v <= hi, "{what} {v:?} outside {lo:?}..={hi:?}");
    }
}

const EPS: f64 = 1e-9;

#[test]
fn droplets_land_in_their_band() {
    let sim = run_preset(21, spec(PresetKind::Rain), 5000);
    let centres: Vec<f32> = sets(&sim, "rain-droplets", Param::Frequency).iter().map(|s| s.1).collect();
    let qs: Vec<f32> = sets(&sim, "rain-droplets", Param::Q).iter().map(|s| s.1).collect();
    let pans: Vec<f32> = sets(&sim, "rain-droplets", Param::Pan).iter().map(|s| s.1).collect();
    assert!(centres.len() > 20);
    assert_within("droplet centre", &centres, 3200.0, 5800.0);
    assert_within("droplet q", &qs, 1.2, 3.4);
    assert_within("droplet pan", &pans, -0.75, 0.75);
    assert_within("droplet decay", &envelopes(&sim, "rain-droplets"), 0.055 - EPS, 0.085 + EPS);
}

#[test]
fn bird_calls_sweep_up_and_back() {
    let sim = run_preset(8, spec(PresetKind::Forest), 30_000);
    let sweeps: Vec<Automation> = sim
        .backend
        .automation("forest-bird")
        .into_iter()
        .filter(|(p, _)| p.param == Param::Frequency)
        .map(|(_, a)| a)
        .collect();
    assert!(sweeps.len() >= 3 * 5);
    for call in sweeps.chunks_exact(3) {
        let [Automation::SetValueAtTime { value: f0, time: t0 }, Automation::ExponentialRampToValueAtTime { value: f1, time: t1 }, Automation::ExponentialRampToValueAtTime { value: f2, time: t2 }] =
            *call
        else {
            panic!("unexpected sweep shape {call:?}");
        };
        assert!((750.0..=1200.0).contains(&f0), "start {f0}");
        assert!((1500.0..=2700.0).contains(&f1), "peak {f1}");
        assert!((f2 - 0.9 * f0).abs() < 1e-3, "end {f2} vs start {f0}");
        assert!(t0 < t1 && t1 < t2);
        assert!((0.08 - EPS..=0.26 + EPS).contains(&(t2 - t0)), "length {}", t2 - t0);
    }
    let pans: Vec<f32> = sets(&sim, "forest-bird", Param::Pan).iter().map(|s| s.1).collect();
    assert_within("bird pan", &pans, -0.85, 0.85);
}

#[test]
fn airport_events_stay_in_range() {
    let sim = run_preset(13, spec(PresetKind::Airport), 120_000);
    let centres: Vec<f32> = sets(&sim, "airport-announcement", Param::Frequency)
        .iter()
        .map(|s| s.1)
        .collect();
    assert_within("announcement centre", &centres, 850.0, 1750.0);
    assert_within(
        "announcement length",
        &envelopes(&sim, "airport-announcement"),
        0.55 - EPS,
        1.3 + EPS,
    );

    let tones: Vec<f32> = sets(&sim, "airport-beep", Param::Frequency).iter().map(|s| s.1).collect();
    assert!(tones.iter().all(|f| *f == 880.0 || *f == 660.0), "{tones:?}");
    assert_within("beep length", &envelopes(&sim, "airport-beep"), 0.06 - EPS, 0.12 + EPS);
}

#[test]
fn wind_gusts_swell_for_seconds() {
    let params = SynthParams {
        wind_chance: Some(1.0),
        ..SynthParams::default()
    };
    let sim = run_preset(17, weather(params), 20_000);
    let cutoffs: Vec<f32> = sets(&sim, "weather-wind", Param::Frequency).iter().map(|s| s.1).collect();
    assert!(cutoffs.len() > 10);
    assert_within("gust cutoff", &cutoffs, 800.0, 2200.0);
    assert_within("gust length", &envelopes(&sim, "weather-wind"), 1.6 - EPS, 4.8 + EPS);
}

/// `(start hz, end hz, seconds)` of every rumble oscillator glide.
fn rumbles(sim: &SimContext) -> Vec<(f32, f32, f64)> {
    let mut starts: FnvHashMap<NodeId, (f64, f32)> = FnvHashMap::default();
    let mut glides = Vec::new();
    for (p, a) in sim.backend.automation("thunder-rumble") {
        if p.param != Param::Frequency {
            continue;
        }
        match a {
            Automation::SetValueAtTime { value, time } => {
                starts.insert(p.node, (time, value));
            }
            Automation::ExponentialRampToValueAtTime { value, time } => {
                if let Some((t0, f0)) = starts.get(&p.node) {
                    glides.push((*f0, value, time - t0));
                }
            }
            _ => {}
        }
    }
    glides
}

#[test]
fn near_strikes_are_short_and_high() {
    let storm = |nearness| SynthParams {
        thunder_profile: Some(ThunderProfile::Stormy),
        thunder_nearness: Some(nearness),
        ..SynthParams::default()
    };

    let near = rumbles(&run_preset(31, weather(storm(1.0)), 130_000));
    assert!(near.len() >= 2);
    for (f0, f1, secs) in near {
        assert!((120.0..=200.0).contains(&f0), "near pitch {f0}");
        assert!((0.9 - EPS..=1.7 + EPS).contains(&secs), "near length {secs}");
        assert!(f1 >= f0 * 0.55 - 1e-3 && f1 <= f0 * 0.8 + 1e-3);
    }

    let far = rumbles(&run_preset(31, weather(storm(0.0)), 130_000));
    assert!(far.len() >= 2);
    for (f0, _, secs) in far {
        assert!((55.0..=110.0).contains(&f0), "far pitch {f0}");
        assert!((2.2 - EPS..=5.0 + EPS).contains(&secs), "far length {secs}");
    }
}

#[test]
fn space_sets_the_enclosure_cutoff() {
    for (space, hz) in [(Space::Cabin, 5200.0), (Space::Window, 8200.0), (Space::Outdoor, 12000.0)] {
        let sim = SimContext::default();
        let ctx = synth_ctx(&sim, 1);
        let params = SynthParams {
            space: Some(space),
            ..SynthParams::default()
        };
        let source = build_synth(&ctx, &weather(params)).unwrap();
        let filters = sim.backend.nodes_labelled("weather-space");
        assert_eq!(filters.len(), 1);
        assert_eq!(sim.backend.value(filters[0].frequency()), hz);
        drop(source);
    }
}
