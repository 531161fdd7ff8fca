use super::{
    chain_specs, noise_chain, posted, Lifecycle, NoiseChain, Rain, SoundSource, SynthContext,
    TransientPool,
};
use crate::constants::GAIN_FLOOR;
use crate::error::Result;
use crate::graph::{exp_ramp, set_at, AudioBackend, FilterKind, NodeArena, NodeId, NodeSpec, Waveform};
use crate::lightning::{
    draw_nearness, plan_strike, LightningEvent, StrikeTiming, ThunderClock, CRACK_PROBABILITY,
    CRACK_THRESHOLD, NEAR_THRESHOLD,
};
use crate::noise::NoiseColor;
use crate::scheduler::{ScheduleHandle, ScheduleSpec};
use crate::station::WeatherParams;
use rand::Rng;
use smallvec::SmallVec;
use std::cell::Cell;
use std::rc::Rc;

const THUNDER: ScheduleSpec = ScheduleSpec::new("weather-thunder", 250, 1.4);
const WIND: ScheduleSpec = ScheduleSpec::new("weather-wind", 900, 1.6);
const DRIFT_DEPTH: f32 = 0.12;
const CRACK_SECONDS: f64 = 0.15;

/// Rain plus drifting intensity, wind gusts and thunder, heard through a
/// lowpass that models the listening space.
pub struct RainWeather {
    ctx: SynthContext,
    arena: NodeArena,
    rain: Rain,
    output: NodeId,
    params: WeatherParams,
    wind: WindVoice,
    storm: TransientPool,
    flashes_armed: Rc<Cell<bool>>,
    schedules: SmallVec<[ScheduleHandle; 2]>,
    state: Lifecycle,
}

#[derive(Clone, Copy)]
struct WindVoice {
    filter: NodeId,
    vca: NodeId,
}

impl WindVoice {
    fn gust(&self, b: &dyn AudioBackend, t: f64, cutoff: f32, level: f32, dur: f64) -> Result<()> {
        set_at(b, self.filter.frequency(), cutoff, t)?;
        set_at(b, self.vca.gain(), GAIN_FLOOR, t)?;
        exp_ramp(b, self.vca.gain(), level, t + 0.18)?;
        exp_ramp(b, self.vca.gain(), GAIN_FLOOR, t + dur)
    }
}

/// Everything drawn for one strike.
#[derive(Clone, Copy, Debug)]
struct Strike {
    near: f32,
    timing: StrikeTiming,
    dur: f64,
    base_hz: f32,
    glide: f32,
    level: f32,
    cutoff_hz: f32,
    crack: bool,
}

impl Strike {
    fn draw<R: Rng + ?Sized>(slot: f64, now: f64, params: &WeatherParams, rng: &mut R) -> Self {
        let near = draw_nearness(params.thunder_nearness, rng);
        let timing = plan_strike(slot, now, near, rng);
        let close = near > NEAR_THRESHOLD;
        Strike {
            near,
            timing,
            dur: if close {
                0.9 + rng.gen::<f64>() * 0.8
            } else {
                2.2 + rng.gen::<f64>() * 2.8
            },
            base_hz: if close {
                120.0 + rng.gen::<f32>() * 80.0
            } else {
                55.0 + rng.gen::<f32>() * 55.0
            },
            glide: 0.55 + rng.gen::<f32>() * 0.25,
            level: 0.08 * params.intensity.clamp(0.3, 1.0) * (0.55 + near * 0.9),
            cutoff_hz: 240.0 + near * 520.0,
            crack: near > CRACK_THRESHOLD && rng.gen_bool(CRACK_PROBABILITY),
        }
    }
}

impl RainWeather {
    pub fn new(ctx: &SynthContext, params: WeatherParams) -> Result<Self> {
        let mut arena = NodeArena::new(ctx.backend.clone());
        let mix = arena.gain(1.0, "weather-mix")?;

        let rain = Rain::new(ctx, params.intensity)?;
        arena.connect(rain.output(), mix)?;

        let wind = noise_chain(
            ctx,
            &mut arena,
            NoiseChain {
                color: NoiseColor::Pink,
                highpass_hz: Some(90.0),
                lowpass_hz: Some(1800.0),
                gain: 1.0,
                label: "weather-wind",
            },
        )?;
        let wind_filter = arena.filter(FilterKind::Lowpass, 1200.0, 0.6, "weather-wind")?;
        let wind_vca = arena.gain(GAIN_FLOOR, "weather-wind")?;
        arena.connect(wind, wind_filter)?;
        arena.connect(wind_filter, wind_vca)?;
        arena.connect(wind_vca, mix)?;

        // Slow swell on the rain bed's own gain.
        let drift = arena.oscillator(Waveform::Sine, params.drift_hz, "weather-drift")?;
        let drift_depth = arena.gain(DRIFT_DEPTH, "weather-drift")?;
        arena.connect(drift, drift_depth)?;
        ctx.backend.connect_param(drift_depth, rain.output().gain())?;

        let space = arena.filter(FilterKind::Lowpass, params.space.cutoff_hz(), 0.4, "weather-space")?;
        let post = arena.gain(1.0, "weather-out")?;
        arena.connect(mix, space)?;
        arena.connect(space, post)?;

        Ok(Self {
            ctx: ctx.clone(),
            arena,
            rain,
            output: post,
            params,
            wind: WindVoice {
                filter: wind_filter,
                vca: wind_vca,
            },
            storm: TransientPool::default(),
            flashes_armed: Rc::new(Cell::new(false)),
            schedules: SmallVec::new(),
            state: Lifecycle::Idle,
        })
    }

    fn schedule_thunder(&self) -> ScheduleHandle {
        let ctx = self.ctx.clone();
        let pool = self.storm.clone();
        let post = self.output;
        let params = self.params;
        let armed = self.flashes_armed.clone();
        let mut clock = ThunderClock::new(ctx.now(), params.thunder_profile, &mut *ctx.rng.borrow_mut());
        log::debug!("[synth] first thunder due at {:.1}s", clock.next_at());

        self.ctx.scheduler.schedule(THUNDER, move |t| {
            let strike = {
                let mut rng = ctx.rng.borrow_mut();
                if !clock.poll(t, &mut *rng) {
                    return;
                }
                Strike::draw(t, ctx.now(), &params, &mut *rng)
            };
            log::debug!(
                "[synth] thunder near={:.2} flash@{:.2}s rumble@{:.2}s",
                strike.near,
                strike.timing.visual_at,
                strike.timing.sound_at()
            );
            flash(&ctx, &armed, &params, &strike);
            posted("thunder", rumble(&ctx, &pool, post, &strike));
            if strike.crack {
                posted("thunder crack", crack(&ctx, &pool, post, &strike));
            }
        })
    }

    fn schedule_wind(&self) -> ScheduleHandle {
        let backend = self.ctx.backend.clone();
        let rng = self.ctx.rng.clone();
        let voice = self.wind;
        let chance = self.params.wind_chance as f64;
        let intensity = self.params.intensity;

        self.ctx.scheduler.schedule(WIND, move |t| {
            let (cutoff, level, dur) = {
                let mut rng = rng.borrow_mut();
                if !rng.gen_bool(chance) {
                    return;
                }
                (
                    800.0 + rng.gen::<f32>() * 1400.0,
                    0.02 + 0.05 * intensity * (0.4 + rng.gen::<f32>() * 0.8),
                    1.6 + rng.gen::<f64>() * 3.2,
                )
            };
            posted("wind gust", voice.gust(&*backend, t, cutoff, level, dur));
        })
    }
}

/// Fire the lightning callback at the flash instant, ahead of the rumble.
fn flash(ctx: &SynthContext, armed: &Rc<Cell<bool>>, params: &WeatherParams, strike: &Strike) {
    let slot = ctx.lightning.clone();
    let armed = armed.clone();
    let event = LightningEvent {
        near: strike.near,
        thunder_profile: params.thunder_profile,
        intensity: params.intensity,
    };
    ctx.timers.after(
        strike.timing.visual_delay_ms,
        Box::new(move || {
            if !armed.get() {
                return;
            }
            let handler = slot.borrow().clone();
            if let Some(handler) = handler {
                handler(event);
            }
        }),
    );
}

fn rumble(ctx: &SynthContext, pool: &TransientPool, post: NodeId, s: &Strike) -> Result<()> {
    let at = s.timing.sound_at();
    pool.spawn(&ctx.backend, |v| {
        let b = v.backend();
        let osc = v.add(
            NodeSpec::Oscillator {
                waveform: Waveform::Triangle,
                frequency: s.base_hz,
            },
            "thunder-rumble",
        )?;
        let lp = v.add(
            NodeSpec::Filter {
                kind: FilterKind::Lowpass,
                frequency: s.cutoff_hz,
                q: 0.7,
            },
            "thunder-rumble",
        )?;
        let gain = v.add(NodeSpec::Gain { value: GAIN_FLOOR }, "thunder-rumble")?;

        set_at(b, osc.frequency(), s.base_hz, at)?;
        exp_ramp(b, osc.frequency(), s.base_hz * s.glide, at + s.dur)?;
        set_at(b, lp.frequency(), s.cutoff_hz, at)?;
        set_at(b, gain.gain(), GAIN_FLOOR, at)?;
        exp_ramp(b, gain.gain(), s.level, at + 0.06)?;
        exp_ramp(b, gain.gain(), GAIN_FLOOR, at + s.dur)?;

        b.connect(osc, lp)?;
        b.connect(lp, gain)?;
        b.connect(gain, post)?;
        b.start(osc, Some(at))?;
        b.stop(osc, Some(at + s.dur + 0.05));
        Ok(osc)
    })
}

/// Short highpassed noise snap layered on close strikes.
fn crack(ctx: &SynthContext, pool: &TransientPool, post: NodeId, s: &Strike) -> Result<()> {
    let at = s.timing.sound_at();
    let specs = chain_specs(
        ctx,
        &NoiseChain {
            color: NoiseColor::White,
            highpass_hz: Some(900.0),
            lowpass_hz: Some(9000.0),
            gain: 1.0,
            label: "thunder-crack",
        },
    );
    pool.spawn(&ctx.backend, |v| {
        let b = v.backend();
        let (src, tail) = v.chain(specs, "thunder-crack")?;
        let vca = v.add(NodeSpec::Gain { value: GAIN_FLOOR }, "thunder-crack")?;
        set_at(b, vca.gain(), GAIN_FLOOR, at)?;
        exp_ramp(b, vca.gain(), 0.12 * s.level, at + 0.01)?;
        exp_ramp(b, vca.gain(), GAIN_FLOOR, at + 0.12)?;
        b.connect(tail, vca)?;
        b.connect(vca, post)?;
        b.start(src, Some(at))?;
        b.stop(src, Some(at + CRACK_SECONDS));
        Ok(src)
    })
}

impl SoundSource for RainWeather {
    fn kind(&self) -> &'static str {
        "rainWeather"
    }

    fn output(&self) -> NodeId {
        self.output
    }

    fn start(&mut self) -> Result<()> {
        if !self.state.begin() {
            return Ok(());
        }
        self.rain.start()?;
        self.arena.start_sources()?;
        self.flashes_armed.set(true);
        let thunder = self.schedule_thunder();
        let wind = self.schedule_wind();
        self.schedules.push(thunder);
        self.schedules.push(wind);
        Ok(())
    }

    fn stop(&mut self) {
        if !self.state.end() {
            return;
        }
        self.flashes_armed.set(false);
        for s in &mut self.schedules {
            s.cancel();
        }
        self.schedules.clear();
        self.rain.stop();
        self.arena.stop_sources();
        self.storm.stop_all(&*self.ctx.backend);
    }
}
