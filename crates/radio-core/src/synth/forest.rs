use super::{noise_chain, posted, Lifecycle, NoiseChain, SoundSource, SynthContext, TransientPool};
use crate::constants::GAIN_FLOOR;
use crate::error::Result;
use crate::graph::{exp_ramp, set_at, NodeArena, NodeId, NodeSpec, Waveform};
use crate::noise::NoiseColor;
use crate::scheduler::{ScheduleHandle, ScheduleSpec};
use rand::Rng;
use smallvec::SmallVec;

const BIRDS: ScheduleSpec = ScheduleSpec::new("forest-birds", 950, 1.2);
const BIRD_CHANCE: f64 = 0.42;

/// Wind bed, a faint insect drone breathing on a slow LFO, and bird calls.
pub struct Forest {
    ctx: SynthContext,
    arena: NodeArena,
    output: NodeId,
    intensity: f32,
    birds: TransientPool,
    schedules: SmallVec<[ScheduleHandle; 1]>,
    state: Lifecycle,
}

#[derive(Clone, Copy, Debug)]
struct BirdCall {
    f0: f32,
    f1: f32,
    dur: f64,
    level: f32,
    pan: f32,
}

impl Forest {
    pub fn new(ctx: &SynthContext, intensity: f32) -> Result<Self> {
        let mut arena = NodeArena::new(ctx.backend.clone());
        let out = arena.gain(1.0, "forest-out")?;

        let wind = noise_chain(
            ctx,
            &mut arena,
            NoiseChain {
                color: NoiseColor::Pink,
                highpass_hz: Some(120.0),
                lowpass_hz: Some(4200.0),
                gain: 0.12 * intensity,
                label: "forest-wind",
            },
        )?;
        arena.connect(wind, out)?;

        let insects = arena.gain(0.008 * intensity, "forest-insects")?;
        let insect_osc = arena.oscillator(Waveform::Sine, 5200.0, "forest-insects")?;
        arena.connect(insect_osc, insects)?;
        arena.connect(insects, out)?;

        let lfo = arena.oscillator(Waveform::Sine, 0.18, "forest-lfo")?;
        let lfo_depth = arena.gain(0.004 * intensity, "forest-lfo")?;
        arena.connect(lfo, lfo_depth)?;
        ctx.backend.connect_param(lfo_depth, insects.gain())?;

        Ok(Self {
            ctx: ctx.clone(),
            arena,
            output: out,
            intensity,
            birds: TransientPool::default(),
            schedules: SmallVec::new(),
            state: Lifecycle::Idle,
        })
    }

    fn schedule_birds(&self) -> ScheduleHandle {
        let ctx = self.ctx.clone();
        let pool = self.birds.clone();
        let out = self.output;
        let intensity = self.intensity;

        self.ctx.scheduler.schedule(BIRDS, move |t| {
            let call = {
                let mut rng = ctx.rng.borrow_mut();
                if !rng.gen_bool(BIRD_CHANCE) {
                    return;
                }
                let f0 = 750.0 + rng.gen::<f32>() * 450.0;
                BirdCall {
                    f0,
                    f1: 1500.0 + rng.gen::<f32>() * 1200.0,
                    dur: 0.08 + rng.gen::<f64>() * 0.18,
                    level: 0.05 * intensity * (0.5 + rng.gen::<f32>() * 0.8),
                    pan: rng.gen_range(-0.85..=0.85),
                }
            };
            posted("bird call", sing(&ctx, &pool, out, t, call));
        })
    }
}

/// Up-then-down sine sweep; the voice releases itself when the oscillator ends.
fn sing(ctx: &SynthContext, pool: &TransientPool, out: NodeId, t: f64, call: BirdCall) -> Result<()> {
    pool.spawn(&ctx.backend, |v| {
        let b = v.backend();
        let osc = v.add(
            NodeSpec::Oscillator {
                waveform: Waveform::Sine,
                frequency: call.f0,
            },
            "forest-bird",
        )?;
        let gain = v.add(NodeSpec::Gain { value: GAIN_FLOOR }, "forest-bird")?;
        let panner = v.add(NodeSpec::Panner { pan: call.pan }, "forest-bird")?;

        set_at(b, osc.frequency(), call.f0, t)?;
        exp_ramp(b, osc.frequency(), call.f1, t + call.dur * 0.55)?;
        exp_ramp(b, osc.frequency(), call.f0 * 0.9, t + call.dur)?;
        set_at(b, gain.gain(), GAIN_FLOOR, t)?;
        exp_ramp(b, gain.gain(), call.level, t + 0.01)?;
        exp_ramp(b, gain.gain(), GAIN_FLOOR, t + call.dur)?;
        set_at(b, panner.pan(), call.pan, t)?;

        b.connect(osc, gain)?;
        b.connect(gain, panner)?;
        b.connect(panner, out)?;
        b.start(osc, Some(t))?;
        b.stop(osc, Some(t + call.dur + 0.02));
        Ok(osc)
    })
}

impl SoundSource for Forest {
    fn kind(&self) -> &'static str {
        "forest"
    }

    fn output(&self) -> NodeId {
        self.output
    }

    fn start(&mut self) -> Result<()> {
        if !self.state.begin() {
            return Ok(());
        }
        self.arena.start_sources()?;
        let handle = self.schedule_birds();
        self.schedules.push(handle);
        Ok(())
    }

    fn stop(&mut self) {
        if !self.state.end() {
            return;
        }
        for s in &mut self.schedules {
            s.cancel();
        }
        self.schedules.clear();
        self.arena.stop_sources();
        self.birds.stop_all(&*self.ctx.backend);
    }
}
