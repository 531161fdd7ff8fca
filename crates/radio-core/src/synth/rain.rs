use super::{noise_chain, posted, Lifecycle, NoiseChain, SoundSource, SynthContext};
use crate::constants::GAIN_FLOOR;
use crate::error::Result;
use crate::graph::{exp_ramp, set_at, AudioBackend, Automation, FilterKind, NodeArena, NodeId, NodeSpec};
use crate::noise::NoiseColor;
use crate::scheduler::{ScheduleHandle, ScheduleSpec};
use rand::Rng;
use smallvec::SmallVec;

const DROPLETS: ScheduleSpec = ScheduleSpec::new("rain-droplets", 140, 0.7);

/// Per-tick chance of a droplet. The raw formula tops out at 1.6; anything
/// at or above 1 means a droplet on every tick.
pub fn droplet_probability(intensity: f32) -> f64 {
    let rate = (0.35 + 1.25 * intensity).clamp(0.35, 1.6);
    (rate as f64).min(1.0)
}

#[derive(Clone, Copy)]
struct DropletVoice {
    band: NodeId,
    vca: NodeId,
    panner: NodeId,
}

impl DropletVoice {
    #[allow(clippy::too_many_arguments)]
    fn hit(
        &self,
        b: &dyn AudioBackend,
        t: f64,
        level: f32,
        pan: f32,
        decay: f64,
        freq: f32,
        q: f32,
    ) -> Result<()> {
        set_at(b, self.panner.pan(), pan, t)?;
        b.automate(self.vca.gain(), Automation::CancelScheduledValues { time: t })?;
        set_at(b, self.vca.gain(), GAIN_FLOOR, t)?;
        exp_ramp(b, self.vca.gain(), level, t + 0.006)?;
        exp_ramp(b, self.vca.gain(), GAIN_FLOOR, t + decay)?;
        set_at(b, self.band.frequency(), freq, t)?;
        set_at(b, self.band.q(), q, t)
    }
}

pub struct Rain {
    ctx: SynthContext,
    arena: NodeArena,
    output: NodeId,
    droplet: DropletVoice,
    intensity: f32,
    schedules: SmallVec<[ScheduleHandle; 1]>,
    state: Lifecycle,
}

impl Rain {
    pub fn new(ctx: &SynthContext, intensity: f32) -> Result<Self> {
        let mut arena = NodeArena::new(ctx.backend.clone());
        let out = arena.gain(1.0, "rain-out")?;

        let base = noise_chain(
            ctx,
            &mut arena,
            NoiseChain {
                color: NoiseColor::Pink,
                highpass_hz: Some(350.0),
                lowpass_hz: Some(9000.0),
                gain: 0.18 * intensity,
                label: "rain-base",
            },
        )?;
        arena.connect(base, out)?;

        let rumble = noise_chain(
            ctx,
            &mut arena,
            NoiseChain {
                color: NoiseColor::Brown,
                highpass_hz: None,
                lowpass_hz: Some(220.0),
                gain: 0.05 * intensity,
                label: "rain-rumble",
            },
        )?;
        arena.connect(rumble, out)?;

        let drops = noise_chain(
            ctx,
            &mut arena,
            NoiseChain {
                color: NoiseColor::White,
                highpass_hz: Some(1200.0),
                lowpass_hz: Some(11000.0),
                gain: 1.0,
                label: "rain-droplets",
            },
        )?;
        let band = arena.filter(FilterKind::Bandpass, 3800.0, 1.8, "rain-droplets")?;
        let vca = arena.gain(GAIN_FLOOR, "rain-droplets")?;
        let panner = arena.add(NodeSpec::Panner { pan: 0.0 }, "rain-droplets")?;
        arena.connect(drops, band)?;
        arena.connect(band, vca)?;
        arena.connect(vca, panner)?;
        arena.connect(panner, out)?;

        Ok(Self {
            ctx: ctx.clone(),
            arena,
            output: out,
            droplet: DropletVoice { band, vca, panner },
            intensity,
            schedules: SmallVec::new(),
            state: Lifecycle::Idle,
        })
    }

    fn schedule_droplets(&self) -> ScheduleHandle {
        let backend = self.ctx.backend.clone();
        let rng = self.ctx.rng.clone();
        let voice = self.droplet;
        let intensity = self.intensity;
        let chance = droplet_probability(intensity);

        self.ctx.scheduler.schedule(DROPLETS, move |t| {
            let (level, pan, decay, freq, q) = {
                let mut rng = rng.borrow_mut();
                if !rng.gen_bool(chance) {
                    return;
                }
                (
                    0.18 * intensity * (0.35 + rng.gen::<f32>()),
                    rng.gen_range(-0.75..=0.75_f32),
                    0.055 + rng.gen_range(0.0..0.03),
                    3200.0 + rng.gen::<f32>() * 2600.0,
                    1.2 + rng.gen::<f32>() * 2.2,
                )
            };
            posted("droplet", voice.hit(&*backend, t, level, pan, decay, freq, q));
        })
    }
}

impl SoundSource for Rain {
    fn kind(&self) -> &'static str {
        "rain"
    }

    fn output(&self) -> NodeId {
        self.output
    }

    fn start(&mut self) -> Result<()> {
        if !self.state.begin() {
            return Ok(());
        }
        self.arena.start_sources()?;
        let handle = self.schedule_droplets();
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
    }
}
