use super::{noise_chain, posted, Lifecycle, NoiseChain, SoundSource, SynthContext, TransientPool};
use crate::constants::GAIN_FLOOR;
use crate::error::Result;
use crate::graph::{
    exp_ramp, set_at, AudioBackend, Automation, FilterKind, NodeArena, NodeId, NodeSpec, Waveform,
};
use crate::noise::NoiseColor;
use crate::scheduler::{ScheduleHandle, ScheduleSpec};
use rand::Rng;
use smallvec::SmallVec;

const BEEPS: ScheduleSpec = ScheduleSpec::new("airport-beeps", 1100, 1.4);
const BEEP_CHANCE: f64 = 0.28;
const ANNOUNCEMENTS: ScheduleSpec = ScheduleSpec::new("airport-announcements", 2100, 1.6);
const ANNOUNCEMENT_CHANCE: f64 = 0.18;

/// Terminal hall: low rumble, murmuring crowd band, chimes and muffled PA.
pub struct Airport {
    ctx: SynthContext,
    arena: NodeArena,
    output: NodeId,
    intensity: f32,
    announcer: Announcer,
    beeps: TransientPool,
    schedules: SmallVec<[ScheduleHandle; 2]>,
    state: Lifecycle,
}

/// Bandpassed pink noise gated into short "speech" bursts.
#[derive(Clone, Copy)]
struct Announcer {
    band: NodeId,
    vca: NodeId,
}

impl Announcer {
    fn speak(&self, b: &dyn AudioBackend, t: f64, center: f32, q: f32, level: f32, dur: f64) -> Result<()> {
        set_at(b, self.band.frequency(), center, t)?;
        set_at(b, self.band.q(), q, t)?;
        b.automate(self.vca.gain(), Automation::CancelScheduledValues { time: t })?;
        set_at(b, self.vca.gain(), GAIN_FLOOR, t)?;
        exp_ramp(b, self.vca.gain(), level, t + 0.08)?;
        exp_ramp(b, self.vca.gain(), GAIN_FLOOR, t + dur)
    }
}

impl Airport {
    pub fn new(ctx: &SynthContext, intensity: f32) -> Result<Self> {
        let mut arena = NodeArena::new(ctx.backend.clone());
        let out = arena.gain(1.0, "airport-out")?;

        let rumble = noise_chain(
            ctx,
            &mut arena,
            NoiseChain {
                color: NoiseColor::Brown,
                highpass_hz: None,
                lowpass_hz: Some(160.0),
                gain: 0.12 * intensity,
                label: "airport-rumble",
            },
        )?;
        arena.connect(rumble, out)?;

        let crowd = noise_chain(
            ctx,
            &mut arena,
            NoiseChain {
                color: NoiseColor::Pink,
                highpass_hz: None,
                lowpass_hz: None,
                gain: 1.0,
                label: "airport-crowd",
            },
        )?;
        let crowd_band = arena.filter(FilterKind::Bandpass, 650.0, 0.55, "airport-crowd")?;
        let crowd_gain = arena.gain(0.07 * intensity, "airport-crowd")?;
        arena.connect(crowd, crowd_band)?;
        arena.connect(crowd_band, crowd_gain)?;
        arena.connect(crowd_gain, out)?;

        let lfo = arena.oscillator(Waveform::Sine, 0.07, "airport-crowd-lfo")?;
        let lfo_depth = arena.gain(0.015 * intensity, "airport-crowd-lfo")?;
        arena.connect(lfo, lfo_depth)?;
        ctx.backend.connect_param(lfo_depth, crowd_gain.gain())?;

        let pa = noise_chain(
            ctx,
            &mut arena,
            NoiseChain {
                color: NoiseColor::Pink,
                highpass_hz: None,
                lowpass_hz: None,
                gain: 1.0,
                label: "airport-announcement",
            },
        )?;
        let band = arena.filter(FilterKind::Bandpass, 1100.0, 0.85, "airport-announcement")?;
        let vca = arena.gain(GAIN_FLOOR, "airport-announcement")?;
        arena.connect(pa, band)?;
        arena.connect(band, vca)?;
        arena.connect(vca, out)?;

        Ok(Self {
            ctx: ctx.clone(),
            arena,
            output: out,
            intensity,
            announcer: Announcer { band, vca },
            beeps: TransientPool::default(),
            schedules: SmallVec::new(),
            state: Lifecycle::Idle,
        })
    }

    fn schedule_beeps(&self) -> ScheduleHandle {
        let ctx = self.ctx.clone();
        let pool = self.beeps.clone();
        let out = self.output;
        let intensity = self.intensity;

        self.ctx.scheduler.schedule(BEEPS, move |t| {
            let (freq, dur, level) = {
                let mut rng = ctx.rng.borrow_mut();
                if !rng.gen_bool(BEEP_CHANCE) {
                    return;
                }
                (
                    if rng.gen_bool(0.5) { 880.0 } else { 660.0 },
                    0.06 + rng.gen::<f64>() * 0.06,
                    0.04 * intensity * (0.6 + rng.gen::<f32>() * 0.6),
                )
            };
            let beep = pool.spawn(&ctx.backend, |v| {
                let b = v.backend();
                let osc = v.add(
                    NodeSpec::Oscillator {
                        waveform: Waveform::Sine,
                        frequency: freq,
                    },
                    "airport-beep",
                )?;
                let gain = v.add(NodeSpec::Gain { value: GAIN_FLOOR }, "airport-beep")?;
                set_at(b, osc.frequency(), freq, t)?;
                set_at(b, gain.gain(), GAIN_FLOOR, t)?;
                exp_ramp(b, gain.gain(), level, t + 0.01)?;
                exp_ramp(b, gain.gain(), GAIN_FLOOR, t + dur)?;
                b.connect(osc, gain)?;
                b.connect(gain, out)?;
                b.start(osc, Some(t))?;
                b.stop(osc, Some(t + dur + 0.02));
                Ok(osc)
            });
            posted("beep", beep);
        })
    }

    fn schedule_announcements(&self) -> ScheduleHandle {
        let backend = self.ctx.backend.clone();
        let rng = self.ctx.rng.clone();
        let announcer = self.announcer;
        let intensity = self.intensity;

        self.ctx.scheduler.schedule(ANNOUNCEMENTS, move |t| {
            let (center, q, level, dur) = {
                let mut rng = rng.borrow_mut();
                if !rng.gen_bool(ANNOUNCEMENT_CHANCE) {
                    return;
                }
                (
                    850.0 + rng.gen::<f32>() * 900.0,
                    0.6 + rng.gen::<f32>(),
                    0.03 * intensity * (0.55 + rng.gen::<f32>() * 0.8),
                    0.55 + rng.gen::<f64>() * 0.75,
                )
            };
            posted("announcement", announcer.speak(&*backend, t, center, q, level, dur));
        })
    }
}

impl SoundSource for Airport {
    fn kind(&self) -> &'static str {
        "airport"
    }

    fn output(&self) -> NodeId {
        self.output
    }

    fn start(&mut self) -> Result<()> {
        if !self.state.begin() {
            return Ok(());
        }
        self.arena.start_sources()?;
        let beeps = self.schedule_beeps();
        let announcements = self.schedule_announcements();
        self.schedules.push(beeps);
        self.schedules.push(announcements);
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
        self.beeps.stop_all(&*self.ctx.backend);
    }
}
