use super::{noise_chain, Lifecycle, NoiseChain, SoundSource, SynthContext};
use crate::error::Result;
use crate::graph::{NodeArena, NodeId};
use crate::noise::NoiseColor;

/// A single filtered noise layer: the `noise` preset, the texture bed and
/// the tuning static all use it.
pub struct NoiseBed {
    arena: NodeArena,
    output: NodeId,
    kind: &'static str,
    state: Lifecycle,
}

impl NoiseBed {
    /// Flat station noise; brown skips the highpass to keep its low end.
    pub fn station(ctx: &SynthContext, color: NoiseColor) -> Result<Self> {
        let highpass_hz = (color != NoiseColor::Brown).then_some(40.0);
        Self::build(
            ctx,
            NoiseChain {
                color,
                highpass_hz,
                lowpass_hz: Some(18000.0),
                gain: 0.24,
                label: "station-noise",
            },
        )
    }

    /// Background texture layer.
    pub fn texture(ctx: &SynthContext, color: NoiseColor) -> Result<Self> {
        Self::build(ctx, band_limited(color, "texture"))
    }

    /// White static heard while scanning.
    pub fn scan_static(ctx: &SynthContext) -> Result<Self> {
        Self::build(ctx, band_limited(NoiseColor::White, "scan-static"))
    }

    fn build(ctx: &SynthContext, chain: NoiseChain) -> Result<Self> {
        let mut arena = NodeArena::new(ctx.backend.clone());
        let out = arena.gain(1.0, chain.label)?;
        let kind = chain.label;
        let layer = noise_chain(ctx, &mut arena, chain)?;
        arena.connect(layer, out)?;
        Ok(Self {
            arena,
            output: out,
            kind,
            state: Lifecycle::Idle,
        })
    }
}

fn band_limited(color: NoiseColor, label: &'static str) -> NoiseChain {
    NoiseChain {
        color,
        highpass_hz: Some(320.0),
        lowpass_hz: Some(9000.0),
        gain: 1.0,
        label,
    }
}

impl SoundSource for NoiseBed {
    fn kind(&self) -> &'static str {
        self.kind
    }

    fn output(&self) -> NodeId {
        self.output
    }

    fn start(&mut self) -> Result<()> {
        if !self.state.begin() {
            return Ok(());
        }
        self.arena.start_sources()
    }

    fn stop(&mut self) {
        if self.state.end() {
            self.arena.stop_sources();
        }
    }
}
