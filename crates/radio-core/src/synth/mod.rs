//! Procedural sound presets.
//!
//! Every preset owns an arena with its long-lived nodes plus the handles of
//! the schedulers it started, and exposes one output node. `stop()` halts all
//! sources and cancels all schedulers; dropping the preset releases its nodes.

mod airport;
mod forest;
mod noise;
mod rain;
mod weather;

pub use airport::Airport;
pub use forest::Forest;
pub use noise::NoiseBed;
pub use rain::{droplet_probability, Rain};
pub use weather::RainWeather;

use crate::error::Result;
use crate::graph::{AudioBackend, FilterKind, NodeArena, NodeId, NodeSpec, SharedBackend};
use crate::lightning::LightningHandler;
use crate::noise::{NoiseBufferFactory, NoiseColor};
use crate::scheduler::EventScheduler;
use crate::station::{PresetKind, SynthSpec};
use crate::timers::SharedTimers;
use fnv::FnvHashMap;
use rand::rngs::StdRng;
use smallvec::SmallVec;
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::Arc;

pub type SharedRng = Rc<RefCell<StdRng>>;

/// Current lightning callback; read at flash time so later registrations apply.
pub type LightningSlot = Rc<RefCell<Option<LightningHandler>>>;

/// Anything the engine can put on the station or texture bus.
pub trait SoundSource {
    fn kind(&self) -> &'static str;
    fn output(&self) -> NodeId;
    /// Start internal sources and schedulers. Starting twice is a no-op.
    fn start(&mut self) -> Result<()>;
    /// Halt everything. Safe before `start()` and safe to repeat.
    fn stop(&mut self);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    Idle,
    Running,
    Stopped,
}

impl Lifecycle {
    /// Move to `Running`; false if already running or stopped for good.
    pub fn begin(&mut self) -> bool {
        if *self == Lifecycle::Idle {
            *self = Lifecycle::Running;
            true
        } else {
            false
        }
    }

    /// Move to `Stopped`; false if it already was.
    pub fn end(&mut self) -> bool {
        let was = *self;
        *self = Lifecycle::Stopped;
        was != Lifecycle::Stopped
    }
}

/// Shared services every preset is built with.
#[derive(Clone)]
pub struct SynthContext {
    pub backend: SharedBackend,
    pub timers: SharedTimers,
    pub scheduler: EventScheduler,
    pub noise: Arc<NoiseBufferFactory>,
    pub rng: SharedRng,
    pub lightning: LightningSlot,
}

impl SynthContext {
    pub fn now(&self) -> f64 {
        self.backend.current_time()
    }
}

pub fn build_synth(ctx: &SynthContext, spec: &SynthSpec) -> Result<Box<dyn SoundSource>> {
    let p = &spec.params;
    let source: Box<dyn SoundSource> = match spec.preset {
        PresetKind::Noise => Box::new(NoiseBed::station(ctx, p.color.unwrap_or(NoiseColor::White))?),
        PresetKind::Rain => Box::new(Rain::new(ctx, p.intensity_for(PresetKind::Rain))?),
        PresetKind::Forest => Box::new(Forest::new(ctx, p.intensity_for(PresetKind::Forest))?),
        PresetKind::Airport => Box::new(Airport::new(ctx, p.intensity_for(PresetKind::Airport))?),
        PresetKind::RainWeather => Box::new(RainWeather::new(ctx, p.weather())?),
    };
    log::debug!("[synth] built {} ({})", spec.preset.name(), source.kind());
    Ok(source)
}

pub struct NoiseChain {
    pub color: NoiseColor,
    pub highpass_hz: Option<f32>,
    pub lowpass_hz: Option<f32>,
    pub gain: f32,
    pub label: &'static str,
}

pub(crate) fn chain_specs(ctx: &SynthContext, chain: &NoiseChain) -> SmallVec<[NodeSpec; 4]> {
    let buffer = ctx.noise.get_buffer(ctx.backend.sample_rate(), chain.color);
    let mut specs: SmallVec<[NodeSpec; 4]> = SmallVec::new();
    specs.push(NodeSpec::Noise { buffer });
    if let Some(hz) = chain.highpass_hz {
        specs.push(NodeSpec::Filter {
            kind: FilterKind::Highpass,
            frequency: hz,
            q: 0.8,
        });
    }
    if let Some(hz) = chain.lowpass_hz {
        specs.push(NodeSpec::Filter {
            kind: FilterKind::Lowpass,
            frequency: hz,
            q: 0.6,
        });
    }
    specs.push(NodeSpec::Gain { value: chain.gain });
    specs
}

/// Looping noise → optional highpass → optional lowpass → gain, owned by
/// `arena`. Returns the gain node.
pub fn noise_chain(ctx: &SynthContext, arena: &mut NodeArena, chain: NoiseChain) -> Result<NodeId> {
    let mut prev: Option<NodeId> = None;
    for spec in chain_specs(ctx, &chain) {
        let id = arena.add(spec, chain.label)?;
        if let Some(p) = prev {
            arena.connect(p, id)?;
        }
        prev = Some(id);
    }
    prev.ok_or_else(|| crate::RadioError::backend("noise chain", "empty chain"))
}

pub(crate) fn release_all(backend: &dyn AudioBackend, nodes: &[NodeId]) {
    for &n in nodes {
        backend.disconnect(n);
    }
    for &n in nodes {
        backend.release(n);
    }
}

type Voices = FnvHashMap<NodeId, SmallVec<[NodeId; 6]>>;

/// One-shot voices (bird calls, beeps, thunder) that clean themselves up
/// when their source ends, or all at once when the preset stops.
#[derive(Clone, Default)]
pub struct TransientPool {
    live: Rc<RefCell<Voices>>,
}

impl TransientPool {
    /// Track a voice whose `source` is already scheduled to start and stop.
    pub fn track(&self, backend: &SharedBackend, source: NodeId, nodes: SmallVec<[NodeId; 6]>) {
        self.live.borrow_mut().insert(source, nodes);
        let live: Weak<RefCell<Voices>> = Rc::downgrade(&self.live);
        let weak_backend = Rc::downgrade(backend);
        backend.on_ended(
            source,
            Box::new(move || {
                let (Some(live), Some(backend)) = (live.upgrade(), weak_backend.upgrade()) else {
                    return;
                };
                let removed = live.borrow_mut().remove(&source);
                if let Some(nodes) = removed {
                    release_all(&*backend, &nodes);
                }
            }),
        );
    }

    /// Build a one-shot voice and track it. `build` returns the source node;
    /// if it fails, every node created so far is released.
    pub fn spawn<F>(&self, backend: &SharedBackend, build: F) -> Result<()>
    where
        F: FnOnce(&mut VoiceBuilder<'_>) -> Result<NodeId>,
    {
        let mut voice = VoiceBuilder {
            backend: &**backend,
            nodes: SmallVec::new(),
        };
        match build(&mut voice) {
            Ok(source) => {
                self.track(backend, source, voice.nodes);
                Ok(())
            }
            Err(e) => {
                release_all(&**backend, &voice.nodes);
                Err(e)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.live.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stop_all(&self, backend: &dyn AudioBackend) {
        let drained: Vec<_> = self.live.borrow_mut().drain().collect();
        for (source, nodes) in drained {
            backend.stop(source, None);
            release_all(backend, &nodes);
        }
    }
}

pub struct VoiceBuilder<'a> {
    backend: &'a dyn AudioBackend,
    nodes: SmallVec<[NodeId; 6]>,
}

impl<'a> VoiceBuilder<'a> {
    pub fn backend(&self) -> &'a dyn AudioBackend {
        self.backend
    }

    pub fn add(&mut self, spec: NodeSpec, label: &'static str) -> Result<NodeId> {
        let id = self.backend.create(spec, label)?;
        self.nodes.push(id);
        Ok(id)
    }

    /// Create and connect `specs` in series; returns `(first, last)`.
    pub fn chain(
        &mut self,
        specs: impl IntoIterator<Item = NodeSpec>,
        label: &'static str,
    ) -> Result<(NodeId, NodeId)> {
        let mut ends: Option<(NodeId, NodeId)> = None;
        for spec in specs {
            let id = self.add(spec, label)?;
            ends = match ends {
                Some((first, last)) => {
                    self.backend.connect(last, id)?;
                    Some((first, id))
                }
                None => Some((id, id)),
            };
        }
        ends.ok_or_else(|| crate::RadioError::backend("voice chain", "empty chain"))
    }
}

/// Log-and-continue for automation posted from scheduler callbacks.
pub(crate) fn posted(what: &'static str, result: Result<()>) {
    if let Err(e) = result {
        log::debug!("[synth] {} automation dropped: {}", what, e);
    }
}
