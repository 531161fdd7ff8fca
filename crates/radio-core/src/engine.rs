//! Mixing topology, power lifecycle, station switching and texture layering.
//!
//! ```text
//! station source ─▶ StationGain ────┐
//! texture noise  ─▶ TextureGain ────┼─▶ MasterGain ─▶ Limiter ─▶ Analyser ─▶ out
//! scan static    ─▶ TransitionGain ─┘
//! ```
//!
//! Exactly one station source is connected to `StationGain`. A switch fades
//! the gain out, then after the fade window retires the old source and
//! connects the new one just as the ramp-in begins.

use crate::constants::*;
use crate::error::{RadioError, Result};
use crate::graph::{
    cut, exp_ramp, glide, pin, LimiterSettings, NodeArena, NodeId, NodeSpec, SharedBackend,
};
use crate::lightning::LightningHandler;
use crate::media::MediaSource;
use crate::noise::NoiseBufferFactory;
use crate::scheduler::EventScheduler;
use crate::station::{MediaInput, SourceSpec, Station, TextureColor, TextureSpec};
use crate::synth::{build_synth, NoiseBed, SoundSource, SynthContext};
use crate::timers::{SharedTimers, TimerId};
use futures::channel::oneshot;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::task::{Context, Poll};

#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    pub master_gain: f32,
    pub station_level: f32,
    pub analyser_fft_size: u32,
    pub analyser_smoothing: f64,
    pub limiter: LimiterSettings,
    /// `None` seeds from OS entropy.
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            master_gain: MASTER_GAIN,
            station_level: STATION_LEVEL,
            analyser_fft_size: ANALYSER_FFT_SIZE,
            analyser_smoothing: ANALYSER_SMOOTHING,
            limiter: LimiterSettings {
                threshold_db: LIMITER_THRESHOLD_DB,
                knee_db: LIMITER_KNEE_DB,
                ratio: LIMITER_RATIO,
                attack_sec: LIMITER_ATTACK_SEC,
                release_sec: LIMITER_RELEASE_SEC,
            },
            seed: None,
        }
    }
}

impl EngineConfig {
    pub fn seeded(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..Self::default()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerState {
    /// Topology not built yet.
    None,
    Running,
    Suspended,
}

impl PowerState {
    pub fn as_str(self) -> &'static str {
        match self {
            PowerState::None => "none",
            PowerState::Running => "running",
            PowerState::Suspended => "suspended",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Station switched and `on_lock` ran.
    Locked,
    /// A later switch or power-off took over before the lock.
    Superseded,
    /// Engine was off; nothing happened.
    Ignored,
}

/// Completes when the scan sequence has finished (or been superseded).
pub struct ScanFuture {
    rx: oneshot::Receiver<Result<ScanOutcome>>,
}

impl Future for ScanFuture {
    type Output = Result<ScanOutcome>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // Engine dropped before the lock delay elapsed.
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Ok(ScanOutcome::Superseded)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Long-lived nodes, built once on first power-on.
struct Bus {
    _arena: NodeArena,
    station: NodeId,
    texture: NodeId,
    transition: NodeId,
    analyser: NodeId,
    _static: NoiseBed,
}

struct Live {
    station: Station,
    source: Box<dyn SoundSource>,
}

/// A switch waiting for its fade-out window to elapse.
struct Swap {
    id: u64,
    timer: TimerId,
    outgoing: Option<Live>,
}

struct EngineInner {
    config: EngineConfig,
    ctx: SynthContext,
    bus: Option<Bus>,
    powered: bool,
    current: Option<Live>,
    swap: Option<Swap>,
    next_swap: u64,
    texture: TextureSpec,
    texture_source: Option<NoiseBed>,
    /// Bumped by every switch and by power-off; a scan only locks if it
    /// still holds the latest value.
    generation: u64,
    scan: Option<u64>,
}

/// Handle to the radio engine. Clones share the same engine.
#[derive(Clone)]
pub struct Engine {
    inner: Rc<RefCell<EngineInner>>,
}

impl Engine {
    pub fn new(backend: SharedBackend, timers: SharedTimers, config: EngineConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let ctx = SynthContext {
            scheduler: EventScheduler::new(backend.clone(), timers.clone()),
            backend,
            timers,
            noise: Arc::new(NoiseBufferFactory::new()),
            rng: Rc::new(RefCell::new(rng)),
            lightning: Rc::new(RefCell::new(None)),
        };
        Self {
            inner: Rc::new(RefCell::new(EngineInner {
                config,
                ctx,
                bus: None,
                powered: false,
                current: None,
                swap: None,
                next_swap: 0,
                texture: TextureSpec::OFF,
                texture_source: None,
                generation: 0,
                scan: None,
            })),
        }
    }

    pub fn power_on(&self) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.bus.is_none() {
            let bus = inner.build_bus()?;
            inner.bus = Some(bus);
            log::info!("[engine] topology ready");
        }
        inner.powered = true;
        if let Err(e) = inner.ctx.backend.resume() {
            log::debug!("[engine] resume failed: {}", e);
        }
        Ok(())
    }

    /// Stop the station, silence everything at once and suspend the clock.
    /// Backend failures are absorbed.
    pub fn power_off(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.powered = false;
        inner.generation += 1;
        inner.scan = None;
        inner.flush_swap();
        if let Some(live) = inner.current.take() {
            inner.retire(live);
        }
        if let Err(e) = inner.apply_texture(TextureSpec::OFF, true) {
            log::debug!("[engine] texture cut failed: {}", e);
        }
        if let Some((station, transition)) = inner.bus.as_ref().map(|b| (b.station, b.transition)) {
            let backend = &*inner.ctx.backend;
            for gain in [station, transition] {
                if let Err(e) = cut(backend, gain.gain(), GAIN_FLOOR) {
                    log::debug!("[engine] gain cut failed: {}", e);
                }
            }
        }
        if let Err(e) = inner.ctx.backend.suspend() {
            log::debug!("[engine] suspend failed: {}", e);
        }
        log::info!("[engine] powered off");
    }

    pub fn is_powered(&self) -> bool {
        self.inner.borrow().powered
    }

    pub fn state(&self) -> PowerState {
        let inner = self.inner.borrow();
        match (&inner.bus, inner.powered) {
            (None, _) => PowerState::None,
            (Some(_), true) => PowerState::Running,
            (Some(_), false) => PowerState::Suspended,
        }
    }

    /// Crossfade to `station`. Ignored while powered off. The new source is
    /// built before anything changes, so a bad descriptor leaves the current
    /// station playing.
    pub fn set_station(&self, station: &Station, media: Option<MediaInput>) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if !inner.powered {
            log::debug!("[engine] set_station({}) ignored while off", station.id);
            return Ok(());
        }
        let source = inner.prepare(station, media)?;
        inner.generation += 1;
        if inner.scan.take().is_some() {
            inner.decay_transition();
        }
        inner.switch_to(station, source, Rc::downgrade(&self.inner))
    }

    /// Simulated tuning: static swells in, the station locks after a fixed
    /// delay, `on_lock` runs, and the static decays.
    pub fn scan_to_station(
        &self,
        station: Station,
        media: Option<MediaInput>,
        on_lock: Box<dyn FnOnce()>,
    ) -> ScanFuture {
        let (tx, rx) = oneshot::channel();
        let future = ScanFuture { rx };

        let mut inner = self.inner.borrow_mut();
        if !inner.powered {
            let _ = tx.send(Ok(ScanOutcome::Ignored));
            return future;
        }
        inner.generation += 1;
        let generation = inner.generation;
        inner.scan = Some(generation);
        if let Err(e) = inner.begin_scan() {
            inner.scan = None;
            let _ = tx.send(Err(e));
            return future;
        }
        log::info!("[engine] scanning to {}", station.id);

        let weak = Rc::downgrade(&self.inner);
        let timers = inner.ctx.timers.clone();
        drop(inner);
        timers.after(
            SCAN_LOCK_DELAY_MS,
            Box::new(move || {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let engine = Engine { inner };
                let outcome = engine.lock_scan(generation, &station, media);
                if let Ok(ScanOutcome::Locked) = outcome {
                    on_lock();
                }
                engine.settle_scan(generation);
                let _ = tx.send(outcome);
            }),
        );
        future
    }

    pub fn set_texture(&self, texture: TextureSpec) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if !inner.powered {
            return Ok(());
        }
        inner.apply_texture(texture, false)
    }

    pub fn texture(&self) -> TextureSpec {
        self.inner.borrow().texture
    }

    pub fn set_on_lightning(&self, handler: Option<LightningHandler>) {
        let inner = self.inner.borrow();
        *inner.ctx.lightning.borrow_mut() = handler;
    }

    pub fn analyser(&self) -> Option<NodeId> {
        self.inner.borrow().bus.as_ref().map(|b| b.analyser)
    }

    /// Current spectrum in dB; false if the topology is not built yet.
    pub fn frequency_data(&self, out: &mut Vec<f32>) -> bool {
        let inner = self.inner.borrow();
        match &inner.bus {
            Some(bus) => {
                inner.ctx.backend.frequency_data(bus.analyser, out);
                true
            }
            None => false,
        }
    }

    pub fn current_station(&self) -> Option<Station> {
        self.inner.borrow().current.as_ref().map(|l| l.station.clone())
    }

    pub fn station_gain(&self) -> Option<NodeId> {
        self.inner.borrow().bus.as_ref().map(|b| b.station)
    }

    pub fn texture_gain(&self) -> Option<NodeId> {
        self.inner.borrow().bus.as_ref().map(|b| b.texture)
    }

    pub fn transition_gain(&self) -> Option<NodeId> {
        self.inner.borrow().bus.as_ref().map(|b| b.transition)
    }

    pub fn scheduler(&self) -> EventScheduler {
        self.inner.borrow().ctx.scheduler.clone()
    }

    fn lock_scan(&self, generation: u64, station: &Station, media: Option<MediaInput>) -> Result<ScanOutcome> {
        let mut inner = self.inner.borrow_mut();
        if !inner.powered || inner.generation != generation {
            log::debug!("[engine] scan to {} superseded", station.id);
            return Ok(ScanOutcome::Superseded);
        }
        let source = inner.prepare(station, media)?;
        if let Some(bus) = &inner.bus {
            let backend = &*inner.ctx.backend;
            pin(backend, bus.transition.gain(), backend.current_time())?;
        }
        inner.switch_to(station, source, Rc::downgrade(&self.inner))?;
        inner.apply_texture(station.texture, false)?;
        Ok(ScanOutcome::Locked)
    }

    fn settle_scan(&self, generation: u64) {
        let mut inner = self.inner.borrow_mut();
        if inner.scan == Some(generation) {
            inner.scan = None;
            inner.decay_transition();
        }
    }

    fn complete_swap(&self, id: u64) {
        let mut inner = self.inner.borrow_mut();
        if inner.swap.as_ref().map(|s| s.id) != Some(id) {
            return;
        }
        if let Some(swap) = inner.swap.take() {
            if let Some(old) = swap.outgoing {
                inner.retire(old);
            }
        }
        let (Some(bus), Some(live)) = (&inner.bus, &inner.current) else {
            return;
        };
        let backend = &*inner.ctx.backend;
        if let Err(e) = backend.connect(live.source.output(), bus.station) {
            log::warn!("[engine] could not connect {}: {}", live.station.id, e);
            return;
        }
        // The ramp-in starts on the audio clock only once the swap has happened.
        let gain = bus.station.gain();
        let ramp = cut(backend, gain, GAIN_FLOOR).and_then(|()| {
            let end = backend.current_time() + STATION_FADE_IN_SEC;
            exp_ramp(backend, gain, inner.config.station_level, end)
        });
        match ramp {
            Ok(()) => log::info!("[engine] on air: {} ({})", live.station.id, live.source.kind()),
            Err(e) => log::warn!("[engine] ramp-in for {} failed: {}", live.station.id, e),
        }
    }
}

impl EngineInner {
    fn build_bus(&self) -> Result<Bus> {
        let b = &self.ctx.backend;
        let cfg = &self.config;
        let mut arena = NodeArena::new(b.clone());

        let master = arena.gain(cfg.master_gain, "master")?;
        let limiter = arena.add(NodeSpec::Limiter(cfg.limiter), "limiter")?;
        let analyser = arena.add(
            NodeSpec::Analyser {
                fft_size: cfg.analyser_fft_size,
                smoothing: cfg.analyser_smoothing,
            },
            "analyser",
        )?;
        let station = arena.gain(GAIN_FLOOR, "station")?;
        let texture = arena.gain(GAIN_FLOOR, "texture")?;
        let transition = arena.gain(GAIN_FLOOR, "transition")?;

        for bus in [station, texture, transition] {
            arena.connect(bus, master)?;
        }
        arena.connect(master, limiter)?;
        arena.connect(limiter, analyser)?;
        b.connect_destination(analyser)?;

        // Scan static runs for the engine's lifetime, muted by TransitionGain.
        let mut scan_static = NoiseBed::scan_static(&self.ctx)?;
        b.connect(scan_static.output(), transition)?;
        scan_static.start()?;

        Ok(Bus {
            _arena: arena,
            station,
            texture,
            transition,
            analyser,
            _static: scan_static,
        })
    }

    fn build_source(&self, station: &Station, media: Option<MediaInput>) -> Result<Box<dyn SoundSource>> {
        match &station.source {
            SourceSpec::Synth(spec) => build_synth(&self.ctx, spec),
            SourceSpec::Url { .. } | SourceSpec::File => Ok(Box::new(MediaSource::for_station(
                &self.ctx.backend,
                station,
                media,
            )?)),
        }
    }

    fn bus(&self) -> Result<&Bus> {
        self.bus
            .as_ref()
            .ok_or_else(|| RadioError::backend("switch", "topology not built"))
    }

    /// Build and start a station's source, still unconnected.
    fn prepare(&self, station: &Station, media: Option<MediaInput>) -> Result<Box<dyn SoundSource>> {
        let mut source = self.build_source(station, media)?;
        source.start()?;
        Ok(source)
    }

    /// Fade the station bus out and hold it at the floor; `complete_swap`
    /// connects `source` and books the ramp-in.
    fn switch_to(
        &mut self,
        station: &Station,
        source: Box<dyn SoundSource>,
        engine: Weak<RefCell<EngineInner>>,
    ) -> Result<()> {
        let gain = self.bus()?.station.gain();
        glide(&*self.ctx.backend, gain, GAIN_FLOOR, STATION_FADE_OUT_SEC)?;

        self.flush_swap();
        let outgoing = self.current.replace(Live {
            station: station.clone(),
            source,
        });
        let id = self.next_swap;
        self.next_swap += 1;
        let timer = self.ctx.timers.after(
            (STATION_FADE_OUT_SEC * 1000.0).round() as u32,
            Box::new(move || {
                if let Some(inner) = engine.upgrade() {
                    Engine { inner }.complete_swap(id);
                }
            }),
        );
        self.swap = Some(Swap { id, timer, outgoing });
        log::debug!("[engine] switching to {}", station.id);
        Ok(())
    }

    /// Retire a pending swap's outgoing source now.
    fn flush_swap(&mut self) {
        if let Some(swap) = self.swap.take() {
            self.ctx.timers.clear(swap.timer);
            if let Some(old) = swap.outgoing {
                self.retire(old);
            }
        }
    }

    fn retire(&self, mut live: Live) {
        live.source.stop();
        self.ctx.backend.disconnect(live.source.output());
        log::debug!("[engine] retired {}", live.station.id);
    }

    fn begin_scan(&self) -> Result<()> {
        let bus = self.bus()?;
        let backend = &*self.ctx.backend;
        glide(backend, bus.station.gain(), GAIN_FLOOR, SCAN_DUCK_SEC)?;
        glide(backend, bus.transition.gain(), TRANSITION_LEVEL, SCAN_SWELL_SEC)
    }

    fn decay_transition(&self) {
        if let Some(bus) = &self.bus {
            if let Err(e) = glide(&*self.ctx.backend, bus.transition.gain(), GAIN_FLOOR, SCAN_DECAY_SEC) {
                log::debug!("[engine] static decay failed: {}", e);
            }
        }
    }

    /// Ramp (or cut) the texture level; swap the noise source only when the
    /// color changes.
    fn apply_texture(&mut self, texture: TextureSpec, immediate: bool) -> Result<()> {
        let amount = texture.clamped_amount();
        let changed = texture.color != self.texture.color;
        self.texture = TextureSpec {
            color: texture.color,
            amount,
        };
        let Some(gain) = self.bus.as_ref().map(|b| b.texture) else {
            return Ok(());
        };

        let target = match texture.color {
            TextureColor::Off => GAIN_FLOOR,
            _ => amount.max(GAIN_FLOOR),
        };
        let backend = &*self.ctx.backend;
        if immediate {
            cut(backend, gain.gain(), target)?;
        } else {
            glide(backend, gain.gain(), target, TEXTURE_RAMP_SEC)?;
        }

        if !changed {
            return Ok(());
        }
        if let Some(mut old) = self.texture_source.take() {
            old.stop();
            backend.disconnect(old.output());
        }
        if let Some(color) = texture.color.noise() {
            let mut bed = NoiseBed::texture(&self.ctx, color)?;
            backend.connect(bed.output(), gain)?;
            bed.start()?;
            self.texture_source = Some(bed);
            log::debug!("[engine] texture now {}", color.name());
        }
        Ok(())
    }
}
