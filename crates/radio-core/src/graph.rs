//! Signal-graph seam between the engine and whatever renders audio.
//!
//! The engine never touches samples. It creates nodes, wires them, starts and
//! stops sources and posts timestamped parameter automation; the backend
//! (WebAudio in the browser, `sim` in tests) owns the real-time rendering.

use crate::constants::GAIN_FLOOR;
use crate::error::Result;
use crate::noise::NoiseBuffer;
use crate::station::MediaInput;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Param {
    Gain,
    Frequency,
    Q,
    Pan,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ParamRef {
    pub node: NodeId,
    pub param: Param,
}

impl NodeId {
    pub fn gain(self) -> ParamRef {
        ParamRef {
            node: self,
            param: Param::Gain,
        }
    }

    pub fn frequency(self) -> ParamRef {
        ParamRef {
            node: self,
            param: Param::Frequency,
        }
    }

    pub fn q(self) -> ParamRef {
        ParamRef {
            node: self,
            param: Param::Q,
        }
    }

    pub fn pan(self) -> ParamRef {
        ParamRef {
            node: self,
            param: Param::Pan,
        }
    }
}

/// Timestamped parameter change, mirroring the WebAudio `AudioParam` calls.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Automation {
    SetValueAtTime { value: f32, time: f64 },
    ExponentialRampToValueAtTime { value: f32, time: f64 },
    CancelScheduledValues { time: f64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FilterKind {
    Lowpass,
    Highpass,
    Bandpass,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Waveform {
    Sine,
    Triangle,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LimiterSettings {
    pub threshold_db: f32,
    pub knee_db: f32,
    pub ratio: f32,
    pub attack_sec: f32,
    pub release_sec: f32,
}

#[derive(Clone, Debug)]
pub enum NodeSpec {
    Gain { value: f32 },
    Filter { kind: FilterKind, frequency: f32, q: f32 },
    Oscillator { waveform: Waveform, frequency: f32 },
    /// Looping playback of a shared noise buffer.
    Noise { buffer: Arc<NoiseBuffer> },
    Panner { pan: f32 },
    Limiter(LimiterSettings),
    Analyser { fft_size: u32, smoothing: f64 },
    Media(MediaInput),
}

impl NodeSpec {
    /// Whether the node must be started/stopped to produce sound.
    pub fn is_source(&self) -> bool {
        matches!(
            self,
            NodeSpec::Oscillator { .. } | NodeSpec::Noise { .. } | NodeSpec::Media(_)
        )
    }
}

pub trait AudioBackend {
    /// Audio clock in seconds; the only timestamp source the engine trusts.
    fn current_time(&self) -> f64;
    fn sample_rate(&self) -> f32;

    fn create(&self, spec: NodeSpec, label: &'static str) -> Result<NodeId>;
    fn connect(&self, from: NodeId, to: NodeId) -> Result<()>;
    fn connect_param(&self, from: NodeId, to: ParamRef) -> Result<()>;
    fn connect_destination(&self, from: NodeId) -> Result<()>;
    /// Drops every outgoing connection of `node`. Never fails.
    fn disconnect(&self, node: NodeId);

    /// Start a source now (`None`) or at an audio time.
    fn start(&self, node: NodeId, when: Option<f64>) -> Result<()>;
    /// Stop a source. Stopping twice, or before start, is a no-op.
    fn stop(&self, node: NodeId, when: Option<f64>);
    fn on_ended(&self, node: NodeId, callback: Box<dyn FnOnce()>);

    fn param_value(&self, param: ParamRef) -> f32;
    fn automate(&self, param: ParamRef, automation: Automation) -> Result<()>;

    /// Forget a node; temporary handles it holds (object URLs) are freed here.
    fn release(&self, node: NodeId);

    fn resume(&self) -> Result<()>;
    fn suspend(&self) -> Result<()>;

    fn frequency_data(&self, analyser: NodeId, out: &mut Vec<f32>);
}

pub type SharedBackend = Rc<dyn AudioBackend>;

/// Exponential ramp with the target floored above zero.
pub fn exp_ramp(backend: &dyn AudioBackend, param: ParamRef, value: f32, time: f64) -> Result<()> {
    backend.automate(
        param,
        Automation::ExponentialRampToValueAtTime {
            value: value.max(GAIN_FLOOR),
            time,
        },
    )
}

pub fn set_at(backend: &dyn AudioBackend, param: ParamRef, value: f32, time: f64) -> Result<()> {
    backend.automate(param, Automation::SetValueAtTime { value, time })
}

/// Drop pending automation at `at` and pin the param there, so the next
/// ramp starts from the value actually playing rather than a stale target.
pub fn pin(backend: &dyn AudioBackend, param: ParamRef, at: f64) -> Result<f32> {
    let current = backend.param_value(param);
    backend.automate(param, Automation::CancelScheduledValues { time: at })?;
    set_at(backend, param, current, at)?;
    Ok(current)
}

/// Cancel, pin at now, then ramp exponentially to `target` over `seconds`.
pub fn glide(backend: &dyn AudioBackend, param: ParamRef, target: f32, seconds: f64) -> Result<()> {
    let now = backend.current_time();
    pin(backend, param, now)?;
    exp_ramp(backend, param, target, now + seconds)
}

/// Instant cut: cancel and set at now.
pub fn cut(backend: &dyn AudioBackend, param: ParamRef, value: f32) -> Result<()> {
    let now = backend.current_time();
    backend.automate(param, Automation::CancelScheduledValues { time: now })?;
    set_at(backend, param, value, now)
}

/// Owns a group of nodes; tearing it down stops the sources, disconnects
/// and releases everything in one go.
pub struct NodeArena {
    backend: SharedBackend,
    nodes: Vec<NodeId>,
    sources: Vec<NodeId>,
    started: bool,
    torn_down: bool,
}

impl NodeArena {
    pub fn new(backend: SharedBackend) -> Self {
        Self {
            backend,
            nodes: Vec::new(),
            sources: Vec::new(),
            started: false,
            torn_down: false,
        }
    }

    pub fn add(&mut self, spec: NodeSpec, label: &'static str) -> Result<NodeId> {
        let is_source = spec.is_source();
        let id = self.backend.create(spec, label)?;
        self.nodes.push(id);
        if is_source {
            self.sources.push(id);
        }
        Ok(id)
    }

    pub fn gain(&mut self, value: f32, label: &'static str) -> Result<NodeId> {
        self.add(NodeSpec::Gain { value }, label)
    }

    pub fn filter(
        &mut self,
        kind: FilterKind,
        frequency: f32,
        q: f32,
        label: &'static str,
    ) -> Result<NodeId> {
        self.add(NodeSpec::Filter { kind, frequency, q }, label)
    }

    pub fn oscillator(
        &mut self,
        waveform: Waveform,
        frequency: f32,
        label: &'static str,
    ) -> Result<NodeId> {
        self.add(NodeSpec::Oscillator { waveform, frequency }, label)
    }

    pub fn connect(&self, from: NodeId, to: NodeId) -> Result<()> {
        self.backend.connect(from, to)
    }

    /// Start every source once; later calls do nothing.
    pub fn start_sources(&mut self) -> Result<()> {
        if self.started || self.torn_down {
            return Ok(());
        }
        self.started = true;
        for &src in &self.sources {
            self.backend.start(src, None)?;
        }
        Ok(())
    }

    pub fn stop_sources(&self) {
        if !self.started {
            return;
        }
        for &src in &self.sources {
            self.backend.stop(src, None);
        }
    }

    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.stop_sources();
        for &n in &self.nodes {
            self.backend.disconnect(n);
        }
        for &n in &self.nodes {
            self.backend.release(n);
        }
        self.nodes.clear();
        self.sources.clear();
    }
}

impl Drop for NodeArena {
    fn drop(&mut self) {
        self.teardown();
    }
}
