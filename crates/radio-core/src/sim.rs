//! Headless backend and timers.
//!
//! `SimBackend` keeps the node graph and evaluates parameter automation the
//! way WebAudio does, but renders no samples. `SimTimers` is a virtual
//! wall clock. `SimContext::advance` moves both together, so tests can
//! observe exactly what the engine asked the audio thread to do.

use crate::engine::{Engine, EngineConfig};
use crate::error::{RadioError, Result};
use crate::graph::{AudioBackend, Automation, NodeId, NodeSpec, Param, ParamRef, SharedBackend};
use crate::station::MediaInput;
use crate::timers::{SharedTimers, TimerId, Timers};
use fnv::FnvHashMap;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

pub const SIM_SAMPLE_RATE: f32 = 48_000.0;

/// Automation timeline for one parameter.
#[derive(Clone, Debug, Default)]
struct Timeline {
    initial: f32,
    events: Vec<Automation>,
}

fn event_time(a: &Automation) -> f64 {
    match *a {
        Automation::SetValueAtTime { time, .. }
        | Automation::ExponentialRampToValueAtTime { time, .. }
        | Automation::CancelScheduledValues { time } => time,
    }
}

impl Timeline {
    fn new(initial: f32) -> Self {
        Self {
            initial,
            events: Vec::new(),
        }
    }

    fn post(&mut self, a: Automation) {
        if let Automation::CancelScheduledValues { time } = a {
            self.events.retain(|e| event_time(e) < time);
            return;
        }
        let t = event_time(&a);
        let at = self.events.partition_point(|e| event_time(e) <= t);
        self.events.insert(at, a);
    }

    fn value_at(&self, t: f64) -> f32 {
        let (mut value, mut since) = (self.initial, f64::NEG_INFINITY);
        for e in &self.events {
            let et = event_time(e);
            if et <= t {
                value = match *e {
                    Automation::SetValueAtTime { value, .. }
                    | Automation::ExponentialRampToValueAtTime { value, .. } => value,
                    Automation::CancelScheduledValues { .. } => value,
                };
                since = et;
                continue;
            }
            let span = et - since;
            let frac = if span.is_finite() && span > 0.0 {
                ((t - since) / span) as f32
            } else {
                0.0
            };
            return match *e {
                Automation::ExponentialRampToValueAtTime { value: to, .. }
                    if value > 0.0 && to > 0.0 =>
                {
                    value * (to / value).powf(frac)
                }
                _ => value,
            };
        }
        value
    }
}

struct SimNode {
    label: &'static str,
    spec: NodeSpec,
    started: Option<f64>,
    stop_at: Option<f64>,
    ended: bool,
    params: FnvHashMap<Param, Timeline>,
}

impl SimNode {
    fn new(spec: NodeSpec, label: &'static str) -> Self {
        let mut params = FnvHashMap::default();
        match &spec {
            NodeSpec::Gain { value } => {
                params.insert(Param::Gain, Timeline::new(*value));
            }
            NodeSpec::Filter { frequency, q, .. } => {
                params.insert(Param::Frequency, Timeline::new(*frequency));
                params.insert(Param::Q, Timeline::new(*q));
            }
            NodeSpec::Oscillator { frequency, .. } => {
                params.insert(Param::Frequency, Timeline::new(*frequency));
            }
            NodeSpec::Panner { pan } => {
                params.insert(Param::Pan, Timeline::new(*pan));
            }
            _ => {}
        }
        Self {
            label,
            spec,
            started: None,
            stop_at: None,
            ended: false,
            params,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Target {
    Node(NodeId),
    Param(ParamRef),
    Destination,
}

#[derive(Default)]
struct SimState {
    time: f64,
    suspended: bool,
    next_id: u32,
    nodes: BTreeMap<NodeId, SimNode>,
    edges: Vec<(NodeId, Target)>,
    on_ended: FnvHashMap<NodeId, Box<dyn FnOnce()>>,
    starts: FnvHashMap<&'static str, usize>,
    start_log: Vec<(&'static str, f64)>,
    stops: FnvHashMap<&'static str, usize>,
    exp_targets: Vec<f32>,
    automation_log: Vec<(&'static str, ParamRef, Automation)>,
    object_urls: usize,
    revoked_urls: usize,
}

impl SimState {
    fn node_mut(&mut self, id: NodeId) -> Result<&mut SimNode> {
        self.nodes.get_mut(&id).ok_or(RadioError::UnknownNode(id.0))
    }

    fn check(&self, id: NodeId) -> Result<()> {
        if self.nodes.contains_key(&id) {
            Ok(())
        } else {
            Err(RadioError::UnknownNode(id.0))
        }
    }
}

pub struct SimBackend {
    sample_rate: f32,
    state: RefCell<SimState>,
}

impl SimBackend {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            state: RefCell::new(SimState::default()),
        }
    }

    /// Move the audio clock forward, unless suspended.
    pub fn tick(&self, seconds: f64) {
        let mut st = self.state.borrow_mut();
        if !st.suspended {
            st.time += seconds;
        }
    }

    pub fn is_running(&self) -> bool {
        !self.state.borrow().suspended
    }

    /// Fire `ended` for sources whose stop time has passed.
    pub fn fire_ended(&self) {
        let due: Vec<Box<dyn FnOnce()>> = {
            let mut st = self.state.borrow_mut();
            let now = st.time;
            let mut done = Vec::new();
            for (id, node) in st.nodes.iter_mut() {
                if !node.ended && node.started.is_some() && node.stop_at.is_some_and(|s| s <= now) {
                    node.ended = true;
                    done.push(*id);
                }
            }
            done.into_iter()
                .filter_map(|id| st.on_ended.remove(&id))
                .collect()
        };
        for callback in due {
            callback();
        }
    }

    pub fn value(&self, param: ParamRef) -> f32 {
        self.param_value(param)
    }

    pub fn value_at(&self, param: ParamRef, t: f64) -> f32 {
        let st = self.state.borrow();
        st.nodes
            .get(&param.node)
            .and_then(|n| n.params.get(&param.param))
            .map_or(0.0, |tl| tl.value_at(t))
    }

    pub fn starts(&self, label: &str) -> usize {
        self.state.borrow().starts.get(label).copied().unwrap_or(0)
    }

    /// Scheduled start times of every source carrying `label`.
    pub fn start_times(&self, label: &str) -> Vec<f64> {
        self.state
            .borrow()
            .start_log
            .iter()
            .filter(|(l, _)| *l == label)
            .map(|(_, t)| *t)
            .collect()
    }

    pub fn stops(&self, label: &str) -> usize {
        self.state.borrow().stops.get(label).copied().unwrap_or(0)
    }

    /// Every exponential-ramp target ever posted, in order.
    pub fn exp_targets(&self) -> Vec<f32> {
        self.state.borrow().exp_targets.clone()
    }

    /// Automation posted to nodes carrying `label`, in posting order. Kept
    /// after the nodes are released.
    pub fn automation(&self, label: &str) -> Vec<(ParamRef, Automation)> {
        self.state
            .borrow()
            .automation_log
            .iter()
            .filter(|(l, _, _)| *l == label)
            .map(|(_, p, a)| (*p, *a))
            .collect()
    }

    pub fn nodes_labelled(&self, label: &str) -> Vec<NodeId> {
        self.state
            .borrow()
            .nodes
            .iter()
            .filter(|(_, n)| n.label == label)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Nodes with an edge into `node`.
    pub fn inputs(&self, node: NodeId) -> Vec<NodeId> {
        self.state
            .borrow()
            .edges
            .iter()
            .filter(|(_, to)| *to == Target::Node(node))
            .map(|(from, _)| *from)
            .collect()
    }

    pub fn live_nodes(&self) -> usize {
        self.state.borrow().nodes.len()
    }

    pub fn live_with_label(&self, label: &str) -> usize {
        self.state
            .borrow()
            .nodes
            .values()
            .filter(|n| n.label == label)
            .count()
    }

    pub fn label(&self, node: NodeId) -> Option<&'static str> {
        self.state.borrow().nodes.get(&node).map(|n| n.label)
    }

    /// `(created, revoked)` object URLs for file media.
    pub fn object_urls(&self) -> (usize, usize) {
        let st = self.state.borrow();
        (st.object_urls, st.revoked_urls)
    }
}

impl AudioBackend for SimBackend {
    fn current_time(&self) -> f64 {
        self.state.borrow().time
    }

    fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    fn create(&self, spec: NodeSpec, label: &'static str) -> Result<NodeId> {
        let mut st = self.state.borrow_mut();
        let id = NodeId(st.next_id);
        st.next_id += 1;
        if let NodeSpec::Media(MediaInput::File { .. }) = &spec {
            st.object_urls += 1;
        }
        st.nodes.insert(id, SimNode::new(spec, label));
        Ok(id)
    }

    fn connect(&self, from: NodeId, to: NodeId) -> Result<()> {
        let mut st = self.state.borrow_mut();
        st.check(from)?;
        st.check(to)?;
        let edge = (from, Target::Node(to));
        if !st.edges.contains(&edge) {
            st.edges.push(edge);
        }
        Ok(())
    }

    fn connect_param(&self, from: NodeId, to: ParamRef) -> Result<()> {
        let mut st = self.state.borrow_mut();
        st.check(from)?;
        st.check(to.node)?;
        st.edges.push((from, Target::Param(to)));
        Ok(())
    }

    fn connect_destination(&self, from: NodeId) -> Result<()> {
        let mut st = self.state.borrow_mut();
        st.check(from)?;
        st.edges.push((from, Target::Destination));
        Ok(())
    }

    fn disconnect(&self, node: NodeId) {
        self.state.borrow_mut().edges.retain(|(from, _)| *from != node);
    }

    fn start(&self, node: NodeId, when: Option<f64>) -> Result<()> {
        let mut st = self.state.borrow_mut();
        let now = st.time;
        let n = st.node_mut(node)?;
        if !n.spec.is_source() {
            return Err(RadioError::backend("start", format!("{} is not a source", node)));
        }
        if n.started.is_some() {
            return Err(RadioError::backend("start", format!("{} already started", node)));
        }
        let at = when.unwrap_or(now).max(now);
        n.started = Some(at);
        let label = n.label;
        *st.starts.entry(label).or_default() += 1;
        st.start_log.push((label, at));
        Ok(())
    }

    fn stop(&self, node: NodeId, when: Option<f64>) {
        let mut st = self.state.borrow_mut();
        let now = st.time;
        let Some(n) = st.nodes.get_mut(&node) else {
            return;
        };
        if n.started.is_none() || n.ended {
            return;
        }
        let at = when.unwrap_or(now).max(now);
        match n.stop_at {
            // Rescheduling earlier is allowed but is not a second stop.
            Some(prev) => n.stop_at = Some(prev.min(at)),
            None => {
                n.stop_at = Some(at);
                let label = n.label;
                *st.stops.entry(label).or_default() += 1;
            }
        }
    }

    fn on_ended(&self, node: NodeId, callback: Box<dyn FnOnce()>) {
        self.state.borrow_mut().on_ended.insert(node, callback);
    }

    fn param_value(&self, param: ParamRef) -> f32 {
        let t = self.current_time();
        self.value_at(param, t)
    }

    fn automate(&self, param: ParamRef, automation: Automation) -> Result<()> {
        let mut st = self.state.borrow_mut();
        if let Automation::ExponentialRampToValueAtTime { value, .. } = automation {
            if value <= 0.0 || !value.is_finite() {
                return Err(RadioError::backend(
                    "exponential ramp",
                    format!("target {} must be positive", value),
                ));
            }
            st.exp_targets.push(value);
        }
        let n = st.node_mut(param.node)?;
        let label = n.label;
        let timeline = n.params.get_mut(&param.param).ok_or_else(|| {
            RadioError::backend("automate", format!("{} has no {:?}", param.node, param.param))
        })?;
        timeline.post(automation);
        st.automation_log.push((label, param, automation));
        Ok(())
    }

    fn release(&self, node: NodeId) {
        let mut st = self.state.borrow_mut();
        if let Some(n) = st.nodes.remove(&node) {
            if let NodeSpec::Media(MediaInput::File { .. }) = n.spec {
                st.revoked_urls += 1;
            }
        }
        st.edges.retain(|(from, to)| {
            let into = match to {
                Target::Node(n) => *n == node,
                Target::Param(p) => p.node == node,
                Target::Destination => false,
            };
            *from != node && !into
        });
        st.on_ended.remove(&node);
    }

    fn resume(&self) -> Result<()> {
        self.state.borrow_mut().suspended = false;
        Ok(())
    }

    fn suspend(&self) -> Result<()> {
        self.state.borrow_mut().suspended = true;
        Ok(())
    }

    fn frequency_data(&self, analyser: NodeId, out: &mut Vec<f32>) {
        let st = self.state.borrow();
        let bins = match st.nodes.get(&analyser).map(|n| &n.spec) {
            Some(NodeSpec::Analyser { fft_size, .. }) => *fft_size as usize / 2,
            _ => 0,
        };
        out.clear();
        out.resize(bins, -100.0);
    }
}

enum Entry {
    Every { period: u64, tick: Box<dyn FnMut()> },
    Once(Box<dyn FnOnce()>),
}

/// Virtual wall clock in whole milliseconds.
#[derive(Default)]
pub struct SimTimers {
    now_ms: Cell<u64>,
    next_id: Cell<u64>,
    queue: RefCell<BTreeMap<(u64, u64), Entry>>,
    running: Cell<Option<u64>>,
    running_cleared: Cell<bool>,
}

impl SimTimers {
    pub fn now_ms(&self) -> u64 {
        self.now_ms.get()
    }

    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    fn next_due(&self) -> Option<u64> {
        self.queue.borrow().keys().next().map(|(due, _)| *due)
    }

    fn insert(&self, due: u64, entry: Entry) -> TimerId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.queue.borrow_mut().insert((due, id), entry);
        TimerId(id)
    }

    /// Run the earliest entry; the queue is not borrowed while it runs.
    fn fire_next(&self) {
        let Some(((due, id), entry)) = self.queue.borrow_mut().pop_first() else {
            return;
        };
        self.running.set(Some(id));
        self.running_cleared.set(false);
        match entry {
            Entry::Once(callback) => callback(),
            Entry::Every { period, mut tick } => {
                tick();
                if !self.running_cleared.get() {
                    self.queue
                        .borrow_mut()
                        .insert((due + period, id), Entry::Every { period, tick });
                }
            }
        }
        self.running.set(None);
    }
}

impl Timers for SimTimers {
    fn every(&self, period_ms: u32, tick: Box<dyn FnMut()>) -> TimerId {
        let period = u64::from(period_ms.max(1));
        self.insert(self.now_ms() + period, Entry::Every { period, tick })
    }

    fn after(&self, delay_ms: u32, callback: Box<dyn FnOnce()>) -> TimerId {
        self.insert(self.now_ms() + u64::from(delay_ms), Entry::Once(callback))
    }

    fn clear(&self, id: TimerId) {
        if self.running.get() == Some(id.0) {
            self.running_cleared.set(true);
            return;
        }
        let removed = {
            let mut queue = self.queue.borrow_mut();
            let key = queue.keys().find(|(_, k)| *k == id.0).copied();
            key.and_then(|k| queue.remove(&k))
        };
        // Dropped outside the borrow: the closure may own handles whose
        // drop clears other timers.
        drop(removed);
    }
}

/// A backend and timers advanced in lockstep.
#[derive(Clone)]
pub struct SimContext {
    pub backend: Rc<SimBackend>,
    pub timers: Rc<SimTimers>,
}

impl Default for SimContext {
    fn default() -> Self {
        Self::new(SIM_SAMPLE_RATE)
    }
}

impl SimContext {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            backend: Rc::new(SimBackend::new(sample_rate)),
            timers: Rc::new(SimTimers::default()),
        }
    }

    pub fn shared_backend(&self) -> SharedBackend {
        self.backend.clone()
    }

    pub fn shared_timers(&self) -> SharedTimers {
        self.timers.clone()
    }

    pub fn engine(&self, config: EngineConfig) -> Engine {
        Engine::new(self.shared_backend(), self.shared_timers(), config)
    }

    /// Advance wall and audio clocks by `ms`, firing timers and `ended`
    /// callbacks in time order.
    pub fn advance(&self, ms: u64) {
        let target = self.timers.now_ms() + ms;
        loop {
            let due = self.timers.next_due().filter(|d| *d <= target);
            self.step_to(due.unwrap_or(target));
            match due {
                Some(_) => self.timers.fire_next(),
                None => break,
            }
        }
    }

    /// Advance and sample `f` after every millisecond.
    pub fn advance_sampling(&self, ms: u64, mut f: impl FnMut(&Self)) {
        for _ in 0..ms {
            self.advance(1);
            f(self);
        }
    }

    fn step_to(&self, to_ms: u64) {
        let from = self.timers.now_ms();
        if to_ms > from {
            self.backend.tick((to_ms - from) as f64 / 1000.0);
            self.timers.now_ms.set(to_ms);
        }
        self.backend.fire_ended();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_ramp_interpolates_geometrically() {
        let mut tl = Timeline::new(1.0);
        tl.post(Automation::SetValueAtTime { value: 1.0, time: 0.0 });
        tl.post(Automation::ExponentialRampToValueAtTime { value: 100.0, time: 2.0 });
        assert!((tl.value_at(1.0) - 10.0).abs() < 1e-3);
        assert_eq!(tl.value_at(5.0), 100.0);
    }

    #[test]
    fn cancel_drops_later_events() {
        let mut tl = Timeline::new(0.5);
        tl.post(Automation::ExponentialRampToValueAtTime { value: 1.0, time: 1.0 });
        tl.post(Automation::CancelScheduledValues { time: 0.5 });
        assert_eq!(tl.value_at(2.0), 0.5);
    }

    #[test]
    fn timers_fire_in_order_and_clear() {
        let sim = SimContext::default();
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = log.clone();
        let id = sim.timers.every(10, Box::new(move || l.borrow_mut().push("tick")));
        let l = log.clone();
        sim.timers.after(15, Box::new(move || l.borrow_mut().push("once")));
        sim.advance(25);
        assert_eq!(*log.borrow(), vec!["tick", "once", "tick"]);
        sim.timers.clear(id);
        sim.advance(50);
        assert_eq!(log.borrow().len(), 3);
    }

    #[test]
    fn suspended_clock_stands_still() {
        let sim = SimContext::default();
        sim.advance(100);
        sim.backend.suspend().unwrap();
        sim.advance(100);
        assert!((sim.backend.current_time() - 0.1).abs() < 1e-9);
        assert_eq!(sim.timers.now_ms(), 200);
    }
}
