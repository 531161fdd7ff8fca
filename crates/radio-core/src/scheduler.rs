//! Lookahead event scheduling.
//!
//! A coarse repeating wall-clock tick discovers which virtual slots fall
//! inside `now + look_ahead` on the audio clock and hands each slot's exact
//! audio time to the callback. Slot times are `start + k * interval`, so a
//! late or jittery tick never shifts, skips or repeats a slot.

use crate::constants::SCHEDULER_MIN_TICK_MS;
use crate::graph::SharedBackend;
use crate::timers::{SharedTimers, TimerId};
use fnv::FnvHashMap;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

#[derive(Clone, Copy, Debug)]
pub struct ScheduleSpec {
    pub label: &'static str,
    pub interval_ms: u32,
    pub look_ahead_sec: f64,
}

impl ScheduleSpec {
    pub const fn new(label: &'static str, interval_ms: u32, look_ahead_sec: f64) -> Self {
        Self {
            label,
            interval_ms,
            look_ahead_sec,
        }
    }

    pub fn tick_period_ms(&self) -> u32 {
        tick_period_ms(self.interval_ms)
    }
}

/// Wall-clock tick period for a given slot interval.
pub fn tick_period_ms(interval_ms: u32) -> u32 {
    (interval_ms / 2).max(SCHEDULER_MIN_TICK_MS)
}

/// Slot bookkeeping, independent of any timer.
#[derive(Clone, Debug)]
pub struct LookaheadCursor {
    start: f64,
    step: f64,
    index: u64,
}

impl LookaheadCursor {
    pub fn new(start: f64, interval_ms: u32) -> Self {
        Self {
            start,
            step: interval_ms.max(1) as f64 / 1000.0,
            index: 0,
        }
    }

    pub fn next_time(&self) -> f64 {
        self.start + self.index as f64 * self.step
    }

    /// Fire every pending slot earlier than `now + look_ahead`; returns how many fired.
    pub fn advance(&mut self, now: f64, look_ahead: f64, mut fire: impl FnMut(f64)) -> usize {
        let horizon = now + look_ahead;
        let mut fired = 0;
        while self.next_time() < horizon {
            fire(self.next_time());
            self.index += 1;
            fired += 1;
        }
        fired
    }
}

#[derive(Default)]
struct Registry {
    next_id: Cell<u64>,
    active: RefCell<FnvHashMap<u64, &'static str>>,
}

#[derive(Clone)]
pub struct EventScheduler {
    backend: SharedBackend,
    timers: SharedTimers,
    registry: Rc<Registry>,
}

impl EventScheduler {
    pub fn new(backend: SharedBackend, timers: SharedTimers) -> Self {
        Self {
            backend,
            timers,
            registry: Rc::new(Registry::default()),
        }
    }

    /// Start a recurring lookahead schedule. The first pass runs before this
    /// returns, so there is no initial silent gap.
    pub fn schedule<F>(&self, spec: ScheduleSpec, mut on_fire: F) -> ScheduleHandle
    where
        F: FnMut(f64) + 'static,
    {
        let id = self.registry.next_id.get();
        self.registry.next_id.set(id + 1);
        self.registry.active.borrow_mut().insert(id, spec.label);

        let cancelled = Rc::new(Cell::new(false));
        let mut cursor = LookaheadCursor::new(self.backend.current_time(), spec.interval_ms);
        let backend = self.backend.clone();
        let flag = cancelled.clone();
        let mut tick = move || {
            if flag.get() {
                return;
            }
            let now = backend.current_time();
            cursor.advance(now, spec.look_ahead_sec, &mut on_fire);
        };
        tick();
        let timer = self.timers.every(spec.tick_period_ms(), Box::new(tick));
        log::debug!(
            "[sched] {} every {}ms (tick {}ms, lookahead {:.2}s)",
            spec.label,
            spec.interval_ms,
            spec.tick_period_ms(),
            spec.look_ahead_sec
        );

        ScheduleHandle {
            id,
            label: spec.label,
            timer: Some(timer),
            cancelled,
            timers: self.timers.clone(),
            registry: self.registry.clone(),
        }
    }

    pub fn active_labels(&self) -> Vec<&'static str> {
        let mut labels: Vec<_> = self.registry.active.borrow().values().copied().collect();
        labels.sort_unstable();
        labels
    }

    pub fn is_active(&self, label: &str) -> bool {
        self.registry.active.borrow().values().any(|l| *l == label)
    }

    pub fn active_count(&self) -> usize {
        self.registry.active.borrow().len()
    }
}

/// Cancellation token for one schedule. Dropping it cancels too, so a
/// schedule can never outlive the preset that owns its handle.
pub struct ScheduleHandle {
    id: u64,
    label: &'static str,
    timer: Option<TimerId>,
    cancelled: Rc<Cell<bool>>,
    timers: SharedTimers,
    registry: Rc<Registry>,
}

impl ScheduleHandle {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }

    /// Stops future ticks. Automation already posted stays committed.
    pub fn cancel(&mut self) {
        self.cancelled.set(true);
        if let Some(timer) = self.timer.take() {
            self.timers.clear(timer);
            self.registry.active.borrow_mut().remove(&self.id);
            log::debug!("[sched] {} cancelled", self.label);
        }
    }
}

impl Drop for ScheduleHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_period_has_floor() {
        assert_eq!(tick_period_ms(140), 70);
        assert_eq!(tick_period_ms(30), 25);
        assert_eq!(tick_period_ms(2100), 1050);
    }

    #[test]
    fn cursor_fires_contiguous_slots_once() {
        let mut c = LookaheadCursor::new(1.0, 250);
        let mut seen = Vec::new();
        c.advance(1.0, 0.6, |t| seen.push(t));
        assert_eq!(seen, vec![1.0, 1.25, 1.5]);
        // Same horizon again: nothing new.
        assert_eq!(c.advance(1.0, 0.6, |t| seen.push(t)), 0);
        // A late tick catches up without skipping.
        c.advance(2.3, 0.6, |t| seen.push(t));
        assert_eq!(seen, vec![1.0, 1.25, 1.5, 1.75, 2.0, 2.25, 2.5, 2.75]);
    }

    #[test]
    fn zero_interval_does_not_spin() {
        let mut c = LookaheadCursor::new(0.0, 0);
        let n = c.advance(0.0, 0.01, |_| {});
        assert_eq!(n, 10);
    }
}
