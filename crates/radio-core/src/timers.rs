//! Coarse wall-clock timers.
//!
//! Timers only decide *when to look ahead*; nothing is ever timestamped with
//! wall-clock time. In the browser this is `setInterval`/`setTimeout`.

use std::rc::Rc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

pub trait Timers {
    /// Call `tick` every `period_ms` until cleared.
    fn every(&self, period_ms: u32, tick: Box<dyn FnMut()>) -> TimerId;
    /// Call `callback` once after `delay_ms` unless cleared first.
    fn after(&self, delay_ms: u32, callback: Box<dyn FnOnce()>) -> TimerId;
    /// Clearing an unknown or already fired timer is a no-op.
    fn clear(&self, id: TimerId);
}

pub type SharedTimers = Rc<dyn Timers>;
