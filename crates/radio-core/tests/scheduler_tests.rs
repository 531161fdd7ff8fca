// Host-side tests for lookahead scheduling and gain-ramp primitives.

use proptest::prelude::*;
use radio_core::constants::GAIN_FLOOR;
use radio_core::graph::{glide, AudioBackend, NodeSpec};
use radio_core::sim::SimContext;
use radio_core::{EventScheduler, ScheduleSpec};
use std::cell::RefCell;
use std::rc::Rc;

const TEST: ScheduleSpec = ScheduleSpec::new("test", 100, 0.3);

fn recording(sim: &SimContext) -> (EventScheduler, Rc<RefCell<Vec<f64>>>) {
    (
        EventScheduler::new(sim.shared_backend(), sim.shared_timers()),
        Rc::default(),
    )
}

fn assert_contiguous(slots: &[f64], step: f64) {
    for (k, t) in slots.iter().enumerate() {
        assert!((t - k as f64 * step).abs() < 1e-9, "slot {k} at {t}");
    }
}

#[test]
fn first_pass_runs_immediately() {
    let sim = SimContext::default();
    let (sched, seen) = recording(&sim);
    let s = seen.clone();
    let _handle = sched.schedule(TEST, move |t| s.borrow_mut().push(t));
    assert_eq!(seen.borrow().len(), 3);
    assert_contiguous(&seen.borrow(), 0.1);
}

#[test]
fn slots_never_skip_or_repeat() {
    let sim = SimContext::default();
    let (sched, seen) = recording(&sim);
    let s = seen.clone();
    let _handle = sched.schedule(TEST, move |t| s.borrow_mut().push(t));

    sim.advance(1000);
    let slots = seen.borrow();
    assert_contiguous(&slots, 0.1);
    // Everything up to now + lookahead is already scheduled.
    assert!(*slots.last().unwrap() >= 1.3 - 0.1 - 1e-9);
}

#[test]
fn cancel_and_drop_stop_future_slots() {
    let sim = SimContext::default();
    let (sched, seen) = recording(&sim);
    let s = seen.clone();
    let mut handle = sched.schedule(TEST, move |t| s.borrow_mut().push(t));
    assert!(sched.is_active("test"));
    sim.advance(200);
    handle.cancel();
    handle.cancel();
    assert!(handle.is_cancelled());
    assert!(!sched.is_active("test"));
    let fired = seen.borrow().len();
    sim.advance(1000);
    assert_eq!(seen.borrow().len(), fired);

    let s = seen.clone();
    let dropped = sched.schedule(TEST, move |t| s.borrow_mut().push(t));
    assert_eq!(sched.active_labels(), vec!["test"]);
    drop(dropped);
    assert_eq!(sched.active_count(), 0);
    assert_eq!(sim.timers.pending(), 0);
}

#[test]
fn suspended_clock_schedules_nothing_new() {
    let sim = SimContext::default();
    let (sched, seen) = recording(&sim);
    let s = seen.clone();
    let _handle = sched.schedule(TEST, move |t| s.borrow_mut().push(t));
    sim.advance(500);
    let fired = seen.borrow().len();
    sim.backend.suspend().unwrap();
    sim.advance(2000);
    assert_eq!(seen.borrow().len(), fired);
    sim.backend.resume().unwrap();
    sim.advance(500);
    assert_contiguous(&seen.borrow(), 0.1);
}

proptest! {
    #[test]
    fn glide_never_targets_zero(target in -1.0f32..1.0, seconds in 0.001f64..2.0) {
        let sim = SimContext::default();
        let b = sim.backend.clone();
        let node = b.create(NodeSpec::Gain { value: 0.5 }, "probe").unwrap();
        prop_assert!(glide(&*b, node.gain(), target, seconds).is_ok());
        let targets = b.exp_targets();
        prop_assert_eq!(targets.len(), 1);
        prop_assert!(targets[0] >= GAIN_FLOOR);
        prop_assert!(targets[0] >= target);
    }
}
