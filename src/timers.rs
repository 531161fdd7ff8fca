use fnv::FnvHashMap;
use radio_core::timers::{TimerId, Timers};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys as web;

enum Entry {
    Interval {
        handle: i32,
        // Kept alive for as long as the browser may call it.
        closure: Closure<dyn FnMut()>,
    },
    // Left to fire so its one-shot closure is freed; the flag mutes it.
    Timeout { cancelled: Rc<Cell<bool>> },
}

#[derive(Default)]
struct Registry {
    entries: RefCell<FnvHashMap<TimerId, Entry>>,
    next_id: Cell<u64>,
}

impl Registry {
    fn next(&self) -> TimerId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        TimerId(id)
    }
}

/// `setInterval`/`setTimeout` behind the core `Timers` seam.
#[derive(Clone)]
pub struct WebTimers {
    window: web::Window,
    registry: Rc<Registry>,
}

impl WebTimers {
    pub fn new(window: web::Window) -> Self {
        Self {
            window,
            registry: Rc::default(),
        }
    }

    // A tick may clear its own interval, so the closure is dropped on a later turn.
    fn bury(&self, closure: Closure<dyn FnMut()>) {
        let drop_later = Closure::once_into_js(move || drop(closure));
        if self
            .window
            .set_timeout_with_callback_and_timeout_and_arguments_0(drop_later.unchecked_ref(), 0)
            .is_err()
        {
            log::warn!("[timers] could not defer interval cleanup");
        }
    }
}

impl Timers for WebTimers {
    fn every(&self, period_ms: u32, mut tick: Box<dyn FnMut()>) -> TimerId {
        let id = self.registry.next();
        let closure = Closure::wrap(Box::new(move || tick()) as Box<dyn FnMut()>);
        match self
            .window
            .set_interval_with_callback_and_timeout_and_arguments_0(
                closure.as_ref().unchecked_ref(),
                period_ms as i32,
            ) {
            Ok(handle) => {
                self.registry
                    .entries
                    .borrow_mut()
                    .insert(id, Entry::Interval { handle, closure });
            }
            Err(e) => log::error!("[timers] setInterval failed: {:?}", e),
        }
        id
    }

    fn after(&self, delay_ms: u32, callback: Box<dyn FnOnce()>) -> TimerId {
        let id = self.registry.next();
        let cancelled = Rc::new(Cell::new(false));
        let flag = cancelled.clone();
        let registry: Weak<Registry> = Rc::downgrade(&self.registry);
        let fire = Closure::once_into_js(move || {
            if let Some(registry) = registry.upgrade() {
                registry.entries.borrow_mut().remove(&id);
            }
            if !flag.get() {
                callback();
            }
        });
        match self
            .window
            .set_timeout_with_callback_and_timeout_and_arguments_0(
                fire.unchecked_ref(),
                delay_ms as i32,
            ) {
            Ok(_) => {
                self.registry
                    .entries
                    .borrow_mut()
                    .insert(id, Entry::Timeout { cancelled });
            }
            Err(e) => log::error!("[timers] setTimeout failed: {:?}", e),
        }
        id
    }

    fn clear(&self, id: TimerId) {
        let entry = self.registry.entries.borrow_mut().remove(&id);
        match entry {
            Some(Entry::Interval { handle, closure }) => {
                self.window.clear_interval_with_handle(handle);
                self.bury(closure);
            }
            Some(Entry::Timeout { cancelled }) => cancelled.set(true),
            None => {}
        }
    }
}
