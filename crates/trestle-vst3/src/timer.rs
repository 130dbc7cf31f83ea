//! Run-loop timer adapter.
//!
//! Hosts on Linux expose a run loop (queried from IPlugFrame) instead of
//! driving idle from a toolkit. The view registers an [`IdleTimer`] there at
//! roughly 60 Hz to pump the bridge and the editor.

use std::cell::Cell;
use std::rc::Rc;

use vst3::Class;
use vst3::Steinberg::Linux::{ITimerHandler, ITimerHandlerTrait};

use crate::view::BridgeView;

/// Timer interval in milliseconds (~60 Hz).
pub(crate) const IDLE_INTERVAL_MS: u64 = 16;

/// ITimerHandler registered with the host run loop.
///
/// Holds a raw back-pointer into the view that registered it. The shared
/// `valid` flag is cleared by the view on teardown, so a host that keeps
/// the handler alive past unregisterTimer fires into a guard instead of a
/// dangling view.
pub(crate) struct IdleTimer {
    view: *const BridgeView,
    valid: Rc<Cell<bool>>,
}

impl IdleTimer {
    pub fn new(view: *const BridgeView, valid: Rc<Cell<bool>>) -> Self {
        Self { view, valid }
    }
}

// SAFETY: the host run loop fires timers on the UI thread that registered
// them; the handler is never touched from any other thread.
unsafe impl Send for IdleTimer {}
// SAFETY: see Send impl above.
unsafe impl Sync for IdleTimer {}

impl Class for IdleTimer {
    type Interfaces = (ITimerHandler,);
}

#[allow(non_snake_case)]
impl ITimerHandlerTrait for IdleTimer {
    unsafe fn onTimer(&self) {
        if !self.valid.get() {
            log::warn!("vst3: timer fired after teardown, host leaked the handler");
            return;
        }
        // SAFETY: while valid is set, the registering view is alive and
        // this runs on its UI thread.
        unsafe { (*self.view).on_idle_timer() };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalidated_timer_does_not_touch_the_view() {
        let valid = Rc::new(Cell::new(false));
        let timer = IdleTimer::new(std::ptr::null(), valid);
        // SAFETY: the validity guard must return before the view pointer
        // is dereferenced.
        unsafe { ITimerHandlerTrait::onTimer(&timer) };
    }
}
