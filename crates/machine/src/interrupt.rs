//! Simulated interrupt controller and timer device.
//!
//! Time is a tick counter, not wall-clock time: every re-enable of
//! interrupts advances it by one tick, which keeps the whole machine
//! deterministic. The single device is the periodic timer; its handler
//! runs with interrupts disabled and may request a yield, which the
//! controller forwards to the installed yield hook once the handler has
//! returned (and only when fired from running code, never from the idle
//! loop).

use std::sync::Mutex;

type Handler = std::sync::Arc<dyn Fn() + Send + Sync>;

struct TimerDevice {
    period: u64,
    next_fire: u64,
    handler: Handler,
}

struct InterruptState {
    ticks: u64,
    enabled: bool,
    in_handler: bool,
    yield_on_return: bool,
    timer: Option<TimerDevice>,
    yield_hook: Option<Handler>,
}

pub struct Interrupt {
    state: Mutex<InterruptState>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(InterruptState {
                ticks: 0,
                enabled: true,
                in_handler: false,
                yield_on_return: false,
                timer: None,
                yield_hook: None,
            }),
        }
    }

    /// Current simulated time in ticks.
    pub fn time(&self) -> u64 {
        self.state.lock().unwrap().ticks
    }

    /// Disable interrupts, returning the previous state so callers can
    /// nest critical sections with `restore`.
    pub fn disable(&self) -> bool {
        let mut st = self.state.lock().unwrap();
        let old = st.enabled;
        st.enabled = false;
        old
    }

    /// Restore the interrupt state saved by a matching `disable`. A
    /// restore to "enabled" advances time and may fire the timer.
    pub fn restore(&self, old: bool) {
        if old {
            self.enable();
        }
    }

    /// Enable interrupts, advance the clock one tick and fire the timer
    /// if it has come due.
    pub fn enable(&self) {
        let fired = {
            let mut st = self.state.lock().unwrap();
            st.enabled = true;
            st.ticks += 1;
            self.arm_due_handler(&mut st)
        };
        if let Some(handler) = fired {
            handler();
            self.finish_handler(true);
        }
    }

    /// Mark the due timer as taken and return its handler, leaving the
    /// controller in the "handler running" state. Must be called with
    /// the state lock held.
    fn arm_due_handler(&self, st: &mut InterruptState) -> Option<Handler> {
        if st.in_handler {
            return None;
        }
        let due = match &mut st.timer {
            Some(t) if t.next_fire <= st.ticks => {
                while t.next_fire <= st.ticks {
                    t.next_fire += t.period;
                }
                Some(std::sync::Arc::clone(&t.handler))
            }
            _ => None,
        };
        if due.is_some() {
            st.in_handler = true;
            st.enabled = false;
        }
        due
    }

    /// Leave the "handler running" state. When `honor_yield` is set and
    /// the handler requested a yield, invoke the yield hook; the idle
    /// loop passes `false` because there is no running thread to yield.
    fn finish_handler(&self, honor_yield: bool) {
        let hook = {
            let mut st = self.state.lock().unwrap();
            st.in_handler = false;
            st.enabled = true;
            let wanted = std::mem::replace(&mut st.yield_on_return, false);
            if wanted && honor_yield {
                st.yield_hook.clone()
            } else {
                None
            }
        };
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Called from within an interrupt handler to ask for the running
    /// thread to yield once the handler returns.
    pub fn request_yield(&self) {
        self.state.lock().unwrap().yield_on_return = true;
    }

    /// Advance time directly to the next timer firing and run the
    /// handler. Used by the scheduler when no thread is ready: the
    /// machine has nothing to do but wait for the clock. Idling with no
    /// timer installed means nothing can ever wake a thread again.
    pub fn idle(&self) {
        let handler = {
            let mut guard = self.state.lock().unwrap();
            let st = &mut *guard;
            match &mut st.timer {
                Some(t) => {
                    debug_assert!(!st.in_handler, "idle during interrupt handler");
                    if t.next_fire > st.ticks {
                        st.ticks = t.next_fire;
                    } else {
                        st.ticks += 1;
                    }
                    while t.next_fire <= st.ticks {
                        t.next_fire += t.period;
                    }
                    let h = std::sync::Arc::clone(&t.handler);
                    st.in_handler = true;
                    st.enabled = false;
                    h
                }
                None => panic!("no threads ready and no pending interrupts: machine deadlocked"),
            }
        };
        handler();
        self.finish_handler(false);
        // interrupts stay logically disabled for the idling caller
        self.state.lock().unwrap().enabled = false;
    }

    /// Install the hook invoked when a handler requests a yield.
    pub fn set_yield_hook(&self, hook: Box<dyn Fn() + Send + Sync>) {
        self.state.lock().unwrap().yield_hook = Some(hook.into());
    }

    fn install_timer(&self, period: u64, handler: Box<dyn Fn() + Send + Sync>) {
        assert!(period > 0, "timer period must be positive");
        let mut st = self.state.lock().unwrap();
        st.timer = Some(TimerDevice {
            period,
            next_fire: st.ticks + period,
            handler: handler.into(),
        });
    }
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

/// The hardware timer as the kernel sees it: a clock plus one periodic
/// interrupt line.
pub struct Timer {
    interrupt: std::sync::Arc<Interrupt>,
    period: u64,
}

impl Timer {
    pub fn new(interrupt: std::sync::Arc<Interrupt>, period: u64) -> Self {
        Self { interrupt, period }
    }

    pub fn time(&self) -> u64 {
        self.interrupt.time()
    }

    pub fn period(&self) -> u64 {
        self.period
    }

    /// Install `handler` to run every `period()` ticks. The machine will
    /// not function correctly with more than one timer client.
    pub fn set_interrupt_handler(&self, handler: Box<dyn Fn() + Send + Sync>) {
        self.interrupt.install_timer(self.period, handler);
    }
}
