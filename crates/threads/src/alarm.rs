//! Timer-driven wakeups.
//!
//! Sleepers sit in a min-heap keyed by wake tick. The timer handler
//! pops every due entry and readies its thread, but only after checking
//! that the thread's deadline slot still names that entry: a thread
//! woken early by `cancel` leaves a stale heap entry behind, and the
//! deadline check is what makes the handler skip it.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use machine::Machine;

use crate::scheduler::Scheduler;
use crate::thread::KThread;

pub struct Alarm {
    sched: Arc<Scheduler>,
    queue: Mutex<BinaryHeap<Reverse<Waiter>>>,
    seq: AtomicU64,
}

struct Waiter {
    wake_at: u64,
    seq: u64,
    thread: KThread,
}

// Heap order is (wake_at, seq); seq breaks ties in arrival order.
impl Ord for Waiter {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.wake_at, self.seq).cmp(&(other.wake_at, other.seq))
    }
}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.wake_at == other.wake_at && self.seq == other.seq
    }
}

impl Eq for Waiter {}

impl Alarm {
    /// Build the alarm and install it as the machine's timer handler.
    /// There must be at most one alarm per machine.
    pub fn new(machine: &Machine, sched: Arc<Scheduler>) -> Arc<Self> {
        let alarm = Arc::new(Self {
            sched,
            queue: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
        });
        let weak: Weak<Alarm> = Arc::downgrade(&alarm);
        machine.timer.set_interrupt_handler(Box::new(move || {
            if let Some(a) = weak.upgrade() {
                a.on_tick();
            }
        }));
        alarm
    }

    /// Block the current thread for at least `ticks` ticks. A zero or
    /// negative wait returns immediately without yielding.
    pub fn wait_until(&self, ticks: i64) {
        if ticks <= 0 {
            return;
        }
        let interrupt = self.sched.interrupt();
        let old = interrupt.disable();
        let wake_at = interrupt.time() + ticks as u64;
        let current = self.sched.current();
        current.set_deadline(wake_at);
        self.queue.lock().unwrap().push(Reverse(Waiter {
            wake_at,
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            thread: current,
        }));
        log::trace!("alarm: sleep until tick {wake_at}");
        self.sched.sleep_current();
        interrupt.restore(old);
    }

    /// Clear `thread`'s pending wakeup so the timer handler will ignore
    /// its heap entry. Returns whether a wakeup was pending; the caller
    /// is responsible for readying the thread itself.
    pub fn cancel(&self, thread: &KThread) -> bool {
        thread.clear_deadline()
    }

    /// Timer handler: ready every due sleeper whose deadline is still
    /// live, then ask for a preemptive yield.
    fn on_tick(&self) {
        let now = self.sched.interrupt().time();
        let mut due = Vec::new();
        {
            let mut queue = self.queue.lock().unwrap();
            while let Some(Reverse(top)) = queue.peek() {
                if top.wake_at > now {
                    break;
                }
                due.push(queue.pop().unwrap().0);
            }
        }
        for waiter in due {
            if waiter.thread.take_deadline_if(waiter.wake_at) {
                log::trace!("alarm: waking '{}' at tick {now}", waiter.thread.name());
                self.sched.ready(waiter.thread);
            }
        }
        self.sched.interrupt().request_yield();
    }
}
