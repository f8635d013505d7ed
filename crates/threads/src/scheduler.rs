//! Round-robin scheduler over parked OS threads.
//!
//! The simulation trick: every kernel thread is a real `std::thread`,
//! but all of them except one sit parked on their own condvar. Handing
//! the CPU over means marking the next thread `Running`, waking it, and
//! parking ourselves. Context switches only happen with interrupts
//! disabled; each thread restores its own saved interrupt state after
//! it resumes.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use machine::{Interrupt, Machine};

use crate::thread::{KThread, ThreadStatus};

pub struct Scheduler {
    interrupt: Arc<Interrupt>,
    ready: Mutex<VecDeque<KThread>>,
    current: Mutex<Option<KThread>>,
    next_id: AtomicU64,
}

impl Scheduler {
    /// Build a scheduler for `machine` and wire it up as the target of
    /// timer-requested yields.
    pub fn new(machine: &Machine) -> Arc<Self> {
        let sched = Arc::new(Self {
            interrupt: Arc::clone(&machine.interrupt),
            ready: Mutex::new(VecDeque::new()),
            current: Mutex::new(None),
            next_id: AtomicU64::new(0),
        });
        let weak: Weak<Scheduler> = Arc::downgrade(&sched);
        machine.interrupt.set_yield_hook(Box::new(move || {
            if let Some(s) = weak.upgrade() {
                s.yield_now();
            }
        }));
        sched
    }

    pub fn interrupt(&self) -> &Arc<Interrupt> {
        &self.interrupt
    }

    /// Register the calling OS thread as the first kernel thread. Must
    /// run before any fork; the caller becomes the running thread.
    pub fn adopt_main(&self, name: &str) -> KThread {
        let thread = KThread::new(self.next_id.fetch_add(1, Ordering::SeqCst), name);
        thread.set_status(ThreadStatus::Running);
        let mut current = self.current.lock().unwrap();
        assert!(current.is_none(), "main thread adopted twice");
        *current = Some(thread.clone());
        thread
    }

    /// Create a new kernel thread running `f` and put it on the ready
    /// queue. The thread does not run until the scheduler picks it.
    pub fn fork(
        self: &Arc<Self>,
        name: &str,
        f: impl FnOnce() + Send + 'static,
    ) -> KThread {
        let thread = KThread::new(self.next_id.fetch_add(1, Ordering::SeqCst), name);
        log::debug!("forking thread '{}' (id {})", name, thread.id());

        let sched = Arc::clone(self);
        let handle = thread.clone();
        std::thread::spawn(move || {
            handle.park_until_running();
            // a fresh thread begins its life with interrupts on
            sched.interrupt.enable();
            if let Err(err) = catch_unwind(AssertUnwindSafe(f)) {
                let msg = err
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| err.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic".to_string());
                log::error!("thread '{}' panicked: {}", handle.name(), msg);
            }
            sched.finish_current();
        });

        let old = self.interrupt.disable();
        thread.set_status(ThreadStatus::Ready);
        self.ready.lock().unwrap().push_back(thread.clone());
        self.interrupt.restore(old);
        thread
    }

    /// The thread holding the CPU right now.
    pub fn current(&self) -> KThread {
        self.current
            .lock()
            .unwrap()
            .clone()
            .expect("no current thread: scheduler not booted")
    }

    /// Move a blocked (or brand new) thread to the ready queue.
    pub fn ready(&self, thread: KThread) {
        let old = self.interrupt.disable();
        debug_assert_ne!(thread.status(), ThreadStatus::Running);
        thread.set_status(ThreadStatus::Ready);
        self.ready.lock().unwrap().push_back(thread);
        self.interrupt.restore(old);
    }

    /// Give up the CPU but stay runnable.
    pub fn yield_now(&self) {
        let old = self.interrupt.disable();
        self.reschedule(ThreadStatus::Ready);
        self.interrupt.restore(old);
    }

    /// Block the current thread. Must be called with interrupts
    /// disabled, after arranging for someone to `ready` it again.
    pub fn sleep_current(&self) {
        self.reschedule(ThreadStatus::Blocked);
    }

    /// Wait for `target` to finish. Returns immediately if it already
    /// has; a thread may be joined at most once.
    pub fn join(&self, target: &KThread) {
        let current = self.current();
        assert!(!target.same_as(&current), "thread cannot join itself");
        let old = self.interrupt.disable();
        if target.register_joiner(current) {
            self.sleep_current();
        }
        self.interrupt.restore(old);
    }

    /// Terminate the current thread: wake its joiner, hand the CPU to
    /// the next ready thread and never return to the caller's logic.
    /// The backing OS thread exits when its closure returns.
    pub fn finish_current(&self) {
        self.interrupt.disable();
        let current = self.current();
        log::debug!("thread '{}' finished", current.name());
        if let Some(waiter) = current.note_finished() {
            self.ready(waiter);
        }
        current.set_status(ThreadStatus::Finished);
        let next = self.pick_next();
        *self.current.lock().unwrap() = Some(next.clone());
        next.make_running();
        // interrupts stay disabled; this OS thread is about to exit
    }

    /// Park the current thread with `next_status` and run the next one.
    fn reschedule(&self, next_status: ThreadStatus) {
        let current = self.current();
        current.set_status(next_status);
        if next_status == ThreadStatus::Ready {
            self.ready.lock().unwrap().push_back(current.clone());
        }

        let next = self.pick_next();
        if next.same_as(&current) {
            // only runnable thread; nothing to switch to
            current.set_status(ThreadStatus::Running);
            return;
        }
        log::trace!("switching '{}' -> '{}'", current.name(), next.name());
        *self.current.lock().unwrap() = Some(next.clone());
        next.make_running();
        current.park_until_running();
    }

    /// Pop the next ready thread, idling the machine until the timer
    /// readies one if the queue is empty.
    fn pick_next(&self) -> KThread {
        loop {
            if let Some(next) = self.ready.lock().unwrap().pop_front() {
                return next;
            }
            self.interrupt.idle();
        }
    }
}
