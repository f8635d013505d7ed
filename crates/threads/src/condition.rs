//! Condition variables built on interrupt-disable atomicity.
//!
//! Every operation requires the associated lock to be held. `sleep_for`
//! parks the waiter through the alarm as well as the wait queue, and a
//! wakeup from either side invalidates the other: `wake` cancels the
//! pending alarm, and a timeout removes the waiter's queue entry when
//! it resumes.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::alarm::Alarm;
use crate::lock::Lock;
use crate::scheduler::Scheduler;
use crate::thread::{KThread, ThreadStatus};

pub struct Condition {
    lock: Arc<Lock>,
    alarm: Arc<Alarm>,
    waiters: Mutex<VecDeque<KThread>>,
}

impl Condition {
    pub fn new(lock: Arc<Lock>, alarm: Arc<Alarm>) -> Self {
        Self {
            lock,
            alarm,
            waiters: Mutex::new(VecDeque::new()),
        }
    }

    fn sched(&self) -> &Arc<Scheduler> {
        self.lock.scheduler()
    }

    /// Release the lock and sleep until another thread calls `wake` or
    /// `wake_all`. The lock is re-held on return.
    pub fn sleep(&self) {
        assert!(self.lock.held_by_current(), "condition used without its lock");
        let sched = Arc::clone(self.sched());
        let old = sched.interrupt().disable();
        self.waiters.lock().unwrap().push_back(sched.current());
        self.lock.release();
        sched.sleep_current();
        self.lock.acquire();
        sched.interrupt().restore(old);
    }

    /// Like `sleep`, but give up after `timeout` ticks if nobody wakes
    /// us first.
    pub fn sleep_for(&self, timeout: i64) {
        assert!(self.lock.held_by_current(), "condition used without its lock");
        let sched = Arc::clone(self.sched());
        let old = sched.interrupt().disable();
        let current = sched.current();
        self.waiters.lock().unwrap().push_back(current.clone());
        self.lock.release();
        self.alarm.wait_until(timeout);
        // on timeout we are still queued; a wake would have removed the
        // deadline and popped us, so take the entry out ourselves
        {
            let mut waiters = self.waiters.lock().unwrap();
            if let Some(i) = waiters.iter().position(|t| t.same_as(&current)) {
                waiters.remove(i);
            }
        }
        self.lock.acquire();
        sched.interrupt().restore(old);
    }

    /// Wake the oldest waiter still asleep, cancelling its timeout if it
    /// slept with one.
    pub fn wake(&self) {
        assert!(self.lock.held_by_current(), "condition used without its lock");
        let sched = self.sched();
        let old = sched.interrupt().disable();
        while let Some(thread) = self.waiters.lock().unwrap().pop_front() {
            // a timed-out waiter may linger in the queue until it runs;
            // it is already awake, so pass it over
            if thread.status() != ThreadStatus::Blocked {
                continue;
            }
            self.alarm.cancel(&thread);
            sched.ready(thread);
            break;
        }
        sched.interrupt().restore(old);
    }

    /// Wake every waiter.
    pub fn wake_all(&self) {
        assert!(self.lock.held_by_current(), "condition used without its lock");
        let sched = self.sched();
        let old = sched.interrupt().disable();
        let drained: Vec<KThread> = self.waiters.lock().unwrap().drain(..).collect();
        for thread in drained {
            if thread.status() != ThreadStatus::Blocked {
                continue;
            }
            self.alarm.cancel(&thread);
            sched.ready(thread);
        }
        sched.interrupt().restore(old);
    }
}
