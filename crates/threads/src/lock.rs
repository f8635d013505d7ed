//! Sleeping mutual-exclusion lock with direct handoff.
//!
//! `release` does not simply mark the lock free: when waiters are
//! queued, ownership transfers straight to the oldest one, so a late
//! arrival can never barge in ahead of threads already asleep.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::scheduler::Scheduler;
use crate::thread::KThread;

pub struct Lock {
    sched: Arc<Scheduler>,
    state: Mutex<LockState>,
}

struct LockState {
    holder: Option<KThread>,
    queue: VecDeque<KThread>,
}

impl Lock {
    pub fn new(sched: Arc<Scheduler>) -> Self {
        Self {
            sched,
            state: Mutex::new(LockState {
                holder: None,
                queue: VecDeque::new(),
            }),
        }
    }

    pub(crate) fn scheduler(&self) -> &Arc<Scheduler> {
        &self.sched
    }

    /// Acquire the lock, sleeping until it is handed over. Re-acquiring
    /// a lock the caller already holds is a kernel bug and panics.
    pub fn acquire(&self) {
        let old = self.sched.interrupt().disable();
        let current = self.sched.current();
        let must_wait = {
            let mut st = self.state.lock().unwrap();
            match &st.holder {
                None => {
                    st.holder = Some(current.clone());
                    false
                }
                Some(h) => {
                    assert!(
                        !h.same_as(&current),
                        "thread '{}' acquired a lock it already holds",
                        current.name()
                    );
                    st.queue.push_back(current.clone());
                    true
                }
            }
        };
        if must_wait {
            // the releaser installs us as holder before waking us
            self.sched.sleep_current();
            debug_assert!(self.held_by_current());
        }
        self.sched.interrupt().restore(old);
    }

    /// Release the lock, handing it to the oldest waiter if any.
    pub fn release(&self) {
        let old = self.sched.interrupt().disable();
        let next = {
            let mut st = self.state.lock().unwrap();
            let holder = st.holder.take().expect("release of a lock nobody holds");
            assert!(
                holder.same_as(&self.sched.current()),
                "lock released by a thread that does not hold it"
            );
            if let Some(next) = st.queue.pop_front() {
                st.holder = Some(next.clone());
                Some(next)
            } else {
                None
            }
        };
        if let Some(next) = next {
            self.sched.ready(next);
        }
        self.sched.interrupt().restore(old);
    }

    pub fn held_by_current(&self) -> bool {
        let st = self.state.lock().unwrap();
        match &st.holder {
            Some(h) => h.same_as(&self.sched.current()),
            None => false,
        }
    }
}
