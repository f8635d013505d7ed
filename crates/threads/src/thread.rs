//! Kernel thread handles.
//!
//! Every `KThread` is backed by a real OS thread, but the scheduler only
//! ever lets one of them run at a time. The handle carries the pieces
//! other subsystems need to reach into a thread: its run status, the
//! one-shot join slot, and the wake deadline the alarm uses to tell a
//! live timer entry from a stale one.

use std::sync::{Arc, Condvar, Mutex};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadStatus {
    New,
    Ready,
    Running,
    Blocked,
    Finished,
}

#[derive(Clone)]
pub struct KThread {
    inner: Arc<Inner>,
}

struct Inner {
    id: u64,
    name: String,
    status: Mutex<ThreadStatus>,
    resumed: Condvar,
    deadline: Mutex<Option<u64>>,
    join: Mutex<JoinState>,
}

struct JoinState {
    finished: bool,
    waiter: Option<KThread>,
}

impl KThread {
    pub(crate) fn new(id: u64, name: &str) -> Self {
        Self {
            inner: Arc::new(Inner {
                id,
                name: name.to_string(),
                status: Mutex::new(ThreadStatus::New),
                resumed: Condvar::new(),
                deadline: Mutex::new(None),
                join: Mutex::new(JoinState {
                    finished: false,
                    waiter: None,
                }),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn status(&self) -> ThreadStatus {
        *self.inner.status.lock().unwrap()
    }

    /// Two handles for the same underlying thread.
    pub fn same_as(&self, other: &KThread) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn set_status(&self, status: ThreadStatus) {
        *self.inner.status.lock().unwrap() = status;
    }

    /// Hand this thread the CPU.
    pub(crate) fn make_running(&self) {
        let mut st = self.inner.status.lock().unwrap();
        *st = ThreadStatus::Running;
        self.inner.resumed.notify_all();
    }

    /// Block the backing OS thread until the scheduler hands the CPU
    /// back with `make_running`.
    pub(crate) fn park_until_running(&self) {
        let mut st = self.inner.status.lock().unwrap();
        while *st != ThreadStatus::Running {
            st = self.inner.resumed.wait(st).unwrap();
        }
    }

    // Wake deadline slot. An alarm queue entry is only honored when the
    // deadline it was filed under is still the one stored here; waking a
    // thread early clears the slot and turns the queue entry stale.

    pub(crate) fn set_deadline(&self, wake_at: u64) {
        *self.inner.deadline.lock().unwrap() = Some(wake_at);
    }

    /// Consume the deadline if it still equals `wake_at`.
    pub(crate) fn take_deadline_if(&self, wake_at: u64) -> bool {
        let mut d = self.inner.deadline.lock().unwrap();
        if *d == Some(wake_at) {
            *d = None;
            true
        } else {
            false
        }
    }

    /// Clear any pending deadline, reporting whether one was set.
    pub(crate) fn clear_deadline(&self) -> bool {
        self.inner.deadline.lock().unwrap().take().is_some()
    }

    /// Record `waiter` as the joiner. Returns `false` when the thread
    /// has already finished and the joiner should not block.
    pub(crate) fn register_joiner(&self, waiter: KThread) -> bool {
        let mut j = self.inner.join.lock().unwrap();
        if j.finished {
            return false;
        }
        assert!(
            j.waiter.is_none(),
            "thread '{}' joined twice",
            self.inner.name
        );
        j.waiter = Some(waiter);
        true
    }

    /// Mark the thread finished and detach its joiner, if any.
    pub(crate) fn note_finished(&self) -> Option<KThread> {
        let mut j = self.inner.join.lock().unwrap();
        j.finished = true;
        j.waiter.take()
    }
}

impl std::fmt::Debug for KThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KThread")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("status", &self.status())
            .finish()
    }
}
