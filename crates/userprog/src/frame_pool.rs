//! Shared physical-frame pool.
//!
//! Allocation is all-or-nothing: a request that cannot be satisfied in
//! full puts every frame it already drew back and reports failure, so a
//! half-loaded process never strands memory. The pool is guarded by a
//! kernel lock because allocators may contend across processes.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use threads::{Lock, Scheduler};

pub struct FramePool {
    lock: Lock,
    free: Mutex<VecDeque<u32>>,
}

impl FramePool {
    pub fn new(sched: Arc<Scheduler>, num_pages: usize) -> Self {
        Self {
            lock: Lock::new(sched),
            free: Mutex::new((0..num_pages as u32).collect()),
        }
    }

    /// Draw `count` frames, or `None` (and no frames) if the pool has
    /// fewer available.
    pub fn allocate(&self, count: usize) -> Option<Vec<u32>> {
        self.lock.acquire();
        let mut got = Vec::with_capacity(count);
        let exhausted = {
            let mut free = self.free.lock().unwrap();
            for _ in 0..count {
                match free.pop_front() {
                    Some(ppn) => got.push(ppn),
                    None => break,
                }
            }
            if got.len() < count {
                for ppn in got.drain(..) {
                    free.push_back(ppn);
                }
                true
            } else {
                false
            }
        };
        self.lock.release();
        if exhausted {
            log::warn!("frame pool exhausted: wanted {count} pages");
            None
        } else {
            Some(got)
        }
    }

    pub fn release(&self, frames: &[u32]) {
        self.lock.acquire();
        let mut free = self.free.lock().unwrap();
        debug_assert!(
            frames.iter().all(|f| !free.contains(f)),
            "double free of a physical frame"
        );
        free.extend(frames.iter().copied());
        drop(free);
        self.lock.release();
    }

    pub fn available(&self) -> usize {
        self.free.lock().unwrap().len()
    }
}
