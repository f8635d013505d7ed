//! Kernel-side process bookkeeping.
//!
//! There is no global kernel state: every counter and pool lives on one
//! `UserKernel` instance that processes reach through an `Arc`. The
//! kernel owns the frame pool, the file store and loader seams, the
//! table of registered user programs, and the pid / active-process
//! counters whose zero crossing halts the machine.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use machine::{FileSystem, Machine, ObjectLoader};
use threads::{Alarm, Lock, Scheduler};

use crate::frame_pool::FramePool;
use crate::process::{LoadError, UserProcess};
use crate::program::UserProgram;

pub struct KernelConfig {
    pub stack_pages: usize,
    pub max_open_files: usize,
    pub max_arg_len: usize,
    pub exec_suffix: String,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            stack_pages: 8,
            max_open_files: 16,
            max_arg_len: 256,
            exec_suffix: ".img".to_string(),
        }
    }
}

pub struct UserKernel {
    pub machine: Arc<Machine>,
    pub sched: Arc<Scheduler>,
    pub alarm: Arc<Alarm>,
    pub config: KernelConfig,
    frames: FramePool,
    fs: Arc<dyn FileSystem>,
    loader: Arc<dyn ObjectLoader>,
    programs: Mutex<HashMap<String, Arc<dyn UserProgram>>>,
    // pid and active-process counters share one blocking lock, like
    // the frame pool
    counter_lock: Lock,
    counters: Mutex<Counters>,
}

struct Counters {
    next_pid: u32,
    active: u32,
}

impl UserKernel {
    pub fn new(
        machine: Arc<Machine>,
        sched: Arc<Scheduler>,
        alarm: Arc<Alarm>,
        config: KernelConfig,
        fs: Arc<dyn FileSystem>,
        loader: Arc<dyn ObjectLoader>,
    ) -> Arc<Self> {
        let frames = FramePool::new(Arc::clone(&sched), machine.memory.num_pages());
        let counter_lock = Lock::new(Arc::clone(&sched));
        Arc::new(Self {
            machine,
            sched,
            alarm,
            config,
            frames,
            fs,
            loader,
            programs: Mutex::new(HashMap::new()),
            counter_lock,
            counters: Mutex::new(Counters {
                next_pid: 0,
                active: 0,
            }),
        })
    }

    pub fn frames(&self) -> &FramePool {
        &self.frames
    }

    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    pub(crate) fn loader(&self) -> &Arc<dyn ObjectLoader> {
        &self.loader
    }

    /// Register the kernel-side body run for executables named `name`.
    /// Loading `name` stages its image into user memory; the registered
    /// body is what then executes against that memory via syscalls.
    pub fn register_program(&self, name: &str, program: Arc<dyn UserProgram>) {
        self.programs
            .lock()
            .unwrap()
            .insert(name.to_string(), program);
    }

    pub(crate) fn program(&self, name: &str) -> Option<Arc<dyn UserProgram>> {
        self.programs.lock().unwrap().get(name).cloned()
    }

    /// Assign a pid and count the process as active. The first process
    /// registered (pid 0) is the bootstrap process, the only one whose
    /// halt syscall works.
    pub(crate) fn register_process(&self) -> u32 {
        self.counter_lock.acquire();
        let pid = {
            let mut c = self.counters.lock().unwrap();
            let pid = c.next_pid;
            c.next_pid += 1;
            c.active += 1;
            pid
        };
        self.counter_lock.release();
        pid
    }

    /// Drop one process from the active count; `true` means it was the
    /// last one and the machine should halt.
    pub(crate) fn process_exited(&self) -> bool {
        self.counter_lock.acquire();
        let last = {
            let mut c = self.counters.lock().unwrap();
            c.active -= 1;
            c.active == 0
        };
        self.counter_lock.release();
        last
    }

    pub(crate) fn halt_machine(&self) {
        self.machine.halt();
    }

    /// Boot entry: create the bootstrap process, load `name` and start
    /// it running.
    pub fn run_program(
        self: &Arc<Self>,
        name: &str,
        args: &[&str],
    ) -> Result<Arc<UserProcess>, LoadError> {
        let process = UserProcess::new(self);
        if let Err(err) = process.load(name, args) {
            // the boot process never ran; a zero active count halts the
            // machine exactly as a normal last exit would
            if self.process_exited() {
                self.halt_machine();
            }
            return Err(err);
        }
        log::info!("booting '{name}' as pid {}", process.pid());
        process.execute();
        Ok(process)
    }
}
