//! Simulated hardware for the teaching kernel: a tick-based interrupt
//! controller and timer, raw physical memory, a byte-addressable file
//! store, a console device, and the executable-image loaders. The kernel
//! crates (`threads`, `userprog`) only ever talk to the seams defined
//! here; nothing in this crate knows about threads or processes.

pub mod config;
pub use config::MachineConfig;

pub mod interrupt;
pub use interrupt::{Interrupt, Timer};

pub mod memory;
pub use memory::PhysMemory;

pub mod fs;
pub use fs::{FileSystem, MemFileSystem, OpenFile};

pub mod console;
pub use console::Console;

pub mod image;
pub use image::{build_flat_image, FlatLoader, ImageError, ObjectFile, ObjectLoader, Section};

pub mod elf;
pub use elf::ElfLoader;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One simulated machine: the hardware bundle handed to the kernel at
/// boot. There is deliberately no global instance; every component is
/// reached through an explicit `Arc<Machine>`.
pub struct Machine {
    pub config: MachineConfig,
    pub interrupt: Arc<Interrupt>,
    pub timer: Timer,
    pub memory: Arc<PhysMemory>,
    pub console: Arc<Console>,
    halted: AtomicBool,
}

impl Machine {
    pub fn new(config: MachineConfig) -> Self {
        let interrupt = Arc::new(Interrupt::new());
        let timer = Timer::new(Arc::clone(&interrupt), config.timer_period);
        let memory = Arc::new(PhysMemory::new(config.page_size, config.num_phys_pages));
        Self {
            config,
            interrupt,
            timer,
            memory,
            console: Arc::new(Console::new()),
            halted: AtomicBool::new(false),
        }
    }

    /// Latch the halted flag. A hosted simulation cannot stop its host
    /// process, so "halt" is a state the embedder observes.
    pub fn halt(&self) {
        log::info!("machine halting at tick {}", self.timer.time());
        self.halted.store(true, Ordering::SeqCst);
    }

    pub fn halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }
}
