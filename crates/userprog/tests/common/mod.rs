use std::sync::Arc;

use machine::{FileSystem, FlatLoader, Machine, MachineConfig, MemFileSystem, ObjectLoader};
use threads::{Alarm, Scheduler};
use userprog::{KernelConfig, UserKernel};

pub const PAGE_SIZE: usize = 256;

/// Boot a machine plus user kernel backed by an in-memory file store
/// and the flat image loader. The calling test thread becomes the
/// scheduler's main thread.
pub fn boot(num_phys_pages: usize) -> (Arc<Machine>, Arc<Scheduler>, Arc<UserKernel>, Arc<MemFileSystem>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let machine = Arc::new(Machine::new(MachineConfig {
        page_size: PAGE_SIZE,
        num_phys_pages,
        timer_period: 100,
    }));
    let sched = Scheduler::new(&machine);
    sched.adopt_main("main");
    let alarm = Alarm::new(&machine, Arc::clone(&sched));
    let fs = Arc::new(MemFileSystem::new());
    let kernel = UserKernel::new(
        Arc::clone(&machine),
        Arc::clone(&sched),
        alarm,
        KernelConfig::default(),
        Arc::clone(&fs) as Arc<dyn FileSystem>,
        Arc::new(FlatLoader::new(PAGE_SIZE)) as Arc<dyn ObjectLoader>,
    );
    (machine, sched, kernel, fs)
}
