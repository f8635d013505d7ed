use std::sync::Arc;

use machine::{Machine, MachineConfig};
use threads::{Alarm, Scheduler};

/// Boot a small machine with an adopted main thread and an alarm wired
/// to the timer.
pub fn boot(period: u64) -> (Arc<Machine>, Arc<Scheduler>, Arc<Alarm>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let machine = Arc::new(Machine::new(MachineConfig {
        page_size: 64,
        num_phys_pages: 4,
        timer_period: period,
    }));
    let sched = Scheduler::new(&machine);
    sched.adopt_main("main");
    let alarm = Alarm::new(&machine, Arc::clone(&sched));
    (machine, sched, alarm)
}
