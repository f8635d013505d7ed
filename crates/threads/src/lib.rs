//! Cooperative thread kernel for the simulated machine: a round-robin
//! scheduler over parked OS threads, sleeping locks and condition
//! variables, timer-driven wakeups, and a matchmaking barrier. One
//! thread runs at a time; preemption happens only at interrupt
//! re-enable points, which keeps every run deterministic.

pub mod thread;
pub use thread::{KThread, ThreadStatus};

pub mod scheduler;
pub use scheduler::Scheduler;

pub mod lock;
pub use lock::Lock;

pub mod alarm;
pub use alarm::Alarm;

pub mod condition;
pub use condition::Condition;

pub mod rendezvous;
pub use rendezvous::{
    Rendezvous, ABILITY_BEGINNER, ABILITY_EXPERT, ABILITY_INTERMEDIATE,
};
