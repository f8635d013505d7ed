//! The user-process layer: virtual address spaces over a shared frame
//! pool, executable loading, a ten-entry syscall table, and the process
//! tree with exec/join/exit lifecycle. Built on the `threads` scheduler
//! and the `machine` hardware seams.

pub mod frame_pool;
pub use frame_pool::FramePool;

pub mod addrspace;
pub use addrspace::{AddrSpace, TranslationEntry};

pub mod kernel;
pub use kernel::{KernelConfig, UserKernel};

pub mod process;
pub use process::{ExitStatus, LoadError, UserProcess};

pub mod program;
pub use program::{SyscallContext, UserProgram};

pub mod syscall;
pub use syscall::{
    SYSCALL_CLOSE, SYSCALL_CREATE, SYSCALL_EXEC, SYSCALL_EXIT, SYSCALL_HALT, SYSCALL_JOIN,
    SYSCALL_OPEN, SYSCALL_READ, SYSCALL_UNLINK, SYSCALL_WRITE,
};
