//! Syscall numbers and dispatch. An opcode outside the table is a
//! kernel bug in the caller and brings the machine down, matching the
//! "fail loudly" stance everywhere else in the kernel.

use crate::program::SyscallContext;

pub const SYSCALL_HALT: i32 = 0;
pub const SYSCALL_EXIT: i32 = 1;
pub const SYSCALL_EXEC: i32 = 2;
pub const SYSCALL_JOIN: i32 = 3;
pub const SYSCALL_CREATE: i32 = 4;
pub const SYSCALL_OPEN: i32 = 5;
pub const SYSCALL_READ: i32 = 6;
pub const SYSCALL_WRITE: i32 = 7;
pub const SYSCALL_CLOSE: i32 = 8;
pub const SYSCALL_UNLINK: i32 = 9;

pub(crate) fn dispatch(ctx: &SyscallContext, num: i32, args: [i32; 4]) -> i32 {
    let process = ctx.process().clone();
    log::trace!("pid {} syscall {num} {args:?}", process.pid());
    match num {
        SYSCALL_HALT => process.handle_halt(),
        SYSCALL_EXIT => {
            process.handle_exit(args[0]);
            // the process is gone; unwind the body instead of returning
            // into it. run_main catches the marker.
            std::panic::resume_unwind(Box::new(crate::process::ProcessExit))
        }
        SYSCALL_EXEC => process.handle_exec(args[0], args[1], args[2]),
        SYSCALL_JOIN => process.handle_join(args[0], args[1]),
        SYSCALL_CREATE => process.handle_create(args[0]),
        SYSCALL_OPEN => process.handle_open(args[0]),
        SYSCALL_READ => process.handle_read(args[0], args[1], args[2]),
        SYSCALL_WRITE => process.handle_write(args[0], args[1], args[2]),
        SYSCALL_CLOSE => process.handle_close(args[0]),
        SYSCALL_UNLINK => process.handle_unlink(args[0]),
        _ => panic!("pid {}: unknown syscall {num}", process.pid()),
    }
}
