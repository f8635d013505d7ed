//! User program bodies.
//!
//! The simulation has no instruction interpreter; a "user program" is a
//! kernel-registered body that runs on the process's thread and may
//! only reach kernel services through `SyscallContext::syscall`, with
//! pointers into its own staged user memory. That keeps the syscall
//! layer honest: every buffer and string crosses the address-space
//! boundary exactly as a machine-level program's would.

use std::sync::Arc;

use crate::process::UserProcess;
use crate::syscall::{self, SYSCALL_CLOSE, SYSCALL_CREATE, SYSCALL_EXEC, SYSCALL_EXIT, SYSCALL_HALT, SYSCALL_JOIN, SYSCALL_OPEN, SYSCALL_READ, SYSCALL_UNLINK, SYSCALL_WRITE};

pub trait UserProgram: Send + Sync {
    fn run(&self, ctx: &mut SyscallContext);
}

impl<F> UserProgram for F
where
    F: Fn(&mut SyscallContext) + Send + Sync,
{
    fn run(&self, ctx: &mut SyscallContext) {
        self(ctx)
    }
}

pub struct SyscallContext {
    process: Arc<UserProcess>,
    scratch: i32,
}

impl SyscallContext {
    pub(crate) fn new(process: Arc<UserProcess>) -> Self {
        let scratch = process.scratch_base();
        Self { process, scratch }
    }

    pub fn process(&self) -> &Arc<UserProcess> {
        &self.process
    }

    /// Raw syscall entry. The exit syscall does not return: it unwinds
    /// the program body after tearing the process down.
    pub fn syscall(&mut self, num: i32, args: [i32; 4]) -> i32 {
        syscall::dispatch(self, num, args)
    }

    /// Copy `bytes` into the process's stack region and return their
    /// virtual address. Staged data lives until the process exits.
    pub fn stage_bytes(&mut self, bytes: &[u8]) -> i32 {
        let vaddr = self.scratch;
        let written = self.process.write_memory(vaddr, bytes);
        assert_eq!(written, bytes.len(), "staging area overflow");
        // keep stagings word-aligned
        self.scratch += ((bytes.len() + 3) & !3) as i32;
        vaddr
    }

    /// Stage a NUL-terminated string.
    pub fn stage_str(&mut self, s: &str) -> i32 {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        self.stage_bytes(&bytes)
    }

    // Convenience wrappers over the raw table.

    pub fn halt(&mut self) -> i32 {
        self.syscall(SYSCALL_HALT, [0; 4])
    }

    /// Exit the process. Control never comes back to the body.
    pub fn exit(&mut self, status: i32) -> ! {
        self.syscall(SYSCALL_EXIT, [status, 0, 0, 0]);
        unreachable!("exit returned")
    }

    /// Stage `name` and `args` into user memory and exec them. Returns
    /// the child pid or -1.
    pub fn exec(&mut self, name: &str, args: &[&str]) -> i32 {
        let name_ptr = self.stage_str(name);
        let arg_ptrs: Vec<i32> = args.iter().map(|a| self.stage_str(a)).collect();
        let mut block = Vec::with_capacity(arg_ptrs.len() * 4);
        for ptr in &arg_ptrs {
            block.extend_from_slice(&ptr.to_le_bytes());
        }
        let argv = self.stage_bytes(&block);
        self.syscall(SYSCALL_EXEC, [name_ptr, args.len() as i32, argv, 0])
    }

    pub fn join(&mut self, pid: i32, status_vaddr: i32) -> i32 {
        self.syscall(SYSCALL_JOIN, [pid, status_vaddr, 0, 0])
    }

    pub fn create(&mut self, name: &str) -> i32 {
        let ptr = self.stage_str(name);
        self.syscall(SYSCALL_CREATE, [ptr, 0, 0, 0])
    }

    pub fn open(&mut self, name: &str) -> i32 {
        let ptr = self.stage_str(name);
        self.syscall(SYSCALL_OPEN, [ptr, 0, 0, 0])
    }

    pub fn read(&mut self, fd: i32, vaddr: i32, count: i32) -> i32 {
        self.syscall(SYSCALL_READ, [fd, vaddr, count, 0])
    }

    pub fn write(&mut self, fd: i32, vaddr: i32, count: i32) -> i32 {
        self.syscall(SYSCALL_WRITE, [fd, vaddr, count, 0])
    }

    pub fn close(&mut self, fd: i32) -> i32 {
        self.syscall(SYSCALL_CLOSE, [fd, 0, 0, 0])
    }

    pub fn unlink(&mut self, name: &str) -> i32 {
        let ptr = self.stage_str(name);
        self.syscall(SYSCALL_UNLINK, [ptr, 0, 0, 0])
    }
}
