//! User processes: executable loading, the descriptor table, the
//! process tree, and the syscall handlers.
//!
//! Lock discipline: a process never holds its own `inner` mutex while
//! touching another process's, and never across a scheduler suspension
//! point (the join handler drops its guard before blocking on the
//! child's thread).

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};

use machine::{ImageError, ObjectFile, OpenFile};
use thiserror::Error;
use threads::KThread;

use crate::addrspace::{AddrSpace, TranslationEntry};
use crate::kernel::UserKernel;
use crate::program::SyscallContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Child exists but has not exited.
    Running,
    /// Normal exit with the given status code.
    Exited(i32),
    /// Terminated without a proper exit (no program body, kernel abort).
    Aborted,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot open executable '{0}'")]
    Open(String),
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error("sections are not contiguous from page 0")]
    Fragmented,
    #[error("arguments do not fit in one page")]
    ArgsTooLong,
    #[error("not enough free frames")]
    OutOfMemory,
}

/// Unwind payload thrown by the exit syscall to stop the program body.
/// By the time it flies, the process has already been torn down.
pub(crate) struct ProcessExit;

pub struct UserProcess {
    pid: u32,
    kernel: Arc<UserKernel>,
    parent: Mutex<Weak<UserProcess>>,
    inner: Mutex<ProcInner>,
}

struct ProcInner {
    space: Option<AddrSpace>,
    image: Option<Box<dyn ObjectFile>>,
    fds: Vec<Option<Box<dyn OpenFile>>>,
    children: HashMap<u32, Arc<UserProcess>>,
    child_status: HashMap<u32, ExitStatus>,
    thread: Option<KThread>,
    exec_name: String,
    entry: u32,
    initial_sp: i32,
    argc: i32,
    argv: i32,
}

impl UserProcess {
    /// Create a process with descriptors 0 and 1 bound to the console.
    pub fn new(kernel: &Arc<UserKernel>) -> Arc<Self> {
        let pid = kernel.register_process();
        let mut fds: Vec<Option<Box<dyn OpenFile>>> = Vec::new();
        fds.resize_with(kernel.config.max_open_files, || None);
        fds[0] = Some(kernel.machine.console.reader());
        fds[1] = Some(kernel.machine.console.writer());
        log::debug!("created process {pid}");
        Arc::new(Self {
            pid,
            kernel: Arc::clone(kernel),
            parent: Mutex::new(Weak::new()),
            inner: Mutex::new(ProcInner {
                space: None,
                image: None,
                fds,
                children: HashMap::new(),
                child_status: HashMap::new(),
                thread: None,
                exec_name: String::new(),
                entry: 0,
                initial_sp: 0,
                argc: 0,
                argv: 0,
            }),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Load executable `name` and stage `args` into the new address
    /// space. Layout: the image's sections from page 0, then the stack
    /// pages, then one page holding the argv pointer block and strings.
    pub fn load(&self, name: &str, args: &[&str]) -> Result<(), LoadError> {
        let mut file = self
            .kernel
            .fs()
            .open(name, false)
            .ok_or_else(|| LoadError::Open(name.to_string()))?;
        let image = self.kernel.loader().load(file.as_mut())?;

        let memory = Arc::clone(&self.kernel.machine.memory);
        let page_size = memory.page_size();
        let mut code_pages = 0u32;
        for section in image.sections() {
            if section.first_vpn != code_pages {
                return Err(LoadError::Fragmented);
            }
            code_pages += section.pages;
        }

        // each argument costs one argv pointer plus its NUL-terminated
        // bytes, and the whole block must fit in the one argument page
        let args_size: usize = args.iter().map(|a| 4 + a.len() + 1).sum();
        if args_size > page_size {
            return Err(LoadError::ArgsTooLong);
        }

        let num_pages = code_pages as usize + self.kernel.config.stack_pages + 1;
        let frames = self
            .kernel
            .frames()
            .allocate(num_pages)
            .ok_or(LoadError::OutOfMemory)?;

        let mut entries = Vec::with_capacity(num_pages);
        let mut vpn = 0usize;
        for (si, section) in image.sections().iter().enumerate() {
            log::debug!(
                "pid {}: section '{}' at vpn {} ({} pages)",
                self.pid,
                section.name,
                section.first_vpn,
                section.pages
            );
            for page in 0..section.pages {
                image.load_page(si, page, frames[vpn], &memory);
                entries.push(TranslationEntry::new(
                    vpn as u32,
                    frames[vpn],
                    section.read_only,
                ));
                vpn += 1;
            }
        }
        while vpn < num_pages {
            memory.zero_page(frames[vpn]);
            entries.push(TranslationEntry::new(vpn as u32, frames[vpn], false));
            vpn += 1;
        }

        let mut space = AddrSpace::with_entries(memory, entries);

        // argv pointer block at the start of the last page, strings
        // packed directly after it
        let argv_base = ((num_pages - 1) * page_size) as i32;
        let mut string_at = argv_base + (args.len() * 4) as i32;
        for (i, arg) in args.iter().enumerate() {
            let ptr_at = argv_base + (i * 4) as i32;
            let wrote = space.write(ptr_at, &string_at.to_le_bytes(), 0, 4);
            assert_eq!(wrote, 4, "argv pointer write failed");
            let mut bytes = arg.as_bytes().to_vec();
            bytes.push(0);
            let len = bytes.len() as i32;
            let wrote = space.write(string_at, &bytes, 0, len);
            assert_eq!(wrote, bytes.len(), "argv string write failed");
            string_at += len;
        }

        let mut inner = self.inner.lock().unwrap();
        inner.entry = image.entry_point();
        inner.initial_sp = (num_pages * page_size) as i32;
        inner.argc = args.len() as i32;
        inner.argv = argv_base;
        inner.exec_name = name.to_string();
        inner.space = Some(space);
        inner.image = Some(image);
        Ok(())
    }

    /// Start the process's thread. The loaded program body runs until
    /// it exits (explicitly or by returning).
    pub fn execute(self: &Arc<Self>) {
        let me = Arc::clone(self);
        let name = format!("proc-{}", self.pid);
        let thread = self.kernel.sched.fork(&name, move || me.run_main());
        self.inner.lock().unwrap().thread = Some(thread);
    }

    fn run_main(self: &Arc<Self>) {
        let exec_name = self.inner.lock().unwrap().exec_name.clone();
        match self.kernel.program(&exec_name) {
            None => {
                log::error!("pid {}: no program registered for '{exec_name}'", self.pid);
                self.terminate(ExitStatus::Aborted);
            }
            Some(program) => {
                let mut ctx = SyscallContext::new(Arc::clone(self));
                match catch_unwind(AssertUnwindSafe(|| program.run(&mut ctx))) {
                    // falling off the end counts as a clean exit
                    Ok(()) => self.handle_exit(0),
                    // the exit syscall already terminated the process
                    Err(payload) if payload.is::<ProcessExit>() => {}
                    Err(_) => {
                        log::error!("pid {}: program body panicked", self.pid);
                        self.terminate(ExitStatus::Aborted);
                    }
                }
            }
        }
    }

    /// Release everything the process holds and record its fate for the
    /// parent. The last active process halts the machine.
    fn terminate(&self, status: ExitStatus) {
        let (fds, image, frames) = {
            let mut inner = self.inner.lock().unwrap();
            let fds = std::mem::take(&mut inner.fds);
            let image = inner.image.take();
            let frames = inner.space.take().map(|s| s.frames()).unwrap_or_default();
            (fds, image, frames)
        };
        drop(fds);
        drop(image);
        if let Some(parent) = self.parent.lock().unwrap().upgrade() {
            parent
                .inner
                .lock()
                .unwrap()
                .child_status
                .insert(self.pid, status);
        }
        self.kernel.frames().release(&frames);
        if self.kernel.process_exited() {
            log::info!("pid {}: last process exited, halting", self.pid);
            self.kernel.halt_machine();
        }
    }

    // Syscall handlers. Return values follow the table convention: -1
    // for failure, operation-specific non-negative values otherwise.

    pub(crate) fn handle_halt(&self) -> i32 {
        if self.pid != 0 {
            log::warn!("pid {}: halt ignored, not the bootstrap process", self.pid);
            return -1;
        }
        self.kernel.halt_machine();
        0
    }

    pub(crate) fn handle_exit(&self, status: i32) {
        log::debug!("pid {} exiting with status {status}", self.pid);
        self.terminate(ExitStatus::Exited(status));
    }

    pub(crate) fn handle_exec(self: &Arc<Self>, name_vaddr: i32, argc: i32, argv_vaddr: i32) -> i32 {
        let max_len = self.kernel.config.max_arg_len;
        let Some(name) = self.read_string(name_vaddr, max_len) else {
            return -1;
        };
        if !name.ends_with(&self.kernel.config.exec_suffix) {
            log::warn!("pid {}: exec of '{name}' without executable suffix", self.pid);
            return -1;
        }
        if argc < 0 {
            return -1;
        }
        let mut args = Vec::with_capacity(argc as usize);
        for i in 0..argc {
            let mut ptr = [0u8; 4];
            if self.read_memory(argv_vaddr + 4 * i, &mut ptr) != 4 {
                return -1;
            }
            match self.read_string(i32::from_le_bytes(ptr), max_len) {
                Some(arg) => args.push(arg),
                None => return -1,
            }
        }

        let child = UserProcess::new(&self.kernel);
        *child.parent.lock().unwrap() = Arc::downgrade(self);
        let pid = child.pid;
        {
            let mut inner = self.inner.lock().unwrap();
            inner.children.insert(pid, Arc::clone(&child));
            inner.child_status.insert(pid, ExitStatus::Running);
        }

        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        if let Err(err) = child.load(&name, &arg_refs) {
            log::warn!("pid {}: exec of '{name}' failed: {err}", self.pid);
            // the stillborn child never runs, so take it back out of
            // the active count here. The caller is still active, so the
            // count cannot reach zero.
            let last = self.kernel.process_exited();
            debug_assert!(!last, "exec caller vanished from the active count");
            return -1;
        }
        child.execute();
        pid as i32
    }

    pub(crate) fn handle_join(self: &Arc<Self>, pid: i32, status_vaddr: i32) -> i32 {
        let mem_size = self.kernel.machine.memory.size() as i64;
        if status_vaddr < 0 || status_vaddr as i64 + 4 > mem_size {
            return -1;
        }
        if pid < 0 {
            return -1;
        }
        let pid = pid as u32;
        let Some(child) = self.inner.lock().unwrap().children.get(&pid).cloned() else {
            return -1;
        };
        let Some(thread) = child.inner.lock().unwrap().thread.take() else {
            // a child whose exec failed never got a thread
            return -1;
        };
        self.kernel.sched.join(&thread);

        let status = {
            let mut inner = self.inner.lock().unwrap();
            inner.children.remove(&pid);
            inner
                .child_status
                .remove(&pid)
                .unwrap_or(ExitStatus::Aborted)
        };
        match status {
            ExitStatus::Exited(code) => {
                self.write_memory(status_vaddr, &code.to_le_bytes());
                1
            }
            _ => 0,
        }
    }

    pub(crate) fn handle_create(&self, name_vaddr: i32) -> i32 {
        self.open_file(name_vaddr, true)
    }

    pub(crate) fn handle_open(&self, name_vaddr: i32) -> i32 {
        self.open_file(name_vaddr, false)
    }

    fn open_file(&self, name_vaddr: i32, create: bool) -> i32 {
        let Some(name) = self.read_string(name_vaddr, self.kernel.config.max_arg_len) else {
            return -1;
        };
        let Some(file) = self.kernel.fs().open(&name, create) else {
            return -1;
        };
        let mut inner = self.inner.lock().unwrap();
        match inner.fds.iter().position(|slot| slot.is_none()) {
            Some(fd) => {
                inner.fds[fd] = Some(file);
                fd as i32
            }
            None => -1,
        }
    }

    pub(crate) fn handle_close(&self, fd: i32) -> i32 {
        let mut inner = self.inner.lock().unwrap();
        match inner.fds.get_mut(fd.max(0) as usize) {
            Some(slot) if fd >= 0 && slot.is_some() => {
                *slot = None;
                0
            }
            _ => -1,
        }
    }

    pub(crate) fn handle_unlink(&self, name_vaddr: i32) -> i32 {
        let Some(name) = self.read_string(name_vaddr, self.kernel.config.max_arg_len) else {
            return -1;
        };
        if self.kernel.fs().remove(&name) {
            0
        } else {
            -1
        }
    }

    pub(crate) fn handle_read(&self, fd: i32, buf_vaddr: i32, count: i32) -> i32 {
        if buf_vaddr <= 0 || count < 0 {
            return -1;
        }
        let page_size = self.kernel.machine.memory.page_size();
        let mut stage = vec![0u8; page_size];
        let mut inner = self.inner.lock().unwrap();
        let ProcInner { fds, space, .. } = &mut *inner;
        let Some(file) = valid_fd(fds, fd) else { return -1 };
        let Some(space) = space.as_mut() else { return -1 };

        let mut vaddr = buf_vaddr;
        let mut remaining = count as usize;
        let mut total = 0;
        while remaining > 0 {
            let chunk = remaining.min(page_size);
            let n = match file.read(&mut stage[..chunk]) {
                Some(n) => n,
                None => return -1,
            };
            if n > 0 {
                if space.write(vaddr, &stage, 0, n as i32) != n {
                    return -1;
                }
                vaddr += n as i32;
                remaining -= n;
                total += n as i32;
            }
            if n < chunk {
                break; // end of stream
            }
        }
        total
    }

    pub(crate) fn handle_write(&self, fd: i32, buf_vaddr: i32, count: i32) -> i32 {
        if buf_vaddr <= 0 || count < 0 {
            return -1;
        }
        let page_size = self.kernel.machine.memory.page_size();
        let mut stage = vec![0u8; page_size];
        let mut inner = self.inner.lock().unwrap();
        let ProcInner { fds, space, .. } = &mut *inner;
        let Some(file) = valid_fd(fds, fd) else { return -1 };
        let Some(space) = space.as_mut() else { return -1 };

        let mut vaddr = buf_vaddr;
        let mut remaining = count as usize;
        while remaining > 0 {
            let chunk = remaining.min(page_size);
            if space.read(vaddr, &mut stage, 0, chunk as i32) != chunk {
                return -1; // unreadable user buffer fails the whole call
            }
            match file.write(&stage[..chunk]) {
                Some(n) if n == chunk => {}
                _ => return -1,
            }
            vaddr += chunk as i32;
            remaining -= chunk;
        }
        count
    }

    // Helpers shared by the handlers, the staging layer, and tests.

    pub fn read_memory(&self, vaddr: i32, buf: &mut [u8]) -> usize {
        let len = buf.len() as i32;
        let mut inner = self.inner.lock().unwrap();
        match inner.space.as_mut() {
            Some(space) => space.read(vaddr, buf, 0, len),
            None => 0,
        }
    }

    pub fn write_memory(&self, vaddr: i32, data: &[u8]) -> usize {
        let len = data.len() as i32;
        let mut inner = self.inner.lock().unwrap();
        match inner.space.as_mut() {
            Some(space) => space.write(vaddr, data, 0, len),
            None => 0,
        }
    }

    pub fn read_string(&self, vaddr: i32, max_len: usize) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .space
            .as_mut()?
            .read_string(vaddr, max_len)
    }

    /// First stack-page address; the syscall context stages buffers
    /// upward from here.
    pub(crate) fn scratch_base(&self) -> i32 {
        let inner = self.inner.lock().unwrap();
        let Some(space) = inner.space.as_ref() else { return 0 };
        let stack_first = space.num_pages() - 1 - self.kernel.config.stack_pages;
        (stack_first * space.page_size()) as i32
    }

    pub fn entry(&self) -> u32 {
        self.inner.lock().unwrap().entry
    }

    pub fn initial_sp(&self) -> i32 {
        self.inner.lock().unwrap().initial_sp
    }

    pub fn argc(&self) -> i32 {
        self.inner.lock().unwrap().argc
    }

    pub fn argv_ptr(&self) -> i32 {
        self.inner.lock().unwrap().argv
    }

    /// Pids of live (not yet joined) children.
    pub fn children(&self) -> Vec<u32> {
        self.inner.lock().unwrap().children.keys().copied().collect()
    }

    /// The process's kernel thread, once `execute` has run.
    pub fn join_thread(&self) -> Option<KThread> {
        self.inner.lock().unwrap().thread.clone()
    }
}

fn valid_fd(fds: &mut [Option<Box<dyn OpenFile>>], fd: i32) -> Option<&mut Box<dyn OpenFile>> {
    if fd < 0 {
        return None;
    }
    fds.get_mut(fd as usize)?.as_mut()
}
