mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use machine::build_flat_image;
use once_cell::sync::Lazy;
use userprog::{SyscallContext, UserProcess, UserProgram};

use common::PAGE_SIZE;

// One page of read-only "code"; every executable in these tests stages
// the same image, the interesting part is the registered body.
static CODE_IMAGE: Lazy<Vec<u8>> =
    Lazy::new(|| build_flat_image(PAGE_SIZE, 0x40, &[(0, true, &[0x13; 32])]));

fn body<F>(f: F) -> Arc<dyn UserProgram>
where
    F: Fn(&mut SyscallContext) + Send + Sync + 'static,
{
    Arc::new(f)
}

#[test]
fn load_stages_argv_in_the_last_page() {
    let (_machine, _sched, kernel, fs) = common::boot(64);
    fs.install("prog.img", CODE_IMAGE.clone());

    let process = UserProcess::new(&kernel);
    process.load("prog.img", &["alpha", "beta"]).unwrap();

    assert_eq!(process.entry(), 0x40);
    assert_eq!(process.argc(), 2);
    // 1 code page + 8 stack pages + 1 arg page
    assert_eq!(process.initial_sp(), (10 * PAGE_SIZE) as i32);
    let argv = process.argv_ptr();
    assert_eq!(argv, (9 * PAGE_SIZE) as i32);

    let mut ptr = [0u8; 4];
    assert_eq!(process.read_memory(argv, &mut ptr), 4);
    let first = i32::from_le_bytes(ptr);
    assert_eq!(process.read_string(first, 64), Some("alpha".to_string()));
    assert_eq!(process.read_memory(argv + 4, &mut ptr), 4);
    let second = i32::from_le_bytes(ptr);
    assert_eq!(process.read_string(second, 64), Some("beta".to_string()));
}

#[test]
fn exec_join_exit_round_trip() {
    let (machine, sched, kernel, fs) = common::boot(64);
    fs.install("root.img", CODE_IMAGE.clone());
    fs.install("child.img", CODE_IMAGE.clone());

    kernel.register_program("child.img", body(|ctx| ctx.exit(12)));

    let outcome: Arc<Mutex<Option<(i32, i32, i32)>>> = Arc::new(Mutex::new(None));
    let o = Arc::clone(&outcome);
    kernel.register_program(
        "root.img",
        body(move |ctx| {
            let pid = ctx.exec("child.img", &["ignored"]);
            let status_at = ctx.stage_bytes(&[0u8; 4]);
            let joined = ctx.join(pid, status_at);
            let mut status = [0u8; 4];
            ctx.process().read_memory(status_at, &mut status);
            *o.lock().unwrap() = Some((pid, joined, i32::from_le_bytes(status)));
            ctx.exit(0);
        }),
    );

    let root = kernel.run_program("root.img", &[]).unwrap();
    let thread = root.join_thread().unwrap();
    sched.join(&thread);

    let (pid, joined, status) = outcome.lock().unwrap().unwrap();
    assert!(pid > 0);
    assert_eq!(joined, 1);
    assert_eq!(status, 12);
    // every frame came back and the machine halted with the last exit
    assert_eq!(kernel.frames().available(), 64);
    assert!(machine.halted());
}

#[test]
fn join_validates_pid_and_status_address() {
    let (_machine, sched, kernel, fs) = common::boot(64);
    fs.install("root.img", CODE_IMAGE.clone());

    let results: Arc<Mutex<Vec<i32>>> = Arc::new(Mutex::new(Vec::new()));
    let r = Arc::clone(&results);
    kernel.register_program(
        "root.img",
        body(move |ctx| {
            let status_at = ctx.stage_bytes(&[0u8; 4]);
            let mut out = r.lock().unwrap();
            out.push(ctx.join(999, status_at)); // not a child
            out.push(ctx.join(0, -4)); // negative status address
            out.push(ctx.join(0, i32::MAX - 1)); // footprint outside memory
            drop(out);
            ctx.exit(0);
        }),
    );

    let root = kernel.run_program("root.img", &[]).unwrap();
    sched.join(&root.join_thread().unwrap());
    assert_eq!(*results.lock().unwrap(), [-1, -1, -1]);
}

#[test]
fn exec_rejects_bad_names_and_argv_without_a_child() {
    let (_machine, sched, kernel, fs) = common::boot(64);
    fs.install("root.img", CODE_IMAGE.clone());
    fs.install("child.img", CODE_IMAGE.clone());
    fs.install("child.txt", CODE_IMAGE.clone());

    let results: Arc<Mutex<Vec<(i32, usize)>>> = Arc::new(Mutex::new(Vec::new()));
    let r = Arc::clone(&results);
    kernel.register_program(
        "root.img",
        body(move |ctx| {
            // wrong suffix
            let bad_suffix = ctx.exec("child.txt", &[]);
            r.lock()
                .unwrap()
                .push((bad_suffix, ctx.process().children().len()));

            // argv block that cannot be read: one pointer starting at
            // the very end of the address space
            let name = ctx.stage_str("child.img");
            let argv = ctx.process().initial_sp() - 2;
            let bad_argv = ctx.syscall(userprog::SYSCALL_EXEC, [name, 1, argv, 0]);
            r.lock()
                .unwrap()
                .push((bad_argv, ctx.process().children().len()));

            ctx.exit(0);
        }),
    );

    let root = kernel.run_program("root.img", &[]).unwrap();
    sched.join(&root.join_thread().unwrap());
    assert_eq!(*results.lock().unwrap(), [(-1, 0), (-1, 0)]);
}

#[test]
fn exit_does_not_return_into_the_body() {
    let (machine, sched, kernel, fs) = common::boot(64);
    fs.install("root.img", CODE_IMAGE.clone());
    fs.install("child.img", CODE_IMAGE.clone());

    let reached = Arc::new(AtomicBool::new(false));
    let r = Arc::clone(&reached);
    kernel.register_program(
        "child.img",
        body(move |ctx| {
            ctx.syscall(userprog::SYSCALL_EXIT, [7, 0, 0, 0]);
            r.store(true, Ordering::SeqCst);
        }),
    );

    let outcome: Arc<Mutex<Option<(i32, i32)>>> = Arc::new(Mutex::new(None));
    let o = Arc::clone(&outcome);
    kernel.register_program(
        "root.img",
        body(move |ctx| {
            let pid = ctx.exec("child.img", &[]);
            let status_at = ctx.stage_bytes(&[0u8; 4]);
            let joined = ctx.join(pid, status_at);
            let mut status = [0u8; 4];
            ctx.process().read_memory(status_at, &mut status);
            *o.lock().unwrap() = Some((joined, i32::from_le_bytes(status)));
            ctx.exit(0);
        }),
    );

    let root = kernel.run_program("root.img", &[]).unwrap();
    sched.join(&root.join_thread().unwrap());

    assert_eq!(*outcome.lock().unwrap(), Some((1, 7)));
    assert!(!reached.load(Ordering::SeqCst), "the body ran past exit");
    assert!(machine.halted());
}

#[test]
fn failed_boot_halts_the_machine() {
    let (machine, _sched, kernel, _fs) = common::boot(64);
    // the only process never ran, so nothing is left to halt later
    assert!(kernel.run_program("missing.img", &[]).is_err());
    assert!(machine.halted());
}

#[test]
fn exec_load_failure_keeps_the_machine_haltable() {
    // 16 frames total; each process needs 10, so the second exec fails
    let (machine, sched, kernel, fs) = common::boot(16);
    fs.install("root.img", CODE_IMAGE.clone());
    fs.install("child.img", CODE_IMAGE.clone());
    kernel.register_program("child.img", body(|ctx| ctx.exit(0)));

    let outcome: Arc<Mutex<Option<(i32, usize)>>> = Arc::new(Mutex::new(None));
    let o = Arc::clone(&outcome);
    kernel.register_program(
        "root.img",
        body(move |ctx| {
            let pid = ctx.exec("child.img", &[]);
            *o.lock().unwrap() = Some((pid, ctx.process().children().len()));
            ctx.exit(0);
        }),
    );

    let root = kernel.run_program("root.img", &[]).unwrap();
    sched.join(&root.join_thread().unwrap());

    let (pid, children) = outcome.lock().unwrap().unwrap();
    assert_eq!(pid, -1);
    // the stillborn child record stays linked, but it no longer counts
    // as active, so the root's exit still halts the machine
    assert_eq!(children, 1);
    assert!(machine.halted());
    assert_eq!(kernel.frames().available(), 16);
}

#[test]
fn file_syscalls_move_bytes_through_user_memory() {
    let (machine, sched, kernel, fs) = common::boot(64);
    fs.install("root.img", CODE_IMAGE.clone());

    let outcome: Arc<Mutex<Vec<i32>>> = Arc::new(Mutex::new(Vec::new()));
    let read_back: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    let o = Arc::clone(&outcome);
    let rb = Arc::clone(&read_back);
    kernel.register_program(
        "root.img",
        body(move |ctx| {
            let msg = b"hello, kernel";
            let src = ctx.stage_bytes(msg);
            let mut out = Vec::new();

            let fd = ctx.create("out.dat");
            out.push(fd);
            out.push(ctx.write(fd, src, msg.len() as i32));
            out.push(ctx.close(fd));
            out.push(ctx.close(fd)); // double close

            let fd = ctx.open("out.dat");
            let dst = ctx.stage_bytes(&[0u8; 32]);
            out.push(ctx.read(fd, dst, 32)); // short read at end of file
            let mut bytes = vec![0u8; msg.len()];
            ctx.process().read_memory(dst, &mut bytes);
            *rb.lock().unwrap() = bytes;
            out.push(ctx.close(fd));

            out.push(ctx.unlink("out.dat"));
            out.push(ctx.unlink("out.dat")); // already gone

            out.push(ctx.write(1, src, msg.len() as i32)); // console
            out.push(ctx.write(0, src, msg.len() as i32)); // reader is not writable
            out.push(ctx.read(7, dst, 4)); // fd never opened
            out.push(ctx.read(2, -1, 4)); // non-positive buffer pointer

            *o.lock().unwrap() = out;
            ctx.exit(0);
        }),
    );

    let root = kernel.run_program("root.img", &[]).unwrap();
    sched.join(&root.join_thread().unwrap());

    let out = outcome.lock().unwrap().clone();
    assert_eq!(out, [2, 13, 0, -1, 13, 0, 0, -1, 13, -1, -1, -1]);
    assert_eq!(*read_back.lock().unwrap(), b"hello, kernel");
    assert_eq!(machine.console.take_output(), b"hello, kernel");
}

#[test]
fn halt_only_works_for_the_bootstrap_process() {
    let (machine, sched, kernel, fs) = common::boot(64);
    fs.install("root.img", CODE_IMAGE.clone());
    fs.install("child.img", CODE_IMAGE.clone());

    let child_halt: Arc<Mutex<Option<i32>>> = Arc::new(Mutex::new(None));
    let ch = Arc::clone(&child_halt);
    kernel.register_program(
        "child.img",
        body(move |ctx| {
            *ch.lock().unwrap() = Some(ctx.halt());
            ctx.exit(0);
        }),
    );

    let root_halt: Arc<Mutex<Option<(i32, bool)>>> = Arc::new(Mutex::new(None));
    let rh = Arc::clone(&root_halt);
    let m = Arc::clone(&machine);
    kernel.register_program(
        "root.img",
        body(move |ctx| {
            let pid = ctx.exec("child.img", &[]);
            let status_at = ctx.stage_bytes(&[0u8; 4]);
            ctx.join(pid, status_at);
            let halted_before = m.halted();
            let r = ctx.halt();
            *rh.lock().unwrap() = Some((r, halted_before));
            ctx.exit(0);
        }),
    );

    let root = kernel.run_program("root.img", &[]).unwrap();
    sched.join(&root.join_thread().unwrap());

    assert_eq!(*child_halt.lock().unwrap(), Some(-1));
    let (root_result, halted_before_root) = root_halt.lock().unwrap().unwrap();
    assert!(!halted_before_root, "child halt must not stop the machine");
    assert_eq!(root_result, 0);
    assert!(machine.halted());
}

#[test]
fn a_body_that_returns_exits_cleanly() {
    let (machine, sched, kernel, fs) = common::boot(64);
    fs.install("root.img", CODE_IMAGE.clone());
    fs.install("child.img", CODE_IMAGE.clone());
    kernel.register_program("child.img", body(|_ctx| {}));

    let outcome: Arc<Mutex<Option<(i32, i32)>>> = Arc::new(Mutex::new(None));
    let o = Arc::clone(&outcome);
    kernel.register_program(
        "root.img",
        body(move |ctx| {
            let pid = ctx.exec("child.img", &[]);
            let status_at = ctx.stage_bytes(&[0xffu8; 4]);
            let joined = ctx.join(pid, status_at);
            let mut status = [0u8; 4];
            ctx.process().read_memory(status_at, &mut status);
            *o.lock().unwrap() = Some((joined, i32::from_le_bytes(status)));
            ctx.exit(0);
        }),
    );

    let root = kernel.run_program("root.img", &[]).unwrap();
    sched.join(&root.join_thread().unwrap());

    // returning from the body is an implicit exit(0)
    assert_eq!(*outcome.lock().unwrap(), Some((1, 0)));
    assert!(machine.halted());
}

#[test]
fn join_reports_abnormal_termination_without_status() {
    let (_machine, sched, kernel, fs) = common::boot(64);
    fs.install("root.img", CODE_IMAGE.clone());
    // ghost.img has an image on disk but no registered body
    fs.install("ghost.img", CODE_IMAGE.clone());

    let outcome: Arc<Mutex<Option<(i32, [u8; 4])>>> = Arc::new(Mutex::new(None));
    let o = Arc::clone(&outcome);
    kernel.register_program(
        "root.img",
        body(move |ctx| {
            let pid = ctx.exec("ghost.img", &[]);
            let status_at = ctx.stage_bytes(&[0xaa; 4]);
            let joined = ctx.join(pid, status_at);
            let mut status = [0u8; 4];
            ctx.process().read_memory(status_at, &mut status);
            *o.lock().unwrap() = Some((joined, status));
            ctx.exit(0);
        }),
    );

    let root = kernel.run_program("root.img", &[]).unwrap();
    sched.join(&root.join_thread().unwrap());

    let (joined, status) = outcome.lock().unwrap().unwrap();
    assert_eq!(joined, 0);
    // abnormal termination leaves the caller's buffer untouched
    assert_eq!(status, [0xaa; 4]);
}

#[test]
fn frame_pool_hands_back_partial_draws() {
    let (_machine, _sched, kernel, _fs) = common::boot(16);
    let pool = kernel.frames();

    let available = pool.available();
    assert_eq!(available, 16);
    assert!(pool.allocate(17).is_none());
    assert_eq!(pool.available(), available);

    let frames = pool.allocate(5).unwrap();
    assert_eq!(pool.available(), 11);
    pool.release(&frames);
    assert_eq!(pool.available(), 16);
}
