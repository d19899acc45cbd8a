//! Tracer loop (component C4).
//!
//! Grounded on the shape of rd's replay stepping loop
//! (`replay_syscall.rs`'s `__ptrace_cont`): resume the tracee, wait for
//! the next ptrace-stop, classify it, repeat. `rd`'s version threads a
//! recorded trace through the loop to decide what to expect next;
//! fakefs has no recorded trace to follow, so it classifies each stop
//! from the raw `waitpid` result alone and dispatches into
//! the C5 hook only for the stops that matter (seccomp-trapped syscall
//! entries and their matching exits).

use crate::hook;
use crate::kernel_abi::SupportedArch;
use crate::log::LogLevel::*;
use crate::thread::ThreadIndex;
use crate::{fatal, log};
use nix::sys::ptrace;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::io;

const TRACE_OPTIONS: ptrace::Options = ptrace::Options::from_bits_truncate(
    ptrace::Options::PTRACE_O_EXITKILL.bits()
        | ptrace::Options::PTRACE_O_TRACESYSGOOD.bits()
        | ptrace::Options::PTRACE_O_TRACEEXEC.bits()
        | ptrace::Options::PTRACE_O_TRACECLONE.bits()
        | ptrace::Options::PTRACE_O_TRACEFORK.bits()
        | ptrace::Options::PTRACE_O_TRACEVFORK.bits()
        | ptrace::Options::PTRACE_O_TRACESECCOMP.bits(),
);

/// Seize the freshly-forked, self-stopped tracee and run the wait loop
/// until every traced thread has exited. Returns the
/// tracee's exit status, for the tracer process to mirror back to its
/// own exit code.
pub fn run(root_pid: Pid) -> io::Result<i32> {
    // The child raised SIGSTOP on itself before installing the seccomp
    // filter's enforcement could matter (tracee::bootstrap); that is a
    // plain job-control stop, visible to us via WUNTRACED since we are
    // its real parent.
    waitpid(root_pid, Some(WaitPidFlag::WUNTRACED))
        .map_err(|e| io::Error::from_raw_os_error(e as i32))?;

    ptrace::seize(root_pid, TRACE_OPTIONS).map_err(|e| io::Error::from_raw_os_error(e as i32))?;

    // Seizing doesn't itself generate a stop; wake the tracee from its
    // job-control stop so ptrace can observe a group-stop and hand
    // control to us for the first time.
    signal::kill(root_pid, Signal::SIGCONT).map_err(|e| io::Error::from_raw_os_error(e as i32))?;

    let mut threads = ThreadIndex::new();
    threads.insert(root_pid.as_raw(), root_pid.as_raw());

    // Consume the PTRACE_EVENT_STOP generated by the SIGCONT above,
    // then let the tracee run into its execve.
    match waitpid(root_pid, Some(WaitPidFlag::__WALL)) {
        Ok(_) => {}
        Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
    }
    crate::tracee::resume_after_seize(root_pid)?;

    loop {
        let status = match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::__WALL)) {
            Ok(s) => s,
            Err(nix::errno::Errno::ECHILD) => break,
            Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
        };

        if let Some(exit_code) = handle_wait_status(&mut threads, status)? {
            if threads.is_empty() {
                return Ok(exit_code);
            }
        }
    }

    Ok(0)
}

/// Classify and act on one `waitpid` result. Returns `Some(exit_code)` when the stop was
/// the root tracee exiting, so the caller can decide whether the
/// whole tracer should stop (all threads gone) or keep looping
/// (siblings remain).
fn handle_wait_status(threads: &mut ThreadIndex, status: WaitStatus) -> io::Result<Option<i32>> {
    match status {
        WaitStatus::Exited(pid, code) => {
            log!(LogInfo, "tid {} exited with code {}", pid, code);
            threads.remove(pid.as_raw());
            Ok(Some(code))
        }
        WaitStatus::Signaled(pid, sig, _core) => {
            log!(LogInfo, "tid {} killed by signal {:?}", pid, sig);
            threads.remove(pid.as_raw());
            Ok(Some(128 + sig as i32))
        }
        WaitStatus::PtraceEvent(pid, _sig, event) => {
            handle_ptrace_event(threads, pid, event)?;
            Ok(None)
        }
        WaitStatus::PtraceSyscall(pid) => {
            handle_syscall_stop(threads, pid)?;
            Ok(None)
        }
        WaitStatus::Stopped(pid, sig) => {
            handle_signal_delivery_stop(threads, pid, sig)?;
            Ok(None)
        }
        WaitStatus::Continued(_) | WaitStatus::StillAlive => Ok(None),
    }
}

fn handle_ptrace_event(threads: &mut ThreadIndex, pid: Pid, event: i32) -> io::Result<()> {
    if event == libc::PTRACE_EVENT_SECCOMP {
        // Syscall-entry stop: the seccomp filter trapped this one
        //. The hook decides whether to let it through,
        // rewrite its arguments, or block it outright.
        if !threads.contains(pid.as_raw()) {
            threads.insert(pid.as_raw(), getpid_of(pid)?);
        }
        match hook::on_syscall_entry(threads, pid.as_raw(), SupportedArch::X64)? {
            hook::ResumeKind::Cont => {
                log_resume(pid, libc::PTRACE_CONT);
                ptrace::cont(pid, None).map_err(|e| io::Error::from_raw_os_error(e as i32))?;
            }
            hook::ResumeKind::Syscall => {
                log_resume(pid, libc::PTRACE_SYSCALL);
                ptrace::syscall(pid, None).map_err(|e| io::Error::from_raw_os_error(e as i32))?;
            }
        }
        return Ok(());
    }

    if event == libc::PTRACE_EVENT_CLONE
        || event == libc::PTRACE_EVENT_FORK
        || event == libc::PTRACE_EVENT_VFORK
    {
        let new_tid = ptrace::getevent(pid).map_err(|e| io::Error::from_raw_os_error(e as i32))? as i32;
        let group_pid = threads.get(pid.as_raw()).map(|t| t.pid).unwrap_or(pid.as_raw());
        let new_pid = if event == libc::PTRACE_EVENT_CLONE { group_pid } else { new_tid };
        threads.insert(new_tid, new_pid);
        ptrace::cont(pid, None).map_err(|e| io::Error::from_raw_os_error(e as i32))?;
        return Ok(());
    }

    if event == libc::PTRACE_EVENT_EXEC {
        // A successful exec collapses the whole thread group down to
        // the thread that called it. Every
        // sibling that shared this pid is gone the instant exec
        // completes, whether or not we ever see a separate exit-stop
        // for it, so evict them from the index now rather than wait
        // for a waitpid that may never come.
        let group_pid = threads.get(pid.as_raw()).map(|t| t.pid).unwrap_or(pid.as_raw());
        if group_pid != pid.as_raw() {
            fatal!(
                "PTRACE_EVENT_EXEC tid {} does not match its own thread group {}; fakefs bug",
                pid,
                group_pid
            );
        }
        for sibling in threads.tids_for_pid(group_pid) {
            if sibling != pid.as_raw() {
                threads.remove(sibling);
            }
        }
        if let Some(t) = threads.get_mut(pid.as_raw()) {
            t.execed = true;
            t.current_syscall = None;
            t.pending_exit_action = None;
        }
        ptrace::cont(pid, None).map_err(|e| io::Error::from_raw_os_error(e as i32))?;
        return Ok(());
    }

    if event == libc::PTRACE_EVENT_EXIT {
        ptrace::cont(pid, None).map_err(|e| io::Error::from_raw_os_error(e as i32))?;
        return Ok(());
    }

    if event == libc::PTRACE_EVENT_STOP {
        // Group-stop: honor it with PTRACE_LISTEN rather than CONT/
        // SYSCALL, which would otherwise inject an extraneous resume
        // and defeat the group-stop.
        ptrace_listen(pid)?;
        return Ok(());
    }

    fatal!(
        "unknown ptrace event {} for tid {}; this is a fakefs bug, not a tracee misbehavior",
        crate::kernel_metadata::ptrace_event_name(event),
        pid
    );
}

/// `SIGTRAP | 0x80` syscall-exit stops, thanks to
/// `PTRACE_O_TRACESYSGOOD`. Only reached for threads whose entry the
/// hook actually stepped through with `PTRACE_SYSCALL` rather than
/// `PTRACE_CONT` -- i.e. exactly the syscalls the hook decided to
/// block and needs to patch the result of.
fn handle_syscall_stop(threads: &mut ThreadIndex, pid: Pid) -> io::Result<()> {
    hook::on_syscall_exit(threads, pid.as_raw())?;
    ptrace::cont(pid, None).map_err(|e| io::Error::from_raw_os_error(e as i32))
}

/// An ordinary signal about to be delivered to the tracee. fakefs
/// doesn't emulate signal delivery like `rd` does; it just forwards
/// the signal unchanged, except `SIGSTOP`, which it swallows rather
/// than re-injecting -- the tracee's own bootstrap already
/// used a `SIGSTOP` to hand control to the tracer, and any further one
/// observed here is job-control noise the tracee never asked its
/// children to see.
fn handle_signal_delivery_stop(_threads: &mut ThreadIndex, pid: Pid, sig: Signal) -> io::Result<()> {
    if sig == Signal::SIGSTOP {
        log!(LogDebug, "swallowing SIGSTOP for tid {}", pid);
        ptrace::cont(pid, None).map_err(|e| io::Error::from_raw_os_error(e as i32))
    } else {
        log!(LogDebug, "forwarding signal {:?} to tid {}", sig, pid);
        ptrace::cont(pid, Some(sig)).map_err(|e| io::Error::from_raw_os_error(e as i32))
    }
}

fn ptrace_listen(pid: Pid) -> io::Result<()> {
    log_resume(pid, libc::PTRACE_LISTEN);
    let rc = unsafe { libc::ptrace(libc::PTRACE_LISTEN, pid.as_raw(), 0, 0) };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Trace-level breadcrumb for the resume request the tracer is about
/// to issue, named the way rd's `kernel_metadata` tables are
/// used throughout `rd`'s own ptrace call sites.
fn log_resume(pid: Pid, request: i32) {
    log!(
        LogDebug,
        "resuming tid {} with {}",
        pid,
        crate::kernel_metadata::ptrace_req_name(request)
    );
}

fn getpid_of(tid: Pid) -> io::Result<i32> {
    let stat = std::fs::read_to_string(format!("/proc/{}/status", tid))?;
    for line in stat.lines() {
        if let Some(rest) = line.strip_prefix("Tgid:") {
            return rest
                .trim()
                .parse::<i32>()
                .map_err(|_| io::Error::from(io::ErrorKind::InvalidData));
        }
    }
    Ok(tid.as_raw())
}

