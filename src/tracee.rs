//! Tracee bootstrap (component C3).
//!
//! Runs in the forked child before it becomes the traced program. `rd`
//! never needs this half of a seize-based design -- it attaches to
//! tracees that are already running or spawns them via
//! `PTRACE_TRACEME`, which stops the child at the first `execve`
//! automatically. fakefs instead needs the child to install its
//! seccomp filter *before* the tracer has attached (so there is no
//! window where an unfiltered syscall could race the attach), then
//! signal itself stopped so the tracer can `PTRACE_SEIZE` it cleanly
//! and take over from there.

use crate::seccomp;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::ffi::CString;
use std::io;

/// Runs in the child process forked by the tracer. Installs the
/// seccomp filter, stops itself so the tracer can seize it, and then
/// execs `program` with `args`. Never returns on success -- `execvp`
/// replaces the process image; on failure, returns the `io::Error`
/// so the caller can report it and exit nonzero.
pub fn bootstrap(program: &str, args: &[String]) -> io::Result<std::convert::Infallible> {
    install_seccomp_filter()?;

    // Stop ourselves so the tracer's PTRACE_SEIZE + waitpid sees a
    // clean group-stop to attach to, rather than racing against
    // whatever the child does next.
    signal::raise(Signal::SIGSTOP).map_err(|e| io::Error::from_raw_os_error(e as i32))?;

    exec(program, args)
}

fn install_seccomp_filter() -> io::Result<()> {
    let program = seccomp::build_filter().map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    seccompiler::apply_filter(&program).map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
}

fn exec(program: &str, args: &[String]) -> io::Result<std::convert::Infallible> {
    let c_program = CString::new(program).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
    let mut c_args = Vec::with_capacity(args.len() + 1);
    c_args.push(CString::new(program).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?);
    for a in args {
        c_args.push(CString::new(a.as_str()).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?);
    }
    match nix::unistd::execvp(&c_program, &c_args) {
        Ok(_) => unreachable!("execvp only returns on error"),
        Err(e) => Err(io::Error::from_raw_os_error(e as i32)),
    }
}

/// Used by the tracer right after it has finished seizing and setting
/// ptrace options, to let the stopped tracee resume past its own
/// `SIGSTOP` into `execvp`.
pub fn resume_after_seize(tid: Pid) -> io::Result<()> {
    nix::sys::ptrace::cont(tid, None).map_err(|e| io::Error::from_raw_os_error(e as i32))
}
