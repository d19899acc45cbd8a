//! `fakefs` entry point.
//!
//! Argument handling is deliberately minimal -- a general CLI-parsing
//! framework is out of scope -- but the `main` -> `io::Result<()>` ->
//! process-exit-code shape mirrors rd's own
//! `commands::RdCommand::run` convention (`commands/mod.rs`) rather
//! than unwrapping errors directly in `main`.

#[macro_use]
extern crate lazy_static;

mod fsop;
mod hook;
mod kernel_abi;
mod kernel_metadata;
#[macro_use]
mod log;
mod memory;
mod registers;
mod seccomp;
mod thread;
mod tracee;
mod tracer;

use log::LogLevel::*;
use nix::unistd::{fork, ForkResult};
use std::io;
use std::process::ExitCode;

fn usage() -> ! {
    eprintln!("usage: fakefs [--tracee] <program> [args...]");
    std::process::exit(2);
}

fn main() -> ExitCode {
    let argv: Vec<String> = std::env::args().collect();
    let mut rest = &argv[1..];

    let is_tracee = match rest.first() {
        Some(flag) if flag == "--tracee" => {
            rest = &rest[1..];
            true
        }
        _ => false,
    };

    let Some((program, args)) = rest.split_first() else {
        usage();
    };

    let result = if is_tracee {
        run_as_tracee(program, args)
    } else {
        run_as_tracer(program, args)
    };

    match result {
        Ok(code) => exit_code(code),
        Err(e) => {
            log!(LogError, "fakefs: {}", e);
            ExitCode::from(1)
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from((code & 0xff) as u8)
}

/// This process *is* the tracee half of the two-process design: install
/// the seccomp filter, stop for the tracer to seize, then exec the real
/// program. Reached when a parent fakefs process re-execs itself with
/// `--tracee` after forking.
fn run_as_tracee(program: &str, args: &[String]) -> io::Result<i32> {
    match tracee::bootstrap(program, args) {
        Ok(_unreachable) => unreachable!(),
        Err(e) => Err(e),
    }
}

/// This process is the tracer half: fork a child that re-execs
/// `fakefs --tracee <program> <args...>`, seize it, and run the C4
/// wait loop until it exits.
fn run_as_tracer(program: &str, args: &[String]) -> io::Result<i32> {
    let self_exe = std::env::current_exe()?;

    match unsafe { fork() }.map_err(|e| io::Error::from_raw_os_error(e as i32))? {
        ForkResult::Child => {
            let mut exec_args = vec![
                self_exe.to_string_lossy().into_owned(),
                "--tracee".to_string(),
                program.to_string(),
            ];
            exec_args.extend(args.iter().cloned());

            let c_exe = std::ffi::CString::new(self_exe.to_string_lossy().into_owned())
                .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
            let c_args: Vec<std::ffi::CString> = exec_args
                .iter()
                .map(|s| std::ffi::CString::new(s.as_str()).unwrap())
                .collect();

            match nix::unistd::execv(&c_exe, &c_args) {
                Ok(_) => unreachable!(),
                Err(e) => {
                    log!(LogError, "failed to re-exec self as tracee: {}", e);
                    std::process::exit(127);
                }
            }
        }
        ForkResult::Parent { child } => {
            // tracer::run's own wait loop reaps every descendant,
            // including `child`, as part of classifying their stops.
            tracer::run(child)
        }
    }
}
