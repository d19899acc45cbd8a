//! Logging facility for fakefs.
//!
//! Deliberately not built on the `log`/`tracing` crates: like `rd`,
//! which this is modeled on, fakefs carries its own tiny line-buffered
//! logger so that `fatal!` can unconditionally dump a backtrace and abort
//! without depending on a particular logging backend being installed.

use backtrace::Backtrace;
use std::io::{self, Write};
use std::sync::Mutex;

#[derive(Copy, Clone, Eq, PartialEq, PartialOrd, Debug)]
pub enum LogLevel {
    LogFatal,
    LogError,
    LogWarn,
    LogInfo,
    LogDebug,
}

pub use LogLevel::*;

struct LogGlobals {
    level: LogLevel,
    sink: Box<dyn Write + Send>,
}

lazy_static! {
    static ref LOG_GLOBALS: Mutex<LogGlobals> = Mutex::new(init_log_globals());
}

fn init_log_globals() -> LogGlobals {
    let level = match std::env::var("FAKEFS_LOG") {
        Ok(v) => parse_level(&v).unwrap_or(LogWarn),
        Err(_) => LogWarn,
    };

    let sink: Box<dyn Write + Send> = match std::env::var("FAKEFS_LOG_FILE") {
        Ok(path) => match std::fs::OpenOptions::new().create(true).append(true).open(&path) {
            Ok(f) => Box::new(f),
            Err(_) => Box::new(io::stderr()),
        },
        Err(_) => Box::new(io::stderr()),
    };

    LogGlobals { level, sink }
}

fn parse_level(s: &str) -> Option<LogLevel> {
    match s.to_ascii_lowercase().as_str() {
        "fatal" => Some(LogFatal),
        "error" => Some(LogError),
        "warn" => Some(LogWarn),
        "info" => Some(LogInfo),
        "debug" => Some(LogDebug),
        _ => None,
    }
}

fn level_name(level: LogLevel) -> &'static str {
    match level {
        LogFatal => "FATAL",
        LogError => "ERROR",
        LogWarn => "WARN",
        LogInfo => "INFO",
        LogDebug => "DEBUG",
    }
}

/// Returns true if a message at `level` would actually be written, so
/// call sites can skip formatting work for suppressed log lines.
pub fn enabled(level: LogLevel) -> bool {
    let g = LOG_GLOBALS.lock().unwrap();
    level == LogFatal || level <= g.level
}

#[doc(hidden)]
pub fn write_line(level: LogLevel, filename: &str, line: u32, message: &str) {
    let mut g = LOG_GLOBALS.lock().unwrap();
    if level != LogFatal && level > g.level {
        return;
    }
    let _ = if level <= LogError {
        writeln!(g.sink, "[{}] {}:{} {}", level_name(level), filename, line, message)
    } else {
        writeln!(g.sink, "[{}] {}", level_name(level), message)
    };
    let _ = g.sink.flush();
}

/// Dump a backtrace to stderr before aborting. Called by `fatal!`.
pub fn notifying_abort(bt: Backtrace) -> ! {
    let _ = writeln!(io::stderr(), "=== fakefs fatal error, backtrace:");
    let _ = writeln!(io::stderr(), "{:?}", bt);
    std::process::abort();
}

#[macro_export]
macro_rules! log {
    ($level:expr, $($args:tt)*) => {{
        if $crate::log::enabled($level) {
            $crate::log::write_line($level, file!(), line!(), &format!($($args)*));
        }
    }};
}

/// Logs at `LogFatal` and aborts the process with a backtrace. Used for
/// invariant violations the tracer cannot recover from, such as a
/// wait-stop that doesn't match any classified case.
#[macro_export]
macro_rules! fatal {
    ($($args:tt)+) => {{
        $crate::log::write_line($crate::log::LogFatal, file!(), line!(), &format!($($args)+));
        $crate::log::notifying_abort(backtrace::Backtrace::new());
    }};
}
