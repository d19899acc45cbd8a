//! Stringifiers for errno, ptrace request, and ptrace event values.
//!
//! Grounded on rd's `kernel_metadata` module, which is a very
//! large table of `*_name()` functions used throughout `rd`'s logging.
//! fakefs's tracer loop and hook only ever need to print three of those
//! tables -- errno, the `PTRACE_EVENT_*` constants that
//! `PTRACE_O_TRACE*` delivers, and the `PTRACE_*` request codes used in
//! the handful of ptrace calls the tracer issues -- so this keeps the
//! one-name-per-constant style but drops the syscall-argument
//! pretty-printers (those live in `kernel_abi`) and the signal-name
//! table entirely: fakefs never interprets tracee-delivered signals
//! beyond forwarding them.

pub fn errno_name(err: i32) -> String {
    if err == 0 {
        return "SUCCESS".to_string();
    }
    match err {
        libc::EPERM => "EPERM",
        libc::ENOENT => "ENOENT",
        libc::ESRCH => "ESRCH",
        libc::EINTR => "EINTR",
        libc::EIO => "EIO",
        libc::ENXIO => "ENXIO",
        libc::EBADF => "EBADF",
        libc::EAGAIN => "EAGAIN",
        libc::ENOMEM => "ENOMEM",
        libc::EACCES => "EACCES",
        libc::EFAULT => "EFAULT",
        libc::EEXIST => "EEXIST",
        libc::ENODEV => "ENODEV",
        libc::ENOTDIR => "ENOTDIR",
        libc::EISDIR => "EISDIR",
        libc::EINVAL => "EINVAL",
        libc::ENFILE => "ENFILE",
        libc::EMFILE => "EMFILE",
        libc::ENOSPC => "ENOSPC",
        libc::ERANGE => "ERANGE",
        libc::ENOSYS => "ENOSYS",
        libc::ENOTEMPTY => "ENOTEMPTY",
        libc::ELOOP => "ELOOP",
        libc::ENODATA => "ENODATA",
        libc::ENOTSUP => "ENOTSUP",
        _ => return format!("UNKNOWN_ERRNO[{}]", err),
    }
    .to_string()
}

/// `PTRACE_EVENT_*` values, as delivered in the high byte of a
/// `SIGTRAP`-stop's `wstatus` (`status >> 8`).
pub fn ptrace_event_name(event: i32) -> String {
    match event {
        libc::PTRACE_EVENT_FORK => "PTRACE_EVENT_FORK",
        libc::PTRACE_EVENT_VFORK => "PTRACE_EVENT_VFORK",
        libc::PTRACE_EVENT_CLONE => "PTRACE_EVENT_CLONE",
        libc::PTRACE_EVENT_EXEC => "PTRACE_EVENT_EXEC",
        libc::PTRACE_EVENT_VFORK_DONE => "PTRACE_EVENT_VFORK_DONE",
        libc::PTRACE_EVENT_EXIT => "PTRACE_EVENT_EXIT",
        libc::PTRACE_EVENT_SECCOMP => "PTRACE_EVENT_SECCOMP",
        libc::PTRACE_EVENT_STOP => "PTRACE_EVENT_STOP",
        0 => "PTRACE_EVENT_NONE",
        _ => return format!("PTRACE_EVENT_UNKNOWN[{}]", event),
    }
    .to_string()
}

/// `PTRACE_*` request codes, for the ones fakefs's tracer actually
/// issues.
pub fn ptrace_req_name(request: i32) -> String {
    match request {
        libc::PTRACE_SEIZE => "PTRACE_SEIZE",
        libc::PTRACE_SETOPTIONS => "PTRACE_SETOPTIONS",
        libc::PTRACE_CONT => "PTRACE_CONT",
        libc::PTRACE_SYSCALL => "PTRACE_SYSCALL",
        libc::PTRACE_LISTEN => "PTRACE_LISTEN",
        libc::PTRACE_GETREGS => "PTRACE_GETREGS",
        libc::PTRACE_SETREGS => "PTRACE_SETREGS",
        libc::PTRACE_GETEVENTMSG => "PTRACE_GETEVENTMSG",
        libc::PTRACE_KILL => "PTRACE_KILL",
        libc::PTRACE_DETACH => "PTRACE_DETACH",
        _ => return format!("PTRACE_REQUEST_UNKNOWN[{}]", request),
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_errno_stringifies() {
        assert_eq!(errno_name(libc::ENOENT), "ENOENT");
        assert_eq!(errno_name(0), "SUCCESS");
    }

    #[test]
    fn unknown_errno_falls_back() {
        assert_eq!(errno_name(99999), "UNKNOWN_ERRNO[99999]");
    }

    #[test]
    fn known_ptrace_event_stringifies() {
        assert_eq!(
            ptrace_event_name(libc::PTRACE_EVENT_SECCOMP),
            "PTRACE_EVENT_SECCOMP"
        );
    }

    #[test]
    fn known_ptrace_request_stringifies() {
        assert_eq!(ptrace_req_name(libc::PTRACE_SEIZE), "PTRACE_SEIZE");
    }
}
