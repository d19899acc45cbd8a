//! Hook logic (component C5): per-syscall dispatch at the seccomp trap.
//!
//! `rd` never rewrites syscall arguments or results, only records and
//! replays them verbatim, so this module has no direct counterpart
//! there. It's grounded on rd's general "inspect registers, read/write
//! tracee memory, resume" shape (the `Registers`/`AutoRemoteSyscalls`
//! pattern visible in `replay_syscall.rs`), applied to a much smaller
//! job: decide, for each syscall in `kernel_abi::TRACED_SYSCALLS`,
//! whether fakefs needs to touch anything, and if so, how.

use crate::fsop;
use crate::kernel_abi::{self, SupportedArch};
use crate::log::LogLevel::*;
use crate::log;
use crate::memory;
use crate::registers::{self, Registers};
use crate::thread::{ExitAction, ThreadIndex};
use libc::pid_t;
use nix::sys::ptrace;
use std::io;
use std::mem::size_of;

/// How the tracer should resume the thread after the hook has looked
/// at a syscall-entry stop.
pub enum ResumeKind {
    /// Nothing more to do at exit; resume with `PTRACE_CONT` so the
    /// seccomp filter is the only thing that stops us again.
    Cont,
    /// The hook needs to see the matching syscall-exit stop (to patch
    /// a result buffer, or because the real syscall was blocked and a
    /// synthetic result still needs writing); resume with
    /// `PTRACE_SYSCALL`.
    Syscall,
}

fn get_regs(tid: pid_t) -> io::Result<libc::user_regs_struct> {
    ptrace::getregs(nix::unistd::Pid::from_raw(tid)).map_err(|e| io::Error::from_raw_os_error(e as i32))
}

fn set_regs(tid: pid_t, regs: &libc::user_regs_struct) -> io::Result<()> {
    ptrace::setregs(nix::unistd::Pid::from_raw(tid), *regs).map_err(|e| io::Error::from_raw_os_error(e as i32))
}

/// Read a pathname argument out of tracee memory, with the
/// `/proc/self` rewrite applied.
fn read_path(tid: pid_t, addr: usize) -> io::Result<Vec<u8>> {
    let raw = memory::read_cstring(tid, addr)?;
    Ok(memory::rewrite_proc_self(tid, &raw))
}

/// Resolve an `*at`-style `(dfd, filename)` pair to an absolute path
/// fakefs can hand to `fsop`. An absolute `filename` is used as-is; otherwise the path
/// is rooted at `/proc/<tid>/cwd` (for `AT_FDCWD`) or
/// `/proc/<tid>/fd/<dfd>` (for an explicit directory fd), exactly the
/// way rd resolves tracee-relative state through `/proc`
/// elsewhere in the pack.
fn resolve_at_path(tid: pid_t, dfd: i32, filename: &[u8]) -> Vec<u8> {
    if filename.starts_with(b"/") {
        return filename.to_vec();
    }
    let base = if dfd == libc::AT_FDCWD {
        format!("/proc/{}/cwd", tid)
    } else {
        format!("/proc/{}/fd/{}", tid, dfd)
    };
    let mut out = base.into_bytes();
    out.push(b'/');
    out.extend_from_slice(filename);
    out
}

fn block_syscall(regs: &mut libc::user_regs_struct) {
    // An invalid syscall number makes the kernel return -ENOSYS
    // without running anything.
    regs.orig_rax = (-1i64) as u64;
}

/// Called at a `PTRACE_EVENT_SECCOMP` stop. Inspects the syscall the
/// seccomp filter just trapped and either leaves it alone, lets it run
/// but arranges to patch its result, or blocks it outright and
/// synthesizes a result.
pub fn on_syscall_entry(threads: &mut ThreadIndex, tid: pid_t, arch: SupportedArch) -> io::Result<ResumeKind> {
    let Some(mut raw_regs) = get_regs_or_vanished(tid)? else {
        log!(LogInfo, "tid {} vanished before its syscall-entry stop could be read", tid);
        return Ok(ResumeKind::Cont);
    };
    let nr = raw_regs.orig_rax as i64 as i32;

    if let Some(t) = threads.get_mut(tid) {
        t.current_syscall = Some(nr);
    }

    if nr == kernel_abi::SYS_IS_FAKEFS_RUNNING {
        log!(LogDebug, "tid {} probed sys_is_fakefs_running", tid);
        block_syscall(&mut raw_regs);
        if !set_regs_or_vanished(tid, &raw_regs)? {
            log!(LogInfo, "tid {} vanished while blocking sys_is_fakefs_running", tid);
            return Ok(ResumeKind::Cont);
        }
        if let Some(t) = threads.get_mut(tid) {
            t.pending_exit_action = Some(ExitAction::FakeChownResult(0));
        }
        return Ok(ResumeKind::Syscall);
    }

    let regs = Registers::from_ptrace(arch, raw_regs);
    // Every entry_* handler below resolves its own errors
    // pass-through policy: a bad remote pointer is a true internal
    // failure (blocked syscall, synthetic errno, logged at info); a
    // failed override lookup (e.g. an xattr read racing an unlink)
    // mirrors what the real syscall would hit on its own, so the
    // handler just lets it run for real instead (`None`). Nothing here
    // propagates a bare `io::Error` up to the tracer loop.
    let action = match nr {
        n if n == kernel_abi::SYS_STAT => entry_stat(tid, &regs, true),
        n if n == kernel_abi::SYS_LSTAT => entry_stat(tid, &regs, false),
        n if n == kernel_abi::SYS_FSTAT => entry_fstat(tid, &regs),
        n if n == kernel_abi::SYS_NEWFSTATAT => entry_newfstatat(tid, &regs),
        n if n == kernel_abi::SYS_STATX => entry_statx(tid, &regs),
        n if n == kernel_abi::SYS_LISTXATTR => entry_listxattr(tid, &regs, true),
        n if n == kernel_abi::SYS_LLISTXATTR => entry_listxattr(tid, &regs, false),
        n if n == kernel_abi::SYS_FLISTXATTR => entry_flistxattr(tid, &regs),
        n if n == kernel_abi::SYS_CHOWN => entry_chown(tid, &regs, true),
        n if n == kernel_abi::SYS_LCHOWN => entry_chown(tid, &regs, false),
        n if n == kernel_abi::SYS_FCHOWN => entry_fchown(tid, &regs),
        n if n == kernel_abi::SYS_FCHOWNAT => entry_fchownat(tid, &regs),
        _ => None,
    };

    match action {
        None => Ok(ResumeKind::Cont),
        Some(ExitAction::FakeChownResult(result)) => {
            let Some(mut raw_regs) = get_regs_or_vanished(tid)? else {
                log!(LogInfo, "tid {} vanished before its blocked-syscall result could be queued", tid);
                return Ok(ResumeKind::Cont);
            };
            block_syscall(&mut raw_regs);
            if !set_regs_or_vanished(tid, &raw_regs)? {
                log!(LogInfo, "tid {} vanished while blocking its syscall", tid);
                return Ok(ResumeKind::Cont);
            }
            if let Some(t) = threads.get_mut(tid) {
                t.pending_exit_action = Some(ExitAction::FakeChownResult(result));
            }
            Ok(ResumeKind::Syscall)
        }
        Some(pending) => {
            if let Some(t) = threads.get_mut(tid) {
                t.pending_exit_action = Some(pending);
            }
            Ok(ResumeKind::Syscall)
        }
    }
}

/// `true` if `e` is the kind of ptrace/memory-access error a thread
/// dying out from under the hook produces -- routine under concurrent
/// clone/fork/exit churn (spec.md §7's "ptrace transient errors ...
/// swallowed"), not a bug to propagate.
fn is_transient_ptrace_error(e: &io::Error) -> bool {
    e.raw_os_error() == Some(libc::ESRCH)
}

/// `get_regs`, but a vanished thread (`ESRCH`) comes back as `Ok(None)`
/// instead of propagating -- the caller decides how to resume (usually
/// `ResumeKind::Cont`, since there is nothing left to act on).
fn get_regs_or_vanished(tid: pid_t) -> io::Result<Option<libc::user_regs_struct>> {
    match get_regs(tid) {
        Ok(regs) => Ok(Some(regs)),
        Err(e) if is_transient_ptrace_error(&e) => Ok(None),
        Err(e) => Err(e),
    }
}

/// `set_regs`, but a vanished thread (`ESRCH`) comes back as `Ok(false)`
/// instead of propagating.
fn set_regs_or_vanished(tid: pid_t, regs: &libc::user_regs_struct) -> io::Result<bool> {
    match set_regs(tid, regs) {
        Ok(()) => Ok(true),
        Err(e) if is_transient_ptrace_error(&e) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Called at the matching `SIGTRAP|0x80` syscall-exit stop. Consumes
/// whatever `on_syscall_entry` queued for this thread and patches
/// registers/memory accordingly.
pub fn on_syscall_exit(threads: &mut ThreadIndex, tid: pid_t) -> io::Result<()> {
    let pending = match threads.get_mut(tid) {
        Some(t) => t.pending_exit_action.take(),
        None => None,
    };
    let Some(action) = pending else {
        return Ok(());
    };

    let result = match action {
        ExitAction::FakeChownResult(result) => apply_fake_result(tid, result),
        ExitAction::PatchStat { buf_addr, uid, gid } => patch_stat_buffer(tid, buf_addr, uid, gid),
        ExitAction::PatchStatx { buf_addr, uid, gid } => patch_statx_buffer(tid, buf_addr, uid, gid),
        ExitAction::FilterListxattr { list_addr, requested_size } => {
            filter_listxattr_result(tid, list_addr, requested_size)
        }
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) if is_transient_ptrace_error(&e) => {
            log!(
                LogInfo,
                "tid {} vanished before its syscall-exit patch could be applied; dropping it",
                tid
            );
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn apply_fake_result(tid: pid_t, result: isize) -> io::Result<()> {
    let mut raw_regs = get_regs(tid)?;
    raw_regs.rax = result as i64 as u64;
    set_regs(tid, &raw_regs)
}

fn patch_stat_buffer(tid: pid_t, addr: usize, uid: u32, gid: u32) -> io::Result<()> {
    if real_syscall_failed(tid)? {
        // The real stat/fstat/newfstatat call this let through failed on
        // its own (e.g. a TOCTOU ENOENT) -- the kernel never filled in
        // `addr`, so there is nothing here to patch.
        return Ok(());
    }
    let mut buf = memory::read_mem(tid, addr, size_of::<libc::stat>())?;
    let ptr = buf.as_mut_ptr() as *mut libc::stat;
    let mut st = unsafe { ptr.read_unaligned() };
    st.st_uid = uid;
    st.st_gid = gid;
    unsafe { ptr.write_unaligned(st) };
    memory::write_mem(tid, addr, &buf)
}

fn patch_statx_buffer(tid: pid_t, addr: usize, uid: Option<u32>, gid: Option<u32>) -> io::Result<()> {
    if real_syscall_failed(tid)? {
        return Ok(());
    }
    let mut buf = memory::read_mem(tid, addr, size_of::<libc::statx>())?;
    let ptr = buf.as_mut_ptr() as *mut libc::statx;
    let mut stx = unsafe { ptr.read_unaligned() };
    if let Some(uid) = uid {
        stx.stx_uid = uid;
    }
    if let Some(gid) = gid {
        stx.stx_gid = gid;
    }
    unsafe { ptr.write_unaligned(stx) };
    memory::write_mem(tid, addr, &buf)
}

/// `true` if the real (non-blocked) syscall this `PatchStat`/`PatchStatx`
/// action is patching the result of came back negative in `rax` -- the
/// same check `filter_listxattr_result` already makes before touching
/// its own buffer.
fn real_syscall_failed(tid: pid_t) -> io::Result<bool> {
    Ok((get_regs(tid)?.rax as i64) < 0)
}

/// Reads back the real `listxattr`-family result, strips
/// `fsop::XATTR_NAME` out of it, and rewrites both the buffer and the
/// return-value register to match. When `requested_size` is `0` the kernel treats the
/// call as a size query and the buffer is untouched -- only the
/// returned length needs adjusting.
fn filter_listxattr_result(tid: pid_t, list_addr: usize, requested_size: usize) -> io::Result<()> {
    let mut raw_regs = get_regs(tid)?;
    let result = raw_regs.rax as i64;
    if result < 0 {
        // The real call failed; nothing to filter.
        return Ok(());
    }
    let written = result as usize;

    if requested_size == 0 {
        // Size query: subtract the space our attribute's name would
        // have taken (name plus its NUL terminator).
        let shrink = fsop::XATTR_NAME.len() + 1;
        raw_regs.rax = written.saturating_sub(shrink) as u64;
        set_regs(tid, &raw_regs)
    } else {
        let raw = memory::read_mem(tid, list_addr, written)?;
        let filtered = fsop::filter_xattr_list(&raw);
        memory::write_mem(tid, list_addr, &filtered)?;
        raw_regs.rax = filtered.len() as u64;
        set_regs(tid, &raw_regs)
    }
}

/// Read a path argument out of tracee memory, or translate the failure
/// into the blocked-syscall action the caller should return immediately
///.
fn read_path_or_block(tid: pid_t, addr: usize) -> Result<Vec<u8>, ExitAction> {
    read_path(tid, addr).map_err(|e| {
        let errno = errno_of(&e);
        log!(
            LogInfo,
            "tid {}: failed to read pathname from tracee memory: {} ({})",
            tid,
            e,
            crate::kernel_metadata::errno_name(errno)
        );
        ExitAction::FakeChownResult(-errno as isize)
    })
}

/// Unwrap an override lookup, treating any I/O error as "no override"
/// rather than propagating it: a lookup failing (e.g. racing an
/// unlink) mirrors what the real syscall would hit on its own, so the
/// hook just lets it run for real instead of crashing the tracer.
fn lookup_or_passthrough<T>(tid: pid_t, what: &str, result: io::Result<T>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            log!(LogInfo, "tid {}: {} lookup failed ({}), passing through", tid, what, e);
            None
        }
    }
}

fn entry_stat(tid: pid_t, regs: &Registers, follow_symlinks: bool) -> Option<ExitAction> {
    let args = registers::parse_stat_args(regs);
    let filename = match read_path_or_block(tid, args.filename) {
        Ok(p) => p,
        Err(blocked) => return Some(blocked),
    };
    let path = resolve_at_path(tid, libc::AT_FDCWD, &filename);
    let over = lookup_or_passthrough(tid, "stat", fsop::override_uid_gid(&path, follow_symlinks))?;
    over.map(|(uid, gid)| ExitAction::PatchStat { buf_addr: args.stat_buf, uid, gid })
}

fn entry_fstat(tid: pid_t, regs: &Registers) -> Option<ExitAction> {
    let args = registers::parse_fstat_args(regs);
    let over = lookup_or_passthrough(tid, "fstat", fsop::override_uid_gid_fd(tid, args.fd))?;
    over.map(|(uid, gid)| ExitAction::PatchStat { buf_addr: args.stat_buf, uid, gid })
}

fn entry_newfstatat(tid: pid_t, regs: &Registers) -> Option<ExitAction> {
    let args = registers::parse_newfstatat_args(regs);
    let filename = match read_path_or_block(tid, args.filename) {
        Ok(p) => p,
        Err(blocked) => return Some(blocked),
    };
    let path = resolve_at_path(tid, args.dfd, &filename);
    let follow_symlinks = args.flags & libc::AT_SYMLINK_NOFOLLOW == 0;
    let over = lookup_or_passthrough(tid, "newfstatat", fsop::override_uid_gid(&path, follow_symlinks))?;
    over.map(|(uid, gid)| ExitAction::PatchStat { buf_addr: args.stat_buf, uid, gid })
}

fn entry_statx(tid: pid_t, regs: &Registers) -> Option<ExitAction> {
    let args = registers::parse_statx_args(regs);
    let filename = match read_path_or_block(tid, args.filename) {
        Ok(p) => p,
        Err(blocked) => return Some(blocked),
    };
    let path = resolve_at_path(tid, args.dfd, &filename);
    let follow_symlinks = args.flags & libc::AT_SYMLINK_NOFOLLOW == 0;
    let over = lookup_or_passthrough(tid, "statx", fsop::override_uid_gid(&path, follow_symlinks))?;
    over.map(|(uid, gid)| ExitAction::PatchStatx {
        buf_addr: args.statx_buf,
        uid: (args.mask & libc::STATX_UID != 0).then_some(uid),
        gid: (args.mask & libc::STATX_GID != 0).then_some(gid),
    })
}

fn entry_listxattr(tid: pid_t, regs: &Registers, follow_symlinks: bool) -> Option<ExitAction> {
    let args = registers::parse_listxattr_args(regs);
    let filename = match read_path_or_block(tid, args.path) {
        Ok(p) => p,
        Err(blocked) => return Some(blocked),
    };
    let path = resolve_at_path(tid, libc::AT_FDCWD, &filename);
    let has = lookup_or_passthrough(tid, "listxattr", fsop::has_override(&path, follow_symlinks))?;
    has.then_some(ExitAction::FilterListxattr { list_addr: args.list, requested_size: args.size })
}

fn entry_flistxattr(tid: pid_t, regs: &Registers) -> Option<ExitAction> {
    let args = registers::parse_flistxattr_args(regs);
    let has = lookup_or_passthrough(tid, "flistxattr", fsop::fhas_override(tid, args.fd))?;
    has.then_some(ExitAction::FilterListxattr { list_addr: args.list, requested_size: args.size })
}

fn real_owner(path: &[u8], follow_symlinks: bool) -> io::Result<(u32, u32)> {
    let c_path = std::ffi::CString::new(path).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    let rc = unsafe {
        if follow_symlinks {
            libc::stat(c_path.as_ptr(), &mut st)
        } else {
            libc::lstat(c_path.as_ptr(), &mut st)
        }
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok((st.st_uid, st.st_gid))
}

fn entry_chown(tid: pid_t, regs: &Registers, follow_symlinks: bool) -> Option<ExitAction> {
    let args = registers::parse_chown_args(regs);
    let filename = match read_path_or_block(tid, args.filename) {
        Ok(p) => p,
        Err(blocked) => return Some(blocked),
    };
    let path = resolve_at_path(tid, libc::AT_FDCWD, &filename);
    let (real_uid, real_gid) = real_owner(&path, follow_symlinks).unwrap_or((0, 0));
    Some(chown_result(fsop::chown_by_path(
        &path,
        args.user,
        args.group,
        real_uid,
        real_gid,
        follow_symlinks,
    )))
}

fn entry_fchown(tid: pid_t, regs: &Registers) -> Option<ExitAction> {
    let args = registers::parse_fchown_args(regs);
    let path = fsop_fd_real_owner_path(tid, args.fd);
    let (real_uid, real_gid) = real_owner(&path, true).unwrap_or((0, 0));
    Some(chown_result(fsop::chown_by_fd(
        tid, args.fd, args.user, args.group, real_uid, real_gid,
    )))
}

fn entry_fchownat(tid: pid_t, regs: &Registers) -> Option<ExitAction> {
    let args = registers::parse_fchownat_args(regs);
    let filename = match read_path_or_block(tid, args.filename) {
        Ok(p) => p,
        Err(blocked) => return Some(blocked),
    };
    let path = resolve_at_path(tid, args.dfd, &filename);
    let follow_symlinks = args.flag & libc::AT_SYMLINK_NOFOLLOW == 0;
    let (real_uid, real_gid) = real_owner(&path, follow_symlinks).unwrap_or((0, 0));
    Some(chown_result(fsop::chown_by_path(
        &path,
        args.user,
        args.group,
        real_uid,
        real_gid,
        follow_symlinks,
    )))
}

/// Backend I/O errors surface to the tracee as `-errno`: a successful
/// write becomes a `0` return, a failure its errno, negated. An error
/// with no real errno behind it (shouldn't happen for anything this
/// module calls, but the backend is not proof against it) is coerced
/// to `ENOTRECOVERABLE` and logged at error level rather than silently
/// guessed at.
fn chown_result(result: io::Result<()>) -> ExitAction {
    match result {
        Ok(()) => ExitAction::FakeChownResult(0),
        Err(e) => {
            if e.raw_os_error().is_none() {
                log!(LogError, "chown backend returned a non-errno failure: {}", e);
            }
            ExitAction::FakeChownResult(-errno_of(&e) as isize)
        }
    }
}

fn fsop_fd_real_owner_path(tid: pid_t, fd: i32) -> Vec<u8> {
    format!("/proc/{}/fd/{}", tid, fd).into_bytes()
}

fn errno_of(e: &io::Error) -> i32 {
    e.raw_os_error().unwrap_or(libc::ENOTRECOVERABLE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_at_path_leaves_absolute_paths_alone() {
        assert_eq!(resolve_at_path(1234, libc::AT_FDCWD, b"/etc/passwd"), b"/etc/passwd");
    }

    #[test]
    fn resolve_at_path_roots_relative_paths_at_tracee_cwd() {
        assert_eq!(
            resolve_at_path(1234, libc::AT_FDCWD, b"foo"),
            b"/proc/1234/cwd/foo"
        );
    }

    #[test]
    fn resolve_at_path_roots_relative_paths_at_explicit_dfd() {
        assert_eq!(resolve_at_path(1234, 5, b"foo"), b"/proc/1234/fd/5/foo");
    }
}
