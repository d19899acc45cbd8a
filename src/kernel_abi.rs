//! Syscall-name table & ABI accessors (component C1).
//!
//! rd's `kernel_abi` module is a full per-architecture syscall
//! ABI layer shared between recording and replay of arbitrary programs.
//! fakefs only ever runs on the architecture it was compiled for (the
//! reference implementation targets x86-64), so this is
//! collapsed to a single static table rather than rd's
//! x86/x64-union dispatch -- but the shape (a name table plus a
//! `SupportedArch` tag threaded through the register/argument types) is
//! kept so a second architecture could be added the way rd adds
//! one, by introducing a second arm rather than restructuring callers.

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SupportedArch {
    X64,
}

pub const RD_NATIVE_ARCH: SupportedArch = SupportedArch::X64;

/// The made-up syscall number fakefs answers itself: "am I being traced
/// by fakefs?".
pub const SYS_IS_FAKEFS_RUNNING: i32 = 1_000_042;

/// Sentinel value for the 6th syscall argument that makes the seccomp
/// filter step aside entirely.
pub const BACKDOOR_KEY: u64 = 0x2022_1107;

macro_rules! syscall_table {
    ($($name:ident = $nr:expr),+ $(,)?) => {
        $(pub const $name: i32 = $nr;)+

        fn syscall_name_x64(nr: i32) -> Option<&'static str> {
            match nr {
                $($nr => Some(stringify!($name)),)+
                _ => None,
            }
        }
    };
}

// x86-64 syscall numbers for the calls fakefs's seccomp filter traces
//, plus a handful of
// neighbors used for classification and logging. Numbers taken from the
// stable x86-64 syscall ABI (arch/x86/entry/syscalls/syscall_64.tbl).
syscall_table! {
    SYS_STAT = 4,
    SYS_FSTAT = 5,
    SYS_LSTAT = 6,
    SYS_CHOWN = 92,
    SYS_FCHOWN = 93,
    SYS_LCHOWN = 94,
    SYS_LISTXATTR = 194,
    SYS_LLISTXATTR = 195,
    SYS_FLISTXATTR = 196,
    SYS_EXECVE = 59,
    SYS_FCHOWNAT = 260,
    SYS_NEWFSTATAT = 262,
    SYS_STATX = 332,
}

/// Stringify a syscall number the way rd's `kernel_metadata`
/// module does, falling back to `unknown_syscall[<n>]` for numbers the
/// table doesn't recognize.
pub fn syscall_name(nr: i32, arch: SupportedArch) -> String {
    match arch {
        SupportedArch::X64 => match syscall_name_x64(nr) {
            Some(name) => name.to_ascii_lowercase(),
            None if nr == SYS_IS_FAKEFS_RUNNING => "sys_is_fakefs_running".to_string(),
            None => format!("unknown_syscall[{}]", nr),
        },
    }
}

/// The syscalls the seccomp filter requests `TRACE` for.
pub const TRACED_SYSCALLS: &[i32] = &[
    SYS_STAT,
    SYS_FSTAT,
    SYS_LSTAT,
    SYS_STATX,
    SYS_NEWFSTATAT,
    SYS_LISTXATTR,
    SYS_LLISTXATTR,
    SYS_FLISTXATTR,
    SYS_CHOWN,
    SYS_LCHOWN,
    SYS_FCHOWN,
    SYS_FCHOWNAT,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_syscalls_stringify() {
        assert_eq!(syscall_name(SYS_FCHOWNAT, SupportedArch::X64), "sys_fchownat");
        assert_eq!(syscall_name(SYS_STATX, SupportedArch::X64), "sys_statx");
    }

    #[test]
    fn fakefs_probe_stringifies() {
        assert_eq!(
            syscall_name(SYS_IS_FAKEFS_RUNNING, SupportedArch::X64),
            "sys_is_fakefs_running"
        );
    }

    #[test]
    fn unknown_syscall_falls_back() {
        assert_eq!(syscall_name(999_999, SupportedArch::X64), "unknown_syscall[999999]");
    }

    #[test]
    fn traced_set_matches_policy() {
        for nr in TRACED_SYSCALLS {
            assert!(!syscall_name(*nr, SupportedArch::X64).starts_with("unknown"));
        }
    }
}
