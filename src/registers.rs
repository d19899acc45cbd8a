//! Register snapshot and per-syscall argument accessors (component C1).
//!
//! Modeled on rd's `Registers` type: a thin wrapper that turns
//! the raw ptrace register struct into named accessors, so the rest of
//! the tracer never pokes at `orig_rax` or `rdi` directly. rd
//! carries an x86/x64 union plus `get_ptrace`/`convert_x86` conversion
//! helpers because `rd` records and replays both 32- and 64-bit
//! tracees; fakefs only targets x86-64, so this wraps
//! `libc::user_regs_struct` directly instead of a union of
//! architectures, and drops the cross-arch conversion machinery rd
//! needs and fakefs does not.

use crate::kernel_abi::SupportedArch;
use libc::user_regs_struct;

#[derive(Copy, Clone)]
pub struct Registers {
    arch_: SupportedArch,
    regs: user_regs_struct,
}

impl Registers {
    pub fn from_ptrace(arch: SupportedArch, regs: user_regs_struct) -> Registers {
        Registers { arch_: arch, regs }
    }

    pub fn arch(&self) -> SupportedArch {
        self.arch_
    }

    pub fn get_ptrace(&self) -> user_regs_struct {
        self.regs
    }

    pub fn get_ptrace_mut(&mut self) -> &mut user_regs_struct {
        &mut self.regs
    }

    /// The syscall number the kernel is currently dispatching. After the
    /// hook sets `orig_rax` to an invalid number, this reflects the mutated value until the next
    /// syscall-entry stop.
    pub fn syscallno(&self) -> isize {
        self.regs.orig_rax as i64 as isize
    }

    pub fn set_syscallno(&mut self, syscallno: isize) {
        self.regs.orig_rax = syscallno as i64 as u64;
    }

    /// Value in `rax` -- the return value once we're past syscall-exit,
    /// or the raw syscall number while still at syscall-entry.
    pub fn syscall_result(&self) -> usize {
        self.regs.rax as usize
    }

    pub fn syscall_result_signed(&self) -> isize {
        self.regs.rax as i64 as isize
    }

    pub fn set_syscall_result(&mut self, result: usize) {
        self.regs.rax = result as u64;
    }

    pub fn set_syscall_result_signed(&mut self, result: isize) {
        self.regs.rax = result as i64 as u64;
    }

    pub fn ip(&self) -> usize {
        self.regs.rip as usize
    }

    pub fn sp(&self) -> usize {
        self.regs.rsp as usize
    }

    pub fn flags(&self) -> usize {
        self.regs.eflags as usize
    }

    pub fn set_flags(&mut self, value: usize) {
        self.regs.eflags = value as u64;
    }

    pub fn arg1(&self) -> usize {
        self.regs.rdi as usize
    }
    pub fn arg2(&self) -> usize {
        self.regs.rsi as usize
    }
    pub fn arg3(&self) -> usize {
        self.regs.rdx as usize
    }
    pub fn arg4(&self) -> usize {
        self.regs.r10 as usize
    }
    pub fn arg5(&self) -> usize {
        self.regs.r8 as usize
    }
    pub fn arg6(&self) -> usize {
        self.regs.r9 as usize
    }

    pub fn arg1_signed(&self) -> isize {
        self.regs.rdi as i64 as isize
    }
    pub fn arg3_signed(&self) -> isize {
        self.regs.rdx as i64 as isize
    }
    pub fn arg5_signed(&self) -> isize {
        self.regs.r8 as i64 as isize
    }
}

// Argument structs for the syscalls the hook intercepts. Each is a pure projection over the
// platform calling convention: rdi, rsi, rdx, r10, r8, r9.

#[derive(Copy, Clone, Debug)]
pub struct StatArgs {
    pub filename: usize,
    pub stat_buf: usize,
}

pub fn parse_stat_args(regs: &Registers) -> StatArgs {
    StatArgs {
        filename: regs.arg1(),
        stat_buf: regs.arg2(),
    }
}

#[derive(Copy, Clone, Debug)]
pub struct FstatArgs {
    pub fd: i32,
    pub stat_buf: usize,
}

pub fn parse_fstat_args(regs: &Registers) -> FstatArgs {
    FstatArgs {
        fd: regs.arg1_signed() as i32,
        stat_buf: regs.arg2(),
    }
}

#[derive(Copy, Clone, Debug)]
pub struct NewfstatatArgs {
    pub dfd: i32,
    pub filename: usize,
    pub stat_buf: usize,
    pub flags: i32,
}

pub fn parse_newfstatat_args(regs: &Registers) -> NewfstatatArgs {
    NewfstatatArgs {
        dfd: regs.arg1_signed() as i32,
        filename: regs.arg2(),
        stat_buf: regs.arg3(),
        flags: regs.arg4() as i32,
    }
}

#[derive(Copy, Clone, Debug)]
pub struct StatxArgs {
    pub dfd: i32,
    pub filename: usize,
    pub flags: i32,
    pub mask: u32,
    pub statx_buf: usize,
}

pub fn parse_statx_args(regs: &Registers) -> StatxArgs {
    StatxArgs {
        dfd: regs.arg1_signed() as i32,
        filename: regs.arg2(),
        flags: regs.arg3() as i32,
        mask: regs.arg4() as u32,
        statx_buf: regs.arg5(),
    }
}

#[derive(Copy, Clone, Debug)]
pub struct ListxattrArgs {
    pub path: usize,
    pub list: usize,
    pub size: usize,
}

pub fn parse_listxattr_args(regs: &Registers) -> ListxattrArgs {
    ListxattrArgs {
        path: regs.arg1(),
        list: regs.arg2(),
        size: regs.arg3(),
    }
}

#[derive(Copy, Clone, Debug)]
pub struct FlistxattrArgs {
    pub fd: i32,
    pub list: usize,
    pub size: usize,
}

pub fn parse_flistxattr_args(regs: &Registers) -> FlistxattrArgs {
    FlistxattrArgs {
        fd: regs.arg1_signed() as i32,
        list: regs.arg2(),
        size: regs.arg3(),
    }
}

#[derive(Copy, Clone, Debug)]
pub struct ChownArgs {
    pub filename: usize,
    pub user: i32,
    pub group: i32,
}

pub fn parse_chown_args(regs: &Registers) -> ChownArgs {
    ChownArgs {
        filename: regs.arg1(),
        user: regs.arg2() as i32,
        group: regs.arg3() as i32,
    }
}

#[derive(Copy, Clone, Debug)]
pub struct FchownArgs {
    pub fd: i32,
    pub user: i32,
    pub group: i32,
}

pub fn parse_fchown_args(regs: &Registers) -> FchownArgs {
    FchownArgs {
        fd: regs.arg1_signed() as i32,
        user: regs.arg2() as i32,
        group: regs.arg3() as i32,
    }
}

/// Kernel ABI order for `fchownat` is `(dfd, filename, user, group, flag)`.
#[derive(Copy, Clone, Debug)]
pub struct FchownatArgs {
    pub dfd: i32,
    pub filename: usize,
    pub user: i32,
    pub group: i32,
    pub flag: i32,
}

pub fn parse_fchownat_args(regs: &Registers) -> FchownatArgs {
    FchownatArgs {
        dfd: regs.arg1_signed() as i32,
        filename: regs.arg2(),
        user: regs.arg3() as i32,
        group: regs.arg4() as i32,
        flag: regs.arg5() as i32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::zeroed;

    fn regs_with_args(a1: u64, a2: u64, a3: u64, a4: u64, a5: u64) -> Registers {
        let mut raw: user_regs_struct = unsafe { zeroed() };
        raw.rdi = a1;
        raw.rsi = a2;
        raw.rdx = a3;
        raw.r10 = a4;
        raw.r8 = a5;
        Registers::from_ptrace(SupportedArch::X64, raw)
    }

    #[test]
    fn parses_fchownat_in_kernel_order() {
        let regs = regs_with_args(3, 0x1000, 1234, 5678, 0);
        let args = parse_fchownat_args(&regs);
        assert_eq!(args.dfd, 3);
        assert_eq!(args.filename, 0x1000);
        assert_eq!(args.user, 1234);
        assert_eq!(args.group, 5678);
        assert_eq!(args.flag, 0);
    }

    #[test]
    fn syscallno_round_trips_negative() {
        let mut regs = regs_with_args(0, 0, 0, 0, 0);
        regs.set_syscallno(-1);
        assert_eq!(regs.syscallno(), -1);
    }

    #[test]
    fn syscall_result_round_trips_negative() {
        let mut regs = regs_with_args(0, 0, 0, 0, 0);
        regs.set_syscall_result_signed(-(libc::EPERM as isize));
        assert_eq!(regs.syscall_result_signed(), -(libc::EPERM as isize));
    }
}
