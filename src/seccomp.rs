//! Seccomp-BPF filter construction (component C5).
//!
//! `rd` never touches seccomp -- it traces every syscall via plain
//! `PTRACE_SYSCALL` single-stepping, which is fine for a record/replay
//! tool that already pays the cost of stopping at every syscall
//! boundary but far too slow for fakefs to impose on an arbitrary
//! build, since almost none of a typical process's syscalls touch
//! ownership. This module is grounded instead on a `seccompiler`-based
//! jailer filter (builds a `BTreeMap<i64, Vec<SeccompRule>>` policy and
//! compiles it to a `BpfProgram`), adapted from "deny by default" to
//! "allow by default, trace a short list".

use crate::kernel_abi::{BACKDOOR_KEY, SYS_IS_FAKEFS_RUNNING, TRACED_SYSCALLS};
use seccompiler::{
    BpfProgram, SeccompAction, SeccompCmpArgLen, SeccompCmpOp, SeccompCondition, SeccompFilter,
    SeccompRule, TargetArch,
};
use std::collections::BTreeMap;
use std::convert::TryFrom;

/// The 6th syscall argument is never used by any of the syscalls on
/// `TRACED_SYSCALLS`, which leaves it free as the out-of-band "backdoor"
/// signal that steps a call aside from the trace entirely.
const BACKDOOR_ARG_INDEX: u8 = 5;

#[derive(Debug)]
pub struct SeccompError(String);

impl std::fmt::Display for SeccompError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "seccomp filter construction failed: {}", self.0)
    }
}

impl std::error::Error for SeccompError {}

fn backdoor_condition() -> Result<SeccompCondition, SeccompError> {
    SeccompCondition::new(
        BACKDOOR_ARG_INDEX,
        SeccompCmpArgLen::Qword,
        SeccompCmpOp::Eq,
        BACKDOOR_KEY,
    )
    .map_err(|e| SeccompError(e.to_string()))
}

/// Build the fakefs seccomp policy:
///
/// - If the 6th argument equals the backdoor key, `Allow` unconditionally
///   -- this lets fakefs's own hook re-issue the real syscall on behalf
///   of the tracee without re-entering the trace loop.
/// - `SYS_IS_FAKEFS_RUNNING` always traces, so the tracee-side probe
/// reaches the hook even though the kernel has no such
///   syscall.
/// - Every syscall on `TRACED_SYSCALLS` traces unless the backdoor
///   condition above matched it first.
/// - Everything else is allowed straight through.
pub fn build_filter() -> Result<BpfProgram, SeccompError> {
    let mut rules: BTreeMap<i64, Vec<SeccompRule>> = BTreeMap::new();

    for &nr in TRACED_SYSCALLS {
        let rule = SeccompRule::new(vec![backdoor_condition()?], SeccompAction::Allow)
            .map_err(|e| SeccompError(e.to_string()))?;
        rules.insert(nr as i64, vec![rule]);
    }

    rules.insert(
        SYS_IS_FAKEFS_RUNNING as i64,
        vec![SeccompRule::new(vec![], SeccompAction::Trace(0)).map_err(|e| SeccompError(e.to_string()))?],
    );

    let filter = SeccompFilter::new(
        rules,
        SeccompAction::Allow,
        SeccompAction::Trace(0),
        TargetArch::x86_64,
    )
    .map_err(|e| SeccompError(e.to_string()))?;

    BpfProgram::try_from(filter).map_err(|e| SeccompError(format!("{:?}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_compiles_to_nonempty_program() {
        let program = build_filter().expect("filter should compile");
        assert!(!program.is_empty());
    }
}
