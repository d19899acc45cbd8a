//! Per-thread bookkeeping and the tid/pid index (component C4).
//!
//! rd's `ThreadGroup`/`Task` pair (`thread_group.rs`,
//! `task_interface/task.rs`) is a `Rc<RefCell<_>>`-linked graph keyed by
//! `taskish_uid` and owned by a `Session`, because `rd` has to track
//! full process trees across record and replay with shared/weak
//! pointers in both directions. fakefs only needs to answer two
//! questions while its tracer loop runs: "what syscall is this tid currently inside
//! of", and "what thread ids belong to this pid". That collapses to a
//! plain `HashMap` index rather than rd's shared-ownership
//! graph -- there is no tree to walk, just a flat registry the tracer
//! loop inserts into on `PTRACE_EVENT_CLONE`/`FORK`/`VFORK` and removes
//! from on thread exit.

use libc::pid_t;
use std::collections::{HashMap, HashSet};

/// What the hook does at the syscall-exit stop that follows a
/// syscall-entry decision. Two shapes: a syscall the hook
/// blocked outright (`orig_rax` set to an invalid number at entry, so
/// the kernel never ran it) whose exit just needs a synthetic `rax`;
/// or a syscall the hook let run for real, whose result buffer still
/// needs its ownership fields patched before the tracee sees it.
pub enum ExitAction {
    /// The real syscall was blocked; overwrite `rax` with this value
    ///.
    FakeChownResult(isize),
    /// Patch `st_uid`/`st_gid` in the real `stat`/`fstat`/`newfstatat`
    /// result at `buf_addr`.
    PatchStat { buf_addr: usize, uid: u32, gid: u32 },
    /// Patch `stx_uid`/`stx_gid` in the real `statx` result at
    /// `buf_addr`. Each field is `None` when the caller's `stx_mask`
    /// never asked for it, matching `Fstatx`'s "only rewrites uid/gid
    /// fields the caller asked for" contract.
    PatchStatx { buf_addr: usize, uid: Option<u32>, gid: Option<u32> },
    /// Strip `fsop::XATTR_NAME` out of the real `listxattr`/`flistxattr`
    /// result written at `list_addr`, and fix up the returned length.
    FilterListxattr { list_addr: usize, requested_size: usize },
}

/// Bookkeeping for a single traced thread.
pub struct ThreadState {
    pub tid: pid_t,
    pub pid: pid_t,
    /// Syscall number captured at the most recent syscall-entry stop,
    /// or `None` if this thread is not currently inside a traced
    /// syscall.
    pub current_syscall: Option<i32>,
    /// Set by the hook at syscall-entry when it decided to block the
    /// real syscall; consumed and cleared at the matching
    /// syscall-exit stop.
    pub pending_exit_action: Option<ExitAction>,
    /// Set once a `PTRACE_EVENT_EXEC` stop is seen for this tid, so the
    /// tracer knows any pre-exec hook state for it is stale.
    pub execed: bool,
}

impl ThreadState {
    fn new(tid: pid_t, pid: pid_t) -> ThreadState {
        ThreadState {
            tid,
            pid,
            current_syscall: None,
            pending_exit_action: None,
            execed: false,
        }
    }
}

/// The tracer's registry of every thread it currently knows about,
/// indexed by tid, plus a pid -> {tid} reverse index.
#[derive(Default)]
pub struct ThreadIndex {
    by_tid: HashMap<pid_t, ThreadState>,
    by_pid: HashMap<pid_t, HashSet<pid_t>>,
}

impl ThreadIndex {
    pub fn new() -> ThreadIndex {
        ThreadIndex::default()
    }

    pub fn insert(&mut self, tid: pid_t, pid: pid_t) -> &mut ThreadState {
        self.by_pid.entry(pid).or_insert_with(HashSet::new).insert(tid);
        self.by_tid.entry(tid).or_insert_with(|| ThreadState::new(tid, pid))
    }

    pub fn get(&self, tid: pid_t) -> Option<&ThreadState> {
        self.by_tid.get(&tid)
    }

    pub fn get_mut(&mut self, tid: pid_t) -> Option<&mut ThreadState> {
        self.by_tid.get_mut(&tid)
    }

    pub fn contains(&self, tid: pid_t) -> bool {
        self.by_tid.contains_key(&tid)
    }

    /// Remove a thread that has exited. Cleans up the reverse pid index too, so a
    /// pid with no remaining threads simply disappears from it.
    pub fn remove(&mut self, tid: pid_t) -> Option<ThreadState> {
        let removed = self.by_tid.remove(&tid)?;
        if let Some(siblings) = self.by_pid.get_mut(&removed.pid) {
            siblings.remove(&tid);
            if siblings.is_empty() {
                self.by_pid.remove(&removed.pid);
            }
        }
        Some(removed)
    }

    pub fn tids_for_pid(&self, pid: pid_t) -> Vec<pid_t> {
        self.by_pid
            .get(&pid)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.by_tid.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_tid.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_lookup_by_tid() {
        let mut idx = ThreadIndex::new();
        idx.insert(100, 100);
        assert!(idx.contains(100));
        assert_eq!(idx.get(100).unwrap().pid, 100);
    }

    #[test]
    fn clone_threads_share_pid_but_not_tid() {
        let mut idx = ThreadIndex::new();
        idx.insert(100, 100);
        idx.insert(101, 100);
        let mut tids = idx.tids_for_pid(100);
        tids.sort();
        assert_eq!(tids, vec![100, 101]);
    }

    #[test]
    fn remove_drops_empty_pid_bucket() {
        let mut idx = ThreadIndex::new();
        idx.insert(100, 100);
        idx.remove(100);
        assert!(!idx.contains(100));
        assert!(idx.tids_for_pid(100).is_empty());
        assert!(idx.is_empty());
    }

    #[test]
    fn remove_leaves_siblings_intact() {
        let mut idx = ThreadIndex::new();
        idx.insert(100, 100);
        idx.insert(101, 100);
        idx.remove(100);
        assert_eq!(idx.tids_for_pid(100), vec![101]);
    }

    #[test]
    fn current_syscall_tracks_entry_stop() {
        let mut idx = ThreadIndex::new();
        idx.insert(100, 100);
        idx.get_mut(100).unwrap().current_syscall = Some(92);
        assert_eq!(idx.get(100).unwrap().current_syscall, Some(92));
    }
}
