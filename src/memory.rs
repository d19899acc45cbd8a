//! Cross-process memory access helpers (component C5).
//!
//! `rd` reads tracee memory through `/proc/<tid>/mem`, opened once per
//! task and kept around (see rd's `task_interface::Task`,
//! which caches an fd for exactly this). fakefs's hook only needs
//! short, occasional reads (a pathname argument) and writes (patching
//! a `stat`/`statx` buffer or a `listxattr` result), so this grounds
//! the same underlying syscall rd eventually calls through
//! nix (`process_vm_readv`/`process_vm_writev`) without the fd-caching
//! layer around it -- each call here is self-contained and pays the
//! (small) cost of resolving the tracee's address space fresh.

use libc::pid_t;
use nix::sys::uio::{process_vm_readv, process_vm_writev, RemoteIoVec};
use nix::unistd::Pid;
use std::io::{self, IoSlice, IoSliceMut};

const MAX_PATH_LEN: usize = 4096;

/// Read exactly `len` bytes from `tid`'s address space starting at
/// `addr`.
pub fn read_mem(tid: pid_t, addr: usize, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let local = [IoSliceMut::new(&mut buf)];
    let remote = [RemoteIoVec { base: addr, len }];
    let n = process_vm_readv(Pid::from_raw(tid), &local, &remote)
        .map_err(|e| io::Error::from_raw_os_error(e as i32))?;
    if n != len {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "short remote read"));
    }
    Ok(buf)
}

/// Write `data` into `tid`'s address space starting at `addr`.
pub fn write_mem(tid: pid_t, addr: usize, data: &[u8]) -> io::Result<()> {
    let local = [IoSlice::new(data)];
    let remote = [RemoteIoVec { base: addr, len: data.len() }];
    let n = process_vm_writev(Pid::from_raw(tid), &local, &remote)
        .map_err(|e| io::Error::from_raw_os_error(e as i32))?;
    if n != data.len() {
        return Err(io::Error::new(io::ErrorKind::WriteZero, "short remote write"));
    }
    Ok(())
}

const PAGE_SIZE: usize = 4096;

/// Read a NUL-terminated pathname out of the tracee's memory, capped at
/// `MAX_PATH_LEN` the way `PATH_MAX` bounds any real pathname. Each chunk
/// runs only to the end of the remote page `addr + offset` currently sits
/// in, never past it: `process_vm_readv` can spuriously fault on a range
/// that crosses into an unmapped following page, even though the string
/// itself NUL-terminates well inside the mapped one.
pub fn read_cstring(tid: pid_t, addr: usize) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut offset = 0usize;
    while offset < MAX_PATH_LEN {
        let want = next_chunk_len(addr + offset, MAX_PATH_LEN - offset);
        let chunk = read_mem(tid, addr + offset, want)?;
        if let Some(nul) = chunk.iter().position(|&b| b == 0) {
            out.extend_from_slice(&chunk[..nul]);
            return Ok(out);
        }
        out.extend_from_slice(&chunk);
        offset += want;
    }
    Err(io::Error::new(io::ErrorKind::InvalidData, "pathname exceeds MAX_PATH_LEN"))
}

/// How much to read starting at remote address `here`: never past the end
/// of the page it falls in, and never past `remaining` bytes of budget.
fn next_chunk_len(here: usize, remaining: usize) -> usize {
    let to_page_boundary = PAGE_SIZE - (here % PAGE_SIZE);
    to_page_boundary.min(remaining)
}

/// Rewrite `/proc/self/...` prefixes in a path read from tracee memory
/// to `/proc/<tid>/...` so the tracer's own process can resolve it
///: the tracee's "self" is not the tracer's "self".
pub fn rewrite_proc_self(tid: pid_t, path: &[u8]) -> Vec<u8> {
    const PREFIX: &[u8] = b"/proc/self";
    if path.starts_with(PREFIX) {
        let mut rewritten = format!("/proc/{}", tid).into_bytes();
        rewritten.extend_from_slice(&path[PREFIX.len()..]);
        rewritten
    } else {
        path.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_proc_self_prefix() {
        let out = rewrite_proc_self(1234, b"/proc/self/fd/3");
        assert_eq!(out, b"/proc/1234/fd/3");
    }

    #[test]
    fn leaves_unrelated_paths_alone() {
        let out = rewrite_proc_self(1234, b"/etc/passwd");
        assert_eq!(out, b"/etc/passwd");
    }

    #[test]
    fn leaves_proc_self_lookalikes_alone() {
        let out = rewrite_proc_self(1234, b"/proc/selfish/x");
        assert_eq!(out, b"/proc/selfish/x");
    }

    #[test]
    fn chunk_len_stops_at_page_boundary() {
        // Two bytes from the next page boundary: must not read past it
        // even though plenty of budget remains.
        assert_eq!(next_chunk_len(PAGE_SIZE - 2, MAX_PATH_LEN), 2);
    }

    #[test]
    fn chunk_len_takes_a_full_page_when_aligned() {
        assert_eq!(next_chunk_len(PAGE_SIZE * 3, MAX_PATH_LEN), PAGE_SIZE);
    }

    #[test]
    fn chunk_len_respects_remaining_budget() {
        assert_eq!(next_chunk_len(PAGE_SIZE, 10), 10);
    }
}
