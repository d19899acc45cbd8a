//! Ownership backend (component C2).
//!
//! `rd` never forges filesystem metadata, so this module has no
//! counterpart there; it's modeled instead on the xattr-based
//! ownership-override pattern used by sibling wormhole/wormholefs-style
//! overlay tools, which persist metadata overrides as a single
//! extended attribute on the real file rather than maintaining a side
//! database: whatever renames, hardlinks, or copies the file at the OS
//! level, the override travels with the inode as long as the
//! underlying filesystem preserves xattrs.

use libc::pid_t;
use std::convert::TryInto;
use std::io;
use std::os::unix::io::RawFd;

/// Build the path fakefs uses to reach a tracee's open file by
/// descriptor: `/proc/<tid>/fd/<fd>` resolves through the *tracee's*
/// fd table because `/proc/<pid>/fd/N` is always relative to `pid`,
/// never to the caller.
fn proc_fd_path(tid: pid_t, fd: RawFd) -> Vec<u8> {
    format!("/proc/{}/fd/{}", tid, fd).into_bytes()
}

/// Stat `path` the way the caller asked: following the final symlink
/// component (`stat`/`chown`/`fchownat` without `AT_SYMLINK_NOFOLLOW`)
/// or not (`lstat`/`lchown`/`fchownat` with the flag).
fn stat_path(path: &[u8], follow_symlinks: bool) -> io::Result<libc::stat> {
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
    Ok(st)
}

/// Only regular files and directories can carry the override attribute
///; everything else -- symlinks, sockets,
/// devices, fifos -- cannot, which is what makes a symlink's own link
/// inode (reached via `lstat`/`lchown`) always override-free.
fn can_carry_override(st: &libc::stat) -> bool {
    let file_type = st.st_mode & libc::S_IFMT;
    file_type == libc::S_IFREG || file_type == libc::S_IFDIR
}

/// Fixed xattr name fakefs uses to store an ownership override.
/// Namespaced under `user.` so it requires no special privilege
/// to set or read on a normal filesystem.
pub const XATTR_NAME: &str = "user.fakefs.ownership";

/// Sentinel meaning "don't change this field", matching the kernel's
/// own `chown(2)` convention for `uid`/`gid` of `-1`.
pub const UNCHANGED: i32 = -1;

/// An ownership override record.
/// Encoded on disk as 8 bytes: `uid` then `gid`, both little-endian
/// `u32`. Fixed width and no version byte -- there is exactly one
/// record shape fakefs has ever produced, so there is nothing to
/// version yet.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct OwnershipRecord {
    pub uid: u32,
    pub gid: u32,
}

impl OwnershipRecord {
    fn encode(self) -> [u8; 8] {
        let mut buf = [0u8; 8];
        buf[0..4].copy_from_slice(&self.uid.to_le_bytes());
        buf[4..8].copy_from_slice(&self.gid.to_le_bytes());
        buf
    }

    fn decode(bytes: &[u8]) -> Option<OwnershipRecord> {
        if bytes.len() != 8 {
            return None;
        }
        let uid = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let gid = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        Some(OwnershipRecord { uid, gid })
    }
}

/// True if `path` carries an ownership override. `follow_symlinks` selects `stat`/`lstat` disposition
/// for the final path component: a symlink inspected with
/// `follow_symlinks: false` can never carry an override, since only
/// regular files and directories can.
pub fn has_override(path: &[u8], follow_symlinks: bool) -> io::Result<bool> {
    Ok(read_record_by_path(path, follow_symlinks)?.is_some())
}

/// True if the open file behind `fd` in tracee `tid` carries an
/// ownership override. A file descriptor
/// already names a resolved file, never a symlink itself, so there is
/// no follow/no-follow distinction to make here.
pub fn fhas_override(tid: pid_t, fd: RawFd) -> io::Result<bool> {
    has_override(&proc_fd_path(tid, fd), true)
}

fn read_record_by_path(path: &[u8], follow_symlinks: bool) -> io::Result<Option<OwnershipRecord>> {
    let st = match stat_path(path, follow_symlinks) {
        Ok(st) => st,
        Err(e) => return Err(e),
    };
    if !can_carry_override(&st) {
        return Ok(None);
    }
    let path = std::path::PathBuf::from(std::ffi::OsStr::new(
        std::str::from_utf8(path).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?,
    ));
    match xattr::get(&path, XATTR_NAME)? {
        Some(bytes) => Ok(OwnershipRecord::decode(&bytes)),
        None => Ok(None),
    }
}

fn write_record_by_path(path: &[u8], record: OwnershipRecord) -> io::Result<()> {
    let path = std::path::PathBuf::from(std::ffi::OsStr::new(
        std::str::from_utf8(path).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?,
    ));
    xattr::set(&path, XATTR_NAME, &record.encode())
}

/// Apply `chown`/`lchown` semantics:
/// `user`/`group` of `-1` means "leave this field as it is", falling
/// back to the real on-disk owner (via `real_uid`/`real_gid`, queried
/// by the caller with an ordinary `lstat`) when there is no existing
/// override to inherit from. `follow_symlinks` picks the `chown`
/// (follows) vs `lchown`/`AT_SYMLINK_NOFOLLOW` (does not) disposition.
/// Non-regular, non-directory objects (symlinks included, since
/// `follow_symlinks: false` stops at the link itself) cannot carry the
/// attribute: the write succeeds as a no-op when both requested ids
/// resolve to zero/unchanged, and fails with `EPERM` otherwise.
pub fn chown_by_path(
    path: &[u8],
    user: i32,
    group: i32,
    real_uid: u32,
    real_gid: u32,
    follow_symlinks: bool,
) -> io::Result<()> {
    let st = stat_path(path, follow_symlinks)?;
    if !can_carry_override(&st) {
        let user_is_zero = user == UNCHANGED || user == 0;
        let group_is_zero = group == UNCHANGED || group == 0;
        return if user_is_zero && group_is_zero {
            Ok(())
        } else {
            Err(io::Error::from_raw_os_error(libc::EPERM))
        };
    }
    let current = read_record_by_path(path, follow_symlinks)?.unwrap_or(OwnershipRecord {
        uid: real_uid,
        gid: real_gid,
    });
    let record = OwnershipRecord {
        uid: if user == UNCHANGED { current.uid } else { user as u32 },
        gid: if group == UNCHANGED { current.gid } else { group as u32 },
    };
    write_record_by_path(path, record)
}

pub fn chown_by_fd(
    tid: pid_t,
    fd: RawFd,
    user: i32,
    group: i32,
    real_uid: u32,
    real_gid: u32,
) -> io::Result<()> {
    chown_by_path(&proc_fd_path(tid, fd), user, group, real_uid, real_gid, true)
}

/// Look up the override for `path`, if any.
/// With no override, the real on-disk owner passes through unchanged,
/// so the hook patches nothing and the kernel's own `stat`/`statx`
/// result stands. The buffer layout itself lives in `hook`, which is
/// the only caller that knows whether it is patching `st_uid`/`st_gid`
/// or `stx_uid`/`stx_gid`. `follow_symlinks` distinguishes
/// `stat`/`statx` (follows) from `lstat`/`statx(...,
/// AT_SYMLINK_NOFOLLOW)` (does not -- a symlink's own ownership is
/// never overridden by its target's).
pub fn override_uid_gid(path: &[u8], follow_symlinks: bool) -> io::Result<Option<(u32, u32)>> {
    Ok(read_record_by_path(path, follow_symlinks)?.map(|r| (r.uid, r.gid)))
}

pub fn override_uid_gid_fd(tid: pid_t, fd: RawFd) -> io::Result<Option<(u32, u32)>> {
    override_uid_gid(&proc_fd_path(tid, fd), true)
}

/// Remove `XATTR_NAME` from a raw `listxattr`-style NUL-separated name
/// list, so the override fakefs maintains never shows up to a tracee
/// asking "what extended attributes does this file have".
pub fn filter_xattr_list(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    for name in raw.split(|&b| b == 0) {
        if name.is_empty() {
            continue;
        }
        if name == XATTR_NAME.as_bytes() {
            continue;
        }
        out.extend_from_slice(name);
        out.push(0);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn touch(dir: &tempfile::TempDir, name: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "hello").unwrap();
        path
    }

    #[test]
    fn no_override_reports_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = touch(&dir, "a");
        assert!(!has_override(path.to_str().unwrap().as_bytes(), true).unwrap());
    }

    #[test]
    fn chown_then_override_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = touch(&dir, "b");
        let bytes = path.to_str().unwrap().as_bytes();
        chown_by_path(bytes, 4242, 4343, 0, 0, true).unwrap();
        assert!(has_override(bytes, true).unwrap());
        let (uid, gid) = override_uid_gid(bytes, true).unwrap().unwrap();
        assert_eq!(uid, 4242);
        assert_eq!(gid, 4343);
    }

    #[test]
    fn unchanged_sentinel_preserves_existing_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = touch(&dir, "c");
        let bytes = path.to_str().unwrap().as_bytes();
        chown_by_path(bytes, 10, 20, 0, 0, true).unwrap();
        chown_by_path(bytes, UNCHANGED, 99, 0, 0, true).unwrap();
        let (uid, gid) = override_uid_gid(bytes, true).unwrap().unwrap();
        assert_eq!(uid, 10);
        assert_eq!(gid, 99);
    }

    #[test]
    fn lchown_nonzero_on_symlink_fails_eperm() {
        let dir = tempfile::tempdir().unwrap();
        let target = touch(&dir, "target");
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();
        let bytes = link.to_str().unwrap().as_bytes();
        let err = chown_by_path(bytes, 42, UNCHANGED, 0, 0, false).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EPERM));
    }

    #[test]
    fn lchown_to_zero_on_symlink_succeeds_as_noop() {
        let dir = tempfile::tempdir().unwrap();
        let target = touch(&dir, "target2");
        let link = dir.path().join("link2");
        std::os::unix::fs::symlink(&target, &link).unwrap();
        let bytes = link.to_str().unwrap().as_bytes();
        chown_by_path(bytes, 0, 0, 0, 0, false).unwrap();
    }

    #[test]
    fn lstat_on_symlink_never_sees_target_override() {
        let dir = tempfile::tempdir().unwrap();
        let target = touch(&dir, "target3");
        let link = dir.path().join("link3");
        std::os::unix::fs::symlink(&target, &link).unwrap();
        chown_by_path(target.to_str().unwrap().as_bytes(), 7, 7, 0, 0, true).unwrap();
        assert!(!has_override(link.to_str().unwrap().as_bytes(), false).unwrap());
        assert!(has_override(link.to_str().unwrap().as_bytes(), true).unwrap());
    }

    #[test]
    fn filter_xattr_list_hides_fakefs_attribute() {
        let raw = b"user.comment\0user.fakefs.ownership\0user.other\0";
        let filtered = filter_xattr_list(raw);
        let names: Vec<&[u8]> = filtered.split(|&b| b == 0).filter(|s| !s.is_empty()).collect();
        assert_eq!(names, vec![b"user.comment".as_ref(), b"user.other".as_ref()]);
    }

    #[test]
    fn decode_rejects_wrong_length() {
        assert!(OwnershipRecord::decode(&[1, 2, 3]).is_none());
    }
}
