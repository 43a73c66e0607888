//! Cross-platform filesystem shim.
//!
//! Thin wrappers around `std::fs` plus the pieces it lacks: POSIX mode
//! bits, symlink-aware timestamps, FIFO/device nodes, and the single
//! metadata-reapplication path used after restore. Unix gets real
//! implementations; other targets get no-op stubs so call sites stay
//! identical across OSes.

use std::fs;
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use filetime::FileTime;

use crate::entry::EntryKind;
use crate::error::BackupError;

#[cfg(unix)]
pub fn set_unix_permissions(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
#[inline]
pub fn set_unix_permissions(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// Creates or replaces a symlink at `link` pointing at `target` verbatim.
pub fn replace_symlink(target: &Path, link: &Path) -> Result<(), BackupError> {
    if fs::symlink_metadata(link).is_ok() {
        fs::remove_file(link).map_err(|e| BackupError::io(e, link))?;
    }
    #[cfg(unix)]
    std::os::unix::fs::symlink(target, link).map_err(|e| BackupError::io(e, link))?;
    #[cfg(windows)]
    std::os::windows::fs::symlink_file(target, link).map_err(|e| BackupError::io(e, link))?;
    #[cfg(not(any(unix, windows)))]
    return Err(BackupError::io(
        io::Error::new(io::ErrorKind::Unsupported, "symlinks unsupported"),
        link,
    ));
    Ok(())
}

/// Creates a named pipe. Unsupported targets report `Unsupported` so the
/// caller can decide between warning and failing.
#[cfg(unix)]
pub fn make_fifo(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::ffi::OsStrExt;
    let cpath = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))?;
    let rc = unsafe { libc::mkfifo(cpath.as_ptr(), mode as libc::mode_t) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn make_fifo(_path: &Path, _mode: u32) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "FIFOs unsupported on this platform"))
}

/// Recreates a character/block device or socket node with `mknod`.
/// Best effort: needs privileges for devices, Linux semantics for sockets.
#[cfg(unix)]
pub fn make_device_node(path: &Path, kind: EntryKind, mode: u32) -> io::Result<()> {
    use std::os::unix::ffi::OsStrExt;
    let type_bits = match kind {
        EntryKind::CharDev => libc::S_IFCHR,
        EntryKind::BlockDev => libc::S_IFBLK,
        EntryKind::Socket => libc::S_IFSOCK,
        EntryKind::Fifo => libc::S_IFIFO,
        _ => return Err(io::Error::new(io::ErrorKind::InvalidInput, "not a special kind")),
    };
    let cpath = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))?;
    let rc = unsafe { libc::mknod(cpath.as_ptr(), type_bits | mode as libc::mode_t, 0) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn make_device_node(_path: &Path, _kind: EntryKind, _mode: u32) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "device nodes unsupported on this platform"))
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Converts a stored timestamp to a `FileTime`, substituting the current
/// wall clock for the zero "unknown" sentinel.
fn stamp(seconds: u64) -> FileTime {
    let seconds = if seconds == 0 { now_unix() } else { seconds };
    FileTime::from_unix_time(seconds as i64, 0)
}

/// Reapplies recorded metadata to a restored entry. The single code path
/// for mode and timestamps after materialization.
///
/// Symlinks get the non-dereferencing variants; where the platform cannot
/// express symlink modes or times the write is silently dropped. `ctime`
/// is carried for Windows creation-time reapplication and ignored
/// elsewhere (`filetime` cannot set creation time, so it is currently
/// dropped there too).
pub fn apply_metadata(
    target: &Path,
    mode: u32,
    atime: u64,
    mtime: u64,
    _ctime: Option<u64>,
    kind: EntryKind,
) -> io::Result<()> {
    let atime = stamp(atime);
    let mtime = stamp(mtime);

    if kind == EntryKind::Symlink {
        // No lchmod on Linux; mode reapplication for links is dropped.
        return match filetime::set_symlink_file_times(target, atime, mtime) {
            // Platforms without symlink timestamp support stay silent.
            Err(e) if e.kind() == io::ErrorKind::Unsupported => Ok(()),
            other => other,
        };
    }

    set_unix_permissions(target, mode)?;
    filetime::set_file_times(target, atime, mtime)
}

/// Copies mode and mtime from `from` onto `to`, without following links on
/// the read side. Used when a transform replaces a file with a derived one.
pub fn carry_file_times(from: &Path, to: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(from)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        set_unix_permissions(to, meta.mode() & 0o7777)?;
    }
    let mtime = FileTime::from_last_modification_time(&meta);
    let atime = FileTime::from_last_access_time(&meta);
    filetime::set_file_times(to, atime, mtime)
}

/// Removes every empty directory below `root`, deepest first. `root`
/// itself is kept.
pub fn prune_empty_dirs(root: &Path) -> io::Result<()> {
    let mut dirs: Vec<std::path::PathBuf> = walkdir::WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.into_path())
        .collect();
    dirs.sort_by_key(|p| std::cmp::Reverse(p.components().count()));
    for dir in dirs {
        if fs::read_dir(&dir)?.next().is_none() {
            fs::remove_dir(&dir)?;
        }
    }
    Ok(())
}

/// Deletes the contents of `dir` while keeping the directory itself.
pub fn clear_directory(dir: &Path) -> io::Result<()> {
    for item in fs::read_dir(dir)? {
        let item = item?;
        let path = item.path();
        if item.file_type()?.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn apply_metadata_sets_mode_and_times() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("f.txt");
        fs::write(&file, b"x").unwrap();

        apply_metadata(&file, 0o640, 1_600_000_000, 1_600_000_100, None, EntryKind::Regular)
            .unwrap();

        let meta = fs::metadata(&file).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            assert_eq!(meta.mode() & 0o7777, 0o640);
            assert_eq!(meta.mtime(), 1_600_000_100);
            assert_eq!(meta.atime(), 1_600_000_000);
        }
        let _ = meta;
    }

    #[test]
    fn zero_sentinel_becomes_current_time() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("f.txt");
        fs::write(&file, b"x").unwrap();

        let before = now_unix();
        apply_metadata(&file, 0o644, 0, 0, None, EntryKind::Regular).unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            let meta = fs::metadata(&file).unwrap();
            assert!(meta.mtime() as u64 >= before);
        }
    }

    #[test]
    fn prune_removes_nested_empty_dirs() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("a/b/c")).unwrap();
        fs::create_dir_all(root.join("keep")).unwrap();
        fs::write(root.join("keep/file.txt"), b"k").unwrap();

        prune_empty_dirs(root).unwrap();
        assert!(!root.join("a").exists());
        assert!(root.join("keep/file.txt").exists());
        assert!(root.exists());
    }

    #[test]
    fn clear_directory_keeps_the_directory() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir(root.join("sub")).unwrap();
        fs::write(root.join("sub/x"), b"x").unwrap();
        fs::write(root.join("top.txt"), b"t").unwrap();

        clear_directory(root).unwrap();
        assert!(root.exists());
        assert_eq!(fs::read_dir(root).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn fifo_can_be_created() {
        let dir = tempdir().unwrap();
        let pipe = dir.path().join("pipe");
        make_fifo(&pipe, 0o644).unwrap();
        use std::os::unix::fs::FileTypeExt;
        assert!(fs::symlink_metadata(&pipe).unwrap().file_type().is_fifo());
    }
}
