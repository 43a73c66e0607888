//! Filesystem entry model.
//!
//! An [`Entry`] is a point-in-time snapshot of one filesystem object taken
//! with the non-dereferencing stat: a symlink is captured as a symlink, never
//! as its target. Content is loaded lazily and only for regular files.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::BackupError;

/// Classification of a filesystem entry, taken from `lstat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Regular,
    Directory,
    Symlink,
    Fifo,
    CharDev,
    BlockDev,
    Socket,
    Unknown,
}

impl EntryKind {
    /// Wire code used inside package metadata records. `Unknown` has no
    /// code; such entries are skipped before they reach the encoder.
    pub fn wire_code(self) -> Option<u16> {
        match self {
            EntryKind::Regular => Some(0),
            EntryKind::Directory => Some(1),
            EntryKind::Symlink => Some(2),
            EntryKind::Fifo => Some(3),
            EntryKind::CharDev => Some(4),
            EntryKind::BlockDev => Some(5),
            EntryKind::Socket => Some(6),
            EntryKind::Unknown => None,
        }
    }

    pub fn from_wire_code(code: u16) -> Option<EntryKind> {
        match code {
            0 => Some(EntryKind::Regular),
            1 => Some(EntryKind::Directory),
            2 => Some(EntryKind::Symlink),
            3 => Some(EntryKind::Fifo),
            4 => Some(EntryKind::CharDev),
            5 => Some(EntryKind::BlockDev),
            6 => Some(EntryKind::Socket),
            _ => None,
        }
    }

    /// Stable name used by the type-include filter.
    pub fn name(self) -> &'static str {
        match self {
            EntryKind::Regular => "regular",
            EntryKind::Directory => "directory",
            EntryKind::Symlink => "symlink",
            EntryKind::Fifo => "fifo",
            EntryKind::CharDev => "character",
            EntryKind::BlockDev => "block",
            EntryKind::Socket => "socket",
            EntryKind::Unknown => "unknown",
        }
    }
}

fn kind_of(file_type: fs::FileType) -> EntryKind {
    if file_type.is_symlink() {
        return EntryKind::Symlink;
    }
    if file_type.is_dir() {
        return EntryKind::Directory;
    }
    if file_type.is_file() {
        return EntryKind::Regular;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileTypeExt;
        if file_type.is_fifo() {
            return EntryKind::Fifo;
        }
        if file_type.is_char_device() {
            return EntryKind::CharDev;
        }
        if file_type.is_block_device() {
            return EntryKind::BlockDev;
        }
        if file_type.is_socket() {
            return EntryKind::Socket;
        }
    }
    EntryKind::Unknown
}

fn clamp_time(t: i64) -> u64 {
    if t > 0 {
        t as u64
    } else {
        0
    }
}

/// Snapshot of one filesystem object.
#[derive(Debug, Clone)]
pub struct Entry {
    /// Absolute path identity.
    pub path: PathBuf,
    /// Terminal path component.
    pub name: String,
    pub kind: EntryKind,
    /// Byte length for regular files; 0 otherwise.
    pub size: u64,
    /// POSIX mode bits, masked to the 12 low bits.
    pub mode: u32,
    pub owner_uid: u32,
    pub owner_gid: u32,
    /// Seconds since the Unix epoch; 0 means "unknown".
    pub ctime: u64,
    pub mtime: u64,
    pub atime: u64,
    /// Hard-link count. Informational only; links are materialized as
    /// independent copies.
    pub link_count: u64,
    /// Raw link value for symlinks, verbatim and never canonicalized.
    pub symlink_target: Option<PathBuf>,
    content: Option<Vec<u8>>,
}

impl Entry {
    /// Captures the entry at `path` without following symlinks.
    pub fn from_path(path: &Path) -> Result<Entry, BackupError> {
        let meta = fs::symlink_metadata(path).map_err(|e| BackupError::io(e, path))?;
        let kind = kind_of(meta.file_type());

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let symlink_target = if kind == EntryKind::Symlink {
            Some(fs::read_link(path).map_err(|e| BackupError::io(e, path))?)
        } else {
            None
        };

        #[cfg(unix)]
        let (mode, uid, gid, ctime, mtime, atime, nlink) = {
            use std::os::unix::fs::MetadataExt;
            (
                meta.mode() & 0o7777,
                meta.uid(),
                meta.gid(),
                clamp_time(meta.ctime()),
                clamp_time(meta.mtime()),
                clamp_time(meta.atime()),
                meta.nlink(),
            )
        };
        #[cfg(not(unix))]
        let (mode, uid, gid, ctime, mtime, atime, nlink) = {
            let to_unix = |t: std::io::Result<std::time::SystemTime>| {
                t.ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs())
                    .unwrap_or(0)
            };
            (0u32, 0u32, 0u32, to_unix(meta.created()), to_unix(meta.modified()), to_unix(meta.accessed()), 1u64)
        };

        Ok(Entry {
            path: path.to_path_buf(),
            name,
            kind,
            size: if kind == EntryKind::Regular { meta.len() } else { 0 },
            mode,
            owner_uid: uid,
            owner_gid: gid,
            ctime,
            mtime,
            atime,
            link_count: nlink,
            symlink_target,
            content: None,
        })
    }

    pub fn is_regular(&self) -> bool {
        self.kind == EntryKind::Regular
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == EntryKind::Symlink
    }

    /// Reads the file body into the snapshot. Regular files only; for any
    /// other kind this is a no-op returning an empty slice.
    pub fn load_content(&mut self) -> Result<&[u8], BackupError> {
        if self.kind != EntryKind::Regular {
            return Ok(&[]);
        }
        if self.content.is_none() {
            let data = fs::read(&self.path).map_err(|e| BackupError::io(e, &self.path))?;
            self.size = data.len() as u64;
            self.content = Some(data);
        }
        Ok(self.content.as_deref().unwrap_or(&[]))
    }

    /// Returns the loaded content, if any.
    pub fn content(&self) -> Option<&[u8]> {
        self.content.as_deref()
    }

    /// In-memory snapshot for filter unit tests; never touches the disk.
    #[cfg(test)]
    pub(crate) fn synthetic(path: PathBuf, kind: EntryKind, size: u64, mtime: u64) -> Entry {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Entry {
            path,
            name,
            kind,
            size,
            mode: 0o644,
            owner_uid: 0,
            owner_gid: 0,
            ctime: mtime,
            mtime,
            atime: mtime,
            link_count: 1,
            symlink_target: None,
            content: None,
        }
    }
}
