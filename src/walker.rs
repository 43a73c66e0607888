//! Deterministic tree enumeration.
//!
//! Walks a root directory depth-first, children sorted byte-wise by file
//! name, yielding [`Entry`] snapshots. Symlinks are yielded as leaves and
//! never followed into directories; empty directories are yielded so a
//! restore can re-create them.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::entry::Entry;
use crate::error::BackupError;

/// Enumerates `root` recursively in a stable order.
///
/// Entries whose `lstat` fails (typically permissions) are skipped; the
/// only whole-walk error is a missing or unreadable root.
pub fn walk_tree(root: &Path) -> Result<Vec<Entry>, BackupError> {
    let meta = std::fs::symlink_metadata(root)
        .map_err(|_| BackupError::SourceMissing(root.to_path_buf()))?;
    if !meta.is_dir() {
        return Err(BackupError::SourceMissing(root.to_path_buf()));
    }

    let mut entries = Vec::new();
    let walk = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name();
    for item in walk {
        let item = match item {
            Ok(i) => i,
            // Unreadable subtree: skip, per-entry errors never fail the walk.
            Err(_) => continue,
        };
        match Entry::from_path(item.path()) {
            Ok(entry) => entries.push(entry),
            Err(_) => continue,
        }
    }
    Ok(entries)
}

/// Path of `entry_path` relative to `root`.
///
/// Both sides are made absolute lexically; symlinks keep their own name and
/// the target is never resolved.
pub fn relative_path(entry_path: &Path, root: &Path) -> Result<PathBuf, BackupError> {
    let abs_entry = absolute(entry_path)?;
    let abs_root = absolute(root)?;
    abs_entry
        .strip_prefix(&abs_root)
        .map(Path::to_path_buf)
        .map_err(|_| BackupError::StripPrefix { prefix: abs_root, path: abs_entry.clone() })
}

/// Lexically absolute form of `path` (no symlink resolution).
pub fn absolute(path: &Path) -> Result<PathBuf, BackupError> {
    if path.is_absolute() {
        return Ok(normalize_dots(path));
    }
    let cwd = std::env::current_dir().map_err(|e| BackupError::io(e, path))?;
    Ok(normalize_dots(&cwd.join(path)))
}

/// Removes `.` components and folds `..` against named parents without
/// touching the filesystem.
fn normalize_dots(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(comp.as_os_str());
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryKind;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn walk_is_sorted_depth_first() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir(root.join("b_dir")).unwrap();
        fs::write(root.join("b_dir/inner.txt"), b"i").unwrap();
        fs::write(root.join("a.txt"), b"a").unwrap();
        fs::write(root.join("c.txt"), b"c").unwrap();
        fs::create_dir(root.join("empty")).unwrap();

        let entries = walk_tree(root).unwrap();
        let names: Vec<_> = entries
            .iter()
            .map(|e| relative_path(&e.path, root).unwrap())
            .collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("a.txt"),
                PathBuf::from("b_dir"),
                PathBuf::from("b_dir/inner.txt"),
                PathBuf::from("c.txt"),
                PathBuf::from("empty"),
            ]
        );
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempdir().unwrap();
        let gone = dir.path().join("nope");
        assert!(matches!(walk_tree(&gone), Err(BackupError::SourceMissing(_))));
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_directory_is_a_leaf() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir(root.join("real")).unwrap();
        fs::write(root.join("real/file.txt"), b"f").unwrap();
        std::os::unix::fs::symlink("real", root.join("alias")).unwrap();

        let entries = walk_tree(root).unwrap();
        let alias = entries.iter().find(|e| e.name == "alias").unwrap();
        assert_eq!(alias.kind, EntryKind::Symlink);
        // Nothing under the alias was enumerated.
        assert!(!entries.iter().any(|e| e.path.starts_with(root.join("alias/"))));
    }

    #[test]
    fn normalize_folds_dot_components() {
        let p = normalize_dots(Path::new("/a/b/./c/../d"));
        assert_eq!(p, PathBuf::from("/a/b/d"));
        let twice = normalize_dots(&p);
        assert_eq!(twice, p);
    }
}
