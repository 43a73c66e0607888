//! Restore task: inverts a backup back into a live tree.
//!
//! Phase order: resolve inputs, decrypt, unpack, materialize per entry,
//! reapply metadata, cleanup. Temporary decrypt files and the unpack
//! directory are removed on every exit path, success or failure.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::BackupConfig;
use crate::crypto;
use crate::entry::{Entry, EntryKind};
use crate::error::BackupError;
use crate::filter::FilterSet;
use crate::fsx;
use crate::huffman;
use crate::logger::Logger;
use crate::package::{self, PackageRecord};
use crate::status::{CancelFlag, TaskStatus};
use crate::walker;

const UNPACK_DIR_NAME: &str = "temp_unpack";

fn ends_with_suffix(path: &Path, suffix: &str) -> bool {
    path.file_name()
        .and_then(OsStr::to_str)
        .map(|n| n.ends_with(suffix))
        .unwrap_or(false)
}

fn strip_one_suffix(s: &str, suffix: &str) -> Option<String> {
    s.strip_suffix(suffix).map(str::to_string)
}

/// Removes the transform suffix pair from a restored symlink target:
/// first a trailing `.enc`, then a trailing `.huff`. The inverse of
/// [`super::retarget_symlink`]'s suffix stacking.
pub fn strip_transform_suffixes(target: &Path) -> PathBuf {
    let mut s = target.to_string_lossy().into_owned();
    if let Some(stripped) = strip_one_suffix(&s, ".enc") {
        s = stripped;
    }
    if let Some(stripped) = strip_one_suffix(&s, ".huff") {
        s = stripped;
    }
    PathBuf::from(s)
}

fn strip_path_suffix(path: &Path, suffix: &str) -> PathBuf {
    let s = path.to_string_lossy().into_owned();
    match strip_one_suffix(&s, suffix) {
        Some(stripped) => PathBuf::from(stripped),
        None => path.to_path_buf(),
    }
}

/// Decompresses `source` into `dest`; a file that merely carries the
/// `.huff` name without being a valid stream is copied raw instead.
fn decompress_or_copy(source: &Path, dest: &Path, logger: &dyn Logger) -> Result<(), BackupError> {
    match huffman::decompress_file(source, dest) {
        Ok(()) => Ok(()),
        Err(BackupError::HuffmanDecode(_)) => {
            logger.warn(&format!(
                "{} is not a compressed stream, copying raw",
                source.display()
            ));
            fs::copy(source, dest).map_err(|e| BackupError::io(e, dest))?;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

pub struct RestoreTask {
    backup_dir: PathBuf,
    restore_dir: PathBuf,
    filters: FilterSet,
    compress_enabled: bool,
    package_enabled: bool,
    package_file_name: String,
    password: String,
    cancel: CancelFlag,
    status: TaskStatus,
}

impl RestoreTask {
    /// Builds a restore of `config`'s destination back into `restore_dir`.
    /// Filter patterns are compiled here, so bad patterns fail before the
    /// task ever runs.
    pub fn new(
        config: &BackupConfig,
        restore_dir: impl Into<PathBuf>,
        cancel: CancelFlag,
    ) -> Result<Self, BackupError> {
        Ok(Self {
            backup_dir: config.destination_dir.clone(),
            restore_dir: restore_dir.into(),
            filters: config.compiled_filters()?,
            compress_enabled: config.compress_enabled,
            package_enabled: config.package_enabled,
            package_file_name: config.package_file_name.clone(),
            password: config.password.clone(),
            cancel,
            status: TaskStatus::Pending,
        })
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    fn checkpoint(&self) -> Result<(), BackupError> {
        if self.cancel.is_cancelled() {
            Err(BackupError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn execute(&mut self, logger: &dyn Logger) -> TaskStatus {
        logger.info(&format!(
            "Starting restore: {} -> {}",
            self.backup_dir.display(),
            self.restore_dir.display()
        ));
        self.status = TaskStatus::Running;

        let mut temp_paths: Vec<PathBuf> = Vec::new();
        let result = self.run(logger, &mut temp_paths);

        // R6: temporaries go away on success and failure alike.
        for temp in temp_paths {
            if temp.is_dir() {
                let _ = fs::remove_dir_all(&temp);
            } else {
                let _ = fs::remove_file(&temp);
            }
        }

        self.status = match result {
            Ok(count) => {
                logger.info(&format!("Restore completed, {} entries restored", count));
                TaskStatus::Completed
            }
            Err(BackupError::Cancelled) => {
                logger.warn("Restore cancelled");
                TaskStatus::Cancelled
            }
            Err(e) => {
                logger.error(&format!("Restore failed: {}", e));
                TaskStatus::Failed
            }
        };
        self.status
    }

    fn run(
        &self,
        logger: &dyn Logger,
        temp_paths: &mut Vec<PathBuf>,
    ) -> Result<usize, BackupError> {
        fs::create_dir_all(&self.restore_dir)
            .map_err(|_| BackupError::DestinationUncreatable(self.restore_dir.clone()))?;

        // R1: resolve inputs.
        self.checkpoint()?;
        let encrypted_pkg = format!("{}.enc", self.package_file_name);
        let entries: Vec<Entry> = walker::walk_tree(&self.backup_dir)?
            .into_iter()
            .filter(|e| self.filters.matches(e))
            .filter(|e| {
                if self.package_enabled {
                    e.name == self.package_file_name || e.name == encrypted_pkg
                } else {
                    true
                }
            })
            .collect();
        logger.info(&format!("{} backup entries selected for restore", entries.len()));

        let mut restored = 0usize;
        let mut dir_entries: Vec<(PathBuf, Entry)> = Vec::new();

        for entry in &entries {
            self.checkpoint()?;
            if self.package_enabled {
                restored += self.restore_from_package(entry, logger, temp_paths)?;
            } else {
                restored += self.restore_mirror_entry(entry, logger, temp_paths, &mut dir_entries)?;
            }
        }

        // Terminal pass: directory timestamps, untouched by later writes now.
        for (path, entry) in dir_entries {
            if let Err(e) = fsx::apply_metadata(
                &path,
                entry.mode,
                entry.atime,
                entry.mtime,
                None,
                EntryKind::Directory,
            ) {
                logger.warn(&format!("directory metadata on {}: {}", path.display(), e));
            }
        }

        Ok(restored)
    }

    /// R2+R3: decrypt the package if needed, unpack it, then materialize
    /// every packaged entry.
    fn restore_from_package(
        &self,
        entry: &Entry,
        logger: &dyn Logger,
        temp_paths: &mut Vec<PathBuf>,
    ) -> Result<usize, BackupError> {
        let mut current_source = entry.path.clone();

        if entry.name == format!("{}.enc", self.package_file_name) {
            if self.password.is_empty() {
                return Err(BackupError::DecryptFailed(format!(
                    "{} is encrypted but no password is configured",
                    entry.path.display()
                )));
            }
            let tmp = super::backup::append_suffix(&entry.path, ".tmp");
            temp_paths.push(tmp.clone());
            logger.info(&format!("decrypting {}", entry.path.display()));
            crypto::decrypt_file(&entry.path, &tmp, &self.password)?;
            if let Err(e) = fsx::carry_file_times(&entry.path, &tmp) {
                logger.warn(&format!("metadata carry to {}: {}", tmp.display(), e));
            }
            current_source = tmp;
        }

        let unpack_dir = self.backup_dir.join(UNPACK_DIR_NAME);
        temp_paths.push(unpack_dir.clone());
        logger.info(&format!("unpacking {}", current_source.display()));
        let records = package::read_package(&current_source, &unpack_dir, logger)?;

        let mut restored = 0usize;
        let mut dir_records: Vec<(PathBuf, PackageRecord)> = Vec::new();
        for record in &records {
            self.checkpoint()?;
            if self.materialize_record(record, &unpack_dir, logger, &mut dir_records)? {
                restored += 1;
            }
        }
        // R5 terminal pass over packaged directories.
        for (path, record) in dir_records {
            if let Err(e) = fsx::apply_metadata(
                &path,
                record.mode,
                record.atime,
                record.mtime,
                Some(record.ctime),
                EntryKind::Directory,
            ) {
                logger.warn(&format!("directory metadata on {}: {}", path.display(), e));
            }
        }
        Ok(restored)
    }

    /// R4+R5 for one packaged record.
    fn materialize_record(
        &self,
        record: &PackageRecord,
        unpack_dir: &Path,
        logger: &dyn Logger,
        dir_records: &mut Vec<(PathBuf, PackageRecord)>,
    ) -> Result<bool, BackupError> {
        let unpacked = unpack_dir.join(record.relative_path());
        let target = self.restore_dir.join(record.relative_path());
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| BackupError::io(e, parent))?;
        }

        match record.kind {
            EntryKind::Symlink => {
                let cleaned = strip_transform_suffixes(Path::new(&record.symlink_target));
                fsx::replace_symlink(&cleaned, &target)?;
                if let Err(e) = fsx::apply_metadata(
                    &target,
                    record.mode,
                    record.atime,
                    record.mtime,
                    Some(record.ctime),
                    EntryKind::Symlink,
                ) {
                    logger.warn(&format!("symlink metadata on {}: {}", target.display(), e));
                }
            }
            EntryKind::Regular => {
                let final_target = if self.compress_enabled && record.name.ends_with(".huff") {
                    let stripped = strip_path_suffix(&target, ".huff");
                    logger.debug(&format!("decompressing {}", unpacked.display()));
                    decompress_or_copy(&unpacked, &stripped, logger)?;
                    stripped
                } else {
                    fs::copy(&unpacked, &target).map_err(|e| BackupError::io(e, &target))?;
                    target
                };
                if let Err(e) = fsx::apply_metadata(
                    &final_target,
                    record.mode,
                    record.atime,
                    record.mtime,
                    Some(record.ctime),
                    EntryKind::Regular,
                ) {
                    logger.warn(&format!("metadata on {}: {}", final_target.display(), e));
                }
            }
            EntryKind::Directory => {
                fs::create_dir_all(&target).map_err(|e| BackupError::io(e, &target))?;
                dir_records.push((target, record.clone()));
            }
            EntryKind::Fifo => {
                if let Err(e) = fsx::make_fifo(&target, record.mode) {
                    logger.warn(&format!("skipping FIFO '{}': {}", record.name, e));
                    return Ok(false);
                }
            }
            other => {
                logger.warn(&format!(
                    "skipping unsupported packaged kind {:?} for '{}'",
                    other, record.name
                ));
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// R2+R4 for one mirror-tree artifact.
    fn restore_mirror_entry(
        &self,
        entry: &Entry,
        logger: &dyn Logger,
        temp_paths: &mut Vec<PathBuf>,
        dir_entries: &mut Vec<(PathBuf, Entry)>,
    ) -> Result<usize, BackupError> {
        let rel = walker::relative_path(&entry.path, &self.backup_dir)?;
        let target = self.restore_dir.join(&rel);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| BackupError::io(e, parent))?;
        }

        match entry.kind {
            EntryKind::Directory => {
                fs::create_dir_all(&target).map_err(|e| BackupError::io(e, &target))?;
                dir_entries.push((target, entry.clone()));
            }
            EntryKind::Symlink => {
                let raw = entry
                    .symlink_target
                    .as_deref()
                    .expect("symlink entries always carry a target");
                let cleaned = strip_transform_suffixes(raw);
                fsx::replace_symlink(&cleaned, &target)?;
                if let Err(e) = fsx::apply_metadata(
                    &target,
                    entry.mode,
                    entry.atime,
                    entry.mtime,
                    None,
                    EntryKind::Symlink,
                ) {
                    logger.warn(&format!("symlink metadata on {}: {}", target.display(), e));
                }
            }
            EntryKind::Regular => {
                let mut source = entry.path.clone();
                let mut dest = target;

                if ends_with_suffix(&source, ".enc") {
                    if self.password.is_empty() {
                        return Err(BackupError::DecryptFailed(format!(
                            "{} is encrypted but no password is configured",
                            source.display()
                        )));
                    }
                    let tmp = super::backup::append_suffix(&source, ".tmp");
                    temp_paths.push(tmp.clone());
                    logger.info(&format!("decrypting {}", source.display()));
                    crypto::decrypt_file(&source, &tmp, &self.password)?;
                    if let Err(e) = fsx::carry_file_times(&source, &tmp) {
                        logger.warn(&format!("metadata carry to {}: {}", tmp.display(), e));
                    }
                    source = tmp;
                    dest = strip_path_suffix(&dest, ".enc");
                }

                if self.compress_enabled && ends_with_suffix(&dest, ".huff") {
                    let final_dest = strip_path_suffix(&dest, ".huff");
                    logger.debug(&format!("decompressing {}", source.display()));
                    decompress_or_copy(&source, &final_dest, logger)?;
                    if let Err(e) = fsx::carry_file_times(&source, &final_dest) {
                        logger.warn(&format!("metadata carry to {}: {}", final_dest.display(), e));
                    }
                } else {
                    fs::copy(&source, &dest).map_err(|e| BackupError::io(e, &dest))?;
                    if let Err(e) = fsx::carry_file_times(&source, &dest) {
                        logger.warn(&format!("metadata carry to {}: {}", dest.display(), e));
                    }
                }
            }
            EntryKind::Fifo => {
                fsx::make_fifo(&target, entry.mode).map_err(|e| BackupError::io(e, &target))?;
            }
            EntryKind::CharDev | EntryKind::BlockDev | EntryKind::Socket => {
                fsx::make_device_node(&target, entry.kind, entry.mode)
                    .map_err(|e| BackupError::io(e, &target))?;
            }
            EntryKind::Unknown => {
                logger.warn(&format!("skipping entry of unknown kind: {}", entry.path.display()));
                return Ok(0);
            }
        }

        logger.debug(&format!("restored {}", rel.display()));
        Ok(1)
    }
}
