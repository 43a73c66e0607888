//! Backup task: one snapshot of the source tree into the destination.
//!
//! Phase order: validate, enumerate+filter, materialize per entry,
//! package (optional), encrypt (optional). The shared cancel flag is
//! polled before the walk, between entries, and before each late phase;
//! phases already completed stay on disk (crash-consistent, not
//! transactional).

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::BackupConfig;
use crate::entry::{Entry, EntryKind};
use crate::error::BackupError;
use crate::fsx;
use crate::huffman;
use crate::logger::Logger;
use crate::package;
use crate::status::{CancelFlag, TaskStatus};
use crate::walker;
use crate::crypto;

/// Appends a literal suffix to the final path component.
pub(super) fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

/// Rewrites a symlink's stored target so that, after the configured
/// transforms, the link still points at the artifact that will exist in
/// the destination. This is the only place link values are modified.
///
/// Absolute targets under `source_root` are rebased to a path relative to
/// the root; bare relative names are kept. In both cases a regular-file
/// target gains `.huff` when compression is on and `.enc` when per-file
/// encryption is on (packaging moves encryption to the package, so no
/// `.enc` then). Anything else is left verbatim.
pub fn retarget_symlink(
    target: &Path,
    source_root: &Path,
    target_is_regular: bool,
    compress: bool,
    encrypt: bool,
    package: bool,
) -> PathBuf {
    let rebased: Option<PathBuf> = if target.is_absolute() {
        match (walker::absolute(target), walker::absolute(source_root)) {
            (Ok(abs_target), Ok(abs_root)) => {
                abs_target.strip_prefix(&abs_root).ok().map(Path::to_path_buf)
            }
            _ => None,
        }
    } else if target.parent().map_or(true, |p| p.as_os_str().is_empty()) {
        // A bare name resolving next to the link itself.
        Some(target.to_path_buf())
    } else {
        None
    };

    match rebased {
        Some(mut p) => {
            if target_is_regular {
                if compress {
                    p = append_suffix(&p, ".huff");
                }
                if encrypt && !package {
                    p = append_suffix(&p, ".enc");
                }
            }
            p
        }
        None => target.to_path_buf(),
    }
}

/// One artifact produced by the materialization phase.
struct Written {
    /// Source snapshot the artifact came from.
    entry: Entry,
    /// The path actually written (may carry a `.huff` suffix).
    path: PathBuf,
}

pub struct BackupTask {
    config: BackupConfig,
    cancel: CancelFlag,
    status: TaskStatus,
}

impl BackupTask {
    pub fn new(config: BackupConfig, cancel: CancelFlag) -> Self {
        Self { config, cancel, status: TaskStatus::Pending }
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

    /// Runs the full pipeline. Progress and warnings go through `logger`
    /// and never influence the returned status.
    pub fn execute(&mut self, logger: &dyn Logger) -> TaskStatus {
        logger.info(&format!(
            "Starting backup: {} -> {}",
            self.config.source_dir.display(),
            self.config.destination_dir.display()
        ));
        self.status = TaskStatus::Running;

        self.status = match self.run(logger) {
            Ok(count) => {
                logger.info(&format!("Backup completed, {} entries processed", count));
                TaskStatus::Completed
            }
            Err(BackupError::Cancelled) => {
                logger.warn("Backup cancelled");
                TaskStatus::Cancelled
            }
            Err(e) => {
                logger.error(&format!("Backup failed: {}", e));
                TaskStatus::Failed
            }
        };
        self.status
    }

    fn run(&self, logger: &dyn Logger) -> Result<usize, BackupError> {
        let source = &self.config.source_dir;
        let dest = &self.config.destination_dir;

        // B1: validate endpoints.
        if !source.is_dir() {
            return Err(BackupError::SourceMissing(source.clone()));
        }
        fs::create_dir_all(dest)
            .map_err(|_| BackupError::DestinationUncreatable(dest.clone()))?;

        // B2: enumerate and filter.
        self.checkpoint()?;
        let filters = self.config.compiled_filters()?;
        let entries: Vec<Entry> = walker::walk_tree(source)?
            .into_iter()
            .filter(|e| filters.matches(e))
            .collect();
        logger.info(&format!("{} entries selected for backup", entries.len()));

        // B3: materialize per entry.
        self.checkpoint()?;
        let mut written: Vec<Written> = Vec::with_capacity(entries.len());
        for entry in entries {
            self.checkpoint()?;
            if let Some(w) = self.materialize(&entry, logger)? {
                written.push(w);
            }
        }
        // Directory timestamps last, after child writes stopped touching them.
        for w in written.iter().filter(|w| w.entry.is_dir()) {
            if let Err(e) = fsx::apply_metadata(
                &w.path,
                w.entry.mode,
                w.entry.atime,
                w.entry.mtime,
                None,
                EntryKind::Directory,
            ) {
                logger.warn(&format!("directory metadata on {}: {}", w.path.display(), e));
            }
        }

        // B4: package.
        self.checkpoint()?;
        if self.config.package_enabled {
            self.package_phase(&written, logger)?;
        }

        // B5: encrypt.
        self.checkpoint()?;
        if self.config.encryption_enabled() {
            self.encrypt_phase(&written, logger)?;
        }

        Ok(written.len())
    }

    /// Writes one entry into the destination; returns what landed on disk.
    fn materialize(
        &self,
        entry: &Entry,
        logger: &dyn Logger,
    ) -> Result<Option<Written>, BackupError> {
        let rel = walker::relative_path(&entry.path, &self.config.source_dir)?;
        let dest_path = self.config.destination_dir.join(&rel);
        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent).map_err(|e| BackupError::io(e, parent))?;
        }

        let written_path = match entry.kind {
            EntryKind::Directory => {
                fs::create_dir_all(&dest_path).map_err(|e| BackupError::io(e, &dest_path))?;
                dest_path
            }
            EntryKind::Regular => self.write_regular(entry, &dest_path, logger)?,
            EntryKind::Symlink => {
                let raw_target = entry
                    .symlink_target
                    .as_deref()
                    .expect("symlink entries always carry a target");
                let new_target = retarget_symlink(
                    raw_target,
                    &self.config.source_dir,
                    self.resolved_target_is_regular(entry, raw_target),
                    self.config.compress_enabled,
                    self.config.encryption_enabled(),
                    self.config.package_enabled,
                );
                fsx::replace_symlink(&new_target, &dest_path)?;
                if let Err(e) = fsx::apply_metadata(
                    &dest_path,
                    entry.mode,
                    entry.atime,
                    entry.mtime,
                    None,
                    EntryKind::Symlink,
                ) {
                    logger.warn(&format!("symlink metadata on {}: {}", dest_path.display(), e));
                }
                dest_path
            }
            EntryKind::Fifo => {
                fsx::make_fifo(&dest_path, entry.mode)
                    .map_err(|e| BackupError::io(e, &dest_path))?;
                self.carry_entry_metadata(entry, &dest_path, logger);
                dest_path
            }
            EntryKind::CharDev | EntryKind::BlockDev | EntryKind::Socket => {
                fsx::make_device_node(&dest_path, entry.kind, entry.mode)
                    .map_err(|e| BackupError::io(e, &dest_path))?;
                self.carry_entry_metadata(entry, &dest_path, logger);
                dest_path
            }
            EntryKind::Unknown => {
                logger.warn(&format!(
                    "skipping entry of unknown kind: {}",
                    entry.path.display()
                ));
                return Ok(None);
            }
        };

        logger.debug(&format!("backed up {}", written_path.display()));
        Ok(Some(Written { entry: entry.clone(), path: written_path }))
    }

    fn write_regular(
        &self,
        entry: &Entry,
        dest_path: &Path,
        logger: &dyn Logger,
    ) -> Result<PathBuf, BackupError> {
        let written = if self.config.compress_enabled {
            let huff_path = append_suffix(dest_path, ".huff");
            huffman::compress_file(&entry.path, &huff_path)?;
            let compressed_len = fs::metadata(&huff_path)
                .map_err(|e| BackupError::io(e, &huff_path))?
                .len();
            if compressed_len >= entry.size {
                // Compression did not pay; keep the raw form instead.
                fs::remove_file(&huff_path).map_err(|e| BackupError::io(e, &huff_path))?;
                fs::copy(&entry.path, dest_path).map_err(|e| BackupError::io(e, dest_path))?;
                dest_path.to_path_buf()
            } else {
                huff_path
            }
        } else {
            fs::copy(&entry.path, dest_path).map_err(|e| BackupError::io(e, dest_path))?;
            dest_path.to_path_buf()
        };

        self.carry_entry_metadata(entry, &written, logger);
        Ok(written)
    }

    fn carry_entry_metadata(&self, entry: &Entry, target: &Path, logger: &dyn Logger) {
        if let Err(e) =
            fsx::apply_metadata(target, entry.mode, entry.atime, entry.mtime, None, entry.kind)
        {
            logger.warn(&format!("metadata carry to {}: {}", target.display(), e));
        }
    }

    /// Whether a link target resolves to a regular file, judged without
    /// following further links.
    fn resolved_target_is_regular(&self, entry: &Entry, target: &Path) -> bool {
        let resolved = if target.is_absolute() {
            target.to_path_buf()
        } else {
            match entry.path.parent() {
                Some(parent) => parent.join(target),
                None => return false,
            }
        };
        fs::symlink_metadata(&resolved)
            .map(|m| m.file_type().is_file())
            .unwrap_or(false)
    }

    /// B4: fold everything written so far into a single package file, then
    /// drop the loose artifacts.
    fn package_phase(&self, written: &[Written], logger: &dyn Logger) -> Result<(), BackupError> {
        let dest = &self.config.destination_dir;
        let pkg_path = dest.join(&self.config.package_file_name);

        // Re-stat the artifacts: sizes and names may differ from the source
        // snapshots after compression.
        let mut pkg_entries = Vec::with_capacity(written.len());
        for w in written {
            pkg_entries.push(Entry::from_path(&w.path)?);
        }
        package::write_package(&pkg_entries, dest, &pkg_path, logger)?;
        logger.info(&format!("packaged backup into {}", pkg_path.display()));

        self.checkpoint()?;
        for w in written.iter().filter(|w| !w.entry.is_dir()) {
            fs::remove_file(&w.path).map_err(|e| BackupError::io(e, &w.path))?;
        }
        fsx::prune_empty_dirs(dest).map_err(|e| BackupError::io(e, dest))?;
        Ok(())
    }

    /// B5: encrypt the package, or each loose file, in place.
    fn encrypt_phase(&self, written: &[Written], logger: &dyn Logger) -> Result<(), BackupError> {
        let password = &self.config.password;
        let dest = &self.config.destination_dir;

        if self.config.package_enabled {
            let pkg_path = dest.join(&self.config.package_file_name);
            let enc_path = dest.join(self.config.encrypted_package_name());
            crypto::encrypt_file(&pkg_path, &enc_path, password)
                .map_err(|e| BackupError::EncryptFailed(format!("{}: {}", pkg_path.display(), e)))?;
            if let Err(e) = fsx::carry_file_times(&pkg_path, &enc_path) {
                logger.warn(&format!("metadata carry to {}: {}", enc_path.display(), e));
            }
            fs::remove_file(&pkg_path).map_err(|e| BackupError::io(e, &pkg_path))?;
            logger.info(&format!("encrypted package as {}", enc_path.display()));
        } else {
            for w in written.iter().filter(|w| w.entry.is_regular()) {
                let enc_path = append_suffix(&w.path, ".enc");
                crypto::encrypt_file(&w.path, &enc_path, password)
                    .map_err(|e| BackupError::EncryptFailed(format!("{}: {}", w.path.display(), e)))?;
                if let Err(e) = fsx::carry_file_times(&w.path, &enc_path) {
                    logger.warn(&format!("metadata carry to {}: {}", enc_path.display(), e));
                }
                fs::remove_file(&w.path).map_err(|e| BackupError::io(e, &w.path))?;
            }
            logger.info("encrypted backup files in place");
        }
        Ok(())
    }
}
