//! Package container format.
//!
//! A package is a single self-describing file:
//!
//! ```text
//! [0..8)    u64 LE  metadata_offset (0 until patched at the end)
//! [8..M)            concatenated contents of regular entries, no framing
//! [M..end)          metadata table: u32 LE count, then `count` records
//! ```
//!
//! Each record stores the relative name (`/` separators, so packages are
//! portable), size, content offset, a compressed-name flag, mode,
//! ctime/mtime/atime, the entry kind, and the symlink target. All integers
//! are little-endian. The leading offset is written as zero first and
//! patched once the table position is known; a package whose offset is
//! still zero was never finalized and is rejected.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::entry::{Entry, EntryKind};
use crate::error::BackupError;
use crate::fsx;
use crate::logger::Logger;
use crate::walker;

const OFFSET_FIELD_LEN: u64 = 8;

/// Persisted metadata of one packaged entry.
#[derive(Debug, Clone)]
pub struct PackageRecord {
    /// Relative path with `/` separators.
    pub name: String,
    pub size: u64,
    pub offset: u64,
    /// Informational: the stored name carries a `.huff` suffix.
    pub compressed: bool,
    pub mode: u32,
    pub ctime: u64,
    pub mtime: u64,
    pub atime: u64,
    pub kind: EntryKind,
    /// Verbatim link value; empty for non-symlinks.
    pub symlink_target: String,
}

impl PackageRecord {
    /// The record's name as a relative host path.
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(self.name.replace('/', std::path::MAIN_SEPARATOR_STR))
    }
}

fn portable_name(entry_path: &Path, base: &Path) -> Result<String, BackupError> {
    let rel = walker::relative_path(entry_path, base)?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

/// Encodes `entries` (paths interpreted relative to `base`) into a package
/// at `output`. Entry order on disk matches input order; only regular
/// files contribute content bytes.
pub fn write_package(
    entries: &[Entry],
    base: &Path,
    output: &Path,
    logger: &dyn Logger,
) -> Result<(), BackupError> {
    let file = File::create(output).map_err(|e| BackupError::io(e, output))?;
    let mut writer = BufWriter::new(file);

    // Placeholder, patched after the table position is known.
    writer
        .write_all(&0u64.to_le_bytes())
        .map_err(|e| BackupError::io(e, output))?;

    let mut records = Vec::with_capacity(entries.len());
    let mut current_offset = OFFSET_FIELD_LEN;

    for entry in entries {
        let name = portable_name(&entry.path, base)?;
        let mut record = PackageRecord {
            compressed: name.ends_with(".huff"),
            name,
            size: 0,
            offset: current_offset,
            mode: entry.mode,
            ctime: entry.ctime,
            mtime: entry.mtime,
            atime: entry.atime,
            kind: entry.kind,
            symlink_target: entry
                .symlink_target
                .as_ref()
                .map(|t| t.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };

        if entry.kind == EntryKind::Regular {
            let written = if let Some(content) = entry.content() {
                writer
                    .write_all(content)
                    .map_err(|e| BackupError::io(e, &entry.path))?;
                content.len() as u64
            } else {
                let mut input =
                    File::open(&entry.path).map_err(|e| BackupError::io(e, &entry.path))?;
                std::io::copy(&mut input, &mut writer)
                    .map_err(|e| BackupError::io(e, &entry.path))?
            };
            record.size = written;
            current_offset += written;
        }

        records.push(record);
    }

    let metadata_offset = current_offset;
    write_metadata(&mut writer, &records).map_err(|e| BackupError::io(e, output))?;

    writer
        .seek(SeekFrom::Start(0))
        .map_err(|e| BackupError::io(e, output))?;
    writer
        .write_all(&metadata_offset.to_le_bytes())
        .map_err(|e| BackupError::io(e, output))?;
    writer.flush().map_err(|e| BackupError::io(e, output))?;

    logger.debug(&format!(
        "packaged {} entries into {} (metadata at offset {})",
        records.len(),
        output.display(),
        metadata_offset
    ));
    Ok(())
}

fn write_metadata<W: Write>(writer: &mut W, records: &[PackageRecord]) -> std::io::Result<()> {
    writer.write_all(&(records.len() as u32).to_le_bytes())?;
    for r in records {
        let name = r.name.as_bytes();
        writer.write_all(&(name.len() as u32).to_le_bytes())?;
        writer.write_all(name)?;
        writer.write_all(&r.size.to_le_bytes())?;
        writer.write_all(&r.offset.to_le_bytes())?;
        writer.write_all(&[u8::from(r.compressed)])?;
        writer.write_all(&r.mode.to_le_bytes())?;
        writer.write_all(&r.ctime.to_le_bytes())?;
        writer.write_all(&r.mtime.to_le_bytes())?;
        writer.write_all(&r.atime.to_le_bytes())?;
        let code = r.kind.wire_code().expect("unknown kinds never reach the encoder");
        writer.write_all(&code.to_le_bytes())?;
        let target = r.symlink_target.as_bytes();
        writer.write_all(&(target.len() as u32).to_le_bytes())?;
        writer.write_all(target)?;
    }
    Ok(())
}

struct TableReader<R: Read> {
    inner: R,
}

impl<R: Read> TableReader<R> {
    fn u8(&mut self) -> Result<u8, BackupError> {
        let mut b = [0u8; 1];
        self.inner
            .read_exact(&mut b)
            .map_err(|_| BackupError::PackageMalformed("truncated metadata table".into()))?;
        Ok(b[0])
    }

    fn u16(&mut self) -> Result<u16, BackupError> {
        let mut b = [0u8; 2];
        self.inner
            .read_exact(&mut b)
            .map_err(|_| BackupError::PackageMalformed("truncated metadata table".into()))?;
        Ok(u16::from_le_bytes(b))
    }

    fn u32(&mut self) -> Result<u32, BackupError> {
        let mut b = [0u8; 4];
        self.inner
            .read_exact(&mut b)
            .map_err(|_| BackupError::PackageMalformed("truncated metadata table".into()))?;
        Ok(u32::from_le_bytes(b))
    }

    fn u64(&mut self) -> Result<u64, BackupError> {
        let mut b = [0u8; 8];
        self.inner
            .read_exact(&mut b)
            .map_err(|_| BackupError::PackageMalformed("truncated metadata table".into()))?;
        Ok(u64::from_le_bytes(b))
    }

    fn string(&mut self, len: usize, what: &str) -> Result<String, BackupError> {
        let mut buf = vec![0u8; len];
        self.inner
            .read_exact(&mut buf)
            .map_err(|_| BackupError::PackageMalformed(format!("truncated {}", what)))?;
        String::from_utf8(buf)
            .map_err(|_| BackupError::PackageMalformed(format!("{} is not UTF-8", what)))
    }
}

/// Parses the metadata table of the package at `input` without
/// materializing anything.
pub fn read_records(input: &Path) -> Result<Vec<PackageRecord>, BackupError> {
    let file = File::open(input).map_err(|e| BackupError::io(e, input))?;
    let file_len = file
        .metadata()
        .map_err(|e| BackupError::io(e, input))?
        .len();
    let mut reader = BufReader::new(file);

    let mut offset_bytes = [0u8; 8];
    reader
        .read_exact(&mut offset_bytes)
        .map_err(|_| BackupError::PackageMalformed("file shorter than the offset field".into()))?;
    let metadata_offset = u64::from_le_bytes(offset_bytes);

    if metadata_offset == 0 {
        return Err(BackupError::PackageMalformed(
            "metadata offset is the unpatched placeholder; package was never finalized".into(),
        ));
    }
    if metadata_offset < OFFSET_FIELD_LEN || metadata_offset >= file_len {
        return Err(BackupError::PackageMalformed(format!(
            "metadata offset {} outside file of {} bytes",
            metadata_offset, file_len
        )));
    }

    reader
        .seek(SeekFrom::Start(metadata_offset))
        .map_err(|e| BackupError::io(e, input))?;
    let mut table = TableReader { inner: reader };

    let count = table.u32()? as u64;
    let remaining = file_len - metadata_offset;
    // Each record occupies at least its fixed fields; an impossible count
    // means a corrupt table rather than a huge allocation.
    if count > remaining / 47 + 1 {
        return Err(BackupError::PackageMalformed(format!(
            "record count {} impossible for a {}-byte table",
            count, remaining
        )));
    }

    let mut records = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name_len = table.u32()? as u64;
        if name_len > remaining {
            return Err(BackupError::PackageMalformed("name length overruns the file".into()));
        }
        let name = table.string(name_len as usize, "entry name")?;
        let size = table.u64()?;
        let offset = table.u64()?;
        let compressed = table.u8()? != 0;
        let mode = table.u32()?;
        let ctime = table.u64()?;
        let mtime = table.u64()?;
        let atime = table.u64()?;
        let kind_code = table.u16()?;
        let kind = EntryKind::from_wire_code(kind_code).ok_or_else(|| {
            BackupError::PackageMalformed(format!("unknown entry kind {}", kind_code))
        })?;
        let target_len = table.u32()? as u64;
        if target_len > remaining {
            return Err(BackupError::PackageMalformed("symlink target overruns the file".into()));
        }
        let symlink_target = table.string(target_len as usize, "symlink target")?;

        if kind == EntryKind::Regular
            && (offset < OFFSET_FIELD_LEN || offset.saturating_add(size) > metadata_offset)
        {
            return Err(BackupError::PackageMalformed(format!(
                "content range {}+{} escapes the content region",
                offset, size
            )));
        }

        records.push(PackageRecord {
            name,
            size,
            offset,
            compressed,
            mode,
            ctime,
            mtime,
            atime,
            kind,
            symlink_target,
        });
    }
    Ok(records)
}

/// Decodes the package at `input` into `output_dir`, materializing every
/// entry and reapplying its recorded metadata. Returns the parsed records
/// so callers can run their own terminal metadata pass after further
/// transforms.
pub fn read_package(
    input: &Path,
    output_dir: &Path,
    logger: &dyn Logger,
) -> Result<Vec<PackageRecord>, BackupError> {
    let records = read_records(input)?;
    fs::create_dir_all(output_dir).map_err(|e| BackupError::io(e, output_dir))?;

    let mut file = File::open(input).map_err(|e| BackupError::io(e, input))?;

    for record in &records {
        let target = output_dir.join(record.relative_path());
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| BackupError::io(e, parent))?;
        }

        match record.kind {
            EntryKind::Regular => {
                file.seek(SeekFrom::Start(record.offset))
                    .map_err(|e| BackupError::io(e, input))?;
                let mut out = File::create(&target).map_err(|e| BackupError::io(e, &target))?;
                let mut limited = (&mut file).take(record.size);
                let copied =
                    std::io::copy(&mut limited, &mut out).map_err(|e| BackupError::io(e, &target))?;
                if copied != record.size {
                    return Err(BackupError::PackageMalformed(format!(
                        "content for '{}' ends after {} of {} bytes",
                        record.name, copied, record.size
                    )));
                }
            }
            EntryKind::Directory => {
                fs::create_dir_all(&target).map_err(|e| BackupError::io(e, &target))?;
            }
            EntryKind::Symlink => {
                fsx::replace_symlink(Path::new(&record.symlink_target), &target)?;
            }
            EntryKind::Fifo => {
                if let Err(e) = fsx::make_fifo(&target, record.mode) {
                    logger.warn(&format!(
                        "skipping FIFO '{}': {}",
                        record.name, e
                    ));
                    continue;
                }
            }
            other => {
                logger.warn(&format!(
                    "skipping unsupported entry kind {:?} for '{}'",
                    other, record.name
                ));
                continue;
            }
        }

        if let Err(e) = fsx::apply_metadata(
            &target,
            record.mode,
            record.atime,
            record.mtime,
            Some(record.ctime),
            record.kind,
        ) {
            logger.warn(&format!("metadata reapply failed for '{}': {}", record.name, e));
        }
    }

    logger.debug(&format!(
        "unpacked {} entries from {} into {}",
        records.len(),
        input.display(),
        output_dir.display()
    ));
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::MemoryLogger;
    use tempfile::tempdir;

    fn build_source() -> (tempfile::TempDir, Vec<Entry>) {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("alpha.txt"), b"alpha contents").unwrap();
        fs::create_dir(root.join("sub")).unwrap();
        fs::write(root.join("sub/beta.bin"), vec![7u8; 300]).unwrap();
        fs::create_dir(root.join("hollow")).unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink("alpha.txt", root.join("ln")).unwrap();

        let entries = crate::walker::walk_tree(root).unwrap();
        (dir, entries)
    }

    #[test]
    fn package_round_trip_preserves_contents_and_metadata() {
        let (src, entries) = build_source();
        let pkg_dir = tempdir().unwrap();
        let pkg = pkg_dir.path().join("backup.pkg");
        let logger = MemoryLogger::new();

        write_package(&entries, src.path(), &pkg, &logger).unwrap();

        let out = tempdir().unwrap();
        let records = read_package(&pkg, out.path(), &logger).unwrap();
        assert_eq!(records.len(), entries.len());

        assert_eq!(fs::read(out.path().join("alpha.txt")).unwrap(), b"alpha contents");
        assert_eq!(fs::read(out.path().join("sub/beta.bin")).unwrap(), vec![7u8; 300]);
        assert!(out.path().join("hollow").is_dir());

        #[cfg(unix)]
        {
            let link = out.path().join("ln");
            assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
            assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("alpha.txt"));
        }

        // Metadata tuple survives the trip.
        let alpha_rec = records.iter().find(|r| r.name == "alpha.txt").unwrap();
        let alpha_src = entries.iter().find(|e| e.name == "alpha.txt").unwrap();
        assert_eq!(alpha_rec.kind, EntryKind::Regular);
        assert_eq!(alpha_rec.mode, alpha_src.mode);
        assert_eq!(alpha_rec.mtime, alpha_src.mtime);
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            let meta = fs::metadata(out.path().join("alpha.txt")).unwrap();
            assert_eq!(meta.mode() & 0o7777, alpha_src.mode);
            assert_eq!(meta.mtime() as u64, alpha_src.mtime);
        }
    }

    #[test]
    fn names_are_stored_with_forward_slashes() {
        let (src, entries) = build_source();
        let pkg_dir = tempdir().unwrap();
        let pkg = pkg_dir.path().join("backup.pkg");
        write_package(&entries, src.path(), &pkg, &MemoryLogger::new()).unwrap();

        let records = read_records(&pkg).unwrap();
        assert!(records.iter().any(|r| r.name == "sub/beta.bin"));
    }

    #[test]
    fn unpatched_placeholder_is_rejected() {
        let (src, entries) = build_source();
        let pkg_dir = tempdir().unwrap();
        let pkg = pkg_dir.path().join("backup.pkg");
        write_package(&entries, src.path(), &pkg, &MemoryLogger::new()).unwrap();

        // Zero the offset field back out, simulating an interrupted writer.
        let mut data = fs::read(&pkg).unwrap();
        data[..8].fill(0);
        fs::write(&pkg, &data).unwrap();

        let err = read_records(&pkg).unwrap_err();
        assert!(matches!(err, BackupError::PackageMalformed(_)));
    }

    #[test]
    fn offset_past_eof_is_rejected() {
        let dir = tempdir().unwrap();
        let pkg = dir.path().join("bogus.pkg");
        let mut f = File::create(&pkg).unwrap();
        f.write_all(&9999u64.to_le_bytes()).unwrap();
        f.write_all(b"short").unwrap();
        drop(f);

        assert!(matches!(read_records(&pkg), Err(BackupError::PackageMalformed(_))));
    }

    #[test]
    fn empty_entry_list_round_trips() {
        let dir = tempdir().unwrap();
        let pkg = dir.path().join("empty.pkg");
        write_package(&[], dir.path(), &pkg, &MemoryLogger::new()).unwrap();
        assert_eq!(read_records(&pkg).unwrap().len(), 0);
    }
}
