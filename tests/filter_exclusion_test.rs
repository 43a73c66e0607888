use std::fs;
use std::sync::Arc;

use tempfile::tempdir;
use treevault::config::BackupConfig;
use treevault::logger::{LogLevel, Logger, MemoryLogger};
use treevault::status::{CancelFlag, TaskStatus};
use treevault::tasks::BackupTask;

fn test_logger() -> Arc<MemoryLogger> {
    let logger = MemoryLogger::new();
    logger.set_level(LogLevel::Warn);
    Arc::new(logger)
}

#[test]
fn path_and_name_filters_exclude_entries() {
    // docs/x.txt and images/y.jpg survive; temp/ and *.tmp do not.
    let source = tempdir().unwrap();
    fs::create_dir(source.path().join("docs")).unwrap();
    fs::write(source.path().join("docs/x.txt"), b"x").unwrap();
    fs::create_dir(source.path().join("images")).unwrap();
    fs::write(source.path().join("images/y.jpg"), b"y").unwrap();
    fs::create_dir(source.path().join("temp")).unwrap();
    fs::write(source.path().join("temp/z.tmp"), b"z").unwrap();
    fs::write(source.path().join("stray.tmp"), b"s").unwrap();

    let backup = tempdir().unwrap();
    let mut config = BackupConfig::new(source.path(), backup.path());
    config
        .filters
        .exclude_paths
        .push(source.path().join("temp").to_string_lossy().into_owned());
    config.filters.name_exclude.push(r".*\.tmp$".to_string());

    let logger = test_logger();
    let mut task = BackupTask::new(config, CancelFlag::new());
    assert_eq!(task.execute(&*logger), TaskStatus::Completed);

    assert_eq!(fs::read(backup.path().join("docs/x.txt")).unwrap(), b"x");
    assert_eq!(fs::read(backup.path().join("images/y.jpg")).unwrap(), b"y");
    assert!(!backup.path().join("temp").exists());
    assert!(!backup.path().join("stray.tmp").exists());
}

#[test]
fn extension_filter_limits_regular_files_only() {
    let source = tempdir().unwrap();
    fs::create_dir(source.path().join("keepdir")).unwrap();
    fs::write(source.path().join("keepdir/a.txt"), b"a").unwrap();
    fs::write(source.path().join("b.log"), b"b").unwrap();

    let backup = tempdir().unwrap();
    let mut config = BackupConfig::new(source.path(), backup.path());
    config.filters.extensions.push("txt".to_string());

    let logger = test_logger();
    let mut task = BackupTask::new(config, CancelFlag::new());
    assert_eq!(task.execute(&*logger), TaskStatus::Completed);

    // The directory passes the extension filter, the .log file does not.
    assert!(backup.path().join("keepdir/a.txt").is_file());
    assert!(!backup.path().join("b.log").exists());
}

#[test]
fn size_filter_bounds_backup_contents() {
    let source = tempdir().unwrap();
    fs::write(source.path().join("small.bin"), vec![1u8; 10]).unwrap();
    fs::write(source.path().join("medium.bin"), vec![2u8; 100]).unwrap();
    fs::write(source.path().join("large.bin"), vec![3u8; 1000]).unwrap();

    let backup = tempdir().unwrap();
    let mut config = BackupConfig::new(source.path(), backup.path());
    config.filters.min_size = 50;
    config.filters.max_size = 500;

    let logger = test_logger();
    let mut task = BackupTask::new(config, CancelFlag::new());
    assert_eq!(task.execute(&*logger), TaskStatus::Completed);

    assert!(!backup.path().join("small.bin").exists());
    assert!(backup.path().join("medium.bin").is_file());
    assert!(!backup.path().join("large.bin").exists());
}

#[test]
fn invalid_pattern_fails_before_any_io() {
    let source = tempdir().unwrap();
    fs::write(source.path().join("file.txt"), b"f").unwrap();

    let backup = tempdir().unwrap();
    let mut config = BackupConfig::new(source.path(), backup.path());
    config.filters.name_include.push("[broken".to_string());

    let logger = test_logger();
    let mut task = BackupTask::new(config, CancelFlag::new());
    assert_eq!(task.execute(&*logger), TaskStatus::Failed);
    assert!(fs::read_dir(backup.path()).unwrap().next().is_none());
}
