use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use rand::RngCore;
use tempfile::tempdir;
use treevault::config::BackupConfig;
use treevault::logger::{LogLevel, MemoryLogger};
use treevault::logger::Logger;
use treevault::status::{CancelFlag, TaskStatus};
use treevault::tasks::{BackupTask, RestoreTask};

fn test_logger() -> Arc<MemoryLogger> {
    let logger = MemoryLogger::new();
    logger.set_level(LogLevel::Warn);
    Arc::new(logger)
}

// Helper function to create a directory with some random files
fn create_test_data(dir: &Path, num_files: usize, file_size: usize) -> std::io::Result<()> {
    fs::create_dir_all(dir)?;
    let mut rng = rand::thread_rng();
    for i in 0..num_files {
        let file_path = dir.join(format!("file_{}.bin", i));
        let mut file = fs::File::create(&file_path)?;
        let mut buffer = vec![0u8; file_size];
        rng.fill_bytes(&mut buffer);
        file.write_all(&buffer)?;
    }
    Ok(())
}

fn assert_files_equal(dir1: &Path, dir2: &Path, num_files: usize) {
    for i in 0..num_files {
        let name = format!("file_{}.bin", i);
        let c1 = fs::read(dir1.join(&name)).unwrap();
        let c2 = fs::read(dir2.join(&name)).unwrap();
        assert_eq!(c1, c2, "contents differ for {}", name);
    }
}

#[test]
fn encrypted_package_backup_and_restore() {
    // 1. Setup: ten files of random bytes.
    let source = tempdir().unwrap();
    create_test_data(source.path(), 10, 1024).unwrap();

    let backup = tempdir().unwrap();
    let mut config = BackupConfig::new(source.path(), backup.path());
    config.compress_enabled = true;
    config.package_enabled = true;
    config.password = "StrongPassword123!".to_string();

    let logger = test_logger();
    let mut task = BackupTask::new(config.clone(), CancelFlag::new());
    assert_eq!(task.execute(&*logger), TaskStatus::Completed);

    // 2. The destination holds exactly the encrypted package, nothing else.
    let listing: Vec<_> = fs::read_dir(backup.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(listing, vec!["backup.pkg.enc".to_string()]);

    // 3. Restore with the right password reproduces the tree.
    let restore = tempdir().unwrap();
    let mut task = RestoreTask::new(&config, restore.path(), CancelFlag::new()).unwrap();
    assert_eq!(task.execute(&*logger), TaskStatus::Completed);
    assert_files_equal(source.path(), restore.path(), 10);

    // 4. The decrypt temp and unpack directory are gone again.
    assert!(!backup.path().join("backup.pkg.enc.tmp").exists());
    assert!(!backup.path().join("temp_unpack").exists());
}

#[test]
fn restore_fails_with_wrong_password() {
    let source = tempdir().unwrap();
    create_test_data(source.path(), 3, 512).unwrap();

    let backup = tempdir().unwrap();
    let mut config = BackupConfig::new(source.path(), backup.path());
    config.package_enabled = true;
    config.password = "correct_password".to_string();

    let logger = test_logger();
    let mut task = BackupTask::new(config.clone(), CancelFlag::new());
    assert_eq!(task.execute(&*logger), TaskStatus::Completed);

    let restore = tempdir().unwrap();
    let mut wrong = config.clone();
    wrong.password = "wrong_password".to_string();
    let mut task = RestoreTask::new(&wrong, restore.path(), CancelFlag::new()).unwrap();
    assert_eq!(task.execute(&*logger), TaskStatus::Failed);

    // Cleanup ran on the failure path too.
    assert!(!backup.path().join("backup.pkg.enc.tmp").exists());
    assert!(!backup.path().join("temp_unpack").exists());
}

#[test]
fn restore_fails_without_password_for_encrypted_backup() {
    let source = tempdir().unwrap();
    create_test_data(source.path(), 2, 128).unwrap();

    let backup = tempdir().unwrap();
    let mut config = BackupConfig::new(source.path(), backup.path());
    config.package_enabled = true;
    config.password = "a_password".to_string();

    let logger = test_logger();
    let mut task = BackupTask::new(config.clone(), CancelFlag::new());
    assert_eq!(task.execute(&*logger), TaskStatus::Completed);

    let restore = tempdir().unwrap();
    let mut without = config.clone();
    without.password.clear();
    let mut task = RestoreTask::new(&without, restore.path(), CancelFlag::new()).unwrap();
    assert_eq!(task.execute(&*logger), TaskStatus::Failed);
    assert!(logger
        .records()
        .iter()
        .any(|(l, m)| *l == LogLevel::Error && m.contains("no password")));
}

#[test]
fn unencrypted_package_round_trips() {
    let source = tempdir().unwrap();
    create_test_data(source.path(), 4, 256).unwrap();
    fs::create_dir(source.path().join("nested")).unwrap();
    fs::write(source.path().join("nested/inner.txt"), b"inner").unwrap();

    let backup = tempdir().unwrap();
    let mut config = BackupConfig::new(source.path(), backup.path());
    config.package_enabled = true;

    let logger = test_logger();
    let mut task = BackupTask::new(config.clone(), CancelFlag::new());
    assert_eq!(task.execute(&*logger), TaskStatus::Completed);

    // Plain package, loose artifacts deleted, empty dirs pruned.
    assert!(backup.path().join("backup.pkg").is_file());
    assert!(!backup.path().join("nested").exists());

    let restore = tempdir().unwrap();
    let mut task = RestoreTask::new(&config, restore.path(), CancelFlag::new()).unwrap();
    assert_eq!(task.execute(&*logger), TaskStatus::Completed);
    assert_files_equal(source.path(), restore.path(), 4);
    assert_eq!(fs::read(restore.path().join("nested/inner.txt")).unwrap(), b"inner");
}
