use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::tempdir;
use treevault::config::{BackupConfig, RealtimeConfig, TimerConfig};
use treevault::error::BackupError;
use treevault::logger::{LogLevel, Logger, MemoryLogger};
use treevault::realtime::RealtimeBackupManager;
use treevault::registry::ActiveDestinations;
use treevault::timer::TimerBackupManager;

fn test_logger() -> Arc<MemoryLogger> {
    let logger = MemoryLogger::new();
    logger.set_level(LogLevel::Info);
    Arc::new(logger)
}

fn timer_config(source: &std::path::Path, dest: &std::path::Path, secs: u64) -> TimerConfig {
    TimerConfig {
        backup: BackupConfig::new(source, dest),
        interval_seconds: secs,
    }
}

#[test]
fn immediate_stop_exits_within_bounded_latency() {
    let source = tempdir().unwrap();
    fs::write(source.path().join("f.txt"), b"f").unwrap();
    let backup = tempdir().unwrap();

    let mut manager = TimerBackupManager::new(test_logger(), ActiveDestinations::new());
    manager.start(timer_config(source.path(), backup.path(), 5)).unwrap();
    assert!(manager.is_running());

    let started = Instant::now();
    manager.stop();
    assert!(!manager.is_running());
    // The 5-second interval must not delay shutdown.
    assert!(started.elapsed() < Duration::from_secs(2), "stop took {:?}", started.elapsed());
}

#[test]
fn periodic_backups_fire_on_the_interval() {
    let source = tempdir().unwrap();
    fs::write(source.path().join("f.txt"), b"tick").unwrap();
    let backup = tempdir().unwrap();

    let logger = test_logger();
    let mut manager = TimerBackupManager::new(logger.clone(), ActiveDestinations::new());
    manager.start(timer_config(source.path(), backup.path(), 1)).unwrap();

    // First run happens right away; at least one more follows the interval.
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let completions = logger
            .records()
            .iter()
            .filter(|(_, m)| m.starts_with("Backup completed"))
            .count();
        if completions >= 2 || Instant::now() >= deadline {
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    manager.stop();

    let completions = logger
        .records()
        .iter()
        .filter(|(_, m)| m.starts_with("Backup completed"))
        .count();
    assert!(completions >= 2, "only {} completions", completions);
    assert_eq!(fs::read(backup.path().join("f.txt")).unwrap(), b"tick");
}

#[test]
fn pause_suspends_and_resume_restarts() {
    let source = tempdir().unwrap();
    fs::write(source.path().join("f.txt"), b"p").unwrap();
    let backup = tempdir().unwrap();

    let mut manager = TimerBackupManager::new(test_logger(), ActiveDestinations::new());
    manager.start(timer_config(source.path(), backup.path(), 1)).unwrap();

    manager.pause();
    assert!(manager.is_paused());
    manager.resume();
    assert!(!manager.is_paused());
    manager.stop();
}

#[test]
fn missing_source_rejects_start() {
    let backup = tempdir().unwrap();
    let mut manager = TimerBackupManager::new(test_logger(), ActiveDestinations::new());
    let err = manager
        .start(timer_config(std::path::Path::new("/gone"), backup.path(), 1))
        .unwrap_err();
    assert!(matches!(err, BackupError::SourceMissing(_)));
    assert!(!manager.is_running());
}

#[test]
fn schedulers_for_the_same_destination_are_mutually_exclusive() {
    let source = tempdir().unwrap();
    fs::write(source.path().join("f.txt"), b"f").unwrap();
    let backup = tempdir().unwrap();
    let registry = ActiveDestinations::new();

    let mut timer = TimerBackupManager::new(test_logger(), registry.clone());
    timer.start(timer_config(source.path(), backup.path(), 60)).unwrap();

    // A change-driven scheduler aimed at the same destination is rejected.
    let mut watcher = RealtimeBackupManager::new(test_logger(), registry.clone());
    let err = watcher
        .start(RealtimeConfig {
            backup: BackupConfig::new(source.path(), backup.path()),
            debounce_ms: 100,
        })
        .unwrap_err();
    assert!(matches!(err, BackupError::SchedulerConflict(_)));

    // A second timer instance is rejected too.
    let mut second = TimerBackupManager::new(test_logger(), registry.clone());
    let err = second
        .start(timer_config(source.path(), backup.path(), 60))
        .unwrap_err();
    assert!(matches!(err, BackupError::SchedulerConflict(_)));

    timer.stop();

    // Released destination can be taken over.
    let mut third = TimerBackupManager::new(test_logger(), registry);
    third.start(timer_config(source.path(), backup.path(), 60)).unwrap();
    third.stop();
}

#[test]
fn set_interval_applies_to_the_next_wait() {
    let source = tempdir().unwrap();
    fs::write(source.path().join("f.txt"), b"f").unwrap();
    let backup = tempdir().unwrap();

    let mut manager = TimerBackupManager::new(test_logger(), ActiveDestinations::new());
    manager.start(timer_config(source.path(), backup.path(), 600)).unwrap();
    manager.set_interval(1);
    assert_eq!(manager.config().unwrap().interval_seconds, 1);

    manager.update_config(BackupConfig::new(source.path(), backup.path()), None);
    // Interval preserved unless explicitly changed.
    assert_eq!(manager.config().unwrap().interval_seconds, 1);
    manager.stop();
}
