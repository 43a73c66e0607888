//! Periodic backup scheduler.
//!
//! A worker thread runs one backup per interval, waiting out the gap on a
//! condition variable so `stop` wakes it immediately. The in-flight task
//! shares the manager's cancel flag, which bounds shutdown latency by one
//! task checkpoint.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::{BackupConfig, TimerConfig};
use crate::error::BackupError;
use crate::logger::Logger;
use crate::registry::ActiveDestinations;
use crate::status::CancelFlag;
use crate::tasks::BackupTask;

struct TimerShared {
    config: Mutex<TimerConfig>,
    cv: Condvar,
    running: AtomicBool,
    paused: AtomicBool,
    cancel: CancelFlag,
}

pub struct TimerBackupManager {
    logger: Arc<dyn Logger>,
    registry: ActiveDestinations,
    shared: Option<Arc<TimerShared>>,
    worker: Option<JoinHandle<()>>,
    claimed_dest: Option<PathBuf>,
}

impl TimerBackupManager {
    pub fn new(logger: Arc<dyn Logger>, registry: ActiveDestinations) -> Self {
        Self { logger, registry, shared: None, worker: None, claimed_dest: None }
    }

    pub fn is_running(&self) -> bool {
        self.shared
            .as_ref()
            .map(|s| s.running.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    pub fn is_paused(&self) -> bool {
        self.shared
            .as_ref()
            .map(|s| s.paused.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Starts the interval loop. Rejected while this or any other
    /// scheduler owns the destination, or when the source is missing.
    pub fn start(&mut self, config: TimerConfig) -> Result<(), BackupError> {
        if self.is_running() {
            return Err(BackupError::SchedulerConflict(
                "timer backup is already running".into(),
            ));
        }
        if !config.backup.source_dir.is_dir() {
            return Err(BackupError::SourceMissing(config.backup.source_dir.clone()));
        }
        let dest = config.backup.destination_dir.clone();
        if !self.registry.claim(&dest) {
            return Err(BackupError::SchedulerConflict(format!(
                "another scheduler already targets {}",
                dest.display()
            )));
        }
        self.claimed_dest = Some(dest);

        let interval = config.interval_seconds;
        let shared = Arc::new(TimerShared {
            config: Mutex::new(config),
            cv: Condvar::new(),
            running: AtomicBool::new(true),
            paused: AtomicBool::new(false),
            cancel: CancelFlag::new(),
        });
        self.shared = Some(Arc::clone(&shared));

        let logger = Arc::clone(&self.logger);
        self.worker = Some(std::thread::spawn(move || {
            worker_loop(shared, logger);
        }));

        self.logger
            .info(&format!("Timer backup started with interval: {} seconds", interval));
        Ok(())
    }

    /// Stops the loop and joins the worker. A backup in flight observes
    /// the cancel flag at its next checkpoint.
    pub fn stop(&mut self) {
        let Some(shared) = self.shared.clone() else { return };
        if shared.running.swap(false, Ordering::SeqCst) {
            self.logger.info("Stopping timer backup...");
            shared.cancel.cancel();
            shared.cv.notify_all();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        if let Some(dest) = self.claimed_dest.take() {
            self.registry.release(&dest);
        }
        self.logger.info("Timer backup stopped");
    }

    pub fn pause(&self) {
        if let Some(shared) = self.shared.as_ref() {
            if shared.running.load(Ordering::SeqCst)
                && !shared.paused.swap(true, Ordering::SeqCst)
            {
                self.logger.info("Timer backup paused");
            }
        }
    }

    pub fn resume(&self) {
        if let Some(shared) = self.shared.as_ref() {
            if shared.running.load(Ordering::SeqCst)
                && shared.paused.swap(false, Ordering::SeqCst)
            {
                shared.cv.notify_all();
                self.logger.info("Timer backup resumed");
            }
        }
    }

    /// Updates the interval in place; the next wait honours it.
    pub fn set_interval(&self, seconds: u64) {
        if seconds == 0 {
            return;
        }
        if let Some(shared) = self.shared.as_ref() {
            shared.config.lock().unwrap().interval_seconds = seconds;
            self.logger
                .info(&format!("Timer backup interval updated to {} seconds", seconds));
        }
    }

    /// Atomically replaces the backup parameters. The current interval is
    /// preserved unless `interval_seconds` explicitly changes it.
    pub fn update_config(&self, backup: BackupConfig, interval_seconds: Option<u64>) {
        if let Some(shared) = self.shared.as_ref() {
            let mut cfg = shared.config.lock().unwrap();
            cfg.backup = backup;
            if let Some(secs) = interval_seconds {
                if secs > 0 {
                    cfg.interval_seconds = secs;
                }
            }
            self.logger.info("Timer backup configuration updated");
        }
    }

    pub fn config(&self) -> Option<TimerConfig> {
        self.shared.as_ref().map(|s| s.config.lock().unwrap().clone())
    }
}

impl Drop for TimerBackupManager {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: Arc<TimerShared>, logger: Arc<dyn Logger>) {
    logger.debug("Timer backup worker started");
    while shared.running.load(Ordering::SeqCst) {
        if !shared.paused.load(Ordering::SeqCst) {
            run_one(&shared, &logger);
        }

        let guard = shared.config.lock().unwrap();
        let interval = Duration::from_secs(guard.interval_seconds.max(1));
        // Wait out the interval, or wake immediately on stop/resume.
        let _unused = shared
            .cv
            .wait_timeout_while(guard, interval, |_| shared.running.load(Ordering::SeqCst));
    }
    logger.debug("Timer backup worker exiting");
}

fn run_one(shared: &TimerShared, logger: &Arc<dyn Logger>) {
    let backup_config = {
        let cfg = shared.config.lock().unwrap();
        cfg.backup.clone()
    };

    if !backup_config.source_dir.is_dir() {
        logger.warn(&format!(
            "Source directory not found: {}; skipping this interval",
            backup_config.source_dir.display()
        ));
        return;
    }
    if shared.cancel.is_cancelled() || !shared.running.load(Ordering::SeqCst) {
        return;
    }

    let mut task = BackupTask::new(backup_config, shared.cancel.clone());
    let status = task.execute(&**logger);
    logger.debug(&format!("Timer backup finished with status {}", status));
}
