//! Change-driven backup scheduler.
//!
//! Watcher events flow into an MPSC queue without blocking the watcher
//! thread. A worker drains the queue on a one-second tick, coalescing
//! bursts behind a dirty flag, and fires at most one backup once the
//! debounce window since the previous backup has passed. Events arriving
//! while a backup runs are subsumed by a single follow-up run.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::config::RealtimeConfig;
use crate::error::BackupError;
use crate::logger::Logger;
use crate::monitor::{ChangeEvent, ChangeKind, FsMonitor};
use crate::registry::ActiveDestinations;
use crate::status::{CancelFlag, TaskStatus};
use crate::tasks::BackupTask;

const TICK: Duration = Duration::from_secs(1);

struct RealtimeShared {
    config: RealtimeConfig,
    running: AtomicBool,
    cancel: CancelFlag,
    /// Serializes backup execution; `in_flight` mirrors it for observers.
    backup_mutex: Mutex<()>,
    in_flight: AtomicBool,
    last_backup: Mutex<Option<Instant>>,
}

pub struct RealtimeBackupManager {
    logger: Arc<dyn Logger>,
    registry: ActiveDestinations,
    monitor: FsMonitor,
    shared: Option<Arc<RealtimeShared>>,
    worker: Option<JoinHandle<()>>,
    /// Kept for the shutdown wakeup nudge.
    sender: Option<Sender<ChangeEvent>>,
    claimed_dest: Option<PathBuf>,
}

impl RealtimeBackupManager {
    pub fn new(logger: Arc<dyn Logger>, registry: ActiveDestinations) -> Self {
        Self {
            logger,
            registry,
            monitor: FsMonitor::new(),
            shared: None,
            worker: None,
            sender: None,
            claimed_dest: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared
            .as_ref()
            .map(|s| s.running.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    pub fn is_backup_in_progress(&self) -> bool {
        self.shared
            .as_ref()
            .map(|s| s.in_flight.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Attaches the watcher, spawns the worker, and runs one immediate
    /// backup so the current tree state is captured before any event.
    pub fn start(&mut self, config: RealtimeConfig) -> Result<(), BackupError> {
        if self.is_running() {
            return Ok(());
        }
        let source = config.backup.source_dir.clone();
        if !source.is_dir() {
            return Err(BackupError::SourceMissing(source));
        }
        let dest = config.backup.destination_dir.clone();
        if !self.registry.claim(&dest) {
            return Err(BackupError::SchedulerConflict(format!(
                "another scheduler already targets {}",
                dest.display()
            )));
        }

        let (tx, rx) = unbounded::<ChangeEvent>();
        let event_tx = tx.clone();
        self.monitor.set_event_callback(move |event| {
            // Never block the watcher thread; the queue is unbounded.
            let _ = event_tx.send(event);
        });
        if !self.monitor.add_watch(&source) {
            self.registry.release(&dest);
            return Err(BackupError::WatcherFailed(format!(
                "cannot watch {}",
                source.display()
            )));
        }
        if let Err(e) = self.monitor.start() {
            self.registry.release(&dest);
            return Err(e);
        }
        self.claimed_dest = Some(dest);

        let shared = Arc::new(RealtimeShared {
            config,
            running: AtomicBool::new(true),
            cancel: CancelFlag::new(),
            backup_mutex: Mutex::new(()),
            in_flight: AtomicBool::new(false),
            last_backup: Mutex::new(None),
        });
        self.shared = Some(Arc::clone(&shared));
        self.sender = Some(tx);

        let worker_shared = Arc::clone(&shared);
        let worker_logger = Arc::clone(&self.logger);
        self.worker = Some(std::thread::spawn(move || {
            worker_loop(worker_shared, rx, worker_logger);
        }));

        // Capture the tree as it stands; later events only need deltas.
        execute_backup(&shared, &*self.logger);

        self.logger.info(&format!(
            "Real-time backup started for directory: {}",
            shared.config.backup.source_dir.display()
        ));
        Ok(())
    }

    /// Stops the watcher and the worker, releasing all OS handles. Bounded
    /// by one worker tick plus one task checkpoint.
    pub fn stop(&mut self) {
        let Some(shared) = self.shared.clone() else { return };
        if !shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        shared.cancel.cancel();
        self.monitor.stop();

        // Nudge the worker out of its receive wait.
        if let Some(tx) = self.sender.take() {
            let _ = tx.send(ChangeEvent {
                path: shared.config.backup.source_dir.clone(),
                kind: ChangeKind::Modified,
            });
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        if let Some(dest) = self.claimed_dest.take() {
            self.registry.release(&dest);
        }
        self.logger.info("Real-time backup stopped");
    }
}

impl Drop for RealtimeBackupManager {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: Arc<RealtimeShared>, rx: Receiver<ChangeEvent>, logger: Arc<dyn Logger>) {
    logger.debug("Real-time backup worker started");
    let debounce = Duration::from_millis(shared.config.debounce_ms);
    let mut dirty = false;

    loop {
        match rx.recv_timeout(TICK) {
            Ok(event) => {
                logger.debug(&format!(
                    "File change detected: {} ({:?})",
                    event.path.display(),
                    event.kind
                ));
                dirty = true;
                // Coalesce the burst: one flag for any number of events.
                while rx.try_recv().is_ok() {}
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if !shared.running.load(Ordering::SeqCst) {
            break;
        }

        let elapsed = shared
            .last_backup
            .lock()
            .unwrap()
            .map(|t| t.elapsed())
            .unwrap_or(debounce);
        if dirty && !shared.in_flight.load(Ordering::SeqCst) && elapsed >= debounce {
            execute_backup(&shared, &*logger);
            dirty = false;
        }
    }
    logger.debug("Real-time backup worker exiting");
}

/// Runs one backup under the execution mutex. Returns false when another
/// run is already in flight.
fn execute_backup(shared: &RealtimeShared, logger: &dyn Logger) -> bool {
    let _guard = shared.backup_mutex.lock().unwrap();
    if shared.in_flight.load(Ordering::SeqCst) {
        return false;
    }
    shared.in_flight.store(true, Ordering::SeqCst);

    let mut task = BackupTask::new(shared.config.backup.clone(), shared.cancel.clone());
    let status = task.execute(logger);

    if status == TaskStatus::Completed {
        *shared.last_backup.lock().unwrap() = Some(Instant::now());
    }
    shared.in_flight.store(false, Ordering::SeqCst);
    status == TaskStatus::Completed
}
