//! Logging collaborator.
//!
//! The engine never logs through a process-global facade; every task and
//! scheduler receives a logger as an explicit context parameter. Logging is
//! observational only: a logger can drop or reformat messages, but nothing
//! it does affects a task result.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }

    fn from_u8(v: u8) -> LogLevel {
        match v {
            0 => LogLevel::Debug,
            1 => LogLevel::Info,
            2 => LogLevel::Warn,
            _ => LogLevel::Error,
        }
    }
}

/// Capability set consumed by the core. Implementations must never panic;
/// all methods take an already-formatted message.
pub trait Logger: Send + Sync {
    fn log(&self, level: LogLevel, msg: &str);
    fn level(&self) -> LogLevel;
    fn set_level(&self, level: LogLevel);

    fn debug(&self, msg: &str) {
        self.log(LogLevel::Debug, msg);
    }
    fn info(&self, msg: &str) {
        self.log(LogLevel::Info, msg);
    }
    fn warn(&self, msg: &str) {
        self.log(LogLevel::Warn, msg);
    }
    fn error(&self, msg: &str) {
        self.log(LogLevel::Error, msg);
    }
}

/// Timestamped stderr logger with a level threshold.
pub struct ConsoleLogger {
    min_level: AtomicU8,
}

impl ConsoleLogger {
    pub fn new(min_level: LogLevel) -> Self {
        Self { min_level: AtomicU8::new(min_level as u8) }
    }
}

impl Default for ConsoleLogger {
    fn default() -> Self {
        Self::new(LogLevel::Info)
    }
}

impl Logger for ConsoleLogger {
    fn log(&self, level: LogLevel, msg: &str) {
        if level < self.level() {
            return;
        }
        let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        eprintln!("[{}] [{}] {}", stamp, level.as_str(), msg);
    }

    fn level(&self) -> LogLevel {
        LogLevel::from_u8(self.min_level.load(Ordering::Relaxed))
    }

    fn set_level(&self, level: LogLevel) {
        self.min_level.store(level as u8, Ordering::Relaxed);
    }
}

/// Captures log records in memory so tests can assert on them.
#[derive(Default)]
pub struct MemoryLogger {
    records: Mutex<Vec<(LogLevel, String)>>,
    min_level: AtomicU8,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(LogLevel, String)> {
        self.records.lock().unwrap().clone()
    }

    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.records
            .lock()
            .unwrap()
            .iter()
            .any(|(l, m)| *l == level && m.contains(needle))
    }
}

impl Logger for MemoryLogger {
    fn log(&self, level: LogLevel, msg: &str) {
        if level < self.level() {
            return;
        }
        self.records.lock().unwrap().push((level, msg.to_string()));
    }

    fn level(&self) -> LogLevel {
        LogLevel::from_u8(self.min_level.load(Ordering::Relaxed))
    }

    fn set_level(&self, level: LogLevel) {
        self.min_level.store(level as u8, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_threshold_filters_records() {
        let logger = MemoryLogger::new();
        logger.set_level(LogLevel::Warn);
        logger.debug("dropped");
        logger.info("dropped too");
        logger.warn("kept");
        logger.error("kept as well");

        let records = logger.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], (LogLevel::Warn, "kept".to_string()));
    }

    #[test]
    fn level_can_be_raised_and_lowered() {
        let logger = ConsoleLogger::new(LogLevel::Error);
        assert_eq!(logger.level(), LogLevel::Error);
        logger.set_level(LogLevel::Debug);
        assert_eq!(logger.level(), LogLevel::Debug);
    }
}
