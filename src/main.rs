//! Main entry point for the treevault CLI app.

use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;

use treevault::cli::{self, BackupOptions, Commands};
use treevault::config::{BackupConfig, RealtimeConfig, TimerConfig};
use treevault::logger::{ConsoleLogger, LogLevel, Logger};
use treevault::realtime::RealtimeBackupManager;
use treevault::registry::ActiveDestinations;
use treevault::status::{CancelFlag, TaskStatus};
use treevault::tasks::{BackupTask, RestoreTask};
use treevault::timer::TimerBackupManager;
use treevault::{fsx, package};

fn main() -> std::process::ExitCode {
    if let Err(e) = run_app() {
        eprintln!("Error: {}", e);
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}

fn build_backup_config(options: &BackupOptions) -> Result<BackupConfig, Box<dyn std::error::Error>> {
    let mut config = match &options.config {
        Some(path) => BackupConfig::from_json_file(path)?,
        None => BackupConfig::default(),
    };
    config.source_dir = options.source.clone();
    config.destination_dir = options.destination.clone();
    if options.compress {
        config.compress_enabled = true;
    }
    if options.package {
        config.package_enabled = true;
    }
    config.package_file_name = options.package_name.clone();
    if let Some(password) = cli::password_from_opt_or_env(options.password.clone()) {
        config.password = password;
    }
    config.filters.exclude_paths.extend(options.exclude_paths.iter().cloned());
    config.filters.name_exclude.extend(options.exclude_names.iter().cloned());
    config.filters.name_include.extend(options.include_names.iter().cloned());
    config.filters.extensions.extend(options.extensions.iter().cloned());
    // Surface bad filter patterns now, not mid-run.
    config.compiled_filters()?;
    Ok(config)
}

fn log_filters(config: &BackupConfig, logger: &dyn Logger) {
    if let Ok(filters) = config.compiled_filters() {
        for filter in filters.iter() {
            logger.info(&filter.description());
        }
    }
}

fn wait_for_enter(prompt: &str) {
    println!("{}", prompt);
    let stdin = std::io::stdin();
    let mut line = String::new();
    let _ = stdin.lock().read_line(&mut line);
}

fn run_app() -> Result<(), Box<dyn std::error::Error>> {
    let args = cli::run();
    let level = if args.verbose { LogLevel::Debug } else { LogLevel::Info };
    let logger: Arc<dyn Logger> = Arc::new(ConsoleLogger::new(level));
    let registry = ActiveDestinations::new();

    match args.command {
        Commands::Backup { options } => {
            let config = build_backup_config(&options)?;
            log_filters(&config, &*logger);
            let mut task = BackupTask::new(config, CancelFlag::new());
            match task.execute(&*logger) {
                TaskStatus::Completed => Ok(()),
                status => Err(format!("backup ended with status {}", status).into()),
            }
        }

        Commands::Restore {
            backup_dir,
            restore_dir,
            compress,
            package,
            package_name,
            password,
            fresh,
        } => {
            let mut config = BackupConfig::default();
            config.destination_dir = backup_dir;
            config.compress_enabled = compress;
            config.package_enabled = package;
            config.package_file_name = package_name;
            if let Some(password) = cli::password_from_opt_or_env(password) {
                config.password = password;
            }
            if fresh && restore_dir.is_dir() {
                fsx::clear_directory(&restore_dir)?;
            }
            let mut task = RestoreTask::new(&config, restore_dir, CancelFlag::new())?;
            match task.execute(&*logger) {
                TaskStatus::Completed => Ok(()),
                status => Err(format!("restore ended with status {}", status).into()),
            }
        }

        Commands::Watch { options, debounce_ms } => {
            let config = build_backup_config(&options)?;
            log_filters(&config, &*logger);
            let mut manager = RealtimeBackupManager::new(Arc::clone(&logger), registry);
            manager.start(RealtimeConfig { backup: config, debounce_ms })?;
            wait_for_enter("Watching for changes. Press Enter to stop.");
            manager.stop();
            Ok(())
        }

        Commands::Timer { options, interval } => {
            let config = build_backup_config(&options)?;
            log_filters(&config, &*logger);
            let mut manager = TimerBackupManager::new(Arc::clone(&logger), registry);
            manager.start(TimerConfig { backup: config, interval_seconds: interval })?;
            wait_for_enter("Timer backup running. Press Enter to stop.");
            manager.stop();
            Ok(())
        }

        Commands::List { package } => {
            list_package(&package)?;
            Ok(())
        }
    }
}

fn list_package(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let records = package::read_records(path)?;
    println!("Package index ({} entries):", records.len());
    for record in records {
        let detail = match record.kind {
            treevault::entry::EntryKind::Symlink => format!(" -> {}", record.symlink_target),
            _ => format!(" ({} bytes)", record.size),
        };
        println!("- {}{}", record.name, detail);
    }
    Ok(())
}
