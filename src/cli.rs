use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Print debug-level progress messages.
    #[arg(long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Back up a source directory once.
    #[command(alias = "b")]
    Backup {
        #[command(flatten)]
        options: BackupOptions,
    },

    /// Restore a backup into a target directory.
    #[command(alias = "r")]
    Restore {
        /// The directory holding the backup (or its package file).
        backup_dir: PathBuf,

        /// The directory to reconstruct the tree into.
        restore_dir: PathBuf,

        /// The backup was made with compression enabled.
        #[arg(long)]
        compress: bool,

        /// The backup was made with packaging enabled.
        #[arg(long)]
        package: bool,

        /// Package file name inside the backup directory.
        #[arg(long, default_value = crate::config::DEFAULT_PACKAGE_FILE_NAME)]
        package_name: String,

        /// Decryption password. Falls back to TREEVAULT_PASSWORD.
        #[arg(long)]
        password: Option<String>,

        /// Empty the restore directory before restoring.
        #[arg(long)]
        fresh: bool,
    },

    /// Watch a source directory and back up on changes, debounced.
    #[command(alias = "w")]
    Watch {
        #[command(flatten)]
        options: BackupOptions,

        /// Quiet window between a change burst and the backup, in milliseconds.
        #[arg(long, default_value_t = 1000)]
        debounce_ms: u64,
    },

    /// Back up a source directory on a fixed interval.
    #[command(alias = "t")]
    Timer {
        #[command(flatten)]
        options: BackupOptions,

        /// Seconds between backups.
        #[arg(long, default_value_t = 300)]
        interval: u64,
    },

    /// List the contents of a package file.
    #[command(alias = "l")]
    List {
        /// The package file to inspect.
        package: PathBuf,
    },
}

/// Backup parameters shared by the one-shot and scheduled subcommands.
#[derive(clap::Args, Clone, Debug)]
pub struct BackupOptions {
    /// The directory to back up.
    pub source: PathBuf,

    /// The directory to write the backup into.
    pub destination: PathBuf,

    /// Huffman-compress regular files (falls back to a raw copy when
    /// compression does not shrink a file).
    #[arg(long)]
    pub compress: bool,

    /// Fold the whole backup into a single package file.
    #[arg(long)]
    pub package: bool,

    /// Package file name inside the destination.
    #[arg(long, default_value = crate::config::DEFAULT_PACKAGE_FILE_NAME)]
    pub package_name: String,

    /// Encryption password. Falls back to TREEVAULT_PASSWORD; omit both for
    /// an unencrypted backup.
    #[arg(long)]
    pub password: Option<String>,

    /// Directory prefixes to exclude from the backup.
    #[arg(long = "exclude")]
    pub exclude_paths: Vec<String>,

    /// Reject entries whose name matches this pattern. Repeatable.
    #[arg(long = "exclude-name")]
    pub exclude_names: Vec<String>,

    /// Keep only entries whose name matches one of these patterns.
    #[arg(long = "include-name")]
    pub include_names: Vec<String>,

    /// Keep only regular files with one of these extensions.
    #[arg(long = "ext")]
    pub extensions: Vec<String>,

    /// Load the whole backup configuration from a JSON file; the flags
    /// above override what the file sets.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Gets the password from the command-line option or the
/// `TREEVAULT_PASSWORD` environment variable.
pub fn password_from_opt_or_env(password_opt: Option<String>) -> Option<String> {
    if password_opt.is_some() {
        return password_opt;
    }
    std::env::var("TREEVAULT_PASSWORD").ok()
}

/// Parses command-line arguments and returns the parsed structure.
pub fn run() -> Args {
    Args::parse()
}
