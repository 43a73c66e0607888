use std::path::PathBuf;

/// The primary error type for all operations in the `treevault` crate.
#[derive(Debug)]
pub enum BackupError {
    /// An I/O error occurred, typically while reading or writing a file.
    /// Includes the path where the error happened.
    Io { source: std::io::Error, path: PathBuf },

    /// The backup source directory does not exist.
    SourceMissing(PathBuf),

    /// The destination directory could not be created.
    DestinationUncreatable(PathBuf),

    /// An error occurred when trying to strip a prefix from a file path.
    StripPrefix { prefix: PathBuf, path: PathBuf },

    /// The Huffman encoder could not produce a valid stream.
    HuffmanEncode(String),

    /// A Huffman stream is truncated or internally inconsistent.
    HuffmanDecode(String),

    /// Encryption of a file failed.
    EncryptFailed(String),

    /// Decryption failed. This is the only channel for "wrong password".
    DecryptFailed(String),

    /// A package file's offset, count, or record fields are inconsistent.
    PackageMalformed(String),

    /// A name-filter pattern did not compile. Raised at registration.
    InvalidRegex { pattern: String, source: regex::Error },

    /// The filesystem watcher could not be created or attached.
    WatcherFailed(String),

    /// A scheduler already owns the destination, or this instance is
    /// already running.
    SchedulerConflict(String),

    /// The task was cancelled through its cancel flag. Cooperative, not a fault.
    Cancelled,
}

impl std::fmt::Display for BackupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackupError::Io { source, path } => {
                write!(f, "I/O error on path '{}': {}", path.display(), source)
            }
            BackupError::SourceMissing(p) => {
                write!(f, "Source directory not found: {}", p.display())
            }
            BackupError::DestinationUncreatable(p) => {
                write!(f, "Cannot create destination directory: {}", p.display())
            }
            BackupError::StripPrefix { prefix, path } => write!(
                f,
                "Could not strip prefix '{}' from path '{}'",
                prefix.display(),
                path.display()
            ),
            BackupError::HuffmanEncode(msg) => write!(f, "Huffman encode error: {}", msg),
            BackupError::HuffmanDecode(msg) => write!(f, "Huffman decode error: {}", msg),
            BackupError::EncryptFailed(msg) => write!(f, "Encryption failed: {}", msg),
            BackupError::DecryptFailed(msg) => write!(f, "Decryption failed: {}", msg),
            BackupError::PackageMalformed(msg) => write!(f, "Malformed package: {}", msg),
            BackupError::InvalidRegex { pattern, source } => {
                write!(f, "Invalid filter pattern '{}': {}", pattern, source)
            }
            BackupError::WatcherFailed(msg) => write!(f, "Filesystem watcher error: {}", msg),
            BackupError::SchedulerConflict(msg) => write!(f, "Scheduler conflict: {}", msg),
            BackupError::Cancelled => write!(f, "Operation cancelled"),
        }
    }
}

impl std::error::Error for BackupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BackupError::Io { source, .. } => Some(source),
            BackupError::InvalidRegex { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BackupError {
    fn from(err: std::io::Error) -> Self {
        BackupError::Io { source: err, path: PathBuf::new() }
    }
}

impl BackupError {
    /// Attaches a path to a bare I/O error for better diagnostics.
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        BackupError::Io { source, path: path.into() }
    }
}
