//! Device collaborators consumed by the uplink core.

use crate::config::LogLevel;
use crate::error::PlatformError;
use async_trait::async_trait;

/// Board-level operations.
#[async_trait]
pub trait DeviceControl: Send + Sync {
    /// Serial number stamped into every uplink.
    fn serial_number(&self) -> String;

    /// Restarts the device. On real hardware this does not return.
    async fn reboot(&self);

    /// Erases the application storage partition.
    async fn erase_storage(&self) -> Result<(), PlatformError>;
}

/// Destination of saved device log lines.
pub trait LogSink: Send + Sync {
    /// Appends one line.
    fn append(&self, level: LogLevel, line: &str) -> Result<(), PlatformError>;
}

/// A saved log file available for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFile {
    /// File name
    pub name: String,
    /// Size in bytes
    pub size: u64,
}

/// Saved log files, read for upload.
pub trait LogSource: Send + Sync {
    /// Rotates the active file once it reaches `max_size` bytes, keeping at
    /// most `keep` rotated files. Returns true when a rotation happened.
    fn rotate(&self, max_size: u64, keep: usize) -> Result<bool, PlatformError>;

    /// Closes the active file into a rotated one and returns every rotated
    /// file, oldest first. Later lines go to a fresh active file.
    fn seal(&self) -> Result<Vec<LogFile>, PlatformError>;

    /// Log files, oldest first. The active file comes last.
    fn list(&self) -> Result<Vec<LogFile>, PlatformError>;

    /// Full content of `file`.
    fn read(&self, file: &LogFile) -> Result<Vec<u8>, PlatformError>;

    /// Deletes a sealed `file` after a successful upload.
    fn remove(&self, file: &LogFile) -> Result<(), PlatformError>;
}
