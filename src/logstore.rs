//! File-backed device log.
//!
//! Lines are appended to `app.log`. Once it reaches the configured size it is
//! renamed to `app_<timestamp>.log` and a fresh `app.log` is started; only the
//! newest `num_log_files` rotated files are kept. Timestamps sort
//! lexicographically, so listing by name yields oldest-first order.

use crate::config::LogLevel;
use crate::error::PlatformError;
use crate::platform::{LogFile, LogSink, LogSource};
use chrono::Utc;
use parking_lot::Mutex;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Name of the active log file.
pub const ACTIVE_LOG: &str = "app.log";

const ROTATED_PREFIX: &str = "app_";
const LOG_SUFFIX: &str = ".log";

/// Log store rooted at one directory.
#[derive(Debug)]
pub struct FileLogStore {
    dir: PathBuf,
    // Serializes appends with rotation.
    lock: Mutex<()>,
}

impl FileLogStore {
    /// Opens (and creates) the log directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, PlatformError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    /// Directory holding the logs.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deletes every log file.
    pub fn erase(&self) -> Result<(), PlatformError> {
        let _guard = self.lock.lock();
        for name in self.rotated_names()? {
            fs::remove_file(self.dir.join(name))?;
        }
        let active = self.dir.join(ACTIVE_LOG);
        if active.exists() {
            fs::remove_file(active)?;
        }
        Ok(())
    }

    fn rotated_names(&self) -> Result<Vec<String>, PlatformError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if name.starts_with(ROTATED_PREFIX) && name.ends_with(LOG_SUFFIX) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    // New names must sort after every existing rotation.
    fn rotated_path(&self) -> Result<PathBuf, PlatformError> {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%3f").to_string();
        let newest = self.rotated_names()?.pop();
        let mut name = format!("{ROTATED_PREFIX}{stamp}{LOG_SUFFIX}");
        let mut n = 1;
        while newest.as_deref().is_some_and(|last| name.as_str() <= last) {
            name = format!("{ROTATED_PREFIX}{stamp}_{n:04}{LOG_SUFFIX}");
            n += 1;
        }
        Ok(self.dir.join(name))
    }
}

impl LogSink for FileLogStore {
    fn append(&self, level: LogLevel, line: &str) -> Result<(), PlatformError> {
        let _guard = self.lock.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(ACTIVE_LOG))?;
        let tag = match level {
            LogLevel::Errors => "ERR",
            LogLevel::Warnings => "WRN",
            LogLevel::Informative => "INF",
        };
        writeln!(
            file,
            "{} [{}] {}",
            Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            tag,
            line
        )?;
        Ok(())
    }
}

impl LogSource for FileLogStore {
    fn rotate(&self, max_size: u64, keep: usize) -> Result<bool, PlatformError> {
        let _guard = self.lock.lock();
        let active = self.dir.join(ACTIVE_LOG);
        let size = match fs::metadata(&active) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if size < max_size {
            return Ok(false);
        }

        let target = self.rotated_path()?;
        fs::rename(&active, &target)?;
        tracing::info!(file = %target.display(), size, "Log rotated");

        let rotated = self.rotated_names()?;
        let excess = rotated.len().saturating_sub(keep);
        for name in rotated.iter().take(excess) {
            fs::remove_file(self.dir.join(name))?;
            tracing::debug!(file = %name, "Old log removed");
        }
        Ok(true)
    }

    fn seal(&self) -> Result<Vec<LogFile>, PlatformError> {
        let _guard = self.lock.lock();
        let active = self.dir.join(ACTIVE_LOG);
        match fs::metadata(&active) {
            Ok(meta) if meta.len() > 0 => {
                let target = self.rotated_path()?;
                fs::rename(&active, &target)?;
                tracing::debug!(file = %target.display(), "Active log sealed for upload");
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let mut files = Vec::new();
        for name in self.rotated_names()? {
            let size = fs::metadata(self.dir.join(&name))?.len();
            files.push(LogFile { name, size });
        }
        Ok(files)
    }

    fn list(&self) -> Result<Vec<LogFile>, PlatformError> {
        let _guard = self.lock.lock();
        let mut files = Vec::new();
        for name in self.rotated_names()? {
            let size = fs::metadata(self.dir.join(&name))?.len();
            files.push(LogFile { name, size });
        }
        if let Ok(meta) = fs::metadata(self.dir.join(ACTIVE_LOG)) {
            if meta.len() > 0 {
                files.push(LogFile {
                    name: ACTIVE_LOG.to_string(),
                    size: meta.len(),
                });
            }
        }
        Ok(files)
    }

    fn read(&self, file: &LogFile) -> Result<Vec<u8>, PlatformError> {
        Ok(fs::read(self.dir.join(&file.name))?)
    }

    fn remove(&self, file: &LogFile) -> Result<(), PlatformError> {
        if file.name == ACTIVE_LOG {
            return Err(PlatformError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "the active log cannot be removed",
            )));
        }
        let _guard = self.lock.lock();
        fs::remove_file(self.dir.join(&file.name))?;
        Ok(())
    }
}
