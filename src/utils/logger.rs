// src/utils/logger.rs: Run log shared by every pipeline component

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use log::Level;


pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Sink for pipeline progress. One operation: append a timestamped line.
pub trait PipelineLog {
    fn append(&self, level: Level, message: &str);
}

/// Formats one log line the same way env_logger is configured in main.
pub fn format_line(level: Level, message: &str) -> String {
    format!(
        "[{}] {}: {}",
        chrono::Local::now().format(TIMESTAMP_FORMAT),
        level,
        message
    )
}


/// Appends to the run's log file and echoes through the `log` facade (stdout via env_logger).
#[derive(Debug)]
pub struct RunLogger {
    path: PathBuf,
    file: Mutex<File>,
}

impl RunLogger {
    /// Opens `path` for appending, creating parent directories as needed. Never truncates.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| anyhow!("Cannot open log file {}: {}", path.display(), e))?;
        Ok(RunLogger {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }
}

impl PipelineLog for RunLogger {
    fn append(&self, level: Level, message: &str) {
        log::log!(level, "{}", message);

        let line = format_line(level, message);
        if let Ok(mut file) = self.file.lock() {
            if let Err(e) = writeln!(file, "{}", line) {
                eprintln!("Failed to write to log file {}: {}", self.path.display(), e);
            }
        }
    }
}
