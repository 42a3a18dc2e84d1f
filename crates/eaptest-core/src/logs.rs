//! Log directory management: per-run log files, a combined suite log, and
//! rotation of historical logs.
//!
//! Each run's file handle is exclusively owned by its executor invocation,
//! so parallel runs write to disjoint files. The combined suite log is
//! append-only behind a mutex; its ordering reflects emission time, not
//! configuration order (the report carries the authoritative ordering).

use crate::config::{EapType, LoggingConfig};
use chrono::Local;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const LOG_PREFIX: &str = "eaptest-";

/// A dedicated log file for one test run. Owned by exactly one executor
/// invocation for its lifetime.
#[derive(Debug)]
pub struct RunLog {
    file: File,
    pub path: PathBuf,
}

impl RunLog {
    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.file, "{line}")
    }

    pub fn write_raw(&mut self, text: &str) -> io::Result<()> {
        self.file.write_all(text.as_bytes())
    }
}

/// Allocates per-run log files and maintains the combined suite log.
pub struct LogManager {
    dir: PathBuf,
    suite_log: Mutex<File>,
    suite_path: PathBuf,
}

impl LogManager {
    /// Creates the log directory, rotates historical logs, and opens a fresh
    /// combined suite log.
    pub fn new(config: &LoggingConfig) -> io::Result<Self> {
        fs::create_dir_all(&config.dir)?;
        rotate_logs(&config.dir, config.max_files, config.max_total_bytes)?;

        let timestamp = Local::now().format("%Y-%m-%dT%H-%M-%S");
        let suite_path = config.dir.join(format!("{LOG_PREFIX}suite-{timestamp}.log"));
        let suite_log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&suite_path)?;

        Ok(Self {
            dir: config.dir.clone(),
            suite_log: Mutex::new(suite_log),
            suite_path,
        })
    }

    /// Opens a dedicated log file for one EAP type's run. The timestamp in
    /// the name keeps repeated invocations from colliding.
    pub fn create_run_log(&self, eap_type: EapType) -> io::Result<RunLog> {
        let timestamp = Local::now().format("%Y-%m-%dT%H-%M-%S");
        let path = self
            .dir
            .join(format!("{LOG_PREFIX}{}-{timestamp}.log", eap_type.as_str()));
        let file = File::create(&path)?;
        Ok(RunLog { file, path })
    }

    /// Appends a timestamped line to the combined suite log.
    pub fn append_suite(&self, line: &str) {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        if let Ok(mut file) = self.suite_log.lock() {
            let _ = writeln!(file, "[{timestamp}] {line}");
        }
    }

    pub fn suite_path(&self) -> &Path {
        &self.suite_path
    }
}

/// Prunes oldest `eaptest-*.log` files until at most `max_files - 1` remain
/// (making room for new ones) and the directory is under `max_total_bytes`.
///
/// Names sort lexicographically, which gives timestamp order.
pub fn rotate_logs(dir: &Path, max_files: usize, max_total_bytes: u64) -> io::Result<()> {
    if !dir.exists() {
        return Ok(());
    }

    let mut logs: Vec<(PathBuf, u64)> = fs::read_dir(dir)?
        .filter_map(|entry| {
            let entry = entry.ok()?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(LOG_PREFIX)
                && Path::new(&name)
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("log"))
            {
                let size = entry.metadata().ok()?.len();
                Some((entry.path(), size))
            } else {
                None
            }
        })
        .collect();

    logs.sort();

    let mut count = logs.len();
    let mut total: u64 = logs.iter().map(|(_, size)| size).sum();
    let keep = max_files.saturating_sub(1);

    for (path, size) in &logs {
        if count <= keep && total <= max_total_bytes {
            break;
        }
        let _ = fs::remove_file(path);
        count -= 1;
        total = total.saturating_sub(*size);
    }

    Ok(())
}
