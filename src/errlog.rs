use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::warn;

/// Append-only `timestamp \t document \t error` log that outlives the run.
pub struct ErrorLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ErrorLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ErrorLog {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Never fails the caller; a log that cannot be written is reported via tracing.
    pub fn record(&self, document: &str, error: &str) {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let line = format!(
            "{}\t{}\t{}\n",
            chrono::Local::now().to_rfc3339(),
            one_line(document),
            one_line(error)
        );
        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| f.write_all(line.as_bytes()));
        if let Err(e) = written {
            warn!(path = %self.path.display(), "could not append to error log: {}", e);
        }
    }
}

fn one_line(s: &str) -> String {
    s.replace(['\n', '\t'], " ")
}
